//! Inbound call authentication.
//!
//! Admits a request when its bearer token verifies against the trusted identity provider
//! and the caller's app identity is on the configured allow-list. An empty allow-list
//! admits everything.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use skillrelay_core::config::AuthConfig;
use tracing::{debug, warn};

use crate::claims::Claims;
use crate::verifier::{OpenIdTokenVerifier, TokenVerifier};

/// What the authenticator knows about the calling side of the request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallerContext {
    pub service_url: String,
    pub conversation_id: Option<String>,
}

impl CallerContext {
    pub fn new(service_url: impl Into<String>) -> Self {
        Self { service_url: service_url.into(), conversation_id: None }
    }
}

#[derive(Clone)]
pub struct InboundAuthenticator {
    allowed_callers: Arc<BTreeSet<String>>,
    verifier: Option<Arc<dyn TokenVerifier>>,
}

impl std::fmt::Debug for InboundAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundAuthenticator")
            .field("allowed_callers", &self.allowed_callers)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl InboundAuthenticator {
    /// Admits every request. Local development only.
    pub fn disabled() -> Self {
        Self { allowed_callers: Arc::new(BTreeSet::new()), verifier: None }
    }

    pub fn new<I, S>(allowed_callers: I, verifier: Arc<dyn TokenVerifier>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let allowed_callers: BTreeSet<String> =
            allowed_callers.into_iter().map(Into::into).collect();
        if allowed_callers.is_empty() {
            return Self::disabled();
        }
        Self { allowed_callers: Arc::new(allowed_callers), verifier: Some(verifier) }
    }

    pub fn from_config(config: &AuthConfig, http: reqwest::Client) -> Self {
        if config.allowed_callers.is_empty() {
            warn!(
                event_name = "auth.disabled",
                "auth.allowed_callers is empty; inbound calls are admitted without authentication"
            );
            return Self::disabled();
        }

        let verifier = OpenIdTokenVerifier::new(
            http,
            config.openid_metadata_url.clone(),
            Some(config.app_id.clone()),
            Duration::from_secs(config.signing_key_cache_secs),
        );
        Self::new(config.allowed_callers.iter().cloned(), Arc::new(verifier))
    }

    pub fn allowed_caller_count(&self) -> usize {
        self.allowed_callers.len()
    }

    pub fn is_enabled(&self) -> bool {
        self.verifier.is_some()
    }

    pub fn allowed_callers(&self) -> impl Iterator<Item = &str> {
        self.allowed_callers.iter().map(String::as_str)
    }

    /// Full decision. Verification and network failures are denials, never errors.
    pub async fn check(
        &self,
        bearer_token: Option<&str>,
        caller: &CallerContext,
        channel_service: &str,
    ) -> AuthResult {
        let Some(verifier) = &self.verifier else {
            return AuthResult::Allowed { claims: None };
        };

        let Some(token) = bearer_token.map(str::trim).filter(|token| !token.is_empty()) else {
            return AuthResult::denied("bearer token required");
        };

        let claims = match verifier.verify(token, channel_service).await {
            Ok(raw) => Claims::from(raw),
            Err(error) => {
                debug!(
                    event_name = "auth.token_rejected",
                    error = %error,
                    service_url = %caller.service_url,
                    "bearer token failed verification"
                );
                return AuthResult::denied("token verification failed");
            }
        };

        if let Some(service_url) = claims.service_url.as_deref() {
            if !same_service_url(service_url, &caller.service_url) {
                return AuthResult::denied("serviceurl claim does not match the caller");
            }
        }

        match claims.app_id() {
            Some(app_id) if self.allowed_callers.contains(app_id) => {
                AuthResult::Allowed { claims: Some(claims) }
            }
            Some(app_id) => {
                warn!(
                    event_name = "auth.caller_not_allowed",
                    app_id,
                    "caller app identity is not on the allow-list"
                );
                AuthResult::denied("caller is not on the allow-list")
            }
            None => AuthResult::denied("token carries no app identity claim"),
        }
    }

    pub async fn authenticate(
        &self,
        bearer_token: Option<&str>,
        caller: &CallerContext,
        channel_service: &str,
    ) -> bool {
        self.check(bearer_token, caller, channel_service).await.is_allowed()
    }

    /// Verified claims of an admitted caller. `None` when denied or when authentication is
    /// disabled.
    pub async fn authenticate_claims(
        &self,
        bearer_token: Option<&str>,
        caller: &CallerContext,
        channel_service: &str,
    ) -> Option<Claims> {
        self.check(bearer_token, caller, channel_service).await.into_claims()
    }
}

fn same_service_url(left: &str, right: &str) -> bool {
    left.trim_end_matches('/').eq_ignore_ascii_case(right.trim_end_matches('/'))
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
pub fn parse_bearer(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.trim().split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim()).filter(|token| !token.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    Allowed {
        /// `None` when authentication is disabled.
        claims: Option<Claims>,
    },
    Denied {
        reason: String,
    },
}

impl AuthResult {
    fn denied(reason: &str) -> Self {
        Self::Denied { reason: reason.to_string() }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, AuthResult::Allowed { .. })
    }

    pub fn claims(&self) -> Option<&Claims> {
        match self {
            AuthResult::Allowed { claims } => claims.as_ref(),
            AuthResult::Denied { .. } => None,
        }
    }

    pub fn into_claims(self) -> Option<Claims> {
        match self {
            AuthResult::Allowed { claims } => claims,
            AuthResult::Denied { .. } => None,
        }
    }

    pub fn denial_reason(&self) -> Option<&str> {
        match self {
            AuthResult::Denied { reason } => Some(reason),
            AuthResult::Allowed { .. } => None,
        }
    }
}
