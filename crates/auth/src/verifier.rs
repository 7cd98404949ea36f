use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::claims::RawClaims;

pub const PUBLIC_OPENID_METADATA_URL: &str =
    "https://login.botframework.com/v1/.well-known/openidconfiguration";
pub const GOV_OPENID_METADATA_URL: &str =
    "https://login.botframework.us/v1/.well-known/openidconfiguration";
pub const GOV_CHANNEL_SERVICE: &str = "https://botframework.azure.us";

/// Clock skew tolerated on `exp`/`nbf`.
const LEEWAY_SECS: u64 = 300;

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("token is malformed: {0}")]
    Malformed(String),
    #[error("no signing key `{kid}` published at `{metadata_url}`")]
    UnknownSigningKey { kid: String, metadata_url: String },
    #[error("identity provider metadata unavailable: {0}")]
    Metadata(#[from] reqwest::Error),
    #[error("token rejected: {0}")]
    Rejected(#[from] jsonwebtoken::errors::Error),
}

/// Checks signature, issuer and lifetime of a bearer token and returns its claims.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(
        &self,
        token: &str,
        channel_service: &str,
    ) -> Result<RawClaims, VerificationError>;
}

/// HS256 verifier for local development and tests.
pub struct SharedSecretVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl SharedSecretVerifier {
    pub fn new(secret: &[u8], audience: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = LEEWAY_SECS;
        match audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        Self { key: DecodingKey::from_secret(secret), validation }
    }
}

#[async_trait]
impl TokenVerifier for SharedSecretVerifier {
    async fn verify(
        &self,
        token: &str,
        _channel_service: &str,
    ) -> Result<RawClaims, VerificationError> {
        Ok(decode::<RawClaims>(token, &self.key, &self.validation)?.claims)
    }
}

#[derive(Debug, Deserialize)]
struct OpenIdMetadata {
    issuer: String,
    jwks_uri: String,
}

struct CachedKeys {
    issuer: String,
    keys: JwkSet,
    fetched_at: Instant,
}

/// RS256 verifier backed by an OpenID metadata document and its JWKS. Signing keys are
/// cached per metadata URL and refetched once when a token names an unknown `kid`.
pub struct OpenIdTokenVerifier {
    http: reqwest::Client,
    metadata_url_override: Option<String>,
    audience: Option<String>,
    cache_ttl: Duration,
    cache: RwLock<HashMap<String, Arc<CachedKeys>>>,
}

impl OpenIdTokenVerifier {
    pub fn new(
        http: reqwest::Client,
        metadata_url_override: Option<String>,
        audience: Option<String>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            http,
            metadata_url_override,
            audience: audience.filter(|value| !value.trim().is_empty()),
            cache_ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Identity provider for a channel service hint. Empty means public cloud.
    pub fn metadata_url_for(&self, channel_service: &str) -> &str {
        if let Some(url) = &self.metadata_url_override {
            return url;
        }
        if channel_service.trim().trim_end_matches('/').eq_ignore_ascii_case(GOV_CHANNEL_SERVICE) {
            GOV_OPENID_METADATA_URL
        } else {
            PUBLIC_OPENID_METADATA_URL
        }
    }

    async fn keys_for(
        &self,
        metadata_url: &str,
        force_refresh: bool,
    ) -> Result<Arc<CachedKeys>, VerificationError> {
        if !force_refresh {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(metadata_url) {
                if cached.fetched_at.elapsed() < self.cache_ttl {
                    return Ok(Arc::clone(cached));
                }
            }
        }

        let metadata: OpenIdMetadata =
            self.http.get(metadata_url).send().await?.error_for_status()?.json().await?;
        let keys: JwkSet =
            self.http.get(&metadata.jwks_uri).send().await?.error_for_status()?.json().await?;
        debug!(
            event_name = "auth.signing_keys_refreshed",
            metadata_url,
            key_count = keys.keys.len(),
            "refreshed identity provider signing keys"
        );

        let cached =
            Arc::new(CachedKeys { issuer: metadata.issuer, keys, fetched_at: Instant::now() });
        self.cache.write().await.insert(metadata_url.to_owned(), Arc::clone(&cached));
        Ok(cached)
    }
}

#[async_trait]
impl TokenVerifier for OpenIdTokenVerifier {
    async fn verify(
        &self,
        token: &str,
        channel_service: &str,
    ) -> Result<RawClaims, VerificationError> {
        let header = decode_header(token)?;
        if header.alg != Algorithm::RS256 {
            return Err(VerificationError::Malformed(format!(
                "unsupported signing algorithm {:?}",
                header.alg
            )));
        }
        let kid = header.kid.ok_or_else(|| VerificationError::Malformed("missing kid".into()))?;

        let metadata_url = self.metadata_url_for(channel_service).to_owned();
        let mut keys = self.keys_for(&metadata_url, false).await?;
        if keys.keys.find(&kid).is_none() {
            keys = self.keys_for(&metadata_url, true).await?;
        }
        let jwk = keys.keys.find(&kid).ok_or_else(|| VerificationError::UnknownSigningKey {
            kid: kid.clone(),
            metadata_url: metadata_url.clone(),
        })?;

        let key = DecodingKey::from_jwk(jwk)?;
        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = LEEWAY_SECS;
        validation.set_issuer(&[keys.issuer.as_str()]);
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience.as_str()]),
            None => validation.validate_aud = false,
        }

        Ok(decode::<RawClaims>(token, &key, &validation)?.claims)
    }
}
