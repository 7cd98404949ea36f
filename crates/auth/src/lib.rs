//! Inbound call authentication for skillrelay.
//!
//! - `InboundAuthenticator`: allow-list decision for every inbound request
//! - `TokenVerifier`: signature/issuer verification (`OpenIdTokenVerifier` for production,
//!   `SharedSecretVerifier` for local setups and tests)
//! - `Claims`: the app identity pulled out of a verified token

pub mod authenticator;
pub mod claims;
pub mod verifier;

pub use authenticator::{parse_bearer, AuthResult, CallerContext, InboundAuthenticator};
pub use claims::{Claims, RawClaims};
pub use verifier::{
    OpenIdTokenVerifier, SharedSecretVerifier, TokenVerifier, VerificationError,
    GOV_CHANNEL_SERVICE, GOV_OPENID_METADATA_URL, PUBLIC_OPENID_METADATA_URL,
};

/// Header a channel uses to say which cloud issued the caller's token.
pub const CHANNEL_SERVICE_HEADER: &str = "x-ms-channel-service";
