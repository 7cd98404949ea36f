use hmac::{Hmac, Mac};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

use crate::domain::correlation::RoutingKey;
use crate::domain::skill::SkillId;

type HmacSha256 = Hmac<Sha256>;

const KEY_PREFIX: &str = "rk_";
const MIN_SECRET_LEN: usize = 16;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RoutingKeyError {
    #[error("correlation secret must be at least {MIN_SECRET_LEN} bytes")]
    SecretTooShort,
}

/// Derives routing keys as `HMAC-SHA256(secret, channel | parent conversation | skill)`.
///
/// The same triple always yields the same key, different parent conversations yield
/// different keys, and without the secret a skill cannot recover the parent id from it.
#[derive(Clone)]
pub struct RoutingKeyFactory {
    mac: HmacSha256,
}

impl std::fmt::Debug for RoutingKeyFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingKeyFactory").finish_non_exhaustive()
    }
}

impl RoutingKeyFactory {
    pub fn new(secret: &SecretString) -> Result<Self, RoutingKeyError> {
        Self::from_bytes(secret.expose_secret().as_bytes())
    }

    /// Factory with a process-local random secret. Keys stay resolvable from the store but
    /// re-creation after a restart produces a new key for the same pair.
    pub fn ephemeral() -> Self {
        let mut secret = [0_u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self { mac: mac_for(&secret) }
    }

    fn from_bytes(secret: &[u8]) -> Result<Self, RoutingKeyError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(RoutingKeyError::SecretTooShort);
        }
        Ok(Self { mac: mac_for(secret) })
    }

    pub fn derive(
        &self,
        channel_id: &str,
        parent_conversation_id: &str,
        skill_id: &SkillId,
    ) -> RoutingKey {
        let mut mac = self.mac.clone();
        for field in [channel_id, parent_conversation_id, skill_id.as_str()] {
            // Length prefix keeps ("ab", "c") and ("a", "bc") apart.
            mac.update(&(field.len() as u64).to_be_bytes());
            mac.update(field.as_bytes());
        }
        let digest = mac.finalize().into_bytes();
        RoutingKey(format!("{KEY_PREFIX}{}", to_hex(&digest)))
    }
}

fn mac_for(secret: &[u8]) -> HmacSha256 {
    match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => unreachable!("hmac accepts keys of any length"),
    }
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}
