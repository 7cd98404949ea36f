use serde::Deserialize;

pub const VERSION_1: &str = "1.0";
pub const VERSION_2: &str = "2.0";

/// Token body as issued. Only the fields the authenticator looks at are decoded.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawClaims {
    #[serde(default)]
    pub ver: Option<String>,
    #[serde(default)]
    pub appid: Option<String>,
    #[serde(default)]
    pub azp: Option<String>,
    /// Misspelled authorized-party claim some issuers still emit for v2 tokens.
    #[serde(default)]
    pub azip: Option<String>,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
    #[serde(default)]
    pub serviceurl: Option<String>,
}

/// Verified identity of a caller, valid for one authentication.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Claims {
    pub issuer_version: Option<String>,
    pub app_id_claim: Option<String>,
    pub issuer: Option<String>,
    pub audience: Vec<String>,
    pub service_url: Option<String>,
}

impl From<RawClaims> for Claims {
    fn from(raw: RawClaims) -> Self {
        let app_id_claim = match raw.ver.as_deref() {
            None | Some(VERSION_1) => raw.appid,
            Some(VERSION_2) => raw.azp.or(raw.azip),
            Some(_) => None,
        };
        let audience = match raw.aud {
            Some(serde_json::Value::String(single)) => vec![single],
            Some(serde_json::Value::Array(many)) => many
                .into_iter()
                .filter_map(|value| value.as_str().map(str::to_owned))
                .collect(),
            _ => Vec::new(),
        };

        Self {
            issuer_version: raw.ver,
            app_id_claim,
            issuer: raw.iss,
            audience,
            service_url: raw.serviceurl,
        }
    }
}

impl Claims {
    pub fn app_id(&self) -> Option<&str> {
        self.app_id_claim.as_deref()
    }
}
