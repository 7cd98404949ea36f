//! Allow-list enforcement through the public authenticator API.

use std::sync::Arc;

use jsonwebtoken::{encode, get_current_timestamp, Algorithm, EncodingKey, Header};
use serde_json::json;
use skillrelay_auth::{CallerContext, InboundAuthenticator, SharedSecretVerifier};

const SECRET: &[u8] = b"integration-shared-secret";
const AUDIENCE: &str = "root-bot-app";

fn mint(claims: serde_json::Value) -> String {
    encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(SECRET))
        .expect("encode token")
}

fn authenticator(allowed: &[&str]) -> InboundAuthenticator {
    InboundAuthenticator::new(
        allowed.iter().copied(),
        Arc::new(SharedSecretVerifier::new(SECRET, Some(AUDIENCE))),
    )
}

fn caller() -> CallerContext {
    CallerContext {
        service_url: "https://smba.example.net/".to_owned(),
        conversation_id: Some("conv123".to_owned()),
    }
}

#[tokio::test]
async fn listed_caller_with_matching_audience_is_admitted() {
    let auth = authenticator(&["appA", "appC"]);
    let token = mint(json!({
        "ver": "1.0",
        "appid": "appA",
        "aud": AUDIENCE,
        "exp": get_current_timestamp() + 300,
    }));

    let result = auth.check(Some(&token), &caller(), "").await;

    assert!(result.is_allowed());
    assert_eq!(result.claims().and_then(|claims| claims.app_id()), Some("appA"));
}

#[tokio::test]
async fn wrong_audience_is_denied_even_for_listed_caller() {
    let auth = authenticator(&["appA"]);
    let token = mint(json!({
        "ver": "1.0",
        "appid": "appA",
        "aud": "some-other-bot",
        "exp": get_current_timestamp() + 300,
    }));

    assert!(!auth.authenticate(Some(&token), &caller(), "").await);
}

#[tokio::test]
async fn unlisted_caller_is_denied_with_reason() {
    let auth = authenticator(&["appA"]);
    let token = mint(json!({
        "ver": "1.0",
        "appid": "appB",
        "aud": AUDIENCE,
        "exp": get_current_timestamp() + 300,
    }));

    let result = auth.check(Some(&token), &caller(), "").await;
    assert_eq!(result.denial_reason(), Some("caller is not on the allow-list"));
}

#[tokio::test]
async fn legacy_azip_claim_is_accepted_for_v2_tokens() {
    let auth = authenticator(&["appA"]);
    let token = mint(json!({
        "ver": "2.0",
        "azip": "appA",
        "aud": AUDIENCE,
        "exp": get_current_timestamp() + 300,
    }));

    assert!(auth.authenticate(Some(&token), &caller(), "").await);
}

#[tokio::test]
async fn unknown_token_version_is_denied() {
    let auth = authenticator(&["appA"]);
    let token = mint(json!({
        "ver": "3.0",
        "appid": "appA",
        "azp": "appA",
        "aud": AUDIENCE,
        "exp": get_current_timestamp() + 300,
    }));

    assert!(!auth.authenticate(Some(&token), &caller(), "").await);
}

#[tokio::test]
async fn disabled_authenticator_admits_without_a_token() {
    let auth = InboundAuthenticator::disabled();
    assert!(auth.authenticate(None, &caller(), "https://botframework.azure.us").await);
}
