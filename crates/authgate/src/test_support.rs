//! Shared fixtures for unit tests.

#![allow(clippy::unwrap_used)]

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Value, json};

use crate::config::{Config, Locale};

/// Fixed "now" used by claim tests.
pub const NOW_MS: i64 = 1_700_000_000_000;

pub const CLIENT_ID: &str = "1c2417e6-757d-47fe-b564-57b7c6f39b1b";

pub fn config() -> Config {
    Config::new(
        "acme",
        CLIENT_ID,
        "http://localhost/",
        "http://localhost:8000/",
        "http://localhost:4000",
    )
    .with_default_locale(Locale::En)
}

pub fn rs256_header() -> Value {
    json!({"alg": "RS256", "typ": "JWT", "kid": "3fc16816-0f99-484f-b3d1-87c22ae15b9c"})
}

/// Encodes header and body with a dummy signature.
pub fn sign(header: &Value, body: &Value) -> String {
    let encode = |v: &Value| URL_SAFE_NO_PAD.encode(serde_json::to_vec(v).unwrap());
    format!(
        "{}.{}.{}",
        encode(header),
        encode(body),
        URL_SAFE_NO_PAD.encode(b"signature")
    )
}

fn exp() -> i64 {
    NOW_MS / 1000 + 3600
}

pub fn access_claims_v1() -> Value {
    json!({
        "iss": "http://localhost:4000/t/acme",
        "sub": "1c42cf4b-c83a-48e0-8593-8c2e59de2f03",
        "aud": "http://localhost/",
        "exp": exp(),
        "iat": NOW_MS / 1000,
        "cid": CLIENT_ID,
        "jti": "9ec0e7c3-90ba-42c5-902a-efb569b325a1",
        "jtt": "access",
        "scp": ["openid", "email"],
        "tnt": "acme",
        "ver": 1
    })
}

pub fn id_claims_v1(nonce: &str) -> Value {
    let mut claims = access_claims_v1();
    let map = claims.as_object_mut().unwrap();
    map.insert("jtt".into(), json!("openid"));
    map.insert("at_hash".into(), json!("7sztJS__hNu0P_ZNOe-tMQ"));
    map.insert("c_hash".into(), json!("VJdGCxphGBH6qNyY2wCktQ"));
    map.insert("nonce".into(), json!(nonce));
    map.insert("email".into(), json!("jane@example.com"));
    claims
}

pub fn access_claims_v3() -> Value {
    json!({
        "sub": "1c42cf4b-c83a-48e0-8593-8c2e59de2f03",
        "aud": "http://localhost/",
        "exp": exp(),
        "iat": NOW_MS / 1000,
        "jti": "4b3c1f0e-2d1a-4e55-9a0b-2c7d9e8f6a10",
        "jtt": "access",
        "org": "acme",
        "scope": "openid email",
        "ver": 3
    })
}

pub fn id_claims_v3() -> Value {
    let mut claims = access_claims_v3();
    let map = claims.as_object_mut().unwrap();
    map.insert("jtt".into(), json!("openid"));
    map.insert("aud".into(), json!(CLIENT_ID));
    map.insert("at_hash".into(), json!("7sztJS__hNu0P_ZNOe-tMQ"));
    map.insert("c_hash".into(), json!("VJdGCxphGBH6qNyY2wCktQ"));
    map.insert("identities".into(), json!([]));
    claims
}
