//! JWT decoding and trust-policy validation.
//!
//! Tokens are decoded without signature verification; the checks here pin
//! down who issued a token, for whom, and for how long. Two claim schemas are
//! in circulation, told apart by the `ver` claim:
//!
//! | Claim set | v1 (`ver` absent or < 3)        | v3 (`ver` >= 3)                  |
//! |-----------|---------------------------------|----------------------------------|
//! | issuer    | `iss` = `{base}/t/{org}`        | no `iss`, not checked            |
//! | audience  | `config.audience`               | `client_id` for `openid` tokens  |
//! | client    | `cid` = `client_id`             | no `cid`, not checked            |
//! | extra     | `scp`, `tnt`                    | `org`, `scope`                   |
//! | ID token  | `at_hash`, `c_hash`, `nonce`    | `at_hash`, `c_hash`, `identities`|

mod claims;

pub use claims::{
    TokenKind, required_fields, validates_audience, validates_client, validates_expiration,
    validates_fields_exist, validates_header, validates_issuer, validates_timestamps,
};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Map, Value};

use crate::config::Config;

/// Expected `typ` header value.
pub const JWT: &str = "JWT";

/// Expected `alg` header value.
pub const RS256: &str = "RS256";

/// JWT validation errors, one per violated rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JwtError {
    /// Token could not be split or decoded.
    #[error("Invalid token specified: {0}")]
    Malformed(String),

    /// Header `typ` is not `JWT`.
    #[error("the token must be a JWT")]
    NotJwt,

    /// Header `alg` is not `RS256`.
    #[error("the token must be signed in RSA 256")]
    NotRs256,

    /// Header carries no `kid`.
    #[error("token needs a kid (key identifier) in header")]
    MissingKid,

    /// `exp` is absent or not an integer.
    #[error("Expiration Time (exp) claim must be a number present")]
    InvalidExp,

    /// `iat` is absent or not an integer.
    #[error("Issued At (iat) claim must be a number present")]
    InvalidIat,

    /// Token expired.
    #[error("Expiration (exp) is invalid, it ({expiration_ms}) must be in the future")]
    Expired {
        /// Computed expiration in epoch milliseconds.
        expiration_ms: i64,
    },

    /// `aud` does not match.
    #[error("Audience (aud) {found} claim does not compliant with {expected} from config")]
    AudienceMismatch {
        /// Audience found in the token.
        found: String,
        /// Audience required by the config.
        expected: String,
    },

    /// `iss` does not match.
    #[error("Issuer (iss) {found} of this token claim does not compliant {expected}")]
    IssuerMismatch {
        /// Issuer found in the token.
        found: String,
        /// Issuer required by the config.
        expected: String,
    },

    /// `cid` does not match.
    #[error("Client id (cid) {found} claim does not compliant with {expected} from config")]
    ClientMismatch {
        /// Client id found in the token.
        found: String,
        /// Client id from the config.
        expected: String,
    },

    /// A required claim is absent.
    #[error("{0} is missing")]
    MissingField(String),
}

/// Claim schema generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SchemaVersion {
    /// Tenant-scoped tokens with issuer, client and tenant claims.
    V1,
    /// Organization-scoped tokens without issuer/client claims.
    V3,
}

/// Decoded JWT body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims(Map<String, Value>);

impl Claims {
    /// Wraps a claim map.
    #[must_use]
    pub const fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Returns a claim value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns true if the claim is present (even if null).
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Returns a string claim.
    #[must_use]
    pub fn str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Returns an integer claim.
    #[must_use]
    pub fn int(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    /// Schema generation, from `ver` (default 1).
    #[must_use]
    pub fn version(&self) -> SchemaVersion {
        match self.0.get("ver").and_then(Value::as_f64) {
            Some(ver) if ver >= 3.0 => SchemaVersion::V3,
            _ => SchemaVersion::V1,
        }
    }

    /// Token type (`jtt`), e.g. `access` or `openid`.
    #[must_use]
    pub fn token_type(&self) -> Option<&str> {
        self.str("jtt")
    }

    /// Expiration in epoch milliseconds, when `exp` is an integer.
    #[must_use]
    pub fn expiration_ms(&self) -> Option<i64> {
        self.int("exp").and_then(|exp| exp.checked_mul(1000))
    }
}

fn decode_segment(token: &str, index: usize) -> Result<Map<String, Value>, JwtError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(JwtError::Malformed(format!(
            "expected 3 segments, found {}",
            parts.len()
        )));
    }
    let bytes = URL_SAFE_NO_PAD
        .decode(parts[index].trim_end_matches('='))
        .map_err(|e| JwtError::Malformed(e.to_string()))?;
    match serde_json::from_slice(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(JwtError::Malformed("segment is not a JSON object".into())),
        Err(e) => Err(JwtError::Malformed(e.to_string())),
    }
}

/// Decodes a token header.
///
/// # Errors
///
/// Returns [`JwtError::Malformed`] if the token cannot be decoded.
pub fn header(token: &str) -> Result<Map<String, Value>, JwtError> {
    decode_segment(token, 0)
}

/// Decodes a token body.
///
/// # Errors
///
/// Returns [`JwtError::Malformed`] if the token cannot be decoded.
pub fn body(token: &str) -> Result<Claims, JwtError> {
    decode_segment(token, 1).map(Claims)
}

fn validates_token(
    token: &str,
    kind: TokenKind,
    config: &Config,
    organization_domain: Option<&str>,
    now_ms: i64,
) -> Result<Claims, JwtError> {
    let claims = body(token)?;
    let version = claims.version();

    validates_header(token)?;
    validates_timestamps(&claims)?;
    validates_audience(&claims, config)?;
    validates_issuer(&claims, config, organization_domain)?;
    if version == SchemaVersion::V1 {
        validates_client(&claims, config)?;
    }
    validates_expiration(&claims, now_ms)?;
    validates_fields_exist(&claims, &required_fields(kind, version))?;

    Ok(claims)
}

/// Validates an access token, returning its claims.
///
/// # Errors
///
/// Returns the first violated rule.
pub fn validates_access_token(
    token: &str,
    config: &Config,
    organization_domain: Option<&str>,
    now_ms: i64,
) -> Result<Claims, JwtError> {
    validates_token(token, TokenKind::Access, config, organization_domain, now_ms)
}

/// Validates an ID token, returning its claims.
///
/// # Errors
///
/// Returns the first violated rule.
pub fn validates_id_token(
    token: &str,
    config: &Config,
    organization_domain: Option<&str>,
    now_ms: i64,
) -> Result<Claims, JwtError> {
    validates_token(token, TokenKind::Id, config, organization_domain, now_ms)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::{
        NOW_MS, access_claims_v1, access_claims_v3, config, id_claims_v1, id_claims_v3,
        rs256_header, sign,
    };
    use serde_json::json;

    #[test]
    fn test_valid_v1_access_token() {
        let token = sign(&rs256_header(), &access_claims_v1());
        let claims = validates_access_token(&token, &config(), None, NOW_MS).unwrap();
        assert_eq!(claims.version(), SchemaVersion::V1);
        assert_eq!(claims.token_type(), Some("access"));
    }

    #[test]
    fn test_valid_v1_id_token() {
        let token = sign(&rs256_header(), &id_claims_v1("nonce-1"));
        let claims = validates_id_token(&token, &config(), None, NOW_MS).unwrap();
        assert_eq!(claims.str("nonce"), Some("nonce-1"));
    }

    #[test]
    fn test_v3_tokens_validate_without_v1_claims() {
        let access = sign(&rs256_header(), &access_claims_v3());
        let claims = validates_access_token(&access, &config(), None, NOW_MS).unwrap();
        assert_eq!(claims.version(), SchemaVersion::V3);
        for absent in ["iss", "cid", "scp", "tnt"] {
            assert!(!claims.contains(absent));
        }

        let id = sign(&rs256_header(), &id_claims_v3());
        validates_id_token(&id, &config(), None, NOW_MS).unwrap();
    }

    #[test]
    fn test_v3_token_missing_org_or_scope_fails() {
        for field in ["org", "scope"] {
            let mut body = access_claims_v3();
            body.as_object_mut().unwrap().remove(field);
            let token = sign(&rs256_header(), &body);
            let err = validates_access_token(&token, &config(), None, NOW_MS).unwrap_err();
            assert_eq!(err, JwtError::MissingField(field.to_string()));
        }
    }

    #[test]
    fn test_v3_id_token_requires_identities() {
        let mut body = id_claims_v3();
        body.as_object_mut().unwrap().remove("identities");
        let token = sign(&rs256_header(), &body);
        let err = validates_id_token(&token, &config(), None, NOW_MS).unwrap_err();
        assert_eq!(err.to_string(), "identities is missing");
    }

    #[test]
    fn test_access_token_is_not_an_id_token() {
        let token = sign(&rs256_header(), &access_claims_v1());
        let err = validates_id_token(&token, &config(), None, NOW_MS).unwrap_err();
        assert!(matches!(err, JwtError::MissingField(_)));
    }

    #[test]
    fn test_header_checked_before_body_rules() {
        let header = json!({"alg": "HS256", "typ": "JWT", "kid": "k"});
        let mut body = access_claims_v1();
        body["aud"] = json!("someone-else");
        let token = sign(&header, &body);
        let err = validates_access_token(&token, &config(), None, NOW_MS).unwrap_err();
        assert_eq!(err, JwtError::NotRs256);
    }

    #[test]
    fn test_malformed_token() {
        assert!(matches!(
            validates_access_token("not-a-token", &config(), None, NOW_MS),
            Err(JwtError::Malformed(_))
        ));
        assert!(matches!(body("a.!!!.c"), Err(JwtError::Malformed(_))));
    }

    #[test]
    fn test_version_detection() {
        let mut map = Map::new();
        assert_eq!(Claims::new(map.clone()).version(), SchemaVersion::V1);
        map.insert("ver".into(), json!(2));
        assert_eq!(Claims::new(map.clone()).version(), SchemaVersion::V1);
        map.insert("ver".into(), json!(3));
        assert_eq!(Claims::new(map.clone()).version(), SchemaVersion::V3);
        map.insert("ver".into(), json!(4));
        assert_eq!(Claims::new(map).version(), SchemaVersion::V3);
    }
}
