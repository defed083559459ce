//! Individual claim rules.

use serde_json::Value;

use super::{Claims, JWT, JwtError, RS256, SchemaVersion, header};
use crate::config::Config;

/// Fields every v1 token carries.
const COMMON_FIELDS_V1: &[&str] = &[
    "iss", "sub", "aud", "exp", "iat", "cid", "jti", "jtt", "scp", "tnt",
];

/// Fields every v3 token carries.
const COMMON_FIELDS_V3: &[&str] = &["sub", "aud", "exp", "iat", "jti", "jtt", "org", "scope"];

/// Which token of the pair is being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Access token.
    Access,
    /// OpenID Connect ID token.
    Id,
}

/// Required claim set for a token kind and schema.
#[must_use]
pub fn required_fields(kind: TokenKind, version: SchemaVersion) -> Vec<&'static str> {
    let mut fields = match version {
        SchemaVersion::V1 => COMMON_FIELDS_V1.to_vec(),
        SchemaVersion::V3 => COMMON_FIELDS_V3.to_vec(),
    };
    if kind == TokenKind::Id {
        fields.extend(["at_hash", "c_hash"]);
        fields.push(match version {
            SchemaVersion::V1 => "nonce",
            SchemaVersion::V3 => "identities",
        });
    }
    fields
}

/// Header must declare `typ = JWT`, `alg = RS256` and carry a `kid`.
///
/// # Errors
///
/// Returns the first violated header rule.
pub fn validates_header(token: &str) -> Result<(), JwtError> {
    let header = header(token)?;
    if header.get("typ").and_then(Value::as_str) != Some(JWT) {
        return Err(JwtError::NotJwt);
    }
    if header.get("alg").and_then(Value::as_str) != Some(RS256) {
        return Err(JwtError::NotRs256);
    }
    if !header.contains_key("kid") {
        return Err(JwtError::MissingKid);
    }
    Ok(())
}

/// `exp` and `iat` must be integers.
///
/// # Errors
///
/// Returns [`JwtError::InvalidExp`] or [`JwtError::InvalidIat`].
pub fn validates_timestamps(claims: &Claims) -> Result<(), JwtError> {
    if !is_integer(claims.get("exp")) {
        return Err(JwtError::InvalidExp);
    }
    if !is_integer(claims.get("iat")) {
        return Err(JwtError::InvalidIat);
    }
    Ok(())
}

fn is_integer(value: Option<&Value>) -> bool {
    value.is_some_and(|v| v.is_i64() || v.is_u64())
}

/// `exp` (seconds) must be strictly after `now_ms`.
///
/// # Errors
///
/// Returns [`JwtError::Expired`] echoing the computed expiration.
pub fn validates_expiration(claims: &Claims, now_ms: i64) -> Result<(), JwtError> {
    let expiration_ms = claims.expiration_ms().ok_or(JwtError::InvalidExp)?;
    if expiration_ms <= now_ms {
        return Err(JwtError::Expired { expiration_ms });
    }
    Ok(())
}

/// `aud` must match `config.audience`, or `config.client_id` for v3
/// `openid` tokens.
///
/// # Errors
///
/// Returns [`JwtError::AudienceMismatch`].
pub fn validates_audience(claims: &Claims, config: &Config) -> Result<(), JwtError> {
    let expected = if claims.version() == SchemaVersion::V3 && claims.token_type() == Some("openid")
    {
        &config.client_id
    } else {
        &config.audience
    };

    let matches = match claims.get("aud") {
        Some(Value::String(aud)) => aud == expected,
        Some(Value::Array(auds)) => auds
            .iter()
            .any(|aud| aud.as_str() == Some(expected.as_str())),
        _ => false,
    };
    if matches {
        Ok(())
    } else {
        Err(JwtError::AudienceMismatch {
            found: display_claim(claims.get("aud")),
            expected: expected.clone(),
        })
    }
}

/// v1 `iss` must be `{base_url}/t/{organization_domain or tenant_domain}`;
/// v3 tokens carry no issuer and pass.
///
/// # Errors
///
/// Returns [`JwtError::IssuerMismatch`].
pub fn validates_issuer(
    claims: &Claims,
    config: &Config,
    organization_domain: Option<&str>,
) -> Result<(), JwtError> {
    if claims.version() == SchemaVersion::V3 {
        return Ok(());
    }
    let domain = organization_domain.unwrap_or(&config.tenant_domain);
    let expected = format!("{}/t/{domain}", config.base_url);
    if claims.str("iss") == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(JwtError::IssuerMismatch {
            found: display_claim(claims.get("iss")),
            expected,
        })
    }
}

/// `cid` must equal `config.client_id`.
///
/// # Errors
///
/// Returns [`JwtError::ClientMismatch`].
pub fn validates_client(claims: &Claims, config: &Config) -> Result<(), JwtError> {
    if claims.str("cid") == Some(config.client_id.as_str()) {
        Ok(())
    } else {
        Err(JwtError::ClientMismatch {
            found: display_claim(claims.get("cid")),
            expected: config.client_id.clone(),
        })
    }
}

/// Every listed field must be present.
///
/// # Errors
///
/// Returns [`JwtError::MissingField`] naming the first absent field.
pub fn validates_fields_exist(claims: &Claims, fields: &[&str]) -> Result<(), JwtError> {
    match fields.iter().find(|field| !claims.contains(field)) {
        Some(field) => Err(JwtError::MissingField((*field).to_string())),
        None => Ok(()),
    }
}

fn display_claim(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "undefined".to_string(),
    }
}
