//! Token exchange results and refresh parameters.

mod exchange;

pub use exchange::TokenExchanger;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::http::{HttpResponse, TransportError};
use crate::jwt::JwtError;
use crate::storage::{KvStore, refresh_key};

/// Seconds subtracted per retry from the access token expiry.
pub const DEFAULT_LEEWAY_SECS: u32 = 60;

/// Refresh attempts fitted before the access token expires.
pub const DEFAULT_REFRESH_RETRY: u32 = 5;

/// Error code the server returns for a dead refresh token.
pub const INVALID_GRANT: &str = "invalid_grant";

/// One failure collected during an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenError {
    /// Short error code or the field at fault.
    pub error: String,
    /// Human readable description.
    pub error_description: String,
    /// Raw response, when the server answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_response: Option<HttpResponse>,
}

impl TokenError {
    /// Creates an error without response.
    #[must_use]
    pub fn new(error: impl Into<String>, error_description: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_description: error_description.into(),
            http_response: None,
        }
    }

    /// Converts a transport failure, lifting `error` and
    /// `error_description` out of the response body.
    #[must_use]
    pub fn from_transport(err: &TransportError) -> Self {
        match err {
            TransportError::Status(response) => {
                let field = |name: &str| {
                    response
                        .data
                        .get(name)
                        .and_then(Value::as_str)
                        .map(str::to_string)
                };
                Self {
                    error: field("error").unwrap_or_else(|| format!("http_{}", response.status)),
                    error_description: field("error_description")
                        .unwrap_or_else(|| response.data.to_string()),
                    http_response: Some(response.clone()),
                }
            }
            TransportError::Network(cause) => {
                warn!("No response from token endpoint: {cause}");
                Self::new("error", "response is undefined")
            }
        }
    }

    /// A failed claim rule on `field`.
    #[must_use]
    pub fn from_jwt(field: &str, err: &JwtError) -> Self {
        Self::new(field, err.to_string())
    }

    /// Returns true for a terminal `invalid_grant`.
    #[must_use]
    pub fn is_invalid_grant(&self) -> bool {
        self.error == INVALID_GRANT
    }
}

/// Persisted refresh parameters of the active session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshStore {
    /// Refresh token, possibly prefixed with `<organization_domain>.`.
    pub refresh_token: String,
    /// Access token expiry, epoch milliseconds.
    pub access_token_expiration_date: i64,
    /// Refresh token expiry, epoch milliseconds.
    pub refresh_expiration_date: i64,
    /// Seconds of leeway per retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_leeway: Option<u32>,
    /// Retries fitted before expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_retry: Option<u32>,
}

impl RefreshStore {
    /// Leeway in seconds, defaulted.
    #[must_use]
    pub fn leeway(&self) -> u32 {
        self.refresh_leeway
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_LEEWAY_SECS)
    }

    /// Retry count, defaulted.
    #[must_use]
    pub fn retry(&self) -> u32 {
        self.refresh_retry
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_REFRESH_RETRY)
    }

    /// Instant (epoch ms) from which a refresh is due.
    #[must_use]
    pub fn refresh_window_start(&self) -> i64 {
        let window_ms = i64::from(self.leeway()) * i64::from(self.retry()) * 1000;
        self.access_token_expiration_date.saturating_sub(window_ms)
    }

    /// A record is usable only with a non-empty refresh token.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    /// Reads the record of `client_id`.
    ///
    /// An unreadable record counts as no session.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn load(kv: &dyn KvStore, client_id: &str) -> Result<Option<Self>> {
        let Some(value) = kv.get(&refresh_key(client_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_value::<Self>(value) {
            Ok(store) if store.is_usable() => Ok(Some(store)),
            Ok(_) => Ok(None),
            Err(e) => {
                warn!("Ignoring unreadable refresh record: {e}");
                Ok(None)
            }
        }
    }

    /// Writes the record of `client_id`, expiring with the refresh token.
    ///
    /// A record that already expired is removed instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn save(&self, kv: &dyn KvStore, client_id: &str, now: DateTime<Utc>) -> Result<()> {
        let key = refresh_key(client_id);
        match DateTime::from_timestamp_millis(self.refresh_expiration_date) {
            Some(expires_at) if expires_at > now => {
                debug!("Storing refresh record until {expires_at}");
                kv.set(&key, serde_json::to_value(self)?, expires_at).await
            }
            _ => {
                warn!("Refresh token already expired, dropping refresh record");
                kv.delete(&key).await
            }
        }
    }

    /// Removes the record of `client_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn clear(kv: &dyn KvStore, client_id: &str) -> Result<()> {
        kv.delete(&refresh_key(client_id)).await
    }
}

/// Parsed token endpoint response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenExchangeResponse {
    /// Access token.
    #[serde(default)]
    pub access_token: Option<String>,
    /// ID token.
    #[serde(default)]
    pub id_token: Option<String>,
    /// Refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Echo of the transaction nonce.
    #[serde(default)]
    pub nonce: Option<String>,
    /// Access token expiry, epoch milliseconds.
    #[serde(default, deserialize_with = "deserialize_date_ms")]
    pub access_token_expiration_date: Option<i64>,
    /// Refresh token expiry, epoch milliseconds.
    #[serde(default, deserialize_with = "deserialize_date_ms")]
    pub refresh_expiration_date: Option<i64>,
    /// Leeway in seconds.
    #[serde(default, deserialize_with = "deserialize_count")]
    pub refresh_leeway: Option<u32>,
    /// Retry count.
    #[serde(default, deserialize_with = "deserialize_count")]
    pub refresh_retry: Option<u32>,
}

impl TokenExchangeResponse {
    /// Parses a response body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not a token response object.
    pub fn from_value(data: &Value) -> serde_json::Result<Self> {
        Self::deserialize(data)
    }

    /// Keeps `refresh_token` when the response carries none.
    ///
    /// Expiry, leeway and retry missing from the response are taken from
    /// `current` when it holds the same token.
    pub fn keep_refresh_token(&mut self, refresh_token: &str, current: Option<&RefreshStore>) {
        if self.refresh_token.as_deref().is_some_and(|t| !t.is_empty()) {
            return;
        }
        debug!("Refresh token not rotated, keeping the current one");
        self.refresh_token = Some(refresh_token.to_string());
        if let Some(current) = current.filter(|c| c.refresh_token == refresh_token) {
            self.refresh_expiration_date = self
                .refresh_expiration_date
                .or(Some(current.refresh_expiration_date));
            self.refresh_leeway = self.refresh_leeway.or(current.refresh_leeway);
            self.refresh_retry = self.refresh_retry.or(current.refresh_retry);
        }
    }

    /// Builds refresh parameters, filling gaps from the access token expiry
    /// and `now + 1 day`. `None` without a refresh token.
    #[must_use]
    pub fn refresh_parameters(
        &self,
        access_expiration_ms: Option<i64>,
        now: DateTime<Utc>,
    ) -> Option<RefreshStore> {
        let refresh_token = self.refresh_token.as_deref().filter(|t| !t.is_empty())?;
        let tomorrow = (now + Duration::days(1)).timestamp_millis();
        Some(RefreshStore {
            refresh_token: refresh_token.to_string(),
            access_token_expiration_date: self
                .access_token_expiration_date
                .or(access_expiration_ms)
                .unwrap_or(tomorrow),
            refresh_expiration_date: self.refresh_expiration_date.unwrap_or(tomorrow),
            refresh_leeway: self.refresh_leeway,
            refresh_retry: self.refresh_retry,
        })
    }
}

/// Reads a date as epoch milliseconds from a number or an RFC 3339 / RFC 2822
/// string.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn parse_date_ms(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64)),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .or_else(|_| DateTime::parse_from_rfc2822(s))
            .map(|d| d.timestamp_millis())
            .ok(),
        _ => None,
    }
}

fn deserialize_date_ms<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_date_ms))
}

/// Reads a non-negative whole count from a number or a numeric string.
///
/// `60.0` reads as 60; negative, fractional and out of range values read as
/// absent so the defaults apply.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn parse_count(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .or_else(|| {
                n.as_f64()
                    .filter(|f| {
                        f.fract().abs() < f64::EPSILON && (0.0..=f64::from(u32::MAX)).contains(f)
                    })
                    .map(|f| f as u32)
            }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn deserialize_count<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_count))
}

/// Outcome of an exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResult {
    /// True when every token validated.
    pub valid: bool,
    /// Access token, empty when absent.
    pub access_token: String,
    /// ID token, empty when absent.
    pub id_token: String,
    /// Refresh token, empty when absent.
    pub refresh_token: String,
    /// Every failure collected.
    pub errors: Vec<TokenError>,
    /// Refresh parameters of a valid result carrying a refresh token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<RefreshStore>,
}

impl TokenResult {
    /// An invalid result with the given errors.
    #[must_use]
    pub fn invalid(errors: Vec<TokenError>) -> Self {
        Self {
            errors,
            ..Self::default()
        }
    }

    /// Returns true if any error is `invalid_grant`.
    #[must_use]
    pub fn has_invalid_grant(&self) -> bool {
        self.errors.iter().any(TokenError::is_invalid_grant)
    }

    /// Splits into a `Result`.
    ///
    /// # Errors
    ///
    /// Returns the collected errors when the result is not valid.
    pub fn into_result(self) -> std::result::Result<Self, Vec<TokenError>> {
        if self.valid {
            Ok(self)
        } else {
            Err(self.errors)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::MemoryKvStore;
    use crate::time::{Clock, MockClock};
    use serde_json::json;

    #[test]
    fn test_parse_dates() {
        assert_eq!(parse_date_ms(&json!(2_051_222_400_000_i64)), Some(2_051_222_400_000));
        assert_eq!(
            parse_date_ms(&json!("Mon, 01 Jan 2035 00:00:00 GMT")),
            Some(2_051_222_400_000)
        );
        assert_eq!(
            parse_date_ms(&json!("2035-01-01T00:00:00Z")),
            Some(2_051_222_400_000)
        );
        assert_eq!(parse_date_ms(&json!("soon")), None);
        assert_eq!(parse_date_ms(&json!(null)), None);
    }

    #[test]
    fn test_refresh_parameters_from_response() {
        let response = TokenExchangeResponse::from_value(&json!({
            "refresh_token": "misapret.rt",
            "access_token_expiration_date": "Mon, 01 Jan 2035 00:00:00 GMT",
            "refresh_expiration_date": 2_051_222_400_000_i64,
            "refresh_leeway": 60,
            "refresh_retry": 60
        }))
        .unwrap();
        let store = response.refresh_parameters(None, Utc::now()).unwrap();
        assert_eq!(
            store,
            RefreshStore {
                refresh_token: "misapret.rt".into(),
                access_token_expiration_date: 2_051_222_400_000,
                refresh_expiration_date: 2_051_222_400_000,
                refresh_leeway: Some(60),
                refresh_retry: Some(60),
            }
        );
    }

    #[test]
    fn test_refresh_parameters_fallbacks() {
        let now = Utc::now();
        let response = TokenExchangeResponse::from_value(&json!({"refresh_token": "rt"})).unwrap();
        let store = response.refresh_parameters(Some(42), now).unwrap();
        assert_eq!(store.access_token_expiration_date, 42);
        assert_eq!(
            store.refresh_expiration_date,
            (now + Duration::days(1)).timestamp_millis()
        );
        assert_eq!(store.leeway(), DEFAULT_LEEWAY_SECS);
        assert_eq!(store.retry(), DEFAULT_REFRESH_RETRY);

        let empty = TokenExchangeResponse::from_value(&json!({"refresh_token": ""})).unwrap();
        assert!(empty.refresh_parameters(None, now).is_none());
    }

    #[test]
    fn test_counts_are_read_leniently() {
        assert_eq!(parse_count(&json!(60)), Some(60));
        assert_eq!(parse_count(&json!(60.0)), Some(60));
        assert_eq!(parse_count(&json!("5")), Some(5));
        assert_eq!(parse_count(&json!(-1)), None);
        assert_eq!(parse_count(&json!(1.5)), None);
        assert_eq!(parse_count(&json!(5_000_000_000_i64)), None);
        assert_eq!(parse_count(&json!("x")), None);
        assert_eq!(parse_count(&json!(true)), None);
    }

    #[test]
    fn test_odd_counts_do_not_reject_the_response() {
        let response = TokenExchangeResponse::from_value(&json!({
            "access_token": "at",
            "refresh_token": "rt",
            "refresh_leeway": 60.0,
            "refresh_retry": -1
        }))
        .unwrap();
        assert_eq!(response.access_token.as_deref(), Some("at"));
        assert_eq!(response.refresh_leeway, Some(60));
        assert_eq!(response.refresh_retry, None);

        let store = response.refresh_parameters(Some(42), Utc::now()).unwrap();
        assert_eq!(store.retry(), DEFAULT_REFRESH_RETRY);

        let response = TokenExchangeResponse::from_value(&json!({
            "refresh_token": "rt",
            "refresh_leeway": "x",
            "refresh_retry": null
        }))
        .unwrap();
        assert_eq!(response.refresh_leeway, None);
        assert_eq!(response.refresh_retry, None);
    }

    #[test]
    fn test_keep_refresh_token_when_not_rotated() {
        let current = RefreshStore {
            refresh_token: "rt".into(),
            access_token_expiration_date: 1_000,
            refresh_expiration_date: 9_000_000,
            refresh_leeway: Some(10),
            refresh_retry: Some(3),
        };
        let mut response = TokenExchangeResponse::from_value(&json!({"access_token": "at"})).unwrap();
        response.keep_refresh_token("rt", Some(&current));

        let store = response.refresh_parameters(Some(5_000), Utc::now()).unwrap();
        assert_eq!(store.refresh_token, "rt");
        assert_eq!(store.access_token_expiration_date, 5_000);
        assert_eq!(store.refresh_expiration_date, 9_000_000);
        assert_eq!(store.refresh_leeway, Some(10));
        assert_eq!(store.refresh_retry, Some(3));

        let mut rotated =
            TokenExchangeResponse::from_value(&json!({"refresh_token": "rt-2"})).unwrap();
        rotated.keep_refresh_token("rt", Some(&current));
        assert_eq!(rotated.refresh_token.as_deref(), Some("rt-2"));
        assert_eq!(rotated.refresh_expiration_date, None);
    }

    #[test]
    fn test_refresh_window() {
        let store = RefreshStore {
            refresh_token: "rt".into(),
            access_token_expiration_date: 1_000_000,
            refresh_expiration_date: 2_000_000,
            refresh_leeway: Some(10),
            refresh_retry: Some(3),
        };
        assert_eq!(store.refresh_window_start(), 970_000);
    }

    #[test]
    fn test_transport_error_conversion() {
        let err = TransportError::Status(HttpResponse {
            status: 400,
            data: json!({"error": "invalid_grant", "error_description": "expired"}),
        });
        let token_error = TokenError::from_transport(&err);
        assert!(token_error.is_invalid_grant());
        assert_eq!(token_error.error_description, "expired");
        assert_eq!(token_error.http_response.unwrap().status, 400);

        let token_error = TokenError::from_transport(&TransportError::Network("refused".into()));
        assert_eq!(token_error, TokenError::new("error", "response is undefined"));
    }

    #[test]
    fn test_into_result() {
        let ok = TokenResult {
            valid: true,
            ..TokenResult::default()
        };
        assert!(ok.into_result().is_ok());

        let errors = vec![TokenError::new("access_token", "not retrieved")];
        assert_eq!(TokenResult::invalid(errors.clone()).into_result(), Err(errors));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let clock = MockClock::shared();
        let kv = MemoryKvStore::with_clock(clock.clone());
        let now = clock.now();
        let store = RefreshStore {
            refresh_token: "rt".into(),
            access_token_expiration_date: (now + Duration::hours(1)).timestamp_millis(),
            refresh_expiration_date: (now + Duration::days(7)).timestamp_millis(),
            refresh_leeway: None,
            refresh_retry: None,
        };
        store.save(&kv, "client", now).await.unwrap();
        assert_eq!(RefreshStore::load(&kv, "client").await.unwrap(), Some(store.clone()));

        clock.advance(Duration::days(7));
        assert_eq!(RefreshStore::load(&kv, "client").await.unwrap(), None);

        let expired = RefreshStore {
            refresh_expiration_date: clock.now().timestamp_millis(),
            ..store
        };
        expired.save(&kv, "client", clock.now()).await.unwrap();
        assert!(kv.is_empty().await);
    }
}
