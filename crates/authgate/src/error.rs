//! Error types for the authentication engine.

use crate::http::TransportError;
use crate::jwt::JwtError;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Engine error types.
///
/// Input errors (redirect URI, locale, missing idp) are raised before any
/// state is persisted. Protocol and transport errors never cross an exchange
/// boundary: they are folded into [`crate::TokenError`] entries instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Redirect URI rejected by the allow-list rules.
    #[error("Invalid redirect URI: {0}")]
    InvalidRedirectUri(String),

    /// Locale outside of the supported set.
    #[error("'{0}' locale not valid, possible values en,fr")]
    InvalidLocale(String),

    /// Neither a known region nor a base URL was configured.
    #[error(
        "You must provide region in values eu,us found '{0}', if not provide your cryptr_base_url"
    )]
    InvalidRegion(String),

    /// Client id rejected by validation.
    #[error("Invalid client id: {0:?}")]
    InvalidClientId(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// SSO transactions cannot fall back to the standard sign path.
    #[error("Should provide idpId when SSO transaction")]
    MissingIdpId,

    /// The callback query did not carry the expected parameters.
    #[error("Can not parse authorization params")]
    InvalidRedirectParams,

    /// Returned nonce differs from the one issued with the transaction.
    #[error("Nonce values have to be the sames")]
    NonceMismatch,

    /// JWT validation failure.
    #[error(transparent)]
    Jwt(#[from] JwtError),

    /// HTTP transport failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Key-value store failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// No secure random source could produce bytes.
    #[error("Secure random source unavailable: {0}")]
    Random(String),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// Creates a storage error from any displayable cause.
    #[must_use]
    pub fn storage(cause: impl std::fmt::Display) -> Self {
        Self::Storage(cause.to_string())
    }
}
