//! Client configuration and input validators.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Scope requested when the caller does not ask for one.
pub const DEFAULT_SCOPE: &str = "openid email profile";

/// Locale used when neither the transaction nor the config sets one.
pub const DEFAULT_LOCALE: Locale = Locale::En;

/// Supported UI locales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    /// English.
    En,
    /// French.
    Fr,
}

impl Locale {
    /// Returns the wire value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Fr => "fr",
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Locale {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "en" => Ok(Self::En),
            "fr" => Ok(Self::Fr),
            other => Err(Error::InvalidLocale(other.to_string())),
        }
    }
}

/// Hosted regions with a well-known authorization server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Region {
    /// Europe.
    Eu,
    /// United States.
    Us,
}

impl Region {
    /// Returns the wire value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eu => "eu",
            Self::Us => "us",
        }
    }

    /// Authorization server of the region.
    #[must_use]
    pub const fn base_url(self) -> &'static str {
        match self {
            Self::Eu => "https://auth.cryptr.eu",
            Self::Us => "https://auth.cryptr.us",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "eu" => Ok(Self::Eu),
            "us" => Ok(Self::Us),
            other => Err(Error::InvalidRegion(other.to_string())),
        }
    }
}

impl TryFrom<String> for Region {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Tenant the client belongs to.
    pub tenant_domain: String,
    /// Public client identifier.
    pub client_id: String,
    /// Expected `aud` of v1 tokens.
    pub audience: String,
    /// Redirect URI used when a transaction does not override it.
    pub default_redirect_uri: String,
    /// Authorization server base URL, without trailing slash.
    ///
    /// Overridden by `region` when one is set.
    #[serde(default)]
    pub base_url: String,
    /// Hosted region; its server wins over `base_url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Region>,
    /// Locale used when a transaction does not set one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_locale: Option<Locale>,
    /// Gateway URLs sit at the server root instead of under `/t/{tenant}`.
    #[serde(default)]
    pub dedicated_server: bool,
}

impl Config {
    /// Creates a configuration.
    #[must_use]
    pub fn new(
        tenant_domain: impl Into<String>,
        client_id: impl Into<String>,
        audience: impl Into<String>,
        default_redirect_uri: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            tenant_domain: tenant_domain.into(),
            client_id: client_id.into(),
            audience: audience.into(),
            default_redirect_uri: default_redirect_uri.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            region: None,
            default_locale: None,
            dedicated_server: false,
        }
    }

    /// Creates a configuration served from a hosted region.
    #[must_use]
    pub fn for_region(
        tenant_domain: impl Into<String>,
        client_id: impl Into<String>,
        audience: impl Into<String>,
        default_redirect_uri: impl Into<String>,
        region: Region,
    ) -> Self {
        Self::new(
            tenant_domain,
            client_id,
            audience,
            default_redirect_uri,
            region.base_url(),
        )
        .with_region(region)
    }

    /// Parses a configuration from JSON and validates it.
    ///
    /// A `region` replaces `base_url`; one of the two is required.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the values are invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(json)?;
        config.base_url = match config.region {
            Some(region) => region.base_url().to_string(),
            None => config.base_url.trim_end_matches('/').to_string(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Serves the client from a hosted region, replacing `base_url`.
    #[must_use]
    pub fn with_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self.base_url = region.base_url().to_string();
        self
    }

    /// Sets the default locale.
    #[must_use]
    pub const fn with_default_locale(mut self, locale: Locale) -> Self {
        self.default_locale = Some(locale);
        self
    }

    /// Marks the authorization server as dedicated to this tenant.
    #[must_use]
    pub const fn with_dedicated_server(mut self, dedicated: bool) -> Self {
        self.dedicated_server = dedicated;
        self
    }

    /// Overrides the client id.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Overrides the tenant domain.
    #[must_use]
    pub fn with_tenant_domain(mut self, tenant_domain: impl Into<String>) -> Self {
        self.tenant_domain = tenant_domain.into();
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first invalid value found.
    pub fn validate(&self) -> Result<()> {
        match self.region {
            Some(region) if self.base_url != region.base_url() => {
                return Err(Error::InvalidConfig(format!(
                    "base_url {:?} does not match region {region}",
                    self.base_url
                )));
            }
            None if self.base_url.is_empty() => {
                return Err(Error::InvalidRegion("undefined".into()));
            }
            _ => {}
        }
        validate_base_url(&self.base_url)?;
        validate_client_id(&self.client_id)?;
        validate_redirect_uri(&self.default_redirect_uri)?;
        if self.tenant_domain.trim().is_empty() {
            return Err(Error::InvalidConfig("tenant_domain is empty".into()));
        }
        Ok(())
    }

    /// Returns the locale to use given a transaction's own locale.
    #[must_use]
    pub fn locale_for(&self, transaction_locale: Option<Locale>) -> Locale {
        transaction_locale
            .or(self.default_locale)
            .unwrap_or(DEFAULT_LOCALE)
    }
}

/// Validates a redirect URI: absolute `http(s)` URL with a host.
///
/// # Errors
///
/// Returns [`Error::InvalidRedirectUri`] on violation.
pub fn validate_redirect_uri(uri: &str) -> Result<()> {
    let parsed = Url::parse(uri).map_err(|e| Error::InvalidRedirectUri(format!("{uri}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::InvalidRedirectUri(format!(
            "{uri}: scheme must be http or https"
        )));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(Error::InvalidRedirectUri(format!("{uri}: missing host")));
    }
    if parsed.fragment().is_some() {
        return Err(Error::InvalidRedirectUri(format!(
            "{uri}: fragments are not allowed"
        )));
    }
    Ok(())
}

/// Validates a client id: non-empty, no whitespace.
///
/// # Errors
///
/// Returns [`Error::InvalidClientId`] on violation.
pub fn validate_client_id(client_id: &str) -> Result<()> {
    if client_id.is_empty() || client_id.chars().any(char::is_whitespace) {
        return Err(Error::InvalidClientId(client_id.to_string()));
    }
    Ok(())
}

/// Validates an optional locale string.
///
/// # Errors
///
/// Returns [`Error::InvalidLocale`] for values outside the supported set.
pub fn validate_locale(locale: Option<&str>) -> Result<Option<Locale>> {
    locale.map(str::parse).transpose()
}

fn validate_base_url(base_url: &str) -> Result<()> {
    let parsed = Url::parse(base_url)
        .map_err(|e| Error::InvalidConfig(format!("base_url {base_url:?}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::InvalidConfig(format!(
            "base_url {base_url:?} must be http or https"
        )));
    }
    Ok(())
}

/// Unions a requested scope with [`DEFAULT_SCOPE`].
///
/// Default scope words come first; duplicates are dropped, caller order is
/// otherwise preserved.
#[must_use]
pub fn final_scope(scope: Option<&str>) -> String {
    let mut words: Vec<&str> = DEFAULT_SCOPE.split(' ').collect();
    for word in scope.unwrap_or_default().split_whitespace() {
        if !words.contains(&word) {
            words.push(word);
        }
    }
    words.join(" ")
}
