//! Redirect callback parameters.

use url::form_urlencoded;

use crate::error::{Error, Result};
use crate::request::Authorization;

/// Parameters the authorization server appends to the redirect URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectParams {
    /// Transaction state.
    pub state: String,
    /// Authorization to exchange.
    pub authorization: Authorization,
    /// Organization the user signed into, if routed through one.
    pub organization_domain: Option<String>,
    /// Universal gateway hand-off id.
    pub request_id: Option<String>,
}

/// Non-empty value of `name` in a query string (leading `?` allowed).
#[must_use]
pub fn query_param(query: &str, name: &str) -> Option<String> {
    form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
        .find(|(key, value)| key == name && !value.is_empty())
        .map(|(_, value)| value.into_owned())
}

fn has_query_param(query: &str, name: &str) -> bool {
    query_param(query, name).is_some()
}

impl RedirectParams {
    /// Parses a callback query string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRedirectParams`] unless `state`,
    /// `authorization_id` and `code` are all present.
    pub fn parse(query: &str) -> Result<Self> {
        match (
            query_param(query, "state"),
            query_param(query, "authorization_id"),
            query_param(query, "code"),
        ) {
            (Some(state), Some(id), Some(code)) => Ok(Self {
                state,
                authorization: Authorization { id, code },
                organization_domain: query_param(query, "organization_domain"),
                request_id: query_param(query, "request_id"),
            }),
            _ => Err(Error::InvalidRedirectParams),
        }
    }
}

/// The query carries a code and a state.
#[must_use]
pub fn has_authentication_params(query: &str) -> bool {
    has_query_param(query, "code") && has_query_param(query, "state")
}

/// The query carries a state but no authorization id.
#[must_use]
pub fn has_invitation_params(query: &str) -> bool {
    has_query_param(query, "state") && !has_query_param(query, "authorization_id")
}

/// Organization domain embedded as a dotted prefix of a refresh token.
#[must_use]
pub fn organization_domain(refresh_token: &str) -> Option<&str> {
    refresh_token
        .split_once('.')
        .map(|(domain, _)| domain)
        .filter(|domain| !domain.is_empty())
}
