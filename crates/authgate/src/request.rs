//! Token endpoint URLs and request bodies.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::error::Result;
use crate::http::{HttpResponse, HttpTransport, TransportError};
use crate::transaction::Transaction;

const API_VERSION: &str = "v1";

/// Authorization returned on the redirect callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    /// Authorization id.
    pub id: String,
    /// Authorization code.
    pub code: String,
}

impl Authorization {
    /// Creates an authorization.
    #[must_use]
    pub fn new(id: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            code: code.into(),
        }
    }
}

/// Token type hint sent on revocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenTypeHint {
    /// Access token.
    AccessToken,
    /// Refresh token.
    RefreshToken,
}

/// Body of an authorization code exchange.
#[derive(Debug, Clone, Serialize)]
pub struct TokenParams<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    authorization_id: &'a str,
    code: &'a str,
    code_verifier: &'a str,
    nonce: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_state: Option<&'a str>,
}

impl<'a> TokenParams<'a> {
    /// Body for the standard code exchange.
    #[must_use]
    pub fn new(
        config: &'a Config,
        authorization: &'a Authorization,
        transaction: &'a Transaction,
    ) -> Self {
        Self {
            grant_type: "authorization_code",
            client_id: &config.client_id,
            authorization_id: &authorization.id,
            code: &authorization.code,
            code_verifier: &transaction.pkce.code_verifier,
            nonce: transaction.nonce.as_deref(),
            request_id: None,
            client_state: None,
        }
    }

    /// Body for the universal gateway exchange.
    #[must_use]
    pub fn universal(
        config: &'a Config,
        authorization: &'a Authorization,
        transaction: &'a Transaction,
        request_id: &'a str,
    ) -> Self {
        Self {
            request_id: Some(request_id),
            client_state: Some(&transaction.pkce.state),
            ..Self::new(config, authorization, transaction)
        }
    }
}

/// Body of a refresh token exchange.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshParams<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    refresh_token: &'a str,
    nonce: Option<&'a str>,
}

impl<'a> RefreshParams<'a> {
    /// Creates the body.
    #[must_use]
    pub fn new(config: &'a Config, transaction: &'a Transaction, refresh_token: &'a str) -> Self {
        Self {
            grant_type: "refresh_token",
            client_id: &config.client_id,
            refresh_token,
            nonce: transaction.nonce.as_deref(),
        }
    }
}

/// Body of a revocation.
#[derive(Debug, Clone, Serialize)]
pub struct RevokeParams<'a> {
    token: &'a str,
    token_type_hint: TokenTypeHint,
    client_id: &'a str,
}

/// Body of an account access request.
#[derive(Debug, Clone, Serialize)]
pub struct AccountAccessParams<'a> {
    client_id: &'a str,
    access_token: &'a str,
}

fn org<'a>(config: &'a Config, organization_domain: Option<&'a str>) -> &'a str {
    organization_domain.unwrap_or(&config.tenant_domain)
}

/// `{base}/api/v1/tenants/{org}/{client_id}/{state}/oauth/{sign_type}/client/{authorization_id}/token`
///
/// # Errors
///
/// Returns an error if the resulting URL is invalid.
pub fn token_url(
    config: &Config,
    authorization: &Authorization,
    transaction: &Transaction,
    organization_domain: Option<&str>,
) -> Result<Url> {
    Ok(Url::parse(&format!(
        "{}/api/{API_VERSION}/tenants/{}/{}/{}/oauth/{}/client/{}/token",
        config.base_url,
        org(config, organization_domain),
        config.client_id,
        transaction.pkce.state,
        transaction.sign_type,
        authorization.id
    ))?)
}

/// `{base}/org/{org}/oauth2/token` with a known organization, else
/// `{base}/oauth/token`.
///
/// # Errors
///
/// Returns an error if the resulting URL is invalid.
pub fn universal_token_url(config: &Config, organization_domain: Option<&str>) -> Result<Url> {
    let url = match organization_domain {
        Some(domain) => format!("{}/org/{domain}/oauth2/token", config.base_url),
        None => format!("{}/oauth/token", config.base_url),
    };
    Ok(Url::parse(&url)?)
}

/// `{base}/oauth/token`
///
/// # Errors
///
/// Returns an error if the resulting URL is invalid.
pub fn refresh_token_url(config: &Config) -> Result<Url> {
    Ok(Url::parse(&format!("{}/oauth/token", config.base_url))?)
}

/// `{base}/oauth/revoke`
///
/// # Errors
///
/// Returns an error if the resulting URL is invalid.
pub fn revoke_token_url(config: &Config) -> Result<Url> {
    Ok(Url::parse(&format!("{}/oauth/revoke", config.base_url))?)
}

/// `{base}/enterprise/{idp_id}/force-logout`
///
/// # Errors
///
/// Returns an error if the resulting URL is invalid.
pub fn sso_revoke_token_url(config: &Config, idp_id: &str) -> Result<Url> {
    Ok(Url::parse(&format!(
        "{}/enterprise/{idp_id}/force-logout",
        config.base_url
    ))?)
}

/// `{base}/api/v1/client-management/tenants/{tenant}/account-access`
///
/// # Errors
///
/// Returns an error if the resulting URL is invalid.
pub fn account_access_url(config: &Config) -> Result<Url> {
    Ok(Url::parse(&format!(
        "{}/api/{API_VERSION}/client-management/tenants/{}/account-access",
        config.base_url, config.tenant_domain
    ))?)
}

/// Single logout URL carrying `slo_code` and `target_url`.
///
/// # Errors
///
/// Returns an error if the resulting URL is invalid.
pub fn slo_after_revoke_url(
    config: &Config,
    slo_code: &str,
    target_url: &str,
    organization_domain: Option<&str>,
) -> Result<Url> {
    let mut url = Url::parse(&format!(
        "{}/api/{API_VERSION}/tenants/{}/{}/oauth/token/slo-after-revoke-token",
        config.base_url,
        org(config, organization_domain),
        config.client_id
    ))?;
    url.query_pairs_mut()
        .append_pair("slo_code", slo_code)
        .append_pair("target_url", target_url);
    Ok(url)
}

/// Thin client for the token endpoints.
pub struct Request<'a> {
    http: &'a dyn HttpTransport,
    config: &'a Config,
}

impl<'a> Request<'a> {
    /// Binds a transport and a config.
    #[must_use]
    pub const fn new(http: &'a dyn HttpTransport, config: &'a Config) -> Self {
        Self { http, config }
    }

    async fn post(
        &self,
        url: Result<Url>,
        body: impl Serialize + Send,
    ) -> std::result::Result<HttpResponse, TransportError> {
        self.post_authorized(url, body, None).await
    }

    async fn post_authorized(
        &self,
        url: Result<Url>,
        body: impl Serialize + Send,
        bearer: Option<&str>,
    ) -> std::result::Result<HttpResponse, TransportError> {
        let url = url.map_err(|e| TransportError::Network(e.to_string()))?;
        let body: Value =
            serde_json::to_value(body).map_err(|e| TransportError::Network(e.to_string()))?;
        self.http.post_authorized(&url, &body, bearer).await
    }

    /// Exchanges an authorization code.
    ///
    /// # Errors
    ///
    /// Returns the transport failure, with the response when there is one.
    pub async fn post_authorization_code(
        &self,
        authorization: &Authorization,
        transaction: &Transaction,
        organization_domain: Option<&str>,
    ) -> std::result::Result<HttpResponse, TransportError> {
        debug!("Exchanging code for transaction {}", transaction.pkce.state);
        self.post(
            token_url(self.config, authorization, transaction, organization_domain),
            TokenParams::new(self.config, authorization, transaction),
        )
        .await
    }

    /// Exchanges an authorization code obtained through the universal gateway.
    ///
    /// # Errors
    ///
    /// Returns the transport failure, with the response when there is one.
    pub async fn post_universal_authorization_code(
        &self,
        authorization: &Authorization,
        transaction: &Transaction,
        request_id: &str,
        organization_domain: Option<&str>,
    ) -> std::result::Result<HttpResponse, TransportError> {
        debug!(
            "Exchanging universal code for transaction {}",
            transaction.pkce.state
        );
        self.post(
            universal_token_url(self.config, organization_domain),
            TokenParams::universal(self.config, authorization, transaction, request_id),
        )
        .await
    }

    /// Exchanges a refresh token.
    ///
    /// # Errors
    ///
    /// Returns the transport failure, with the response when there is one.
    pub async fn refresh_tokens(
        &self,
        transaction: &Transaction,
        refresh_token: &str,
    ) -> std::result::Result<HttpResponse, TransportError> {
        self.post(
            refresh_token_url(self.config),
            RefreshParams::new(self.config, transaction, refresh_token),
        )
        .await
    }

    /// Asks for account access on behalf of `access_token`, which also
    /// authorizes the call.
    ///
    /// # Errors
    ///
    /// Returns the transport failure, with the response when there is one.
    pub async fn account_access(
        &self,
        access_token: &str,
    ) -> std::result::Result<HttpResponse, TransportError> {
        self.post_authorized(
            account_access_url(self.config),
            AccountAccessParams {
                client_id: &self.config.client_id,
                access_token,
            },
            Some(access_token),
        )
        .await
    }

    /// Revokes a token.
    ///
    /// # Errors
    ///
    /// Returns the transport failure, with the response when there is one.
    pub async fn revoke_token(
        &self,
        token: &str,
        token_type_hint: TokenTypeHint,
    ) -> std::result::Result<HttpResponse, TransportError> {
        self.post(
            revoke_token_url(self.config),
            RevokeParams {
                token,
                token_type_hint,
                client_id: &self.config.client_id,
            },
        )
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::pkce::{CHALLENGE_METHOD, Pkce};
    use crate::test_support::{CLIENT_ID, config};
    use crate::transaction::Sign;
    use serde_json::json;

    fn transaction() -> Transaction {
        Transaction {
            pkce: Pkce {
                code_verifier: "verifier".into(),
                code_challenge: "challenge".into(),
                code_challenge_method: CHALLENGE_METHOD.into(),
                state: "state-1".into(),
            },
            sign_type: Sign::Signin,
            scope: "openid".into(),
            locale: None,
            redirect_uri: None,
            nonce: Some("nonce-1".into()),
        }
    }

    #[test]
    fn test_token_url_grammar() {
        let authorization = Authorization::new("auth-1", "code-1");
        let url = token_url(&config(), &authorization, &transaction(), None).unwrap();
        assert_eq!(
            url.as_str(),
            format!(
                "http://localhost:4000/api/v1/tenants/acme/{CLIENT_ID}/state-1/oauth/signin/client/auth-1/token"
            )
        );

        let url = token_url(&config(), &authorization, &transaction(), Some("misapret")).unwrap();
        assert!(url.path().starts_with("/api/v1/tenants/misapret/"));
    }

    #[test]
    fn test_other_urls() {
        assert_eq!(
            refresh_token_url(&config()).unwrap().as_str(),
            "http://localhost:4000/oauth/token"
        );
        assert_eq!(
            revoke_token_url(&config()).unwrap().as_str(),
            "http://localhost:4000/oauth/revoke"
        );
        assert_eq!(
            universal_token_url(&config(), Some("misapret")).unwrap().path(),
            "/org/misapret/oauth2/token"
        );
        assert_eq!(
            universal_token_url(&config(), None).unwrap().path(),
            "/oauth/token"
        );
    }

    #[test]
    fn test_enterprise_and_account_urls() {
        assert_eq!(
            sso_revoke_token_url(&config(), "acme_Xy12").unwrap().as_str(),
            "http://localhost:4000/enterprise/acme_Xy12/force-logout"
        );
        assert_eq!(
            account_access_url(&config()).unwrap().as_str(),
            "http://localhost:4000/api/v1/client-management/tenants/acme/account-access"
        );
        let body = serde_json::to_value(AccountAccessParams {
            client_id: CLIENT_ID,
            access_token: "at",
        })
        .unwrap();
        assert_eq!(body, json!({"client_id": CLIENT_ID, "access_token": "at"}));
    }

    #[test]
    fn test_region_base_url_reaches_every_endpoint() {
        let config = config().with_region(crate::config::Region::Eu);
        assert_eq!(
            refresh_token_url(&config).unwrap().as_str(),
            "https://auth.cryptr.eu/oauth/token"
        );
        assert_eq!(
            sso_revoke_token_url(&config, "idp").unwrap().host_str(),
            Some("auth.cryptr.eu")
        );
    }

    #[test]
    fn test_slo_url() {
        let url = slo_after_revoke_url(&config(), "slo-1", "https://app/", None).unwrap();
        assert_eq!(
            url.as_str(),
            format!(
                "http://localhost:4000/api/v1/tenants/acme/{CLIENT_ID}/oauth/token/slo-after-revoke-token?slo_code=slo-1&target_url=https%3A%2F%2Fapp%2F"
            )
        );
    }

    #[test]
    fn test_bodies() {
        let config = config();
        let t = transaction();
        let authorization = Authorization::new("auth-1", "code-1");

        let body = serde_json::to_value(TokenParams::new(&config, &authorization, &t)).unwrap();
        assert_eq!(
            body,
            json!({
                "grant_type": "authorization_code",
                "client_id": CLIENT_ID,
                "authorization_id": "auth-1",
                "code": "code-1",
                "code_verifier": "verifier",
                "nonce": "nonce-1"
            })
        );

        let body =
            serde_json::to_value(TokenParams::universal(&config, &authorization, &t, "req-1"))
                .unwrap();
        assert_eq!(body["request_id"], "req-1");
        assert_eq!(body["client_state"], "state-1");

        let body = serde_json::to_value(RefreshParams::new(&config, &t, "rt")).unwrap();
        assert_eq!(
            body,
            json!({
                "grant_type": "refresh_token",
                "client_id": CLIENT_ID,
                "refresh_token": "rt",
                "nonce": "nonce-1"
            })
        );

        let body = serde_json::to_value(RevokeParams {
            token: "at",
            token_type_hint: TokenTypeHint::AccessToken,
            client_id: CLIENT_ID,
        })
        .unwrap();
        assert_eq!(body["token_type_hint"], "access_token");
    }
}
