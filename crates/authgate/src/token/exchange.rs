//! Code and refresh token exchanges.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{RefreshStore, TokenError, TokenExchangeResponse, TokenResult};
use crate::config::Config;
use crate::error::Error;
use crate::http::{HttpResponse, HttpTransport, TransportError};
use crate::jwt::{self, Claims};
use crate::redirect::organization_domain;
use crate::request::{Authorization, Request};
use crate::storage::KvStore;
use crate::time::Clock;
use crate::transaction::{Sign, Transaction, TransactionStore};

/// Whether the response must carry an ID token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdTokenPolicy {
    Required,
    Optional,
}

/// Calls the token endpoints and turns their answers into [`TokenResult`]s.
///
/// Nothing here returns an error: transport failures, nonce mismatches and
/// claim violations all end up in [`TokenResult::errors`].
#[derive(Clone)]
pub struct TokenExchanger {
    config: Arc<Config>,
    http: Arc<dyn HttpTransport>,
    transactions: TransactionStore,
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for TokenExchanger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenExchanger")
            .field("client_id", &self.config.client_id)
            .finish_non_exhaustive()
    }
}

impl TokenExchanger {
    /// Creates an exchanger.
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        http: Arc<dyn HttpTransport>,
        transactions: TransactionStore,
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            http,
            transactions,
            kv,
            clock,
        }
    }

    fn request(&self) -> Request<'_> {
        Request::new(self.http.as_ref(), &self.config)
    }

    /// Exchanges an authorization code for tokens.
    ///
    /// The transaction is deleted once the server answers with a 2xx. A
    /// non-2xx answer or a network failure keeps it so the callback can be
    /// retried.
    pub async fn get_tokens(
        &self,
        authorization: &Authorization,
        transaction: &Transaction,
        organization_domain: Option<&str>,
    ) -> TokenResult {
        let response = self
            .request()
            .post_authorization_code(authorization, transaction, organization_domain)
            .await;
        self.handle_code_response(response, transaction, organization_domain)
            .await
    }

    /// Exchanges an authorization code obtained through the universal
    /// gateway; `request_id` correlates the gateway hand-off.
    pub async fn get_universal_tokens(
        &self,
        authorization: &Authorization,
        transaction: &Transaction,
        request_id: &str,
        organization_domain: Option<&str>,
    ) -> TokenResult {
        let response = self
            .request()
            .post_universal_authorization_code(
                authorization,
                transaction,
                request_id,
                organization_domain,
            )
            .await;
        self.handle_code_response(response, transaction, organization_domain)
            .await
    }

    async fn handle_code_response(
        &self,
        response: Result<HttpResponse, TransportError>,
        transaction: &Transaction,
        organization_domain: Option<&str>,
    ) -> TokenResult {
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                warn!("Code exchange for {} failed: {e}", transaction.state());
                return TokenResult::invalid(vec![TokenError::from_transport(&e)]);
            }
        };

        let result = match TokenExchangeResponse::from_value(&response.data) {
            Ok(parsed) => {
                self.validate_response(
                    &parsed,
                    Some(transaction),
                    organization_domain,
                    IdTokenPolicy::Required,
                )
                .await
            }
            Err(e) => TokenResult::invalid(vec![unparseable(&response, &e)]),
        };

        if let Err(e) = self.transactions.delete(transaction.state()).await {
            warn!("Failed to delete transaction {}: {e}", transaction.state());
        }
        log_outcome("Code exchange", &result);
        result
    }

    /// Exchanges a refresh token for fresh tokens.
    ///
    /// An empty `refresh_token` returns an invalid result without errors.
    /// When the server does not rotate the refresh token, the current one
    /// is kept with its expiry.
    pub async fn get_tokens_by_refresh(&self, refresh_token: &str) -> TokenResult {
        if refresh_token.is_empty() {
            debug!("Nothing to refresh");
            return TokenResult::default();
        }

        let transaction = match self
            .transactions
            .create(Sign::Refresh, "", None, None)
            .await
        {
            Ok(transaction) => transaction,
            Err(e) => {
                warn!("Could not create refresh transaction: {e}");
                return TokenResult::invalid(vec![TokenError::new("transaction", e.to_string())]);
            }
        };
        let organization_domain = organization_domain(refresh_token);
        let current = self.refresh_store().await;

        let result = match self.request().refresh_tokens(&transaction, refresh_token).await {
            Ok(response) => match TokenExchangeResponse::from_value(&response.data) {
                Ok(mut parsed) => {
                    parsed.keep_refresh_token(refresh_token, current.as_ref());
                    self.validate_response(
                        &parsed,
                        None,
                        organization_domain,
                        IdTokenPolicy::Optional,
                    )
                    .await
                }
                Err(e) => TokenResult::invalid(vec![unparseable(&response, &e)]),
            },
            Err(e) => TokenResult::invalid(vec![TokenError::from_transport(&e)]),
        };

        if let Err(e) = self.transactions.delete(transaction.state()).await {
            warn!("Failed to delete refresh transaction: {e}");
        }
        log_outcome("Refresh", &result);
        result
    }

    async fn validate_response(
        &self,
        response: &TokenExchangeResponse,
        transaction: Option<&Transaction>,
        organization_domain: Option<&str>,
        id_policy: IdTokenPolicy,
    ) -> TokenResult {
        if let Some(transaction) = transaction.filter(|t| response.nonce != t.nonce) {
            warn!("Nonce mismatch on transaction {}", transaction.state());
            return TokenResult::invalid(vec![nonce_error()]);
        }

        let now = self.clock.now();
        let now_ms = now.timestamp_millis();
        let mut errors = Vec::new();

        let access_claims = match response.access_token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => {
                match jwt::validates_access_token(token, &self.config, organization_domain, now_ms)
                {
                    Ok(claims) => Some(claims),
                    Err(e) => {
                        errors.push(TokenError::from_jwt("access_token", &e));
                        None
                    }
                }
            }
            None => {
                errors.push(TokenError::new("access_token", "not retrieved"));
                None
            }
        };

        match response.id_token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => {
                match jwt::validates_id_token(token, &self.config, organization_domain, now_ms) {
                    Ok(claims) => {
                        if !id_nonce_matches(&claims, transaction) {
                            errors.push(nonce_error());
                        }
                    }
                    Err(e) => errors.push(TokenError::from_jwt("id_token", &e)),
                }
            }
            None if id_policy == IdTokenPolicy::Required => {
                errors.push(TokenError::new("id_token", "cannot be validated"));
                errors.push(TokenError::new("id_token", "not retrieved"));
            }
            None => {}
        }

        let valid = errors.is_empty();
        let refresh = if valid {
            response.refresh_parameters(
                access_claims.as_ref().and_then(Claims::expiration_ms),
                now,
            )
        } else {
            None
        };

        if let Some(refresh) = &refresh {
            if let Err(e) = refresh.save(self.kv.as_ref(), &self.config.client_id, now).await {
                warn!("Failed to persist refresh record: {e}");
            }
        }

        TokenResult {
            valid,
            access_token: response.access_token.clone().unwrap_or_default(),
            id_token: response.id_token.clone().unwrap_or_default(),
            refresh_token: response.refresh_token.clone().unwrap_or_default(),
            errors,
            refresh,
        }
    }

    /// Loads the persisted refresh record of this client.
    pub async fn refresh_store(&self) -> Option<RefreshStore> {
        match RefreshStore::load(self.kv.as_ref(), &self.config.client_id).await {
            Ok(store) => store,
            Err(e) => {
                warn!("Failed to read refresh record: {e}");
                None
            }
        }
    }
}

fn id_nonce_matches(claims: &Claims, transaction: Option<&Transaction>) -> bool {
    match (claims.str("nonce"), transaction.and_then(|t| t.nonce.as_deref())) {
        (Some(claimed), Some(expected)) => claimed == expected,
        _ => true,
    }
}

fn nonce_error() -> TokenError {
    TokenError::new("nonce", Error::NonceMismatch.to_string())
}

fn unparseable(response: &HttpResponse, err: &serde_json::Error) -> TokenError {
    TokenError {
        error: "invalid_response".into(),
        error_description: err.to_string(),
        http_response: Some(response.clone()),
    }
}

fn log_outcome(what: &str, result: &TokenResult) {
    if result.valid {
        info!("{what} succeeded");
    } else {
        let codes: Vec<&str> = result.errors.iter().map(|e| e.error.as_str()).collect();
        warn!("{what} rejected: {codes:?}");
    }
}
