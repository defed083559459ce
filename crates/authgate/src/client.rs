//! Client facade: sign URLs, callbacks, refresh rotation and logout.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{self, Config};
use crate::error::{Error, Result};
use crate::http::{HttpResponse, HttpTransport, ReqwestTransport};
use crate::jwt::{self, Claims};
use crate::memory::TokenCache;
use crate::random::{RandomSource, SystemRandom};
use crate::redirect::{
    RedirectParams, has_authentication_params, has_invitation_params, organization_domain,
    query_param,
};
use crate::request::{Request, TokenTypeHint, slo_after_revoke_url, sso_revoke_token_url};
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::storage::{KvStore, MemoryKvStore, TRANSACTION_PREFIX};
use crate::time::{Clock, SystemClock};
use crate::token::{RefreshStore, TokenError, TokenExchanger, TokenResult};
use crate::transaction::{
    GatewayHint, Sign, Transaction, TransactionStore, gateway_sign_url, sign_url,
    universal_gateway_url,
};

/// Wait between two refresh checks.
pub const REFRESH_DELAY: Duration = Duration::from_secs(10);

/// Grace period before an empty refresh record is reported.
pub const SESSION_INVALID_GRACE: Duration = Duration::from_secs(1);

const EVENT_CAPACITY: usize = 16;

/// Session notifications for the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session is gone; the user must sign in again.
    RefreshInvalidGrant,
    /// New tokens were cached.
    TokensRefreshed,
}

/// What one pass of the refresh loop did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A refresh was attempted.
    Refreshed(TokenResult),
    /// Not due yet; rescheduled.
    NotDue,
    /// No refresh record; session invalid signal scheduled.
    NoSession,
    /// Another pass is running.
    InFlight,
}

/// Result of [`Client::log_out`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOut {
    /// No access token was cached.
    NotSignedIn,
    /// The server did not confirm the revocation.
    NotRevoked(HttpResponse),
    /// Revoked and cleared; follow `slo_url` for single logout when present.
    Revoked {
        /// Single logout URL.
        slo_url: Option<Url>,
    },
}

/// Options shared by the sign methods.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignOptions {
    /// Extra scope, merged with the default scope.
    pub scope: Option<String>,
    /// UI locale.
    pub locale: Option<String>,
    /// Redirect URI override.
    pub redirect_uri: Option<String>,
    /// Client id override (SSO).
    pub client_id: Option<String>,
    /// Tenant override (SSO).
    pub tenant_domain: Option<String>,
}

impl SignOptions {
    /// Sets the scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Sets the locale.
    #[must_use]
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Sets the redirect URI.
    #[must_use]
    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    /// Overrides the client id.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Overrides the tenant.
    #[must_use]
    pub fn with_tenant_domain(mut self, tenant_domain: impl Into<String>) -> Self {
        self.tenant_domain = Some(tenant_domain.into());
        self
    }
}

/// Resets an in-flight flag when dropped.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Authentication client.
///
/// Share it as `Arc<Client>`: the refresh loop keeps a handle on the client
/// between wake-ups.
pub struct Client {
    config: Arc<Config>,
    kv: Arc<dyn KvStore>,
    http: Arc<dyn HttpTransport>,
    random: Arc<dyn RandomSource>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    memory: TokenCache,
    events: broadcast::Sender<SessionEvent>,
    refresh_delay: Duration,
    refreshing: AtomicBool,
    timer_armed: AtomicBool,
    custom_store: bool,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("tenant_domain", &self.config.tenant_domain)
            .field("client_id", &self.config.client_id)
            .field("refresh_delay", &self.refresh_delay)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a client with in-memory storage, `reqwest` transport, system
    /// randomness and clock, and tokio timers.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            config: Arc::new(config),
            kv: Arc::new(MemoryKvStore::new()),
            http: Arc::new(ReqwestTransport::new()),
            random: Arc::new(SystemRandom::default()),
            clock: Arc::new(SystemClock),
            scheduler: Arc::new(TokioScheduler),
            memory: TokenCache::new(),
            events,
            refresh_delay: REFRESH_DELAY,
            refreshing: AtomicBool::new(false),
            timer_armed: AtomicBool::new(false),
            custom_store: false,
        })
    }

    /// Uses another key-value store for transactions and the refresh record.
    #[must_use]
    pub fn with_store(mut self, kv: Arc<dyn KvStore>) -> Self {
        self.kv = kv;
        self.custom_store = true;
        self
    }

    /// Uses another HTTP transport.
    #[must_use]
    pub fn with_transport(mut self, http: Arc<dyn HttpTransport>) -> Self {
        self.http = http;
        self
    }

    /// Uses another random source.
    #[must_use]
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// Uses another clock.
    ///
    /// The default in-memory store is rebuilt on the same clock so stored
    /// entries expire on it; a store given to [`Client::with_store`] keeps
    /// its own.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        if !self.custom_store {
            self.kv = Arc::new(MemoryKvStore::with_clock(Arc::clone(&clock)));
        }
        self.clock = clock;
        self
    }

    /// Uses another scheduler.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Changes the wait between refresh checks.
    #[must_use]
    pub const fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Subscribes to session events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // no subscriber is fine
        let _ = self.events.send(event);
    }

    fn transactions(&self) -> TransactionStore {
        TransactionStore::new(
            Arc::clone(&self.kv),
            Arc::clone(&self.random),
            Arc::clone(&self.clock),
        )
    }

    fn exchanger(&self) -> TokenExchanger {
        TokenExchanger::new(
            Arc::clone(&self.config),
            Arc::clone(&self.http),
            self.transactions(),
            Arc::clone(&self.kv),
            Arc::clone(&self.clock),
        )
    }

    /// Default scope merged with `scope`.
    #[must_use]
    pub fn final_scope(scope: Option<&str>) -> String {
        config::final_scope(scope)
    }

    // --- sign URLs -------------------------------------------------------

    /// Creates and persists a transaction without building a URL.
    ///
    /// # Errors
    ///
    /// Returns an input error (redirect URI, locale) or a storage error.
    pub async fn start_transaction(&self, sign: Sign, options: &SignOptions) -> Result<Transaction> {
        self.transactions()
            .create(
                sign,
                &Self::final_scope(options.scope.as_deref()),
                options.locale.as_deref(),
                options.redirect_uri.as_deref(),
            )
            .await
    }

    async fn sign_with_redirect(&self, sign: Sign, options: &SignOptions) -> Result<Url> {
        let transaction = self.start_transaction(sign, options).await?;
        sign_url(&self.config, &transaction, None)
    }

    /// Sign-in URL.
    ///
    /// # Errors
    ///
    /// Returns an input error or a storage error.
    pub async fn sign_in_url(&self, options: &SignOptions) -> Result<Url> {
        self.sign_with_redirect(Sign::Signin, options).await
    }

    /// Sign-up URL.
    ///
    /// # Errors
    ///
    /// Returns an input error or a storage error.
    pub async fn sign_up_url(&self, options: &SignOptions) -> Result<Url> {
        self.sign_with_redirect(Sign::Signup, options).await
    }

    /// Invitation URL.
    ///
    /// # Errors
    ///
    /// Returns an input error or a storage error.
    pub async fn invite_url(&self, options: &SignOptions) -> Result<Url> {
        self.sign_with_redirect(Sign::Invite, options).await
    }

    /// Enterprise login URL for `idp_id`, honoring client and tenant
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an input error or a storage error.
    pub async fn sso_sign_url(&self, idp_id: &str, options: &SignOptions) -> Result<Url> {
        let mut config = (*self.config).clone();
        if let Some(client_id) = &options.client_id {
            config::validate_client_id(client_id)?;
            config = config.with_client_id(client_id);
        }
        if let Some(tenant_domain) = &options.tenant_domain {
            config = config.with_tenant_domain(tenant_domain);
        }
        let transaction = self.start_transaction(Sign::Sso, options).await?;
        sign_url(&config, &transaction, Some(idp_id))
    }

    /// Gateway URL narrowed by `hint`.
    ///
    /// # Errors
    ///
    /// Returns an input error or a storage error.
    pub async fn gateway_url(&self, hint: &GatewayHint, options: &SignOptions) -> Result<Url> {
        let transaction = self.start_transaction(Sign::Signin, options).await?;
        gateway_sign_url(&self.config, &transaction, hint)
    }

    /// Universal gateway URL routed by organization domain or email.
    ///
    /// # Errors
    ///
    /// Returns an input error or a storage error.
    pub async fn universal_gateway_url(
        &self,
        organization_domain: Option<&str>,
        email: Option<&str>,
        options: &SignOptions,
    ) -> Result<Url> {
        let transaction = self.start_transaction(Sign::Signin, options).await?;
        universal_gateway_url(&self.config, &transaction, organization_domain, email)
    }

    /// Resumes an invitation whose `state` arrived in `query`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRedirectParams`] without a state, or an input
    /// or storage error.
    pub async fn handle_invitation_state(&self, query: &str, scope: Option<&str>) -> Result<Url> {
        let state = query_param(query, "state").ok_or(Error::InvalidRedirectParams)?;
        let transaction = self
            .transactions()
            .create_from_state(&state, Sign::Invite, &Self::final_scope(scope), None, None)
            .await?;
        sign_url(&self.config, &transaction, None)
    }

    // --- callbacks -------------------------------------------------------

    /// No token cached and the query carries a code and a state.
    #[must_use]
    pub fn can_handle_authentication(&self, query: &str) -> bool {
        !self.memory.has_access_token() && has_authentication_params(query)
    }

    /// No token cached and the query carries a state without authorization.
    #[must_use]
    pub fn can_handle_invitation(&self, query: &str) -> bool {
        !self.memory.has_access_token() && has_invitation_params(query)
    }

    /// Completes a sign-in from the redirect callback query.
    ///
    /// Exchange failures are reported in the returned [`TokenResult`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRedirectParams`] for an incomplete query, or a
    /// storage error.
    pub async fn handle_redirect_callback(self: &Arc<Self>, query: &str) -> Result<TokenResult> {
        let params = RedirectParams::parse(query)?;
        let Some(transaction) = self.transactions().get(&params.state).await? else {
            warn!("Callback for unknown or expired transaction {}", params.state);
            return Ok(TokenResult::invalid(vec![TokenError::new(
                "transaction",
                "invalid or expired transaction",
            )]));
        };

        let exchanger = self.exchanger();
        let previous = exchanger.refresh_store().await;
        let result = exchanger
            .get_tokens(
                &params.authorization,
                &transaction,
                params.organization_domain.as_deref(),
            )
            .await;
        self.handle_new_tokens(previous.as_ref(), &result);
        Ok(result)
    }

    /// Completes a universal gateway sign-in; the query must also carry
    /// `request_id`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::handle_redirect_callback`].
    pub async fn handle_universal_callback(self: &Arc<Self>, query: &str) -> Result<TokenResult> {
        let params = RedirectParams::parse(query)?;
        let request_id = params
            .request_id
            .clone()
            .ok_or(Error::InvalidRedirectParams)?;
        let Some(transaction) = self.transactions().get(&params.state).await? else {
            warn!("Callback for unknown or expired transaction {}", params.state);
            return Ok(TokenResult::invalid(vec![TokenError::new(
                "transaction",
                "invalid or expired transaction",
            )]));
        };

        let exchanger = self.exchanger();
        let previous = exchanger.refresh_store().await;
        let result = exchanger
            .get_universal_tokens(
                &params.authorization,
                &transaction,
                &request_id,
                params.organization_domain.as_deref(),
            )
            .await;
        self.handle_new_tokens(previous.as_ref(), &result);
        Ok(result)
    }

    // --- refresh rotation ------------------------------------------------

    /// A refresh is due: the record has a token and either no access token
    /// is cached or the refresh window has opened.
    #[must_use]
    pub fn can_refresh(&self, store: &RefreshStore) -> bool {
        store.is_usable()
            && (!self.memory.has_access_token()
                || self.clock.now_millis() >= store.refresh_window_start())
    }

    /// Caches the tokens of a valid result and keeps the loop going.
    ///
    /// An `invalid_grant` ends the loop with
    /// [`SessionEvent::RefreshInvalidGrant`]; other failures retry against
    /// `previous`. The exchange already persisted the new refresh record.
    /// A valid result without refresh parameters keeps rotating on
    /// `previous`.
    pub fn handle_new_tokens(self: &Arc<Self>, previous: Option<&RefreshStore>, result: &TokenResult) {
        if result.valid {
            self.memory.set_access_token(result.access_token.as_str());
            self.memory.set_id_token(result.id_token.as_str());
            self.emit(SessionEvent::TokensRefreshed);
            match result.refresh.as_ref().or(previous) {
                Some(store) => self.recurring_refresh_token(store),
                None => debug!("No refresh token issued, rotation not armed"),
            }
        } else if result.has_invalid_grant() {
            warn!("Refresh token rejected with invalid_grant, session ended");
            self.emit(SessionEvent::RefreshInvalidGrant);
        } else if let Some(previous) = previous {
            debug!("Exchange failed, retrying on the current refresh token");
            self.recurring_refresh_token(previous);
        }
    }

    /// Arms the refresh timer; at most one timer is pending at a time.
    pub fn recurring_refresh_token(self: &Arc<Self>, store: &RefreshStore) {
        if self.timer_armed.swap(true, Ordering::SeqCst) {
            debug!("Refresh timer already armed");
            return;
        }
        debug!(
            "Next refresh check in {:?} (window opens at {})",
            self.refresh_delay,
            store.refresh_window_start()
        );
        let client = Arc::clone(self);
        self.scheduler.schedule(
            self.refresh_delay,
            Box::pin(async move {
                client.timer_armed.store(false, Ordering::SeqCst);
                client.handle_refresh_tokens().await;
            }),
        );
    }

    /// One pass of the refresh loop.
    pub async fn handle_refresh_tokens(self: &Arc<Self>) -> RefreshOutcome {
        if self.refreshing.swap(true, Ordering::SeqCst) {
            debug!("Refresh already in flight");
            return RefreshOutcome::InFlight;
        }
        let guard = InFlight(&self.refreshing);

        let exchanger = self.exchanger();
        match exchanger.refresh_store().await {
            Some(store) if self.can_refresh(&store) => {
                info!("Refreshing tokens");
                let result = exchanger.get_tokens_by_refresh(&store.refresh_token).await;
                drop(guard);
                self.handle_new_tokens(Some(&store), &result);
                RefreshOutcome::Refreshed(result)
            }
            Some(store) => {
                drop(guard);
                self.recurring_refresh_token(&store);
                RefreshOutcome::NotDue
            }
            None => {
                drop(guard);
                info!("No refresh record, reporting session invalid shortly");
                let client = Arc::clone(self);
                self.scheduler.schedule(
                    SESSION_INVALID_GRACE,
                    Box::pin(async move {
                        if client.exchanger().refresh_store().await.is_none() {
                            client.emit(SessionEvent::RefreshInvalidGrant);
                        }
                    }),
                );
                RefreshOutcome::NoSession
            }
        }
    }

    /// Current refresh record.
    pub async fn refresh_store(&self) -> Option<RefreshStore> {
        self.exchanger().refresh_store().await
    }

    // --- tokens ----------------------------------------------------------

    /// Cached access token.
    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.memory.access_token()
    }

    /// Cached ID token.
    #[must_use]
    pub fn id_token(&self) -> Option<String> {
        self.memory.id_token()
    }

    /// Returns true when an access token is cached.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.memory.has_access_token()
    }

    /// `Bearer <access token>` for outgoing API requests.
    #[must_use]
    pub fn authorization_header(&self) -> Option<String> {
        self.memory.access_token().map(|token| format!("Bearer {token}"))
    }

    /// Claims of the cached ID token.
    #[must_use]
    pub fn user(&self) -> Option<Claims> {
        self.memory.id_token().and_then(|token| jwt::body(&token).ok())
    }

    /// Claims of an access token, without validation.
    #[must_use]
    pub fn claims_from_access(access_token: &str) -> Option<Claims> {
        if access_token.is_empty() {
            return None;
        }
        jwt::body(access_token).ok()
    }

    // --- revocation ------------------------------------------------------

    /// Revokes an access token.
    ///
    /// # Errors
    ///
    /// Returns a transport error.
    pub async fn revoke_access_token(&self, token: &str) -> Result<HttpResponse> {
        Ok(Request::new(self.http.as_ref(), &self.config)
            .revoke_token(token, TokenTypeHint::AccessToken)
            .await?)
    }

    /// Revokes a refresh token.
    ///
    /// # Errors
    ///
    /// Returns a transport error.
    pub async fn revoke_refresh_token(&self, token: &str) -> Result<HttpResponse> {
        Ok(Request::new(self.http.as_ref(), &self.config)
            .revoke_token(token, TokenTypeHint::RefreshToken)
            .await?)
    }

    /// Requests account access with the cached access token as bearer.
    ///
    /// Returns `Ok(None)` without calling the server when no access token
    /// is cached.
    ///
    /// # Errors
    ///
    /// Returns a transport error.
    pub async fn user_account_access(&self) -> Result<Option<HttpResponse>> {
        let Some(access_token) = self.memory.access_token() else {
            info!("No access token found, account access skipped");
            return Ok(None);
        };
        let response = Request::new(self.http.as_ref(), &self.config)
            .account_access(&access_token)
            .await?;
        Ok(Some(response))
    }

    /// URL ending the session held by an enterprise identity provider.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingIdpId`] for an empty `idp_id`, or an error if
    /// the URL is invalid.
    pub fn sso_force_logout_url(&self, idp_id: &str) -> Result<Url> {
        if idp_id.is_empty() {
            return Err(Error::MissingIdpId);
        }
        sso_revoke_token_url(&self.config, idp_id)
    }

    /// Revokes the cached access token and forgets the session.
    ///
    /// `target_url` (default redirect URI if absent) is where single logout
    /// lands.
    ///
    /// # Errors
    ///
    /// Returns a transport or storage error.
    pub async fn log_out(&self, target_url: Option<&str>) -> Result<LogOut> {
        let Some(access_token) = self.memory.access_token() else {
            info!("No access token found, nothing to log out");
            return Ok(LogOut::NotSignedIn);
        };

        let response = self.revoke_access_token(&access_token).await?;
        if response.data.get("revoked_at").is_none() {
            warn!("Revocation not confirmed: {}", response.data);
            return Ok(LogOut::NotRevoked(response));
        }

        let refresh_token = self.refresh_store().await.map(|store| store.refresh_token);
        let organization = refresh_token.as_deref().and_then(organization_domain);

        self.kv.clear_all(TRANSACTION_PREFIX).await?;
        RefreshStore::clear(self.kv.as_ref(), &self.config.client_id).await?;
        self.memory.clear();
        info!("Logged out");

        let slo_url = match response.data.get("slo_code").and_then(serde_json::Value::as_str) {
            Some(slo_code) => Some(slo_after_revoke_url(
                &self.config,
                slo_code,
                target_url.unwrap_or(&self.config.default_redirect_uri),
                organization,
            )?),
            None => None,
        };
        Ok(LogOut::Revoked { slo_url })
    }
}
