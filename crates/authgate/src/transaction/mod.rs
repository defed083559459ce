//! Login transactions.
//!
//! A [`Transaction`] records one login attempt: the PKCE pair, the sign type,
//! scope, locale, redirect URI and nonce. It is persisted under
//! `transaction.<state>` when created and read back on the callback. The
//! token exchange deletes it once consumed; this store never does so on its
//! own.

mod sign_url;

pub use sign_url::{GatewayHint, gateway_sign_url, sign_url, universal_gateway_url};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{Locale, validate_locale, validate_redirect_uri};
use crate::error::{Error, Result};
use crate::pkce::{Pkce, random_uuid};
use crate::random::RandomSource;
use crate::storage::{KvStore, transaction_key};
use crate::time::Clock;

/// How long a transaction survives in storage.
pub const TRANSACTION_TTL_HOURS: i64 = 24;

/// What a transaction is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sign {
    /// Sign in an existing user.
    Signin,
    /// Sign up a new user.
    Signup,
    /// Accept an invitation.
    Invite,
    /// Sign in through an enterprise identity provider.
    Sso,
    /// Synthetic transaction carrying a state for a refresh call.
    Refresh,
}

impl Sign {
    /// Returns the wire value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Signin => "signin",
            Self::Signup => "signup",
            Self::Invite => "invite",
            Self::Sso => "sso",
            Self::Refresh => "refresh",
        }
    }
}

impl fmt::Display for Sign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sign {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "signin" => Ok(Self::Signin),
            "signup" => Ok(Self::Signup),
            "invite" => Ok(Self::Invite),
            "sso" => Ok(Self::Sso),
            "refresh" => Ok(Self::Refresh),
            other => Err(Error::InvalidConfig(format!("unknown sign type {other:?}"))),
        }
    }
}

/// One login attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// PKCE pair and state.
    pub pkce: Pkce,
    /// Sign type.
    pub sign_type: Sign,
    /// Requested scope (empty for refresh).
    pub scope: String,
    /// UI locale override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<Locale>,
    /// Redirect URI override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    /// Nonce the ID token must echo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl Transaction {
    /// Builds a transaction with fresh PKCE and nonce, without persisting it.
    ///
    /// # Errors
    ///
    /// Returns an error if no secure random source is available.
    pub fn generate(
        random: &dyn RandomSource,
        sign_type: Sign,
        scope: impl Into<String>,
        state: Option<String>,
        locale: Option<Locale>,
        redirect_uri: Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            pkce: Pkce::generate(random, state)?,
            sign_type,
            scope: scope.into(),
            locale,
            redirect_uri,
            nonce: Some(random_uuid(random)?),
        })
    }

    /// PKCE state, also the storage key suffix.
    #[must_use]
    pub fn state(&self) -> &str {
        &self.pkce.state
    }

    /// Storage key of this transaction.
    #[must_use]
    pub fn key(&self) -> String {
        transaction_key(&self.pkce.state)
    }
}

/// Creates, persists and reads back transactions.
#[derive(Clone)]
pub struct TransactionStore {
    kv: Arc<dyn KvStore>,
    random: Arc<dyn RandomSource>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for TransactionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionStore").finish_non_exhaustive()
    }
}

impl TransactionStore {
    /// Creates a store over the given collaborators.
    #[must_use]
    pub fn new(
        kv: Arc<dyn KvStore>,
        random: Arc<dyn RandomSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { kv, random, clock }
    }

    /// Creates and persists a transaction with a fresh state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRedirectUri`] or [`Error::InvalidLocale`]
    /// before anything is persisted, or a random/storage error.
    pub async fn create(
        &self,
        sign_type: Sign,
        scope: &str,
        locale: Option<&str>,
        redirect_uri: Option<&str>,
    ) -> Result<Transaction> {
        self.persist_new(None, sign_type, scope, locale, redirect_uri)
            .await
    }

    /// Creates and persists a transaction reusing a known `state`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::create`].
    pub async fn create_from_state(
        &self,
        state: &str,
        sign_type: Sign,
        scope: &str,
        locale: Option<&str>,
        redirect_uri: Option<&str>,
    ) -> Result<Transaction> {
        self.persist_new(
            Some(state.to_string()),
            sign_type,
            scope,
            locale,
            redirect_uri,
        )
        .await
    }

    async fn persist_new(
        &self,
        state: Option<String>,
        sign_type: Sign,
        scope: &str,
        locale: Option<&str>,
        redirect_uri: Option<&str>,
    ) -> Result<Transaction> {
        if let Some(uri) = redirect_uri {
            validate_redirect_uri(uri)?;
        }
        let locale = validate_locale(locale)?;

        let transaction = Transaction::generate(
            self.random.as_ref(),
            sign_type,
            scope,
            state,
            locale,
            redirect_uri.map(str::to_string),
        )?;
        let expires_at = self.clock.now() + Duration::hours(TRANSACTION_TTL_HOURS);
        self.kv
            .set(
                &transaction.key(),
                serde_json::to_value(&transaction)?,
                expires_at,
            )
            .await?;

        debug!(
            "Created {} transaction {}",
            transaction.sign_type,
            transaction.state()
        );
        Ok(transaction)
    }

    /// Reads back a transaction; `None` when absent, expired or unreadable.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn get(&self, state: &str) -> Result<Option<Transaction>> {
        let Some(value) = self.kv.get(&transaction_key(state)).await? else {
            debug!("No transaction for state {state}");
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(transaction) => Ok(Some(transaction)),
            Err(e) => {
                warn!("Discarding unreadable transaction {state}: {e}");
                Ok(None)
            }
        }
    }

    /// Deletes a consumed transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn delete(&self, state: &str) -> Result<()> {
        debug!("Deleting transaction {state}");
        self.kv.delete(&transaction_key(state)).await
    }
}
