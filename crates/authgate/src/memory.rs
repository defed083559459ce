//! In-memory token cache.

use std::sync::{PoisonError, RwLock};

/// Holds the current access and ID tokens.
///
/// Tokens never touch storage; only the refresh record does.
#[derive(Debug, Default)]
pub struct TokenCache {
    access_token: RwLock<Option<String>>,
    id_token: RwLock<Option<String>>,
}

fn read(slot: &RwLock<Option<String>>) -> Option<String> {
    slot.read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .filter(|value| !value.is_empty())
}

fn write(slot: &RwLock<Option<String>>, value: Option<String>) {
    *slot.write().unwrap_or_else(PoisonError::into_inner) = value;
}

impl TokenCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the access token.
    pub fn set_access_token(&self, token: impl Into<String>) {
        write(&self.access_token, Some(token.into()));
    }

    /// Current access token; empty tokens read as `None`.
    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        read(&self.access_token)
    }

    /// Stores the ID token.
    pub fn set_id_token(&self, token: impl Into<String>) {
        write(&self.id_token, Some(token.into()));
    }

    /// Current ID token; empty tokens read as `None`.
    #[must_use]
    pub fn id_token(&self) -> Option<String> {
        read(&self.id_token)
    }

    /// Returns true when an access token is cached.
    #[must_use]
    pub fn has_access_token(&self) -> bool {
        self.access_token().is_some()
    }

    /// Forgets both tokens.
    pub fn clear(&self) {
        write(&self.access_token, None);
        write(&self.id_token, None);
    }
}
