//! # authgate-store
//!
//! Durable [`authgate::KvStore`] backed by `SQLite`.
//!
//! Transactions and the refresh record survive restarts, so a sign-in
//! started before a crash can still complete and a session can resume
//! without user interaction.
//!
//! ```ignore
//! use std::sync::Arc;
//! use authgate::{Client, Config};
//! use authgate_store::SqliteKvStore;
//!
//! let store = SqliteKvStore::open_default().await?;
//! let client = Client::new(config)?.with_store(Arc::new(store));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod error;
mod sqlite;

pub use error::{Error, Result};
pub use sqlite::{DATABASE_FILE, SqliteKvStore};
