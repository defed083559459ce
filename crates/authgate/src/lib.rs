//! # authgate
//!
//! Client-side engine for the OAuth2 Authorization Code flow with PKCE,
//! including enterprise SSO and gateway variants, with autonomous refresh
//! token rotation.
//!
//! ## Features
//!
//! - **PKCE transactions**: per-attempt verifier, challenge, state and nonce,
//!   persisted behind a key-value store with expiry
//! - **Sign URLs**: sign-in, sign-up, invitation, SSO, gateway and universal
//!   gateway redirects
//! - **Token exchange**: code and refresh exchanges that never fail loudly;
//!   every problem lands in [`TokenResult::errors`]
//! - **Claims validation**: header, audience, issuer, client, expiry and
//!   required fields across both token schemas
//! - **Refresh rotation**: a timer-driven loop refreshing ahead of expiry,
//!   stopping on `invalid_grant`
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use authgate::{Client, Config, SignOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::new(
//!         "acme",
//!         "1c2417e6-757d-47fe-b564-57b7c6f39b1b",
//!         "https://api.acme.example/",
//!         "http://localhost:8000/callback",
//!         "https://auth.acme.example",
//!     );
//!     let client = Arc::new(Client::new(config)?);
//!
//!     // Send the user here
//!     let url = client.sign_in_url(&SignOptions::default()).await?;
//!     println!("Visit: {url}");
//!
//!     // Then hand the callback query back
//!     let tokens = client
//!         .handle_redirect_callback("state=..&authorization_id=..&code=..")
//!         .await?;
//!     if tokens.valid {
//!         println!("{}", client.authorization_header().unwrap_or_default());
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod client;
pub mod config;
mod error;
pub mod http;
pub mod jwt;
pub mod memory;
pub mod pkce;
pub mod random;
pub mod redirect;
pub mod request;
pub mod scheduler;
pub mod storage;
pub mod time;
pub mod token;
pub mod transaction;

#[cfg(test)]
mod test_support;

pub use client::{Client, LogOut, RefreshOutcome, SessionEvent, SignOptions};
pub use config::{Config, Locale, Region};
pub use error::{Error, Result};
pub use http::{HttpResponse, HttpTransport, ReqwestTransport, TransportError};
pub use jwt::{Claims, JwtError};
pub use pkce::Pkce;
pub use request::Authorization;
pub use storage::{KvStore, MemoryKvStore};
pub use token::{RefreshStore, TokenError, TokenExchanger, TokenResult};
pub use transaction::{GatewayHint, Sign, Transaction, TransactionStore};
