//! Example: interactive sign-in with PKCE and background refresh.
//!
//! This example demonstrates how to:
//! 1. Configure the client for a tenant
//! 2. Build a sign-in URL backed by a PKCE transaction
//! 3. Hand the redirect callback back to the client
//! 4. Watch the refresh loop through session events
//!
//! ## Prerequisites
//!
//! Set environment variables:
//! ```bash
//! export AUTHGATE_BASE_URL="https://auth.acme.example"
//! export AUTHGATE_TENANT="acme"
//! export AUTHGATE_CLIENT_ID="your-client-id"
//! export AUTHGATE_AUDIENCE="https://api.acme.example/"
//! export AUTHGATE_REDIRECT_URI="http://localhost:8000/callback"
//! ```
//!
//! ## Running
//!
//! ```bash
//! RUST_LOG=authgate=debug cargo run --example signin_flow
//! ```

use std::env;
use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, bail};
use authgate::{Client, Config, SessionEvent, SignOptions};
use tracing_subscriber::EnvFilter;

fn var(name: &str) -> anyhow::Result<String> {
    env::var(name).with_context(|| format!("{name} environment variable not set"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::new(
        var("AUTHGATE_TENANT")?,
        var("AUTHGATE_CLIENT_ID")?,
        var("AUTHGATE_AUDIENCE")?,
        var("AUTHGATE_REDIRECT_URI")?,
        var("AUTHGATE_BASE_URL")?,
    );
    let client = Arc::new(Client::new(config)?);

    println!("authgate sign-in example");
    println!("========================\n");

    // Step 1: sign-in URL
    let url = client
        .sign_in_url(&SignOptions::default().with_locale("en"))
        .await?;
    println!("Visit this URL to sign in:\n\n{url}\n");

    // Step 2: callback query
    print!("Paste the query string of the redirect (state=...&authorization_id=...&code=...): ");
    io::stdout().flush()?;
    let mut query = String::new();
    io::stdin().read_line(&mut query)?;
    let query = query.trim();

    if !client.can_handle_authentication(query) {
        bail!("the query does not carry a code and a state");
    }

    // Step 3: exchange
    let tokens = client.handle_redirect_callback(query).await?;
    if !tokens.valid {
        for error in &tokens.errors {
            eprintln!("  {}: {}", error.error, error.error_description);
        }
        bail!("sign-in rejected");
    }
    println!("\n✓ Signed in");
    if let Some(user) = client.user() {
        println!("  Subject: {}", user.str("sub").unwrap_or("?"));
    }
    if let Some(store) = client.refresh_store().await {
        println!(
            "  Refresh window opens at {} (epoch ms)",
            store.refresh_window_start()
        );
    }

    // Step 4: keep the session alive until it ends or Ctrl-C
    let mut events = client.subscribe();
    println!("\nRefreshing in the background, press Ctrl-C to sign out.");
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::TokensRefreshed) => println!("  tokens refreshed"),
                Ok(SessionEvent::RefreshInvalidGrant) => {
                    println!("  session ended, sign in again");
                    return Ok(());
                }
                Err(e) => bail!("event channel closed: {e}"),
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let outcome = client.log_out(None).await?;
    println!("\nLogged out: {outcome:?}");
    Ok(())
}
