//! Fixtures shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::sync::Arc;

use authgate::random::SystemRandom;
use authgate::scheduler::ManualScheduler;
use authgate::time::MockClock;
use authgate::{Client, Config, KvStore, Locale, MemoryKvStore, Transaction, TransactionStore};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{TimeZone, Utc};
use serde_json::{Value, json};
use url::Url;
use wiremock::MockServer;

/// Frozen "now" for every test.
pub const NOW_MS: i64 = 1_700_000_000_000;

pub const CLIENT_ID: &str = "1c2417e6-757d-47fe-b564-57b7c6f39b1b";

pub const TENANT: &str = "acme";

/// A client wired to a mock server, a frozen clock and a manual scheduler.
pub struct Harness {
    pub server: MockServer,
    pub client: Arc<Client>,
    pub kv: Arc<MemoryKvStore>,
    pub clock: Arc<MockClock>,
    pub scheduler: Arc<ManualScheduler>,
}

impl Harness {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let clock = Arc::new(MockClock::at(Utc.timestamp_millis_opt(NOW_MS).unwrap()));
        let kv = Arc::new(MemoryKvStore::with_clock(clock.clone()));
        let scheduler = Arc::new(ManualScheduler::new());
        let client = Client::new(config(&server.uri()))
            .unwrap()
            .with_store(kv.clone())
            .with_clock(clock.clone())
            .with_scheduler(scheduler.clone());
        Self {
            server,
            client: Arc::new(client),
            kv,
            clock,
            scheduler,
        }
    }

    pub fn base_url(&self) -> String {
        self.server.uri()
    }

    /// Reads back a persisted transaction.
    pub async fn transaction(&self, state: &str) -> Option<Transaction> {
        let kv: Arc<dyn KvStore> = self.kv.clone();
        TransactionStore::new(kv, Arc::new(SystemRandom::default()), self.clock.clone())
            .get(state)
            .await
            .unwrap()
    }

    /// Claims of a tenant-scoped token issued by the mock server.
    pub fn access_claims(&self) -> Value {
        json!({
            "iss": format!("{}/t/{TENANT}", self.base_url()),
            "sub": "1c42cf4b-c83a-48e0-8593-8c2e59de2f03",
            "aud": "http://localhost/",
            "exp": NOW_MS / 1000 + 3600,
            "iat": NOW_MS / 1000,
            "cid": CLIENT_ID,
            "jti": "9ec0e7c3-90ba-42c5-902a-efb569b325a1",
            "jtt": "access",
            "scp": ["openid", "email"],
            "tnt": TENANT,
            "ver": 1
        })
    }

    pub fn id_claims(&self, nonce: &str) -> Value {
        let mut claims = self.access_claims();
        let map = claims.as_object_mut().unwrap();
        map.insert("jtt".into(), json!("openid"));
        map.insert("at_hash".into(), json!("7sztJS__hNu0P_ZNOe-tMQ"));
        map.insert("c_hash".into(), json!("VJdGCxphGBH6qNyY2wCktQ"));
        map.insert("nonce".into(), json!(nonce));
        map.insert("email".into(), json!("jane@example.com"));
        claims
    }

    /// Body of a successful token response for `nonce`.
    pub fn token_response(&self, nonce: Option<&str>, refresh_token: &str) -> Value {
        let mut body = json!({
            "access_token": jwt(&self.access_claims()),
            "refresh_token": refresh_token,
            "refresh_expiration_date": NOW_MS + 7 * 86_400_000,
        });
        if let Some(nonce) = nonce {
            body["id_token"] = json!(jwt(&self.id_claims(nonce)));
            body["nonce"] = json!(nonce);
        }
        body
    }
}

pub fn config(base_url: &str) -> Config {
    Config::new(
        TENANT,
        CLIENT_ID,
        "http://localhost/",
        "http://localhost:8000/",
        base_url,
    )
    .with_default_locale(Locale::En)
}

/// Encodes a token with a dummy signature.
pub fn jwt(body: &Value) -> String {
    let header = json!({"alg": "RS256", "typ": "JWT", "kid": "3fc16816-0f99-484f-b3d1-87c22ae15b9c"});
    let encode = |v: &Value| URL_SAFE_NO_PAD.encode(serde_json::to_vec(v).unwrap());
    format!(
        "{}.{}.{}",
        encode(&header),
        encode(body),
        URL_SAFE_NO_PAD.encode(b"signature")
    )
}

/// State segment of `/t/{tenant}/{locale}/{state}/{sign}/new`.
pub fn state_of(url: &Url) -> String {
    url.path_segments().unwrap().nth(3).unwrap().to_string()
}

pub fn query_value(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
