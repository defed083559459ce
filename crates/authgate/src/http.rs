//! HTTP transport used to reach the authorization server.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

/// A decoded HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// JSON body (or the raw text as a JSON string).
    pub data: Value,
}

/// Transport failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Server answered outside of 2xx.
    #[error("HTTP {}: {}", .0.status, .0.data)]
    Status(HttpResponse),

    /// No response was received.
    #[error("network error: {0}")]
    Network(String),
}

impl TransportError {
    /// The response attached to a non-2xx failure.
    #[must_use]
    pub const fn response(&self) -> Option<&HttpResponse> {
        match self {
            Self::Status(response) => Some(response),
            Self::Network(_) => None,
        }
    }
}

/// Posts JSON bodies.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// POSTs `body` as JSON to `url`, sending `Authorization: Bearer
    /// {bearer}` when a token is given.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Status`] with the response attached on
    /// non-2xx, [`TransportError::Network`] when nothing came back.
    async fn post_authorized(
        &self,
        url: &Url,
        body: &Value,
        bearer: Option<&str>,
    ) -> Result<HttpResponse, TransportError>;

    /// POSTs `body` as JSON to `url` without credentials.
    ///
    /// # Errors
    ///
    /// See [`HttpTransport::post_authorized`].
    async fn post(&self, url: &Url, body: &Value) -> Result<HttpResponse, TransportError> {
        self.post_authorized(url, body, None).await
    }
}

/// [`HttpTransport`] over `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    http_client: Client,
}

impl ReqwestTransport {
    /// Creates a transport with a default `reqwest` client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport around an existing client (timeouts, proxies...).
    #[must_use]
    pub const fn with_client(http_client: Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post_authorized(
        &self,
        url: &Url,
        body: &Value,
        bearer: Option<&str>,
    ) -> Result<HttpResponse, TransportError> {
        debug!("POST {}", url.path());
        let mut request = self.http_client.post(url.clone()).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let data = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        let response = HttpResponse {
            status: status.as_u16(),
            data,
        };

        if status.is_success() {
            Ok(response)
        } else {
            Err(TransportError::Status(response))
        }
    }
}
