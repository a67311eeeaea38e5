//! HTTP transport
//!
//! The request client talks to the control API through [`Transport`] so that
//! the signing and classification logic is independent of the wire.

use async_trait::async_trait;
use fsqsb_common::{Error, Result};
use serde_json::Value;
use tracing::debug;

/// Raw response: status code plus undecoded body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            body: body.to_string().into_bytes(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends a JSON body to an endpoint path.
///
/// Implementations return `Err(Error::Transport)` only when no HTTP response
/// was obtained; any status code is a successful transport.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, method: reqwest::Method, path: &str, body: &Value) -> Result<RawResponse>;
}

/// reqwest-backed transport. Timeouts are left to reqwest's defaults.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("fsqsb/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, method: reqwest::Method, path: &str, body: &Value) -> Result<RawResponse> {
        let url = self.url(path);
        debug!("{} {}", method, url);

        let response = self
            .http
            .request(method, &url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(RawResponse {
            status,
            body: body.to_vec(),
        })
    }
}
