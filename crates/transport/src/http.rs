//! reqwest-backed transport
//!
//! Resolves request paths against a base URL, applies a per-request timeout,
//! and reads the full response body before returning.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::request::{ApiRequest, ApiResponse};
use crate::Transport;

/// Production transport over a shared `reqwest::Client`.
///
/// Clone is cheap; `reqwest::Client` pools connections behind an `Arc`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Create a transport with a fresh connection pool.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Http(format!("building HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url, timeout))
    }

    /// Create a transport sharing an existing client.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve a request path against the base URL. Absolute URLs pass through.
    pub fn resolve(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

impl Transport for ReqwestTransport {
    fn id(&self) -> &str {
        "reqwest"
    }

    fn send<'a>(
        &'a self,
        request: &'a ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + 'a>> {
        Box::pin(self.dispatch(request))
    }
}

impl ReqwestTransport {
    #[instrument(skip_all, fields(request_id = %request.id, method = %request.method, path = %request.path))]
    async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let url = self.resolve(&request.path);

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(request.headers.clone())
            .timeout(self.timeout);
        if let Some(body) = &request.body {
            // Sets Content-Type: application/json
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| self.map_error(e))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| self.map_error(e))?;

        debug!(status = status.as_u16(), bytes = body.len(), "response received");
        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }

    fn map_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(self.timeout.as_secs())
        } else {
            Error::Http(e.to_string())
        }
    }
}
