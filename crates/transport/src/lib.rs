//! HTTP transport abstraction for the session layer
//!
//! Defines the `Transport` trait that decouples the session logic from the
//! concrete HTTP client. `ReqwestTransport` is the production implementation;
//! the `fake` module (behind the `test-util` feature) provides a scripted
//! in-memory transport so the refresh coordinator can be exercised without a
//! network.
//!
//! A transport only moves bytes: any HTTP status comes back as `Ok(ApiResponse)`.
//! Callers turn non-2xx statuses into errors with `ApiResponse::error_for_status`,
//! which is where a 401 becomes `Error::Unauthorized`.

pub mod error;
pub mod http;
pub mod request;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub use error::{Error, Result};
pub use http::ReqwestTransport;
pub use request::{ApiRequest, ApiResponse};

pub use reqwest::header::{self, HeaderMap, HeaderValue};
pub use reqwest::{Method, StatusCode};

use std::future::Future;
use std::pin::Pin;

/// Abstraction over an HTTP client.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Transport>`).
pub trait Transport: Send + Sync {
    /// Identifier for logging (e.g. "reqwest", "fake")
    fn id(&self) -> &str;

    /// Dispatch a request and return the raw response.
    ///
    /// Returns `Err` only for transport-level failures (connect, timeout, body
    /// read). HTTP error statuses are returned as `Ok`.
    fn send<'a>(
        &'a self,
        request: &'a ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + 'a>>;
}
