//! Request and response descriptors
//!
//! `ApiRequest` captures everything needed to send a request again later:
//! method, path, headers and JSON body. The refresh cycle relies on this to
//! replay a request after the access token has been renewed.

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// An outbound request, independent of any HTTP client.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// Correlation id for logs (`req_<uuid>`)
    pub id: String,
    pub method: Method,
    /// Path relative to the transport's base URL, or an absolute URL
    pub path: String,
    pub headers: HeaderMap,
    /// JSON body; serialized with `Content-Type: application/json`
    pub body: Option<serde_json::Value>,
    /// Set once the request has been replayed after a refresh. A retried
    /// request that fails with 401 again is surfaced, never replayed twice.
    pub retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            id: format!("req_{}", uuid::Uuid::new_v4().as_simple()),
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::PUT, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Add a header, replacing any existing value for the same name.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Whether the request carries an `Authorization` header.
    pub fn has_authorization(&self) -> bool {
        self.headers.contains_key(reqwest::header::AUTHORIZATION)
    }

    /// Path with any query string removed, for endpoint matching.
    pub fn endpoint(&self) -> &str {
        self.path.split('?').next().unwrap_or(&self.path)
    }
}

/// A fully-read HTTP response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Build a JSON response (used by fakes and mock servers).
    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        let mut response = Self::new(status, value.to_string());
        response.headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Body as UTF-8 text, lossily decoded.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserialize the body as JSON.
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| Error::InvalidBody(e.to_string()))
    }

    /// Turn a non-2xx response into the matching `Error`.
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::from_status(self.status.as_u16(), &self.text()))
        }
    }
}
