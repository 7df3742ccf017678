//! Error types for HTTP requests

/// Maximum length for error response bodies kept in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Errors a caller can observe from a request.
///
/// `Unauthorized` is the only variant the refresh cycle reacts to; everything
/// else is propagated to the caller unchanged.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("unauthorized (401): {body}")]
    Unauthorized { body: String },

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response body: {0}")]
    InvalidBody(String),
}

impl Error {
    /// Build the error for a non-success status, truncating large bodies.
    pub fn from_status(status: u16, body: &str) -> Self {
        let body = truncate_body(body);
        match status {
            401 => Error::Unauthorized { body },
            _ => Error::Status { status, body },
        }
    }

    /// Whether this error is an authorization failure (HTTP 401).
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Unauthorized { .. })
    }

    /// HTTP status carried by the error, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Unauthorized { .. } => Some(401),
            Error::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Response body carried by the error, if any.
    pub fn body(&self) -> Option<&str> {
        match self {
            Error::Unauthorized { body } | Error::Status { body, .. } => Some(body),
            _ => None,
        }
    }
}

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}... (truncated, {} total bytes)",
        &body[..end],
        body.len()
    )
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, Error>;
