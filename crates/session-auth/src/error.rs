//! Error types for credential and token operations

/// Errors from login, signup, refresh and credential persistence.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(#[from] transport::Error),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("signup failed: {0}")]
    Signup(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("refresh token rejected: {0}")]
    RefreshRejected(String),

    #[error("no refresh token stored")]
    MissingRefreshToken,

    #[error("no session stored")]
    NoSession,

    #[error("session replaced by a newer login")]
    SessionChanged,

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
