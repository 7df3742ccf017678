//! API endpoint paths
//!
//! Paths are relative to the configured base URL. The trailing slashes are
//! part of the server's routes and must be kept.

/// Default API base URL for local development
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Email + password exchange for an access/refresh pair
pub const TOKEN_PATH: &str = "/token/";

/// Refresh token exchange for a new access token
pub const REFRESH_PATH: &str = "/token/refresh/";

/// Account creation
pub const SIGNUP_PATH: &str = "/signup/";

/// Refresh token revocation (blacklist)
pub const LOGOUT_PATH: &str = "/logout/";

/// Whether a request path targets the refresh exchange.
///
/// A 401 on the refresh exchange itself must never start another refresh.
pub fn is_refresh_endpoint(path: &str) -> bool {
    let endpoint = path.split('?').next().unwrap_or(path);
    endpoint == REFRESH_PATH || endpoint.ends_with(REFRESH_PATH)
}
