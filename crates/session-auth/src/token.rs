//! Token endpoint calls
//!
//! Four interactions with the auth server:
//! 1. Login: `{email, password}` → `{access, refresh}`
//! 2. Signup: `{username, email, password}` → 201
//! 3. Refresh: `{refresh}` → `{access}` (the refresh token is not rotated)
//! 4. Revoke: `{refresh_token}` → response ignored by callers
//!
//! None of these go through the refresh cycle. A 401 from the login or
//! refresh endpoint means bad credentials, not an expired session.

use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use transport::{ApiRequest, ApiResponse, Transport};

use crate::authenticator::stamp_bearer;
use crate::constants::{LOGOUT_PATH, REFRESH_PATH, SIGNUP_PATH, TOKEN_PATH};
use crate::credentials::{CredentialPair, UserIdentity};
use crate::error::{Error, Result};

/// Response from the login endpoint.
#[derive(Debug, Deserialize, Serialize)]
pub struct LoginResponse {
    pub access: String,
    pub refresh: String,
}

impl LoginResponse {
    pub fn into_pair(self) -> CredentialPair {
        CredentialPair::new(self.access, self.refresh)
    }
}

/// Response from the refresh endpoint.
#[derive(Debug, Deserialize, Serialize)]
pub struct RefreshResponse {
    pub access: String,
}

/// Error body shapes the server uses: `{"detail": ...}` from the token
/// views, `{"error": ...}` from signup and logout.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    detail: Option<String>,
    error: Option<String>,
}

fn server_message(response: &ApiResponse) -> String {
    let parsed: ErrorBody = response.parse_json().unwrap_or_default();
    parsed
        .detail
        .or(parsed.error)
        .unwrap_or_else(|| {
            let text = response.text();
            if text.is_empty() {
                String::from("<no body>")
            } else {
                text
            }
        })
}

/// Exchange email + password for a credential pair.
#[instrument(skip_all, fields(email = %email))]
pub async fn login(transport: &dyn Transport, email: &str, password: &str) -> Result<CredentialPair> {
    let request = ApiRequest::post(
        TOKEN_PATH,
        serde_json::json!({ "email": email, "password": password }),
    );
    let response = transport.send(&request).await?;

    let status = response.status.as_u16();
    if !response.is_success() {
        let message = server_message(&response);
        return Err(match status {
            400 | 401 => Error::InvalidCredentials(message),
            _ => Error::TokenExchange(format!("token endpoint returned {status}: {message}")),
        });
    }

    let tokens: LoginResponse = response
        .parse_json()
        .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))?;
    debug!("login succeeded");
    Ok(tokens.into_pair())
}

/// Create an account. Success is HTTP 201; the caller logs in afterwards.
///
/// Returns the identity echoed by the server when present, otherwise one
/// built from the submitted fields.
#[instrument(skip_all, fields(email = %email))]
pub async fn signup(
    transport: &dyn Transport,
    username: &str,
    email: &str,
    password: &str,
) -> Result<UserIdentity> {
    let request = ApiRequest::post(
        SIGNUP_PATH,
        serde_json::json!({ "username": username, "email": email, "password": password }),
    );
    let response = transport.send(&request).await?;

    if response.status.as_u16() != 201 {
        return Err(Error::Signup(server_message(&response)));
    }

    #[derive(Deserialize)]
    struct SignupBody {
        user: Option<UserIdentity>,
    }
    let identity = response
        .parse_json::<SignupBody>()
        .ok()
        .and_then(|body| body.user)
        .unwrap_or_else(|| UserIdentity {
            email: email.to_string(),
            username: Some(username.to_string()),
        });
    debug!("signup succeeded");
    Ok(identity)
}

/// Exchange a refresh token for a new access token.
///
/// 400/401 mean the refresh token is expired, blacklisted or malformed and
/// map to `RefreshRejected`. Other statuses map to `TokenExchange`.
pub async fn refresh_access(
    transport: &dyn Transport,
    refresh_token: &Secret<String>,
) -> Result<Secret<String>> {
    if refresh_token.is_empty() {
        return Err(Error::MissingRefreshToken);
    }

    let request = ApiRequest::post(
        REFRESH_PATH,
        serde_json::json!({ "refresh": refresh_token.expose() }),
    );
    let response = transport.send(&request).await?;

    let status = response.status.as_u16();
    if !response.is_success() {
        let message = server_message(&response);
        return Err(match status {
            400 | 401 => Error::RefreshRejected(format!("({status}) {message}")),
            _ => Error::TokenExchange(format!("token refresh returned {status}: {message}")),
        });
    }

    let refreshed: RefreshResponse = response
        .parse_json()
        .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))?;
    if refreshed.access.is_empty() {
        return Err(Error::TokenExchange("refresh response has an empty access token".into()));
    }
    Ok(Secret::new(refreshed.access))
}

/// Ask the server to blacklist the refresh token.
///
/// The logout view requires an authenticated caller, so the (possibly stale)
/// access token is attached as well. Callers treat any error as ignorable.
pub async fn revoke(transport: &dyn Transport, pair: &CredentialPair) -> Result<()> {
    let mut request = ApiRequest::post(
        LOGOUT_PATH,
        serde_json::json!({ "refresh_token": pair.refresh_token.expose() }),
    );
    stamp_bearer(&mut request, &pair.access_token);

    let response = transport.send(&request).await?;
    if !response.is_success() {
        return Err(Error::TokenExchange(format!(
            "logout returned {}: {}",
            response.status.as_u16(),
            server_message(&response)
        )));
    }
    Ok(())
}
