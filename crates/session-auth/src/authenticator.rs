//! Bearer token injection for outbound requests
//!
//! Applied to every request immediately before dispatch, except the token
//! endpoints themselves (login, signup and the refresh exchange carry their
//! credentials in the JSON body).

use std::sync::Arc;

use common::Secret;
use tracing::warn;
use transport::ApiRequest;
use transport::header::{AUTHORIZATION, HeaderValue};

use crate::credentials::CredentialStore;

/// Set `Authorization: Bearer <access_token>` on `request`, replacing any
/// existing value.
///
/// The header value is marked sensitive so it never shows up in `Debug`
/// output of the request. A token that is not a valid header value leaves
/// the request unmodified.
pub fn stamp_bearer(request: &mut ApiRequest, access_token: &Secret<String>) {
    match HeaderValue::from_str(&format!("Bearer {}", access_token.expose())) {
        Ok(mut value) => {
            value.set_sensitive(true);
            request.headers.insert(AUTHORIZATION, value);
        }
        Err(_) => {
            warn!(
                request_id = %request.id,
                "stored access token is not a valid header value, sending unauthenticated"
            );
        }
    }
}

/// Stamps requests with the currently stored access token.
#[derive(Clone)]
pub struct RequestAuthenticator {
    store: Arc<dyn CredentialStore>,
}

impl RequestAuthenticator {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Attach the stored access token, or leave the request untouched when
    /// no session exists. Never fails.
    pub async fn authenticate(&self, request: &mut ApiRequest) {
        if let Some(pair) = self.store.get().await {
            stamp_bearer(request, &pair.access_token);
        }
    }
}
