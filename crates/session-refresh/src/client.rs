//! Authenticated API client
//!
//! Composes the session layer around a transport: every request is stamped
//! with the stored access token, a 401 goes through the refresh coordinator,
//! and login/signup/logout manage the credential pair and session status.

use std::sync::Arc;

use session_auth::{CredentialStore, RequestAuthenticator, UserIdentity};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use transport::{ApiRequest, ApiResponse, Transport};

use crate::coordinator::RefreshCoordinator;
use crate::terminator::{SessionStatus, SessionTerminator, TerminationReason};

#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    authenticator: RequestAuthenticator,
    coordinator: Arc<RefreshCoordinator>,
    terminator: Arc<SessionTerminator>,
}

impl SessionClient {
    /// Build a client over `transport`. The initial status reflects whether
    /// `store` already holds a credential pair.
    pub async fn new(transport: Arc<dyn Transport>, store: Arc<dyn CredentialStore>) -> Self {
        let initial = match store.get().await {
            Some(_) => SessionStatus::Authenticated,
            None => SessionStatus::Unauthenticated,
        };
        debug!(transport = transport.id(), status = initial.label(), "session client ready");
        let (status, _) = watch::channel(initial);

        let terminator = Arc::new(SessionTerminator::new(
            Arc::clone(&transport),
            Arc::clone(&store),
            status,
        ));
        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::clone(&transport),
            Arc::clone(&store),
            Arc::clone(&terminator),
        ));

        Self {
            inner: Arc::new(Inner {
                authenticator: RequestAuthenticator::new(Arc::clone(&store)),
                transport,
                store,
                coordinator,
                terminator,
            }),
        }
    }

    /// Send an API request.
    ///
    /// Non-2xx responses come back as errors. A 401 is recovered through the
    /// refresh cycle; the caller sees either the replay outcome or the 401.
    #[instrument(skip_all, fields(request_id = %request.id, method = %request.method, path = %request.path))]
    pub async fn send(&self, mut request: ApiRequest) -> transport::Result<ApiResponse> {
        self.inner.authenticator.authenticate(&mut request).await;

        let result = self
            .inner
            .transport
            .send(&request)
            .await
            .and_then(ApiResponse::error_for_status);

        match result {
            Err(e) if e.is_unauthorized() => self.inner.coordinator.recover(request, e).await,
            other => other,
        }
    }

    /// Log in with email + password and store the resulting pair.
    pub async fn login(&self, email: &str, password: &str) -> session_auth::Result<()> {
        let identity = UserIdentity {
            email: email.to_string(),
            username: None,
        };
        self.establish(email, password, identity).await
    }

    /// Create an account, then log into it.
    pub async fn signup(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> session_auth::Result<()> {
        let identity =
            session_auth::signup(self.inner.transport.as_ref(), username, email, password).await?;
        info!(email = %identity.email, "account created");
        self.establish(email, password, identity).await
    }

    async fn establish(
        &self,
        email: &str,
        password: &str,
        identity: UserIdentity,
    ) -> session_auth::Result<()> {
        let pair = session_auth::login(self.inner.transport.as_ref(), email, password).await?;
        // The store keeps the update in memory even when the disk write fails
        if let Err(e) = self.inner.store.set(pair).await {
            warn!(error = %e, "failed to persist credentials after login");
        }
        if let Err(e) = self.inner.store.set_user(identity).await {
            warn!(error = %e, "failed to persist user identity after login");
        }
        self.inner.terminator.mark_authenticated();
        info!(email = %email, "logged in");
        Ok(())
    }

    /// End the session. Returns the handle of the background revoke, if one
    /// was sent.
    pub async fn logout(&self) -> Option<JoinHandle<()>> {
        self.inner.terminator.terminate(TerminationReason::Logout).await
    }

    pub async fn is_authenticated(&self) -> bool {
        self.inner.store.get().await.is_some()
    }

    pub async fn user(&self) -> Option<UserIdentity> {
        self.inner.store.user().await
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.terminator.status()
    }

    /// Watch for session status changes (e.g. to route back to login).
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.inner.terminator.subscribe()
    }

    pub async fn is_refreshing(&self) -> bool {
        self.inner.coordinator.is_refreshing().await
    }

    /// Requests parked behind an outstanding refresh.
    pub async fn waiting(&self) -> usize {
        self.inner.coordinator.waiting().await
    }
}
