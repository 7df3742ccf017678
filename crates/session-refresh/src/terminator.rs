//! Session termination
//!
//! Clears the credential store, fires a best-effort revoke of the refresh
//! token, and publishes `SessionStatus::Unauthenticated` so the application
//! can route the user back to login.

use std::sync::Arc;

use session_auth::CredentialStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use transport::Transport;

/// Whether the application currently holds a usable session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Authenticated,
    Unauthenticated,
}

impl SessionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SessionStatus::Authenticated => "authenticated",
            SessionStatus::Unauthenticated => "unauthenticated",
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// User asked to log out
    Logout,
    /// Refresh token missing, expired or rejected
    RefreshFailed,
}

impl TerminationReason {
    pub fn label(&self) -> &'static str {
        match self {
            TerminationReason::Logout => "logout",
            TerminationReason::RefreshFailed => "refresh_failed",
        }
    }
}

pub struct SessionTerminator {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    status: watch::Sender<SessionStatus>,
}

impl SessionTerminator {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        status: watch::Sender<SessionStatus>,
    ) -> Self {
        Self {
            transport,
            store,
            status,
        }
    }

    /// End the session.
    ///
    /// The revoke call runs on its own task and its outcome is only logged.
    /// Returns that task's handle (if a refresh token was stored) so a
    /// short-lived process can give it a moment to go out before exiting.
    pub async fn terminate(&self, reason: TerminationReason) -> Option<JoinHandle<()>> {
        let pair = self.store.get().await;

        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "failed to persist cleared credentials");
        }

        self.status.send_replace(SessionStatus::Unauthenticated);
        metrics::counter!("session_terminations_total", "reason" => reason.label()).increment(1);
        info!(reason = reason.label(), "session terminated");

        let pair = pair?;
        let transport = Arc::clone(&self.transport);
        Some(tokio::spawn(async move {
            match session_auth::revoke(transport.as_ref(), &pair).await {
                Ok(()) => debug!("refresh token revoked"),
                Err(e) => warn!(error = %e, "refresh token revoke failed, ignoring"),
            }
        }))
    }

    /// Publish that a session now exists (after login).
    pub fn mark_authenticated(&self) {
        self.status.send_replace(SessionStatus::Authenticated);
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }
}
