//! Single-flight refresh coordinator
//!
//! Every request that fails with 401 is handed to `RefreshCoordinator::recover`.
//! The first one admitted while idle starts a refresh cycle on its own task;
//! the rest park behind it. When the exchange resolves the cycle drains the
//! queue in enqueue order and either replays each request once with the new
//! access token or fails it with the error it originally got.
//!
//! Replayed requests are marked `retried`. A retried request that fails with
//! 401 again is surfaced to its caller and never re-enters the cycle, which
//! is what keeps a dead refresh token from looping.

use std::sync::Arc;

use common::Secret;
use session_auth::{CredentialStore, is_refresh_endpoint, stamp_bearer};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, instrument, warn};
use transport::{ApiRequest, ApiResponse, Transport};

use crate::state::{Admission, PendingRequest, RefreshState};
use crate::terminator::{SessionTerminator, TerminationReason};

pub struct RefreshCoordinator {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    terminator: Arc<SessionTerminator>,
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        terminator: Arc<SessionTerminator>,
    ) -> Self {
        Self {
            transport,
            store,
            terminator,
            state: Mutex::new(RefreshState::new()),
        }
    }

    /// Resolve a request that just failed with `error` (a 401).
    ///
    /// Returns the replay outcome on a successful refresh, or `error` itself
    /// if the request is not eligible for replay or the refresh failed.
    #[instrument(skip_all, fields(request_id = %request.id, path = %request.path))]
    pub async fn recover(
        self: &Arc<Self>,
        request: ApiRequest,
        error: transport::Error,
    ) -> transport::Result<ApiResponse> {
        if request.retried {
            debug!("401 on a replayed request, surfacing to caller");
            return Err(error);
        }
        if is_refresh_endpoint(&request.path) {
            debug!("401 on the refresh exchange itself, surfacing to caller");
            return Err(error);
        }

        let (reply, outcome) = oneshot::channel();
        let admission = self
            .state
            .lock()
            .await
            .admit(PendingRequest::new(request, error, reply));

        match admission {
            Admission::StartRefresh => {
                debug!("access token rejected, starting refresh cycle");
                // Runs detached so the cycle completes even if this caller is dropped
                let coordinator = Arc::clone(self);
                tokio::spawn(async move { coordinator.run_cycle().await });
            }
            Admission::Queued { position } => {
                debug!(position, "refresh already in flight, request queued");
            }
        }

        outcome.await.unwrap_or_else(|_| {
            Err(transport::Error::Http(
                "refresh cycle ended without resolving the request".into(),
            ))
        })
    }

    /// Whether a refresh exchange is outstanding.
    pub async fn is_refreshing(&self) -> bool {
        self.state.lock().await.is_refreshing()
    }

    /// Number of requests parked behind the outstanding exchange.
    pub async fn waiting(&self) -> usize {
        self.state.lock().await.waiting()
    }

    async fn run_cycle(&self) {
        match self.exchange().await {
            Ok(access) => {
                let waiters = self.state.lock().await.drain();
                metrics::counter!("session_refresh_total", "outcome" => "success").increment(1);
                info!(waiters = waiters.len(), "access token refreshed, replaying requests");

                for pending in waiters {
                    self.replay(pending, &access).await;
                }
            }
            Err(session_auth::Error::SessionChanged) => {
                metrics::counter!("session_refresh_total", "outcome" => "superseded").increment(1);
                let waiters = self.state.lock().await.drain();
                // The newer login owns the store now; its session stays up and
                // requests sent under the old one fail with their own error.
                info!(waiters = waiters.len(), "session replaced during refresh, dropping result");
                for pending in waiters {
                    pending.reject();
                }
            }
            Err(e) => {
                let outcome = match e {
                    session_auth::Error::MissingRefreshToken => "skipped",
                    _ => "failure",
                };
                metrics::counter!("session_refresh_total", "outcome" => outcome).increment(1);

                let waiters = self.state.lock().await.drain();
                warn!(error = %e, waiters = waiters.len(), "refresh failed, ending session");

                // Terminate before rejecting so rejected callers already see
                // the cleared store and the Unauthenticated status.
                self.terminator
                    .terminate(TerminationReason::RefreshFailed)
                    .await;
                for pending in waiters {
                    pending.reject();
                }
            }
        }
    }

    /// Obtain and store a new access token.
    async fn exchange(&self) -> session_auth::Result<Secret<String>> {
        let pair = self
            .store
            .get()
            .await
            .ok_or(session_auth::Error::MissingRefreshToken)?;

        let access = session_auth::refresh_access(self.transport.as_ref(), &pair.refresh_token).await?;

        match self
            .store
            .set_access(&pair.refresh_token, access.clone())
            .await
        {
            Ok(()) => {}
            // Logged out, or logged in again, while the exchange was outstanding
            Err(e @ (session_auth::Error::NoSession | session_auth::Error::SessionChanged)) => {
                return Err(e);
            }
            Err(e) => warn!(error = %e, "failed to persist refreshed access token"),
        }
        Ok(access)
    }

    async fn replay(&self, pending: PendingRequest, access: &Secret<String>) {
        let mut request = pending.request().clone();
        request.retried = true;
        stamp_bearer(&mut request, access);

        debug!(request_id = %request.id, path = %request.path, "replaying with refreshed token");
        metrics::counter!("session_replays_total").increment(1);

        let outcome = self
            .transport
            .send(&request)
            .await
            .and_then(ApiResponse::error_for_status);
        pending.resolve(outcome);
    }
}
