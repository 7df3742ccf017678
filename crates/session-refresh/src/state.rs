//! Refresh state and queued requests
//!
//! `RefreshState` is the single-flight guard: `in_flight` is true from the
//! moment the first 401 is admitted until the exchange resolves, and every
//! request that hits a 401 in that window joins `waiters` instead of
//! starting another exchange.
//!
//! Transitions:
//! - Idle → Refreshing (first 401 admitted, caller becomes the cycle starter)
//! - Refreshing → Refreshing (further 401s queue behind it)
//! - Refreshing → Idle (`drain`, after the exchange succeeded or failed)

use std::collections::VecDeque;

use tokio::sync::oneshot;
use transport::{ApiRequest, ApiResponse};

/// A request parked until the refresh exchange resolves.
///
/// Holds the original request for replay, the error that put it here (what
/// the caller sees if the refresh fails), and the channel its caller is
/// awaiting.
pub struct PendingRequest {
    request: ApiRequest,
    original_error: transport::Error,
    reply: oneshot::Sender<transport::Result<ApiResponse>>,
}

impl PendingRequest {
    pub fn new(
        request: ApiRequest,
        original_error: transport::Error,
        reply: oneshot::Sender<transport::Result<ApiResponse>>,
    ) -> Self {
        Self {
            request,
            original_error,
            reply,
        }
    }

    pub fn request(&self) -> &ApiRequest {
        &self.request
    }

    /// Deliver the replay outcome to the waiting caller.
    pub fn resolve(self, outcome: transport::Result<ApiResponse>) {
        // A dropped receiver means the caller gave up; nothing to deliver to.
        let _ = self.reply.send(outcome);
    }

    /// Fail the waiting caller with the error its own request produced.
    pub fn reject(self) {
        let _ = self.reply.send(Err(self.original_error));
    }
}

/// What `admit` decided for a request that just saw a 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// No exchange was outstanding; the caller must start one.
    StartRefresh,
    /// An exchange is already outstanding; the request is queued behind it.
    Queued { position: usize },
}

/// Single-flight refresh state. Mutated only by the coordinator.
#[derive(Default)]
pub struct RefreshState {
    in_flight: bool,
    waiters: VecDeque<PendingRequest>,
}

impl RefreshState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `pending` and report whether the caller must start the exchange.
    ///
    /// Check-and-set of `in_flight` and the enqueue happen in one call, so
    /// as long as the caller holds the state lock across it no two callers
    /// can both see `StartRefresh`.
    pub fn admit(&mut self, pending: PendingRequest) -> Admission {
        self.waiters.push_back(pending);
        if self.in_flight {
            Admission::Queued {
                position: self.waiters.len() - 1,
            }
        } else {
            self.in_flight = true;
            Admission::StartRefresh
        }
    }

    /// Take every waiter in enqueue order and return to idle.
    pub fn drain(&mut self) -> VecDeque<PendingRequest> {
        self.in_flight = false;
        std::mem::take(&mut self.waiters)
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight
    }

    pub fn waiting(&self) -> usize {
        self.waiters.len()
    }
}
