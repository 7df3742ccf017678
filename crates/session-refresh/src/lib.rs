//! Session recovery for authenticated API traffic
//!
//! `SessionClient` is the entry point. It stamps requests with the stored
//! access token and, when the server answers 401, hands the request to the
//! `RefreshCoordinator`, which runs at most one refresh exchange at a time
//! and replays everything that queued behind it. When no refresh is possible
//! the `SessionTerminator` clears the store and publishes
//! `SessionStatus::Unauthenticated`.
//!
//! Metrics (via the `metrics` facade, no exporter installed here):
//! - `session_refresh_total{outcome}`: success, failure, skipped (no refresh
//!   token) or superseded (a new login replaced the session mid-refresh)
//! - `session_replays_total`: requests resubmitted after a refresh
//! - `session_terminations_total{reason}`: logout or refresh_failed

pub mod client;
pub mod coordinator;
pub mod state;
pub mod terminator;

pub use client::SessionClient;
pub use coordinator::RefreshCoordinator;
pub use state::{Admission, PendingRequest, RefreshState};
pub use terminator::{SessionStatus, SessionTerminator, TerminationReason};
