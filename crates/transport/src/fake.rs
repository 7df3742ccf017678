//! Scripted in-memory transport for tests
//!
//! Routes are matched on method + endpoint (path without query). Every call is
//! recorded before its handler runs, so tests can assert on exactly what went
//! over the "wire", including the Authorization header of each attempt.
//!
//! A route can be gated: calls to it park until the test releases the gate,
//! which lets a test hold a refresh exchange open while other requests pile up.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use reqwest::{Method, StatusCode};
use tokio::sync::Semaphore;

use crate::error::{Error, Result};
use crate::request::{ApiRequest, ApiResponse};
use crate::Transport;

type Handler = Arc<dyn Fn(&ApiRequest) -> Result<ApiResponse> + Send + Sync>;

/// One request as seen by the fake.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub request_id: String,
    pub method: Method,
    pub path: String,
    pub authorization: Option<String>,
    pub body: Option<serde_json::Value>,
    pub retried: bool,
}

#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<HashMap<(Method, String), Handler>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a handler for `method` + `path`. Replaces an existing route.
    pub fn route<F>(&self, method: Method, path: &str, handler: F)
    where
        F: Fn(&ApiRequest) -> Result<ApiResponse> + Send + Sync + 'static,
    {
        lock(&self.routes).insert((method, path.to_string()), Arc::new(handler));
    }

    /// Register a route that always answers `status` with a JSON body.
    pub fn respond(&self, method: Method, path: &str, status: StatusCode, body: serde_json::Value) {
        self.route(method, path, move |_| Ok(ApiResponse::json(status, &body)));
    }

    /// Park every call to `path` until `release` is called for it.
    pub fn gate(&self, path: &str) {
        lock(&self.gates).insert(path.to_string(), Arc::new(Semaphore::new(0)));
    }

    /// Let `permits` parked (or future) calls to `path` through.
    pub fn release(&self, path: &str, permits: usize) {
        if let Some(gate) = lock(&self.gates).get(path) {
            gate.add_permits(permits);
        }
    }

    /// Snapshot of all calls in arrival order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Calls whose endpoint equals `path`, in arrival order.
    pub fn calls_to(&self, path: &str) -> Vec<RecordedCall> {
        lock(&self.calls)
            .iter()
            .filter(|c| c.path.split('?').next() == Some(path))
            .cloned()
            .collect()
    }

    pub fn call_count(&self, path: &str) -> usize {
        self.calls_to(path).len()
    }

    async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse> {
        lock(&self.calls).push(RecordedCall {
            request_id: request.id.clone(),
            method: request.method.clone(),
            path: request.path.clone(),
            authorization: request
                .headers
                .get(reqwest::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body: request.body.clone(),
            retried: request.retried,
        });

        let gate = lock(&self.gates).get(request.endpoint()).cloned();
        if let Some(gate) = gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| Error::Http(format!("gate closed: {e}")))?;
            permit.forget();
        }

        let handler = lock(&self.routes)
            .get(&(request.method.clone(), request.endpoint().to_string()))
            .cloned();
        match handler {
            Some(handler) => handler(request),
            None => Ok(ApiResponse::json(
                StatusCode::NOT_FOUND,
                &serde_json::json!({"detail": "Not found."}),
            )),
        }
    }
}

impl Transport for FakeTransport {
    fn id(&self) -> &str {
        "fake"
    }

    fn send<'a>(
        &'a self,
        request: &'a ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + 'a>> {
        Box::pin(self.dispatch(request))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
