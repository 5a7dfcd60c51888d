//! In-memory counters and gauges shared by every request.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use axum::extract::FromRef;

use crate::AppState;

/// Logical route identifier: HTTP method plus path template.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Endpoint {
    pub method: String,
    pub path: String,
}

impl Endpoint {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.method, self.path)
    }
}

/// Point-in-time copy of the store.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Cumulative request count per endpoint, sorted by endpoint.
    pub requests: Vec<(Endpoint, u64)>,
    pub active_users: u64,
    pub auth_success: u64,
    pub auth_failure: u64,
}

#[derive(Debug, Default)]
struct Inner {
    requests: Mutex<BTreeMap<Endpoint, u64>>,
    active_users: AtomicU64,
    auth_success: AtomicU64,
    auth_failure: AtomicU64,
}

/// Handle over the process counters. Cloning shares the same counters.
#[derive(Debug, Default, Clone)]
pub struct Metrics {
    inner: Arc<Inner>,
}

impl Metrics {
    /// Create an empty [`Metrics`] store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request on `method` + `path`.
    pub fn record_request(&self, method: &str, path: &str) {
        let mut requests = self
            .inner
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        *requests.entry(Endpoint::new(method, path)).or_insert(0) += 1;
    }

    /// A session started.
    pub fn add_active_user(&self) {
        self.inner.active_users.fetch_add(1, Ordering::Relaxed);
    }

    /// A session ended. Never goes below zero.
    pub fn remove_active_user(&self) {
        let _ = self.inner.active_users.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |current| current.checked_sub(1),
        );
    }

    /// Count an authentication response.
    pub fn record_auth_outcome(&self, succeeded: bool) {
        let counter = if succeeded {
            &self.inner.auth_success
        } else {
            &self.inner.auth_failure
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy every counter. Nothing is reset.
    pub fn snapshot(&self) -> Snapshot {
        let requests = self
            .inner
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(endpoint, count)| (endpoint.clone(), *count))
            .collect();

        Snapshot {
            requests,
            active_users: self.inner.active_users.load(Ordering::Relaxed),
            auth_success: self.inner.auth_success.load(Ordering::Relaxed),
            auth_failure: self.inner.auth_failure.load(Ordering::Relaxed),
        }
    }
}

impl FromRef<AppState> for Metrics {
    fn from_ref(state: &AppState) -> Metrics {
        state.metrics.clone()
    }
}
