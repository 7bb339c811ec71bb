//! Request correlation: ids, the pending table and exactly-once resolution.
//!
//! Every registered entry leaves the table through exactly one path: a
//! matching response, its timeout, a failed send, [`Correlator::fail_all`],
//! or the caller dropping the request future. Each path resolves the caller
//! with `None` except a successful response.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

type Resolver = oneshot::Sender<Option<Value>>;

pub(crate) struct Correlator {
    name: String,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, Resolver>>,
}

/// Removes its entry if the request future is dropped before resolution.
struct PendingGuard<'a> {
    correlator: &'a Correlator,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.correlator.lock().remove(&self.id);
    }
}

impl Correlator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Resolver>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate an id without registering it (fire-and-forget messages).
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Issue one request and wait for its correlated response.
    ///
    /// `send` receives the allocated id and returns `false` when the channel
    /// is not connected, which resolves `None` without waiting.
    pub async fn call<F>(&self, timeout: Duration, send: F) -> Option<Value>
    where
        F: FnOnce(u64) -> bool,
    {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id, tx);
        let _guard = PendingGuard {
            correlator: self,
            id,
        };

        if !send(id) {
            tracing::debug!(backend = %self.name, id, "channel unavailable, request dropped");
            return None;
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(body)) => body,
            Ok(Err(_)) => None,
            Err(_) => {
                tracing::debug!(
                    backend = %self.name,
                    id,
                    timeout_ms = timeout.as_millis() as u64,
                    "request timed out"
                );
                None
            }
        }
    }

    /// Deliver a response. Returns `false` when no entry is waiting, which
    /// happens for late responses after a timeout and for untracked ids.
    pub fn resolve(&self, id: u64, body: Option<Value>) -> bool {
        let Some(tx) = self.lock().remove(&id) else {
            tracing::trace!(backend = %self.name, id, "dropping uncorrelated response");
            return false;
        };
        let _ = tx.send(body);
        true
    }

    /// Resolve every waiting request with `None`. Returns how many there were.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<Resolver> = self.lock().drain().map(|(_, tx)| tx).collect();
        let count = drained.len();
        for tx in drained {
            let _ = tx.send(None);
        }
        if count > 0 {
            tracing::debug!(backend = %self.name, count, "failed pending requests");
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }
}
