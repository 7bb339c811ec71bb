//! One-way "ready for the first hover" signal with bounded waiters.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

#[derive(Default)]
struct ReadinessState {
    ready: bool,
    disposed: bool,
    next_token: u64,
    waiters: Vec<(u64, oneshot::Sender<bool>)>,
}

#[derive(Default)]
pub struct HoverReadiness {
    state: Mutex<ReadinessState>,
}

/// Drops the waiter entry if the wait ends without a release.
struct WaiterGuard<'a> {
    readiness: &'a HoverReadiness,
    token: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.readiness
            .lock()
            .waiters
            .retain(|(token, _)| *token != self.token);
    }
}

impl HoverReadiness {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ReadinessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_ready(&self) -> bool {
        self.lock().ready
    }

    /// `true` once ready, `false` on timeout or disposal. A zero timeout never
    /// waits.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let (token, rx) = {
            let mut state = self.lock();
            if state.ready {
                return true;
            }
            if state.disposed || timeout.is_zero() {
                return false;
            }
            let token = state.next_token;
            state.next_token += 1;
            let (tx, rx) = oneshot::channel();
            state.waiters.push((token, tx));
            (token, rx)
        };
        let _guard = WaiterGuard {
            readiness: self,
            token,
        };

        matches!(tokio::time::timeout(timeout, rx).await, Ok(Ok(true)))
    }

    /// Transition to ready and release every waiter with `true`. Later calls
    /// do nothing.
    pub fn mark_ready(&self) {
        let waiters = {
            let mut state = self.lock();
            if state.ready || state.disposed {
                return;
            }
            state.ready = true;
            std::mem::take(&mut state.waiters)
        };
        tracing::debug!(waiters = waiters.len(), "hover ready");
        for (_, tx) in waiters {
            let _ = tx.send(true);
        }
    }

    /// Release every waiter with `false`; later waits return `false` unless
    /// already ready.
    pub fn dispose(&self) {
        let waiters = {
            let mut state = self.lock();
            state.disposed = true;
            std::mem::take(&mut state.waiters)
        };
        for (_, tx) in waiters {
            let _ = tx.send(false);
        }
    }

    #[cfg(test)]
    fn waiter_count(&self) -> usize {
        self.lock().waiters.len()
    }
}
