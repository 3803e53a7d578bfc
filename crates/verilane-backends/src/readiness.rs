//! Readiness flag and start-attempt bookkeeping shared by all strategies

use crate::error::BackendError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Tracks whether a backend is ready and which start attempt is current.
///
/// Every start bumps the attempt counter. Callbacks that captured an older
/// attempt number (for example a start timeout armed before a restart) see
/// that they are stale and do nothing.
#[derive(Debug, Default)]
pub struct Readiness {
    ready: AtomicBool,
    starting: AtomicBool,
    attempt: AtomicU64,
}

impl Readiness {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn is_starting(&self) -> bool {
        self.starting.load(Ordering::SeqCst)
    }

    pub fn current_attempt(&self) -> u64 {
        self.attempt.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, attempt: u64) -> bool {
        self.current_attempt() == attempt
    }

    /// Begin a new start attempt and return its number
    pub fn begin_attempt(&self) -> Result<u64, BackendError> {
        if self
            .starting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(BackendError::AlreadyStarting);
        }
        self.ready.store(false, Ordering::SeqCst);
        let attempt = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(attempt, "Backend start attempt");
        Ok(attempt)
    }

    /// Mark `attempt` as ready. Returns false if it was superseded.
    pub fn set_ready(&self, attempt: u64) -> bool {
        if !self.is_current(attempt) {
            return false;
        }
        self.ready.store(true, Ordering::SeqCst);
        self.starting.store(false, Ordering::SeqCst);
        true
    }

    /// Abandon `attempt` after a failed start. A later `set_ready` of the
    /// same attempt is refused.
    pub fn set_failed(&self, attempt: u64) {
        if self
            .attempt
            .compare_exchange(attempt, attempt + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.ready.store(false, Ordering::SeqCst);
            self.starting.store(false, Ordering::SeqCst);
        }
    }

    /// Mark the backend stopped and invalidate callbacks of every earlier attempt
    pub fn set_stopped(&self) {
        self.attempt.fetch_add(1, Ordering::SeqCst);
        self.ready.store(false, Ordering::SeqCst);
        self.starting.store(false, Ordering::SeqCst);
    }

    /// Run `on_timeout` after `after` unless `attempt` became ready or was
    /// superseded in the meantime.
    pub fn arm_timeout<F>(self: &Arc<Self>, attempt: u64, after: Duration, on_timeout: F) -> JoinHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let readiness = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if !readiness.is_current(attempt) {
                debug!(attempt, "Ignoring start timeout of superseded attempt");
                return;
            }
            if readiness.is_ready() {
                return;
            }
            warn!(attempt, ?after, "Backend start timed out");
            readiness.set_failed(attempt);
            on_timeout();
        })
    }
}
