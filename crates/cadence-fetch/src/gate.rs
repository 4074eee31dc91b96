//! Concurrency gate bounding simultaneous fetch sequences

use crate::FetchError;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::debug;

/// Counting semaphore with FIFO admission
///
/// Backed by tokio's fair semaphore: waiters are granted permits in the
/// order they called `acquire`, and a released permit goes to the head of
/// the queue before any new caller can take it.
pub struct ConcurrencyGate {
    semaphore: Semaphore,
    limit: usize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGate {
    /// Create a gate admitting `limit` holders at once
    pub fn new(limit: usize) -> Self {
        Self {
            semaphore: Semaphore::new(limit),
            limit,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Wait for a slot; the slot is released when the permit is dropped
    pub async fn acquire(&self) -> Result<GatePermit<'_>, FetchError> {
        if self.semaphore.available_permits() == 0 {
            debug!("Concurrency gate full ({}), waiting for a slot", self.limit);
        }

        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| FetchError::Cancelled)?;

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);

        Ok(GatePermit {
            _permit: permit,
            gate: self,
        })
    }

    /// Configured permit count
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Permits free right now
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Permits currently held
    pub fn in_use(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of permits held at once
    pub fn peak_in_use(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Slot held for one fetch sequence
pub struct GatePermit<'a> {
    _permit: SemaphorePermit<'a>,
    gate: &'a ConcurrencyGate,
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        self.gate.active.fetch_sub(1, Ordering::SeqCst);
    }
}
