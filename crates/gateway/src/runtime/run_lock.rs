//! Per-run concurrency control.
//!
//! The per-run store is the only mutable shared resource; exactly one
//! request may own it at a time. Each run ID maps to a `Semaphore(1)`;
//! requests against the same run queue on the permit while requests
//! against different runs proceed concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Manages per-run request locks.
pub struct RunLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Default for RunLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl RunLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the lock for a run, waiting behind any in-flight request
    /// on the same run. The permit auto-releases on drop.
    pub async fn acquire(&self, run_id: &str) -> OwnedSemaphorePermit {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(run_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };

        // The semaphore is never closed, so acquisition cannot fail.
        match sem.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => unreachable!("run lock semaphore is never closed"),
        }
    }

    /// Number of tracked runs (for monitoring).
    pub fn run_count(&self) -> usize {
        self.locks.lock().len()
    }
}
