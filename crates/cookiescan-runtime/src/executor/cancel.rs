//! Scan cancellation registry.
//!
//! Deleting a pending/running scan flips its flag; the executor checks it
//! between pages, so an in-flight navigation finishes but no further pages
//! are visited.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct CancellationRegistry {
    flags: Arc<DashMap<Uuid, Arc<AtomicBool>>>,
}

/// Handle the executor polls between pages.
#[derive(Clone)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a scan; returns the flag the executor will poll.
    pub fn register(&self, scan_id: Uuid) -> CancelFlag {
        let flag = self
            .flags
            .entry(scan_id)
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone();
        CancelFlag(flag)
    }

    /// Signal cancellation. Returns false when the scan is not registered
    /// (never started, or already finished).
    pub fn cancel(&self, scan_id: Uuid) -> bool {
        match self.flags.get(&scan_id) {
            Some(flag) => {
                flag.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Drop a finished scan's flag.
    pub fn clear(&self, scan_id: Uuid) {
        self.flags.remove(&scan_id);
    }
}
