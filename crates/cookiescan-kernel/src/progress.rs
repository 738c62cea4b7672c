//! Progress bus: per-scan latest-snapshot channel.
//!
//! Single writer per scan (the executor), any number of polling readers
//! (SSE handlers). Each scan owns a ring of size one — publishing replaces
//! the previous snapshot, so a slow consumer can never exert backpressure
//! on the executor; it simply observes the most recent state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::model::scan::ScanProgress;

/// The bus. Cheap to clone; all clones share the same slots.
#[derive(Clone, Default)]
pub struct ProgressBus {
    slots: Arc<DashMap<Uuid, Arc<RwLock<ScanProgress>>>>,
}

impl ProgressBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a snapshot, replacing whatever was there. Never blocks on
    /// readers beyond the slot's short write lock.
    pub fn publish(&self, progress: ScanProgress) {
        match self.slots.get(&progress.scan_id) {
            Some(slot) => {
                *slot.write() = progress;
            }
            None => {
                self.slots
                    .insert(progress.scan_id, Arc::new(RwLock::new(progress)));
            }
        }
    }

    /// The most recent snapshot for a scan, if any.
    pub fn latest(&self, scan_id: Uuid) -> Option<ScanProgress> {
        self.slots.get(&scan_id).map(|slot| slot.read().clone())
    }

    /// Drop a scan's slot (administrative cleanup).
    pub fn remove(&self, scan_id: Uuid) {
        self.slots.remove(&scan_id);
    }

    /// Garbage-collect terminal snapshots older than `max_age`. Running
    /// scans are never collected.
    pub fn gc(&self, max_age: chrono::Duration, now: DateTime<Utc>) -> usize {
        let stale: Vec<Uuid> = self
            .slots
            .iter()
            .filter(|entry| {
                let p = entry.value().read();
                p.status.is_terminal() && now - p.timestamp > max_age
            })
            .map(|entry| *entry.key())
            .collect();
        let removed = stale.len();
        for id in stale {
            self.slots.remove(&id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::scan::ScanStatus;

    fn progress(scan_id: Uuid, pages: usize, status: ScanStatus) -> ScanProgress {
        ScanProgress {
            scan_id,
            status,
            current_page: None,
            pages_visited: pages,
            cookies_found: 0,
            progress_percentage: 0.0,
            message: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn latest_snapshot_wins() {
        let bus = ProgressBus::new();
        let id = Uuid::new_v4();
        bus.publish(progress(id, 1, ScanStatus::Running));
        bus.publish(progress(id, 2, ScanStatus::Running));
        bus.publish(progress(id, 5, ScanStatus::Running));
        // Intermediate snapshots are dropped; the reader sees only the last.
        assert_eq!(bus.latest(id).unwrap().pages_visited, 5);
    }

    #[test]
    fn unknown_scan_yields_none() {
        let bus = ProgressBus::new();
        assert!(bus.latest(Uuid::new_v4()).is_none());
    }

    #[test]
    fn scans_are_isolated() {
        let bus = ProgressBus::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        bus.publish(progress(a, 3, ScanStatus::Running));
        bus.publish(progress(b, 7, ScanStatus::Running));
        assert_eq!(bus.latest(a).unwrap().pages_visited, 3);
        assert_eq!(bus.latest(b).unwrap().pages_visited, 7);
    }

    #[test]
    fn gc_removes_only_old_terminal_snapshots() {
        let bus = ProgressBus::new();
        let done = Uuid::new_v4();
        let running = Uuid::new_v4();

        let mut old = progress(done, 1, ScanStatus::Success);
        old.timestamp = Utc::now() - chrono::Duration::minutes(30);
        bus.publish(old);
        bus.publish(progress(running, 1, ScanStatus::Running));

        let removed = bus.gc(chrono::Duration::minutes(10), Utc::now());
        assert_eq!(removed, 1);
        assert!(bus.latest(done).is_none());
        assert!(bus.latest(running).is_some());
    }
}
