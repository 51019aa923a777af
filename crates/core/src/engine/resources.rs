use std::{collections::BTreeMap, sync::Arc};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Buffer,
    Geometry,
    Texture,
    ShadowMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub kind: ResourceKind,
    pub label: String,
    pub bytes: u64,
}

#[derive(Debug, Default)]
struct Ledger {
    next_id: u64,
    live: BTreeMap<ResourceId, ResourceRecord>,
    total_bytes: u64,
    allocations: u64,
    releases: u64,
}

/// Ledger of every GPU allocation made through the engine. Scenes hold a
/// clone, allocate through it and must release what they allocated.
#[derive(Debug, Clone, Default)]
pub struct ResourceTracker {
    inner: Arc<Mutex<Ledger>>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self, kind: ResourceKind, label: impl Into<String>, bytes: u64) -> ResourceId {
        let mut ledger = self.inner.lock();
        ledger.next_id += 1;
        ledger.allocations += 1;
        ledger.total_bytes += bytes;
        let id = ResourceId(ledger.next_id);
        ledger.live.insert(
            id,
            ResourceRecord {
                kind,
                label: label.into(),
                bytes,
            },
        );
        id
    }

    /// Releases an allocation. Releasing an unknown or already released id
    /// is a no-op and returns `false`.
    pub fn release(&self, id: ResourceId) -> bool {
        let mut ledger = self.inner.lock();
        match ledger.live.remove(&id) {
            Some(record) => {
                ledger.total_bytes = ledger.total_bytes.saturating_sub(record.bytes);
                ledger.releases += 1;
                true
            }
            None => false,
        }
    }

    pub fn resize(&self, id: ResourceId, bytes: u64) -> bool {
        let mut ledger = self.inner.lock();
        let Some(previous) = ledger.live.get(&id).map(|record| record.bytes) else {
            return false;
        };
        ledger.total_bytes = ledger.total_bytes.saturating_sub(previous) + bytes;
        if let Some(record) = ledger.live.get_mut(&id) {
            record.bytes = bytes;
        }
        true
    }

    pub fn total_bytes(&self) -> u64 {
        self.inner.lock().total_bytes
    }

    pub fn live_count(&self) -> usize {
        self.inner.lock().live.len()
    }

    pub fn live_of_kind(&self, kind: ResourceKind) -> usize {
        self.inner
            .lock()
            .live
            .values()
            .filter(|record| record.kind == kind)
            .count()
    }

    pub fn is_live(&self, id: ResourceId) -> bool {
        self.inner.lock().live.contains_key(&id)
    }

    /// Total number of allocations ever made.
    pub fn allocation_count(&self) -> u64 {
        self.inner.lock().allocations
    }

    /// Releases everything still live and returns the leaked records.
    pub fn release_all(&self) -> Vec<ResourceRecord> {
        let mut ledger = self.inner.lock();
        let leaked: Vec<ResourceRecord> = std::mem::take(&mut ledger.live).into_values().collect();
        ledger.releases += leaked.len() as u64;
        ledger.total_bytes = 0;
        leaked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_bytes_through_lifecycle() {
        let tracker = ResourceTracker::new();
        let a = tracker.allocate(ResourceKind::Buffer, "particles", 4_000);
        let b = tracker.allocate(ResourceKind::Geometry, "torus", 1_000);
        assert_eq!(tracker.total_bytes(), 5_000);

        assert!(tracker.resize(a, 2_000));
        assert_eq!(tracker.total_bytes(), 3_000);

        assert!(tracker.release(b));
        assert!(!tracker.release(b));
        assert_eq!(tracker.total_bytes(), 2_000);
        assert_eq!(tracker.live_of_kind(ResourceKind::Buffer), 1);
    }

    #[test]
    fn release_all_reports_leaks() {
        let tracker = ResourceTracker::new();
        tracker.allocate(ResourceKind::Texture, "noise", 64);
        let leaked = tracker.release_all();
        assert_eq!(leaked.len(), 1);
        assert_eq!(leaked[0].label, "noise");
        assert_eq!(tracker.live_count(), 0);
        assert_eq!(tracker.total_bytes(), 0);
    }
}
