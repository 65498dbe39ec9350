// Latest-known metrics per (room, participant). Lazy expiry: stale entries are
// filtered on read; prune() only runs from the rollup worker to bound memory.

use crate::models::{RealtimeSnapshot, Sample};
use std::collections::HashMap;
use tokio::sync::RwLock;

pub struct SnapshotStore {
    entries: RwLock<HashMap<(String, String), RealtimeSnapshot>>,
    ttl_ms: i64,
}

impl SnapshotStore {
    pub fn new(ttl_ms: i64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl_ms,
        }
    }

    pub fn ttl_ms(&self) -> i64 {
        self.ttl_ms
    }

    /// Overwrites the entry for the sample's (room, participant) pair.
    pub async fn upsert(&self, sample: &Sample, now_ms: i64) -> RealtimeSnapshot {
        let snapshot = RealtimeSnapshot::from_sample(sample, now_ms);
        let key = (sample.room_id.clone(), sample.participant_id.clone());
        self.entries.write().await.insert(key, snapshot.clone());
        snapshot
    }

    /// All non-stale snapshots, optionally filtered by room, sorted by room then
    /// participant for stable output.
    pub async fn active(&self, now_ms: i64, room_id: Option<&str>) -> Vec<RealtimeSnapshot> {
        let entries = self.entries.read().await;
        let mut out: Vec<RealtimeSnapshot> = entries
            .values()
            .filter(|s| !s.is_stale(now_ms, self.ttl_ms))
            .filter(|s| room_id.is_none_or(|r| s.room_id == r))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            (a.room_id.as_str(), a.participant_id.as_str())
                .cmp(&(b.room_id.as_str(), b.participant_id.as_str()))
        });
        out
    }

    /// Drops entries stale for several TTLs. Returns how many were removed.
    pub async fn prune(&self, now_ms: i64) -> usize {
        let cutoff_ms = self.ttl_ms * 4;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, s| !s.is_stale(now_ms, cutoff_ms));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
