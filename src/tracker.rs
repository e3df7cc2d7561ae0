//! Last-seen table for every sensor that ever reported
//!
//! The table is shared between the ingestion tasks (writers) and the
//! inactivity sweeper (reader). Records are never removed; the table is
//! bounded by the number of distinct sensors in the fleet.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;

use crate::ActivityKey;

/// Concurrent map of [`ActivityKey`] to the monotonic time it was last seen
///
/// Cloning is cheap and yields a handle to the same table.
#[derive(Debug, Clone, Default)]
pub struct ActivityTracker {
    records: Arc<RwLock<HashMap<ActivityKey, Instant>>>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record activity for `key`, replacing any previous time
    pub async fn touch(&self, key: ActivityKey, now: Instant) {
        self.records.write().await.insert(key, now);
    }

    /// Point-in-time copy of all records, in no particular order
    pub async fn snapshot(&self) -> Vec<(ActivityKey, Instant)> {
        self.records
            .read()
            .await
            .iter()
            .map(|(key, last_seen)| (key.clone(), *last_seen))
            .collect()
    }

    pub async fn last_seen(&self, key: &ActivityKey) -> Option<Instant> {
        self.records.read().await.get(key).copied()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}
