use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use super::{ThrottleRecord, ThrottleStore};
use crate::clock::Clock;
use crate::error::Error;

#[derive(Clone, Copy, Debug)]
struct Entry {
    record: ThrottleRecord,
    expires_at: DateTime<Utc>,
}

/// In-process throttle store. Expired entries are invisible to readers immediately
/// and are physically removed by a periodic sweep.
pub struct MemoryThrottleStore {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
}

impl MemoryThrottleStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Removes every expired entry, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spawns the periodic sweep. The task exits when `cancel` is cancelled.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(store) = store.upgrade() else {
                            break;
                        };
                        let removed = store.sweep();
                        if removed > 0 {
                            tracing::debug!("Swept {removed} expired throttle records");
                        }
                    }
                }
            }
        });
    }
}

#[async_trait]
impl ThrottleStore for MemoryThrottleStore {
    async fn get(&self, key: &str) -> Result<Option<ThrottleRecord>, Error> {
        let now = self.clock.now();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.record))
    }

    async fn set(&self, key: &str, record: ThrottleRecord, ttl: Duration) -> Result<(), Error> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.entries
            .insert(key.to_string(), Entry { record, expires_at });
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<u64, Error> {
        let now = self.clock.now();
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.expires_at > now => {
                entry.record.count += 1;
                Ok(entry.record.count)
            }
            _ => Ok(0),
        }
    }

    async fn health(&self) -> Result<(), Error> {
        Ok(())
    }
}
