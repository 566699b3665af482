use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::{MemoryThrottleStore, ThrottleRecord, ThrottleStore};
use crate::error::Error;

/// State of the distributed store as seen by `/health`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryHealth {
    /// No distributed store is configured
    Disabled,
    Ok,
    /// A runtime error moved the process onto the in-memory store. Requests are still served.
    Degraded,
    Unreachable,
}

/// The process-wide throttle store.
///
/// Uses the distributed store when one is configured. The first runtime error from it
/// permanently switches the process to the in-memory store; there is no reconnection.
pub struct FallbackThrottleStore {
    primary: Option<Arc<dyn ThrottleStore>>,
    memory: Arc<MemoryThrottleStore>,
    degraded: AtomicBool,
    sweeper: CancellationToken,
}

impl FallbackThrottleStore {
    /// `sweep_interval` drives the in-memory store's sweep, which runs even while the
    /// distributed store is healthy so that a later degrade starts from a bounded map.
    pub fn new(
        primary: Option<Arc<dyn ThrottleStore>>,
        memory: Arc<MemoryThrottleStore>,
        sweep_interval: Duration,
    ) -> Self {
        let sweeper = CancellationToken::new();
        memory.spawn_sweeper(sweep_interval, sweeper.clone());
        match &primary {
            Some(_) => tracing::debug!("Using the distributed throttle store"),
            None => tracing::debug!("Using the in-memory throttle store"),
        }
        Self {
            primary,
            memory,
            degraded: AtomicBool::new(false),
            sweeper,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    pub fn backend_name(&self) -> &'static str {
        if self.primary.is_some() && !self.is_degraded() {
            "valkey"
        } else {
            "memory"
        }
    }

    /// Pings the distributed store unless it is absent or already abandoned.
    /// A failed ping is reported but does not degrade the store.
    pub async fn primary_health(&self) -> PrimaryHealth {
        if self.primary.is_none() {
            return PrimaryHealth::Disabled;
        }
        match self.active_primary() {
            None => PrimaryHealth::Degraded,
            Some(primary) => match primary.health().await {
                Ok(()) => PrimaryHealth::Ok,
                Err(_) => PrimaryHealth::Unreachable,
            },
        }
    }

    /// Stops the in-memory sweep task.
    pub fn shutdown(&self) {
        self.sweeper.cancel();
    }

    fn active_primary(&self) -> Option<&Arc<dyn ThrottleStore>> {
        if self.is_degraded() {
            None
        } else {
            self.primary.as_ref()
        }
    }

    fn degrade(&self, operation: &str, error: &Error) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                "Distributed throttle store failed during `{operation}` ({error}); falling back to the in-memory store for the rest of this process"
            );
            metrics::counter!("statsync_throttle_store_fallbacks_total").increment(1);
        }
    }
}

impl Drop for FallbackThrottleStore {
    fn drop(&mut self) {
        self.sweeper.cancel();
    }
}

#[async_trait]
impl ThrottleStore for FallbackThrottleStore {
    async fn get(&self, key: &str) -> Result<Option<ThrottleRecord>, Error> {
        if let Some(primary) = self.active_primary() {
            match primary.get(key).await {
                Ok(record) => return Ok(record),
                Err(e) => self.degrade("get", &e),
            }
        }
        self.memory.get(key).await
    }

    async fn set(&self, key: &str, record: ThrottleRecord, ttl: Duration) -> Result<(), Error> {
        if let Some(primary) = self.active_primary() {
            match primary.set(key, record, ttl).await {
                Ok(()) => return Ok(()),
                Err(e) => self.degrade("set", &e),
            }
        }
        self.memory.set(key, record, ttl).await
    }

    async fn increment(&self, key: &str) -> Result<u64, Error> {
        if let Some(primary) = self.active_primary() {
            match primary.increment(key).await {
                Ok(count) => return Ok(count),
                Err(e) => self.degrade("increment", &e),
            }
        }
        self.memory.increment(key).await
    }

    async fn health(&self) -> Result<(), Error> {
        match self.active_primary() {
            Some(primary) => primary.health().await,
            None => self.memory.health().await,
        }
    }
}
