//! Counter storage for the inbound request throttle.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

use crate::error::Error;

mod fallback;
mod memory;

pub use fallback::{FallbackThrottleStore, PrimaryHealth};
pub use memory::MemoryThrottleStore;

/// One fixed-window counter.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleRecord {
    pub count: u64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub reset_time: DateTime<Utc>,
}

#[async_trait]
#[cfg_attr(test, automock)]
pub trait ThrottleStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<ThrottleRecord>, Error>;

    /// Stores `record`, expiring it after `ttl`.
    async fn set(&self, key: &str, record: ThrottleRecord, ttl: Duration) -> Result<(), Error>;

    /// Increments the count of an existing record without touching its expiry.
    /// Returns the new count, or 0 if the key does not exist (or has expired).
    async fn increment(&self, key: &str) -> Result<u64, Error>;

    /// Fails when the backing service cannot be reached.
    async fn health(&self) -> Result<(), Error>;
}
