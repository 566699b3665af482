//! Paginated harvesting from the upstream, paced by the [`PermitScheduler`].
//!
//! Every upstream call made by a collection run goes through [`UpstreamGate::call`], which
//! acquires a permit first and retries exactly once when the upstream answers 429.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::UpstreamConfig;
use crate::error::{Error, ErrorDetails};
use crate::scheduler::PermitScheduler;

pub mod account_sync;
pub mod matches;

/// Counts upstream traffic for one run.
#[derive(Debug, Default)]
pub struct CallTally {
    calls: AtomicU64,
    rejections: AtomicU64,
}

impl CallTally {
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }
}

/// Per-run context threaded through every upstream call.
#[derive(Debug, Default)]
pub struct RunContext {
    pub tally: CallTally,
    deadline: Option<(Instant, u64)>,
}

impl RunContext {
    pub fn new(timeout_ms: Option<u64>) -> Self {
        Self {
            tally: CallTally::default(),
            deadline: timeout_ms.map(|ms| (Instant::now() + Duration::from_millis(ms), ms)),
        }
    }

    pub fn deadline_passed(&self) -> bool {
        self.deadline
            .is_some_and(|(deadline, _)| Instant::now() >= deadline)
    }
}

#[derive(Clone)]
pub struct UpstreamGate {
    scheduler: Arc<PermitScheduler>,
    min_spacing: Duration,
    retry_min_spacing: Duration,
    default_retry_after: Duration,
}

impl UpstreamGate {
    pub fn new(scheduler: Arc<PermitScheduler>, config: &UpstreamConfig) -> Self {
        Self {
            scheduler,
            min_spacing: Duration::from_millis(config.min_spacing_ms),
            retry_min_spacing: Duration::from_millis(config.retry_min_spacing_ms),
            default_retry_after: Duration::from_secs(config.default_retry_after_s),
        }
    }

    /// Runs `op` against `partition` once a permit is granted.
    ///
    /// On an upstream rejection the partition is pushed back by the advertised
    /// `Retry-After` (or the configured default), a fresh permit is awaited with the retry
    /// spacing, and `op` runs one more time. That second result is returned as is.
    /// The whole exchange, including permit waits, counts against the run's deadline.
    pub async fn call<T, F, Fut>(
        &self,
        partition: &str,
        context: &RunContext,
        op: F,
    ) -> Result<T, Error>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let exchange = self.call_with_retry(partition, &context.tally, op);
        match context.deadline {
            None => exchange.await,
            Some((deadline, timeout_ms)) => tokio::time::timeout_at(deadline, exchange)
                .await
                .unwrap_or_else(|_| {
                    Err(Error::new(ErrorDetails::RunDeadlineExceeded { timeout_ms }))
                }),
        }
    }

    async fn call_with_retry<T, F, Fut>(
        &self,
        partition: &str,
        tally: &CallTally,
        op: F,
    ) -> Result<T, Error>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        self.scheduler
            .await_permit(partition, self.min_spacing)
            .await;
        tally.calls.fetch_add(1, Ordering::Relaxed);
        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        let retry_after_secs = match error.get_details() {
            ErrorDetails::UpstreamRejected {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => return Err(error),
        };

        tally.rejections.fetch_add(1, Ordering::Relaxed);
        let retry_after = retry_after_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_retry_after);
        self.scheduler.on_rejected(partition, retry_after);
        self.scheduler
            .await_permit(partition, self.retry_min_spacing)
            .await;
        tally.calls.fetch_add(1, Ordering::Relaxed);
        op().await
    }
}

/// One item that could not be harvested. The run carries on without it.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFailure {
    pub item_id: String,
    pub error: String,
}

/// What happened to a single enumerated item.
#[derive(Clone, Debug)]
pub enum CollectionOutcome {
    Created,
    Updated,
    Skipped(SkipReason),
    Failed(Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyComplete,
    Fresh,
}
