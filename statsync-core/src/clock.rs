use chrono::{DateTime, Utc};

/// Wall-clock source for the inbound throttle.
///
/// Throttle windows and `X-RateLimit-Reset` are expressed in wall-clock time, so
/// they cannot use `tokio::time::Instant`. Unit tests inject a manual clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub use manual::ManualClock;
