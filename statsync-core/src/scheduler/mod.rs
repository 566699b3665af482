//! Outbound permit scheduler: per-partition pacing of upstream calls.
//!
//! Each partition tracks the earliest instant at which its next call may fire. A caller
//! waits until then, and on waking reserves the following slot (`now + spacing + jitter`).
//! The read and the reservation are separate steps, so two callers that wake together can
//! both proceed; the upstream's own 429 remains the authoritative limit.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

pub struct PermitScheduler {
    next_permit_at: Mutex<HashMap<String, Instant>>,
    jitter_max: Duration,
}

impl PermitScheduler {
    pub fn new(jitter_max: Duration) -> Self {
        Self {
            next_permit_at: Mutex::new(HashMap::new()),
            jitter_max,
        }
    }

    /// Suspends until `partition` may be called, then reserves its next slot.
    pub async fn await_permit(&self, partition: &str, min_spacing: Duration) {
        let key = partition_key(partition);
        if let Some(next_at) = self.read(&key)
            && next_at > Instant::now()
        {
            tokio::time::sleep_until(next_at).await;
        }
        let reserved = Instant::now() + min_spacing + self.jitter();
        self.advance(&key, reserved);
    }

    /// Pushes `partition`'s next permit to at least `retry_after` from now.
    pub fn on_rejected(&self, partition: &str, retry_after: Duration) {
        let key = partition_key(partition);
        tracing::warn!(
            "Upstream partition `{key}` rejected a request; backing off for {}ms",
            retry_after.as_millis()
        );
        metrics::counter!("statsync_upstream_rejections_total", "partition" => key.clone())
            .increment(1);
        self.advance(&key, Instant::now() + retry_after);
    }

    /// How long a caller arriving now would wait for `partition`.
    pub fn pending_delay(&self, partition: &str) -> Duration {
        self.read(&partition_key(partition))
            .map(|next_at| next_at.saturating_duration_since(Instant::now()))
            .unwrap_or_default()
    }

    fn read(&self, key: &str) -> Option<Instant> {
        match self.next_permit_at.lock() {
            Ok(map) => map.get(key).copied(),
            Err(poisoned) => poisoned.into_inner().get(key).copied(),
        }
    }

    /// `next_permit_at` only ever moves forward.
    fn advance(&self, key: &str, candidate: Instant) {
        let mut map = match self.next_permit_at.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(key.to_string())
            .and_modify(|next_at| {
                if candidate > *next_at {
                    *next_at = candidate;
                }
            })
            .or_insert(candidate);
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.jitter_max.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }
}

fn partition_key(partition: &str) -> String {
    partition.to_ascii_lowercase()
}
