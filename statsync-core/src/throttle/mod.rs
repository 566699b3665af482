//! Inbound request throttle: fixed-window counters per client identity and preset.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::Serialize;

use crate::clock::Clock;
use crate::config::ThrottleConfig;
use crate::db::throttle::{ThrottleRecord, ThrottleStore};
use crate::error::{Error, ErrorDetails};

mod middleware;

pub use middleware::{ThrottleGuard, throttle_middleware};

pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThrottlePreset {
    pub name: String,
    pub limit: u64,
    pub window_ms: u64,
    pub message: String,
}

impl ThrottlePreset {
    fn key(&self, identity: &str) -> String {
        format!("throttle:{}:{identity}:{}", self.name, self.window_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThrottleAllowance {
    pub limit: u64,
    pub remaining: u64,
}

impl ThrottleAllowance {
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from(self.limit));
        headers.insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from(self.remaining));
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThrottleRejection {
    pub preset: String,
    pub limit: u64,
    pub retry_after_secs: u64,
    pub reset_time: DateTime<Utc>,
    pub message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RejectionBody<'a> {
    error: &'a str,
    retry_after: u64,
}

impl IntoResponse for ThrottleRejection {
    fn into_response(self) -> Response {
        let body = RejectionBody {
            error: &self.message,
            retry_after: self.retry_after_secs,
        };
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        let headers = response.headers_mut();
        headers.insert(
            http::header::RETRY_AFTER,
            HeaderValue::from(self.retry_after_secs),
        );
        headers.insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from(self.limit));
        headers.insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from_static("0"));
        let reset = self
            .reset_time
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        if let Ok(reset) = HeaderValue::from_str(&reset) {
            headers.insert(RATE_LIMIT_RESET_HEADER, reset);
        }
        response
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ThrottleDecision {
    Allowed(ThrottleAllowance),
    Rejected(ThrottleRejection),
}

pub struct RequestThrottle {
    store: Arc<dyn ThrottleStore>,
    clock: Arc<dyn Clock>,
    identity_headers: Vec<HeaderName>,
    fallback_identity: String,
    presets: HashMap<String, Arc<ThrottlePreset>>,
}

impl RequestThrottle {
    pub fn new(
        config: &ThrottleConfig,
        store: Arc<dyn ThrottleStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, Error> {
        let identity_headers = config
            .identity_headers
            .iter()
            .map(|name| {
                HeaderName::try_from(name.as_str()).map_err(|e| {
                    Error::new(ErrorDetails::Config {
                        message: format!("Invalid header in [throttle.identity_headers] `{name}`: {e}"),
                    })
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let presets = config
            .presets
            .iter()
            .map(|(name, preset)| {
                (
                    name.clone(),
                    Arc::new(ThrottlePreset {
                        name: name.clone(),
                        limit: preset.limit,
                        window_ms: preset.window_ms,
                        message: preset.message.clone(),
                    }),
                )
            })
            .collect();
        Ok(Self {
            store,
            clock,
            identity_headers,
            fallback_identity: config.fallback_identity.clone(),
            presets,
        })
    }

    pub fn preset(&self, name: &str) -> Result<Arc<ThrottlePreset>, Error> {
        self.presets.get(name).cloned().ok_or_else(|| {
            Error::new(ErrorDetails::Config {
                message: format!("Unknown throttle preset `{name}`"),
            })
        })
    }

    /// The first client address found in the configured headers, in priority order.
    /// Only the first hop of a comma-separated list (e.g. `X-Forwarded-For`) is used.
    pub fn client_identity(&self, headers: &HeaderMap) -> String {
        self.identity_headers
            .iter()
            .filter_map(|name| headers.get(name))
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(',').next())
            .map(str::trim)
            .find(|value| !value.is_empty())
            .map_or_else(|| self.fallback_identity.clone(), str::to_string)
    }

    /// Counts this request against `preset`. Never fails: a store error allows the request.
    pub async fn check(&self, identity: &str, preset: &ThrottlePreset) -> ThrottleDecision {
        match self.try_check(identity, preset).await {
            Ok(decision) => {
                if let ThrottleDecision::Rejected(_) = &decision {
                    metrics::counter!(
                        "statsync_throttle_rejections_total",
                        "preset" => preset.name.clone()
                    )
                    .increment(1);
                }
                decision
            }
            Err(e) => {
                tracing::warn!(
                    "Throttle check for preset `{}` failed, allowing request: {e}",
                    preset.name
                );
                ThrottleDecision::Allowed(ThrottleAllowance {
                    limit: preset.limit,
                    remaining: preset.limit,
                })
            }
        }
    }

    async fn try_check(
        &self,
        identity: &str,
        preset: &ThrottlePreset,
    ) -> Result<ThrottleDecision, Error> {
        let key = preset.key(identity);
        let now = self.clock.now();

        match self.store.get(&key).await? {
            Some(record) if record.reset_time > now => {
                if record.count >= preset.limit {
                    return Ok(ThrottleDecision::Rejected(rejection(preset, record, now)));
                }
                let count = self.store.increment(&key).await?;
                if count == 0 {
                    // Expired between the read and the increment
                    return self.start_window(&key, preset, now).await;
                }
                if count > preset.limit {
                    // Lost a race with concurrent requests in the same window
                    let record = ThrottleRecord { count, ..record };
                    return Ok(ThrottleDecision::Rejected(rejection(preset, record, now)));
                }
                Ok(ThrottleDecision::Allowed(ThrottleAllowance {
                    limit: preset.limit,
                    remaining: preset.limit - count,
                }))
            }
            _ => self.start_window(&key, preset, now).await,
        }
    }

    async fn start_window(
        &self,
        key: &str,
        preset: &ThrottlePreset,
        now: DateTime<Utc>,
    ) -> Result<ThrottleDecision, Error> {
        let window = Duration::from_millis(preset.window_ms);
        let reset_time = now
            + TimeDelta::milliseconds(i64::try_from(preset.window_ms).unwrap_or(i64::MAX));
        self.store
            .set(
                key,
                ThrottleRecord {
                    count: 1,
                    reset_time,
                },
                window,
            )
            .await?;
        Ok(ThrottleDecision::Allowed(ThrottleAllowance {
            limit: preset.limit,
            remaining: preset.limit.saturating_sub(1),
        }))
    }
}

fn rejection(
    preset: &ThrottlePreset,
    record: ThrottleRecord,
    now: DateTime<Utc>,
) -> ThrottleRejection {
    let remaining_ms = (record.reset_time - now).num_milliseconds().max(0) as u64;
    ThrottleRejection {
        preset: preset.name.clone(),
        limit: preset.limit,
        retry_after_secs: remaining_ms.div_ceil(1000),
        reset_time: record.reset_time,
        message: preset.message.clone(),
    }
}
