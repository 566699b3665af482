use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::{RequestThrottle, ThrottleDecision, ThrottlePreset};
use crate::error::Error;

/// State for [`throttle_middleware`]: one throttle, one preset.
#[derive(Clone)]
pub struct ThrottleGuard {
    throttle: Arc<RequestThrottle>,
    preset: Arc<ThrottlePreset>,
}

impl ThrottleGuard {
    pub fn new(throttle: Arc<RequestThrottle>, preset_name: &str) -> Result<Self, Error> {
        let preset = throttle.preset(preset_name)?;
        Ok(Self { throttle, preset })
    }
}

/// Rejects the request with a 429 once the client has exhausted the guard's preset.
/// Allowed responses carry the current limit and remaining budget.
pub async fn throttle_middleware(
    State(guard): State<ThrottleGuard>,
    request: Request,
    next: Next,
) -> Response {
    let identity = guard.throttle.client_identity(request.headers());
    match guard.throttle.check(&identity, &guard.preset).await {
        ThrottleDecision::Rejected(rejection) => {
            tracing::debug!(
                "Throttled `{identity}` on preset `{}` for {}s",
                guard.preset.name,
                rejection.retry_after_secs
            );
            rejection.into_response()
        }
        ThrottleDecision::Allowed(allowance) => {
            let mut response = next.run(request).await;
            allowance.apply_headers(response.headers_mut());
            response
        }
    }
}
