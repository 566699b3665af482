use axum::debug_handler;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::db::throttle::PrimaryHealth;
use crate::utils::gateway::{AppState, AppStateData};

pub const STATSYNC_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A handler for a simple liveness check
#[debug_handler]
pub async fn status_handler() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok".to_string(),
        version: STATSYNC_VERSION.to_string(),
    })
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
}

/// A handler for a health check that includes availability of the throttle store.
/// A degraded store still serves requests, so it is reported but does not fail the check.
pub async fn health_handler(
    State(AppStateData { throttle_store, .. }): AppState,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let valkey = throttle_store.primary_health().await;
    let body = json!({
        "gateway": "ok",
        "valkey": valkey,
        "throttle_store": throttle_store.backend_name(),
    });
    if valkey == PrimaryHealth::Unreachable {
        return Err((StatusCode::SERVICE_UNAVAILABLE, Json(body)));
    }
    Ok(Json(body))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::SystemClock;
    use crate::config::Config;
    use crate::db::in_memory::InMemoryDatabase;
    use crate::db::throttle::MockThrottleStore;
    use crate::error::{Error, ErrorDetails};
    use crate::testing::TestGateway;
    use crate::upstream::MockUpstreamApi;
    use crate::utils::gateway::AppDependencies;

    #[tokio::test]
    async fn test_status_handler() {
        let Json(response) = status_handler().await;
        assert_eq!(response.status, "ok");
        assert_eq!(response.version, STATSYNC_VERSION);
    }

    #[tokio::test]
    async fn test_health_handler_without_valkey() {
        let gateway = TestGateway::new(MockUpstreamApi::new());
        let Json(body) = health_handler(State(gateway.app_state.clone()))
            .await
            .unwrap();
        assert_eq!(
            body,
            json!({"gateway": "ok", "valkey": "disabled", "throttle_store": "memory"})
        );
    }

    #[tokio::test]
    async fn test_health_handler_with_unreachable_valkey() {
        let mut primary = MockThrottleStore::new();
        primary.expect_health().returning(|| {
            Box::pin(async move {
                Err(Error::new(ErrorDetails::ValkeyConnection {
                    message: "connection refused".to_string(),
                }))
            })
        });
        let db = Arc::new(InMemoryDatabase::new());
        let app_state = AppStateData::from_dependencies(
            Arc::new(Config::default()),
            AppDependencies {
                distributed_throttle_store: Some(Arc::new(primary)),
                upstream: Arc::new(MockUpstreamApi::new()),
                matches: db.clone(),
                accounts: db,
                clock: Arc::new(SystemClock),
            },
        )
        .unwrap();

        let (status, Json(body)) = health_handler(State(app_state)).await.unwrap_err();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body,
            json!({"gateway": "ok", "valkey": "unreachable", "throttle_store": "valkey"})
        );
    }
}
