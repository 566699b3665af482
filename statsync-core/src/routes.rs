//! Route definitions and router construction for the gateway.

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::{DefaultOnFailure, TraceLayer};
use tracing::Level;

use crate::config::{ADMIN_PRESET, API_PRESET};
use crate::endpoints;
use crate::error::Error;
use crate::throttle::{ThrottleGuard, throttle_middleware};
use crate::utils::gateway::AppStateData;

/// Builds the full router, nested under `gateway.base_path` when one is configured.
pub fn build_router(
    app_state: AppStateData,
    metrics_handle: PrometheusHandle,
) -> Result<Router, Error> {
    let api_routes = build_api_routes(&app_state, metrics_handle)?;

    let base_path = app_state
        .config
        .gateway
        .base_path
        .as_deref()
        .unwrap_or("/")
        .trim_end_matches('/');
    // The path was just `/` (or multiple slashes)
    let router = if base_path.is_empty() {
        Router::new().merge(api_routes)
    } else {
        Router::new().nest(base_path, api_routes)
    };

    Ok(router
        .fallback(endpoints::fallback::handle_404)
        // We log failed requests messages at 'DEBUG', since we already have our own error-logging code
        .layer(TraceLayer::new_for_http().on_failure(DefaultOnFailure::new().level(Level::DEBUG)))
        .with_state(app_state))
}

/// Client-facing routes are throttled by the `api` preset, admin routes by `admin`.
/// Operational routes are never throttled.
pub fn build_api_routes(
    app_state: &AppStateData,
    metrics_handle: PrometheusHandle,
) -> Result<Router<AppStateData>, Error> {
    let api_guard = ThrottleGuard::new(app_state.throttle.clone(), API_PRESET)?;
    let admin_guard = ThrottleGuard::new(app_state.throttle.clone(), ADMIN_PRESET)?;

    let api_routes = Router::new()
        .route(
            "/matches/collect",
            post(endpoints::matches::collect_matches_handler),
        )
        .route(
            "/riot/account-details",
            post(endpoints::accounts::account_details_handler),
        )
        .route_layer(middleware::from_fn_with_state(
            api_guard,
            throttle_middleware,
        ));

    let admin_routes = Router::new()
        .route(
            "/admin/sync-accounts",
            get(endpoints::admin::get_sync_state_handler)
                .post(endpoints::admin::start_sync_handler)
                .delete(endpoints::admin::stop_sync_handler),
        )
        .route_layer(middleware::from_fn_with_state(
            admin_guard,
            throttle_middleware,
        ));

    Ok(Router::new()
        .merge(api_routes)
        .merge(admin_routes)
        .route("/status", get(endpoints::status::status_handler))
        .route("/health", get(endpoints::status::health_handler))
        .route(
            "/metrics",
            get(move || std::future::ready(metrics_handle.render())),
        ))
}
