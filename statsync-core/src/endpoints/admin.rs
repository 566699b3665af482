//! Control surface for the account sync job.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use crate::collection::account_sync::{SyncOptions, SyncRequest, SyncState};
use crate::error::Error;
use crate::utils::gateway::{AppState, AppStateData, StructuredJson};

pub async fn get_sync_state_handler(
    State(AppStateData { account_sync, .. }): AppState,
) -> Json<SyncState> {
    Json(account_sync.state())
}

/// Starts a sync in the background. Fails with 409 while one is already running.
pub async fn start_sync_handler(
    State(AppStateData { account_sync, .. }): AppState,
    StructuredJson(request): StructuredJson<SyncRequest>,
) -> Result<(StatusCode, Json<SyncState>), Error> {
    metrics::counter!("statsync_requests_total", "endpoint" => "start_account_sync").increment(1);
    let options = SyncOptions::resolve(request, account_sync.config())?;
    let state = account_sync.start(options).await?;
    Ok((StatusCode::ACCEPTED, Json(state)))
}

pub async fn stop_sync_handler(
    State(AppStateData { account_sync, .. }): AppState,
) -> Json<SyncState> {
    Json(account_sync.stop())
}
