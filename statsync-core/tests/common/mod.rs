#![allow(clippy::expect_used, clippy::unwrap_used, clippy::allow_attributes)]
//! An in-process stand-in for the upstream API, served over real HTTP.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;
use serde_json::json;

use statsync_core::config::{Config, UpstreamConfig};

pub const API_KEY: &str = "upstream-test-key";

/// Scripted responses, keyed by request path without the host segment.
/// Each path pops its scripted responses in order and then falls back to the default handler.
#[derive(Clone, Default)]
pub struct MockUpstream {
    scripted: Arc<Mutex<HashMap<String, Vec<(StatusCode, Option<u64>)>>>>,
    delays: Arc<Mutex<HashMap<String, Duration>>>,
    pub hits: Arc<Mutex<Vec<String>>>,
    pub match_ids: Arc<Mutex<Vec<String>>>,
}

#[derive(Deserialize)]
struct Page {
    start: usize,
    count: usize,
}

impl MockUpstream {
    pub fn with_match_ids(ids: Vec<String>) -> Self {
        let upstream = Self::default();
        *upstream.match_ids.lock().unwrap() = ids;
        upstream
    }

    /// The next request to `path` answers `status`, with `Retry-After` when given.
    pub fn script(&self, path: &str, status: StatusCode, retry_after: Option<u64>) {
        self.scripted
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push((status, retry_after));
    }

    /// Every request to `path` sleeps for `delay` before answering.
    #[allow(dead_code)]
    pub fn delay(&self, path: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(path.to_string(), delay);
    }

    pub fn hit_count(&self, path: &str) -> usize {
        self.hits
            .lock()
            .unwrap()
            .iter()
            .filter(|hit| hit.as_str() == path)
            .count()
    }

    async fn intercept(&self, path: &str, headers: &HeaderMap) -> Option<Response> {
        self.hits.lock().unwrap().push(path.to_string());
        let delay = self.delays.lock().unwrap().get(path).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if headers.get("x-riot-token").and_then(|v| v.to_str().ok()) != Some(API_KEY) {
            return Some(StatusCode::UNAUTHORIZED.into_response());
        }
        let mut scripted = self.scripted.lock().unwrap();
        let queue = scripted.get_mut(path)?;
        if queue.is_empty() {
            return None;
        }
        let (status, retry_after) = queue.remove(0);
        let mut response = (status, json!({"status": {"status_code": status.as_u16()}}).to_string())
            .into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert("retry-after", secs.to_string().parse().unwrap());
        }
        Some(response)
    }

    pub async fn serve(self) -> SocketAddr {
        let router = Router::new()
            .route(
                "/{host}/lol/match/v5/matches/by-puuid/{puuid}/ids",
                get(list_match_ids),
            )
            .route("/{host}/lol/match/v5/matches/{match_id}", get(get_match))
            .route(
                "/{host}/riot/account/v1/accounts/by-puuid/{puuid}",
                get(get_account),
            )
            .route(
                "/{host}/lol/summoner/v4/summoners/by-puuid/{puuid}",
                get(get_summoner),
            )
            .with_state(self);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }
}

async fn list_match_ids(
    State(upstream): State<MockUpstream>,
    Path((_host, puuid)): Path<(String, String)>,
    Query(page): Query<Page>,
    headers: HeaderMap,
) -> Response {
    let path = format!("/lol/match/v5/matches/by-puuid/{puuid}/ids");
    if let Some(response) = upstream.intercept(&path, &headers).await {
        return response;
    }
    let ids = upstream.match_ids.lock().unwrap().clone();
    let page: Vec<String> = ids.into_iter().skip(page.start).take(page.count).collect();
    axum::Json(page).into_response()
}

async fn get_match(
    State(upstream): State<MockUpstream>,
    Path((_host, match_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let path = format!("/lol/match/v5/matches/{match_id}");
    if let Some(response) = upstream.intercept(&path, &headers).await {
        return response;
    }
    axum::Json(json!({
        "metadata": {"matchId": match_id, "participants": ["subject", "teammate"]},
        "info": {
            "platformId": "EUW1",
            "queueId": 420,
            "gameDuration": 1834,
            "gameCreation": 1_760_000_000_000_i64,
            "participants": [
                {"puuid": "subject", "championName": "Ahri", "teamId": 100, "win": true, "kills": 7, "deaths": 2, "assists": 11},
                {"puuid": "teammate", "championName": "Leona", "teamId": 100, "win": true, "kills": 1, "deaths": 4, "assists": 19}
            ]
        }
    }))
    .into_response()
}

async fn get_account(
    State(upstream): State<MockUpstream>,
    Path((_host, puuid)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let path = format!("/riot/account/v1/accounts/by-puuid/{puuid}");
    if let Some(response) = upstream.intercept(&path, &headers).await {
        return response;
    }
    axum::Json(json!({"puuid": puuid, "gameName": format!("player-{puuid}"), "tagLine": "EUW"}))
        .into_response()
}

async fn get_summoner(
    State(upstream): State<MockUpstream>,
    Path((_host, puuid)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let path = format!("/lol/summoner/v4/summoners/by-puuid/{puuid}");
    if let Some(response) = upstream.intercept(&path, &headers).await {
        return response;
    }
    axum::Json(json!({"profileIconId": 4568, "summonerLevel": 251})).into_response()
}

/// Upstream settings pointed at the mock, with short spacing so tests stay fast.
pub fn upstream_config(addr: SocketAddr) -> UpstreamConfig {
    UpstreamConfig {
        base_url_template: format!("http://{addr}/{{host}}"),
        min_spacing_ms: 10,
        retry_min_spacing_ms: 10,
        jitter_max_ms: 0,
        default_retry_after_s: 1,
        timeout_ms: 2_000,
        ..UpstreamConfig::default()
    }
}

/// Serves `router` on a random local port and returns its base URL.
#[allow(dead_code)]
pub async fn serve_gateway(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[allow(dead_code)]
pub fn config_with_upstream(addr: SocketAddr) -> Config {
    Config {
        upstream: upstream_config(addr),
        ..Config::default()
    }
}
