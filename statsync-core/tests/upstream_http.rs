#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use secrecy::SecretString;

use common::{API_KEY, MockUpstream, upstream_config};
use statsync_core::config::UpstreamConfig;
use statsync_core::error::ErrorDetails;
use statsync_core::upstream::{Region, RiotUpstream, Routing, UpstreamApi};

async fn client(upstream: MockUpstream, api_key: &str) -> (RiotUpstream, MockUpstream) {
    let addr = upstream.clone().serve().await;
    let client = RiotUpstream::new(
        &upstream_config(addr),
        Some(SecretString::from(api_key.to_string())),
    )
    .unwrap();
    (client, upstream)
}

#[tokio::test]
async fn test_successful_calls_are_decoded() {
    let (client, upstream) =
        client(MockUpstream::with_match_ids(vec!["EUW1_1".into()]), API_KEY).await;

    let account = client.get_account(Routing::Europe, "p1").await.unwrap();
    assert_eq!(account.game_name.as_deref(), Some("player-p1"));

    let summoner = client.get_summoner(Region::Euw1, "p1").await.unwrap();
    assert_eq!(summoner.summoner_level, 251);

    let ids = client
        .list_match_ids(Routing::Europe, "subject", 0, 20)
        .await
        .unwrap();
    assert_eq!(ids, vec!["EUW1_1".to_string()]);

    let game = client.get_match(Routing::Europe, "EUW1_1").await.unwrap();
    assert_eq!(game.info.participants.len(), 2);
    assert_eq!(upstream.hit_count("/lol/match/v5/matches/EUW1_1"), 1);
}

#[tokio::test]
async fn test_error_statuses_are_classified() {
    let upstream = MockUpstream::default();
    let path = "/riot/account/v1/accounts/by-puuid/p1";
    upstream.script(path, StatusCode::TOO_MANY_REQUESTS, Some(7));
    upstream.script(path, StatusCode::TOO_MANY_REQUESTS, None);
    upstream.script(path, StatusCode::FORBIDDEN, None);
    upstream.script(path, StatusCode::NOT_FOUND, None);
    upstream.script(path, StatusCode::SERVICE_UNAVAILABLE, None);
    let (client, _upstream) = client(upstream, API_KEY).await;

    let err = client.get_account(Routing::Asia, "p1").await.unwrap_err();
    assert!(matches!(
        err.get_details(),
        ErrorDetails::UpstreamRejected {
            retry_after_secs: Some(7),
            ..
        }
    ));

    let err = client.get_account(Routing::Asia, "p1").await.unwrap_err();
    assert!(matches!(
        err.get_details(),
        ErrorDetails::UpstreamRejected {
            retry_after_secs: None,
            ..
        }
    ));

    let err = client.get_account(Routing::Asia, "p1").await.unwrap_err();
    assert!(matches!(
        err.get_details(),
        ErrorDetails::UpstreamUnauthorized { status: 403, .. }
    ));

    let err = client.get_account(Routing::Asia, "p1").await.unwrap_err();
    assert!(matches!(
        err.get_details(),
        ErrorDetails::UpstreamNotFound { .. }
    ));

    let err = client.get_account(Routing::Asia, "p1").await.unwrap_err();
    assert!(matches!(
        err.get_details(),
        ErrorDetails::UpstreamServer { status: 503, .. }
    ));
}

#[tokio::test]
async fn test_wrong_key_is_unauthorized() {
    let (client, _upstream) = client(MockUpstream::default(), "not-the-key").await;
    let err = client.get_account(Routing::Americas, "p1").await.unwrap_err();
    assert!(err.is_fatal_for_run());
}

#[tokio::test]
async fn test_unreachable_upstream_is_unavailable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = RiotUpstream::new(
        &upstream_config(addr),
        Some(SecretString::from(API_KEY.to_string())),
    )
    .unwrap();
    let err = client.get_account(Routing::Europe, "p1").await.unwrap_err();
    assert!(matches!(
        err.get_details(),
        ErrorDetails::UpstreamUnavailable { .. }
    ));
}

#[tokio::test]
async fn test_ids_stay_inside_their_path_segment() {
    let ids = (1..=50).map(|i| format!("EUW1_{i}")).collect();
    let (client, upstream) = client(MockUpstream::with_match_ids(ids), API_KEY).await;

    let puuid = "subject/ids?start=0&count=40#";
    let page = client
        .list_match_ids(Routing::Europe, puuid, 0, 5)
        .await
        .unwrap();
    assert_eq!(page.len(), 5);
    assert_eq!(
        upstream.hit_count(&format!("/lol/match/v5/matches/by-puuid/{puuid}/ids")),
        1
    );

    let game = client
        .get_match(Routing::Europe, "../by-puuid/subject/ids")
        .await
        .unwrap();
    assert_eq!(game.metadata.match_id, "../by-puuid/subject/ids");
    assert_eq!(
        upstream.hit_count("/lol/match/v5/matches/../by-puuid/subject/ids"),
        1
    );
}

#[tokio::test]
async fn test_slow_upstream_times_out() {
    let upstream = MockUpstream::default();
    upstream.delay(
        "/riot/account/v1/accounts/by-puuid/p1",
        Duration::from_secs(3),
    );
    let addr = upstream.clone().serve().await;
    let client = RiotUpstream::new(
        &UpstreamConfig {
            timeout_ms: 200,
            ..upstream_config(addr)
        },
        Some(SecretString::from(API_KEY.to_string())),
    )
    .unwrap();

    let err = client.get_account(Routing::Europe, "p1").await.unwrap_err();
    assert_eq!(
        err.get_details(),
        &ErrorDetails::UpstreamTimeout {
            partition: "europe".to_string(),
            timeout_ms: 200,
        }
    );
    assert!(!err.is_upstream_rejection());
    assert_eq!(upstream.hit_count("/riot/account/v1/accounts/by-puuid/p1"), 1);
}
