//! Shared fixtures for unit tests.

use std::sync::Arc;

use chrono::Utc;

use crate::clock::ManualClock;
use crate::config::{Config, UpstreamConfig};
use crate::db::in_memory::InMemoryDatabase;
use crate::upstream::MockUpstreamApi;
use crate::utils::gateway::{AppDependencies, AppStateData};

pub struct TestGateway {
    pub app_state: AppStateData,
    pub db: Arc<InMemoryDatabase>,
    pub clock: Arc<ManualClock>,
}

impl TestGateway {
    /// An in-memory gateway around `upstream`, without upstream jitter.
    pub fn new(upstream: MockUpstreamApi) -> Self {
        Self::with_config(
            Config {
                upstream: UpstreamConfig {
                    jitter_max_ms: 0,
                    ..UpstreamConfig::default()
                },
                ..Config::default()
            },
            upstream,
        )
    }

    pub fn with_config(config: Config, upstream: MockUpstreamApi) -> Self {
        let db = Arc::new(InMemoryDatabase::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let app_state = AppStateData::from_dependencies(
            Arc::new(config),
            AppDependencies {
                distributed_throttle_store: None,
                upstream: Arc::new(upstream),
                matches: db.clone(),
                accounts: db.clone(),
                clock: clock.clone(),
            },
        )
        .unwrap();
        Self {
            app_state,
            db,
            clock,
        }
    }
}
