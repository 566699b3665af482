use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{FromRequest, Json, Request};
use serde::de::DeserializeOwned;
use tracing::instrument;

use crate::accounts::AccountDetailsService;
use crate::clock::{Clock, SystemClock};
use crate::collection::UpstreamGate;
use crate::collection::account_sync::AccountSyncService;
use crate::collection::matches::MatchCollector;
use crate::config::{Config, VALKEY_URL_ENV_VAR};
use crate::db::in_memory::InMemoryDatabase;
use crate::db::throttle::{FallbackThrottleStore, MemoryThrottleStore, ThrottleStore};
use crate::db::valkey::ValkeyThrottleStore;
use crate::db::{AccountQueries, MatchQueries};
use crate::error::{Error, ErrorDetails};
use crate::scheduler::PermitScheduler;
use crate::throttle::RequestThrottle;
use crate::upstream::{RiotUpstream, UpstreamApi};

/// State for the API
#[derive(Clone)]
pub struct AppStateData {
    pub config: Arc<Config>,
    pub throttle: Arc<RequestThrottle>,
    pub throttle_store: Arc<FallbackThrottleStore>,
    pub scheduler: Arc<PermitScheduler>,
    pub collector: Arc<MatchCollector>,
    pub account_details: Arc<AccountDetailsService>,
    pub account_sync: Arc<AccountSyncService>,
}
pub type AppState = axum::extract::State<AppStateData>;

/// The external collaborators the gateway is wired to. Tests swap these for mocks.
pub struct AppDependencies {
    /// The distributed throttle store, if any. `None` keeps counters in process memory.
    pub distributed_throttle_store: Option<Arc<dyn ThrottleStore>>,
    pub upstream: Arc<dyn UpstreamApi>,
    pub matches: Arc<dyn MatchQueries>,
    pub accounts: Arc<dyn AccountQueries>,
    pub clock: Arc<dyn Clock>,
}

impl AppStateData {
    /// Connects to Valkey when `STATSYNC_VALKEY_URL` is set and builds the production state.
    /// A Valkey that cannot be reached at startup leaves the process on the in-memory store.
    pub async fn new(config: Arc<Config>) -> Result<Self, Error> {
        let distributed_throttle_store = match std::env::var(VALKEY_URL_ENV_VAR) {
            Ok(url) if !url.trim().is_empty() => match ValkeyThrottleStore::connect(&url).await {
                Ok(store) => Some(Arc::new(store) as Arc<dyn ThrottleStore>),
                Err(e) => {
                    tracing::warn!("Falling back to the in-memory throttle store: {e}");
                    None
                }
            },
            _ => None,
        };
        let upstream = Arc::new(RiotUpstream::new(
            &config.upstream,
            config.upstream_api_key(),
        )?);
        if upstream.ensure_credentials().is_err() {
            tracing::warn!(
                "`{}` is not set; collection endpoints will fail until it is",
                config.upstream.api_key_env
            );
        }
        let database = Arc::new(InMemoryDatabase::new());
        Self::from_dependencies(
            config,
            AppDependencies {
                distributed_throttle_store,
                upstream,
                matches: database.clone(),
                accounts: database,
                clock: Arc::new(SystemClock),
            },
        )
    }

    /// Wires the throttle, the permit scheduler and the collection services.
    /// Must be called from within a Tokio runtime, since it starts the throttle sweep task.
    pub fn from_dependencies(config: Arc<Config>, deps: AppDependencies) -> Result<Self, Error> {
        let AppDependencies {
            distributed_throttle_store,
            upstream,
            matches,
            accounts,
            clock,
        } = deps;

        let throttle_store = Arc::new(FallbackThrottleStore::new(
            distributed_throttle_store,
            Arc::new(MemoryThrottleStore::new(clock.clone())),
            std::time::Duration::from_millis(config.throttle.sweep_interval_ms),
        ));
        let throttle = Arc::new(RequestThrottle::new(
            &config.throttle,
            throttle_store.clone(),
            clock.clone(),
        )?);

        let scheduler = Arc::new(PermitScheduler::new(std::time::Duration::from_millis(
            config.upstream.jitter_max_ms,
        )));
        let gate = UpstreamGate::new(scheduler.clone(), &config.upstream);
        let collector = Arc::new(MatchCollector::new(
            upstream.clone(),
            matches,
            gate.clone(),
            config.collection.clone(),
        ));
        let account_details = Arc::new(AccountDetailsService::new(
            upstream,
            accounts.clone(),
            gate,
            clock.clone(),
        ));
        let account_sync = Arc::new(AccountSyncService::new(
            accounts,
            account_details.clone(),
            clock,
            config.account_sync.clone(),
        ));

        Ok(Self {
            config,
            throttle,
            throttle_store,
            scheduler,
            collector,
            account_details,
            account_sync,
        })
    }

    /// Stops background work: the throttle sweep and any running account sync.
    pub fn shutdown(&self) {
        self.account_sync.shutdown();
        self.throttle_store.shutdown();
    }
}

/// Custom Axum extractor that validates the JSON body and deserializes it into a custom type
///
/// When this extractor is present, we don't check if the `Content-Type` header is `application/json`,
/// and instead simply assume that the request body is a JSON object.
pub struct StructuredJson<T>(pub T);

impl<S, T> FromRequest<S> for StructuredJson<T>
where
    S: Send + Sync,
    T: Send + Sync + DeserializeOwned,
{
    type Rejection = Error;

    #[instrument(skip_all, level = "trace", name = "StructuredJson::from_request")]
    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        // Retrieve the request body as Bytes before deserializing it
        let bytes = Bytes::from_request(req, state).await.map_err(|e| {
            Error::new(ErrorDetails::JsonRequest {
                message: format!("{e} ({})", e.status()),
            })
        })?;

        // An empty body is treated as an empty object so that all-optional bodies can be omitted
        let value = if bytes.is_empty() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            Json::<serde_json::Value>::from_bytes(&bytes)
                .map_err(|e| {
                    Error::new(ErrorDetails::JsonRequest {
                        message: format!("{e} ({})", e.status()),
                    })
                })?
                .0
        };

        // Now use `serde_path_to_error::deserialize` to attempt deserialization into `T`
        let deserialized: T = serde_path_to_error::deserialize(&value).map_err(|e| {
            Error::new(ErrorDetails::JsonRequest {
                message: e.to_string(),
            })
        })?;

        Ok(StructuredJson(deserialized))
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct NamedPayload {
        name: String,
    }

    #[tokio::test]
    async fn test_structured_json_reports_the_failing_path() {
        let request = Request::builder()
            .body(Body::from(r#"{"name": 5}"#))
            .unwrap();
        let err = StructuredJson::<NamedPayload>::from_request(request, &())
            .await
            .err()
            .unwrap();
        assert!(matches!(err.get_details(), ErrorDetails::JsonRequest { .. }));
        assert!(err.to_string().contains("name"), "{err}");
    }

    #[tokio::test]
    async fn test_structured_json_parses_body() {
        let request = Request::builder()
            .body(Body::from(r#"{"name": "faker"}"#))
            .unwrap();
        let StructuredJson(body) = StructuredJson::<NamedPayload>::from_request(request, &())
            .await
            .unwrap();
        assert_eq!(body.name, "faker");
    }
}
