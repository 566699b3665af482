use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::collection::ItemFailure;
use crate::collection::matches::{CollectionRequest, CollectionSummary};
use crate::config::CollectionConfig;
use crate::error::{Error, ErrorDetails};
use crate::upstream::{Region, parse_puuid};
use crate::utils::gateway::{AppState, AppStateData, StructuredJson};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectMatchesParams {
    #[serde(alias = "subjectIdentifier")]
    pub puuid: String,
    #[serde(alias = "partitionKey")]
    pub region: String,
    #[serde(default, alias = "desiredCount")]
    pub count: Option<u32>,
}

impl CollectMatchesParams {
    fn into_request(self, config: &CollectionConfig) -> Result<CollectionRequest, Error> {
        let puuid = parse_puuid(&self.puuid)?;
        let desired_count = self.count.unwrap_or(config.default_count);
        if desired_count == 0 {
            return Err(Error::new(ErrorDetails::InvalidRequest {
                message: "`count` must be at least 1".to_string(),
            }));
        }
        Ok(CollectionRequest {
            puuid: puuid.to_string(),
            region: self.region.parse::<Region>()?,
            desired_count,
        })
    }
}

#[derive(Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectMatchesResponse {
    pub items_collected: u32,
    pub created: u32,
    pub updated: u32,
    pub skipped: u32,
    pub total_found: u32,
    pub pages_visited: u32,
    pub exhausted: bool,
    pub failures: Vec<ItemFailure>,
    pub page_error: Option<String>,
    pub upstream_calls: u64,
    pub rate_limit_hits: u64,
}

impl From<CollectionSummary> for CollectMatchesResponse {
    fn from(summary: CollectionSummary) -> Self {
        Self {
            items_collected: summary.items_collected(),
            created: summary.items_created,
            updated: summary.items_updated,
            skipped: summary.items_skipped,
            total_found: summary.items_enumerated,
            pages_visited: summary.pages_visited,
            exhausted: summary.exhausted,
            failures: summary.failures,
            page_error: summary.page_error,
            upstream_calls: summary.upstream_calls,
            rate_limit_hits: summary.upstream_rejections,
        }
    }
}

/// Collects a player's recent matches from the upstream into persistence.
pub async fn collect_matches_handler(
    State(AppStateData {
        config, collector, ..
    }): AppState,
    StructuredJson(params): StructuredJson<CollectMatchesParams>,
) -> Result<Json<CollectMatchesResponse>, Error> {
    metrics::counter!("statsync_requests_total", "endpoint" => "collect_matches").increment(1);
    let request = params.into_request(&config.collection)?;
    let summary = collector.collect(&request).await?;
    Ok(Json(summary.into()))
}
