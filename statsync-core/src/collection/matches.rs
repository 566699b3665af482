//! Match-history collection for a single player.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::DateTime;
use serde::Serialize;

use super::{CollectionOutcome, ItemFailure, RunContext, SkipReason, UpstreamGate};
use crate::config::CollectionConfig;
use crate::db::{MatchQueries, MatchRecord, ParticipantRecord, StoredMatchState};
use crate::error::{Error, ErrorDetails};
use crate::upstream::{MatchDto, Region, Routing, UpstreamApi};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionRequest {
    pub puuid: String,
    pub region: Region,
    pub desired_count: u32,
}

/// Transient pagination state for one run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct CollectionCursor {
    offset: u32,
    page_size: u32,
    pages_visited: u32,
    pages_requested: u32,
    items_collected: u32,
    exhausted: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSummary {
    /// Unique ids enumerated from the upstream
    pub items_enumerated: u32,
    pub items_created: u32,
    pub items_updated: u32,
    pub items_skipped: u32,
    /// Pages that returned at least one id
    pub pages_visited: u32,
    /// The upstream has no more ids for this subject
    pub exhausted: bool,
    pub failures: Vec<ItemFailure>,
    /// Set when a list page failed and the run stopped early
    pub page_error: Option<String>,
    pub upstream_calls: u64,
    pub upstream_rejections: u64,
}

impl CollectionSummary {
    /// Items whose details were fetched and written during this run.
    pub fn items_collected(&self) -> u32 {
        self.items_created + self.items_updated
    }

    fn record(&mut self, item_id: &str, outcome: CollectionOutcome) {
        let label = match &outcome {
            CollectionOutcome::Created => {
                self.items_created += 1;
                "created"
            }
            CollectionOutcome::Updated => {
                self.items_updated += 1;
                "updated"
            }
            CollectionOutcome::Skipped(_) => {
                self.items_skipped += 1;
                "skipped"
            }
            CollectionOutcome::Failed(error) => {
                self.failures.push(ItemFailure {
                    item_id: item_id.to_string(),
                    error: error.to_string(),
                });
                "failed"
            }
        };
        metrics::counter!("statsync_collected_items_total", "outcome" => label).increment(1);
    }
}

pub struct MatchCollector {
    upstream: Arc<dyn UpstreamApi>,
    matches: Arc<dyn MatchQueries>,
    gate: UpstreamGate,
    config: CollectionConfig,
}

impl MatchCollector {
    pub fn new(
        upstream: Arc<dyn UpstreamApi>,
        matches: Arc<dyn MatchQueries>,
        gate: UpstreamGate,
        config: CollectionConfig,
    ) -> Self {
        Self {
            upstream,
            matches,
            gate,
            config,
        }
    }

    /// Enumerates up to `desired_count` match ids for the subject and harvests each one.
    ///
    /// Only a missing credential or an authorization failure is returned as an error.
    /// Item failures are recorded in the summary; a failed list page stops the run and is
    /// recorded as `page_error`.
    pub async fn collect(&self, request: &CollectionRequest) -> Result<CollectionSummary, Error> {
        self.upstream.ensure_credentials()?;

        let routing = request.region.routing();
        let desired = request.desired_count.min(self.config.max_count);
        let context = RunContext::new(self.config.run_timeout_ms);
        let mut cursor = CollectionCursor {
            page_size: self.config.page_size,
            ..CollectionCursor::default()
        };
        let mut seen = HashSet::new();
        let mut summary = CollectionSummary::default();

        tracing::info!(
            "Collecting up to {desired} matches for `{}` on `{routing}`",
            request.puuid
        );

        while !cursor.exhausted
            && cursor.items_collected < desired
            && cursor.pages_requested < self.config.max_pages
        {
            let count = cursor.page_size.min(desired - cursor.items_collected);
            cursor.pages_requested += 1;
            let page = self
                .gate
                .call(routing.as_str(), &context, || {
                    self.upstream
                        .list_match_ids(routing, &request.puuid, cursor.offset, count)
                })
                .await;
            let page = match page {
                Ok(page) => page,
                Err(e) if matches!(e.get_details(), ErrorDetails::UpstreamNotFound { .. }) => {
                    cursor.exhausted = true;
                    break;
                }
                Err(e) if e.is_fatal_for_run() => return Err(e),
                Err(e) => {
                    summary.page_error = Some(e.to_string());
                    break;
                }
            };
            if page.is_empty() {
                cursor.exhausted = true;
                break;
            }

            cursor.pages_visited += 1;
            cursor.offset += page.len() as u32;
            if (page.len() as u32) < count {
                cursor.exhausted = true;
            }

            for match_id in page {
                if cursor.items_collected >= desired || context.deadline_passed() {
                    break;
                }
                if !seen.insert(match_id.clone()) {
                    continue;
                }
                cursor.items_collected += 1;

                let outcome = self.harvest(routing, &match_id, &context).await;
                if let CollectionOutcome::Failed(e) = &outcome {
                    if e.is_fatal_for_run() {
                        return Err(e.clone());
                    }
                    tracing::warn!("Failed to collect match `{match_id}`: {e}");
                }
                summary.record(&match_id, outcome);
            }

            if context.deadline_passed() {
                tracing::warn!("Collection run for `{}` hit its deadline", request.puuid);
                break;
            }
        }

        summary.items_enumerated = cursor.items_collected;
        summary.pages_visited = cursor.pages_visited;
        summary.exhausted = cursor.exhausted;
        summary.upstream_calls = context.tally.calls();
        summary.upstream_rejections = context.tally.rejections();
        tracing::info!(
            "Collected matches for `{}`: {} enumerated, {} created, {} updated, {} skipped, {} failed",
            request.puuid,
            summary.items_enumerated,
            summary.items_created,
            summary.items_updated,
            summary.items_skipped,
            summary.failures.len()
        );
        Ok(summary)
    }

    async fn harvest(
        &self,
        routing: Routing,
        match_id: &str,
        context: &RunContext,
    ) -> CollectionOutcome {
        let state = match self.matches.get_match_state(match_id).await {
            Ok(state) => state,
            Err(e) => return CollectionOutcome::Failed(e),
        };
        if state == Some(StoredMatchState::Complete) {
            return CollectionOutcome::Skipped(SkipReason::AlreadyComplete);
        }

        let dto = match self
            .gate
            .call(routing.as_str(), context, || {
                self.upstream.get_match(routing, match_id)
            })
            .await
        {
            Ok(dto) => dto,
            Err(e) => return CollectionOutcome::Failed(e),
        };
        let record = match_record_from_dto(dto);

        let written = match state {
            Some(_) => {
                self.matches
                    .backfill_participants(match_id, record.participants)
                    .await
            }
            None => self.matches.insert_match(record).await,
        };
        match (written, state) {
            (Err(e), _) => CollectionOutcome::Failed(e),
            (Ok(()), Some(_)) => CollectionOutcome::Updated,
            (Ok(()), None) => CollectionOutcome::Created,
        }
    }
}

pub fn match_record_from_dto(dto: MatchDto) -> MatchRecord {
    MatchRecord {
        match_id: dto.metadata.match_id,
        platform_id: dto.info.platform_id,
        queue_id: dto.info.queue_id,
        game_duration_secs: dto.info.game_duration,
        game_creation: dto
            .info
            .game_creation
            .and_then(DateTime::from_timestamp_millis),
        participants: dto
            .info
            .participants
            .into_iter()
            .map(|p| ParticipantRecord {
                puuid: p.puuid,
                champion_name: p.champion_name,
                team_id: p.team_id,
                win: p.win,
                kills: p.kills,
                deaths: p.deaths,
                assists: p.assists,
            })
            .collect(),
    }
}
