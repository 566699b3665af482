//! Background job that backfills account profiles for every participant seen in a stored match.
//!
//! At most one run is active per process. A run walks the known participants with cursor
//! pagination and decides per account whether to skip it, refresh it from the upstream, or
//! write it without upstream details once the per-cycle call budget is spent.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::accounts::AccountDetailsService;
use crate::clock::Clock;
use crate::collection::{CollectionOutcome, RunContext, SkipReason};
use crate::config::{AccountSyncConfig, UPSTREAM_MAX_PAGE_SIZE};
use crate::db::{AccountQueries, AccountRecord, KnownParticipant, UpsertOutcome};
use crate::error::{Error, ErrorDetails};
use crate::upstream::Region;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub is_running: bool,
    /// Set by a stop until the cancelled run has made its last upstream call
    pub stopping: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub total_accounts: u64,
    pub processed_accounts: u64,
    pub accounts_created: u64,
    pub accounts_updated: u64,
    pub accounts_skipped: u64,
    pub upstream_calls: u64,
    pub upstream_errors: u64,
    pub rate_limit_hits: u64,
    pub current_account: Option<CurrentAccount>,
    pub last_error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentAccount {
    pub puuid: String,
    pub platform_id: String,
}

/// Body of a start request. Missing fields fall back to `[account_sync]`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SyncRequest {
    #[serde(default, alias = "maxRiotCallsPerCycle")]
    pub max_upstream_calls_per_cycle: Option<u32>,
    #[serde(default)]
    pub batch_size: Option<u32>,
    #[serde(default, alias = "skipRiotApi")]
    pub skip_upstream: Option<bool>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncOptions {
    pub max_upstream_calls_per_cycle: u32,
    pub batch_size: u32,
    pub skip_upstream: bool,
}

impl SyncOptions {
    pub fn resolve(request: SyncRequest, config: &AccountSyncConfig) -> Result<Self, Error> {
        let batch_size = request.batch_size.unwrap_or(config.batch_size);
        if !(1..=UPSTREAM_MAX_PAGE_SIZE).contains(&batch_size) {
            return Err(Error::new(ErrorDetails::InvalidRequest {
                message: format!(
                    "`batchSize` must be between 1 and {UPSTREAM_MAX_PAGE_SIZE}, got {batch_size}"
                ),
            }));
        }
        Ok(Self {
            max_upstream_calls_per_cycle: request
                .max_upstream_calls_per_cycle
                .unwrap_or(config.max_upstream_calls_per_cycle),
            batch_size,
            skip_upstream: request.skip_upstream.unwrap_or(false),
        })
    }
}

#[derive(Default)]
struct SyncSlot {
    state: SyncState,
    /// Bumped on every start so a cancelled run cannot overwrite its successor's state
    generation: u64,
    cancel: CancellationToken,
}

pub struct AccountSyncService {
    accounts: Arc<dyn AccountQueries>,
    details: Arc<AccountDetailsService>,
    clock: Arc<dyn Clock>,
    config: AccountSyncConfig,
    slot: Mutex<SyncSlot>,
}

impl AccountSyncService {
    pub fn new(
        accounts: Arc<dyn AccountQueries>,
        details: Arc<AccountDetailsService>,
        clock: Arc<dyn Clock>,
        config: AccountSyncConfig,
    ) -> Self {
        Self {
            accounts,
            details,
            clock,
            config,
            slot: Mutex::new(SyncSlot::default()),
        }
    }

    pub fn config(&self) -> &AccountSyncConfig {
        &self.config
    }

    pub fn state(&self) -> SyncState {
        self.lock().state.clone()
    }

    /// Starts a run in the background and returns its initial state.
    pub async fn start(self: &Arc<Self>, options: SyncOptions) -> Result<SyncState, Error> {
        let (generation, cancel) = self.begin(options).await?;
        let service = Arc::clone(self);
        tokio::spawn(async move {
            service.run_cycle(generation, options, cancel).await;
        });
        Ok(self.state())
    }

    /// Runs to completion on the current task and returns the final state.
    pub async fn run(&self, options: SyncOptions) -> Result<SyncState, Error> {
        let (generation, cancel) = self.begin(options).await?;
        self.run_cycle(generation, options, cancel).await;
        Ok(self.state())
    }

    /// Cancels the running job, if any. The run stops before its next account; until it does,
    /// `stopping` stays set and new starts are refused.
    pub fn stop(&self) -> SyncState {
        let mut slot = self.lock();
        if slot.state.is_running {
            tracing::info!("Stopping account sync");
            slot.cancel.cancel();
            slot.state.is_running = false;
            slot.state.stopping = true;
            slot.state.current_account = None;
        }
        slot.state.clone()
    }

    pub fn shutdown(&self) {
        self.lock().cancel.cancel();
    }

    fn lock(&self) -> MutexGuard<'_, SyncSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, generation: u64, f: impl FnOnce(&mut SyncState)) {
        let mut slot = self.lock();
        if slot.generation == generation {
            f(&mut slot.state);
        }
    }

    async fn begin(&self, options: SyncOptions) -> Result<(u64, CancellationToken), Error> {
        let (generation, cancel) = {
            let mut slot = self.lock();
            if slot.state.is_running || slot.state.stopping {
                return Err(Error::new(ErrorDetails::SyncAlreadyRunning));
            }
            slot.generation += 1;
            slot.cancel = CancellationToken::new();
            slot.state = SyncState {
                is_running: true,
                started_at: Some(self.clock.now()),
                ..SyncState::default()
            };
            (slot.generation, slot.cancel.clone())
        };

        match self.accounts.count_known_participants().await {
            Ok(total) => {
                tracing::info!(
                    "Starting account sync over {total} accounts (budget {} calls, batch {}, skip upstream: {})",
                    options.max_upstream_calls_per_cycle,
                    options.batch_size,
                    options.skip_upstream
                );
                self.update(generation, |state| state.total_accounts = total);
                Ok((generation, cancel))
            }
            Err(e) => {
                self.update(generation, |state| {
                    state.is_running = false;
                    state.stopping = false;
                    state.last_error = Some(e.to_string());
                });
                Err(e)
            }
        }
    }

    async fn run_cycle(&self, generation: u64, options: SyncOptions, cancel: CancellationToken) {
        let context = RunContext::new(None);
        let result = self
            .sync_all(generation, options, &cancel, &context)
            .await;
        self.update(generation, |state| {
            state.is_running = false;
            state.stopping = false;
            state.current_account = None;
            state.upstream_calls = context.tally.calls();
            state.rate_limit_hits = context.tally.rejections();
            if let Err(e) = &result {
                state.last_error = Some(e.to_string());
            }
        });
        let state = self.state();
        match result {
            Ok(()) => tracing::info!(
                "Account sync finished: {} processed, {} created, {} updated, {} skipped",
                state.processed_accounts,
                state.accounts_created,
                state.accounts_updated,
                state.accounts_skipped
            ),
            Err(e) => tracing::error!("Account sync aborted: {e}"),
        }
    }

    async fn sync_all(
        &self,
        generation: u64,
        options: SyncOptions,
        cancel: &CancellationToken,
        context: &RunContext,
    ) -> Result<(), Error> {
        let mut after: Option<String> = None;
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let batch = self
                .accounts
                .list_known_participants(after.clone(), options.batch_size)
                .await?;
            let Some(last) = batch.last() else {
                return Ok(());
            };
            after = Some(last.puuid.clone());

            for participant in &batch {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                self.update(generation, |state| {
                    state.current_account = Some(CurrentAccount {
                        puuid: participant.puuid.clone(),
                        platform_id: participant.platform_id.clone(),
                    });
                });

                let outcome = self
                    .sync_account(generation, participant, options, context)
                    .await;
                if let CollectionOutcome::Failed(e) = &outcome
                    && e.is_fatal_for_run()
                {
                    return Err(e.clone());
                }

                self.update(generation, |state| {
                    match outcome {
                        CollectionOutcome::Created => state.accounts_created += 1,
                        CollectionOutcome::Updated => state.accounts_updated += 1,
                        CollectionOutcome::Skipped(_) => state.accounts_skipped += 1,
                        CollectionOutcome::Failed(e) => state.last_error = Some(e.to_string()),
                    }
                    state.processed_accounts += 1;
                    state.upstream_calls = context.tally.calls();
                    state.rate_limit_hits = context.tally.rejections();
                });
            }
        }
    }

    async fn sync_account(
        &self,
        generation: u64,
        participant: &KnownParticipant,
        options: SyncOptions,
        context: &RunContext,
    ) -> CollectionOutcome {
        let puuid = participant.puuid.as_str();
        let existing = match self.accounts.find_account(puuid).await {
            Ok(existing) => existing,
            Err(e) => return CollectionOutcome::Failed(e),
        };
        let now = self.clock.now();
        if let Some(account) = &existing
            && account.has_profile()
            && now - account.updated_at < TimeDelta::hours(self.config.freshness_hours)
        {
            return CollectionOutcome::Skipped(SkipReason::Fresh);
        }

        let region = Region::from_platform_id(&participant.platform_id);
        let within_budget =
            context.tally.calls() < u64::from(options.max_upstream_calls_per_cycle);
        if let Some(region) = region
            && within_budget
            && !options.skip_upstream
        {
            match self.details.refresh(puuid, region, context).await {
                Ok((_, outcome)) => return outcome.into(),
                Err(e) if e.is_fatal_for_run() => return CollectionOutcome::Failed(e),
                Err(e) => {
                    tracing::warn!("Writing `{puuid}` without upstream details: {e}");
                    self.update(generation, |state| {
                        state.upstream_errors += 1;
                        state.last_error = Some(e.to_string());
                    });
                }
            }
        }

        let record = match existing {
            Some(mut account) => {
                if account.region.is_none() {
                    account.region = region.map(|r| r.as_str().to_string());
                }
                account
            }
            None => AccountRecord {
                puuid: puuid.to_string(),
                game_name: None,
                tag_line: None,
                region: region.map(|r| r.as_str().to_string()),
                profile_icon_id: None,
                summoner_level: None,
                updated_at: now,
            },
        };
        match self.accounts.upsert_account(record).await {
            Ok(outcome) => outcome.into(),
            Err(e) => CollectionOutcome::Failed(e),
        }
    }
}

impl From<UpsertOutcome> for CollectionOutcome {
    fn from(outcome: UpsertOutcome) -> Self {
        match outcome {
            UpsertOutcome::Created => CollectionOutcome::Created,
            UpsertOutcome::Updated => CollectionOutcome::Updated,
        }
    }
}
