//! Account details: the persisted copy when we have one, the upstream otherwise.
//!
//! Used by the `/riot/account-details` endpoint and called directly by the account sync job.

use std::sync::Arc;

use crate::clock::Clock;
use crate::collection::{RunContext, UpstreamGate};
use crate::db::{AccountQueries, AccountRecord, UpsertOutcome};
use crate::error::Error;
use crate::upstream::{Region, UpstreamApi};

#[derive(Clone, Debug, PartialEq)]
pub struct AccountDetails {
    pub record: AccountRecord,
    /// Served from persistence without calling the upstream
    pub cached: bool,
}

pub struct AccountDetailsService {
    upstream: Arc<dyn UpstreamApi>,
    accounts: Arc<dyn AccountQueries>,
    gate: UpstreamGate,
    clock: Arc<dyn Clock>,
}

impl AccountDetailsService {
    pub fn new(
        upstream: Arc<dyn UpstreamApi>,
        accounts: Arc<dyn AccountQueries>,
        gate: UpstreamGate,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            upstream,
            accounts,
            gate,
            clock,
        }
    }

    pub async fn get(
        &self,
        puuid: &str,
        region: Region,
        force: bool,
    ) -> Result<AccountDetails, Error> {
        if !force && let Some(record) = self.accounts.find_account(puuid).await? {
            return Ok(AccountDetails {
                record,
                cached: true,
            });
        }
        let context = RunContext::new(None);
        let (record, _) = self.refresh(puuid, region, &context).await?;
        Ok(AccountDetails {
            record,
            cached: false,
        })
    }

    /// Fetches the account (routing partition) and summoner (platform partition) from the
    /// upstream and persists them. A summoner failure is tolerated unless it is fatal.
    pub async fn refresh(
        &self,
        puuid: &str,
        region: Region,
        context: &RunContext,
    ) -> Result<(AccountRecord, UpsertOutcome), Error> {
        self.upstream.ensure_credentials()?;
        let routing = region.routing();

        let account = self
            .gate
            .call(routing.as_str(), context, || {
                self.upstream.get_account(routing, puuid)
            })
            .await?;

        let summoner = match self
            .gate
            .call(region.as_str(), context, || {
                self.upstream.get_summoner(region, puuid)
            })
            .await
        {
            Ok(summoner) => Some(summoner),
            Err(e) if e.is_fatal_for_run() => return Err(e),
            Err(e) => {
                tracing::warn!("Continuing without summoner details for `{puuid}`: {e}");
                None
            }
        };

        let record = AccountRecord {
            puuid: puuid.to_string(),
            game_name: account.game_name,
            tag_line: account.tag_line,
            region: Some(region.as_str().to_string()),
            profile_icon_id: summoner.as_ref().map(|s| s.profile_icon_id),
            summoner_level: summoner.as_ref().map(|s| s.summoner_level),
            updated_at: self.clock.now(),
        };
        let outcome = self.accounts.upsert_account(record.clone()).await?;
        Ok((record, outcome))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::UpstreamConfig;
    use crate::db::in_memory::InMemoryDatabase;
    use crate::error::ErrorDetails;
    use crate::scheduler::PermitScheduler;
    use crate::upstream::{AccountDto, MockUpstreamApi, Routing, SummonerDto};

    fn service(upstream: MockUpstreamApi, db: Arc<InMemoryDatabase>) -> AccountDetailsService {
        let gate = UpstreamGate::new(
            Arc::new(PermitScheduler::new(Duration::ZERO)),
            &UpstreamConfig::default(),
        );
        AccountDetailsService::new(
            Arc::new(upstream),
            db,
            gate,
            Arc::new(ManualClock::new(Utc::now())),
        )
    }

    fn upstream_with_account() -> MockUpstreamApi {
        let mut upstream = MockUpstreamApi::new();
        upstream.expect_ensure_credentials().returning(|| Ok(()));
        upstream.expect_get_account().returning(|routing, puuid| {
            assert_eq!(routing, Routing::Asia);
            let dto = AccountDto {
                puuid: puuid.to_string(),
                game_name: Some("Faker".to_string()),
                tag_line: Some("KR1".to_string()),
            };
            Box::pin(async move { Ok(dto) })
        });
        upstream
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_then_serves_from_cache() {
        let mut upstream = upstream_with_account();
        upstream
            .expect_get_summoner()
            .times(1)
            .returning(|region, _| {
                assert_eq!(region, Region::Kr);
                Box::pin(async move {
                    Ok(SummonerDto {
                        profile_icon_id: 6,
                        summoner_level: 700,
                    })
                })
            });
        let db = Arc::new(InMemoryDatabase::new());
        let service = service(upstream, db);

        let fetched = service.get("p1", Region::Kr, false).await.unwrap();
        assert!(!fetched.cached);
        assert_eq!(fetched.record.game_name.as_deref(), Some("Faker"));
        assert_eq!(fetched.record.summoner_level, Some(700));

        let cached = service.get("p1", Region::Kr, false).await.unwrap();
        assert!(cached.cached);
        assert_eq!(cached.record, fetched.record);
    }

    #[tokio::test(start_paused = true)]
    async fn test_summoner_failure_is_tolerated() {
        let mut upstream = upstream_with_account();
        upstream.expect_get_summoner().returning(|_, _| {
            Box::pin(async move {
                Err(Error::new(ErrorDetails::UpstreamServer {
                    partition: "kr".to_string(),
                    status: 500,
                    message: String::new(),
                }))
            })
        });
        let service = service(upstream, Arc::new(InMemoryDatabase::new()));

        let fetched = service.get("p1", Region::Kr, true).await.unwrap();
        assert_eq!(fetched.record.tag_line.as_deref(), Some("KR1"));
        assert_eq!(fetched.record.profile_icon_id, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_account_not_found_propagates() {
        let mut upstream = MockUpstreamApi::new();
        upstream.expect_ensure_credentials().returning(|| Ok(()));
        upstream.expect_get_account().returning(|_, _| {
            Box::pin(async move {
                Err(Error::new(ErrorDetails::UpstreamNotFound {
                    partition: "asia".to_string(),
                    path: "/riot/account/v1/accounts/by-puuid/p1".to_string(),
                }))
            })
        });
        upstream.expect_get_summoner().never();
        let service = service(upstream, Arc::new(InMemoryDatabase::new()));

        let err = service.get("p1", Region::Kr, false).await.unwrap_err();
        assert!(matches!(
            err.get_details(),
            ErrorDetails::UpstreamNotFound { .. }
        ));
    }
}
