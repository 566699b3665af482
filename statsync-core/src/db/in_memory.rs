//! Process-local persistence for matches and accounts.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::db::{
    AccountQueries, AccountRecord, KnownParticipant, MatchQueries, MatchRecord, ParticipantRecord,
    StoredMatchState, UpsertOutcome,
};
use crate::error::{Error, ErrorDetails};

#[derive(Debug, Default)]
pub struct InMemoryDatabase {
    matches: DashMap<String, MatchRecord>,
    accounts: DashMap<String, AccountRecord>,
    /// puuid -> platform id of the most recent match it appeared in
    participants: Mutex<BTreeMap<String, String>>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a match row without its participants, as a partially-written match would be.
    pub fn insert_match_without_participants(&self, mut record: MatchRecord) {
        record.participants.clear();
        self.matches.insert(record.match_id.clone(), record);
    }

    pub fn get_match(&self, match_id: &str) -> Option<MatchRecord> {
        self.matches.get(match_id).map(|m| m.clone())
    }

    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    fn record_participants(
        &self,
        platform_id: &str,
        participants: &[ParticipantRecord],
    ) -> Result<(), Error> {
        let mut known = self.participants.lock().map_err(|e| {
            Error::new(ErrorDetails::InternalError {
                message: format!("Participant index lock poisoned: {e}"),
            })
        })?;
        for participant in participants {
            known.insert(participant.puuid.clone(), platform_id.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl MatchQueries for InMemoryDatabase {
    async fn get_match_state(&self, match_id: &str) -> Result<Option<StoredMatchState>, Error> {
        Ok(self.matches.get(match_id).map(|m| {
            if m.participants.is_empty() {
                StoredMatchState::MissingParticipants
            } else {
                StoredMatchState::Complete
            }
        }))
    }

    async fn insert_match(&self, record: MatchRecord) -> Result<(), Error> {
        self.record_participants(&record.platform_id, &record.participants)?;
        self.matches.insert(record.match_id.clone(), record);
        Ok(())
    }

    async fn backfill_participants(
        &self,
        match_id: &str,
        participants: Vec<ParticipantRecord>,
    ) -> Result<(), Error> {
        let platform_id = {
            let mut stored = self.matches.get_mut(match_id).ok_or_else(|| {
                Error::new(ErrorDetails::InvalidRequest {
                    message: format!("Cannot backfill unknown match `{match_id}`"),
                })
            })?;
            stored.participants.clone_from(&participants);
            stored.platform_id.clone()
        };
        self.record_participants(&platform_id, &participants)
    }
}

#[async_trait]
impl AccountQueries for InMemoryDatabase {
    async fn count_known_participants(&self) -> Result<u64, Error> {
        let known = self.participants.lock().map_err(|e| {
            Error::new(ErrorDetails::InternalError {
                message: format!("Participant index lock poisoned: {e}"),
            })
        })?;
        Ok(known.len() as u64)
    }

    async fn list_known_participants(
        &self,
        after: Option<String>,
        limit: u32,
    ) -> Result<Vec<KnownParticipant>, Error> {
        let known = self.participants.lock().map_err(|e| {
            Error::new(ErrorDetails::InternalError {
                message: format!("Participant index lock poisoned: {e}"),
            })
        })?;
        let lower = match &after {
            Some(after) => Bound::Excluded(after.clone()),
            None => Bound::Unbounded,
        };
        Ok(known
            .range((lower, Bound::Unbounded))
            .take(limit as usize)
            .map(|(puuid, platform_id)| KnownParticipant {
                puuid: puuid.clone(),
                platform_id: platform_id.clone(),
            })
            .collect())
    }

    async fn find_account(&self, puuid: &str) -> Result<Option<AccountRecord>, Error> {
        Ok(self.accounts.get(puuid).map(|a| a.clone()))
    }

    async fn upsert_account(&self, record: AccountRecord) -> Result<UpsertOutcome, Error> {
        match self.accounts.insert(record.puuid.clone(), record) {
            Some(_) => Ok(UpsertOutcome::Updated),
            None => Ok(UpsertOutcome::Created),
        }
    }
}
