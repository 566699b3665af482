use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

use crate::error::Error;

pub mod in_memory;
pub mod throttle;
pub mod valkey;

/// What persistence already knows about a match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoredMatchState {
    Complete,
    /// The match row exists but its participant rows were never written
    MissingParticipants,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MatchRecord {
    pub match_id: String,
    /// Upstream platform id, e.g. `EUW1`
    pub platform_id: String,
    pub queue_id: i64,
    pub game_duration_secs: i64,
    pub game_creation: Option<DateTime<Utc>>,
    pub participants: Vec<ParticipantRecord>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ParticipantRecord {
    pub puuid: String,
    pub champion_name: String,
    pub team_id: i64,
    pub win: bool,
    pub kills: i64,
    pub deaths: i64,
    pub assists: i64,
}

#[async_trait]
#[cfg_attr(test, automock)]
pub trait MatchQueries: Send + Sync {
    async fn get_match_state(&self, match_id: &str) -> Result<Option<StoredMatchState>, Error>;

    async fn insert_match(&self, record: MatchRecord) -> Result<(), Error>;

    /// Writes only the participant rows of an already-stored match.
    async fn backfill_participants(
        &self,
        match_id: &str,
        participants: Vec<ParticipantRecord>,
    ) -> Result<(), Error>;
}

/// A participant id seen in at least one stored match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KnownParticipant {
    pub puuid: String,
    pub platform_id: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    pub puuid: String,
    pub game_name: Option<String>,
    pub tag_line: Option<String>,
    pub region: Option<String>,
    pub profile_icon_id: Option<i64>,
    pub summoner_level: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl AccountRecord {
    pub fn has_profile(&self) -> bool {
        self.game_name.is_some() || self.tag_line.is_some() || self.profile_icon_id.is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

#[async_trait]
#[cfg_attr(test, automock)]
pub trait AccountQueries: Send + Sync {
    async fn count_known_participants(&self) -> Result<u64, Error>;

    /// Distinct participant ids ordered ascending, strictly after `after`.
    async fn list_known_participants(
        &self,
        after: Option<String>,
        limit: u32,
    ) -> Result<Vec<KnownParticipant>, Error>;

    async fn find_account(&self, puuid: &str) -> Result<Option<AccountRecord>, Error>;

    async fn upsert_account(&self, record: AccountRecord) -> Result<UpsertOutcome, Error>;
}
