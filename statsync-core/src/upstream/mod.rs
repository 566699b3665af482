//! The rate-limited game-statistics API we harvest from.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

use crate::error::{Error, ErrorDetails};

pub mod regions;
mod riot;

pub use regions::{Region, Routing};
pub use riot::RiotUpstream;

#[async_trait]
#[cfg_attr(test, automock)]
pub trait UpstreamApi: Send + Sync {
    /// One page of match ids for `puuid`, newest first.
    async fn list_match_ids(
        &self,
        routing: Routing,
        puuid: &str,
        start: u32,
        count: u32,
    ) -> Result<Vec<String>, Error>;

    async fn get_match(&self, routing: Routing, match_id: &str) -> Result<MatchDto, Error>;

    async fn get_account(&self, routing: Routing, puuid: &str) -> Result<AccountDto, Error>;

    async fn get_summoner(&self, region: Region, puuid: &str) -> Result<SummonerDto, Error>;

    /// Fails with `ApiKeyMissing` when no credential is configured.
    fn ensure_credentials(&self) -> Result<(), Error>;
}

/// Trims a client-supplied player id and rejects anything outside `[A-Za-z0-9_-]`.
pub fn parse_puuid(raw: &str) -> Result<&str, Error> {
    let puuid = raw.trim();
    if puuid.is_empty() {
        return Err(Error::new(ErrorDetails::InvalidRequest {
            message: "`puuid` must not be empty".to_string(),
        }));
    }
    if !puuid
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::new(ErrorDetails::InvalidRequest {
            message: "`puuid` may only contain ASCII letters, digits, `-` and `_`".to_string(),
        }));
    }
    Ok(puuid)
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchDto {
    pub metadata: MatchMetadataDto,
    pub info: MatchInfoDto,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchMetadataDto {
    pub match_id: String,
    #[serde(default)]
    pub participants: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchInfoDto {
    pub platform_id: String,
    #[serde(default)]
    pub queue_id: i64,
    #[serde(default)]
    pub game_duration: i64,
    /// Epoch millis
    #[serde(default)]
    pub game_creation: Option<i64>,
    #[serde(default)]
    pub participants: Vec<ParticipantDto>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantDto {
    pub puuid: String,
    #[serde(default)]
    pub champion_name: String,
    #[serde(default)]
    pub team_id: i64,
    #[serde(default)]
    pub win: bool,
    #[serde(default)]
    pub kills: i64,
    #[serde(default)]
    pub deaths: i64,
    #[serde(default)]
    pub assists: i64,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDto {
    pub puuid: String,
    pub game_name: Option<String>,
    pub tag_line: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummonerDto {
    pub profile_icon_id: i64,
    pub summoner_level: i64,
}
