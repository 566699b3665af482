use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::db::AccountRecord;
use crate::error::Error;
use crate::upstream::{Region, parse_puuid};
use crate::utils::gateway::{AppState, AppStateData, StructuredJson};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountDetailsParams {
    pub puuid: String,
    pub region: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDetailsResponse {
    #[serde(flatten)]
    pub account: AccountRecord,
    pub cached: bool,
}

/// Returns the stored account, or fetches it from the upstream when missing or `force` is set.
pub async fn account_details_handler(
    State(AppStateData {
        account_details, ..
    }): AppState,
    StructuredJson(params): StructuredJson<AccountDetailsParams>,
) -> Result<Json<AccountDetailsResponse>, Error> {
    metrics::counter!("statsync_requests_total", "endpoint" => "account_details").increment(1);
    let puuid = parse_puuid(&params.puuid)?;
    let region: Region = params.region.parse()?;
    let details = account_details.get(puuid, region, params.force).await?;
    Ok(Json(AccountDetailsResponse {
        account: details.record,
        cached: details.cached,
    }))
}
