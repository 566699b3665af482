use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;

use super::{AccountDto, MatchDto, Region, Routing, SummonerDto, UpstreamApi};
use crate::config::UpstreamConfig;
use crate::error::{Error, ErrorDetails};

const API_KEY_HEADER: &str = "X-Riot-Token";
const MAX_ERROR_BODY_CHARS: usize = 512;

/// HTTP client for the upstream API. Every call is bounded by `timeout_ms`.
#[derive(Clone)]
pub struct RiotUpstream {
    client: reqwest::Client,
    api_key: Option<SecretString>,
    api_key_env: String,
    base_url_template: String,
    timeout: Duration,
}

impl RiotUpstream {
    pub fn new(config: &UpstreamConfig, api_key: Option<SecretString>) -> Result<Self, Error> {
        let client = reqwest::Client::builder().build().map_err(|e| {
            Error::new(ErrorDetails::InternalError {
                message: format!("Failed to build upstream HTTP client: {e}"),
            })
        })?;
        Ok(Self {
            client,
            api_key,
            api_key_env: config.api_key_env.clone(),
            base_url_template: config.base_url_template.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
        })
    }

    /// Appends `segments` to the base URL for `host`. Each segment is percent-encoded on its own,
    /// so an id can never add path segments or a query.
    fn url(&self, host: &str, segments: &[&str]) -> Result<Url, Error> {
        let base = self.base_url_template.replace("{host}", host);
        let mut url = Url::parse(&base).map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: format!("Invalid upstream base URL `{base}`: {e}"),
            })
        })?;
        url.path_segments_mut()
            .map_err(|()| {
                Error::new(ErrorDetails::Config {
                    message: format!("Upstream base URL `{base}` cannot carry a path"),
                })
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn api_key(&self) -> Result<&SecretString, Error> {
        self.api_key.as_ref().ok_or_else(|| {
            Error::new(ErrorDetails::ApiKeyMissing {
                env_var: self.api_key_env.clone(),
            })
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, partition: &str, url: Url) -> Result<T, Error> {
        let api_key = self.api_key()?;
        let path = url.path().to_string();
        metrics::counter!("statsync_upstream_requests_total", "partition" => partition.to_string())
            .increment(1);

        let response = self
            .client
            .get(url)
            .header(API_KEY_HEADER, api_key.expose_secret())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(partition, &e))?;

        let status = response.status();
        if status.is_success() {
            let raw_response = response
                .text()
                .await
                .map_err(|e| self.transport_error(partition, &e))?;
            return serde_json::from_str(&raw_response).map_err(|e| {
                Error::new(ErrorDetails::UpstreamResponse {
                    partition: partition.to_string(),
                    message: format!("Error parsing JSON response from `{path}`: {e}"),
                })
            });
        }

        let retry_after_secs = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();
        Err(handle_upstream_error(
            partition,
            &path,
            status,
            retry_after_secs,
            &body,
        ))
    }

    fn transport_error(&self, partition: &str, error: &reqwest::Error) -> Error {
        if error.is_timeout() {
            Error::new(ErrorDetails::UpstreamTimeout {
                partition: partition.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            })
        } else {
            Error::new(ErrorDetails::UpstreamUnavailable {
                partition: partition.to_string(),
                message: error.to_string(),
            })
        }
    }
}

fn handle_upstream_error(
    partition: &str,
    path: &str,
    status: StatusCode,
    retry_after_secs: Option<u64>,
    body: &str,
) -> Error {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ErrorDetails::UpstreamRejected {
            partition: partition.to_string(),
            retry_after_secs,
        }
        .into(),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorDetails::UpstreamUnauthorized {
            partition: partition.to_string(),
            status: status.as_u16(),
        }
        .into(),
        StatusCode::NOT_FOUND => ErrorDetails::UpstreamNotFound {
            partition: partition.to_string(),
            path: path.to_string(),
        }
        .into(),
        _ => ErrorDetails::UpstreamServer {
            partition: partition.to_string(),
            status: status.as_u16(),
            message: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
        }
        .into(),
    }
}

#[async_trait]
impl UpstreamApi for RiotUpstream {
    async fn list_match_ids(
        &self,
        routing: Routing,
        puuid: &str,
        start: u32,
        count: u32,
    ) -> Result<Vec<String>, Error> {
        let partition = routing.as_str();
        let mut url = self.url(
            partition,
            &["lol", "match", "v5", "matches", "by-puuid", puuid, "ids"],
        )?;
        url.query_pairs_mut()
            .append_pair("start", &start.to_string())
            .append_pair("count", &count.to_string());
        self.get_json(partition, url).await
    }

    async fn get_match(&self, routing: Routing, match_id: &str) -> Result<MatchDto, Error> {
        let partition = routing.as_str();
        let url = self.url(partition, &["lol", "match", "v5", "matches", match_id])?;
        self.get_json(partition, url).await
    }

    async fn get_account(&self, routing: Routing, puuid: &str) -> Result<AccountDto, Error> {
        let partition = routing.as_str();
        let url = self.url(
            partition,
            &["riot", "account", "v1", "accounts", "by-puuid", puuid],
        )?;
        self.get_json(partition, url).await
    }

    async fn get_summoner(&self, region: Region, puuid: &str) -> Result<SummonerDto, Error> {
        let partition = region.as_str();
        let url = self.url(
            partition,
            &["lol", "summoner", "v4", "summoners", "by-puuid", puuid],
        )?;
        self.get_json(partition, url).await
    }

    fn ensure_credentials(&self) -> Result<(), Error> {
        self.api_key().map(|_| ())
    }
}
