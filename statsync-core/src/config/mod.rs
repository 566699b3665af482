use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorDetails};

pub const AUTH_PRESET: &str = "auth";
pub const API_PRESET: &str = "api";
pub const ADMIN_PRESET: &str = "admin";
pub const STRICT_PRESET: &str = "strict";

/// The upstream's hard cap on ids per match-list page
pub const UPSTREAM_MAX_PAGE_SIZE: u32 = 100;

pub const DEFAULT_API_KEY_ENV_VAR: &str = "STATSYNC_UPSTREAM_API_KEY";
pub const VALKEY_URL_ENV_VAR: &str = "STATSYNC_VALKEY_URL";

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub throttle: ThrottleConfig,
    pub upstream: UpstreamConfig,
    pub collection: CollectionConfig,
    pub account_sync: AccountSyncConfig,
}

impl Config {
    pub fn load_from_path(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: format!("Failed to read config file `{}`: {e}", path.display()),
            })
        })?;
        Self::load_from_str(&contents)
    }

    /// Parses a TOML document, fills in any built-in throttle presets that were not
    /// overridden, and validates the result.
    pub fn load_from_str(contents: &str) -> Result<Self, Error> {
        let mut config: Config = toml::from_str(contents).map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: format!("Failed to parse config file: {e}"),
            })
        })?;
        for (name, preset) in default_presets() {
            config.throttle.presets.entry(name).or_insert(preset);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if let Some(base_path) = &self.gateway.base_path
            && !base_path.starts_with('/')
        {
            return Err(Error::new(ErrorDetails::Config {
                message: format!("[gateway.base_path] must start with a `/` : `{base_path}`"),
            }));
        }
        for (name, preset) in &self.throttle.presets {
            if preset.limit == 0 || preset.window_ms == 0 {
                return Err(Error::new(ErrorDetails::Config {
                    message: format!(
                        "[throttle.presets.{name}] must have a non-zero `limit` and `window_ms`"
                    ),
                }));
            }
        }
        if self.throttle.sweep_interval_ms == 0 {
            return Err(Error::new(ErrorDetails::Config {
                message: "[throttle.sweep_interval_ms] must be non-zero".to_string(),
            }));
        }
        if self.collection.page_size == 0 || self.collection.page_size > UPSTREAM_MAX_PAGE_SIZE {
            return Err(Error::new(ErrorDetails::Config {
                message: format!(
                    "[collection.page_size] must be between 1 and {UPSTREAM_MAX_PAGE_SIZE}"
                ),
            }));
        }
        if self.collection.max_pages == 0 {
            return Err(Error::new(ErrorDetails::Config {
                message: "[collection.max_pages] must be non-zero".to_string(),
            }));
        }
        if self.account_sync.batch_size == 0 || self.account_sync.batch_size > 100 {
            return Err(Error::new(ErrorDetails::Config {
                message: "[account_sync.batch_size] must be between 1 and 100".to_string(),
            }));
        }
        if !self.upstream.base_url_template.contains("{host}") {
            return Err(Error::new(ErrorDetails::Config {
                message: "[upstream.base_url_template] must contain a `{host}` placeholder"
                    .to_string(),
            }));
        }
        Ok(())
    }

    /// Reads the upstream API key from the environment variable named in `[upstream.api_key_env]`.
    pub fn upstream_api_key(&self) -> Option<SecretString> {
        std::env::var(&self.upstream.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    pub bind_address: Option<SocketAddr>,
    pub debug: bool,
    pub base_path: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThrottleConfig {
    pub sweep_interval_ms: u64,
    /// Headers consulted, in order, to find the client address
    pub identity_headers: Vec<String>,
    pub fallback_identity: String,
    pub presets: BTreeMap<String, ThrottlePresetConfig>,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 60_000,
            identity_headers: vec![
                "x-forwarded-for".to_string(),
                "x-real-ip".to_string(),
                "cf-connecting-ip".to_string(),
            ],
            fallback_identity: "unknown".to_string(),
            presets: default_presets(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ThrottlePresetConfig {
    pub limit: u64,
    pub window_ms: u64,
    #[serde(default = "default_throttle_message")]
    pub message: String,
}

fn default_throttle_message() -> String {
    "Too many requests, please try again later".to_string()
}

fn default_presets() -> BTreeMap<String, ThrottlePresetConfig> {
    BTreeMap::from([
        (
            AUTH_PRESET.to_string(),
            ThrottlePresetConfig {
                limit: 5,
                window_ms: 15 * 60 * 1000,
                message: "Too many login attempts, please try again in a few minutes".to_string(),
            },
        ),
        (
            API_PRESET.to_string(),
            ThrottlePresetConfig {
                limit: 100,
                window_ms: 60 * 1000,
                message: "Too many requests, please slow down".to_string(),
            },
        ),
        (
            ADMIN_PRESET.to_string(),
            ThrottlePresetConfig {
                limit: 50,
                window_ms: 60 * 1000,
                message: "Too many requests, please slow down".to_string(),
            },
        ),
        (
            STRICT_PRESET.to_string(),
            ThrottlePresetConfig {
                limit: 10,
                window_ms: 60 * 60 * 1000,
                message: "Request limit reached, please try again later".to_string(),
            },
        ),
    ])
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    /// `{host}` is replaced by the routing partition or platform region
    pub base_url_template: String,
    pub api_key_env: String,
    pub timeout_ms: u64,
    pub min_spacing_ms: u64,
    pub retry_min_spacing_ms: u64,
    pub jitter_max_ms: u64,
    pub default_retry_after_s: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url_template: "https://{host}.api.riotgames.com".to_string(),
            api_key_env: DEFAULT_API_KEY_ENV_VAR.to_string(),
            timeout_ms: 10_000,
            min_spacing_ms: 300,
            retry_min_spacing_ms: 500,
            jitter_max_ms: 50,
            default_retry_after_s: 2,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectionConfig {
    pub default_count: u32,
    pub max_count: u32,
    pub page_size: u32,
    pub max_pages: u32,
    pub run_timeout_ms: Option<u64>,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            default_count: 20,
            max_count: 100,
            page_size: 20,
            max_pages: 10,
            run_timeout_ms: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AccountSyncConfig {
    pub freshness_hours: i64,
    pub batch_size: u32,
    pub max_upstream_calls_per_cycle: u32,
}

impl Default for AccountSyncConfig {
    fn default() -> Self {
        Self {
            freshness_hours: 6,
            batch_size: 20,
            max_upstream_calls_per_cycle: 50,
        }
    }
}
