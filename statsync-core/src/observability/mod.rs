//! Logging and metrics setup for the gateway.

use clap::ValueEnum;
use metrics::{Unit, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::{Error, ErrorDetails};

#[derive(Clone, Debug, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

pub struct DelayedDebugLogs {
    enable_cb: Box<dyn FnOnce() -> Result<(), Error> + Send + Sync>,
}

impl DelayedDebugLogs {
    pub fn enable_debug(self) -> Result<(), Error> {
        (self.enable_cb)()
    }
}

/// Returned by [`setup_observability`] so the log level can follow `gateway.debug`
/// once the config file has been parsed.
pub struct ObservabilityHandle {
    pub delayed_debug_logs: DelayedDebugLogs,
}

/// This is used when `gateway.debug` is `false` and `RUST_LOG` is not set
const DEFAULT_GATEWAY_NON_DEBUG_DIRECTIVES: &str = "warn,gateway=info,statsync_core=info";
/// This is used when `gateway.debug` is `true` and `RUST_LOG` is not set
const DEFAULT_GATEWAY_DEBUG_DIRECTIVES: &str =
    "warn,gateway=debug,statsync_core=debug,tower_http::trace=debug";

/// Set up logging.
///
/// The priority for our logging configuration is:
/// 1. If `RUST_LOG` is set, use it verbatim, ignoring everything else
/// 2. If `gateway.debug` is set in the config file, use `DEFAULT_GATEWAY_DEBUG_DIRECTIVES`
/// 3. Otherwise, use `DEFAULT_GATEWAY_NON_DEBUG_DIRECTIVES`
///
/// We start with the non-debug directives and switch to the debug ones through
/// [`DelayedDebugLogs`], so warnings emitted while parsing the config file are still shown.
pub fn setup_observability(log_format: LogFormat) -> Result<ObservabilityHandle, Error> {
    let env_var_name = "RUST_LOG";
    let has_env_var = std::env::var(env_var_name).is_ok();

    let default_debug_filter = EnvFilter::builder()
        .parse(DEFAULT_GATEWAY_DEBUG_DIRECTIVES)
        .map_err(|e| {
            Error::new(ErrorDetails::InternalError {
                message: format!(
                    "Failed to parse internal debug directives - this should never happen: {e}"
                ),
            })
        })?;

    let base_filter = if has_env_var {
        EnvFilter::builder()
            .with_env_var(env_var_name)
            .from_env()
            .map_err(|e| {
                Error::new(ErrorDetails::Observability {
                    message: format!("Invalid `{env_var_name}` environment variable: {e}"),
                })
            })?
    } else {
        EnvFilter::builder()
            .parse(DEFAULT_GATEWAY_NON_DEBUG_DIRECTIVES)
            .map_err(|e| {
                Error::new(ErrorDetails::InternalError {
                    message: format!("Failed to parse internal non-debug directives - this should never happen: {e}"),
                })
            })?
    };

    let (log_level, update_log_level) = tracing_subscriber::reload::Layer::new(base_filter);

    let log_layer = match log_format {
        LogFormat::Pretty => {
            Box::new(tracing_subscriber::fmt::layer()) as Box<dyn Layer<_> + Send + Sync>
        }
        LogFormat::Json => Box::new(tracing_subscriber::fmt::layer().json()),
    };

    tracing_subscriber::registry()
        .with(log_layer.with_filter(log_level))
        .try_init()
        .map_err(|e| {
            Error::new(ErrorDetails::Observability {
                message: format!("Failed to install tracing subscriber: {e}"),
            })
        })?;

    // `RUST_LOG` takes precedence over `gateway.debug`
    let delayed_debug_logs = if has_env_var {
        DelayedDebugLogs {
            enable_cb: Box::new(|| Ok(())),
        }
    } else {
        DelayedDebugLogs {
            enable_cb: Box::new(move || {
                update_log_level
                    .modify(move |l| {
                        *l = default_debug_filter;
                    })
                    .map_err(|e| {
                        Error::new(ErrorDetails::Observability {
                            message: format!("Failed to update log level: {e}"),
                        })
                    })
            }),
        }
    };
    Ok(ObservabilityHandle { delayed_debug_logs })
}

/// Set up Prometheus metrics exporter
pub fn setup_metrics() -> Result<PrometheusHandle, Error> {
    let metrics_handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
        Error::new(ErrorDetails::Observability {
            message: format!("Failed to install Prometheus exporter: {e}"),
        })
    })?;
    describe_metrics();
    Ok(metrics_handle)
}

/// Register the expected metrics along with their types and docstrings
pub fn describe_metrics() {
    describe_counter!(
        "statsync_requests_total",
        Unit::Count,
        "Requests handled by the gateway",
    );

    describe_counter!(
        "statsync_throttle_rejections_total",
        Unit::Count,
        "Inbound requests rejected by a throttle preset",
    );

    describe_counter!(
        "statsync_throttle_store_fallbacks_total",
        Unit::Count,
        "Times the throttle store degraded from Valkey to process memory",
    );

    describe_counter!(
        "statsync_upstream_requests_total",
        Unit::Count,
        "Requests sent to the upstream, by partition",
    );

    describe_counter!(
        "statsync_upstream_rejections_total",
        Unit::Count,
        "Upstream rate-limit rejections",
    );

    describe_counter!(
        "statsync_collected_items_total",
        Unit::Count,
        "Items handled by collection runs, by outcome",
    );
}
