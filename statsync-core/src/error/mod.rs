use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

pub const IMPOSSIBLE_ERROR_MESSAGE: &str =
    "This should never happen, please file a bug report with the statsync maintainers";

#[derive(Clone, Debug, Error, Serialize)]
#[cfg_attr(test, derive(PartialEq))]
#[error(transparent)]
// As long as the struct member is private, we force people to use the `new` method and log the error.
// We arc `ErrorDetails` per the `clippy::result_large_err` lint, as well as to make it cloneable
pub struct Error(Arc<ErrorDetails>);

impl Error {
    pub fn new(details: ErrorDetails) -> Self {
        details.log();
        Error(Arc::new(details))
    }

    pub fn status_code(&self) -> StatusCode {
        self.0.status_code()
    }

    pub fn get_details(&self) -> &ErrorDetails {
        &self.0
    }

    pub fn log(&self) {
        self.0.log();
    }

    pub fn log_at_level(&self, prefix: &str, level: tracing::Level) {
        self.0.log_at_level(prefix, level);
    }

    /// Whether the upstream asked us to back off (and retry once).
    pub fn is_upstream_rejection(&self) -> bool {
        matches!(*self.0, ErrorDetails::UpstreamRejected { .. })
    }

    /// Errors which must abort a whole collection run instead of a single item.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(
            *self.0,
            ErrorDetails::UpstreamUnauthorized { .. } | ErrorDetails::ApiKeyMissing { .. }
        )
    }
}

impl From<ErrorDetails> for Error {
    fn from(details: ErrorDetails) -> Self {
        Error::new(details)
    }
}

#[derive(Debug, Error, Serialize, PartialEq)]
pub enum ErrorDetails {
    ApiKeyMissing {
        env_var: String,
    },
    Config {
        message: String,
    },
    InternalError {
        message: String,
    },
    InvalidRegion {
        region: String,
    },
    InvalidRequest {
        message: String,
    },
    JsonRequest {
        message: String,
    },
    Observability {
        message: String,
    },
    RouteNotFound {
        path: String,
        method: String,
    },
    RunDeadlineExceeded {
        timeout_ms: u64,
    },
    Serialization {
        message: String,
    },
    SyncAlreadyRunning,
    ThrottleStore {
        message: String,
    },
    UpstreamNotFound {
        partition: String,
        path: String,
    },
    UpstreamRejected {
        partition: String,
        retry_after_secs: Option<u64>,
    },
    UpstreamResponse {
        partition: String,
        message: String,
    },
    UpstreamServer {
        partition: String,
        status: u16,
        message: String,
    },
    UpstreamTimeout {
        partition: String,
        timeout_ms: u64,
    },
    UpstreamUnauthorized {
        partition: String,
        status: u16,
    },
    UpstreamUnavailable {
        partition: String,
        message: String,
    },
    ValkeyConnection {
        message: String,
    },
    ValkeyQuery {
        message: String,
    },
}

impl ErrorDetails {
    /// Defines the error level for logging this error
    fn level(&self) -> tracing::Level {
        match self {
            ErrorDetails::ApiKeyMissing { .. } => tracing::Level::ERROR,
            ErrorDetails::Config { .. } => tracing::Level::ERROR,
            ErrorDetails::InternalError { .. } => tracing::Level::ERROR,
            ErrorDetails::InvalidRegion { .. } => tracing::Level::WARN,
            ErrorDetails::InvalidRequest { .. } => tracing::Level::WARN,
            ErrorDetails::JsonRequest { .. } => tracing::Level::WARN,
            ErrorDetails::Observability { .. } => tracing::Level::ERROR,
            ErrorDetails::RouteNotFound { .. } => tracing::Level::WARN,
            ErrorDetails::RunDeadlineExceeded { .. } => tracing::Level::WARN,
            ErrorDetails::Serialization { .. } => tracing::Level::ERROR,
            ErrorDetails::SyncAlreadyRunning => tracing::Level::WARN,
            ErrorDetails::ThrottleStore { .. } => tracing::Level::WARN,
            // A 404 on a list endpoint is how the upstream signals exhaustion
            ErrorDetails::UpstreamNotFound { .. } => tracing::Level::DEBUG,
            ErrorDetails::UpstreamRejected { .. } => tracing::Level::WARN,
            ErrorDetails::UpstreamResponse { .. } => tracing::Level::ERROR,
            ErrorDetails::UpstreamServer { .. } => tracing::Level::ERROR,
            ErrorDetails::UpstreamTimeout { .. } => tracing::Level::WARN,
            ErrorDetails::UpstreamUnauthorized { .. } => tracing::Level::ERROR,
            ErrorDetails::UpstreamUnavailable { .. } => tracing::Level::ERROR,
            ErrorDetails::ValkeyConnection { .. } => tracing::Level::ERROR,
            ErrorDetails::ValkeyQuery { .. } => tracing::Level::ERROR,
        }
    }

    /// Defines the HTTP status code for responses involving this error
    fn status_code(&self) -> StatusCode {
        match self {
            ErrorDetails::ApiKeyMissing { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::InvalidRegion { .. } => StatusCode::BAD_REQUEST,
            ErrorDetails::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ErrorDetails::JsonRequest { .. } => StatusCode::BAD_REQUEST,
            ErrorDetails::Observability { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            ErrorDetails::RunDeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
            ErrorDetails::Serialization { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::SyncAlreadyRunning => StatusCode::CONFLICT,
            ErrorDetails::ThrottleStore { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::UpstreamNotFound { .. } => StatusCode::NOT_FOUND,
            ErrorDetails::UpstreamRejected { .. } => StatusCode::TOO_MANY_REQUESTS,
            ErrorDetails::UpstreamResponse { .. } => StatusCode::BAD_GATEWAY,
            ErrorDetails::UpstreamServer { .. } => StatusCode::BAD_GATEWAY,
            ErrorDetails::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ErrorDetails::UpstreamUnauthorized { .. } => StatusCode::BAD_GATEWAY,
            ErrorDetails::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            ErrorDetails::ValkeyConnection { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::ValkeyQuery { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn log_at_level(&self, prefix: &str, level: tracing::Level) {
        match level {
            tracing::Level::ERROR => tracing::error!("{prefix}{self}"),
            tracing::Level::WARN => tracing::warn!("{prefix}{self}"),
            tracing::Level::INFO => tracing::info!("{prefix}{self}"),
            tracing::Level::DEBUG => tracing::debug!("{prefix}{self}"),
            tracing::Level::TRACE => tracing::trace!("{prefix}{self}"),
        }
    }

    /// Log the error using the `tracing` library
    pub fn log(&self) {
        self.log_at_level("", self.level());
    }
}

impl std::fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorDetails::ApiKeyMissing { env_var } => {
                write!(
                    f,
                    "No upstream API key configured. Set the `{env_var}` environment variable."
                )
            }
            ErrorDetails::Config { message } => write!(f, "{message}"),
            ErrorDetails::InternalError { message } => write!(f, "{message}"),
            ErrorDetails::InvalidRegion { region } => {
                write!(f, "Unknown region: `{region}`")
            }
            ErrorDetails::InvalidRequest { message } => write!(f, "{message}"),
            ErrorDetails::JsonRequest { message } => write!(f, "{message}"),
            ErrorDetails::Observability { message } => write!(f, "{message}"),
            ErrorDetails::RouteNotFound { path, method } => {
                write!(f, "Route not found: {method} {path}")
            }
            ErrorDetails::RunDeadlineExceeded { timeout_ms } => {
                write!(f, "Collection run exceeded its {timeout_ms}ms deadline")
            }
            ErrorDetails::Serialization { message } => write!(f, "{message}"),
            ErrorDetails::SyncAlreadyRunning => write!(f, "Account sync is already running"),
            ErrorDetails::ThrottleStore { message } => {
                write!(f, "Throttle store error: {message}")
            }
            ErrorDetails::UpstreamNotFound { partition, path } => {
                write!(f, "Upstream `{partition}` returned not found for `{path}`")
            }
            ErrorDetails::UpstreamRejected {
                partition,
                retry_after_secs,
            } => match retry_after_secs {
                Some(secs) => write!(
                    f,
                    "Upstream `{partition}` rejected the request (retry after {secs}s)"
                ),
                None => write!(f, "Upstream `{partition}` rejected the request"),
            },
            ErrorDetails::UpstreamResponse { partition, message } => {
                write!(
                    f,
                    "Error parsing response from upstream `{partition}`: {message}"
                )
            }
            ErrorDetails::UpstreamServer {
                partition,
                status,
                message,
            } => {
                write!(
                    f,
                    "Upstream `{partition}` returned status {status}: {message}"
                )
            }
            ErrorDetails::UpstreamTimeout {
                partition,
                timeout_ms,
            } => {
                write!(
                    f,
                    "Request to upstream `{partition}` timed out after {timeout_ms}ms"
                )
            }
            ErrorDetails::UpstreamUnauthorized { partition, status } => {
                write!(
                    f,
                    "Upstream `{partition}` rejected our credentials (status {status}). Check the upstream API key."
                )
            }
            ErrorDetails::UpstreamUnavailable { partition, message } => {
                write!(f, "Error sending request to upstream `{partition}`: {message}")
            }
            ErrorDetails::ValkeyConnection { message } => {
                write!(f, "Error connecting to Valkey: {message}")
            }
            ErrorDetails::ValkeyQuery { message } => {
                write!(f, "Failed to run Valkey query: {message}")
            }
        }
    }
}

impl IntoResponse for Error {
    /// Log the error and convert it into an Axum response
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.to_string(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorDetails::Serialization {
            message: err.to_string(),
        })
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Self::new(ErrorDetails::ValkeyQuery {
            message: err.to_string(),
        })
    }
}
