//! Valkey (Redis-compatible) backend for the inbound throttle.
//!
//! Counters are stored as JSON records with a TTL equal to the window. Increments run
//! inside a server-side function so the count and the remaining TTL change atomically;
//! the function library is loaded on the first increment of each process.

use std::time::Duration;

use async_trait::async_trait;
use redis::Client;
use redis::aio::{ConnectionLike, ConnectionManager};
use tokio::sync::OnceCell;

use crate::db::throttle::{ThrottleRecord, ThrottleStore};
use crate::error::{Error, ErrorDetails};

const FUNCTION_LIBRARY: &str = include_str!("lua/statsync_throttle.lua");
// Must match the function registered in `lua/statsync_throttle.lua`
const INCREMENT_FUNCTION: &str = "statsync_throttle_increment_v1";
const PING_TIMEOUT: Duration = Duration::from_secs(1);

pub struct ValkeyThrottleStore {
    /// Reconnects on its own; cloned per command.
    connection: ConnectionManager,
    library_loaded: OnceCell<()>,
}

impl ValkeyThrottleStore {
    pub async fn connect(valkey_url: &str) -> Result<Self, Error> {
        let client = Client::open(valkey_url).map_err(|e| {
            Error::new(ErrorDetails::ValkeyConnection {
                message: format!("Invalid Valkey URL: {e}"),
            })
        })?;
        let connection = ConnectionManager::new(client).await.map_err(|e| {
            Error::new(ErrorDetails::ValkeyConnection {
                message: format!("Failed to connect to Valkey: {e}"),
            })
        })?;
        Ok(Self {
            connection,
            library_loaded: OnceCell::new(),
        })
    }

    async fn ensure_library(&self) -> Result<(), Error> {
        self.library_loaded
            .get_or_try_init(|| async {
                let mut conn = self.connection.clone();
                execute_load_library(&mut conn).await
            })
            .await?;
        Ok(())
    }
}

async fn execute_load_library<C: ConnectionLike>(conn: &mut C) -> Result<(), Error> {
    let library: String = redis::cmd("FUNCTION")
        .arg("LOAD")
        .arg("REPLACE")
        .arg(FUNCTION_LIBRARY)
        .query_async(conn)
        .await
        .map_err(|e| {
            Error::new(ErrorDetails::ValkeyQuery {
                message: format!("Failed to load the throttle function library: {e}"),
            })
        })?;
    tracing::debug!("Loaded Valkey function library `{library}`");
    Ok(())
}

async fn execute_ping<C: ConnectionLike>(conn: &mut C) -> Result<(), Error> {
    let _: String = redis::cmd("PING").query_async(conn).await?;
    Ok(())
}

async fn execute_get<C: ConnectionLike>(
    conn: &mut C,
    key: &str,
) -> Result<Option<ThrottleRecord>, Error> {
    let raw: Option<String> = redis::cmd("GET").arg(key).query_async(conn).await?;
    raw.map(|raw| {
        serde_json::from_str(&raw).map_err(|e| {
            Error::new(ErrorDetails::ValkeyQuery {
                message: format!("Failed to parse throttle record `{key}`: {e}"),
            })
        })
    })
    .transpose()
}

async fn execute_set<C: ConnectionLike>(
    conn: &mut C,
    key: &str,
    record: &ThrottleRecord,
    ttl: Duration,
) -> Result<(), Error> {
    let payload = serde_json::to_string(record)?;
    // A zero PX is rejected by the server
    let ttl_ms = (ttl.as_millis() as u64).max(1);
    let () = redis::cmd("SET")
        .arg(key)
        .arg(payload)
        .arg("PX")
        .arg(ttl_ms)
        .query_async(conn)
        .await?;
    Ok(())
}

async fn execute_increment<C: ConnectionLike>(conn: &mut C, key: &str) -> Result<u64, Error> {
    let count: i64 = redis::cmd("FCALL")
        .arg(INCREMENT_FUNCTION)
        .arg(1) // numkeys
        .arg(key)
        .query_async(conn)
        .await?;
    Ok(count.max(0) as u64)
}

#[async_trait]
impl ThrottleStore for ValkeyThrottleStore {
    async fn get(&self, key: &str) -> Result<Option<ThrottleRecord>, Error> {
        execute_get(&mut self.connection.clone(), key).await
    }

    async fn set(&self, key: &str, record: ThrottleRecord, ttl: Duration) -> Result<(), Error> {
        execute_set(&mut self.connection.clone(), key, &record, ttl).await
    }

    async fn increment(&self, key: &str) -> Result<u64, Error> {
        self.ensure_library().await?;
        execute_increment(&mut self.connection.clone(), key).await
    }

    async fn health(&self) -> Result<(), Error> {
        let mut conn = self.connection.clone();
        tokio::time::timeout(PING_TIMEOUT, execute_ping(&mut conn))
            .await
            .unwrap_or_else(|_| {
                Err(Error::new(ErrorDetails::ValkeyConnection {
                    message: format!("Valkey did not answer PING within {PING_TIMEOUT:?}"),
                }))
            })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use redis::Value;
    use redis_test::{MockCmd, MockRedisConnection};

    use super::*;

    fn reset_time() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_760_000_060_000).unwrap()
    }

    #[tokio::test]
    async fn test_invalid_url_is_a_connection_error() {
        let err = ValkeyThrottleStore::connect("not-a-valkey-url")
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err.get_details(),
            ErrorDetails::ValkeyConnection { .. }
        ));
    }

    #[tokio::test]
    async fn test_load_library_replaces_it() {
        let mut mock = MockRedisConnection::new(vec![MockCmd::new(
            redis::cmd("FUNCTION")
                .arg("LOAD")
                .arg("REPLACE")
                .arg(FUNCTION_LIBRARY),
            Ok("statsync_throttle"),
        )])
        .assert_all_commands_consumed();

        execute_load_library(&mut mock).await.unwrap();
        assert!(FUNCTION_LIBRARY.contains(INCREMENT_FUNCTION));
    }

    #[tokio::test]
    async fn test_load_library_failure_is_query_error() {
        let mut mock = MockRedisConnection::new(vec![MockCmd::new(
            redis::cmd("FUNCTION")
                .arg("LOAD")
                .arg("REPLACE")
                .arg(FUNCTION_LIBRARY),
            Ok(Value::Nil),
        )]);

        let err = execute_load_library(&mut mock).await.unwrap_err();
        assert!(matches!(err.get_details(), ErrorDetails::ValkeyQuery { .. }));
    }

    #[tokio::test]
    async fn test_ping() {
        let mut mock =
            MockRedisConnection::new(vec![MockCmd::new(redis::cmd("PING"), Ok("PONG"))])
                .assert_all_commands_consumed();
        execute_ping(&mut mock).await.unwrap();
    }

    #[tokio::test]
    async fn test_get_parses_stored_record() {
        let mut mock = MockRedisConnection::new(vec![MockCmd::new(
            redis::cmd("GET").arg("throttle:api:1.2.3.4:60000"),
            Ok(r#"{"count":3,"resetTime":1760000060000}"#),
        )])
        .assert_all_commands_consumed();

        let record = execute_get(&mut mock, "throttle:api:1.2.3.4:60000")
            .await
            .unwrap();
        assert_eq!(
            record,
            Some(ThrottleRecord {
                count: 3,
                reset_time: reset_time(),
            })
        );
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let mut mock = MockRedisConnection::new(vec![MockCmd::new(
            redis::cmd("GET").arg("missing"),
            Ok(Value::Nil),
        )])
        .assert_all_commands_consumed();

        assert_eq!(execute_get(&mut mock, "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_corrupt_record_is_query_error() {
        let mut mock = MockRedisConnection::new(vec![MockCmd::new(
            redis::cmd("GET").arg("corrupt"),
            Ok("not json"),
        )]);

        let err = execute_get(&mut mock, "corrupt").await.unwrap_err();
        assert!(matches!(err.get_details(), ErrorDetails::ValkeyQuery { .. }));
    }

    #[tokio::test]
    async fn test_set_writes_json_with_window_ttl() {
        let mut mock = MockRedisConnection::new(vec![MockCmd::new(
            redis::cmd("SET")
                .arg("throttle:api:1.2.3.4:60000")
                .arg(r#"{"count":1,"resetTime":1760000060000}"#)
                .arg("PX")
                .arg(60_000u64),
            Ok("OK"),
        )])
        .assert_all_commands_consumed();

        execute_set(
            &mut mock,
            "throttle:api:1.2.3.4:60000",
            &ThrottleRecord {
                count: 1,
                reset_time: reset_time(),
            },
            Duration::from_millis(60_000),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_increment_calls_function() {
        let mut mock = MockRedisConnection::new(vec![MockCmd::new(
            redis::cmd("FCALL")
                .arg("statsync_throttle_increment_v1")
                .arg(1)
                .arg("throttle:api:1.2.3.4:60000"),
            Ok(4i64),
        )])
        .assert_all_commands_consumed();

        assert_eq!(
            execute_increment(&mut mock, "throttle:api:1.2.3.4:60000")
                .await
                .unwrap(),
            4
        );
    }
}
