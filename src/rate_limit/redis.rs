use super::counter::{CounterError, WindowCounter};
use super::lua_scripts::ALLOW_MINUTE_SCRIPT;
use super::types::{CounterDecision, WINDOW};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Script};
use std::time::{Duration, SystemTime};
use tracing::{debug, error};

/// Default prefix for window keys
pub const DEFAULT_KEY_PREFIX: &str = "iplimit:minute:";

/// Redis-backed distributed window counter
///
/// Windows are aligned to wall-clock minutes and shared by every process
/// pointing at the same Redis.
pub struct RedisWindowCounter {
    /// Redis connection manager, cloned per call
    connection: ConnectionManager,
    key_prefix: String,
    script: Script,
}

impl RedisWindowCounter {
    /// Connect to Redis
    pub async fn new(redis_url: &str, key_prefix: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self::with_connection(connection, key_prefix))
    }

    /// Wrap an existing connection manager
    pub fn with_connection(connection: ConnectionManager, key_prefix: &str) -> Self {
        Self {
            connection,
            key_prefix: key_prefix.to_string(),
            script: Script::new(ALLOW_MINUTE_SCRIPT),
        }
    }

    /// Test Redis connection
    pub async fn ping(&self) -> Result<(), redis::RedisError> {
        let mut connection = self.connection.clone();
        redis::cmd("PING").query_async(&mut connection).await
    }
}

/// Build the key for `identifier` in the window containing `unix_secs`
pub fn window_key(prefix: &str, identifier: &str, unix_secs: u64) -> String {
    format!("{}{}:{}", prefix, identifier, unix_secs / WINDOW.as_secs())
}

/// Time left until the window containing `unix_secs` ends
pub fn until_window_end(unix_secs: u64) -> Duration {
    let window = WINDOW.as_secs();
    Duration::from_secs(window - unix_secs % window)
}

/// Turn a `[allowed, count, ttl]` script reply into a decision
///
/// `fallback` is used as the retry delay when the key reports no TTL.
fn decision_from_reply(
    reply: &[i64],
    fallback: Duration,
) -> Result<CounterDecision, CounterError> {
    match reply {
        [allowed, count, ttl] => {
            let count = (*count).max(0) as u64;
            if *allowed == 1 {
                Ok(CounterDecision::allowed(count))
            } else {
                let retry_after = if *ttl > 0 {
                    Duration::from_secs(*ttl as u64)
                } else {
                    fallback
                };
                Ok(CounterDecision::denied(count, retry_after))
            }
        }
        other => Err(CounterError::InvalidReply(format!("{:?}", other))),
    }
}

#[async_trait]
impl WindowCounter for RedisWindowCounter {
    async fn allow_minute(
        &self,
        identifier: &str,
        limit: u64,
    ) -> Result<CounterDecision, CounterError> {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let key = window_key(&self.key_prefix, identifier, now);
        let remaining = until_window_end(now);

        let mut connection = self.connection.clone();
        let reply = self
            .script
            .key(&key)
            .arg(limit)
            .arg(remaining.as_secs())
            .invoke_async::<_, Vec<i64>>(&mut connection)
            .await
            .map_err(|e| {
                error!(key = %key, error = %e, "Redis error during window check");
                CounterError::from(e)
            })?;

        let decision = decision_from_reply(&reply, remaining)?;

        debug!(
            key = %key,
            count = decision.count,
            limit = limit,
            allowed = decision.allowed,
            "Window check"
        );

        Ok(decision)
    }
}
