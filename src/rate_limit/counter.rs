use super::types::CounterDecision;
use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by a window counter backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CounterError {
    #[error("Counter backend unavailable: {0}")]
    Unavailable(String),

    #[error("Unexpected counter reply: {0}")]
    InvalidReply(String),
}

impl From<redis::RedisError> for CounterError {
    fn from(err: redis::RedisError) -> Self {
        CounterError::Unavailable(err.to_string())
    }
}

/// Time-windowed increment-and-check keyed by identifier
///
/// Every call counts as a hit for `identifier` in the current one-minute
/// window. The decision is allowed while the count is at most `limit`, so a
/// `limit` of zero never allows.
#[async_trait]
pub trait WindowCounter: Send + Sync {
    async fn allow_minute(
        &self,
        identifier: &str,
        limit: u64,
    ) -> Result<CounterDecision, CounterError>;
}
