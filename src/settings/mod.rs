//! Remote settings sources
//!
//! The limiter reads its threshold through the [`ConfigSource`] trait so the
//! backing store can be swapped:
//!
//! - [`ConsulKv`]: Consul's HTTP key/value API
//! - [`StaticConfigSource`]: in-memory values for tests and local runs

pub mod consul;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;

pub use consul::ConsulKv;

/// Errors returned by a settings source
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigSourceError {
    #[error("Settings backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),
}

/// Read-only key/value access to a remote settings store
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Fetch the raw bytes stored under `key`
    async fn get(&self, key: &str) -> Result<Bytes, ConfigSourceError>;
}

/// In-memory settings source
///
/// Values can be replaced at any time, which makes it handy for driving
/// threshold changes in tests. [`StaticConfigSource::set_unavailable`] makes
/// every read fail as if the backend were down.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigSource {
    values: Arc<DashMap<String, Bytes>>,
    unavailable: Arc<std::sync::atomic::AtomicBool>,
}

impl StaticConfigSource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source holding a single value
    pub fn with_value(key: &str, value: impl Into<Bytes>) -> Self {
        let source = Self::new();
        source.set(key, value);
        source
    }

    /// Store a value
    pub fn set(&self, key: &str, value: impl Into<Bytes>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Remove a value
    pub fn remove(&self, key: &str) {
        self.values.remove(key);
    }

    /// Simulate the backend going down (or coming back)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable
            .store(unavailable, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn get(&self, key: &str) -> Result<Bytes, ConfigSourceError> {
        if self.unavailable.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ConfigSourceError::BackendUnavailable(
                "static source marked unavailable".to_string(),
            ));
        }

        self.values
            .get(key)
            .map(|v| v.value().clone())
            .ok_or_else(|| ConfigSourceError::KeyNotFound(key.to_string()))
    }
}
