use super::{ConfigSource, ConfigSourceError};
use crate::config::ConsulConfig;
use crate::error::{LimiterError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Header carrying the Consul ACL token
const TOKEN_HEADER: &str = "X-Consul-Token";

/// Consul key/value settings source
///
/// Reads `GET {address}/v1/kv/{key}?raw`, which returns the stored value as
/// the response body.
pub struct ConsulKv {
    client: reqwest::Client,
    base_url: Url,
    datacenter: Option<String>,
    token: Option<SecretString>,
}

impl ConsulKv {
    /// Create a Consul source from configuration
    pub fn new(config: &ConsulConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LimiterError::Http(format!("Failed to build Consul client: {}", e)))?;

        let mut source = Self::with_client(&config.address, client)?;
        source.datacenter = config.datacenter.clone();
        source.token = config.token.clone().map(SecretString::new);
        Ok(source)
    }

    /// Create a Consul source around an existing HTTP client
    pub fn with_client(address: &str, client: reqwest::Client) -> Result<Self> {
        let mut base = address.trim_end_matches('/').to_string();
        base.push('/');
        let base_url = Url::parse(&base)
            .map_err(|e| LimiterError::Config(format!("Invalid Consul address {}: {}", address, e)))?;

        Ok(Self {
            client,
            base_url,
            datacenter: None,
            token: None,
        })
    }

    fn key_url(&self, key: &str) -> std::result::Result<Url, ConfigSourceError> {
        let mut url = self
            .base_url
            .join(&format!("v1/kv/{}", key.trim_start_matches('/')))
            .map_err(|e| ConfigSourceError::BackendUnavailable(format!("invalid key url: {}", e)))?;

        {
            let mut query = url.query_pairs_mut();
            query.append_key_only("raw");
            if let Some(dc) = &self.datacenter {
                query.append_pair("dc", dc);
            }
        }

        Ok(url)
    }
}

#[async_trait]
impl ConfigSource for ConsulKv {
    async fn get(&self, key: &str) -> std::result::Result<Bytes, ConfigSourceError> {
        let url = self.key_url(key)?;
        debug!(key = %key, url = %url, "Reading key from Consul");

        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.header(TOKEN_HEADER, token.expose_secret().as_str());
        }

        let response = request.send().await.map_err(|e| {
            warn!(key = %key, error = %e, "Consul request failed");
            ConfigSourceError::BackendUnavailable(e.to_string())
        })?;

        match response.status() {
            StatusCode::OK => response
                .bytes()
                .await
                .map_err(|e| ConfigSourceError::BackendUnavailable(e.to_string())),
            StatusCode::NOT_FOUND => Err(ConfigSourceError::KeyNotFound(key.to_string())),
            status => Err(ConfigSourceError::BackendUnavailable(format!(
                "status code: {}",
                status.as_u16()
            ))),
        }
    }
}
