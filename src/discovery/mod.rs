//! Public IP discovery
//!
//! Asks an external echo service which address this host appears as. This
//! is an independent collaborator of the limiter; the binary only uses it to
//! log the address at startup.

use crate::config::IpDiscoveryConfig;
use crate::error::{LimiterError, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Default lookup endpoint
pub const MY_IP_URL: &str = "https://api.myip.com";

/// Reply of the lookup endpoint; other fields are ignored
#[derive(Debug, Deserialize)]
struct MyIp {
    ip: String,
}

/// Resolves the public address of the current machine
#[derive(Clone)]
pub struct PublicIpResolver {
    client: reqwest::Client,
    url: String,
}

impl std::fmt::Debug for PublicIpResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicIpResolver")
            .field("url", &self.url)
            .field("client", &"<reqwest::Client>")
            .finish()
    }
}

impl PublicIpResolver {
    /// Create a resolver with the given request timeout
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LimiterError::Http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(url, client))
    }

    pub fn from_config(config: &IpDiscoveryConfig) -> Result<Self> {
        Self::new(config.url.clone(), Duration::from_secs(config.timeout_secs))
    }

    /// Create a resolver around an existing HTTP client
    pub fn with_client(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// Look up the public address
    ///
    /// Expects status 200 and a JSON object with an `ip` string field.
    pub async fn my_ip(&self) -> Result<String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| LimiterError::Http(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| LimiterError::Http(e.to_string()))?;

        if status != reqwest::StatusCode::OK {
            return Err(LimiterError::Http(format!("status code: {}", status.as_u16())));
        }

        let ip = parse_ip(&body)?;
        debug!(ip = %ip, url = %self.url, "Resolved public address");
        Ok(ip)
    }
}

fn parse_ip(body: &[u8]) -> Result<String> {
    let reply: MyIp = serde_json::from_slice(body)
        .map_err(|e| LimiterError::InvalidResponse(format!("unexpected reply: {}", e)))?;

    Ok(reply.ip)
}
