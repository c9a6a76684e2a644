use crate::error::{LimiterError, Result};
use crate::rate_limit::redis::DEFAULT_KEY_PREFIX;
use crate::rate_limit::types::{FailMode, THRESHOLD_KEY};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Prefix for environment variable overrides, e.g. `IPLIMIT__REDIS__URL`
pub const ENV_PREFIX: &str = "IPLIMIT";

/// Main service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Consul settings store
    #[serde(default)]
    pub consul: ConsulConfig,
    /// Redis window counter
    #[serde(default)]
    pub redis: RedisConfig,
    /// Limiter behaviour
    #[serde(default)]
    pub limiter: LimiterConfig,
    /// Prometheus metrics
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Public IP lookup at startup
    #[serde(default)]
    pub ip_discovery: IpDiscoveryConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Use `X-Forwarded-For` as the client identifier
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

/// Consul configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct ConsulConfig {
    /// Consul HTTP address
    #[serde(default = "default_consul_address")]
    pub address: String,
    /// Datacenter to query (agent default if unset)
    #[serde(default)]
    pub datacenter: Option<String>,
    /// ACL token
    #[serde(default)]
    pub token: Option<String>,
    /// Request timeout in seconds
    #[serde(default = "default_consul_timeout")]
    pub timeout_secs: u64,
}

impl fmt::Debug for ConsulConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsulConfig")
            .field("address", &self.address)
            .field("datacenter", &self.datacenter)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Prefix for window keys
    #[serde(default = "default_redis_prefix")]
    pub key_prefix: String,
}

/// Limiter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Settings key holding the threshold
    #[serde(default = "default_threshold_key")]
    pub threshold_key: String,
    /// Seconds between threshold refreshes
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// Threshold used until the first successful refresh (0 disables limiting)
    #[serde(default)]
    pub initial_threshold: u64,
    /// Behaviour when the window counter is unreachable
    #[serde(default)]
    pub fail_mode: FailMode,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Expose `/metrics`
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Public IP discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpDiscoveryConfig {
    /// Look up and log the public address at startup
    #[serde(default)]
    pub enabled: bool,
    /// Lookup endpoint returning `{"ip": "..."}`
    #[serde(default = "default_ip_discovery_url")]
    pub url: String,
    /// Request timeout in seconds
    #[serde(default = "default_ip_discovery_timeout")]
    pub timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_consul_address() -> String {
    "http://127.0.0.1:8500".to_string()
}

fn default_consul_timeout() -> u64 {
    5
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_redis_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_threshold_key() -> String {
    THRESHOLD_KEY.to_string()
}

fn default_refresh_interval() -> u64 {
    30
}

fn default_ip_discovery_url() -> String {
    crate::discovery::MY_IP_URL.to_string()
}

fn default_ip_discovery_timeout() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            trust_forwarded_for: false,
        }
    }
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: default_consul_address(),
            datacenter: None,
            token: None,
            timeout_secs: default_consul_timeout(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_redis_prefix(),
        }
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            threshold_key: default_threshold_key(),
            refresh_interval_secs: default_refresh_interval(),
            initial_threshold: 0,
            fail_mode: FailMode::default(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

impl Default for IpDiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_ip_discovery_url(),
            timeout_secs: default_ip_discovery_timeout(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl ServiceConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LimiterError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| LimiterError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load a YAML file and apply `IPLIMIT__*` environment overrides
    ///
    /// A missing file is not an error; defaults and environment apply.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| {
                LimiterError::Config(format!("Failed to load {}: {}", path.display(), e))
            })?;

        settings
            .try_deserialize()
            .map_err(|e| LimiterError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            return Err(LimiterError::Config("Server host cannot be empty".to_string()));
        }

        if !self.consul.address.starts_with("http://") && !self.consul.address.starts_with("https://")
        {
            return Err(LimiterError::Config(format!(
                "Consul address must start with http:// or https://: {}",
                self.consul.address
            )));
        }

        if self.consul.timeout_secs == 0 {
            return Err(LimiterError::Config(
                "Consul timeout must be > 0".to_string(),
            ));
        }

        if !self.redis.url.starts_with("redis://") && !self.redis.url.starts_with("rediss://") {
            return Err(LimiterError::Config(format!(
                "Redis URL must start with redis:// or rediss://: {}",
                self.redis.url
            )));
        }

        if self.limiter.threshold_key.is_empty() {
            return Err(LimiterError::Config(
                "Threshold key cannot be empty".to_string(),
            ));
        }

        if self.limiter.refresh_interval_secs == 0 {
            return Err(LimiterError::Config(
                "Threshold refresh interval must be > 0".to_string(),
            ));
        }

        if self.ip_discovery.enabled
            && !self.ip_discovery.url.starts_with("http://")
            && !self.ip_discovery.url.starts_with("https://")
        {
            return Err(LimiterError::Config(format!(
                "IP discovery URL must start with http:// or https://: {}",
                self.ip_discovery.url
            )));
        }

        Ok(())
    }

    /// Create a default configuration for testing
    pub fn default_config() -> Self {
        Self {
            server: ServerConfig::default(),
            consul: ConsulConfig::default(),
            redis: RedisConfig::default(),
            limiter: LimiterConfig::default(),
            metrics: MetricsConfig::default(),
            ip_discovery: IpDiscoveryConfig::default(),
        }
    }
}
