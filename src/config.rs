use config::{Config, ConfigError};
use serde::{self, de, Deserialize, Deserializer};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const DEFAULT_LRU_MAX_ITEMS: usize = 100_000;
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
pub const DEFAULT_REDIS_POOL_SIZE: u32 = 300;
pub const DEFAULT_REDIS_KEY_PREFIX: &str = "evm_json_rpc_cache";
pub const DEFAULT_REDIS_REVERSE_INDEX: &str = "idx_requestKey_groupKey";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub networks: Vec<NetworkConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8124,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorDriver {
    #[default]
    Memory,
    Lru,
    Redis,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub driver: ConnectorDriver,
    pub lru: Option<LruConfig>,
    pub redis: Option<RedisConfig>,
    pub methods: Vec<MethodCacheConfig>,
    pub non_cacheable_methods: Vec<NonCacheableMethod>,
}

impl CacheConfig {
    /// Fills the settings of the selected driver that were left out.
    pub fn with_defaults(mut self) -> Self {
        match self.driver {
            ConnectorDriver::Memory => {}
            ConnectorDriver::Lru => {
                self.lru.get_or_insert_with(LruConfig::default);
            }
            ConnectorDriver::Redis => {
                self.redis.get_or_insert_with(RedisConfig::default);
            }
        }

        self
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LruConfig {
    #[serde(default = "default_lru_max_items")]
    pub max_items: usize,
}

impl Default for LruConfig {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_LRU_MAX_ITEMS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    #[serde(deserialize_with = "deserialize_and_validate_redis_url")]
    pub url: String,
    pub pool_size: u32,
    pub key_prefix: String,
    pub reverse_index: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REDIS_URL.to_string(),
            pool_size: DEFAULT_REDIS_POOL_SIZE,
            key_prefix: DEFAULT_REDIS_KEY_PREFIX.to_string(),
            reverse_index: DEFAULT_REDIS_REVERSE_INDEX.to_string(),
        }
    }
}

/// TTL override for a method, e.g. `{ method = "eth_chainId", ttl = "1h" }`.
#[derive(Debug, Clone, Deserialize)]
pub struct MethodCacheConfig {
    pub method: String,
    pub ttl: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NonCacheableMethod {
    pub method: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Path segment the proxy serves the network under.
    pub name: String,
    pub network_id: String,
    #[serde(deserialize_with = "deserialize_and_validate_url")]
    pub upstream: Url,
    #[serde(default = "default_finality_poll_interval")]
    pub finality_poll_interval: String,
}

impl NetworkConfig {
    pub fn poll_interval(&self) -> anyhow::Result<Duration> {
        humantime::parse_duration(&self.finality_poll_interval).map_err(|e| {
            anyhow::anyhow!(
                "invalid finality_poll_interval `{}` for network {}: {e}",
                self.finality_poll_interval,
                self.name
            )
        })
    }
}

fn default_lru_max_items() -> usize {
    DEFAULT_LRU_MAX_ITEMS
}

fn default_finality_poll_interval() -> String {
    "5s".to_string()
}

impl AppConfig {
    pub fn new(config_file: &str) -> Result<Self, ConfigError> {
        // Get the binary name and convert it to uppercase
        let env_prefix = env::args()
            .next()
            .and_then(|path| {
                Path::new(&path)
                    .file_name()
                    .map(|os_str| os_str.to_str().unwrap_or_default().to_string())
            })
            .unwrap_or_else(|| "DEFAULT".to_string())
            .to_ascii_uppercase()
            .replace('-', "_");

        let cfg = Config::builder()
            .add_source(config::File::with_name(config_file))
            .add_source(config::Environment::with_prefix(&env_prefix).separator("__"))
            .build()?;

        cfg.try_deserialize()
    }
}

// Custom deserializer for urls
fn deserialize_and_validate_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: Deserializer<'de>,
{
    let url_str = String::deserialize(deserializer)?;

    Url::from_str(&url_str).map_err(|_| de::Error::custom(format!("Invalid URL: {}", url_str)))
}

// Redis urls are handed to the client as strings, only validated here
fn deserialize_and_validate_redis_url<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let url_str = String::deserialize(deserializer)?;

    match Url::from_str(&url_str) {
        Ok(url) if url.scheme().starts_with("redis") => Ok(url_str),
        Ok(_) => Err(de::Error::custom(format!("Not a redis URL: {}", url_str))),
        Err(_) => Err(de::Error::custom(format!("Invalid URL: {}", url_str))),
    }
}
