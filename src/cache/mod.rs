pub mod lru_backend;
pub mod memory_backend;
pub mod method_policy;
pub mod redis_backend;

#[cfg(test)]
pub(crate) mod mock;

use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;

use crate::config::{CacheConfig, ConnectorDriver};
pub use method_policy::MethodPolicies;

/// Index a connector lookup goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorIndex {
    /// Exact `(group key, request key)` lookup.
    Primary,
    /// Lookup by request key, matching the group key only on its network prefix.
    Reverse,
}

/// Storage backend behind the json-rpc cache.
///
/// Method policies are registered through `&mut self` before the connector is
/// shared, and only read afterwards.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn get(
        &self,
        index: ConnectorIndex,
        group_key: &str,
        request_key: &str,
    ) -> anyhow::Result<Option<String>>;

    async fn set(&self, group_key: &str, request_key: &str, value: &str) -> anyhow::Result<()>;

    /// Deletes one entry, or the whole group when `request_key` is `None`.
    async fn delete(
        &self,
        index: ConnectorIndex,
        group_key: &str,
        request_key: Option<&str>,
    ) -> anyhow::Result<()>;

    fn method_policies(&self) -> &MethodPolicies;

    fn method_policies_mut(&mut self) -> &mut MethodPolicies;

    fn set_ttl(&mut self, method: &str, ttl: &str) -> anyhow::Result<()> {
        self.method_policies_mut().set_ttl(method, ttl)
    }

    fn has_ttl(&self, method: &str) -> bool {
        self.method_policies().has_ttl(method)
    }

    fn ignore_method(&mut self, method: &str) -> anyhow::Result<()> {
        self.method_policies_mut().ignore_method(method)
    }

    fn is_method_ignored(&self, method: &str) -> bool {
        self.method_policies().is_method_ignored(method)
    }
}

pub(crate) struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    pub(crate) fn new(value: &str, ttl: Option<Duration>) -> Self {
        Self {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    pub(crate) fn value(&self) -> &str {
        &self.value
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now)
    }
}

/// Network part of a group key, `evm:1:0xabc` -> `evm:1:`.
pub(crate) fn network_prefix(group_key: &str) -> &str {
    match group_key.rfind(':') {
        Some(idx) => &group_key[..=idx],
        None => group_key,
    }
}

pub fn new_connector(cfg: &CacheConfig) -> anyhow::Result<Box<dyn Connector>> {
    let connector: Box<dyn Connector> = match cfg.driver {
        ConnectorDriver::Redis => {
            let redis = cfg
                .redis
                .as_ref()
                .context("Must specify redis settings when using redis cache backend!")?;
            tracing::info!(pool_size = redis.pool_size, "Using redis cache backend");

            let client =
                redis::Client::open(redis.url.as_str()).context("fail to create redis client")?;

            let conn_pool = r2d2::Pool::builder()
                .max_size(redis.pool_size)
                .test_on_check_out(false)
                .build(client)
                .context("fail to create redis connection pool")?;

            Box::new(redis_backend::RedisConnector::new(
                conn_pool,
                redis.key_prefix.clone(),
                redis.reverse_index.clone(),
            ))
        }
        ConnectorDriver::Memory => {
            tracing::info!("Using in memory cache backend");
            Box::new(memory_backend::MemoryConnector::new())
        }
        ConnectorDriver::Lru => {
            let max_items = cfg
                .lru
                .as_ref()
                .map(|lru| lru.max_items)
                .context("Must specify lru settings when using lru cache backend!")?;
            tracing::info!(max_items, "Using in LRU cache backend");
            Box::new(lru_backend::LruConnector::new(max_items)?)
        }
    };

    Ok(connector)
}
