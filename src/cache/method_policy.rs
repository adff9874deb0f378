use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::{bail, Context};

/// Per-method caching overrides: explicit TTLs and methods that must never be cached.
///
/// Filled once while the connector is being built and only read afterwards.
#[derive(Debug, Default, Clone)]
pub struct MethodPolicies {
    ttls: HashMap<String, Duration>,
    ignored: HashSet<String>,
}

impl MethodPolicies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a TTL such as `"5s"` or `"1h 30m"`. Re-registering a method overwrites it.
    pub fn set_ttl(&mut self, method: &str, ttl: &str) -> anyhow::Result<()> {
        let ttl = humantime::parse_duration(ttl.trim())
            .with_context(|| format!("invalid ttl `{ttl}` for method {method}"))?;

        if ttl.is_zero() {
            bail!("ttl for method {method} must be greater than zero");
        }

        self.ttls.insert(method.to_string(), ttl);
        Ok(())
    }

    pub fn has_ttl(&self, method: &str) -> bool {
        self.ttls.contains_key(method)
    }

    pub fn ttl(&self, method: &str) -> Option<Duration> {
        self.ttls.get(method).copied()
    }

    pub fn ignore_method(&mut self, method: &str) -> anyhow::Result<()> {
        if method.is_empty() {
            bail!("cannot ignore an empty method name");
        }

        self.ignored.insert(method.to_string());
        Ok(())
    }

    pub fn is_method_ignored(&self, method: &str) -> bool {
        self.ignored.contains(method)
    }

    /// TTL that applies to a stored entry, looked up from the method prefix of its request key.
    pub fn ttl_for_request_key(&self, request_key: &str) -> Option<Duration> {
        let (method, _) = request_key.split_once(':')?;
        self.ttl(method)
    }
}
