use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use lru::LruCache;

use super::{network_prefix, CacheEntry, Connector, ConnectorIndex, MethodPolicies};

type EntryKey = (String, String);

struct LruState {
    entries: LruCache<EntryKey, CacheEntry>,
    reverse: HashMap<String, HashSet<String>>,
}

impl LruState {
    fn get(&mut self, key: &EntryKey) -> Option<String> {
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => {
                return Some(entry.value().to_string())
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.remove(key);
        }

        None
    }

    fn put(&mut self, key: EntryKey, entry: CacheEntry) {
        self.reverse
            .entry(key.1.clone())
            .or_default()
            .insert(key.0.clone());

        if let Some((evicted, _)) = self.entries.push(key.clone(), entry) {
            if evicted != key {
                self.unlink_reverse(&evicted);
            }
        }
    }

    fn remove(&mut self, key: &EntryKey) {
        self.entries.pop(key);
        self.unlink_reverse(key);
    }

    fn unlink_reverse(&mut self, (group_key, request_key): &EntryKey) {
        if let Some(groups) = self.reverse.get_mut(request_key) {
            groups.remove(group_key);
            if groups.is_empty() {
                self.reverse.remove(request_key);
            }
        }
    }

    fn reverse_keys(&self, request_key: &str, prefix: &str) -> Vec<EntryKey> {
        let mut keys: Vec<EntryKey> = self
            .reverse
            .get(request_key)
            .map(|groups| {
                groups
                    .iter()
                    .filter(|group| group.starts_with(prefix))
                    .map(|group| (group.clone(), request_key.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        keys.sort_unstable();
        keys
    }
}

/// Bounded in-process connector; the least recently used entry is evicted once
/// `max_items` is reached.
pub struct LruConnector {
    policies: MethodPolicies,
    state: Mutex<LruState>,
}

impl LruConnector {
    pub fn new(cap: usize) -> anyhow::Result<Self> {
        let cap = NonZeroUsize::new(cap).context("lru max_items must be greater than zero")?;

        Ok(Self {
            policies: MethodPolicies::new(),
            state: Mutex::new(LruState {
                entries: LruCache::new(cap),
                reverse: HashMap::new(),
            }),
        })
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, LruState>> {
        self.state
            .lock()
            .map_err(|e| anyhow!("lock poisoned: {}", e))
    }
}

#[async_trait]
impl Connector for LruConnector {
    async fn get(
        &self,
        index: ConnectorIndex,
        group_key: &str,
        request_key: &str,
    ) -> anyhow::Result<Option<String>> {
        let mut state = self.lock()?;

        match index {
            ConnectorIndex::Primary => {
                Ok(state.get(&(group_key.to_string(), request_key.to_string())))
            }
            ConnectorIndex::Reverse => {
                for key in state.reverse_keys(request_key, network_prefix(group_key)) {
                    if let Some(value) = state.get(&key) {
                        return Ok(Some(value));
                    }
                }

                Ok(None)
            }
        }
    }

    async fn set(&self, group_key: &str, request_key: &str, value: &str) -> anyhow::Result<()> {
        let entry = CacheEntry::new(value, self.policies.ttl_for_request_key(request_key));

        let mut state = self.lock()?;
        state.put((group_key.to_string(), request_key.to_string()), entry);

        Ok(())
    }

    async fn delete(
        &self,
        index: ConnectorIndex,
        group_key: &str,
        request_key: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut state = self.lock()?;

        let keys: Vec<EntryKey> = match (index, request_key) {
            (ConnectorIndex::Primary, Some(request_key)) => {
                vec![(group_key.to_string(), request_key.to_string())]
            }
            (ConnectorIndex::Primary, None) => state
                .entries
                .iter()
                .filter(|((group, _), _)| group == group_key)
                .map(|(key, _)| key.clone())
                .collect(),
            (ConnectorIndex::Reverse, Some(request_key)) => {
                state.reverse_keys(request_key, network_prefix(group_key))
            }
            (ConnectorIndex::Reverse, None) => {
                bail!("reverse index delete requires a request key")
            }
        };

        for key in &keys {
            state.remove(key);
        }

        Ok(())
    }

    fn method_policies(&self) -> &MethodPolicies {
        &self.policies
    }

    fn method_policies_mut(&mut self) -> &mut MethodPolicies {
        &mut self.policies
    }
}
