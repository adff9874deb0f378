use std::collections::{HashMap, HashSet};
use std::time::Instant;

use anyhow::bail;
use async_trait::async_trait;
use dashmap::DashMap;

use super::{network_prefix, CacheEntry, Connector, ConnectorIndex, MethodPolicies};

/// Unbounded in-process connector. Entries live until their TTL passes or
/// their group is deleted.
#[derive(Default)]
pub struct MemoryConnector {
    policies: MethodPolicies,
    groups: DashMap<String, HashMap<String, CacheEntry>>,
    reverse: DashMap<String, HashSet<String>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_primary(&self, group_key: &str, request_key: &str) -> Option<String> {
        let (value, expired) = {
            let group = self.groups.get(group_key)?;
            let entry = group.get(request_key)?;

            if entry.is_expired(Instant::now()) {
                (None, true)
            } else {
                (Some(entry.value().to_string()), false)
            }
        };

        if expired {
            self.remove_entry(group_key, request_key);
        }

        value
    }

    fn groups_for(&self, request_key: &str, prefix: &str) -> Vec<String> {
        let mut groups: Vec<String> = match self.reverse.get(request_key) {
            Some(groups) => groups
                .iter()
                .filter(|group| group.starts_with(prefix))
                .cloned()
                .collect(),
            None => return vec![],
        };

        groups.sort_unstable();
        groups
    }

    fn remove_entry(&self, group_key: &str, request_key: &str) {
        let emptied = match self.groups.get_mut(group_key) {
            Some(mut group) => {
                group.remove(request_key);
                group.is_empty()
            }
            None => false,
        };

        if emptied {
            self.groups.remove_if(group_key, |_, group| group.is_empty());
        }

        self.unlink_reverse(request_key, group_key);
    }

    fn unlink_reverse(&self, request_key: &str, group_key: &str) {
        let emptied = match self.reverse.get_mut(request_key) {
            Some(mut groups) => {
                groups.remove(group_key);
                groups.is_empty()
            }
            None => false,
        };

        if emptied {
            self.reverse.remove_if(request_key, |_, groups| groups.is_empty());
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn get(
        &self,
        index: ConnectorIndex,
        group_key: &str,
        request_key: &str,
    ) -> anyhow::Result<Option<String>> {
        match index {
            ConnectorIndex::Primary => Ok(self.get_primary(group_key, request_key)),
            ConnectorIndex::Reverse => {
                for group in self.groups_for(request_key, network_prefix(group_key)) {
                    if let Some(value) = self.get_primary(&group, request_key) {
                        return Ok(Some(value));
                    }
                }

                Ok(None)
            }
        }
    }

    async fn set(&self, group_key: &str, request_key: &str, value: &str) -> anyhow::Result<()> {
        let entry = CacheEntry::new(value, self.policies.ttl_for_request_key(request_key));
        let now = Instant::now();

        // writes sweep the group so entries nobody reads again still go away
        let mut expired = vec![];
        {
            let mut group = self.groups.entry(group_key.to_string()).or_default();
            group.retain(|key, entry| {
                let keep = !entry.is_expired(now);
                if !keep {
                    expired.push(key.clone());
                }
                keep
            });
            group.insert(request_key.to_string(), entry);
        }

        for expired_key in &expired {
            self.unlink_reverse(expired_key, group_key);
        }

        self.reverse
            .entry(request_key.to_string())
            .or_default()
            .insert(group_key.to_string());

        Ok(())
    }

    async fn delete(
        &self,
        index: ConnectorIndex,
        group_key: &str,
        request_key: Option<&str>,
    ) -> anyhow::Result<()> {
        match (index, request_key) {
            (ConnectorIndex::Primary, Some(request_key)) => {
                self.remove_entry(group_key, request_key);
            }
            (ConnectorIndex::Primary, None) => {
                if let Some((_, group)) = self.groups.remove(group_key) {
                    for request_key in group.keys() {
                        self.unlink_reverse(request_key, group_key);
                    }
                }
            }
            (ConnectorIndex::Reverse, Some(request_key)) => {
                for group in self.groups_for(request_key, network_prefix(group_key)) {
                    self.remove_entry(&group, request_key);
                }
            }
            (ConnectorIndex::Reverse, None) => {
                bail!("reverse index delete requires a request key")
            }
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

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_primary_read_write() {
        let connector = MemoryConnector::new();
        connector.set("evm:1:100", "eth_call:aa", "\"0x1\"").await.unwrap();

        let value = connector
            .get(ConnectorIndex::Primary, "evm:1:100", "eth_call:aa")
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some("\"0x1\""));

        let value = connector
            .get(ConnectorIndex::Primary, "evm:1:101", "eth_call:aa")
            .await
            .unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let connector = MemoryConnector::new();
        connector.set("evm:1:100", "eth_call:aa", "1").await.unwrap();
        connector.set("evm:1:100", "eth_call:aa", "2").await.unwrap();

        let value = connector
            .get(ConnectorIndex::Primary, "evm:1:100", "eth_call:aa")
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_reverse_lookup_is_scoped_to_network() {
        let connector = MemoryConnector::new();
        connector
            .set("evm:1:0xblock", "eth_getTransactionReceipt:aa", "{\"status\":\"0x1\"}")
            .await
            .unwrap();

        let value = connector
            .get(ConnectorIndex::Reverse, "evm:1:*", "eth_getTransactionReceipt:aa")
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some("{\"status\":\"0x1\"}"));

        let value = connector
            .get(ConnectorIndex::Reverse, "evm:10:*", "eth_getTransactionReceipt:aa")
            .await
            .unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let mut connector = MemoryConnector::new();
        connector.set_ttl("eth_gasPrice", "20ms").unwrap();
        connector.set("evm:1:nil", "eth_gasPrice:aa", "\"0x5\"").await.unwrap();

        assert!(connector
            .get(ConnectorIndex::Primary, "evm:1:nil", "eth_gasPrice:aa")
            .await
            .unwrap()
            .is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(connector
            .get(ConnectorIndex::Primary, "evm:1:nil", "eth_gasPrice:aa")
            .await
            .unwrap()
            .is_none());
        assert!(connector.groups.get("evm:1:nil").is_none());
        assert!(connector.reverse.get("eth_gasPrice:aa").is_none());
    }

    #[tokio::test]
    async fn test_set_sweeps_expired_entries() {
        let mut connector = MemoryConnector::new();
        connector.set_ttl("eth_getBalance", "20ms").unwrap();
        for i in 0..3 {
            connector
                .set("evm:1:nil", &format!("eth_getBalance:{i}"), "\"0x1\"")
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(40)).await;
        connector.set("evm:1:nil", "eth_chainId:aa", "\"0x1\"").await.unwrap();

        let group = connector.groups.get("evm:1:nil").unwrap();
        assert_eq!(group.len(), 1);
        assert!(group.contains_key("eth_chainId:aa"));
        drop(group);

        assert!(connector.reverse.get("eth_getBalance:0").is_none());
        assert!(connector.reverse.get("eth_chainId:aa").is_some());
    }

    #[tokio::test]
    async fn test_delete_group() {
        let connector = MemoryConnector::new();
        connector.set("evm:1:0xdead", "eth_getBlockByHash:aa", "{}").await.unwrap();
        connector.set("evm:1:0xdead", "eth_getLogs:bb", "[]").await.unwrap();
        connector.set("evm:1:0xbeef", "eth_getLogs:bb", "[1]").await.unwrap();

        connector
            .delete(ConnectorIndex::Primary, "evm:1:0xdead", None)
            .await
            .unwrap();

        assert!(connector
            .get(ConnectorIndex::Primary, "evm:1:0xdead", "eth_getLogs:bb")
            .await
            .unwrap()
            .is_none());
        assert!(connector.reverse.get("eth_getBlockByHash:aa").is_none());

        // other groups sharing the request key are untouched
        let value = connector
            .get(ConnectorIndex::Reverse, "evm:1:*", "eth_getLogs:bb")
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some("[1]"));
    }

    #[tokio::test]
    async fn test_delete_by_reverse_index() {
        let connector = MemoryConnector::new();
        connector.set("evm:1:0xaa", "eth_getTransactionByHash:cc", "{}").await.unwrap();
        connector.set("evm:2:0xaa", "eth_getTransactionByHash:cc", "{}").await.unwrap();

        connector
            .delete(ConnectorIndex::Reverse, "evm:1:*", Some("eth_getTransactionByHash:cc"))
            .await
            .unwrap();

        assert!(connector
            .get(ConnectorIndex::Primary, "evm:1:0xaa", "eth_getTransactionByHash:cc")
            .await
            .unwrap()
            .is_none());
        assert!(connector
            .get(ConnectorIndex::Primary, "evm:2:0xaa", "eth_getTransactionByHash:cc")
            .await
            .unwrap()
            .is_some());

        assert!(connector
            .delete(ConnectorIndex::Reverse, "evm:1:*", None)
            .await
            .is_err());
    }
}
