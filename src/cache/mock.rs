use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;

use super::memory_backend::MemoryConnector;
use super::{Connector, ConnectorIndex, MethodPolicies};

/// Memory connector that records calls and can be told to fail or stall.
#[derive(Default)]
pub(crate) struct MockConnector {
    pub(crate) inner: MemoryConnector,
    pub fail_get: bool,
    pub fail_set: bool,
    pub set_delay: Option<Duration>,
    /// Reverse lookups miss, as if the reverse index was never written.
    pub reverse_unpopulated: bool,
    pub get_calls: AtomicUsize,
    pub set_calls: AtomicUsize,
    pub gets: Mutex<Vec<(ConnectorIndex, String, String)>>,
    pub deletes: Mutex<Vec<String>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_count(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn set_count(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    /// Stores a raw value, bypassing call accounting.
    pub async fn seed(&self, group_key: &str, request_key: &str, value: &str) {
        self.inner.set(group_key, request_key, value).await.unwrap();
    }

    pub async fn stored(&self, group_key: &str, request_key: &str) -> Option<String> {
        self.inner
            .get(ConnectorIndex::Primary, group_key, request_key)
            .await
            .unwrap()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn get(
        &self,
        index: ConnectorIndex,
        group_key: &str,
        request_key: &str,
    ) -> anyhow::Result<Option<String>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.gets
            .lock()
            .unwrap()
            .push((index, group_key.to_string(), request_key.to_string()));

        if self.fail_get {
            bail!("connection refused");
        }

        if self.reverse_unpopulated && index == ConnectorIndex::Reverse {
            return Ok(None);
        }

        self.inner.get(index, group_key, request_key).await
    }

    async fn set(&self, group_key: &str, request_key: &str, value: &str) -> anyhow::Result<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.set_delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_set {
            bail!("connection refused");
        }

        self.inner.set(group_key, request_key, value).await
    }

    async fn delete(
        &self,
        index: ConnectorIndex,
        group_key: &str,
        request_key: Option<&str>,
    ) -> anyhow::Result<()> {
        self.deletes.lock().unwrap().push(group_key.to_string());

        self.inner.delete(index, group_key, request_key).await
    }

    fn method_policies(&self) -> &MethodPolicies {
        self.inner.method_policies()
    }

    fn method_policies_mut(&mut self) -> &mut MethodPolicies {
        self.inner.method_policies_mut()
    }
}
