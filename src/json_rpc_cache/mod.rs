//! Read/write orchestration of the EVM json-rpc cache.
//!
//! [`EvmJsonRpcCache`] decides whether a call can be served from or written to
//! the cache, and under which keys, on top of a [`Connector`].

mod eligibility;
mod keys;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use serde_json::Value;

use crate::block_ref::{BlockRefResolver, BlockScope};
use crate::cache::{self, Connector, ConnectorIndex};
use crate::config::CacheConfig;
use crate::finality::FinalityOracle;
use crate::normalized::{NormalizedRequest, NormalizedResponse};

pub use eligibility::should_cache;
pub use keys::{derive_keys, CacheKeys};

/// Writes get their own deadline, whatever the caller's.
pub const SET_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct EvmJsonRpcCache {
    conn: Arc<dyn Connector>,
    resolver: Arc<dyn BlockRefResolver>,
    finality: Option<Arc<dyn FinalityOracle>>,
}

impl EvmJsonRpcCache {
    pub fn new(cfg: &CacheConfig, resolver: Arc<dyn BlockRefResolver>) -> anyhow::Result<Self> {
        let cfg = cfg.clone().with_defaults();
        let conn = cache::new_connector(&cfg)?;

        Self::with_connector(conn, &cfg, resolver)
    }

    /// Registers the method policies of `cfg` on `conn` before sharing it.
    pub fn with_connector(
        mut conn: Box<dyn Connector>,
        cfg: &CacheConfig,
        resolver: Arc<dyn BlockRefResolver>,
    ) -> anyhow::Result<Self> {
        for method in &cfg.methods {
            conn.set_ttl(&method.method, &method.ttl)
                .context("fail to register method ttl")?;
        }

        for method in &cfg.non_cacheable_methods {
            conn.ignore_method(&method.method)
                .context("fail to register non-cacheable method")?;
        }

        Ok(Self::from_connector(Arc::from(conn), resolver))
    }

    /// Wraps a connector whose policies are already registered.
    pub fn from_connector(conn: Arc<dyn Connector>, resolver: Arc<dyn BlockRefResolver>) -> Self {
        Self {
            conn,
            resolver,
            finality: None,
        }
    }

    /// Same storage and policies, bound to the finality view of one network.
    pub fn with_network(&self, finality: Arc<dyn FinalityOracle>) -> Self {
        Self {
            conn: self.conn.clone(),
            resolver: self.resolver.clone(),
            finality: Some(finality),
        }
    }

    pub async fn get(&self, request: &NormalizedRequest) -> anyhow::Result<Option<NormalizedResponse>> {
        let method = request.method();

        if self.conn.is_method_ignored(method) {
            return Ok(None);
        }

        let has_ttl = self.conn.has_ttl(method);

        let reference = self.resolver.from_request(request)?;
        if reference.is_unresolved() && !has_ttl {
            return Ok(None);
        }

        if reference.number != 0 && !has_ttl {
            match self.is_block_finalized(request, reference.number).await {
                Ok(true) => {}
                Ok(false) => return Ok(None),
                Err(err) => {
                    tracing::debug!(
                        network_id = request.network_id(),
                        method,
                        block_number = reference.number,
                        "skip cache read because finality is unknown: {err:#}"
                    );
                    return Ok(None);
                }
            }
        }

        let keys = derive_keys(request, &reference.scope)?;
        let index = match reference.scope {
            BlockScope::Wildcard => ConnectorIndex::Reverse,
            _ => ConnectorIndex::Primary,
        };

        let value = match self
            .conn
            .get(index, &keys.group_key, &keys.request_key)
            .await?
        {
            Some(value) if !is_empty_value(&value) => value,
            _ => return Ok(None),
        };

        let result: Value =
            serde_json::from_str(&value).context("fail to decode cached result")?;

        tracing::debug!(
            network_id = request.network_id(),
            method,
            group_key = %keys.group_key,
            "cache hit"
        );

        Ok(Some(NormalizedResponse::from_cache(request, result)))
    }

    pub async fn set(&self, request: &NormalizedRequest, response: &NormalizedResponse) -> anyhow::Result<()> {
        let method = request.method();

        if self.conn.is_method_ignored(method) {
            return Ok(());
        }

        let eligible = should_cache(
            request,
            response,
            self.resolver.as_ref(),
            self.finality.as_deref(),
        )
        .await?;
        if !eligible {
            return Ok(());
        }

        let reference = self.resolver.resolve(request, response)?;
        let has_ttl = self.conn.has_ttl(method);

        if reference.is_unresolved() && !has_ttl {
            tracing::debug!(
                network_id = request.network_id(),
                method,
                "will not cache the response because it has no block reference or block number"
            );
            return Ok(());
        }

        if reference.number > 0 && !has_ttl && !self.is_block_finalized(request, reference.number).await? {
            tracing::debug!(
                network_id = request.network_id(),
                method,
                block_number = reference.number,
                "will not cache the response because block is not finalized"
            );
            return Ok(());
        }

        let keys = derive_keys(request, &reference.scope)?;
        let value = serde_json::to_string(response.result().unwrap_or(&Value::Null))
            .context("fail to encode result")?;

        tracing::debug!(
            network_id = request.network_id(),
            method,
            group_key = %keys.group_key,
            request_key = %keys.request_key,
            block_number = reference.number,
            "caching the response"
        );

        tokio::time::timeout(
            SET_TIMEOUT,
            self.conn.set(&keys.group_key, &keys.request_key, &value),
        )
        .await
        .map_err(|_| anyhow!("evm json-rpc cache driver timeout during set"))?
    }

    /// Drops every entry of each group, e.g. the blocks of a reorganized range.
    pub async fn delete_by_group_key(&self, group_keys: &[&str]) -> anyhow::Result<()> {
        for group_key in group_keys {
            self.conn
                .delete(ConnectorIndex::Primary, group_key, None)
                .await?;
        }

        Ok(())
    }

    /// Without a bound network nothing can be proven final.
    async fn is_block_finalized(&self, request: &NormalizedRequest, number: u64) -> anyhow::Result<bool> {
        match &self.finality {
            Some(finality) => finality.is_block_finalized(request.network_id(), number).await,
            None => Ok(false),
        }
    }
}

fn is_empty_value(value: &str) -> bool {
    matches!(value, "" | "\"\"" | "null" | "[]" | "{}")
}


#[cfg(test)]
mod test {
    use super::test_support::{CountingResolver, FixedFinality};
    use super::*;
    use crate::block_ref::EvmBlockRefResolver;
    use crate::cache::mock::MockConnector;
    use crate::config::{MethodCacheConfig, NonCacheableMethod};
    use crate::json_rpc::{JsonRpcRequest, JsonRpcResponse, RequestId};
    use crate::normalized::UpstreamInfo;
    use serde_json::json;

    const TX_HASH: &str = "0x1234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef";
    const BLOCK_HASH: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn request(id: u64, method: &str, params: Value) -> NormalizedRequest {
        NormalizedRequest::new(
            "evm:1",
            JsonRpcRequest::new(
                Some(RequestId::try_from(json!(id)).unwrap()),
                method.to_string(),
                params,
            ),
        )
    }

    fn response(result: Value) -> NormalizedResponse {
        NormalizedResponse::new(JsonRpcResponse::from_upstream(
            json!({"jsonrpc": "2.0", "id": 1, "result": result}),
        ))
    }

    struct Harness {
        conn: Arc<MockConnector>,
        resolver: Arc<CountingResolver>,
        finality: Arc<FixedFinality>,
        cache: EvmJsonRpcCache,
    }

    fn harness_with(mut conn: MockConnector, finality: FixedFinality) -> Harness {
        conn.set_ttl("eth_chainId", "1h").unwrap();
        conn.ignore_method("eth_sendRawTransaction").unwrap();

        let conn = Arc::new(conn);
        let resolver = Arc::new(CountingResolver::default());
        let finality = Arc::new(finality);
        let cache = EvmJsonRpcCache::from_connector(conn.clone(), resolver.clone())
            .with_network(finality.clone());

        Harness {
            conn,
            resolver,
            finality,
            cache,
        }
    }

    fn harness() -> Harness {
        harness_with(MockConnector::new(), FixedFinality::finalized_up_to(1000))
    }

    #[tokio::test]
    async fn test_block_by_number_round_trip() {
        let h = harness();
        let req = request(1, "eth_getBlockByNumber", json!(["0x64", false]));
        let block = json!({"hash": BLOCK_HASH, "number": "0x64"});

        h.cache.set(&req, &response(block.clone())).await.unwrap();

        let keys = derive_keys(&req, &BlockScope::Concrete("100".to_string())).unwrap();
        assert_eq!(keys.group_key, "evm:1:100");
        assert_eq!(
            h.conn.stored(&keys.group_key, &keys.request_key).await.as_deref(),
            Some(block.to_string().as_str())
        );

        let cached = h
            .cache
            .get(&request(7, "eth_getBlockByNumber", json!(["0x64", false])))
            .await
            .unwrap()
            .unwrap();
        assert!(cached.is_from_cache());
        assert_eq!(cached.result(), Some(&block));

        let rpc = cached.json_rpc_response();
        assert_eq!(rpc.jsonrpc, "2.0");
        assert_eq!(rpc.id, Some(RequestId::try_from(json!(7)).unwrap()));
    }

    #[tokio::test]
    async fn test_ttl_method_without_block_is_cached() {
        let h = harness();
        let req = request(1, "eth_chainId", json!([]));

        assert!(h.cache.get(&req).await.unwrap().is_none());

        h.cache.set(&req, &response(json!("0x1"))).await.unwrap();
        assert_eq!(h.conn.set_count(), 1);

        let keys = derive_keys(&req, &BlockScope::Unresolved).unwrap();
        assert_eq!(keys.group_key, "evm:1:nil");

        let cached = h.cache.get(&req).await.unwrap().unwrap();
        assert_eq!(cached.result(), Some(&json!("0x1")));
        assert_eq!(h.finality.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unresolved_block_is_skipped() {
        let h = harness();
        let req = request(1, "eth_getBlockByNumber", json!(["latest", false]));

        assert!(h.cache.get(&req).await.unwrap().is_none());
        assert_eq!(h.conn.get_count(), 0);

        let unknown = request(1, "eth_blockNumber", json!([]));
        h.cache.set(&unknown, &response(json!("0x64"))).await.unwrap();
        assert_eq!(h.conn.set_count(), 0);
    }

    #[tokio::test]
    async fn test_ignored_method_never_reaches_resolver() {
        let h = harness();
        let req = request(1, "eth_sendRawTransaction", json!(["0xdeadbeef"]));

        assert!(h.cache.get(&req).await.unwrap().is_none());
        h.cache.set(&req, &response(json!(TX_HASH))).await.unwrap();

        assert_eq!(h.resolver.call_count(), 0);
        assert_eq!(h.conn.get_count(), 0);
        assert_eq!(h.conn.set_count(), 0);
    }

    #[tokio::test]
    async fn test_ignore_wins_over_ttl() {
        let mut conn = MockConnector::new();
        conn.set_ttl("eth_gasPrice", "5s").unwrap();
        conn.ignore_method("eth_gasPrice").unwrap();
        let h = harness_with(conn, FixedFinality::finalized_up_to(1000));

        let req = request(1, "eth_gasPrice", json!([]));
        h.cache.set(&req, &response(json!("0x1"))).await.unwrap();

        assert!(h.cache.get(&req).await.unwrap().is_none());
        assert_eq!(h.conn.set_count(), 0);
        assert_eq!(h.resolver.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unfinalized_block_is_neither_written_nor_served() {
        let h = harness_with(MockConnector::new(), FixedFinality::finalized_up_to(50));
        let req = request(1, "eth_getBlockByNumber", json!(["0x64", false]));
        let keys = derive_keys(&req, &BlockScope::Concrete("100".to_string())).unwrap();

        h.cache
            .set(&req, &response(json!({"hash": BLOCK_HASH, "number": "0x64"})))
            .await
            .unwrap();
        assert_eq!(h.conn.set_count(), 0);

        h.conn.seed(&keys.group_key, &keys.request_key, "{\"number\":\"0x64\"}").await;
        assert!(h.cache.get(&req).await.unwrap().is_none());
        assert_eq!(h.conn.get_count(), 0);
    }

    #[tokio::test]
    async fn test_finality_error_skips_read_and_fails_write() {
        let h = harness_with(MockConnector::new(), FixedFinality::failing());
        let req = request(1, "eth_getBlockByNumber", json!(["0x64", false]));

        assert!(h.cache.get(&req).await.unwrap().is_none());
        assert_eq!(h.conn.get_count(), 0);

        let err = h
            .cache
            .set(&req, &response(json!({"hash": BLOCK_HASH, "number": "0x64"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "upstream unreachable");
        assert_eq!(h.conn.set_count(), 0);
    }

    #[tokio::test]
    async fn test_without_network_nothing_is_final() {
        let conn = Arc::new(MockConnector::new());
        let cache = EvmJsonRpcCache::from_connector(conn.clone(), Arc::new(EvmBlockRefResolver::new()));
        let req = request(1, "eth_getBlockByNumber", json!(["0x64", false]));

        cache
            .set(&req, &response(json!({"hash": BLOCK_HASH, "number": "0x64"})))
            .await
            .unwrap();
        assert_eq!(conn.set_count(), 0);
        assert!(cache.get(&req).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wildcard_lookup_finds_mined_transaction() {
        let h = harness();
        let req = request(1, "eth_getTransactionReceipt", json!([TX_HASH]));
        let receipt = json!({
            "transactionHash": TX_HASH,
            "blockHash": BLOCK_HASH,
            "blockNumber": "0x64",
            "status": "0x1",
        });

        h.cache.set(&req, &response(receipt.clone())).await.unwrap();
        assert_eq!(h.conn.set_count(), 1);

        let keys = derive_keys(&req, &BlockScope::Concrete(BLOCK_HASH.to_string())).unwrap();
        assert!(h.conn.stored(&keys.group_key, &keys.request_key).await.is_some());

        let cached = h.cache.get(&req).await.unwrap().unwrap();
        assert_eq!(cached.result(), Some(&receipt));

        let gets = h.conn.gets.lock().unwrap();
        assert_eq!(gets.len(), 1);
        assert_eq!(gets[0].0, ConnectorIndex::Reverse);
        assert_eq!(gets[0].1, "evm:1:*");
    }

    #[tokio::test]
    async fn test_wildcard_lookup_misses_without_reverse_index() {
        let conn = MockConnector {
            reverse_unpopulated: true,
            ..Default::default()
        };
        let h = harness_with(conn, FixedFinality::finalized_up_to(1000));
        let req = request(1, "eth_getTransactionByHash", json!([TX_HASH]));
        let tx = json!({"hash": TX_HASH, "blockHash": BLOCK_HASH, "blockNumber": "0x64"});

        h.cache.set(&req, &response(tx)).await.unwrap();

        let keys = derive_keys(&req, &BlockScope::Concrete(BLOCK_HASH.to_string())).unwrap();
        assert!(h.conn.stored(&keys.group_key, &keys.request_key).await.is_some());

        assert!(h.cache.get(&req).await.unwrap().is_none());
        assert_eq!(h.conn.gets.lock().unwrap()[0].0, ConnectorIndex::Reverse);
    }

    #[tokio::test]
    async fn test_ttl_method_at_concrete_block_skips_finality() {
        let mut conn = MockConnector::new();
        conn.set_ttl("eth_getBalance", "1h").unwrap();
        let h = harness_with(conn, FixedFinality::finalized_up_to(50));
        let req = request(
            1,
            "eth_getBalance",
            json!(["0x00000000219ab540356cbb839cbe05303d7705fa", "0x64"]),
        );

        h.cache.set(&req, &response(json!("0x1bc16d674ec80000"))).await.unwrap();
        assert_eq!(h.conn.set_count(), 1);

        let keys = derive_keys(&req, &BlockScope::Concrete("100".to_string())).unwrap();
        assert!(h.conn.stored(&keys.group_key, &keys.request_key).await.is_some());

        let cached = h.cache.get(&req).await.unwrap().unwrap();
        assert_eq!(cached.result(), Some(&json!("0x1bc16d674ec80000")));
        assert_eq!(h.finality.call_count(), 0);
    }

    #[tokio::test]
    async fn test_pending_transaction_is_not_written() {
        let h = harness();
        let req = request(1, "eth_getTransactionByHash", json!([TX_HASH]));
        let resp = response(json!({"hash": TX_HASH, "blockHash": null, "blockNumber": null}));

        h.cache.set(&req, &resp).await.unwrap();
        assert_eq!(h.conn.set_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_stored_values_are_misses() {
        let h = harness();
        let req = request(1, "eth_chainId", json!([]));
        let keys = derive_keys(&req, &BlockScope::Unresolved).unwrap();

        for stored in ["\"\"", "null", "[]", "{}"] {
            h.conn.seed(&keys.group_key, &keys.request_key, stored).await;
            assert!(h.cache.get(&req).await.unwrap().is_none(), "{stored}");
        }
    }

    #[tokio::test]
    async fn test_empty_result_is_not_written() {
        let h = harness();
        let req = request(1, "eth_getLogs", json!([{"fromBlock": "0x1", "toBlock": "0x2"}]));

        h.cache.set(&req, &response(json!([]))).await.unwrap();
        assert_eq!(h.conn.set_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_result_of_finalized_block_from_synced_upstream_is_written() {
        let h = harness();
        let req = request(1, "eth_getBlockReceipts", json!(["0x10"]));
        let resp = response(json!([])).with_upstream(UpstreamInfo {
            id: "node".to_string(),
            syncing: Some(false),
        });

        h.cache.set(&req, &resp).await.unwrap();
        assert_eq!(h.conn.set_count(), 1);

        // written, but still a miss on read
        assert!(h.cache.get(&req).await.unwrap().is_none());
        assert_eq!(h.conn.get_count(), 1);
    }

    #[tokio::test]
    async fn test_connector_errors_are_propagated() {
        let mut conn = MockConnector::new();
        conn.fail_get = true;
        conn.fail_set = true;
        let h = harness_with(conn, FixedFinality::finalized_up_to(1000));
        let req = request(1, "eth_chainId", json!([]));

        assert_eq!(
            h.cache.get(&req).await.unwrap_err().to_string(),
            "connection refused"
        );
        assert_eq!(
            h.cache.set(&req, &response(json!("0x1"))).await.unwrap_err().to_string(),
            "connection refused"
        );
    }

    #[tokio::test]
    async fn test_malformed_request_is_an_error() {
        let h = harness();
        let req = request(1, "eth_getBlockByNumber", json!(["0xzz", false]));

        assert!(h.cache.get(&req).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_times_out() {
        let mut conn = MockConnector::new();
        conn.set_delay = Some(SET_TIMEOUT + Duration::from_secs(1));
        let h = harness_with(conn, FixedFinality::finalized_up_to(1000));
        let req = request(1, "eth_chainId", json!([]));

        let err = h.cache.set(&req, &response(json!("0x1"))).await.unwrap_err();
        assert_eq!(err.to_string(), "evm json-rpc cache driver timeout during set");
        assert_eq!(h.conn.set_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_group_key() {
        let h = harness();
        let a = request(1, "eth_getBlockByNumber", json!(["0x64", false]));
        let b = request(1, "eth_getBlockByNumber", json!(["0x64", true]));
        let other = request(1, "eth_getBlockByNumber", json!(["0x65", false]));

        for req in [&a, &b, &other] {
            h.cache.set(req, &response(json!({"hash": BLOCK_HASH}))).await.unwrap();
        }

        h.cache.delete_by_group_key(&["evm:1:100"]).await.unwrap();

        assert!(h.cache.get(&a).await.unwrap().is_none());
        assert!(h.cache.get(&b).await.unwrap().is_none());
        assert!(h.cache.get(&other).await.unwrap().is_some());
        assert_eq!(h.conn.deletes.lock().unwrap().as_slice(), ["evm:1:100"]);
    }

    #[tokio::test]
    async fn test_policies_registered_from_config() {
        let cfg = CacheConfig {
            methods: vec![MethodCacheConfig {
                method: "eth_chainId".to_string(),
                ttl: "1m".to_string(),
            }],
            non_cacheable_methods: vec![NonCacheableMethod {
                method: "eth_sendRawTransaction".to_string(),
            }],
            ..Default::default()
        };

        let cache = EvmJsonRpcCache::new(&cfg, Arc::new(EvmBlockRefResolver::new())).unwrap();
        assert!(cache.conn.has_ttl("eth_chainId"));
        assert!(cache.conn.is_method_ignored("eth_sendRawTransaction"));
    }

    #[test]
    fn test_invalid_ttl_fails_construction() {
        let cfg = CacheConfig {
            methods: vec![MethodCacheConfig {
                method: "eth_chainId".to_string(),
                ttl: "soon".to_string(),
            }],
            ..Default::default()
        };

        let err = EvmJsonRpcCache::new(&cfg, Arc::new(EvmBlockRefResolver::new()))
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "fail to register method ttl");
    }
}
