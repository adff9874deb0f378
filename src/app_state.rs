use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use reqwest::Url;

use crate::block_ref::EvmBlockRefResolver;
use crate::config::{AppConfig, NetworkConfig};
use crate::finality::FinalityTracker;
use crate::json_rpc_cache::EvmJsonRpcCache;
use crate::metrics::Metrics;

pub struct ChainState {
    pub network_id: String,
    pub upstream: Url,
    pub cache: EvmJsonRpcCache,
    pub finality: Arc<FinalityTracker>,
    pub finality_poll_interval: Duration,
}

pub struct AppState {
    /// Keyed by the uppercased network name, as served under `POST /{chain}`.
    pub chains: HashMap<String, ChainState>,
    pub http_client: reqwest::Client,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(cfg: &AppConfig, metrics_prefix: &str) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::new();
        let cache = EvmJsonRpcCache::new(&cfg.cache, Arc::new(EvmBlockRefResolver::new()))
            .context("fail to create json-rpc cache")?;

        let mut chains = HashMap::new();
        for network in &cfg.networks {
            let name = network.name.to_uppercase();
            if chains.contains_key(&name) {
                bail!("network {} is configured more than once", network.name);
            }

            let chain_state = new_chain_state(network, &cache, &http_client)?;
            tracing::info!(
                network_id = %chain_state.network_id,
                upstream = %chain_state.upstream,
                "Linked `{name}` to upstream"
            );

            chains.insert(name, chain_state);
        }

        Ok(Self {
            chains,
            http_client,
            metrics: Metrics::new(metrics_prefix)?,
        })
    }
}

fn new_chain_state(
    network: &NetworkConfig,
    cache: &EvmJsonRpcCache,
    http_client: &reqwest::Client,
) -> anyhow::Result<ChainState> {
    let finality = Arc::new(FinalityTracker::new(
        network.network_id.clone(),
        network.upstream.clone(),
        http_client.clone(),
    ));

    Ok(ChainState {
        network_id: network.network_id.clone(),
        upstream: network.upstream.clone(),
        cache: cache.with_network(finality.clone()),
        finality,
        finality_poll_interval: network.poll_interval()?,
    })
}
