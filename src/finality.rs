//! Block finality as seen by a network's upstream.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use reqwest::Url;

use crate::normalized::UpstreamInfo;
use crate::utils;

#[async_trait]
pub trait FinalityOracle: Send + Sync {
    async fn is_block_finalized(&self, network_id: &str, block_number: u64) -> anyhow::Result<bool>;
}

const SYNC_UNKNOWN: u8 = 0;
const SYNC_SYNCING: u8 = 1;
const SYNC_SYNCED: u8 = 2;

/// Tracks the finalized head and sync state of one upstream node.
///
/// Answers stay errors until the first successful poll.
pub struct FinalityTracker {
    network_id: String,
    upstream: Url,
    http_client: reqwest::Client,
    finalized_block: AtomicU64,
    sync_state: AtomicU8,
}

impl FinalityTracker {
    pub fn new(network_id: impl Into<String>, upstream: Url, http_client: reqwest::Client) -> Self {
        Self {
            network_id: network_id.into(),
            upstream,
            http_client,
            finalized_block: AtomicU64::new(0),
            sync_state: AtomicU8::new(SYNC_UNKNOWN),
        }
    }

    pub fn network_id(&self) -> &str {
        &self.network_id
    }

    pub fn finalized_block(&self) -> Option<u64> {
        match self.finalized_block.load(Ordering::Acquire) {
            0 => None,
            number => Some(number),
        }
    }

    pub fn syncing(&self) -> Option<bool> {
        match self.sync_state.load(Ordering::Acquire) {
            SYNC_SYNCING => Some(true),
            SYNC_SYNCED => Some(false),
            _ => None,
        }
    }

    /// The finalized head never moves backwards, a lagging poll is ignored.
    pub fn record_finalized_block(&self, number: u64) {
        self.finalized_block.fetch_max(number, Ordering::AcqRel);
    }

    pub fn record_syncing(&self, syncing: bool) {
        let state = if syncing { SYNC_SYNCING } else { SYNC_SYNCED };
        self.sync_state.store(state, Ordering::Release);
    }

    pub fn upstream_info(&self) -> UpstreamInfo {
        UpstreamInfo {
            id: self
                .upstream
                .host_str()
                .unwrap_or(self.upstream.as_str())
                .to_string(),
            syncing: self.syncing(),
        }
    }

    pub async fn refresh(&self) -> anyhow::Result<()> {
        let finalized =
            utils::get_finalized_block_number(&self.http_client, &self.upstream).await?;
        self.record_finalized_block(finalized);

        let syncing = utils::get_syncing(&self.http_client, &self.upstream).await?;
        self.record_syncing(syncing);

        tracing::debug!(
            network_id = %self.network_id,
            finalized,
            syncing,
            "refreshed upstream finality"
        );

        Ok(())
    }

    pub async fn run(self: Arc<Self>, poll_interval: Duration) {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            if let Err(err) = self.refresh().await {
                tracing::warn!(
                    network_id = %self.network_id,
                    "fail to refresh finalized block: {err:#}"
                );
            }
        }
    }
}

#[async_trait]
impl FinalityOracle for FinalityTracker {
    async fn is_block_finalized(&self, network_id: &str, block_number: u64) -> anyhow::Result<bool> {
        if network_id != self.network_id {
            bail!(
                "finality of {network_id} is not tracked here, tracking {}",
                self.network_id
            );
        }

        match self.finalized_block() {
            Some(finalized) => Ok(block_number <= finalized),
            None => bail!("finalized block of {network_id} is not known yet"),
        }
    }
}
