use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use flotilla_core::{BlockSummary, FlotillaError, NodeClient, NodeClientFactory, NodeStatus, Result};

use crate::cluster_sim::{InstanceStatus, SimCluster, SimEvent};

/// One scripted status response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusStep {
    Height(u64),
    Error(String),
}

struct ChainInner {
    cluster: SimCluster,
    scripts: DashMap<String, VecDeque<StatusStep>>,
    fallback_heights: DashMap<String, u64>,
    blocks: Mutex<Vec<BlockSummary>>,
}

/// Simulated chain behind the RPC endpoints of a [`SimCluster`].
///
/// Status calls are answered from a per-node script, then from the node's
/// fallback height (1 unless stalled). A node whose instance is not running
/// refuses connections.
#[derive(Clone)]
pub struct SimChain {
    inner: Arc<ChainInner>,
}

impl SimChain {
    pub fn new(cluster: SimCluster) -> Self {
        Self {
            inner: Arc::new(ChainInner {
                cluster,
                scripts: DashMap::new(),
                fallback_heights: DashMap::new(),
                blocks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Queues status responses for `node`.
    pub fn script(&self, node: &str, steps: impl IntoIterator<Item = StatusStep>) {
        self.inner
            .scripts
            .entry(node.to_string())
            .or_default()
            .extend(steps);
    }

    /// Once its script is exhausted, `node` keeps reporting height zero.
    pub fn stall(&self, node: &str) {
        self.inner.fallback_heights.insert(node.to_string(), 0);
    }

    /// Appends `count` blocks with `txs_per_block` transactions each.
    pub fn produce_blocks(&self, count: u64, app_version: u64, txs_per_block: usize) {
        let mut blocks = self.inner.blocks.lock();
        let start = blocks.last().map(|b| b.height).unwrap_or(0);
        for height in start + 1..=start + count {
            blocks.push(BlockSummary {
                height,
                time_ms: height * 1_000,
                app_version,
                tx_count: txs_per_block,
                size_bytes: txs_per_block * 512,
            });
        }
    }

    pub fn set_blocks(&self, blocks: Vec<BlockSummary>) {
        *self.inner.blocks.lock() = blocks;
    }

    pub fn status_polls(&self, node: &str) -> usize {
        self.inner
            .cluster
            .count(&SimEvent::StatusPolled(node.to_string()))
    }

    fn next_status(&self, node: &str) -> Result<NodeStatus> {
        self.inner.cluster.record(SimEvent::StatusPolled(node.to_string()));
        if self.inner.cluster.status(node) != Some(InstanceStatus::Running) {
            return Err(FlotillaError::internal(format!("{}: connection refused", node)));
        }
        let step = self
            .inner
            .scripts
            .get_mut(node)
            .and_then(|mut script| script.pop_front());
        match step {
            Some(StatusStep::Height(latest_block_height)) => Ok(NodeStatus { latest_block_height }),
            Some(StatusStep::Error(message)) => Err(FlotillaError::internal(message)),
            None => {
                let latest_block_height = self
                    .inner
                    .fallback_heights
                    .get(node)
                    .map(|h| *h.value())
                    .unwrap_or(1);
                Ok(NodeStatus { latest_block_height })
            }
        }
    }
}

impl NodeClientFactory for SimChain {
    fn connect(&self, rpc_address: &str) -> Result<Arc<dyn NodeClient>> {
        let node = self
            .inner
            .cluster
            .instance_for_host(rpc_address)
            .ok_or_else(|| FlotillaError::internal(format!("no node behind {}", rpc_address)))?;
        Ok(Arc::new(SimNodeClient {
            node,
            chain: self.clone(),
        }))
    }
}

/// Status client for one simulated node.
pub struct SimNodeClient {
    node: String,
    chain: SimChain,
}

impl SimNodeClient {
    pub fn node(&self) -> &str {
        &self.node
    }
}

#[async_trait]
impl NodeClient for SimNodeClient {
    async fn status(&self) -> Result<NodeStatus> {
        self.chain.next_status(&self.node)
    }

    async fn read_blockchain(&self) -> Result<Vec<BlockSummary>> {
        Ok(self.chain.inner.blocks.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_core::ClusterSession;

    #[tokio::test]
    async fn test_scripted_status_then_fallback() {
        let cluster = SimCluster::init("chain");
        let mut instance = cluster.create_instance("val0").await.unwrap();
        instance.commit().await.unwrap();
        instance.start_async().await.unwrap();
        instance.wait_running().await.unwrap();
        let rpc = instance.add_host(26657).await.unwrap();

        let chain = SimChain::new(cluster.clone());
        chain.script(
            "val0",
            [StatusStep::Error("timeout".to_string()), StatusStep::Height(0)],
        );
        let client = chain.connect(&rpc).unwrap();

        assert!(client.status().await.is_err());
        assert_eq!(client.status().await.unwrap().latest_block_height, 0);
        assert_eq!(client.status().await.unwrap().latest_block_height, 1);

        chain.stall("val0");
        assert_eq!(client.status().await.unwrap().latest_block_height, 0);
        assert_eq!(chain.status_polls("val0"), 4);
        assert!(chain.connect("http://127.0.0.1:1").is_err());
    }

    #[tokio::test]
    async fn test_produce_blocks_continues_heights() {
        let chain = SimChain::new(SimCluster::init("chain"));
        chain.produce_blocks(3, 2, 4);
        chain.produce_blocks(2, 2, 0);

        let client = SimNodeClient {
            node: "val0".to_string(),
            chain: chain.clone(),
        };
        let blocks = client.read_blockchain().await.unwrap();
        let heights: Vec<u64> = blocks.iter().map(|b| b.height).collect();
        assert_eq!(heights, vec![1, 2, 3, 4, 5]);
        assert_eq!(blocks.iter().map(|b| b.tx_count).sum::<usize>(), 12);
    }
}
