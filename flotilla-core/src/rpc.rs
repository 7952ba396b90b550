//! Node status and chain reading interfaces.

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Subset of a node's status response used for readiness polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub latest_block_height: u64,
}

/// Summary of one committed block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub height: u64,
    pub time_ms: u64,
    pub app_version: u64,
    pub tx_count: usize,
    pub size_bytes: usize,
}

/// RPC client bound to one node.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn status(&self) -> Result<NodeStatus>;

    /// Every block from height 1 to the current tip.
    async fn read_blockchain(&self) -> Result<Vec<BlockSummary>>;
}

/// Opens [`NodeClient`]s for externally reachable RPC addresses.
pub trait NodeClientFactory: Send + Sync {
    fn connect(&self, rpc_address: &str) -> Result<Arc<dyn NodeClient>>;
}
