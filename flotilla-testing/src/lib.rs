//! Simulated substrate for exercising flotilla testnets in-process.
//!
//! [`SimCluster`] stands in for the compute backend and keeps an ordered
//! event log, so tests can assert on startup and teardown ordering.
//! [`SimChain`] answers status and blockchain queries for the nodes it
//! runs on.

pub mod chain_sim;
pub mod cluster_sim;
pub mod fault_sim;

pub use chain_sim::{SimChain, SimNodeClient, StatusStep};
pub use cluster_sim::{InstanceRecord, InstanceStatus, SimCluster, SimEvent};
pub use fault_sim::SimFaultInjector;

use flotilla_core::{ClusterSession, NodeClientFactory, Result};
use flotilla_testnet::{session_scope, Testnet, TestnetConfig};
use std::sync::Arc;

/// Opens a simulated session for `config` and builds a testnet on it.
pub fn sim_testnet(config: TestnetConfig) -> Result<(Testnet, SimCluster, SimChain)> {
    let cluster = SimCluster::init(session_scope(&config.name));
    let chain = SimChain::new(cluster.clone());
    let session: Arc<dyn ClusterSession> = Arc::new(cluster.clone());
    let clients: Arc<dyn NodeClientFactory> = Arc::new(chain.clone());
    let testnet = Testnet::new(config, session, clients)?;
    Ok((testnet, cluster, chain))
}

/// Installs a WARN-level subscriber once per test binary.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_test_writer()
        .try_init();
}
