use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;

use flotilla_core::{ClusterSession, NodeClientFactory, Resources, DEFAULT_APP_VERSION};
use flotilla_node::SizeRange;
use flotilla_testnet::{Testnet, TestnetConfig};

use crate::benchmark::{validate_blockchain, BlockchainSummary};
use crate::error::{BenchError, Result};
use crate::manifest::{DEFAULT_MIN_TRANSACTIONS, DEFAULT_VERSION};

/// Validators submit blobs from a single client for a short while, then the
/// chain must show at least a handful of transactions on the expected app
/// version.
#[derive(Debug, Clone)]
pub struct E2ESimple {
    pub validators: usize,
    pub version: String,
    pub txsim_version: String,
    pub self_delegation: i64,
    pub duration: Duration,
    pub expected_app_version: u64,
    pub min_transactions: usize,
}

impl Default for E2ESimple {
    fn default() -> Self {
        Self {
            validators: 4,
            version: DEFAULT_VERSION.to_string(),
            txsim_version: DEFAULT_VERSION.to_string(),
            self_delegation: 10_000_000,
            duration: Duration::from_secs(30),
            expected_app_version: DEFAULT_APP_VERSION,
            min_transactions: DEFAULT_MIN_TRANSACTIONS,
        }
    }
}

impl E2ESimple {
    /// Builds, runs and checks the scenario, cleaning up whatever happens.
    pub async fn run(
        &self,
        config: TestnetConfig,
        session: Arc<dyn ClusterSession>,
        clients: Arc<dyn NodeClientFactory>,
    ) -> Result<BlockchainSummary> {
        let mut testnet = Testnet::new(config, session, clients)?;
        let outcome = self.run_on(&mut testnet).await;
        testnet.cleanup().await;
        outcome
    }

    async fn run_on(&self, testnet: &mut Testnet) -> Result<BlockchainSummary> {
        info!(validators = self.validators, version = %self.version, "Running simple e2e test");
        testnet
            .create_genesis_nodes(
                self.validators,
                &self.version,
                self.self_delegation,
                0,
                Resources::default(),
                false,
            )
            .await?;

        let endpoints = testnet.remote_grpc_endpoints().await?;
        let target = endpoints.first().ok_or(BenchError::NoNodes)?;
        let spec = testnet
            .workload_spec("txsim", &self.txsim_version, target)
            .with_sequences(1)
            .with_blob_sizes(SizeRange::new(100, 2000)?)
            .with_blobs_per_sequence(100);
        testnet.create_workload_client(spec).await?;

        testnet.setup(&[]).await?;
        testnet.start().await?;

        sleep(self.duration).await;

        let node = testnet.node(0).ok_or(BenchError::NoNodes)?;
        let client = node.client(testnet.client_factory().as_ref())?;
        let blocks = client.read_blockchain().await?;
        validate_blockchain(&blocks, self.expected_app_version, self.min_transactions)
    }
}
