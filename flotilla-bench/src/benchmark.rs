use std::sync::Arc;
use tokio::time::sleep;
use tracing::{info, warn};

use flotilla_core::{BlockSummary, ClusterSession, GenesisDoc, NodeClientFactory};
use flotilla_testnet::{CleanupReport, NetworkConditionsHook, Testnet, TestnetConfig};

use crate::error::{BenchError, Result};
use crate::manifest::{Manifest, GOV_MAX_SQUARE_SIZE_PARAM};
use crate::trace_push::TracePushConfig;

/// What a validated chain looked like.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockchainSummary {
    pub blocks: usize,
    pub last_height: u64,
    pub total_txs: usize,
    pub total_bytes: usize,
}

/// Every block must run `expected_app_version`, and together they must carry
/// at least `min_transactions` transactions.
pub fn validate_blockchain(
    blocks: &[BlockSummary],
    expected_app_version: u64,
    min_transactions: usize,
) -> Result<BlockchainSummary> {
    let mut summary = BlockchainSummary::default();
    for block in blocks {
        if block.app_version != expected_app_version {
            return Err(BenchError::AppVersionMismatch {
                expected: expected_app_version,
                actual: block.app_version,
                height: block.height,
            });
        }
        summary.blocks += 1;
        summary.last_height = summary.last_height.max(block.height);
        summary.total_txs += block.tx_count;
        summary.total_bytes += block.size_bytes;
    }
    if summary.total_txs < min_transactions {
        return Err(BenchError::TooFewTransactions {
            expected: min_transactions,
            actual: summary.total_txs,
        });
    }
    Ok(summary)
}

/// A testnet driven by a [`Manifest`]: `setup_nodes`, then `run`, then
/// `check_results`. `execute` runs all three and always cleans up.
pub struct BenchmarkTest {
    testnet: Testnet,
    manifest: Manifest,
    trace_push: Option<TracePushConfig>,
}

impl BenchmarkTest {
    pub fn new(
        manifest: Manifest,
        config: TestnetConfig,
        session: Arc<dyn ClusterSession>,
        clients: Arc<dyn NodeClientFactory>,
    ) -> Result<Self> {
        manifest.validate()?;
        let config = config.with_chain_id(manifest.chain_id.clone());
        let mut testnet = Testnet::new(config, session, clients)?;
        testnet.set_consensus_params(manifest.consensus_params())?;

        let square_size = manifest.gov_max_square_size;
        testnet.add_genesis_modifier(Arc::new(move |doc: &mut GenesisDoc| {
            doc.app_params.insert(
                GOV_MAX_SQUARE_SIZE_PARAM.to_string(),
                serde_json::Value::from(square_size),
            );
        }))?;

        let trace_push = if manifest.push_trace {
            TracePushConfig::from_env()
        } else {
            None
        };
        Ok(Self {
            testnet,
            manifest,
            trace_push,
        })
    }

    /// Overrides the trace push settings read from the environment.
    pub fn with_trace_push(mut self, trace_push: Option<TracePushConfig>) -> Self {
        self.trace_push = trace_push;
        self
    }

    /// Creates validators and tx clients, then sets the testnet up.
    ///
    /// The first two validators capture packets. Tx clients are spread over
    /// the validators' gRPC endpoints in order, wrapping around when there
    /// are more clients than validators.
    pub async fn setup_nodes(&mut self) -> Result<()> {
        let m = &self.manifest;
        let captured = m.validators.min(2);
        self.testnet
            .create_genesis_nodes(
                captured,
                &m.app_version,
                m.self_delegation,
                m.upgrade_height,
                m.validator_resources.clone(),
                true,
            )
            .await?;
        self.testnet
            .create_genesis_nodes(
                m.validators - captured,
                &m.app_version,
                m.self_delegation,
                m.upgrade_height,
                m.validator_resources.clone(),
                false,
            )
            .await?;

        if m.needs_fault_injection() {
            for node in self.testnet.nodes_mut() {
                node.enable_fault_injection().await?;
            }
        }

        let endpoints = self.testnet.remote_grpc_endpoints().await?;
        info!(endpoints = ?endpoints, "Validator gRPC endpoints");
        let targets: Vec<String> = endpoints.iter().cycle().take(m.tx_clients).cloned().collect();
        let template = self
            .testnet
            .workload_spec("txsim", &m.txsim_version, "")
            .with_sequences(m.blob_sequences)
            .with_blob_sizes(m.blob_sizes)
            .with_blobs_per_sequence(m.blobs_per_sequence)
            .with_resources(m.txsim_resources.clone());
        self.testnet.create_workload_clients(&template, &targets).await?;

        info!(testnet = %m.name, "Setting up testnet");
        self.testnet.setup(&m.config_options()).await?;

        if m.push_trace {
            match &self.trace_push {
                Some(push) => {
                    let vars = push.env_vars();
                    for node in self.testnet.nodes_mut() {
                        for (key, value) in &vars {
                            node.set_env(key, value).await?;
                        }
                    }
                    info!(bucket = %push.bucket_name, "Configured trace push");
                }
                None => warn!("Trace push requested but not configured in the environment"),
            }
        }
        Ok(())
    }

    /// Starts the testnet, shaping the network if asked, and lets the tx
    /// clients submit for the manifest's duration.
    pub async fn run(&mut self) -> Result<()> {
        let hook = NetworkConditionsHook::new(
            self.manifest.latency_params(),
            self.manifest.bandwidth_limit(),
        )
        .with_sidecar_timeout(self.testnet.config().node_startup_timeout);
        self.testnet.start_with_hook(&hook).await?;

        info!(
            duration = ?self.manifest.test_duration,
            "Waiting for tx clients to submit transactions"
        );
        sleep(self.manifest.test_duration).await;
        Ok(())
    }

    /// Reads the chain from the first node and validates it.
    pub async fn check_results(&self) -> Result<BlockchainSummary> {
        let node = self.testnet.node(0).ok_or(BenchError::NoNodes)?;
        let client = node.client(self.testnet.client_factory().as_ref())?;
        info!(node = %node.name(), "Reading blockchain");
        let blocks = client.read_blockchain().await?;
        let summary = validate_blockchain(
            &blocks,
            self.manifest.expected_app_version,
            self.manifest.min_transactions,
        )?;
        info!(
            blocks = summary.blocks,
            txs = summary.total_txs,
            bytes = summary.total_bytes,
            "Results check passed"
        );
        Ok(summary)
    }

    pub async fn cleanup(&mut self) -> CleanupReport {
        self.testnet.cleanup().await
    }

    /// Runs every step, then cleans up whatever the outcome.
    pub async fn execute(&mut self) -> Result<BlockchainSummary> {
        info!(benchmark = %self.manifest.name, "Running benchmark");
        let outcome = self.execute_steps().await;
        let report = self.cleanup().await;
        if !report.failed.is_empty() {
            warn!(failed = ?report.failed, "Some participants were not cleaned up");
        }
        outcome
    }

    async fn execute_steps(&mut self) -> Result<BlockchainSummary> {
        self.setup_nodes().await?;
        self.run().await?;
        self.check_results().await
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn testnet(&self) -> &Testnet {
        &self.testnet
    }

    pub fn testnet_mut(&mut self) -> &mut Testnet {
        &mut self.testnet
    }
}
