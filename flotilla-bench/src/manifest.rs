//! # Experiment Manifests
//!
//! A [`Manifest`] describes one experiment: the topology, the workload, the
//! node configuration knobs and what the resulting chain must look like.
//! Manifests are plain JSON so they can be kept next to results.

use flotilla_core::{ConsensusParams, LatencyParams, Resources, DEFAULT_APP_VERSION};
use flotilla_node::{ConfigOption, SizeRange};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{BenchError, Result};

const MIB: i64 = 1024 * 1024;

/// Node and txsim version used by presets.
pub const DEFAULT_VERSION: &str = "latest";

/// Default lower bound on committed transactions.
pub const DEFAULT_MIN_TRANSACTIONS: usize = 10;

pub const DEFAULT_GOV_MAX_SQUARE_SIZE: u64 = 64;

/// Genesis app parameter key for the governance square size cap.
pub const GOV_MAX_SQUARE_SIZE_PARAM: &str = "gov_max_square_size";

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub chain_id: String,
    pub validators: usize,
    pub validator_resources: Resources,
    pub txsim_resources: Resources,
    pub self_delegation: i64,
    pub app_version: String,
    pub txsim_version: String,
    pub enable_latency: bool,
    pub latency: LatencyParams,
    /// Zero leaves bandwidth unshaped.
    pub bandwidth_kbps: u64,
    pub blobs_per_sequence: usize,
    pub blob_sequences: usize,
    pub blob_sizes: SizeRange,
    /// Bytes per second, each direction.
    pub per_peer_bandwidth: u64,
    pub upgrade_height: u64,
    #[serde(with = "duration_ms")]
    pub timeout_commit: Duration,
    #[serde(with = "duration_ms")]
    pub timeout_propose: Duration,
    pub mempool: String,
    pub broadcast_txs: bool,
    pub prometheus: bool,
    pub gov_max_square_size: u64,
    pub max_block_bytes: i64,
    #[serde(with = "duration_ms")]
    pub test_duration: Duration,
    pub tx_clients: usize,
    pub local_tracing_type: String,
    pub push_trace: bool,
    #[serde(default = "default_app_version")]
    pub expected_app_version: u64,
    #[serde(default = "default_min_transactions")]
    pub min_transactions: usize,
}

fn default_app_version() -> u64 {
    DEFAULT_APP_VERSION
}

fn default_min_transactions() -> usize {
    DEFAULT_MIN_TRANSACTIONS
}

impl Manifest {
    /// Two validators on default resources, two light clients, two minutes.
    pub fn two_node_simple() -> Self {
        Self {
            name: "TwoNodeSimple".to_string(),
            chain_id: "two-node-simple".to_string(),
            validators: 2,
            validator_resources: Resources::default(),
            txsim_resources: Resources::default(),
            self_delegation: 10_000_000,
            app_version: DEFAULT_VERSION.to_string(),
            txsim_version: DEFAULT_VERSION.to_string(),
            enable_latency: false,
            latency: LatencyParams::new(100, 10),
            bandwidth_kbps: 0,
            blobs_per_sequence: 6,
            blob_sequences: 1,
            blob_sizes: SizeRange::exact(200_000),
            per_peer_bandwidth: 5 * MIB as u64,
            upgrade_height: 0,
            timeout_commit: Duration::from_secs(1),
            timeout_propose: Duration::from_secs(1),
            mempool: "v1".to_string(),
            broadcast_txs: true,
            prometheus: true,
            gov_max_square_size: DEFAULT_GOV_MAX_SQUARE_SIZE,
            max_block_bytes: ConsensusParams::default().block_max_bytes,
            test_duration: Duration::from_secs(120),
            tx_clients: 2,
            local_tracing_type: "local".to_string(),
            push_trace: false,
            expected_app_version: DEFAULT_APP_VERSION,
            min_transactions: DEFAULT_MIN_TRANSACTIONS,
        }
    }

    /// Base of the big-block family: two large validators, 128 MiB blocks.
    pub fn big_block() -> Self {
        let large = Resources::new("12Gi", "12Gi", "8", "20Gi");
        let client = Resources::new("1Gi", "3Gi", "2", "1Gi");
        Self {
            name: "big-block".to_string(),
            chain_id: "test".to_string(),
            validator_resources: large,
            txsim_resources: client,
            latency: LatencyParams::new(150, 150),
            blob_sequences: 50,
            per_peer_bandwidth: 100 * MIB as u64,
            timeout_commit: Duration::from_secs(11),
            timeout_propose: Duration::from_secs(10),
            gov_max_square_size: 1024,
            max_block_bytes: 128 * MIB,
            test_duration: Duration::from_secs(600),
            push_trace: true,
            ..Self::two_node_simple()
        }
    }

    fn big_block_variant(name: &str, chain_id: &str, block_mib: i64) -> Self {
        Self {
            name: name.to_string(),
            chain_id: chain_id.to_string(),
            max_block_bytes: block_mib * MIB,
            ..Self::big_block()
        }
    }

    fn large_network(name: &str, chain_id: &str, block_mib: i64, validators: usize) -> Self {
        Self {
            validators,
            tx_clients: validators,
            blob_sequences: 20,
            ..Self::big_block_variant(name, chain_id, block_mib)
        }
    }

    /// Every named preset.
    pub fn presets() -> Vec<Manifest> {
        vec![
            Self::two_node_simple(),
            Self::big_block_variant("TwoNodeBigBlock_8MiB", "two-node-big-block-8mib", 8),
            Self {
                enable_latency: true,
                ..Self::big_block_variant(
                    "TwoNodeBigBlock_8MiB_Latency",
                    "two-node-big-block-8mib-latency",
                    8,
                )
            },
            Self {
                bandwidth_kbps: 10_000,
                ..Self::big_block_variant(
                    "TwoNodeBigBlock_8MiB_Bandwidth",
                    "two-node-big-block-8mib-bandwidth",
                    8,
                )
            },
            Self::big_block_variant("TwoNodeBigBlock_32MiB", "two-node-big-block-32mib", 32),
            Self::big_block_variant("TwoNodeBigBlock_64MiB", "two-node-big-block-64mib", 64),
            Self {
                test_duration: Duration::from_secs(900),
                ..Self::large_network(
                    "LargeNetwork_BigBlock_8MiB",
                    "large-network-big-block-8mib",
                    8,
                    100,
                )
            },
            Self {
                test_duration: Duration::from_secs(1800),
                enable_latency: true,
                latency: LatencyParams::new(70, 0),
                ..Self::large_network(
                    "LargeNetwork_BigBlock_8MiB_Latency",
                    "large-network-big-block-8mib-latency",
                    8,
                    100,
                )
            },
            Self::large_network(
                "LargeNetwork_BigBlock_32MiB",
                "large-network-big-block-32mib",
                32,
                50,
            ),
            Self::large_network(
                "LargeNetwork_BigBlock_64MiB",
                "large-network-big-block-64mib",
                64,
                50,
            ),
        ]
    }

    pub fn preset(name: &str) -> Result<Manifest> {
        Self::presets()
            .into_iter()
            .find(|m| m.name == name)
            .ok_or_else(|| BenchError::UnknownPreset(name.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Manifest> {
        let manifest: Manifest = serde_json::from_str(json)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Manifest> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| Err(BenchError::invalid_manifest(&self.name, message));
        if self.name.is_empty() {
            return invalid("name must not be empty");
        }
        if self.chain_id.is_empty() {
            return invalid("chain id must not be empty");
        }
        if self.validators == 0 {
            return invalid("at least one validator is required");
        }
        if self.self_delegation <= 0 {
            return invalid("self delegation must be positive");
        }
        if self.max_block_bytes <= 0 {
            return invalid("max block bytes must be positive");
        }
        if self.gov_max_square_size == 0 {
            return invalid("gov max square size must be positive");
        }
        if self.test_duration.is_zero() {
            return invalid("test duration must be positive");
        }
        if self.min_transactions > 0 && self.tx_clients == 0 {
            return invalid("transactions are expected but no tx clients are configured");
        }
        if self.tx_clients > 0 && (self.blob_sequences == 0 || self.blobs_per_sequence == 0) {
            return invalid("tx clients need at least one sequence and one blob per sequence");
        }
        Ok(())
    }

    pub fn consensus_params(&self) -> ConsensusParams {
        ConsensusParams::default()
            .with_block_max_bytes(self.max_block_bytes)
            .with_app_version(self.expected_app_version)
    }

    /// Node configuration overrides applied during setup.
    pub fn config_options(&self) -> Vec<ConfigOption> {
        vec![
            ConfigOption::PerPeerBandwidth(self.per_peer_bandwidth),
            ConfigOption::TimeoutPropose(self.timeout_propose),
            ConfigOption::TimeoutCommit(self.timeout_commit),
            ConfigOption::Prometheus(self.prometheus),
            ConfigOption::Mempool(self.mempool.clone()),
            ConfigOption::BroadcastTxs(self.broadcast_txs),
            ConfigOption::LocalTracing(self.local_tracing_type.clone()),
        ]
    }

    /// True when nodes need a fault-injection sidecar.
    pub fn needs_fault_injection(&self) -> bool {
        self.enable_latency || self.bandwidth_kbps > 0
    }

    pub fn latency_params(&self) -> Option<LatencyParams> {
        self.enable_latency.then_some(self.latency)
    }

    pub fn bandwidth_limit(&self) -> Option<u64> {
        (self.bandwidth_kbps > 0).then_some(self.bandwidth_kbps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_presets_are_valid_and_unique() {
        let presets = Manifest::presets();
        assert_eq!(presets.len(), 10);
        let names: HashSet<&str> = presets.iter().map(|m| m.name.as_str()).collect();
        let chains: HashSet<&str> = presets.iter().map(|m| m.chain_id.as_str()).collect();
        assert_eq!(names.len(), presets.len());
        assert_eq!(chains.len(), presets.len());
        for manifest in &presets {
            manifest.validate().unwrap();
        }
    }

    #[test]
    fn test_big_block_family() {
        let m = Manifest::preset("TwoNodeBigBlock_32MiB").unwrap();
        assert_eq!(m.max_block_bytes, 32 * MIB);
        assert_eq!(m.validators, 2);
        assert_eq!(m.validator_resources.cpu, "8");
        assert!(!m.needs_fault_injection());

        let latency = Manifest::preset("TwoNodeBigBlock_8MiB_Latency").unwrap();
        assert_eq!(latency.latency_params(), Some(LatencyParams::new(150, 150)));
        assert_eq!(latency.bandwidth_limit(), None);

        let bandwidth = Manifest::preset("TwoNodeBigBlock_8MiB_Bandwidth").unwrap();
        assert_eq!(bandwidth.latency_params(), None);
        assert_eq!(bandwidth.bandwidth_limit(), Some(10_000));
        assert!(bandwidth.needs_fault_injection());

        let large = Manifest::preset("LargeNetwork_BigBlock_8MiB_Latency").unwrap();
        assert_eq!(large.validators, 100);
        assert_eq!(large.tx_clients, 100);
        assert_eq!(large.latency, LatencyParams::new(70, 0));
        assert_eq!(large.test_duration, Duration::from_secs(1800));

        assert!(matches!(
            Manifest::preset("Nope"),
            Err(BenchError::UnknownPreset(_))
        ));
    }

    #[test]
    fn test_json_defaults_and_durations() {
        let manifest = Manifest::two_node_simple();
        let mut value = serde_json::to_value(&manifest).unwrap();
        assert_eq!(value["timeout_commit"], 1000);
        assert_eq!(value["blob_sizes"], "200000");

        let object = value.as_object_mut().unwrap();
        object.remove("expected_app_version");
        object.remove("min_transactions");
        let parsed = Manifest::from_json(&value.to_string()).unwrap();
        assert_eq!(parsed, manifest);
    }

    #[test]
    fn test_validation_rejects_bad_manifests() {
        let no_validators = Manifest {
            validators: 0,
            ..Manifest::two_node_simple()
        };
        assert!(matches!(
            no_validators.validate(),
            Err(BenchError::InvalidManifest { .. })
        ));

        let no_clients = Manifest {
            tx_clients: 0,
            ..Manifest::two_node_simple()
        };
        assert!(no_clients.validate().is_err());

        let observe_only = Manifest {
            tx_clients: 0,
            min_transactions: 0,
            ..Manifest::two_node_simple()
        };
        observe_only.validate().unwrap();

        let json = Manifest {
            test_duration: Duration::ZERO,
            ..Manifest::two_node_simple()
        }
        .to_json_pretty()
        .unwrap();
        assert!(Manifest::from_json(&json).is_err());
    }

    #[test]
    fn test_config_options_follow_manifest() {
        let manifest = Manifest::two_node_simple();
        let options = manifest.config_options();
        assert!(options.contains(&ConfigOption::TimeoutCommit(Duration::from_secs(1))));
        assert!(options.contains(&ConfigOption::LocalTracing("local".to_string())));
        assert_eq!(manifest.consensus_params().app_version, DEFAULT_APP_VERSION);
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("manifest.json");
        let manifest = Manifest::preset("TwoNodeBigBlock_64MiB").unwrap();
        tokio::fs::write(&path, manifest.to_json_pretty().unwrap())
            .await
            .unwrap();
        assert_eq!(Manifest::load(&path).await.unwrap(), manifest);
    }
}
