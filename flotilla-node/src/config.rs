//! On-disk node configuration documents and the options that shape them.

use flotilla_core::{FlotillaError, Result, PROMETHEUS_PORT, RPC_PORT, TRACING_PORT};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `config.toml`: networking, consensus timing and telemetry for one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub moniker: String,
    pub rpc: RpcConfig,
    pub p2p: P2pConfig,
    pub consensus: ConsensusTimeouts,
    pub mempool: MempoolConfig,
    pub instrumentation: InstrumentationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcConfig {
    pub laddr: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct P2pConfig {
    pub external_address: String,
    /// Comma separated `id@host:port` list.
    pub persistent_peers: String,
    pub addr_book_file: String,
    /// Bytes per second.
    pub send_rate: u64,
    /// Bytes per second.
    pub recv_rate: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusTimeouts {
    #[serde(with = "duration_string")]
    pub timeout_propose: Duration,
    #[serde(with = "duration_string")]
    pub timeout_commit: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MempoolConfig {
    pub version: String,
    pub broadcast: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentationConfig {
    pub prometheus: bool,
    pub prometheus_listen_addr: String,
    pub trace_type: String,
    pub trace_buffer_size: usize,
    pub trace_pull_address: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            moniker: String::new(),
            rpc: RpcConfig {
                laddr: "tcp://127.0.0.1:26657".to_string(),
            },
            p2p: P2pConfig {
                external_address: String::new(),
                persistent_peers: String::new(),
                addr_book_file: "config/addrbook.json".to_string(),
                send_rate: 5_120_000,
                recv_rate: 5_120_000,
            },
            consensus: ConsensusTimeouts {
                timeout_propose: Duration::from_secs(3),
                timeout_commit: Duration::from_secs(1),
            },
            mempool: MempoolConfig {
                version: "v1".to_string(),
                broadcast: true,
            },
            instrumentation: InstrumentationConfig {
                prometheus: false,
                prometheus_listen_addr: format!(":{}", PROMETHEUS_PORT),
                trace_type: "noop".to_string(),
                trace_buffer_size: 0,
                trace_pull_address: String::new(),
            },
        }
    }
}

impl NodeConfig {
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// A single adjustment to a node's [`NodeConfig`], applied during `init`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConfigOption {
    /// Per-peer send and receive rate, bytes per second.
    PerPeerBandwidth(u64),
    TimeoutPropose(Duration),
    TimeoutCommit(Duration),
    Prometheus(bool),
    Mempool(String),
    /// Enables the local trace pull server with the given trace type.
    LocalTracing(String),
    BroadcastTxs(bool),
}

impl ConfigOption {
    pub fn apply(&self, config: &mut NodeConfig) {
        match self {
            ConfigOption::PerPeerBandwidth(rate) => {
                config.p2p.send_rate = *rate;
                config.p2p.recv_rate = *rate;
            }
            ConfigOption::TimeoutPropose(timeout) => config.consensus.timeout_propose = *timeout,
            ConfigOption::TimeoutCommit(timeout) => config.consensus.timeout_commit = *timeout,
            ConfigOption::Prometheus(enabled) => config.instrumentation.prometheus = *enabled,
            ConfigOption::Mempool(version) => config.mempool.version = version.clone(),
            ConfigOption::LocalTracing(trace_type) => {
                config.instrumentation.trace_type = trace_type.clone();
                config.instrumentation.trace_buffer_size = 1000;
                config.instrumentation.trace_pull_address = format!(":{}", TRACING_PORT);
            }
            ConfigOption::BroadcastTxs(broadcast) => config.mempool.broadcast = *broadcast,
        }
    }
}

/// Builds the config for `moniker`, then applies `options` in order.
pub fn make_config(
    moniker: &str,
    external_p2p_address: &str,
    peers: &[String],
    options: &[ConfigOption],
) -> NodeConfig {
    let mut config = NodeConfig {
        moniker: moniker.to_string(),
        ..NodeConfig::default()
    };
    config.rpc.laddr = format!("tcp://0.0.0.0:{}", RPC_PORT);
    config.p2p.external_address = format!("tcp://{}", external_p2p_address);
    config.p2p.persistent_peers = peers.join(",");
    config.instrumentation.prometheus = true;

    for option in options {
        option.apply(&mut config);
    }
    config
}

/// `app.toml`: application server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub minimum_gas_prices: String,
    pub grpc: GrpcConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrpcConfig {
    pub enable: bool,
    pub address: String,
}

/// Denomination used for gas prices and balances.
pub const BOND_DENOM: &str = "uflt";

impl AppConfig {
    pub fn new() -> Self {
        Self {
            minimum_gas_prices: format!("0.001{}", BOND_DENOM),
            grpc: GrpcConfig {
                enable: true,
                address: format!("0.0.0.0:{}", flotilla_core::GRPC_PORT),
            },
        }
    }

    pub fn validate_basic(&self) -> Result<()> {
        if self.minimum_gas_prices.is_empty() {
            return Err(FlotillaError::config("minimum gas prices must be set"));
        }
        if self.grpc.enable && self.grpc.address.is_empty() {
            return Err(FlotillaError::config("grpc address must be set when grpc is enabled"));
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

mod duration_string {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{}ms", value.as_millis()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let (number, scale) = if let Some(ms) = raw.strip_suffix("ms") {
            (ms, 1)
        } else if let Some(s) = raw.strip_suffix('s') {
            (s, 1000)
        } else {
            return Err(D::Error::custom(format!("invalid duration: {}", raw)));
        };
        number
            .trim()
            .parse::<u64>()
            .map(|n| Duration::from_millis(n * scale))
            .map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_config_applies_options_in_order() {
        let peers = vec!["aa@10.0.0.2:26656".to_string(), "bb@10.0.0.3:26656".to_string()];
        let config = make_config(
            "val0",
            "10.0.0.1:26656",
            &peers,
            &[
                ConfigOption::PerPeerBandwidth(1024),
                ConfigOption::TimeoutCommit(Duration::from_secs(11)),
                ConfigOption::Prometheus(false),
                ConfigOption::Prometheus(true),
                ConfigOption::LocalTracing("local".to_string()),
            ],
        );

        assert_eq!(config.moniker, "val0");
        assert_eq!(config.rpc.laddr, "tcp://0.0.0.0:26657");
        assert_eq!(config.p2p.external_address, "tcp://10.0.0.1:26656");
        assert_eq!(config.p2p.persistent_peers, "aa@10.0.0.2:26656,bb@10.0.0.3:26656");
        assert_eq!(config.p2p.send_rate, 1024);
        assert_eq!(config.p2p.recv_rate, 1024);
        assert_eq!(config.consensus.timeout_commit, Duration::from_secs(11));
        assert!(config.instrumentation.prometheus);
        assert_eq!(config.instrumentation.trace_pull_address, ":26661");
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = make_config("val1", "10.0.0.1:26656", &[], &[]);
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("timeout_propose = \"3000ms\""));

        let parsed: NodeConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_app_config_validation() {
        let app = AppConfig::new();
        assert!(app.validate_basic().is_ok());
        assert_eq!(app.minimum_gas_prices, "0.001uflt");

        let broken = AppConfig {
            minimum_gas_prices: String::new(),
            ..AppConfig::new()
        };
        assert!(broken.validate_basic().unwrap_err().is_configuration());
    }
}
