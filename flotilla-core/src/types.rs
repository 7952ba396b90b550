//! # Core Types
//!
//! Shared value types: well-known ports, resource shapes and telemetry sinks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tendermint-style RPC port exposed by every node.
pub const RPC_PORT: u16 = 26657;
/// Peer-to-peer port exposed by every node.
pub const P2P_PORT: u16 = 26656;
/// gRPC port exposed by every node; workload clients connect here.
pub const GRPC_PORT: u16 = 9090;
/// Prometheus scrape port.
pub const PROMETHEUS_PORT: u16 = 26660;
/// Trace pull server port.
pub const TRACING_PORT: u16 = 26661;

/// Owner uid:gid for files copied into instances.
pub const REMOTE_OWNER: &str = "10001:10001";
/// Numeric owner for provisioned volumes.
pub const REMOTE_OWNER_UID: u32 = 10001;

/// Resource requirements for a node or workload client.
///
/// Quantities are passed verbatim to the compute substrate, so they use its
/// notation (`"400Mi"`, `"300m"`, `"1Gi"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    /// Initial memory allocation
    pub memory_request: String,
    /// Maximum memory allocation
    pub memory_limit: String,
    /// CPU allocation
    pub cpu: String,
    /// Storage volume size mounted at the remote home directory
    pub volume: String,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            memory_request: "400Mi".to_string(),
            memory_limit: "400Mi".to_string(),
            cpu: "300m".to_string(),
            volume: "1Gi".to_string(),
        }
    }
}

impl Resources {
    pub fn new(
        memory_request: impl Into<String>,
        memory_limit: impl Into<String>,
        cpu: impl Into<String>,
        volume: impl Into<String>,
    ) -> Self {
        Self {
            memory_request: memory_request.into(),
            memory_limit: memory_limit.into(),
            cpu: cpu.into(),
            volume: volume.into(),
        }
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpu={} mem={}/{} vol={}",
            self.cpu, self.memory_request, self.memory_limit, self.volume
        )
    }
}

/// Remote metrics/tracing backend that instances export to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySink {
    pub endpoint: String,
    pub username: String,
    pub token: String,
}

/// Latency and jitter applied by a fault-injection sidecar, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyParams {
    pub latency_ms: u64,
    pub jitter_ms: u64,
}

impl LatencyParams {
    pub fn new(latency_ms: u64, jitter_ms: u64) -> Self {
        Self {
            latency_ms,
            jitter_ms,
        }
    }
}

/// Returns the fully qualified image name for `repository` at `version`.
///
/// # Examples
///
/// ```rust
/// use flotilla_core::image_name;
///
/// assert_eq!(image_name("ghcr.io/acme/node", "v1.2.0"), "ghcr.io/acme/node:v1.2.0");
/// ```
pub fn image_name(repository: &str, version: &str) -> String {
    format!("{}:{}", repository, version)
}
