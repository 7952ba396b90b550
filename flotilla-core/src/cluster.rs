//! # Compute Substrate Interfaces
//!
//! Narrow traits over the cluster provisioning backend. The orchestrator
//! reaches compute instances, ports, volumes and fault-injection sidecars
//! only through these verbs.

use crate::types::{LatencyParams, Resources, TelemetrySink};
use crate::Result;
use async_trait::async_trait;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

/// A provisioning scope opened once per testnet.
///
/// Replaces process-wide provisioning state: the session is created by the
/// backend (`init(scope)`), handed to the testnet, and closed after teardown.
#[async_trait]
pub trait ClusterSession: Send + Sync {
    /// Identifier grouping every resource created through this session.
    fn scope(&self) -> &str;

    /// Creates a new, uncommitted instance named `name`.
    async fn create_instance(&self, name: &str) -> Result<Box<dyn Instance>>;

    /// Releases the scope itself. Must tolerate being called more than once.
    async fn close(&self) -> Result<()>;
}

/// One compute instance (container/VM) in the cluster.
///
/// Configuration verbs are only valid before [`Instance::commit`]; after
/// commit the instance shape is fixed and only lifecycle verbs apply.
#[async_trait]
pub trait Instance: Send + Sync {
    fn name(&self) -> &str;

    async fn set_image(&mut self, image: &str) -> Result<()>;

    async fn set_resources(&mut self, resources: &Resources) -> Result<()>;

    /// Mounts a volume of `size` at `path`, owned by `owner_uid`.
    async fn add_volume(&mut self, path: &str, size: &str, owner_uid: u32) -> Result<()>;

    async fn add_port(&mut self, port: u16) -> Result<()>;

    async fn set_args(&mut self, args: Vec<String>) -> Result<()>;

    async fn set_env(&mut self, key: &str, value: &str) -> Result<()>;

    /// Routes metrics and traces to an external backend.
    async fn set_telemetry(&mut self, sink: &TelemetrySink, prometheus_port: u16) -> Result<()>;

    /// Attaches a packet-capture collector to the instance.
    async fn enable_packet_capture(&mut self) -> Result<()>;

    /// Attaches a fault-injection sidecar to the instance.
    async fn enable_fault_injection(&mut self) -> Result<()>;

    /// Freezes the instance definition.
    async fn commit(&mut self) -> Result<()>;

    /// Copies a local directory into the committed instance.
    async fn add_folder(&mut self, local: &Path, remote: &str, owner: &str) -> Result<()>;

    /// Issues a boot request and returns without waiting for it.
    async fn start_async(&mut self) -> Result<()>;

    /// Blocks until the instance reports running, or fails if it crashes.
    async fn wait_running(&self) -> Result<()>;

    /// In-cluster IP; may be available before the instance runs.
    async fn ip(&self) -> Result<IpAddr>;

    /// Exposes `port` outside the cluster and returns the reachable address.
    async fn add_host(&mut self, port: u16) -> Result<String>;

    /// Swaps the image of a running instance in place.
    async fn set_image_instant(&mut self, image: &str) -> Result<()>;

    /// Fault-injection handle, once enabled.
    fn fault_injector(&self) -> Option<Arc<dyn FaultInjector>>;

    /// Tears down the instance and everything attached to it.
    async fn destroy(&mut self) -> Result<()>;
}

/// Per-node network condition sidecar.
#[async_trait]
pub trait FaultInjector: Send + Sync {
    async fn wait_for_start(&self) -> Result<()>;

    async fn set_latency_and_jitter(&self, params: LatencyParams) -> Result<()>;

    async fn set_bandwidth_limit(&self, kbps: u64) -> Result<()>;
}
