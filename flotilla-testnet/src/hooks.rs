//! Per-node hooks run right after a genesis node forwards its ports.

use async_trait::async_trait;
use flotilla_core::{FlotillaError, LatencyParams, Result};
use flotilla_node::{Node, DEFAULT_STARTUP_TIMEOUT};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::info;

/// Runs once per genesis node, in creation order, after the node reports
/// running and before readiness polling begins. An error aborts startup.
#[async_trait]
pub trait StartHook: Send + Sync {
    async fn on_node_started(&self, node: &Node) -> Result<()>;
}

/// Does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

#[async_trait]
impl StartHook for NoopHook {
    async fn on_node_started(&self, _node: &Node) -> Result<()> {
        Ok(())
    }
}

/// Applies latency, jitter and a bandwidth cap through the node's
/// fault-injection sidecar once that sidecar reports started.
///
/// Every sidecar call is bounded by `sidecar_timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkConditionsHook {
    pub latency: Option<LatencyParams>,
    pub bandwidth_kbps: Option<u64>,
    pub sidecar_timeout: Duration,
}

impl Default for NetworkConditionsHook {
    fn default() -> Self {
        Self {
            latency: None,
            bandwidth_kbps: None,
            sidecar_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }
}

impl NetworkConditionsHook {
    pub fn new(latency: Option<LatencyParams>, bandwidth_kbps: Option<u64>) -> Self {
        Self {
            latency: latency.filter(|l| l.latency_ms > 0 || l.jitter_ms > 0),
            bandwidth_kbps: bandwidth_kbps.filter(|b| *b > 0),
            ..Self::default()
        }
    }

    pub fn with_sidecar_timeout(mut self, sidecar_timeout: Duration) -> Self {
        self.sidecar_timeout = sidecar_timeout;
        self
    }

    async fn bounded<F>(&self, node: &str, operation: &str, call: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        match timeout(self.sidecar_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(FlotillaError::timeout(format!(
                "{} for node {} after {:?}",
                operation, node, self.sidecar_timeout
            ))),
        }
    }

    /// True when the hook would touch the sidecar at all.
    pub fn is_active(&self) -> bool {
        self.latency.is_some() || self.bandwidth_kbps.is_some()
    }
}

#[async_trait]
impl StartHook for NetworkConditionsHook {
    async fn on_node_started(&self, node: &Node) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        let injector = node.fault_injector().ok_or_else(|| {
            FlotillaError::config(format!(
                "fault injection is not enabled on node {}",
                node.name()
            ))
        })?;

        let name = node.name();
        self.bounded(name, "fault injector start", injector.wait_for_start())
            .await?;
        if let Some(latency) = self.latency {
            info!(
                node = %node.name(),
                latency_ms = latency.latency_ms,
                jitter_ms = latency.jitter_ms,
                "Setting latency and jitter"
            );
            self.bounded(name, "set latency", injector.set_latency_and_jitter(latency))
                .await?;
        }
        if let Some(kbps) = self.bandwidth_kbps {
            info!(node = %node.name(), kbps, "Setting bandwidth limit");
            self.bounded(name, "set bandwidth limit", injector.set_bandwidth_limit(kbps))
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_conditions_are_inactive() {
        let hook = NetworkConditionsHook::new(Some(LatencyParams::new(0, 0)), Some(0));
        assert!(!hook.is_active());

        let hook = NetworkConditionsHook::new(Some(LatencyParams::new(70, 0)), None);
        assert!(hook.is_active());
        assert_eq!(hook.bandwidth_kbps, None);
        assert_eq!(hook.sidecar_timeout, DEFAULT_STARTUP_TIMEOUT);
    }
}
