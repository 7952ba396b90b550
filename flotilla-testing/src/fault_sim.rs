use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use flotilla_core::{FaultInjector, FlotillaError, LatencyParams, Result};

/// Records the network conditions applied to one simulated instance.
#[derive(Debug)]
pub struct SimFaultInjector {
    instance: String,
    started: AtomicBool,
    fail_start: AtomicBool,
    hang_start: AtomicBool,
    latency: Mutex<Option<LatencyParams>>,
    bandwidth_kbps: Mutex<Option<u64>>,
    calls: Mutex<Vec<String>>,
}

impl SimFaultInjector {
    pub fn new(instance: &str) -> Self {
        Self {
            instance: instance.to_string(),
            started: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            hang_start: AtomicBool::new(false),
            latency: Mutex::new(None),
            bandwidth_kbps: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Makes `wait_for_start` fail.
    pub fn fail_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    /// Makes `wait_for_start` never return.
    pub fn hang_start(&self) {
        self.hang_start.store(true, Ordering::SeqCst);
    }

    pub fn latency(&self) -> Option<LatencyParams> {
        *self.latency.lock()
    }

    pub fn bandwidth_kbps(&self) -> Option<u64> {
        *self.bandwidth_kbps.lock()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Verbs received, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn ensure_started(&self, verb: &str) -> Result<()> {
        self.calls.lock().push(verb.to_string());
        if !self.is_started() {
            return Err(FlotillaError::internal(format!(
                "fault injector on {} not started before {}",
                self.instance, verb
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl FaultInjector for SimFaultInjector {
    async fn wait_for_start(&self) -> Result<()> {
        self.calls.lock().push("wait_for_start".to_string());
        if self.hang_start.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(FlotillaError::internal(format!(
                "fault injector on {} never became ready",
                self.instance
            )));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn set_latency_and_jitter(&self, params: LatencyParams) -> Result<()> {
        self.ensure_started("set_latency_and_jitter")?;
        *self.latency.lock() = Some(params);
        Ok(())
    }

    async fn set_bandwidth_limit(&self, kbps: u64) -> Result<()> {
        self.ensure_started("set_bandwidth_limit")?;
        *self.bandwidth_kbps.lock() = Some(kbps);
        Ok(())
    }
}
