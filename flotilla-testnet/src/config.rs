use flotilla_core::{FlotillaError, Result, TelemetrySink, DEFAULT_CHAIN_ID};
use flotilla_node::{AddressBookStrategy, DEFAULT_NODE_IMAGE, DEFAULT_WORKLOAD_IMAGE};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable that, when set to `true`, leaves resources running
/// after [`crate::Testnet::cleanup`].
pub const SKIP_CLEANUP_ENV: &str = "FLOTILLA_SKIP_CLEANUP";

/// Bounded polling budget for readiness convergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessPolicy {
    pub attempts: u32,
    pub interval: Duration,
    /// Upper bound on a single status call.
    pub status_timeout: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_secs(1),
            status_timeout: Duration::from_secs(5),
        }
    }
}

impl ReadinessPolicy {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts,
            interval,
            ..Self::default()
        }
    }

    pub fn with_status_timeout(mut self, status_timeout: Duration) -> Self {
        self.status_timeout = status_timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct TestnetConfig {
    pub name: String,
    pub chain_id: String,
    pub seed: u64,
    pub readiness: ReadinessPolicy,
    pub address_book: AddressBookStrategy,
    pub node_startup_timeout: Duration,
    /// Local directory under which node bundles and keyrings are staged.
    pub staging_dir: PathBuf,
    pub node_image: String,
    pub workload_image: String,
    pub telemetry: Option<TelemetrySink>,
    pub skip_cleanup: bool,
}

impl Default for TestnetConfig {
    fn default() -> Self {
        Self {
            name: "testnet".to_string(),
            chain_id: DEFAULT_CHAIN_ID.to_string(),
            seed: 42,
            readiness: ReadinessPolicy::default(),
            address_book: AddressBookStrategy::FullMesh,
            node_startup_timeout: Duration::from_secs(300),
            staging_dir: std::env::temp_dir().join("flotilla"),
            node_image: DEFAULT_NODE_IMAGE.to_string(),
            workload_image: DEFAULT_WORKLOAD_IMAGE.to_string(),
            telemetry: None,
            skip_cleanup: false,
        }
    }
}

impl TestnetConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_chain_id(mut self, chain_id: impl Into<String>) -> Self {
        self.chain_id = chain_id.into();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_readiness(mut self, readiness: ReadinessPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_address_book(mut self, strategy: AddressBookStrategy) -> Self {
        self.address_book = strategy;
        self
    }

    pub fn with_node_startup_timeout(mut self, timeout: Duration) -> Self {
        self.node_startup_timeout = timeout;
        self
    }

    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    pub fn with_node_image(mut self, repository: impl Into<String>) -> Self {
        self.node_image = repository.into();
        self
    }

    pub fn with_workload_image(mut self, repository: impl Into<String>) -> Self {
        self.workload_image = repository.into();
        self
    }

    pub fn with_telemetry(mut self, sink: TelemetrySink) -> Self {
        self.telemetry = Some(sink);
        self
    }

    pub fn with_skip_cleanup(mut self, skip: bool) -> Self {
        self.skip_cleanup = skip;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(FlotillaError::config("testnet name must not be empty"));
        }
        if self.chain_id.is_empty() {
            return Err(FlotillaError::config("chain id must not be empty"));
        }
        if self.readiness.attempts == 0 {
            return Err(FlotillaError::config("readiness policy needs at least one attempt"));
        }
        if self.readiness.status_timeout.is_zero() {
            return Err(FlotillaError::config("status timeout must be non-zero"));
        }
        if let AddressBookStrategy::BoundedFanout(0) = self.address_book {
            return Err(FlotillaError::config("bounded fanout must be at least 1"));
        }
        Ok(())
    }

    /// True when cleanup is disabled by config or by [`SKIP_CLEANUP_ENV`].
    pub fn skip_cleanup_requested(&self) -> bool {
        self.skip_cleanup
            || std::env::var(SKIP_CLEANUP_ENV)
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
    }
}

/// Unique provisioning scope for a testnet called `name`.
pub fn session_scope(name: &str) -> String {
    format!("{}_{}", name, uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_readiness_policy() {
        let policy = ReadinessPolicy::default();
        assert_eq!(policy.attempts, 10);
        assert_eq!(policy.interval, Duration::from_secs(1));
        assert_eq!(policy.status_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_config_validation() {
        assert!(TestnetConfig::default().validate().is_ok());

        let config = TestnetConfig::new("e2e").with_readiness(ReadinessPolicy::new(0, Duration::ZERO));
        assert!(config.validate().unwrap_err().is_configuration());

        let config = TestnetConfig::new("e2e").with_address_book(AddressBookStrategy::BoundedFanout(0));
        assert!(config.validate().is_err());

        let config = TestnetConfig::new("e2e").with_chain_id("");
        assert!(config.validate().is_err());

        let policy = ReadinessPolicy::default().with_status_timeout(Duration::ZERO);
        let config = TestnetConfig::new("e2e").with_readiness(policy);
        assert!(config.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn test_session_scope_is_unique() {
        let a = session_scope("bench");
        let b = session_scope("bench");
        assert!(a.starts_with("bench_"));
        assert_ne!(a, b);
    }
}
