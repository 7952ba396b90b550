//! Transaction-simulator clients that drive load against one node.

use flotilla_core::{
    image_name, ClusterSession, FlotillaError, Instance, PublicKey, Resources, Result,
    REMOTE_OWNER, REMOTE_OWNER_UID,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::node::{ProvisioningContext, DEFAULT_STARTUP_TIMEOUT};

/// Home directory of the workload process inside its instance.
pub const DEFAULT_WORKLOAD_HOME: &str = "/home/flotilla";

pub const DEFAULT_WORKLOAD_IMAGE: &str = "ghcr.io/flotilla-labs/txsim";

/// Inclusive range of blob sizes in bytes, written `min-max` or as a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct SizeRange {
    pub min: u64,
    pub max: u64,
}

impl SizeRange {
    pub fn new(min: u64, max: u64) -> Result<Self> {
        if min > max {
            return Err(FlotillaError::config(format!(
                "blob size range {}-{} is inverted",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    pub fn exact(size: u64) -> Self {
        Self {
            min: size,
            max: size,
        }
    }
}

impl FromStr for SizeRange {
    type Err = FlotillaError;

    fn from_str(s: &str) -> Result<Self> {
        let parse = |v: &str| {
            v.trim()
                .parse::<u64>()
                .map_err(|e| FlotillaError::config(format!("blob size {}: {}", s, e)))
        };
        match s.split_once('-') {
            Some((min, max)) => Self::new(parse(min)?, parse(max)?),
            None => Ok(Self::exact(parse(s)?)),
        }
    }
}

impl fmt::Display for SizeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min == self.max {
            write!(f, "{}", self.min)
        } else {
            write!(f, "{}-{}", self.min, self.max)
        }
    }
}

impl From<SizeRange> for String {
    fn from(range: SizeRange) -> Self {
        range.to_string()
    }
}

impl TryFrom<String> for SizeRange {
    type Error = FlotillaError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Traffic shape and placement of one workload client.
#[derive(Debug, Clone)]
pub struct WorkloadSpec {
    pub name: String,
    pub version: String,
    pub image_repository: String,
    /// In-cluster gRPC endpoint of the target node.
    pub target_endpoint: String,
    pub seed: u64,
    /// Number of concurrent submission sequences.
    pub sequences: usize,
    pub blob_sizes: SizeRange,
    pub blobs_per_sequence: usize,
    pub poll_time: Duration,
    pub resources: Resources,
    pub remote_home: String,
    pub startup_timeout: Duration,
}

impl WorkloadSpec {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        target_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            image_repository: DEFAULT_WORKLOAD_IMAGE.to_string(),
            target_endpoint: target_endpoint.into(),
            seed: 42,
            sequences: 1,
            blob_sizes: SizeRange::exact(200_000),
            blobs_per_sequence: 1,
            poll_time: Duration::from_secs(3),
            resources: Resources::default(),
            remote_home: DEFAULT_WORKLOAD_HOME.to_string(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_sequences(mut self, sequences: usize) -> Self {
        self.sequences = sequences;
        self
    }

    pub fn with_blob_sizes(mut self, sizes: SizeRange) -> Self {
        self.blob_sizes = sizes;
        self
    }

    pub fn with_blobs_per_sequence(mut self, blobs: usize) -> Self {
        self.blobs_per_sequence = blobs;
        self
    }

    pub fn with_poll_time(mut self, poll_time: Duration) -> Self {
        self.poll_time = poll_time;
        self
    }

    pub fn with_resources(mut self, resources: Resources) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_image_repository(mut self, repository: impl Into<String>) -> Self {
        self.image_repository = repository.into();
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn args(&self) -> Vec<String> {
        vec![
            format!("--key-path={}", self.remote_home),
            format!("--grpc-endpoint={}", self.target_endpoint),
            format!("--seed={}", self.seed),
            format!("--poll-time={}ms", self.poll_time.as_millis()),
            format!("--blob={}", self.sequences),
            format!("--blob-sizes={}", self.blob_sizes),
            format!("--blob-amounts={}", self.blobs_per_sequence),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkloadState {
    Declared,
    Provisioned,
    Starting,
    Running,
    Destroyed,
}

impl fmt::Display for WorkloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkloadState::Declared => "declared",
            WorkloadState::Provisioned => "provisioned",
            WorkloadState::Starting => "starting",
            WorkloadState::Running => "running",
            WorkloadState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// A non-consensus participant emitting synthetic traffic at one node.
pub struct WorkloadClient {
    spec: WorkloadSpec,
    account: PublicKey,
    instance: Box<dyn Instance>,
    state: WorkloadState,
}

impl WorkloadClient {
    pub async fn new(
        session: &dyn ClusterSession,
        spec: WorkloadSpec,
        account: PublicKey,
    ) -> Result<Self> {
        let name = spec.name.clone();
        let mut instance = session
            .create_instance(&name)
            .await
            .provisioning(&name, "create instance")?;
        if let Err(e) = Self::declare(instance.as_mut(), &spec).await {
            if let Err(destroy_err) = instance.destroy().await {
                warn!(client = %name, error = %destroy_err, "Failed to release partially declared client");
            }
            return Err(e);
        }

        info!(client = %name, target = %spec.target_endpoint, "Created workload client");
        Ok(Self {
            spec,
            account,
            instance,
            state: WorkloadState::Declared,
        })
    }

    async fn declare(instance: &mut dyn Instance, spec: &WorkloadSpec) -> Result<()> {
        let name = spec.name.as_str();
        instance
            .set_image(&image_name(&spec.image_repository, &spec.version))
            .await
            .provisioning(name, "set image")?;
        instance
            .set_resources(&spec.resources)
            .await
            .provisioning(name, "set resources")?;
        instance
            .add_volume(&spec.remote_home, &spec.resources.volume, REMOTE_OWNER_UID)
            .await
            .provisioning(name, "add volume")?;
        instance
            .set_args(spec.args())
            .await
            .provisioning(name, "set args")
    }

    /// Commits the instance and copies the funded account's keyring into it.
    pub async fn init(&mut self, keyring_dir: &Path) -> Result<()> {
        if self.state != WorkloadState::Declared {
            return Err(FlotillaError::invalid_transition(
                self.state,
                WorkloadState::Provisioned,
            ));
        }
        self.instance
            .commit()
            .await
            .provisioning(&self.spec.name, "commit")?;
        self.instance
            .add_folder(keyring_dir, &self.spec.remote_home, REMOTE_OWNER)
            .await
            .provisioning(&self.spec.name, "add keyring folder")?;
        self.state = WorkloadState::Provisioned;
        debug!(client = %self.spec.name, "Workload client committed");
        Ok(())
    }

    pub async fn start_without_wait(&mut self) -> Result<()> {
        if self.state != WorkloadState::Provisioned {
            return Err(FlotillaError::invalid_transition(
                self.state,
                WorkloadState::Starting,
            ));
        }
        self.instance
            .start_async()
            .await
            .provisioning(&self.spec.name, "start")?;
        self.state = WorkloadState::Starting;
        Ok(())
    }

    pub async fn wait_running(&mut self) -> Result<()> {
        if self.state != WorkloadState::Starting {
            return Err(FlotillaError::invalid_transition(
                self.state,
                WorkloadState::Running,
            ));
        }
        match timeout(self.spec.startup_timeout, self.instance.wait_running()).await {
            Ok(result) => result.provisioning(&self.spec.name, "wait running")?,
            Err(_) => {
                return Err(FlotillaError::timeout(format!(
                    "wait running for workload client {} after {:?}",
                    self.spec.name, self.spec.startup_timeout
                )))
            }
        }
        self.state = WorkloadState::Running;
        info!(client = %self.spec.name, "Workload client running");
        Ok(())
    }

    pub async fn destroy(&mut self) -> Result<()> {
        if self.state == WorkloadState::Destroyed {
            return Ok(());
        }
        self.instance
            .destroy()
            .await
            .provisioning(&self.spec.name, "destroy")?;
        self.state = WorkloadState::Destroyed;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &WorkloadSpec {
        &self.spec
    }

    pub fn account(&self) -> &PublicKey {
        &self.account
    }

    pub fn target_endpoint(&self) -> &str {
        &self.spec.target_endpoint
    }

    pub fn state(&self) -> WorkloadState {
        self.state
    }
}

impl fmt::Debug for WorkloadClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkloadClient")
            .field("name", &self.spec.name)
            .field("target", &self.spec.target_endpoint)
            .field("state", &self.state)
            .finish()
    }
}
