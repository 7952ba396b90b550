use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use flotilla_core::{
    image_name, ClusterSession, FaultInjector, FlotillaError, GenesisDoc, GenesisValidator,
    Instance, NodeClient, NodeClientFactory, PrivateKey, PublicKey, Resources, Result,
    TelemetrySink, GRPC_PORT, P2P_PORT, PROMETHEUS_PORT, REMOTE_OWNER, REMOTE_OWNER_UID,
    RPC_PORT, TRACING_PORT,
};

use crate::address_book::AddressBook;
use crate::bundle::{
    BundleWriter, NodeKeyFile, PrivValidatorKeyFile, PrivValidatorState, ADDR_BOOK_FILE,
    APP_CONFIG_FILE, CONFIG_FILE, GENESIS_FILE, NODE_KEY_FILE, PRIV_VALIDATOR_KEY_FILE,
    PRIV_VALIDATOR_STATE_FILE,
};
use crate::config::{make_config, AppConfig, ConfigOption};

/// Home directory of the node process inside its instance.
pub const DEFAULT_REMOTE_HOME: &str = "/home/flotilla/.flotilla-app";

/// Image repository used when a spec does not name one.
pub const DEFAULT_NODE_IMAGE: &str = "ghcr.io/flotilla-labs/flotilla-app";

/// Bound on waiting for an instance to report running.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(300);

/// Lifecycle of a [`Node`]. A node exists from `Keyed` onward, since
/// [`Node::new`] draws its keys and provisions it in one step. Only
/// [`Node::upgrade`] moves a node backwards, from `Ready` to
/// `RunningUnverified`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeState {
    Keyed,
    Provisioned,
    Starting,
    RunningUnverified,
    Ready,
    Destroyed,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Keyed => "keyed",
            NodeState::Provisioned => "provisioned",
            NodeState::Starting => "starting",
            NodeState::RunningUnverified => "running-unverified",
            NodeState::Ready => "ready",
            NodeState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Declarative description of one participant.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub name: String,
    pub version: String,
    /// `0` for genesis participants, the join height for late joiners.
    pub start_height: u64,
    /// `0` marks a non-validator.
    pub self_delegation: i64,
    /// Height at which the node switches to the next app version, `0` for never.
    pub upgrade_height: u64,
    pub resources: Resources,
    pub packet_capture: bool,
    pub image_repository: String,
    pub remote_home: String,
    pub telemetry: Option<TelemetrySink>,
    pub startup_timeout: Duration,
}

impl NodeSpec {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            start_height: 0,
            self_delegation: 0,
            upgrade_height: 0,
            resources: Resources::default(),
            packet_capture: false,
            image_repository: DEFAULT_NODE_IMAGE.to_string(),
            remote_home: DEFAULT_REMOTE_HOME.to_string(),
            telemetry: None,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }

    pub fn with_start_height(mut self, height: u64) -> Self {
        self.start_height = height;
        self
    }

    pub fn with_self_delegation(mut self, tokens: i64) -> Self {
        self.self_delegation = tokens;
        self
    }

    pub fn with_upgrade_height(mut self, height: u64) -> Self {
        self.upgrade_height = height;
        self
    }

    pub fn with_resources(mut self, resources: Resources) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_packet_capture(mut self, enabled: bool) -> Self {
        self.packet_capture = enabled;
        self
    }

    pub fn with_image_repository(mut self, repository: impl Into<String>) -> Self {
        self.image_repository = repository.into();
        self
    }

    pub fn with_remote_home(mut self, home: impl Into<String>) -> Self {
        self.remote_home = home.into();
        self
    }

    pub fn with_telemetry(mut self, sink: Option<TelemetrySink>) -> Self {
        self.telemetry = sink;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn is_validator(&self) -> bool {
        self.self_delegation != 0
    }

    pub fn is_genesis_node(&self) -> bool {
        self.start_height == 0
    }

    /// Process arguments for the node binary.
    pub fn start_args(&self) -> Vec<String> {
        let mut args = vec![
            "start".to_string(),
            format!("--home={}", self.remote_home),
            format!("--rpc.laddr=tcp://0.0.0.0:{}", RPC_PORT),
        ];
        if self.upgrade_height != 0 {
            args.push(format!("--v2-upgrade-height={}", self.upgrade_height));
        }
        args
    }
}

/// Attaches node and operation context to substrate failures.
pub(crate) trait ProvisioningContext<T> {
    fn provisioning(self, node: &str, operation: &str) -> Result<T>;
}

impl<T> ProvisioningContext<T> for Result<T> {
    fn provisioning(self, node: &str, operation: &str) -> Result<T> {
        self.map_err(|e| match e {
            e @ FlotillaError::Provisioning { .. } => e,
            e @ FlotillaError::Timeout { .. } => e,
            other => FlotillaError::provisioning(node, operation, other.to_string()),
        })
    }
}

/// One cluster participant: its spec, keys and provisioning handle.
pub struct Node {
    spec: NodeSpec,
    signer_key: PrivateKey,
    network_key: PrivateKey,
    instance: Box<dyn Instance>,
    state: NodeState,
    staging_root: PathBuf,
    initial_peers: Vec<String>,
    rpc_proxy_host: Option<String>,
    trace_proxy_host: Option<String>,
}

impl Node {
    /// Creates the node's instance and declares its image, ports, telemetry,
    /// resources, volume and start arguments. Bundles are staged under
    /// `staging_root/<name>`.
    pub async fn new(
        session: &dyn ClusterSession,
        spec: NodeSpec,
        signer_key: PrivateKey,
        network_key: PrivateKey,
        staging_root: impl AsRef<Path>,
    ) -> Result<Self> {
        let name = spec.name.clone();
        let mut instance = session
            .create_instance(&name)
            .await
            .provisioning(&name, "create instance")?;
        if let Err(e) = Self::declare(instance.as_mut(), &spec).await {
            if let Err(destroy_err) = instance.destroy().await {
                warn!(node = %name, error = %destroy_err, "Failed to release partially declared node");
            }
            return Err(e);
        }

        info!(
            node = %name,
            version = %spec.version,
            start_height = spec.start_height,
            "Created node ({})",
            spec.resources
        );

        Ok(Self {
            spec,
            signer_key,
            network_key,
            instance,
            state: NodeState::Keyed,
            staging_root: staging_root.as_ref().to_path_buf(),
            initial_peers: Vec::new(),
            rpc_proxy_host: None,
            trace_proxy_host: None,
        })
    }

    async fn declare(instance: &mut dyn Instance, spec: &NodeSpec) -> Result<()> {
        let name = spec.name.as_str();
        instance
            .set_image(&image_name(&spec.image_repository, &spec.version))
            .await
            .provisioning(name, "set image")?;
        for port in [RPC_PORT, P2P_PORT, GRPC_PORT, TRACING_PORT] {
            instance.add_port(port).await.provisioning(name, "add port")?;
        }
        if let Some(sink) = &spec.telemetry {
            instance
                .add_port(PROMETHEUS_PORT)
                .await
                .provisioning(name, "add port")?;
            instance
                .set_telemetry(sink, PROMETHEUS_PORT)
                .await
                .provisioning(name, "set telemetry")?;
        }
        instance
            .set_resources(&spec.resources)
            .await
            .provisioning(name, "set resources")?;
        instance
            .add_volume(&spec.remote_home, &spec.resources.volume, REMOTE_OWNER_UID)
            .await
            .provisioning(name, "add volume")?;
        instance
            .set_args(spec.start_args())
            .await
            .provisioning(name, "set args")?;
        if spec.packet_capture {
            instance
                .enable_packet_capture()
                .await
                .provisioning(name, "enable packet capture")?;
        }
        Ok(())
    }

    fn expect_state(&self, allowed: &[NodeState], to: NodeState) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(FlotillaError::invalid_transition(self.state, to))
        }
    }

    /// Changes the resource shape. Rejected once the node is provisioned.
    pub async fn set_resources(&mut self, resources: Resources) -> Result<()> {
        if self.state >= NodeState::Provisioned {
            return Err(FlotillaError::config(format!(
                "resources of node {} are fixed once it is {}",
                self.spec.name, self.state
            )));
        }
        self.instance
            .set_resources(&resources)
            .await
            .provisioning(&self.spec.name, "set resources")?;
        self.spec.resources = resources;
        Ok(())
    }

    /// Attaches a fault-injection sidecar. Must precede `init`.
    pub async fn enable_fault_injection(&mut self) -> Result<()> {
        self.expect_state(&[NodeState::Keyed], NodeState::Keyed)?;
        self.instance
            .enable_fault_injection()
            .await
            .provisioning(&self.spec.name, "enable fault injection")
    }

    /// Sets an environment variable on the node process. Must precede `start_async`.
    pub async fn set_env(&mut self, key: &str, value: &str) -> Result<()> {
        self.expect_state(&[NodeState::Keyed, NodeState::Provisioned], self.state)?;
        self.instance
            .set_env(key, value)
            .await
            .provisioning(&self.spec.name, "set env")
    }

    /// Stages config, genesis, key material and address book, commits the
    /// instance and copies the bundle into the node's remote home.
    pub async fn init(
        &mut self,
        genesis: &GenesisDoc,
        peers: Vec<String>,
        options: &[ConfigOption],
    ) -> Result<()> {
        self.expect_state(&[NodeState::Keyed], NodeState::Provisioned)?;
        let name = self.spec.name.clone();

        if peers.is_empty() && !(self.spec.is_genesis_node() && self.spec.is_validator()) {
            return Err(FlotillaError::EmptyPeerList { node: name });
        }
        let address_book = AddressBook::from_peers(&peers)?;

        let external_p2p = self.address_p2p(false).await?;
        let node_config = make_config(&name, &external_p2p, &peers, options);
        let app_config = AppConfig::new();
        app_config.validate_basic()?;

        let writer = BundleWriter::create(self.staging_root.join(&name)).await?;
        writer.write_str(CONFIG_FILE, &node_config.to_toml()?).await?;
        writer.write_str(GENESIS_FILE, &genesis.to_json_pretty()?).await?;
        writer.write_str(APP_CONFIG_FILE, &app_config.to_toml()?).await?;
        writer
            .write_json(
                NODE_KEY_FILE,
                &NodeKeyFile {
                    priv_key: self.network_key.encode(),
                },
            )
            .await?;
        writer
            .write_json(
                PRIV_VALIDATOR_KEY_FILE,
                &PrivValidatorKeyFile::new(&self.signer_key),
            )
            .await?;
        writer
            .write_json(PRIV_VALIDATOR_STATE_FILE, &PrivValidatorState::initial())
            .await?;
        writer.write_json(ADDR_BOOK_FILE, &address_book).await?;
        debug!(node = %name, peers = peers.len(), "Staged node bundle");

        self.instance.commit().await.provisioning(&name, "commit")?;
        self.instance
            .add_folder(writer.root(), &self.spec.remote_home, REMOTE_OWNER)
            .await
            .provisioning(&name, "add folder")?;

        self.initial_peers = peers;
        self.state = NodeState::Provisioned;
        info!(node = %name, "Initialized node");
        Ok(())
    }

    /// Issues the boot request and returns immediately.
    pub async fn start_async(&mut self) -> Result<()> {
        self.expect_state(&[NodeState::Provisioned], NodeState::Starting)?;
        self.instance
            .start_async()
            .await
            .provisioning(&self.spec.name, "start")?;
        self.state = NodeState::Starting;
        debug!(node = %self.spec.name, "Issued start");
        Ok(())
    }

    async fn wait_running(&self, operation: &str) -> Result<()> {
        match timeout(self.spec.startup_timeout, self.instance.wait_running()).await {
            Ok(result) => result.provisioning(&self.spec.name, operation),
            Err(_) => Err(FlotillaError::timeout(format!(
                "{} for node {} after {:?}",
                operation, self.spec.name, self.spec.startup_timeout
            ))),
        }
    }

    /// Waits for the instance to run, then exposes its RPC and tracing ports.
    pub async fn wait_until_started_and_forward_ports(&mut self) -> Result<()> {
        self.expect_state(&[NodeState::Starting], NodeState::RunningUnverified)?;
        self.wait_running("wait running").await?;

        let rpc = self
            .instance
            .add_host(RPC_PORT)
            .await
            .provisioning(&self.spec.name, "forward rpc port")?;
        let trace = self
            .instance
            .add_host(TRACING_PORT)
            .await
            .provisioning(&self.spec.name, "forward tracing port")?;
        self.rpc_proxy_host = Some(rpc);
        self.trace_proxy_host = Some(trace);
        self.state = NodeState::RunningUnverified;

        info!(node = %self.spec.name, "Node running, ports forwarded");
        Ok(())
    }

    pub async fn start(&mut self) -> Result<()> {
        self.start_async().await?;
        self.wait_until_started_and_forward_ports().await
    }

    /// Swaps the running image for `version` and waits for it to run again.
    pub async fn upgrade(&mut self, version: &str) -> Result<()> {
        self.expect_state(
            &[NodeState::RunningUnverified, NodeState::Ready],
            NodeState::RunningUnverified,
        )?;
        self.instance
            .set_image_instant(&image_name(&self.spec.image_repository, version))
            .await
            .provisioning(&self.spec.name, "set image instant")?;
        self.wait_running("wait running after upgrade").await?;
        info!(node = %self.spec.name, from = %self.spec.version, to = %version, "Upgraded node");
        self.spec.version = version.to_string();
        self.state = NodeState::RunningUnverified;
        Ok(())
    }

    /// Records that the node was observed producing blocks.
    pub fn mark_ready(&mut self) -> Result<()> {
        self.expect_state(
            &[NodeState::RunningUnverified, NodeState::Ready],
            NodeState::Ready,
        )?;
        self.state = NodeState::Ready;
        Ok(())
    }

    /// Destroys the instance. A second call after success is a no-op.
    pub async fn destroy(&mut self) -> Result<()> {
        if self.state == NodeState::Destroyed {
            return Ok(());
        }
        self.instance
            .destroy()
            .await
            .provisioning(&self.spec.name, "destroy")?;
        self.state = NodeState::Destroyed;
        Ok(())
    }

    /// Hex node id derived from the network key.
    pub fn node_id(&self) -> String {
        self.network_key.public_key().address_hex()
    }

    /// In-cluster P2P address, optionally prefixed with the node id.
    pub async fn address_p2p(&self, with_id: bool) -> Result<String> {
        let ip = self.instance.ip().await.provisioning(&self.spec.name, "get ip")?;
        let address = format!("{}:{}", ip, P2P_PORT);
        if with_id {
            Ok(format!("{}@{}", self.node_id(), address))
        } else {
            Ok(address)
        }
    }

    /// Externally reachable RPC address, once ports are forwarded.
    pub fn address_rpc(&self) -> Option<&str> {
        self.rpc_proxy_host.as_deref()
    }

    /// Externally reachable trace pull address, once ports are forwarded.
    pub fn address_tracing(&self) -> Option<&str> {
        self.trace_proxy_host.as_deref()
    }

    pub async fn remote_address_rpc(&self) -> Result<String> {
        let ip = self.instance.ip().await.provisioning(&self.spec.name, "get ip")?;
        Ok(format!("{}:{}", ip, RPC_PORT))
    }

    pub async fn remote_address_grpc(&self) -> Result<String> {
        let ip = self.instance.ip().await.provisioning(&self.spec.name, "get ip")?;
        Ok(format!("{}:{}", ip, GRPC_PORT))
    }

    pub async fn remote_address_tracing(&self) -> Result<String> {
        let ip = self.instance.ip().await.provisioning(&self.spec.name, "get ip")?;
        Ok(format!("http://{}:{}", ip, TRACING_PORT))
    }

    /// Opens a status client against the forwarded RPC address.
    pub fn client(&self, factory: &dyn NodeClientFactory) -> Result<Arc<dyn NodeClient>> {
        let address = self.address_rpc().ok_or_else(|| {
            FlotillaError::invalid_transition(self.state, "client connected")
        })?;
        factory.connect(address)
    }

    pub fn genesis_validator(&self) -> GenesisValidator {
        GenesisValidator {
            name: self.spec.name.clone(),
            initial_tokens: self.spec.self_delegation,
            stake: self.spec.self_delegation / 2,
            consensus_key: self.signer_key.public_key(),
            network_key: self.network_key.public_key(),
        }
    }

    pub fn fault_injector(&self) -> Option<Arc<dyn FaultInjector>> {
        self.instance.fault_injector()
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn version(&self) -> &str {
        &self.spec.version
    }

    pub fn start_height(&self) -> u64 {
        self.spec.start_height
    }

    pub fn self_delegation(&self) -> i64 {
        self.spec.self_delegation
    }

    pub fn is_validator(&self) -> bool {
        self.spec.is_validator()
    }

    pub fn is_genesis_node(&self) -> bool {
        self.spec.is_genesis_node()
    }

    pub fn spec(&self) -> &NodeSpec {
        &self.spec
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn signer_public_key(&self) -> PublicKey {
        self.signer_key.public_key()
    }

    pub fn network_public_key(&self) -> PublicKey {
        self.network_key.public_key()
    }

    pub fn initial_peers(&self) -> &[String] {
        &self.initial_peers
    }

    pub fn bundle_dir(&self) -> PathBuf {
        self.staging_root.join(&self.spec.name)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.spec.name)
            .field("version", &self.spec.version)
            .field("state", &self.state)
            .field("rpc", &self.rpc_proxy_host)
            .finish()
    }
}
