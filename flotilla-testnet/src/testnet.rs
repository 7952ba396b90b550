use futures_util::future::try_join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use flotilla_core::{
    ClusterSession, ConsensusParams, FlotillaError, GenesisAccount, GenesisBuilder, GenesisDoc,
    GenesisModifier, GenesisValidator, KeyGenerator, KeyType, Keyring, NodeClientFactory,
    PublicKey, Resources, Result,
};
use flotilla_node::{
    build_address_books, ConfigOption, Node, NodeSpec, WorkloadClient, WorkloadSpec,
};

use crate::config::TestnetConfig;
use crate::hooks::{NoopHook, StartHook};
use crate::readiness::wait_for_progress;
use crate::state::TestnetState;

/// Balance minted to every workload client's account.
pub const WORKLOAD_ACCOUNT_TOKENS: i64 = 10_000_000_000_000_000;

/// Outcome of a teardown pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub destroyed: usize,
    /// Names of participants whose destroy failed.
    pub failed: Vec<String>,
    pub skipped: bool,
}

/// Owns every node and workload client of one test network.
///
/// Construction (`create_*`) is sequential and fail fast. `setup` seals
/// genesis and initializes every node. `start`/`start_with_hook` boot the
/// genesis nodes concurrently, run the hook per node, start workload
/// clients and wait for every genesis node to produce blocks. Late joiners
/// start only after that. `cleanup` releases everything and may be called
/// from any state, any number of times.
pub struct Testnet {
    config: TestnetConfig,
    session: Arc<dyn ClusterSession>,
    clients: Arc<dyn NodeClientFactory>,
    keygen: KeyGenerator,
    genesis: GenesisBuilder,
    exported: Option<Arc<GenesisDoc>>,
    nodes: Vec<Node>,
    workload_clients: Vec<WorkloadClient>,
    staging_dir: PathBuf,
    state: TestnetState,
}

impl Testnet {
    pub fn new(
        config: TestnetConfig,
        session: Arc<dyn ClusterSession>,
        clients: Arc<dyn NodeClientFactory>,
    ) -> Result<Self> {
        config.validate()?;
        let staging_dir = config.staging_dir.join(session.scope());
        info!(
            testnet = %config.name,
            scope = %session.scope(),
            chain_id = %config.chain_id,
            seed = config.seed,
            "Creating testnet"
        );

        Ok(Self {
            keygen: KeyGenerator::new(config.seed),
            genesis: GenesisBuilder::new().with_chain_id(config.chain_id.clone()),
            exported: None,
            nodes: Vec::new(),
            workload_clients: Vec::new(),
            staging_dir,
            state: TestnetState::Declared,
            config,
            session,
            clients,
        })
    }

    fn advance(&mut self, next: TestnetState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(FlotillaError::invalid_transition(self.state, next));
        }
        self.state = next;
        Ok(())
    }

    fn ensure_constructing(&self) -> Result<()> {
        if self.state.can_transition_to(TestnetState::Constructed) {
            Ok(())
        } else {
            Err(FlotillaError::invalid_transition(
                self.state,
                TestnetState::Constructed,
            ))
        }
    }

    pub fn set_consensus_params(&mut self, params: ConsensusParams) -> Result<()> {
        self.genesis.set_consensus_params(params)
    }

    pub fn set_consensus_max_block_size(&mut self, bytes: i64) -> Result<()> {
        self.genesis.set_block_max_bytes(bytes)
    }

    pub fn add_genesis_modifier(&mut self, modifier: GenesisModifier) -> Result<()> {
        self.genesis.add_modifier(modifier)
    }

    fn node_spec(&self, version: &str, resources: Resources, packet_capture: bool) -> NodeSpec {
        NodeSpec::new(format!("val{}", self.nodes.len()), version)
            .with_resources(resources)
            .with_packet_capture(packet_capture)
            .with_image_repository(self.config.node_image.clone())
            .with_telemetry(self.config.telemetry.clone())
            .with_startup_timeout(self.config.node_startup_timeout)
    }

    async fn add_node(&mut self, spec: NodeSpec) -> Result<()> {
        self.ensure_constructing()?;
        let signer_key = self.keygen.generate(KeyType::Ed25519);
        let network_key = self.keygen.generate(KeyType::Ed25519);
        let node = Node::new(
            self.session.as_ref(),
            spec,
            signer_key,
            network_key,
            &self.staging_dir,
        )
        .await?;

        let registration = if node.is_genesis_node() && node.is_validator() {
            Some(node.genesis_validator())
        } else {
            None
        };
        self.nodes.push(node);
        self.advance(TestnetState::Constructed)?;
        if let Some(validator) = registration {
            self.genesis.new_validator(validator)?;
        }
        Ok(())
    }

    /// Adds a genesis validator named `val<i>`.
    pub async fn create_genesis_node(
        &mut self,
        version: &str,
        self_delegation: i64,
        upgrade_height: u64,
        resources: Resources,
        packet_capture: bool,
    ) -> Result<()> {
        let spec = self
            .node_spec(version, resources, packet_capture)
            .with_self_delegation(self_delegation)
            .with_upgrade_height(upgrade_height);
        self.add_node(spec).await
    }

    pub async fn create_genesis_nodes(
        &mut self,
        count: usize,
        version: &str,
        self_delegation: i64,
        upgrade_height: u64,
        resources: Resources,
        packet_capture: bool,
    ) -> Result<()> {
        for _ in 0..count {
            self.create_genesis_node(
                version,
                self_delegation,
                upgrade_height,
                resources.clone(),
                packet_capture,
            )
            .await?;
        }
        Ok(())
    }

    /// Adds a non-validator that joins at `start_height`, after genesis
    /// nodes have converged.
    pub async fn create_node(
        &mut self,
        version: &str,
        start_height: u64,
        upgrade_height: u64,
        resources: Resources,
        packet_capture: bool,
    ) -> Result<()> {
        let spec = self
            .node_spec(version, resources, packet_capture)
            .with_start_height(start_height)
            .with_upgrade_height(upgrade_height);
        self.add_node(spec).await
    }

    /// Draws a secp256k1 account key, funds it in genesis and stores it in a
    /// keyring, on disk when `keyring_dir` is given.
    pub async fn create_account(
        &mut self,
        name: &str,
        tokens: i64,
        keyring_dir: Option<&Path>,
    ) -> Result<Keyring> {
        self.ensure_constructing()?;
        if self.genesis.accounts().iter().any(|a| a.name == name) {
            return Err(FlotillaError::config(format!(
                "an account named {} already exists",
                name
            )));
        }
        let key = self.keygen.generate(KeyType::Secp256k1);
        let pubkey = key.public_key();

        // genesis only learns about accounts whose keyring was written
        let mut keyring = match keyring_dir {
            Some(dir) => Keyring::open(dir).await?,
            None => Keyring::in_memory(),
        };
        keyring.add(name, key).await?;
        self.genesis.add_account(GenesisAccount {
            name: name.to_string(),
            pubkey: pubkey.clone(),
            balance: tokens,
        })?;
        self.advance(TestnetState::Constructed)?;
        info!(account = %name, pubkey = %pubkey, tokens, "Account created and added to genesis");
        Ok(keyring)
    }

    /// A workload spec prefilled with this testnet's seed, image and timeout.
    pub fn workload_spec(&self, name: &str, version: &str, target_endpoint: &str) -> WorkloadSpec {
        WorkloadSpec::new(name, version, target_endpoint)
            .with_seed(self.config.seed)
            .with_image_repository(self.config.workload_image.clone())
            .with_startup_timeout(self.config.node_startup_timeout)
    }

    /// Funds an account for `spec.name`, creates the client and copies the
    /// account's keyring into it.
    pub async fn create_workload_client(&mut self, spec: WorkloadSpec) -> Result<()> {
        self.ensure_constructing()?;
        let name = spec.name.clone();
        if self.workload_clients.iter().any(|c| c.name() == name) {
            return Err(FlotillaError::config(format!(
                "a workload client named {} already exists",
                name
            )));
        }
        let keyring_dir = self.staging_dir.join("keyrings").join(&name);
        let keyring = self
            .create_account(&name, WORKLOAD_ACCOUNT_TOKENS, Some(&keyring_dir))
            .await?;
        let account: PublicKey = keyring
            .public_key(&name)
            .ok_or_else(|| FlotillaError::internal(format!("keyring for {} lost its key", name)))?;

        let client = WorkloadClient::new(self.session.as_ref(), spec, account).await?;
        self.workload_clients.push(client);
        self.advance(TestnetState::Constructed)?;

        let index = self.workload_clients.len() - 1;
        if let Err(e) = self.workload_clients[index].init(&keyring_dir).await {
            error!(client = %name, error = %e, "Workload client setup failed");
            return Err(e);
        }
        info!(client = %name, "Workload client created");
        Ok(())
    }

    /// One client per endpoint, named `txsim<i>`, shaped like `template`.
    pub async fn create_workload_clients(
        &mut self,
        template: &WorkloadSpec,
        endpoints: &[String],
    ) -> Result<()> {
        for (i, endpoint) in endpoints.iter().enumerate() {
            let mut spec = template.clone();
            spec.name = format!("txsim{}", i);
            spec.target_endpoint = endpoint.clone();
            self.create_workload_client(spec).await?;
        }
        Ok(())
    }

    /// Exports genesis once and initializes every node with its address book.
    pub async fn setup(&mut self, options: &[ConfigOption]) -> Result<()> {
        if !self.state.can_transition_to(TestnetState::GenesisExported) {
            return Err(FlotillaError::invalid_transition(
                self.state,
                TestnetState::GenesisExported,
            ));
        }
        let genesis = self.genesis.export()?;
        self.exported = Some(genesis.clone());
        self.advance(TestnetState::GenesisExported)?;

        let mut addresses = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            addresses.push(node.address_p2p(true).await?);
        }
        let books = build_address_books(self.config.address_book, &addresses);

        try_join_all(
            self.nodes
                .iter_mut()
                .zip(books)
                .map(|(node, peers)| node.init(&genesis, peers, options)),
        )
        .await?;

        self.advance(TestnetState::Initialized)?;
        info!(nodes = self.nodes.len(), genesis = %genesis.hash()?, "Testnet initialized");
        Ok(())
    }

    pub async fn start(&mut self) -> Result<()> {
        self.start_with_hook(&NoopHook).await
    }

    /// Boots the network.
    ///
    /// All genesis nodes are issued a start before any is waited on. Each is
    /// then waited on in creation order and handed to `hook`. Workload
    /// clients start once every genesis node has forwarded ports. Readiness
    /// is then polled per genesis node. Late joiners start last.
    pub async fn start_with_hook(&mut self, hook: &dyn StartHook) -> Result<()> {
        self.advance(TestnetState::Starting)?;

        let (genesis_nodes, late_joiners): (Vec<usize>, Vec<usize>) =
            (0..self.nodes.len()).partition(|i| self.nodes[*i].is_genesis_node());

        for &i in &genesis_nodes {
            self.nodes[i].start_async().await?;
        }
        for &i in &genesis_nodes {
            let node = &mut self.nodes[i];
            node.wait_until_started_and_forward_ports().await?;
            hook.on_node_started(node).await?;
        }

        self.start_workload_clients().await?;

        for &i in &genesis_nodes {
            let node = &mut self.nodes[i];
            let client = node.client(self.clients.as_ref())?;
            let height = wait_for_progress(node.name(), client.as_ref(), &self.config.readiness).await?;
            node.mark_ready()?;
            info!(node = %node.name(), height, "Node is ready");
        }
        self.advance(TestnetState::Converged)?;

        for &i in &late_joiners {
            let node = &mut self.nodes[i];
            info!(node = %node.name(), start_height = node.start_height(), "Starting late joiner");
            node.start().await?;
        }
        self.advance(TestnetState::Running)?;
        info!(testnet = %self.config.name, "Testnet running");
        Ok(())
    }

    /// Starts every workload client without waiting, then waits for all.
    pub async fn start_workload_clients(&mut self) -> Result<()> {
        for client in &mut self.workload_clients {
            client.start_without_wait().await?;
            info!(client = %client.name(), "Workload client started");
        }
        for client in &mut self.workload_clients {
            client.wait_running().await?;
        }
        Ok(())
    }

    /// Destroys workload clients, then nodes, then closes the session.
    ///
    /// Individual failures are logged and do not stop the sweep. After a
    /// completed pass further calls do nothing.
    pub async fn cleanup(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();
        if self.state.is_destroyed() {
            return report;
        }
        if self.config.skip_cleanup_requested() {
            warn!(testnet = %self.config.name, "Skipping cleanup, resources are left running");
            report.skipped = true;
            return report;
        }

        for client in &mut self.workload_clients {
            match client.destroy().await {
                Ok(()) => report.destroyed += 1,
                Err(e) => {
                    error!(client = %client.name(), error = %e, "Workload client failed to clean up");
                    report.failed.push(client.name().to_string());
                }
            }
        }
        for node in &mut self.nodes {
            match node.destroy().await {
                Ok(()) => report.destroyed += 1,
                Err(e) => {
                    error!(node = %node.name(), error = %e, "Node failed to clean up");
                    report.failed.push(node.name().to_string());
                }
            }
        }
        if let Err(e) = self.session.close().await {
            error!(scope = %self.session.scope(), error = %e, "Failed to close cluster session");
        }

        self.state = TestnetState::Destroyed;
        info!(
            testnet = %self.config.name,
            destroyed = report.destroyed,
            failed = report.failed.len(),
            "Testnet cleaned up"
        );
        report
    }

    /// Externally reachable RPC addresses, in node order.
    pub fn rpc_endpoints(&self) -> Result<Vec<String>> {
        self.nodes
            .iter()
            .map(|node| {
                node.address_rpc().map(str::to_string).ok_or_else(|| {
                    FlotillaError::invalid_transition(node.state(), "rpc endpoint resolved")
                })
            })
            .collect()
    }

    pub async fn remote_rpc_endpoints(&self) -> Result<Vec<String>> {
        let mut endpoints = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            endpoints.push(node.remote_address_rpc().await?);
        }
        Ok(endpoints)
    }

    pub async fn remote_grpc_endpoints(&self) -> Result<Vec<String>> {
        let mut endpoints = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            endpoints.push(node.remote_address_grpc().await?);
        }
        Ok(endpoints)
    }

    /// Genesis entries of the nodes registered as genesis validators.
    pub fn genesis_validators(&self) -> Vec<GenesisValidator> {
        self.nodes
            .iter()
            .filter(|n| n.is_genesis_node() && n.is_validator())
            .map(Node::genesis_validator)
            .collect()
    }

    pub fn node(&self, index: usize) -> Option<&Node> {
        self.nodes.get(index)
    }

    pub fn node_mut(&mut self, index: usize) -> Option<&mut Node> {
        self.nodes.get_mut(index)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    pub fn workload_clients(&self) -> &[WorkloadClient] {
        &self.workload_clients
    }

    /// The sealed genesis document, once `setup` has exported it.
    pub fn genesis(&self) -> Option<Arc<GenesisDoc>> {
        self.exported.clone()
    }

    pub fn state(&self) -> TestnetState {
        self.state
    }

    pub fn config(&self) -> &TestnetConfig {
        &self.config
    }

    pub fn scope(&self) -> &str {
        self.session.scope()
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Keys drawn so far.
    pub fn key_draws(&self) -> u64 {
        self.keygen.draws()
    }

    pub fn client_factory(&self) -> Arc<dyn NodeClientFactory> {
        self.clients.clone()
    }
}

impl std::fmt::Debug for Testnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Testnet")
            .field("name", &self.config.name)
            .field("scope", &self.session.scope())
            .field("state", &self.state)
            .field("nodes", &self.nodes)
            .field("workload_clients", &self.workload_clients)
            .finish()
    }
}
