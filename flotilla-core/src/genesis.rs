//! # Genesis Assembly
//!
//! Accumulates validator and funded-account declarations during topology
//! construction and seals them into one immutable [`GenesisDoc`].

use crate::keygen::PublicKey;
use crate::{FlotillaError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Chain id used when none is configured.
pub const DEFAULT_CHAIN_ID: &str = "test";

/// Application version new chains start at.
pub const DEFAULT_APP_VERSION: u64 = 2;

/// Consensus parameters every node must agree on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusParams {
    pub block_max_bytes: i64,
    /// `-1` disables the gas limit.
    pub block_max_gas: i64,
    pub evidence_max_age_num_blocks: i64,
    pub evidence_max_age_ms: u64,
    pub app_version: u64,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            block_max_bytes: 1_974_272,
            block_max_gas: -1,
            evidence_max_age_num_blocks: 120_960,
            evidence_max_age_ms: 1_814_400_000,
            app_version: DEFAULT_APP_VERSION,
        }
    }
}

impl ConsensusParams {
    pub fn with_block_max_bytes(mut self, bytes: i64) -> Self {
        self.block_max_bytes = bytes;
        self
    }

    pub fn with_app_version(mut self, version: u64) -> Self {
        self.app_version = version;
        self
    }
}

/// A genesis validator entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisValidator {
    pub name: String,
    /// Tokens minted to the validator's operator account.
    pub initial_tokens: i64,
    /// Tokens bonded at genesis.
    pub stake: i64,
    pub consensus_key: PublicKey,
    pub network_key: PublicKey,
}

/// A funded genesis account. Only the public half of the key ever appears here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub name: String,
    pub pubkey: PublicKey,
    pub balance: i64,
}

/// Immutable, exported chain-wide initial state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisDoc {
    pub chain_id: String,
    pub genesis_time_ms: u64,
    pub consensus_params: ConsensusParams,
    pub validators: Vec<GenesisValidator>,
    pub accounts: Vec<GenesisAccount>,
    /// Application-level parameters set by genesis modifiers.
    #[serde(default)]
    pub app_params: BTreeMap<String, serde_json::Value>,
}

impl GenesisDoc {
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// SHA-256 of the canonical JSON encoding, hex encoded.
    pub fn hash(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(bytes)))
    }

    pub fn total_stake(&self) -> i64 {
        self.validators.iter().map(|v| v.stake).sum()
    }
}

/// A transformation applied to the document at export time.
pub type GenesisModifier = Arc<dyn Fn(&mut GenesisDoc) + Send + Sync>;

/// Accumulates declarations into one consistent genesis document.
///
/// The builder is open while the topology is being constructed and sealed by
/// the first [`GenesisBuilder::export`]. Every later mutation fails with
/// [`FlotillaError::GenesisSealed`]; a later `export` returns the same snapshot
/// so nodes initialised from it never disagree.
///
/// # Examples
///
/// ```rust
/// use flotilla_core::{GenesisBuilder, GenesisValidator, KeyGenerator, KeyType};
///
/// let mut keys = KeyGenerator::new(42);
/// let mut builder = GenesisBuilder::new().with_chain_id("demo");
/// builder
///     .new_validator(GenesisValidator {
///         name: "val0".to_string(),
///         initial_tokens: 10_000_000,
///         stake: 5_000_000,
///         consensus_key: keys.generate(KeyType::Ed25519).public_key(),
///         network_key: keys.generate(KeyType::Ed25519).public_key(),
///     })
///     .unwrap();
///
/// let genesis = builder.export().unwrap();
/// assert_eq!(genesis.chain_id, "demo");
/// assert_eq!(genesis.validators.len(), 1);
/// ```
pub struct GenesisBuilder {
    chain_id: String,
    genesis_time_ms: u64,
    consensus_params: ConsensusParams,
    validators: Vec<GenesisValidator>,
    accounts: Vec<GenesisAccount>,
    validator_names: HashSet<String>,
    account_keys: HashSet<PublicKey>,
    modifiers: Vec<GenesisModifier>,
    exported: Option<Arc<GenesisDoc>>,
}

impl Default for GenesisBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GenesisBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenesisBuilder")
            .field("chain_id", &self.chain_id)
            .field("validators", &self.validators.len())
            .field("accounts", &self.accounts.len())
            .field("modifiers", &self.modifiers.len())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

impl GenesisBuilder {
    pub fn new() -> Self {
        let genesis_time_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        Self {
            chain_id: DEFAULT_CHAIN_ID.to_string(),
            genesis_time_ms,
            consensus_params: ConsensusParams::default(),
            validators: Vec::new(),
            accounts: Vec::new(),
            validator_names: HashSet::new(),
            account_keys: HashSet::new(),
            modifiers: Vec::new(),
            exported: None,
        }
    }

    pub fn with_chain_id(mut self, chain_id: impl Into<String>) -> Self {
        self.chain_id = chain_id.into();
        self
    }

    pub fn with_consensus_params(mut self, params: ConsensusParams) -> Self {
        self.consensus_params = params;
        self
    }

    pub fn with_genesis_time_ms(mut self, genesis_time_ms: u64) -> Self {
        self.genesis_time_ms = genesis_time_ms;
        self
    }

    pub fn with_modifiers(mut self, modifiers: impl IntoIterator<Item = GenesisModifier>) -> Self {
        self.modifiers.extend(modifiers);
        self
    }

    /// Overwrites the chain id. Last write wins.
    pub fn set_chain_id(&mut self, chain_id: impl Into<String>) -> Result<()> {
        self.ensure_open("set chain id")?;
        self.chain_id = chain_id.into();
        Ok(())
    }

    /// Overwrites the consensus parameters. Last write wins.
    pub fn set_consensus_params(&mut self, params: ConsensusParams) -> Result<()> {
        self.ensure_open("set consensus params")?;
        self.consensus_params = params;
        Ok(())
    }

    pub fn set_block_max_bytes(&mut self, bytes: i64) -> Result<()> {
        self.ensure_open("set block max bytes")?;
        self.consensus_params.block_max_bytes = bytes;
        Ok(())
    }

    pub fn add_modifier(&mut self, modifier: GenesisModifier) -> Result<()> {
        self.ensure_open("add modifier")?;
        self.modifiers.push(modifier);
        Ok(())
    }

    /// Registers a validator. Fails without mutating state if the name is taken.
    pub fn new_validator(&mut self, validator: GenesisValidator) -> Result<()> {
        self.ensure_open("new validator")?;
        if self.validator_names.contains(&validator.name) {
            return Err(FlotillaError::DuplicateValidator {
                name: validator.name,
            });
        }

        debug!(name = %validator.name, stake = validator.stake, "Registered genesis validator");
        self.validator_names.insert(validator.name.clone());
        self.validators.push(validator);
        Ok(())
    }

    /// Registers a funded account. Fails without mutating state on a duplicate public key.
    pub fn add_account(&mut self, account: GenesisAccount) -> Result<()> {
        self.ensure_open("add account")?;
        if self.account_keys.contains(&account.pubkey) {
            return Err(FlotillaError::DuplicateAccount {
                pubkey: account.pubkey.to_hex(),
            });
        }

        debug!(name = %account.name, balance = account.balance, "Registered genesis account");
        self.account_keys.insert(account.pubkey.clone());
        self.accounts.push(account);
        Ok(())
    }

    /// Seals the builder and returns the genesis snapshot.
    pub fn export(&mut self) -> Result<Arc<GenesisDoc>> {
        if let Some(doc) = &self.exported {
            return Ok(doc.clone());
        }
        if self.validators.is_empty() {
            return Err(FlotillaError::config(
                "genesis requires at least one validator",
            ));
        }

        let mut doc = GenesisDoc {
            chain_id: self.chain_id.clone(),
            genesis_time_ms: self.genesis_time_ms,
            consensus_params: self.consensus_params.clone(),
            validators: self.validators.clone(),
            accounts: self.accounts.clone(),
            app_params: BTreeMap::new(),
        };
        for modifier in &self.modifiers {
            modifier(&mut doc);
        }

        info!(
            chain_id = %doc.chain_id,
            validators = doc.validators.len(),
            accounts = doc.accounts.len(),
            "Exported genesis"
        );
        let doc = Arc::new(doc);
        self.exported = Some(doc.clone());
        Ok(doc)
    }

    pub fn is_sealed(&self) -> bool {
        self.exported.is_some()
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn consensus_params(&self) -> &ConsensusParams {
        &self.consensus_params
    }

    pub fn validators(&self) -> &[GenesisValidator] {
        &self.validators
    }

    pub fn accounts(&self) -> &[GenesisAccount] {
        &self.accounts
    }

    fn ensure_open(&self, operation: &str) -> Result<()> {
        if self.is_sealed() {
            return Err(FlotillaError::GenesisSealed {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keygen::{KeyGenerator, KeyType};

    fn validator(keys: &mut KeyGenerator, name: &str) -> GenesisValidator {
        GenesisValidator {
            name: name.to_string(),
            initial_tokens: 10_000_000,
            stake: 5_000_000,
            consensus_key: keys.generate(KeyType::Ed25519).public_key(),
            network_key: keys.generate(KeyType::Ed25519).public_key(),
        }
    }

    fn account(keys: &mut KeyGenerator, name: &str) -> GenesisAccount {
        GenesisAccount {
            name: name.to_string(),
            pubkey: keys.generate(KeyType::Secp256k1).public_key(),
            balance: 1_000,
        }
    }

    #[test]
    fn test_duplicate_validator_does_not_mutate() {
        let mut keys = KeyGenerator::new(1);
        let mut builder = GenesisBuilder::new();
        builder.new_validator(validator(&mut keys, "val0")).unwrap();

        let error = builder.new_validator(validator(&mut keys, "val0")).unwrap_err();
        assert!(matches!(error, FlotillaError::DuplicateValidator { .. }));
        assert_eq!(builder.validators().len(), 1);
    }

    #[test]
    fn test_duplicate_account_does_not_mutate() {
        let mut keys = KeyGenerator::new(1);
        let mut builder = GenesisBuilder::new();
        let first = account(&mut keys, "txsim0");
        let mut dup = first.clone();
        dup.name = "other".to_string();

        builder.add_account(first).unwrap();
        let error = builder.add_account(dup).unwrap_err();
        assert!(matches!(error, FlotillaError::DuplicateAccount { .. }));
        assert_eq!(builder.accounts().len(), 1);
    }

    #[test]
    fn test_export_counts_and_seal() {
        let mut keys = KeyGenerator::new(9);
        let mut builder = GenesisBuilder::new().with_chain_id("first");
        builder.set_chain_id("second").unwrap();
        for i in 0..3 {
            builder.new_validator(validator(&mut keys, &format!("val{i}"))).unwrap();
        }
        builder.add_account(account(&mut keys, "txsim0")).unwrap();
        let _ = builder.new_validator(validator(&mut keys, "val1"));

        let doc = builder.export().unwrap();
        assert_eq!(doc.chain_id, "second");
        assert_eq!(doc.validators.len(), 3);
        assert_eq!(doc.accounts.len(), 1);
        assert_eq!(doc.total_stake(), 15_000_000);

        assert!(matches!(
            builder.add_account(account(&mut keys, "late")),
            Err(FlotillaError::GenesisSealed { .. })
        ));
        assert!(builder.set_chain_id("third").is_err());

        let again = builder.export().unwrap();
        assert!(Arc::ptr_eq(&doc, &again));
    }

    #[test]
    fn test_export_requires_validator() {
        let mut builder = GenesisBuilder::new();
        assert!(builder.export().unwrap_err().is_configuration());
        assert!(!builder.is_sealed());
    }

    #[test]
    fn test_modifiers_apply_at_export() {
        let mut keys = KeyGenerator::new(2);
        let modifier: GenesisModifier = Arc::new(|doc: &mut GenesisDoc| {
            doc.app_params
                .insert("blob.gov_max_square_size".to_string(), 128.into());
        });
        let mut builder = GenesisBuilder::new().with_modifiers([modifier]);
        builder.new_validator(validator(&mut keys, "val0")).unwrap();

        let doc = builder.export().unwrap();
        assert_eq!(doc.app_params["blob.gov_max_square_size"], 128);

        let json = doc.to_json_pretty().unwrap();
        let parsed: GenesisDoc = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.hash().unwrap(), doc.hash().unwrap());
    }
}
