//! Local staging of a node's home directory before it is copied to the instance.

use flotilla_core::{EncodedKey, PrivateKey, PublicKey, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

pub const CONFIG_DIR: &str = "config";
pub const DATA_DIR: &str = "data";

pub const CONFIG_FILE: &str = "config/config.toml";
pub const APP_CONFIG_FILE: &str = "config/app.toml";
pub const GENESIS_FILE: &str = "config/genesis.json";
pub const NODE_KEY_FILE: &str = "config/node_key.json";
pub const PRIV_VALIDATOR_KEY_FILE: &str = "config/priv_validator_key.json";
pub const ADDR_BOOK_FILE: &str = "config/addrbook.json";
pub const PRIV_VALIDATOR_STATE_FILE: &str = "data/priv_validator_state.json";

/// `node_key.json`: the network identity key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeKeyFile {
    pub priv_key: EncodedKey,
}

/// `priv_validator_key.json`: the consensus signing key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivValidatorKeyFile {
    pub address: String,
    pub pub_key: PublicKey,
    pub priv_key: EncodedKey,
}

impl PrivValidatorKeyFile {
    pub fn new(key: &PrivateKey) -> Self {
        let pub_key = key.public_key();
        Self {
            address: pub_key.address_hex().to_uppercase(),
            pub_key,
            priv_key: key.encode(),
        }
    }
}

/// `priv_validator_state.json` at height zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivValidatorState {
    pub height: String,
    pub round: i32,
    pub step: i8,
}

impl PrivValidatorState {
    pub fn initial() -> Self {
        Self {
            height: "0".to_string(),
            round: 0,
            step: 0,
        }
    }
}

/// Writes files under a node's local home directory.
///
/// Every write goes to a sibling temp file first and is then renamed into
/// place, so a partially written bundle is never copied to an instance.
#[derive(Debug, Clone)]
pub struct BundleWriter {
    root: PathBuf,
}

impl BundleWriter {
    /// Creates `root` along with its `config` and `data` subdirectories.
    pub async fn create(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(CONFIG_DIR)).await?;
        fs::create_dir_all(root.join(DATA_DIR)).await?;
        debug!("Staging node bundle at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn write_json<T: Serialize>(&self, relative: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_atomic(relative, &bytes).await
    }

    pub async fn write_str(&self, relative: &str, contents: &str) -> Result<()> {
        self.write_atomic(relative, contents.as_bytes()).await
    }

    async fn write_atomic(&self, relative: &str, bytes: &[u8]) -> Result<()> {
        let path = self.root.join(relative);
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, bytes).await?;
        fs::rename(&temp_path, &path).await?;
        Ok(())
    }
}
