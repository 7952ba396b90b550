//! Account keyrings for funded workload accounts.
//!
//! The private half of an account key lives only here; genesis receives the
//! public key and balance.

use crate::keygen::{EncodedKey, KeyType, PrivateKey, PublicKey};
use crate::{FlotillaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

/// On-disk form of one keyring entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    name: String,
    pubkey: PublicKey,
    private_key: EncodedKey,
}

/// A set of named account keys, optionally persisted to a directory.
///
/// ```rust
/// use flotilla_core::{KeyGenerator, KeyType, Keyring};
///
/// # tokio_test::block_on(async {
/// let mut keys = KeyGenerator::new(42);
/// let mut keyring = Keyring::in_memory();
/// let pubkey = keyring.add("txsim0", keys.generate(KeyType::Secp256k1)).await.unwrap();
/// assert_eq!(keyring.public_key("txsim0"), Some(pubkey));
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct Keyring {
    dir: Option<PathBuf>,
    keys: BTreeMap<String, PrivateKey>,
}

impl Keyring {
    /// A keyring that never touches disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// A keyring persisted as one JSON file per key under `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir: Some(dir),
            keys: BTreeMap::new(),
        })
    }

    /// Loads every entry previously written under `dir`.
    pub async fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let mut keys = BTreeMap::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let stored: StoredEntry = serde_json::from_slice(&fs::read(&path).await?)?;
            keys.insert(stored.name.clone(), decode_private(&stored.private_key)?);
        }
        Ok(Self {
            dir: Some(dir),
            keys,
        })
    }

    /// Stores `key` under `name` and returns its public key.
    pub async fn add(&mut self, name: &str, key: PrivateKey) -> Result<PublicKey> {
        if self.keys.contains_key(name) {
            return Err(FlotillaError::config(format!(
                "keyring already holds a key named {}",
                name
            )));
        }
        let pubkey = key.public_key();

        if let Some(dir) = &self.dir {
            let stored = StoredEntry {
                name: name.to_string(),
                pubkey: pubkey.clone(),
                private_key: key.encode(),
            };
            fs::write(
                dir.join(format!("{}.json", name)),
                serde_json::to_vec_pretty(&stored)?,
            )
            .await?;
        }

        self.keys.insert(name.to_string(), key);
        Ok(pubkey)
    }

    pub fn get(&self, name: &str) -> Option<&PrivateKey> {
        self.keys.get(name)
    }

    pub fn public_key(&self, name: &str) -> Option<PublicKey> {
        self.keys.get(name).map(PrivateKey::public_key)
    }

    /// Directory backing this keyring, if persisted.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

fn decode_private(encoded: &EncodedKey) -> Result<PrivateKey> {
    let bytes: [u8; 32] = hex::decode(&encoded.value)
        .map_err(|e| FlotillaError::config(format!("invalid key encoding: {}", e)))?
        .try_into()
        .map_err(|_| FlotillaError::config("private keys must be 32 bytes"))?;

    match encoded.key_type {
        KeyType::Ed25519 => Ok(PrivateKey::Ed25519(
            ed25519_dalek::SigningKey::from_bytes(&bytes),
        )),
        KeyType::Secp256k1 => secp256k1::SecretKey::from_slice(&bytes)
            .map(PrivateKey::Secp256k1)
            .map_err(|e| FlotillaError::config(format!("invalid secp256k1 key: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keygen::KeyGenerator;

    #[tokio::test]
    async fn test_in_memory_keyring() {
        let mut keys = KeyGenerator::new(5);
        let mut keyring = Keyring::in_memory();

        let pubkey = keyring
            .add("txsim", keys.generate(KeyType::Secp256k1))
            .await
            .unwrap();
        assert_eq!(keyring.public_key("txsim"), Some(pubkey));
        assert!(keyring.dir().is_none());

        let error = keyring
            .add("txsim", keys.generate(KeyType::Secp256k1))
            .await
            .unwrap_err();
        assert!(error.is_configuration());
        assert_eq!(keyring.len(), 1);
    }

    #[tokio::test]
    async fn test_persisted_keyring_roundtrip() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut keys = KeyGenerator::new(5);

        let mut keyring = Keyring::open(temp_dir.path().join("txsim0")).await.unwrap();
        let key = keys.generate(KeyType::Secp256k1);
        keyring.add("txsim0", key.clone()).await.unwrap();

        let loaded = Keyring::load(temp_dir.path().join("txsim0")).await.unwrap();
        assert_eq!(loaded.get("txsim0"), Some(&key));
        assert_eq!(loaded.names().collect::<Vec<_>>(), vec!["txsim0"]);
    }
}
