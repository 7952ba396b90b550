//! # Key Generation
//!
//! Deterministic, seed-derived key material for testnet participants.
//!
//! Every draw is a pure function of `(seed, draw index, algorithm)`: the
//! generator carries only a counter, and each draw seeds a fresh ChaCha
//! stream selected by that counter. Re-running a testnet with the same seed
//! and the same sequence of draws reproduces every key byte-for-byte.

use crate::{FlotillaError, Result};
use ed25519_dalek::SigningKey;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Supported key algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    /// Consensus signing and P2P identity keys.
    Ed25519,
    /// Funded account keys.
    Secp256k1,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Ed25519 => "ed25519",
            KeyType::Secp256k1 => "secp256k1",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = FlotillaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ed25519" => Ok(KeyType::Ed25519),
            "secp256k1" => Ok(KeyType::Secp256k1),
            other => Err(FlotillaError::UnsupportedAlgorithm {
                algorithm: other.to_string(),
            }),
        }
    }
}

/// A private key of one of the supported algorithms.
#[derive(Clone)]
pub enum PrivateKey {
    Ed25519(SigningKey),
    Secp256k1(secp256k1::SecretKey),
}

impl PrivateKey {
    pub fn key_type(&self) -> KeyType {
        match self {
            PrivateKey::Ed25519(_) => KeyType::Ed25519,
            PrivateKey::Secp256k1(_) => KeyType::Secp256k1,
        }
    }

    /// Raw secret bytes.
    pub fn to_bytes(&self) -> [u8; 32] {
        match self {
            PrivateKey::Ed25519(key) => key.to_bytes(),
            PrivateKey::Secp256k1(key) => key.secret_bytes(),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        match self {
            PrivateKey::Ed25519(key) => PublicKey::Ed25519(key.verifying_key().to_bytes()),
            PrivateKey::Secp256k1(key) => {
                let secp = secp256k1::Secp256k1::signing_only();
                PublicKey::Secp256k1(key.public_key(&secp).serialize())
            }
        }
    }

    /// Serializable form carrying the secret as hex.
    pub fn encode(&self) -> EncodedKey {
        EncodedKey {
            key_type: self.key_type(),
            value: hex::encode(self.to_bytes()),
        }
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.key_type() == other.key_type() && self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PrivateKey {}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey({}, pub={})", self.key_type(), self.public_key())
    }
}

/// A public key of one of the supported algorithms.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "EncodedKey", try_from = "EncodedKey")]
pub enum PublicKey {
    /// ED25519 public key (32 bytes).
    Ed25519([u8; 32]),
    /// Compressed secp256k1 public key (33 bytes).
    Secp256k1([u8; 33]),
}

impl PublicKey {
    pub fn key_type(&self) -> KeyType {
        match self {
            PublicKey::Ed25519(_) => KeyType::Ed25519,
            PublicKey::Secp256k1(_) => KeyType::Secp256k1,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            PublicKey::Ed25519(bytes) => bytes,
            PublicKey::Secp256k1(bytes) => bytes,
        }
    }

    /// 20-byte address: the truncated SHA-256 of the key bytes.
    pub fn address(&self) -> [u8; 20] {
        let digest = Sha256::digest(self.as_bytes());
        let mut address = [0u8; 20];
        address.copy_from_slice(&digest[..20]);
        address
    }

    /// Hex-encoded address, used as the P2P node id.
    pub fn address_hex(&self) -> String {
        hex::encode(self.address())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key_type(), self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// JSON representation shared by key files and genesis entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedKey {
    #[serde(rename = "type")]
    pub key_type: KeyType,
    pub value: String,
}

impl From<PublicKey> for EncodedKey {
    fn from(key: PublicKey) -> Self {
        EncodedKey {
            key_type: key.key_type(),
            value: key.to_hex(),
        }
    }
}

impl TryFrom<EncodedKey> for PublicKey {
    type Error = String;

    fn try_from(encoded: EncodedKey) -> std::result::Result<Self, Self::Error> {
        let bytes = hex::decode(&encoded.value).map_err(|e| e.to_string())?;
        match encoded.key_type {
            KeyType::Ed25519 => bytes
                .try_into()
                .map(PublicKey::Ed25519)
                .map_err(|_| "ed25519 public key must be 32 bytes".to_string()),
            KeyType::Secp256k1 => bytes
                .try_into()
                .map(PublicKey::Secp256k1)
                .map_err(|_| "secp256k1 public key must be 33 bytes".to_string()),
        }
    }
}

/// Sequential, seed-derived key producer shared by every participant of one testnet.
///
/// The generator is passed by exclusive reference through construction; it
/// is never shared between testnets.
///
/// # Examples
///
/// ```rust
/// use flotilla_core::{KeyGenerator, KeyType};
///
/// let mut a = KeyGenerator::new(42);
/// let mut b = KeyGenerator::new(42);
/// assert_eq!(a.generate(KeyType::Ed25519), b.generate(KeyType::Ed25519));
/// assert_ne!(a.generate(KeyType::Ed25519), a.generate(KeyType::Ed25519));
/// ```
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    seed: u64,
    draws: u64,
}

impl KeyGenerator {
    pub fn new(seed: u64) -> Self {
        Self { seed, draws: 0 }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of keys produced so far.
    pub fn draws(&self) -> u64 {
        self.draws
    }

    /// Produces the next key in the sequence.
    pub fn generate(&mut self, key_type: KeyType) -> PrivateKey {
        let key = derive_key(self.seed, self.draws, key_type);
        self.draws += 1;
        key
    }

    /// Produces the next key for an algorithm given by name.
    ///
    /// An unknown algorithm is a configuration error and consumes no draw.
    pub fn generate_named(&mut self, algorithm: &str) -> Result<PrivateKey> {
        let key_type = algorithm.parse::<KeyType>()?;
        Ok(self.generate(key_type))
    }
}

/// Derives the key for draw `index` of a generator seeded with `seed`.
pub fn derive_key(seed: u64, index: u64, key_type: KeyType) -> PrivateKey {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    rng.set_stream(index);

    loop {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        match key_type {
            KeyType::Ed25519 => return PrivateKey::Ed25519(SigningKey::from_bytes(&bytes)),
            KeyType::Secp256k1 => {
                // Out-of-range scalars are vanishingly rare; draw again from the same stream.
                if let Ok(key) = secp256k1::SecretKey::from_slice(&bytes) {
                    return PrivateKey::Secp256k1(key);
                }
            }
        }
    }
}
