//! # Flotilla Core
//!
//! Building blocks shared by every flotilla crate:
//!
//! - **KeyGenerator**: deterministic, seed-derived key material
//! - **GenesisBuilder**: accumulates validators and funded accounts into one
//!   sealed genesis document
//! - **Keyring**: named account keys, in memory or on disk
//! - **Substrate traits**: [`ClusterSession`], [`Instance`], [`FaultInjector`],
//!   [`NodeClient`]; the orchestrator touches the outside world only through these
//! - **Error Handling**: [`FlotillaError`] and the crate-wide [`Result`]
//!
//! ```rust
//! use flotilla_core::{KeyGenerator, KeyType};
//!
//! let mut keys = KeyGenerator::new(42);
//! let signer = keys.generate(KeyType::Ed25519);
//! let network = keys.generate(KeyType::Ed25519);
//! assert_ne!(signer.public_key(), network.public_key());
//! ```

pub mod cluster;
pub mod error;
pub mod genesis;
pub mod keygen;
pub mod keyring;
pub mod rpc;
pub mod types;

pub use cluster::{ClusterSession, FaultInjector, Instance};
pub use error::*;
pub use genesis::*;
pub use keygen::*;
pub use keyring::Keyring;
pub use rpc::{BlockSummary, NodeClient, NodeClientFactory, NodeStatus};
pub use types::*;
