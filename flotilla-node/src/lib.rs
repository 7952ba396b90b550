//! # Flotilla Node
//!
//! Lifecycle handles for the participants of a testnet.
//!
//! A [`Node`] owns one compute instance and walks it through
//! `keyed → provisioned → starting → running-unverified → ready`. Its `init`
//! stages a complete home directory (config, genesis, keys, address book)
//! and copies it into the committed instance. A [`WorkloadClient`] mirrors
//! the two-phase boot for the transaction simulator.

pub mod address_book;
pub mod bundle;
pub mod config;
pub mod node;
pub mod workload;

pub use address_book::{build_address_books, AddressBook, AddressBookStrategy, PeerAddress};
pub use config::{make_config, AppConfig, ConfigOption, NodeConfig, BOND_DENOM};
pub use node::{
    Node, NodeSpec, NodeState, DEFAULT_NODE_IMAGE, DEFAULT_REMOTE_HOME, DEFAULT_STARTUP_TIMEOUT,
};
pub use workload::{
    SizeRange, WorkloadClient, WorkloadSpec, WorkloadState, DEFAULT_WORKLOAD_HOME,
    DEFAULT_WORKLOAD_IMAGE,
};
