//! # Flotilla Bench
//!
//! Experiments on top of [`flotilla_testnet`]. A [`Manifest`] fixes the
//! topology, workload and node knobs of a run; [`BenchmarkTest`] turns it
//! into a testnet, runs it for the configured duration and validates the
//! resulting chain. [`E2ESimple`] is the smallest end-to-end scenario.
//!
//! ```rust
//! use flotilla_bench::Manifest;
//!
//! let manifest = Manifest::preset("TwoNodeBigBlock_8MiB").unwrap();
//! assert_eq!(manifest.validators, 2);
//! assert!(manifest.validate().is_ok());
//! ```

pub mod benchmark;
pub mod e2e;
pub mod error;
pub mod manifest;
pub mod trace_push;

pub use benchmark::{validate_blockchain, BenchmarkTest, BlockchainSummary};
pub use e2e::E2ESimple;
pub use error::{BenchError, Result};
pub use manifest::{Manifest, DEFAULT_MIN_TRANSACTIONS, DEFAULT_VERSION};
pub use trace_push::TracePushConfig;
