//! # Flotilla Testnet
//!
//! The [`Testnet`] aggregate turns a declared topology into a running
//! network and tears it down again.
//!
//! ## Lifecycle
//!
//! ```text
//! declared → constructed → genesis-exported → initialized
//!          → starting → converged → running → destroyed
//! ```
//!
//! `destroyed` is reachable from every state through [`Testnet::cleanup`].
//!
//! ## Startup ordering
//!
//! 1. Every genesis node receives a start request before any is waited on.
//! 2. Each genesis node is waited on in creation order, then passed to the
//!    [`StartHook`].
//! 3. Workload clients start after every genesis node has forwarded ports.
//! 4. Each genesis node is polled under the [`ReadinessPolicy`] until it
//!    reports a height above zero.
//! 5. Late joiners start.

pub mod config;
pub mod hooks;
pub mod readiness;
pub mod state;
pub mod testnet;

pub use config::{session_scope, ReadinessPolicy, TestnetConfig, SKIP_CLEANUP_ENV};
pub use hooks::{NetworkConditionsHook, NoopHook, StartHook};
pub use readiness::wait_for_progress;
pub use state::TestnetState;
pub use testnet::{CleanupReport, Testnet, WORKLOAD_ACCOUNT_TOKENS};
