//! # Error Types
//!
//! Error taxonomy for testnet orchestration.

use thiserror::Error;

/// Error types that can occur while building, starting or tearing down a testnet.
///
/// Variants follow the lifecycle taxonomy used throughout the orchestrator:
///
/// - **Configuration errors**: bad algorithm, empty peer list, duplicate
///   validator or account. Fatal and never retried.
/// - **Provisioning errors**: any compute-substrate verb failing for a node or
///   workload client. Fatal to that participant's setup.
/// - **Readiness errors**: a status call failing while waiting for a node to
///   make progress. Retried locally by the readiness loop.
/// - **Convergence errors**: the readiness budget ran out without observing
///   progress.
///
/// Teardown never produces an error value; destroy failures are logged.
///
/// # Examples
///
/// ```rust
/// use flotilla_core::FlotillaError;
///
/// let error = FlotillaError::readiness("val0", "connection refused");
/// assert!(error.is_retryable());
///
/// let error = FlotillaError::config("peer list is empty");
/// assert!(!error.is_retryable());
/// ```
#[derive(Error, Debug)]
pub enum FlotillaError {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Requested key algorithm is not supported
    #[error("Unsupported key algorithm: {algorithm}")]
    UnsupportedAlgorithm { algorithm: String },

    /// A validator with this name is already registered in genesis
    #[error("Validator {name} already registered in genesis")]
    DuplicateValidator { name: String },

    /// An account with this public key is already registered in genesis
    #[error("Account with public key {pubkey} already registered in genesis")]
    DuplicateAccount { pubkey: String },

    /// Genesis has been exported and no longer accepts changes
    #[error("Genesis is sealed: {operation} after export")]
    GenesisSealed { operation: String },

    /// A node expected to join an existing network was given no peers
    #[error("No peers provided for node {node}")]
    EmptyPeerList { node: String },

    /// A compute substrate operation failed for a participant
    #[error("Provisioning error on {node} during {operation}: {message}")]
    Provisioning {
        node: String,
        operation: String,
        message: String,
    },

    /// A status call failed while waiting for a node to make progress
    #[error("Node {node} status response: {message}")]
    Readiness { node: String, message: String },

    /// The readiness budget was exhausted without observing progress
    #[error("Failed to start node {node}")]
    Convergence { node: String },

    /// A bounded wait elapsed
    #[error("Timeout occurred: {operation}")]
    Timeout { operation: String },

    /// Lifecycle call made from a state that does not allow it
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// JSON serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML serialization failure
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    /// Local file system failure while staging a bundle
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Result alias used across all flotilla crates.
pub type Result<T> = std::result::Result<T, FlotillaError>;

impl FlotillaError {
    /// Creates a new configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a new provisioning error for `node` while running `operation`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use flotilla_core::FlotillaError;
    ///
    /// let error = FlotillaError::provisioning("val1", "commit", "quota exceeded");
    /// assert_eq!(
    ///     error.to_string(),
    ///     "Provisioning error on val1 during commit: quota exceeded"
    /// );
    /// ```
    pub fn provisioning(
        node: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Provisioning {
            node: node.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a new transient readiness error.
    pub fn readiness(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Readiness {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Creates a new convergence failure for `node`.
    pub fn convergence(node: impl Into<String>) -> Self {
        Self::Convergence { node: node.into() }
    }

    /// Creates a new timeout error.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Creates a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an invalid lifecycle transition error.
    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Returns true for errors the readiness loop may retry.
    ///
    /// Configuration, provisioning and convergence errors are never retried
    /// by the orchestrator.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Readiness { .. } | Self::Timeout { .. })
    }

    /// Returns true for errors caused by the testnet description itself.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::UnsupportedAlgorithm { .. }
                | Self::DuplicateValidator { .. }
                | Self::DuplicateAccount { .. }
                | Self::GenesisSealed { .. }
                | Self::EmptyPeerList { .. }
        )
    }
}
