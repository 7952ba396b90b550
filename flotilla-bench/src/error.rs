use flotilla_core::FlotillaError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BenchError>;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Invalid manifest {name}: {message}")]
    InvalidManifest { name: String, message: String },

    #[error("Unknown preset: {0}")]
    UnknownPreset(String),

    #[error("Expected app version {expected}, got {actual} in block {height}")]
    AppVersionMismatch {
        expected: u64,
        actual: u64,
        height: u64,
    },

    #[error("Expected at least {expected} transactions, got {actual}")]
    TooFewTransactions { expected: usize, actual: usize },

    #[error("No node to read the chain from")]
    NoNodes,

    #[error(transparent)]
    Testnet(#[from] FlotillaError),

    #[error("Manifest parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BenchError {
    pub fn invalid_manifest(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidManifest {
            name: name.into(),
            message: message.into(),
        }
    }

    /// True when the chain was read but did not meet expectations.
    pub fn is_validation_failure(&self) -> bool {
        matches!(
            self,
            BenchError::AppVersionMismatch { .. } | BenchError::TooFewTransactions { .. }
        )
    }
}
