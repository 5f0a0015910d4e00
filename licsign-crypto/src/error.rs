//! Error types for key management and signing.

use thiserror::Error;

use crate::provider::ProviderError;

/// Errors surfaced by [`LicenseSigner`](crate::LicenseSigner) operations.
#[derive(Debug, Error)]
pub enum SignerError {
    /// Operation invoked out of lifecycle order (e.g. export before generate).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The underlying provider call failed.
    #[error("{operation} failed: {message} (0x{code:08x})")]
    ProviderFailure {
        /// Name of the operation that failed.
        operation: &'static str,
        /// The provider's native error code.
        code: u32,
        /// Provider-supplied description.
        message: String,
    },

    /// A scratch buffer could not be allocated.
    #[error("out of memory during {operation} ({requested} bytes requested)")]
    ResourceExhaustion {
        /// Name of the operation that needed the buffer.
        operation: &'static str,
        /// Requested buffer size in bytes.
        requested: usize,
    },

    /// Key text could not be parsed back into a blob.
    #[error("invalid key text: {0}")]
    InvalidKeyText(String),

    /// Configuration is malformed or out of range.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error while reading configuration or key material.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SignerError {
    /// Wraps a provider error with the name of the failing operation.
    pub(crate) fn provider(operation: &'static str, err: ProviderError) -> Self {
        Self::ProviderFailure {
            operation,
            code: err.code,
            message: err.message,
        }
    }

    /// Returns the provider's native error code, if this is a provider failure.
    #[must_use]
    pub fn native_code(&self) -> Option<u32> {
        match self {
            Self::ProviderFailure { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result type for signer operations.
pub type SignerResult<T> = Result<T, SignerError>;
