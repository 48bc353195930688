//! Cryptographic error types for `coffre-crypto-core`.

use thiserror::Error;

/// Errors produced by cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Invalid key material (wrong length, corrupted bytes).
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// Key-stretching iteration count outside the enforced range.
    #[error("iteration count {given} outside allowed range ({min}..={max})")]
    BadIterationCount {
        /// Count requested by the caller or read from a file header.
        given: u32,
        /// Smallest count accepted.
        min: u32,
        /// Largest count accepted.
        max: u32,
    },

    /// The operating-system CSPRNG failed.
    #[error("random source error: {0}")]
    Random(String),
}
