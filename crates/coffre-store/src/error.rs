//! Storage-layer error types.

use coffre_crypto_core::CryptoError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced when opening, reading, or writing a database file.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The file could not be opened at all (missing, permissions).
    #[error("cannot open {path}: {source}")]
    CantOpen {
        /// Path that failed to open.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The file exists but does not carry this database format.
    #[error("not a recognized database file")]
    NotThisFormat,

    /// The passphrase does not match the file's verification value.
    #[error("wrong passphrase")]
    WrongPassphrase,

    /// The format version is newer than this build understands.
    #[error("unsupported format version {major}.{minor}")]
    UnsupportedVersion {
        /// Major version read from the file.
        major: u8,
        /// Minor version read from the file.
        minor: u8,
    },

    /// The file is structurally damaged or failed authentication.
    #[error("database file is corrupt: {0}")]
    Corrupt(String),

    /// A write could not be completed (disk full, trailer flush).
    #[error("write failure: {0}")]
    WriteFailure(String),

    /// Another process holds the lock on this database.
    #[error("database is locked by {holder}")]
    LockConflict {
        /// `user@host:pid` read from the lock file.
        holder: String,
    },

    /// Underlying I/O error outside the categories above.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Error bubbled up from the cryptographic layer.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
