//! Cryptographically secure random byte generation.
//!
//! [`RandomSource`] is a deliberately explicit handle over the operating
//! system CSPRNG. Callers construct one and pass it by reference wherever
//! random bytes are needed, so the flow of randomness through the code is
//! visible at every call site rather than hidden behind a global.

use crate::error::CryptoError;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

/// Handle over the OS CSPRNG.
#[derive(Debug, Default)]
pub struct RandomSource {
    rng: OsRng,
}

impl RandomSource {
    /// Create a new random source.
    #[must_use]
    pub const fn new() -> Self {
        Self { rng: OsRng }
    }

    /// Fill `buf` with random bytes.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Random` if the CSPRNG fails.
    pub fn fill(&mut self, buf: &mut [u8]) -> Result<(), CryptoError> {
        self.rng
            .try_fill_bytes(buf)
            .map_err(|e| CryptoError::Random(format!("CSPRNG fill failed: {e}")))
    }

    /// Produce 32 bytes by hashing 32 fresh random bytes with SHA-256.
    ///
    /// Public file fields that are random but not secret (salts, IVs) go
    /// through this so that raw CSPRNG output is never written to disk.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Random` if the CSPRNG fails.
    pub fn hashed_block(&mut self) -> Result<[u8; 32], CryptoError> {
        let mut raw = [0u8; 32];
        self.fill(&mut raw)?;
        let digest: [u8; 32] = Sha256::digest(raw).into();
        raw.zeroize();
        Ok(digest)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
