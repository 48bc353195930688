//! Secure memory types for passphrases and key material.
//!
//! Wrappers in this module:
//! - Zero memory on drop via [`zeroize`]
//! - Mask output in `Debug`/`Display` to prevent accidental leakage

use crate::error::CryptoError;
use crate::random::RandomSource;
use secrecy::{ExposeSecret, SecretSlice};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

// ---------------------------------------------------------------------------
// Passphrase — variable-length
// ---------------------------------------------------------------------------

/// A user passphrase held in zeroizing memory.
///
/// Wraps [`SecretSlice<u8>`] from the `secrecy` crate. The passphrase is
/// stored as raw bytes; callers decide the text encoding before handing
/// it over (UTF-8 everywhere in this workspace).
pub struct Passphrase {
    inner: SecretSlice<u8>,
}

impl Passphrase {
    /// Take ownership of passphrase bytes.
    ///
    /// The source vector is moved into zeroizing storage, so no plaintext
    /// copy remains with the caller.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            inner: bytes.into(),
        }
    }

    /// Expose the underlying bytes. Use sparingly — only to feed a
    /// cryptographic operation, never to store elsewhere.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        self.inner.expose_secret()
    }

    /// Returns `true` if the passphrase is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.expose_secret().is_empty()
    }
}

impl From<&str> for Passphrase {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes().to_vec())
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(***)")
    }
}

impl fmt::Display for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(***)")
    }
}

// ---------------------------------------------------------------------------
// SecretBytes<N> — fixed-size
// ---------------------------------------------------------------------------

/// Fixed-size buffer for keys and other fixed-length secrets.
///
/// Derives `Zeroize` + `ZeroizeOnDrop` so the bytes are securely
/// erased when the value goes out of scope.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> SecretBytes<N> {
    /// Create a new `SecretBytes` from a fixed-size array.
    ///
    /// Arrays are `Copy`; the caller should zeroize its own copy after
    /// handing one over.
    #[must_use]
    pub const fn new(data: [u8; N]) -> Self {
        Self { bytes: data }
    }

    /// Create `SecretBytes` filled with cryptographically random bytes.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Random` if the CSPRNG fails.
    pub fn random(rng: &mut RandomSource) -> Result<Self, CryptoError> {
        let mut bytes = [0u8; N];
        rng.fill(&mut bytes)?;
        let secret = Self::new(bytes);
        bytes.zeroize();
        Ok(secret)
    }

    /// Expose the underlying bytes for cryptographic operations.
    #[must_use]
    pub const fn expose(&self) -> &[u8; N] {
        &self.bytes
    }
}

impl<const N: usize> fmt::Debug for SecretBytes<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes<{N}>(***)")
    }
}

impl<const N: usize> fmt::Display for SecretBytes<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes<{N}>(***)")
    }
}

impl<const N: usize> From<[u8; N]> for SecretBytes<N> {
    fn from(data: [u8; N]) -> Self {
        Self::new(data)
    }
}

// ---------------------------------------------------------------------------
// Scratch-buffer hygiene
// ---------------------------------------------------------------------------

/// Overwrite a scratch buffer that touched plaintext or key material.
///
/// Thin wrapper over [`Zeroize::zeroize`] for call sites that work with
/// plain `[u8]` scratch space rather than the wrapper types above.
pub fn trash(buf: &mut [u8]) {
    buf.zeroize();
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
