//! Streaming authentication of database plaintext.
//!
//! The modern database format closes with an HMAC-SHA-256 over the
//! plaintext data of every field written, in order. [`StreamMac`] is fed
//! incrementally as fields stream through the codec and consumed once at
//! close, either to emit the trailer digest (write) or to verify it
//! (read).

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Incremental HMAC-SHA-256 over field plaintext.
pub struct StreamMac {
    inner: HmacSha256,
}

impl StreamMac {
    /// Start a MAC with the given key.
    #[must_use]
    pub fn new(key: &[u8]) -> Self {
        // HMAC accepts keys of any length.
        let inner = HmacSha256::new_from_slice(key)
            .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
        Self { inner }
    }

    /// Absorb field plaintext.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finish and return the 32-byte digest.
    #[must_use]
    pub fn finalize(self) -> [u8; 32] {
        self.inner.finalize().into_bytes().into()
    }

    /// Finish and compare against an expected digest in constant time.
    #[must_use]
    pub fn verify(self, expected: &[u8; 32]) -> bool {
        self.inner.verify_slice(expected).is_ok()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
