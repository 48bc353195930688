//! Block-cipher abstraction over the two on-disk cipher generations.
//!
//! The legacy database formats encrypt with Blowfish (8-byte blocks); the
//! modern format uses Twofish (16-byte blocks). Both are exposed through
//! the object-safe [`BlockCipher`] trait so the CBC field codec can be
//! written once, generic over the block size.

use crate::error::CryptoError;
use blowfish::Blowfish;
use cipher::{Block, BlockDecrypt, BlockEncrypt, KeyInit};
use twofish::Twofish;

/// Block size of the legacy (Blowfish) cipher, in bytes.
pub const LEGACY_BLOCK_SIZE: usize = 8;

/// Block size of the modern (Twofish) cipher, in bytes.
pub const MODERN_BLOCK_SIZE: usize = 16;

/// Key length required by the modern cipher, in bytes.
pub const MODERN_KEY_LEN: usize = 32;

/// A keyed block cipher operating on exactly one block at a time.
///
/// Callers must pass slices of exactly [`block_size`](Self::block_size)
/// bytes; these methods are the innermost hot path of the field codec and
/// assume their caller already sliced correctly.
pub trait BlockCipher {
    /// Cipher block size in bytes.
    fn block_size(&self) -> usize;

    /// Encrypt one block in place.
    fn encrypt_block(&self, block: &mut [u8]);

    /// Decrypt one block in place.
    fn decrypt_block(&self, block: &mut [u8]);
}

// ---------------------------------------------------------------------------
// Legacy cipher — Blowfish
// ---------------------------------------------------------------------------

/// Blowfish keyed for the legacy database formats.
pub struct LegacyCipher {
    inner: Blowfish,
}

impl LegacyCipher {
    /// Key the cipher with `key` (4 to 56 bytes).
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKeyMaterial` if the key length is
    /// outside the range Blowfish accepts.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let inner = Blowfish::new_from_slice(key).map_err(|_| {
            CryptoError::InvalidKeyMaterial(format!(
                "Blowfish key must be 4..=56 bytes, got {}",
                key.len()
            ))
        })?;
        Ok(Self { inner })
    }
}

impl BlockCipher for LegacyCipher {
    fn block_size(&self) -> usize {
        LEGACY_BLOCK_SIZE
    }

    fn encrypt_block(&self, block: &mut [u8]) {
        debug_assert_eq!(block.len(), LEGACY_BLOCK_SIZE);
        self.inner
            .encrypt_block(Block::<Blowfish>::from_mut_slice(block));
    }

    fn decrypt_block(&self, block: &mut [u8]) {
        debug_assert_eq!(block.len(), LEGACY_BLOCK_SIZE);
        self.inner
            .decrypt_block(Block::<Blowfish>::from_mut_slice(block));
    }
}

// ---------------------------------------------------------------------------
// Modern cipher — Twofish
// ---------------------------------------------------------------------------

/// Twofish-256 keyed for the modern database format.
///
/// Besides CBC duty this cipher doubles as the key-wrapping primitive:
/// the file's content and authentication keys are stored as two raw ECB
/// blocks each, encrypted under the stretched passphrase.
pub struct ModernCipher {
    inner: Twofish,
}

impl ModernCipher {
    /// Key the cipher with a 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKeyMaterial` if `key` is not exactly
    /// 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != MODERN_KEY_LEN {
            return Err(CryptoError::InvalidKeyMaterial(format!(
                "Twofish key must be {MODERN_KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        let inner = Twofish::new_from_slice(key)
            .map_err(|_| CryptoError::InvalidKeyMaterial("Twofish key rejected".into()))?;
        Ok(Self { inner })
    }

    /// Encrypt two consecutive 16-byte blocks in raw ECB mode.
    ///
    /// Used only to wrap a 32-byte key for storage inside the file
    /// header; never for bulk data.
    pub fn wrap_key_blocks(&self, blocks: &mut [u8; 32]) {
        let (lo, hi) = blocks.split_at_mut(MODERN_BLOCK_SIZE);
        self.encrypt_block(lo);
        self.encrypt_block(hi);
    }

    /// Decrypt two consecutive 16-byte blocks in raw ECB mode.
    pub fn unwrap_key_blocks(&self, blocks: &mut [u8; 32]) {
        let (lo, hi) = blocks.split_at_mut(MODERN_BLOCK_SIZE);
        self.decrypt_block(lo);
        self.decrypt_block(hi);
    }
}

impl BlockCipher for ModernCipher {
    fn block_size(&self) -> usize {
        MODERN_BLOCK_SIZE
    }

    fn encrypt_block(&self, block: &mut [u8]) {
        debug_assert_eq!(block.len(), MODERN_BLOCK_SIZE);
        self.inner
            .encrypt_block(Block::<Twofish>::from_mut_slice(block));
    }

    fn decrypt_block(&self, block: &mut [u8]) {
        debug_assert_eq!(block.len(), MODERN_BLOCK_SIZE);
        self.inner
            .decrypt_block(Block::<Twofish>::from_mut_slice(block));
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
