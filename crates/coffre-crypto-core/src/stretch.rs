//! Passphrase key stretching and verification digests.
//!
//! The modern database format derives its master secret with an iterated
//! SHA-256 construction: `X0 = SHA256(passphrase ‖ salt)`, then
//! `Xi = SHA256(Xi-1)` for the configured number of iterations. What is
//! stored on disk to detect a wrong passphrase is the double hash
//! `SHA256(SHA256(X_n))`, never the stretched key itself.
//!
//! The legacy formats use a different, SHA-1/Blowfish-based verification
//! value kept here alongside for the same reason: these are the only
//! places in the workspace that decide "is this passphrase right".

use crate::cipher::{BlockCipher, LegacyCipher};
use crate::error::CryptoError;
use crate::memory::{Passphrase, SecretBytes};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// Smallest iteration count accepted when reading or writing.
pub const MIN_ITERATIONS: u32 = 2048;

/// Largest iteration count accepted. Guards against a corrupted or
/// hostile header turning open() into a denial of service.
pub const MAX_ITERATIONS: u32 = 1 << 22;

/// Length of the random stuff fed into the legacy verification value.
pub const LEGACY_STUFF_LEN: usize = 10;

/// Validate an iteration count against the enforced range.
///
/// # Errors
///
/// Returns `CryptoError::BadIterationCount` when out of range.
pub fn check_iterations(iterations: u32) -> Result<(), CryptoError> {
    if (MIN_ITERATIONS..=MAX_ITERATIONS).contains(&iterations) {
        Ok(())
    } else {
        Err(CryptoError::BadIterationCount {
            given: iterations,
            min: MIN_ITERATIONS,
            max: MAX_ITERATIONS,
        })
    }
}

/// Stretch a passphrase into a 32-byte key.
///
/// # Errors
///
/// Returns `CryptoError::BadIterationCount` if `iterations` is outside
/// the enforced range. The range is checked here, not just at the file
/// layer, so no caller can bypass it.
pub fn stretch(
    passphrase: &Passphrase,
    salt: &[u8; 32],
    iterations: u32,
) -> Result<SecretBytes<32>, CryptoError> {
    check_iterations(iterations)?;
    let mut hasher = Sha256::new();
    hasher.update(passphrase.expose());
    hasher.update(salt);
    let mut x: [u8; 32] = hasher.finalize().into();
    for _ in 0..iterations {
        x = Sha256::digest(x).into();
    }
    let key = SecretBytes::new(x);
    x.zeroize();
    Ok(key)
}

/// Compute the stored verification digest for a stretched key.
///
/// The double hash makes the on-disk value useless for key recovery.
#[must_use]
pub fn verifier(key: &SecretBytes<32>) -> [u8; 32] {
    Sha256::digest(Sha256::digest(key.expose())).into()
}

/// Constant-time comparison of two verification digests.
#[must_use]
pub fn verifier_matches(expected: &[u8; 32], candidate: &[u8; 32]) -> bool {
    expected.ct_eq(candidate).into()
}

// ---------------------------------------------------------------------------
// Legacy verification value
// ---------------------------------------------------------------------------

/// Compute the legacy 20-byte passphrase verification value.
///
/// `randstuff` is 8 random bytes padded with two zero bytes. The value is
/// `SHA1(randstuff ‖ passphrase ‖ C)` where `C` is the first 8 bytes of
/// `randstuff` encrypted 1000 times under Blowfish keyed with
/// `SHA1(randstuff ‖ passphrase)`.
///
/// # Errors
///
/// Returns `CryptoError::InvalidKeyMaterial` if cipher construction fails
/// (cannot happen for a 20-byte SHA-1 digest key, kept for uniformity).
pub fn legacy_randhash(
    passphrase: &Passphrase,
    randstuff: &[u8; LEGACY_STUFF_LEN],
) -> Result<[u8; 20], CryptoError> {
    let mut key_hash = Sha1::new();
    key_hash.update(randstuff);
    key_hash.update(passphrase.expose());
    let mut cipher_key: [u8; 20] = key_hash.finalize().into();
    let cipher = LegacyCipher::new(&cipher_key)?;
    cipher_key.zeroize();

    let mut block = [0u8; 8];
    block.copy_from_slice(&randstuff[..8]);
    for _ in 0..1000 {
        cipher.encrypt_block(&mut block);
    }

    let mut out_hash = Sha1::new();
    out_hash.update(randstuff);
    out_hash.update(passphrase.expose());
    out_hash.update(block);
    block.zeroize();
    Ok(out_hash.finalize().into())
}

/// Constant-time comparison of legacy verification values.
#[must_use]
pub fn randhash_matches(expected: &[u8; 20], candidate: &[u8; 20]) -> bool {
    expected.ct_eq(candidate).into()
}

/// Derive the legacy bulk-encryption key: `SHA1(passphrase ‖ salt)`.
#[must_use]
pub fn legacy_session_key(passphrase: &Passphrase, salt: &[u8]) -> SecretBytes<20> {
    let mut hasher = Sha1::new();
    hasher.update(passphrase.expose());
    hasher.update(salt);
    let mut digest: [u8; 20] = hasher.finalize().into();
    let key = SecretBytes::new(digest);
    digest.zeroize();
    key
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
