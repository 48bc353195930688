//! `coffre-crypto-core` — Pure cryptographic primitives for Coffre.
//!
//! This crate is the audit target: zero I/O, zero async, zero file-format
//! knowledge. It provides the block ciphers, key stretching, streaming
//! MAC, secure memory wrappers, and randomness handle that the storage
//! layer composes into the on-disk database formats.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod cipher;
pub mod error;
pub mod mac;
pub mod memory;
pub mod random;
pub mod stretch;

pub use cipher::{
    BlockCipher, LegacyCipher, ModernCipher, LEGACY_BLOCK_SIZE, MODERN_BLOCK_SIZE, MODERN_KEY_LEN,
};
pub use error::CryptoError;
pub use mac::StreamMac;
pub use memory::{trash, Passphrase, SecretBytes};
pub use random::RandomSource;
pub use stretch::{
    check_iterations, legacy_randhash, legacy_session_key, randhash_matches, stretch, verifier,
    verifier_matches, LEGACY_STUFF_LEN, MAX_ITERATIONS, MIN_ITERATIONS,
};
