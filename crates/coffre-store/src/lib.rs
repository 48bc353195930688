//! `coffre-store` — the encrypted password-database file engine.
//!
//! Reads and writes all three on-disk format generations: the modern
//! Twofish format with an authenticated trailer ([`v3`]), and the
//! Blowfish legacy formats ([`v2`]). Entries and headers are field
//! collections ([`record`], [`header`]) serialized through a CBC
//! type-length-value codec ([`cbc`]); concurrent access is fenced by
//! sidecar lock files ([`lock`]).
//!
//! All cryptography comes from [`coffre_crypto_core`]; this crate owns
//! the file formats and nothing else.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod cbc;
pub mod error;
pub mod field;
pub mod file;
pub mod header;
pub mod ident;
pub mod lock;
pub mod record;
pub mod v2;
pub mod v3;

pub use error::StoreError;
pub use field::RawField;
pub use file::{check_passphrase, open, read_version, rename_file, DbFile, Mode, Version};
pub use header::Header;
pub use lock::{is_locked, FileLock};
pub use record::{Entry, MAX_RECORD_FIELDS};
pub use v2::{LegacyVersion, V2File};
pub use v3::{V3File, DEFAULT_ITERATIONS};
