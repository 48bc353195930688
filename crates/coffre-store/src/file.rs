//! Version dispatch: one door into the three on-disk formats.

use crate::error::StoreError;
use crate::header::Header;
use crate::record::Entry;
use crate::v2::{LegacyVersion, V2File};
use crate::v3::{V3File, DEFAULT_ITERATIONS, FORMAT_TAG};
use coffre_crypto_core::{Passphrase, RandomSource};
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// On-disk format generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    /// Original positional-field format.
    V1,
    /// Tagged fields behind a sentinel record.
    V2,
    /// Authenticated Twofish format.
    V3,
}

/// Whether a file is being opened to read or to (re)write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Read existing data.
    Read,
    /// Write the file from scratch.
    Write,
}

/// What every format generation can do once open.
pub trait DbFile {
    /// File-level metadata.
    fn header(&self) -> &Header;

    /// Append one entry (write mode).
    ///
    /// # Errors
    ///
    /// `WriteFailure` in read mode or on I/O problems underneath.
    fn write_record(&mut self, entry: &Entry) -> Result<(), StoreError>;

    /// Read the next entry, `Ok(None)` at the end (read mode).
    ///
    /// # Errors
    ///
    /// `Corrupt` on structural damage.
    fn read_record(&mut self) -> Result<Option<Entry>, StoreError>;

    /// Seal or authenticate and close. Idempotent.
    ///
    /// # Errors
    ///
    /// `Corrupt` when read-side authentication fails, `WriteFailure`
    /// when the trailer cannot be flushed.
    fn close(&mut self) -> Result<(), StoreError>;
}

impl DbFile for V3File {
    fn header(&self) -> &Header {
        Self::header(self)
    }
    fn write_record(&mut self, entry: &Entry) -> Result<(), StoreError> {
        Self::write_record(self, entry)
    }
    fn read_record(&mut self) -> Result<Option<Entry>, StoreError> {
        Self::read_record(self)
    }
    fn close(&mut self) -> Result<(), StoreError> {
        Self::close(self)
    }
}

impl DbFile for V2File {
    fn header(&self) -> &Header {
        Self::header(self)
    }
    fn write_record(&mut self, entry: &Entry) -> Result<(), StoreError> {
        Self::write_record(self, entry)
    }
    fn read_record(&mut self) -> Result<Option<Entry>, StoreError> {
        Self::read_record(self)
    }
    fn close(&mut self) -> Result<(), StoreError> {
        Self::close(self)
    }
}

/// Open `path` in the given mode and format generation.
///
/// Writing uses defaults (an empty header, the default iteration count);
/// callers who need control over those use the concrete types directly.
///
/// # Errors
///
/// Everything the concrete constructors can return.
pub fn open(
    path: &Path,
    passphrase: &Passphrase,
    mode: Mode,
    version: Version,
) -> Result<Box<dyn DbFile>, StoreError> {
    let rng = RandomSource::new();
    Ok(match (mode, version) {
        (Mode::Write, Version::V3) => Box::new(V3File::create(
            path,
            passphrase,
            DEFAULT_ITERATIONS,
            Header::default(),
            rng,
        )?),
        (Mode::Write, Version::V2) => Box::new(V2File::create(
            path,
            passphrase,
            LegacyVersion::V2,
            Header::default(),
            rng,
        )?),
        (Mode::Write, Version::V1) => Box::new(V2File::create(
            path,
            passphrase,
            LegacyVersion::V1,
            Header::default(),
            rng,
        )?),
        (Mode::Read, Version::V3) => Box::new(V3File::open(path, passphrase)?),
        (Mode::Read, Version::V2) => Box::new(V2File::open(path, passphrase, LegacyVersion::V2)?),
        (Mode::Read, Version::V1) => Box::new(V2File::open(path, passphrase, LegacyVersion::V1)?),
    })
}

/// Sniff the format generation from the file's first bytes.
///
/// The legacy generations share a prelude, so anything without the
/// modern tag reports as [`Version::V2`]; only a passphrase check can
/// tell the legacy flavors apart.
///
/// # Errors
///
/// `CantOpen` when the file cannot be read at all.
pub fn read_version(path: &Path) -> Result<Version, StoreError> {
    let mut file = File::open(path).map_err(|e| StoreError::CantOpen {
        path: path.to_owned(),
        source: e,
    })?;
    let mut tag = [0u8; 4];
    match file.read_exact(&mut tag) {
        Ok(()) if tag == FORMAT_TAG => Ok(Version::V3),
        Ok(()) => Ok(Version::V2),
        Err(_) => Err(StoreError::NotThisFormat),
    }
}

/// Try the passphrase against whichever format the file carries.
///
/// # Errors
///
/// `WrongPassphrase` when no generation accepts it; `NotThisFormat`
/// when the file is no database at all.
pub fn check_passphrase(path: &Path, passphrase: &Passphrase) -> Result<Version, StoreError> {
    match V3File::check_passphrase(path, passphrase) {
        Ok(()) => Ok(Version::V3),
        Err(StoreError::NotThisFormat) => {
            V2File::check_passphrase(path, passphrase)?;
            Ok(Version::V2)
        }
        Err(e) => Err(e),
    }
}

/// Atomically move a database file, as used by save-then-swap writers.
///
/// # Errors
///
/// `Io` when the underlying rename fails.
pub fn rename_file(from: &Path, to: &Path) -> Result<(), StoreError> {
    fs::rename(from, to)?;
    debug!(from = %from.display(), to = %to.display(), "database renamed");
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
