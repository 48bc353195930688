//! The modern (version 3) database file.
//!
//! On-disk layout:
//!
//! ```text
//! "PWS3"                         4   format tag
//! salt                          32   random, hashed before storage
//! iterations                     4   little-endian
//! SHA256(SHA256(P'))            32   passphrase verification value
//! wrapped content key           32   two Twofish-ECB blocks under P'
//! wrapped MAC key               32   two Twofish-ECB blocks under P'
//! IV                            16
//! header fields, record fields       CBC TLV stream
//! "PWS3-EOFPWS3-EOF"            16   plaintext sentinel
//! HMAC-SHA256                   32   over all field plaintext, in order
//! ```
//!
//! `P'` is the stretched passphrase. The content key and MAC key are
//! fresh random values each time the file is written, so neither bulk
//! key ever repeats across saves and neither derives from the other.

use crate::cbc::{CbcCodec, FieldRead};
use crate::error::StoreError;
use crate::header::{self, Header};
use crate::ident;
use crate::record::{self, Entry, MAX_RECORD_FIELDS};
use coffre_crypto_core::{
    check_iterations, stretch, trash, verifier, verifier_matches, ModernCipher, Passphrase,
    RandomSource, SecretBytes, StreamMac, MIN_ITERATIONS,
};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;
use uuid::Uuid;

/// First four bytes of every version-3 file.
pub const FORMAT_TAG: [u8; 4] = *b"PWS3";

/// Iteration count used when the caller has no opinion.
pub const DEFAULT_ITERATIONS: u32 = MIN_ITERATIONS;

/// Plaintext sentinel separating field data from the trailer digest.
const TERMINAL: [u8; 16] = *b"PWS3-EOFPWS3-EOF";

/// Seek offset from the end of the file to the sentinel: sentinel plus
/// trailer digest.
const TRAILER_SEEK: i64 = -48;

/// Fixed prelude and trailer plus the two mandatory header fields
/// (version and end-of-header): nothing valid can be shorter.
const MIN_FILE_LEN: u64 = 232;

enum Io {
    Reading(BufReader<File>),
    Writing(BufWriter<File>),
}

/// An open version-3 database file, reading or writing.
pub struct V3File {
    path: PathBuf,
    io: Option<Io>,
    codec: CbcCodec<ModernCipher>,
    mac: Option<StreamMac>,
    header: Header,
    file_len: u64,
    reached_terminal: bool,
    rng: RandomSource,
}

impl V3File {
    /// Create a fresh database at `path`, truncating anything there.
    ///
    /// The supplied header's last-saved fields are overwritten with the
    /// current time and local identity before writing. The file stays
    /// open for [`write_record`](Self::write_record) calls until
    /// [`close`](Self::close) seals it with the sentinel and digest.
    ///
    /// # Errors
    ///
    /// `Crypto(BadIterationCount)` when `iterations` is out of range —
    /// a caller asking for fewer rounds than the floor is refused, not
    /// silently upgraded. `CantOpen`/`WriteFailure` on I/O problems.
    pub fn create(
        path: &Path,
        passphrase: &Passphrase,
        iterations: u32,
        header: Header,
        mut rng: RandomSource,
    ) -> Result<Self, StoreError> {
        check_iterations(iterations)?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| StoreError::CantOpen {
                path: path.to_owned(),
                source: e,
            })?;
        let mut w = BufWriter::new(file);

        w.write_all(&FORMAT_TAG).map_err(write_err)?;
        let salt = rng.hashed_block()?;
        w.write_all(&salt).map_err(write_err)?;
        w.write_all(&iterations.to_le_bytes()).map_err(write_err)?;
        let ptag = stretch(passphrase, &salt, iterations)?;
        w.write_all(&verifier(&ptag)).map_err(write_err)?;

        let wrapper = ModernCipher::new(ptag.expose())?;
        let content_key = SecretBytes::<32>::random(&mut rng)?;
        let mac_key = SecretBytes::<32>::random(&mut rng)?;
        for key in [&content_key, &mac_key] {
            let mut wrapped = *key.expose();
            wrapper.wrap_key_blocks(&mut wrapped);
            w.write_all(&wrapped).map_err(write_err)?;
            trash(&mut wrapped);
        }

        let iv_block = rng.hashed_block()?;
        let iv = &iv_block[..16];
        w.write_all(iv).map_err(write_err)?;

        let codec = CbcCodec::new(ModernCipher::new(content_key.expose())?, iv);
        let mac = StreamMac::new(mac_key.expose());

        let mut this = Self {
            path: path.to_owned(),
            io: Some(Io::Writing(w)),
            codec,
            mac: Some(mac),
            header: stamped(header, iterations),
            file_len: 0,
            reached_terminal: false,
            rng,
        };
        this.write_header()?;
        debug!(path = %this.path.display(), iterations, "database created");
        Ok(this)
    }

    /// Open an existing database for reading and consume its header.
    ///
    /// # Errors
    ///
    /// `NotThisFormat` when the tag is absent, `Corrupt` for structural
    /// damage visible up front, `WrongPassphrase` when the verification
    /// value does not match.
    pub fn open(path: &Path, passphrase: &Passphrase) -> Result<Self, StoreError> {
        let mut file = File::open(path).map_err(|e| StoreError::CantOpen {
            path: path.to_owned(),
            source: e,
        })?;
        let file_len = sanity_check(&mut file)?;
        let mut r = BufReader::new(file);

        let (ptag, iterations) = unlock_prelude(&mut r, passphrase)?;
        let wrapper = ModernCipher::new(ptag.expose())?;
        let content_key = unwrap_key(&mut r, &wrapper)?;
        let mac_key = unwrap_key(&mut r, &wrapper)?;
        let mut iv = [0u8; 16];
        r.read_exact(&mut iv)?;

        let codec = CbcCodec::new(ModernCipher::new(content_key.expose())?, &iv);
        let mac = StreamMac::new(mac_key.expose());

        let mut this = Self {
            path: path.to_owned(),
            io: Some(Io::Reading(r)),
            codec,
            mac: Some(mac),
            header: Header::default(),
            file_len,
            reached_terminal: false,
            rng: RandomSource::new(),
        };
        this.read_header()?;
        this.header.iterations = iterations;
        debug!(path = %this.path.display(), iterations, "database opened");
        Ok(this)
    }

    /// Verify a passphrase against the file without reading any data.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open), minus anything related to the
    /// field stream.
    pub fn check_passphrase(path: &Path, passphrase: &Passphrase) -> Result<(), StoreError> {
        let mut file = File::open(path).map_err(|e| StoreError::CantOpen {
            path: path.to_owned(),
            source: e,
        })?;
        sanity_check(&mut file)?;
        let mut r = BufReader::new(file);
        unlock_prelude(&mut r, passphrase).map(|_| ())
    }

    /// The header read at open time, or the header being written.
    #[must_use]
    pub const fn header(&self) -> &Header {
        &self.header
    }

    /// Path this file was opened at.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry to a file opened for writing.
    ///
    /// # Errors
    ///
    /// `WriteFailure` when the file is closed or open for reading, or
    /// on any I/O failure underneath.
    pub fn write_record(&mut self, entry: &Entry) -> Result<(), StoreError> {
        entry.visit_fields(&mut |ftype, data| self.write_field(ftype, data))?;
        self.write_field(record::tag::END, b"")
    }

    /// Read the next entry from a file opened for reading.
    ///
    /// Returns `Ok(None)` once the data stream is exhausted. A record
    /// cut short by the sentinel is returned as-is; the digest check at
    /// close has the final word on whether the file is intact.
    ///
    /// # Errors
    ///
    /// `Corrupt` when a field length fails the bound check or a record
    /// never ends within the field cap.
    pub fn read_record(&mut self) -> Result<Option<Entry>, StoreError> {
        if self.reached_terminal || !matches!(self.io, Some(Io::Reading(_))) {
            return Ok(None);
        }
        let mut entry = Entry::default();
        let mut any = false;
        for _ in 0..MAX_RECORD_FIELDS {
            match self.next_field()? {
                FieldRead::Field(f) if f.ftype == record::tag::END => return Ok(Some(entry)),
                FieldRead::Field(f) => {
                    entry.apply_field(f)?;
                    any = true;
                }
                FieldRead::Terminal => {
                    self.reached_terminal = true;
                    return Ok(any.then_some(entry));
                }
                FieldRead::EndOfStream => return Ok(any.then_some(entry)),
            }
        }
        Err(StoreError::Corrupt("too many fields in one record".into()))
    }

    /// Seal (write mode) or authenticate (read mode) and close the file.
    ///
    /// Reading: any fields not yet consumed are drained first, so the
    /// digest always covers the whole stream, then the stored digest is
    /// checked. Idempotent — a second call is a no-op.
    ///
    /// # Errors
    ///
    /// `Corrupt` when the stored digest does not match (any ciphertext
    /// byte flip ends up here), `WriteFailure` when the trailer cannot
    /// be flushed.
    pub fn close(&mut self) -> Result<(), StoreError> {
        match self.io.take() {
            None => Ok(()),
            Some(Io::Writing(mut w)) => {
                w.write_all(&TERMINAL).map_err(write_err)?;
                if let Some(mac) = self.mac.take() {
                    w.write_all(&mac.finalize()).map_err(write_err)?;
                }
                w.flush().map_err(write_err)?;
                debug!(path = %self.path.display(), "database sealed");
                Ok(())
            }
            Some(Io::Reading(mut r)) => {
                while !self.reached_terminal {
                    match self
                        .codec
                        .read_field(&mut r, Some(&TERMINAL), self.file_len)?
                    {
                        FieldRead::Field(f) => {
                            if let Some(mac) = self.mac.as_mut() {
                                mac.update(&f.data);
                            }
                        }
                        FieldRead::Terminal => self.reached_terminal = true,
                        FieldRead::EndOfStream => {
                            return Err(StoreError::Corrupt(
                                "end-of-data marker missing".into(),
                            ))
                        }
                    }
                }
                let mut stored = [0u8; 32];
                r.read_exact(&mut stored)
                    .map_err(|_| StoreError::Corrupt("authentication trailer missing".into()))?;
                let verified = self.mac.take().is_some_and(|mac| mac.verify(&stored));
                if verified {
                    Ok(())
                } else {
                    Err(StoreError::Corrupt(
                        "authentication digest mismatch".into(),
                    ))
                }
            }
        }
    }

    fn write_header(&mut self) -> Result<(), StoreError> {
        let header = self.header.clone();
        header.visit_fields(&mut |ftype, data| self.write_field(ftype, data))?;
        self.write_field(header::tag::END, b"")
    }

    fn read_header(&mut self) -> Result<(), StoreError> {
        for _ in 0..MAX_RECORD_FIELDS {
            match self.next_field()? {
                FieldRead::Field(f) if f.ftype == header::tag::END => return Ok(()),
                FieldRead::Field(f) => self.header.apply_field(f)?,
                FieldRead::Terminal => {
                    self.reached_terminal = true;
                    return Ok(());
                }
                FieldRead::EndOfStream => {
                    return Err(StoreError::Corrupt("truncated header".into()))
                }
            }
        }
        Err(StoreError::Corrupt("too many header fields".into()))
    }

    fn write_field(&mut self, ftype: u8, data: &[u8]) -> Result<(), StoreError> {
        let Some(Io::Writing(w)) = self.io.as_mut() else {
            return Err(StoreError::WriteFailure(
                "file is not open for writing".into(),
            ));
        };
        if let Some(mac) = self.mac.as_mut() {
            mac.update(data);
        }
        self.codec.write_field(w, &mut self.rng, ftype, data)?;
        Ok(())
    }

    fn next_field(&mut self) -> Result<FieldRead, StoreError> {
        let Some(Io::Reading(r)) = self.io.as_mut() else {
            return Ok(FieldRead::EndOfStream);
        };
        let read = self
            .codec
            .read_field(r, Some(&TERMINAL), self.file_len)?;
        if let FieldRead::Field(f) = &read {
            if let Some(mac) = self.mac.as_mut() {
                mac.update(&f.data);
            }
        }
        Ok(read)
    }
}

impl fmt::Debug for V3File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.io {
            Some(Io::Reading(_)) => "reading",
            Some(Io::Writing(_)) => "writing",
            None => "closed",
        };
        f.debug_struct("V3File")
            .field("path", &self.path)
            .field("mode", &mode)
            .finish_non_exhaustive()
    }
}

impl Drop for V3File {
    fn drop(&mut self) {
        // A file dropped while writing still gets its trailer; errors
        // here have nowhere to go.
        let _ = self.close();
    }
}

/// Format tag, then structural checks that need the whole file: minimum
/// length and the sentinel sitting where the trailer says it should.
/// Leaves the cursor just past the tag.
fn sanity_check(file: &mut File) -> Result<u64, StoreError> {
    let mut tag = [0u8; 4];
    file.read_exact(&mut tag)
        .map_err(|_| StoreError::NotThisFormat)?;
    if tag != FORMAT_TAG {
        return Err(StoreError::NotThisFormat);
    }
    let file_len = file.metadata()?.len();
    if file_len < MIN_FILE_LEN {
        return Err(StoreError::Corrupt("file too short".into()));
    }
    file.seek(SeekFrom::End(TRAILER_SEEK))?;
    let mut sentinel = [0u8; 16];
    file.read_exact(&mut sentinel)?;
    if sentinel != TERMINAL {
        return Err(StoreError::Corrupt("end-of-data marker missing".into()));
    }
    file.seek(SeekFrom::Start(4))?;
    Ok(file_len)
}

/// Salt, iteration count, and verification value; the cursor must sit
/// just past the format tag.
fn unlock_prelude<R: Read>(
    r: &mut R,
    passphrase: &Passphrase,
) -> Result<(SecretBytes<32>, u32), StoreError> {
    let mut salt = [0u8; 32];
    r.read_exact(&mut salt)?;
    let mut iter_bytes = [0u8; 4];
    r.read_exact(&mut iter_bytes)?;
    let iterations = u32::from_le_bytes(iter_bytes);
    check_iterations(iterations)
        .map_err(|_| StoreError::Corrupt("iteration count out of range".into()))?;
    let ptag = stretch(passphrase, &salt, iterations)?;
    let mut stored = [0u8; 32];
    r.read_exact(&mut stored)?;
    if !verifier_matches(&stored, &verifier(&ptag)) {
        return Err(StoreError::WrongPassphrase);
    }
    Ok((ptag, iterations))
}

fn unwrap_key<R: Read>(r: &mut R, wrapper: &ModernCipher) -> Result<SecretBytes<32>, StoreError> {
    let mut blocks = [0u8; 32];
    r.read_exact(&mut blocks)?;
    wrapper.unwrap_key_blocks(&mut blocks);
    let key = SecretBytes::new(blocks);
    trash(&mut blocks);
    Ok(key)
}

/// Fill in the bookkeeping fields the writer owns.
fn stamped(mut header: Header, iterations: u32) -> Header {
    header.iterations = iterations;
    header.when_last_saved = unix_now();
    header.last_saved_by = ident::username();
    header.last_saved_on = ident::hostname();
    if header.last_saved_what.is_empty() {
        header.last_saved_what = env!("CARGO_PKG_NAME").to_owned();
    }
    if header.file_uuid.is_none() {
        header.file_uuid = Some(Uuid::new_v4());
    }
    header
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX))
}

fn write_err(e: std::io::Error) -> StoreError {
    StoreError::WriteFailure(e.to_string())
}

// ---------------------------------------------------------------------------
// Unit tests — full write/read cycles live in tests/roundtrip.rs
// ---------------------------------------------------------------------------
