//! The legacy (version 1 and 2) database files.
//!
//! On-disk layout:
//!
//! ```text
//! randstuff    8   random bytes (hashed together with two zero pad bytes)
//! randhash    20   passphrase verification value
//! salt        20   random, stored raw
//! IV           8
//! [v2 only]        sentinel record carrying the version string and prefs
//! records...       CBC TLV stream, Blowfish, 8-byte blocks
//! ```
//!
//! There is no trailer and no authentication; the stream simply ends.
//! Version 1 records are three positional fields (name, password,
//! notes), with title and username packed into the name around a split
//! character. Version 2 records are tagged fields ending in an
//! end-of-record marker, but URL and autotype still live inside the
//! notes text by convention, so they are extracted on read and merged
//! back on write.

use crate::cbc::{CbcCodec, FieldRead};
use crate::error::StoreError;
use crate::header::Header;
use crate::record::{tag, Entry, MAX_RECORD_FIELDS};
use coffre_crypto_core::{
    legacy_randhash, legacy_session_key, randhash_matches, LegacyCipher, Passphrase, RandomSource,
    LEGACY_STUFF_LEN,
};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Name field of the sentinel record every version-2 file starts with.
pub const V2_SENTINEL_NAME: &str =
    " !!!Version 2 File Format!!! Please upgrade to PasswordSafe 2.0 or later";

/// Version strings accepted in the sentinel's password field.
const V2_VERSION_STRINGS: [&str; 2] = ["2.0", "pre-2.0"];

/// Separates title from username inside a version-1 name field.
pub const SPLIT_CHAR: char = '\u{00AD}';

/// Marks "use the configured default username" in a version-1 name.
pub const DEFAULT_USER_CHAR: char = '\u{00A0}';

const AUTOTYPE_MARKER: &str = "autotype:";
const URL_SCHEMES: [&str; 3] = ["https://", "http://", "ftp://"];

/// Which legacy flavor a file is read or written as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyVersion {
    /// Original format: positional fields, no record marker.
    V1,
    /// Tagged fields behind a sentinel record.
    V2,
}

enum Io {
    Reading(BufReader<File>),
    Writing(BufWriter<File>),
}

/// An open legacy database file, reading or writing.
pub struct V2File {
    path: PathBuf,
    io: Option<Io>,
    codec: CbcCodec<LegacyCipher>,
    version: LegacyVersion,
    header: Header,
    default_username: String,
    file_len: u64,
    rng: RandomSource,
}

impl V2File {
    /// Create a fresh legacy database at `path`.
    ///
    /// `header.preferences` is carried in the sentinel record for
    /// version 2 and dropped for version 1, which has nowhere to put it.
    ///
    /// # Errors
    ///
    /// `CantOpen` / `WriteFailure` on I/O problems, `Crypto` if the
    /// CSPRNG fails.
    pub fn create(
        path: &Path,
        passphrase: &Passphrase,
        version: LegacyVersion,
        header: Header,
        mut rng: RandomSource,
    ) -> Result<Self, StoreError> {
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

        let mut randstuff = [0u8; LEGACY_STUFF_LEN];
        rng.fill(&mut randstuff[..8])?;
        let randhash = legacy_randhash(passphrase, &randstuff)?;
        w.write_all(&randstuff[..8]).map_err(write_err)?;
        w.write_all(&randhash).map_err(write_err)?;
        let mut salt = [0u8; 20];
        rng.fill(&mut salt)?;
        w.write_all(&salt).map_err(write_err)?;
        let mut iv = [0u8; 8];
        rng.fill(&mut iv)?;
        w.write_all(&iv).map_err(write_err)?;

        let key = legacy_session_key(passphrase, &salt);
        let codec = CbcCodec::new(LegacyCipher::new(key.expose())?, &iv);

        let mut this = Self {
            path: path.to_owned(),
            io: Some(Io::Writing(w)),
            codec,
            version,
            header,
            default_username: String::new(),
            file_len: 0,
            rng,
        };
        this.header.major = match version {
            LegacyVersion::V1 => 1,
            LegacyVersion::V2 => 2,
        };
        this.header.minor = 0;
        if version == LegacyVersion::V2 {
            let prefs = this.header.preferences.clone();
            this.write_positional_record(V2_SENTINEL_NAME, V2_VERSION_STRINGS[0], &prefs)?;
        }
        debug!(path = %this.path.display(), ?version, "legacy database created");
        Ok(this)
    }

    /// Open an existing legacy database for reading.
    ///
    /// # Errors
    ///
    /// `NotThisFormat` when the file is too short to carry the legacy
    /// prelude, `WrongPassphrase` when the verification value does not
    /// match, `UnsupportedVersion` when a version-2 sentinel carries an
    /// unknown version string.
    pub fn open(
        path: &Path,
        passphrase: &Passphrase,
        version: LegacyVersion,
    ) -> Result<Self, StoreError> {
        let file = File::open(path).map_err(|e| StoreError::CantOpen {
            path: path.to_owned(),
            source: e,
        })?;
        let file_len = file.metadata()?.len();
        let mut r = BufReader::new(file);

        let mut randstuff = [0u8; LEGACY_STUFF_LEN];
        let mut stored = [0u8; 20];
        r.read_exact(&mut randstuff[..8])
            .and_then(|()| r.read_exact(&mut stored))
            .map_err(|_| StoreError::NotThisFormat)?;
        if !randhash_matches(&stored, &legacy_randhash(passphrase, &randstuff)?) {
            return Err(StoreError::WrongPassphrase);
        }

        let mut salt = [0u8; 20];
        r.read_exact(&mut salt)?;
        let mut iv = [0u8; 8];
        r.read_exact(&mut iv)?;
        let key = legacy_session_key(passphrase, &salt);
        let codec = CbcCodec::new(LegacyCipher::new(key.expose())?, &iv);

        let mut this = Self {
            path: path.to_owned(),
            io: Some(Io::Reading(r)),
            codec,
            version,
            header: Header::default(),
            default_username: String::new(),
            file_len,
            rng: RandomSource::new(),
        };
        this.header.major = match version {
            LegacyVersion::V1 => 1,
            LegacyVersion::V2 => 2,
        };
        if version == LegacyVersion::V2 {
            this.read_sentinel()?;
        }
        debug!(path = %this.path.display(), ?version, "legacy database opened");
        Ok(this)
    }

    /// Verify a passphrase against the legacy prelude only.
    ///
    /// # Errors
    ///
    /// `WrongPassphrase` on mismatch, `NotThisFormat` when the file is
    /// too short to carry the prelude.
    pub fn check_passphrase(path: &Path, passphrase: &Passphrase) -> Result<(), StoreError> {
        let file = File::open(path).map_err(|e| StoreError::CantOpen {
            path: path.to_owned(),
            source: e,
        })?;
        let mut r = BufReader::new(file);
        let mut randstuff = [0u8; LEGACY_STUFF_LEN];
        let mut stored = [0u8; 20];
        r.read_exact(&mut randstuff[..8])
            .and_then(|()| r.read_exact(&mut stored))
            .map_err(|_| StoreError::NotThisFormat)?;
        if randhash_matches(&stored, &legacy_randhash(passphrase, &randstuff)?) {
            Ok(())
        } else {
            Err(StoreError::WrongPassphrase)
        }
    }

    /// Username substituted when a version-1 name carries the
    /// default-username marker instead of a real username.
    pub fn set_default_username(&mut self, name: &str) {
        self.default_username = name.to_owned();
    }

    /// The synthesized header: version numbers and, for version 2, the
    /// preference string from the sentinel record.
    #[must_use]
    pub const fn header(&self) -> &Header {
        &self.header
    }

    /// Append one entry.
    ///
    /// Version 1 keeps only name/password/notes; group is folded into
    /// the title, URL and autotype into the notes, and everything else
    /// is dropped. Version 2 keeps tagged fields but still folds URL
    /// and autotype into notes.
    ///
    /// # Errors
    ///
    /// `WriteFailure` when the file is closed or open for reading.
    pub fn write_record(&mut self, entry: &Entry) -> Result<(), StoreError> {
        match self.version {
            LegacyVersion::V1 => {
                let name = make_v1_name(entry);
                let notes = merge_notes(entry);
                let password = entry.password.clone();
                self.write_positional_record(&name, &password, &notes)
            }
            LegacyVersion::V2 => self.write_v2_record(entry),
        }
    }

    /// Read the next entry, or `Ok(None)` at the end of the stream.
    ///
    /// # Errors
    ///
    /// `Corrupt` on a field length beyond the file size or a version-2
    /// record that never ends.
    pub fn read_record(&mut self) -> Result<Option<Entry>, StoreError> {
        match self.version {
            LegacyVersion::V1 => self.read_v1_record(),
            LegacyVersion::V2 => self.read_v2_record(),
        }
    }

    /// Flush and close. Legacy files have no trailer, so closing a
    /// reader is a no-op. Idempotent.
    ///
    /// # Errors
    ///
    /// `WriteFailure` when the final flush fails.
    pub fn close(&mut self) -> Result<(), StoreError> {
        match self.io.take() {
            Some(Io::Writing(mut w)) => w.flush().map_err(write_err),
            _ => Ok(()),
        }
    }

    // --- version 1 records -------------------------------------------------

    fn read_v1_record(&mut self) -> Result<Option<Entry>, StoreError> {
        let Some(name) = self.read_text_field()? else {
            return Ok(None);
        };
        let password = self
            .read_text_field()?
            .ok_or_else(|| StoreError::Corrupt("record truncated".into()))?;
        let mut notes = self
            .read_text_field()?
            .ok_or_else(|| StoreError::Corrupt("record truncated".into()))?;

        let mut entry = Entry::default();
        let (title, username) = split_v1_name(&name, &self.default_username);
        entry.title = title;
        entry.username = username;
        entry.password = password;
        entry.url = extract_url(&mut notes);
        entry.autotype = extract_autotype(&mut notes);
        entry.notes = notes;
        Ok(Some(entry))
    }

    fn write_positional_record(
        &mut self,
        name: &str,
        password: &str,
        notes: &str,
    ) -> Result<(), StoreError> {
        self.write_field(tag::NAME, name.as_bytes())?;
        self.write_field(tag::PASSWORD, password.as_bytes())?;
        self.write_field(tag::NOTES, notes.as_bytes())
    }

    // --- version 2 records -------------------------------------------------

    fn read_sentinel(&mut self) -> Result<(), StoreError> {
        // Only the version field is authoritative; some writers append
        // random suffixes to the sentinel name, so it is not checked.
        let Some(_name) = self.read_text_field()? else {
            return Err(StoreError::Corrupt("sentinel record missing".into()));
        };
        let version = self
            .read_text_field()?
            .ok_or_else(|| StoreError::Corrupt("sentinel record truncated".into()))?;
        let prefs = self
            .read_text_field()?
            .ok_or_else(|| StoreError::Corrupt("sentinel record truncated".into()))?;
        if !V2_VERSION_STRINGS.contains(&version.as_str()) {
            return Err(StoreError::UnsupportedVersion { major: 2, minor: 0 });
        }
        self.header.preferences = prefs;
        Ok(())
    }

    fn read_v2_record(&mut self) -> Result<Option<Entry>, StoreError> {
        let mut entry = Entry::default();
        let mut any = false;
        for _ in 0..MAX_RECORD_FIELDS {
            match self.next_field()? {
                FieldRead::Field(f) if f.ftype == tag::END => {
                    let mut notes = std::mem::take(&mut entry.notes);
                    entry.url = extract_url(&mut notes);
                    entry.autotype = extract_autotype(&mut notes);
                    entry.notes = notes;
                    // Fields this flavor never defined are dropped, not
                    // preserved; only the modern format round-trips them.
                    entry.unknown.clear();
                    return Ok(Some(entry));
                }
                FieldRead::Field(f) => {
                    entry.apply_field(f)?;
                    any = true;
                }
                FieldRead::Terminal | FieldRead::EndOfStream => {
                    return Ok(any.then_some(entry));
                }
            }
        }
        Err(StoreError::Corrupt("too many fields in one record".into()))
    }

    fn write_v2_record(&mut self, entry: &Entry) -> Result<(), StoreError> {
        let uuid = entry.uuid.unwrap_or_else(Uuid::new_v4);
        self.write_field(tag::UUID, uuid.as_bytes())?;
        if !entry.group.is_empty() {
            self.write_field(tag::GROUP, entry.group.as_bytes())?;
        }
        self.write_field(tag::TITLE, entry.title.as_bytes())?;
        self.write_field(tag::USERNAME, entry.username.as_bytes())?;
        self.write_field(tag::PASSWORD, entry.password.as_bytes())?;
        let notes = merge_notes(entry);
        if !notes.is_empty() {
            self.write_field(tag::NOTES, notes.as_bytes())?;
        }
        for (t, stamp) in [
            (tag::CTIME, entry.ctime),
            (tag::PMTIME, entry.pmtime),
            (tag::ATIME, entry.atime),
            (tag::XTIME, entry.xtime),
            (tag::RMTIME, entry.rmtime),
        ] {
            if let Some(s) = stamp {
                if s != 0 {
                    self.write_field(t, &s.to_le_bytes())?;
                }
            }
        }
        self.write_field(tag::END, b"")
    }

    // --- shared plumbing ---------------------------------------------------

    fn write_field(&mut self, ftype: u8, data: &[u8]) -> Result<(), StoreError> {
        let Some(Io::Writing(w)) = self.io.as_mut() else {
            return Err(StoreError::WriteFailure(
                "file is not open for writing".into(),
            ));
        };
        self.codec.write_field(w, &mut self.rng, ftype, data)?;
        Ok(())
    }

    fn next_field(&mut self) -> Result<FieldRead, StoreError> {
        let Some(Io::Reading(r)) = self.io.as_mut() else {
            return Ok(FieldRead::EndOfStream);
        };
        self.codec.read_field(r, None, self.file_len)
    }

    fn read_text_field(&mut self) -> Result<Option<String>, StoreError> {
        match self.next_field()? {
            FieldRead::Field(f) => Ok(Some(String::from_utf8_lossy(&f.data).into_owned())),
            _ => Ok(None),
        }
    }
}

impl fmt::Debug for V2File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.io {
            Some(Io::Reading(_)) => "reading",
            Some(Io::Writing(_)) => "writing",
            None => "closed",
        };
        f.debug_struct("V2File")
            .field("path", &self.path)
            .field("version", &self.version)
            .field("mode", &mode)
            .finish_non_exhaustive()
    }
}

impl Drop for V2File {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn write_err(e: std::io::Error) -> StoreError {
    StoreError::WriteFailure(e.to_string())
}

// ---------------------------------------------------------------------------
// Version-1 name packing
// ---------------------------------------------------------------------------

fn make_v1_name(entry: &Entry) -> String {
    let mut name = if entry.group.is_empty() {
        entry.title.clone()
    } else {
        format!("{}.{}", entry.group, entry.title)
    };
    name.push(SPLIT_CHAR);
    name.push_str(&entry.username);
    name
}

fn split_v1_name(name: &str, default_username: &str) -> (String, String) {
    if let Some((title, _)) = name.split_once(DEFAULT_USER_CHAR) {
        (title.trim_end().to_owned(), default_username.to_owned())
    } else if let Some((title, user)) = name.split_once(SPLIT_CHAR) {
        (title.trim_end().to_owned(), user.trim_start().to_owned())
    } else {
        (name.to_owned(), String::new())
    }
}

// ---------------------------------------------------------------------------
// Notes folding — URL and autotype never had fields of their own here
// ---------------------------------------------------------------------------

fn merge_notes(entry: &Entry) -> String {
    let mut notes = entry.notes.clone();
    if !entry.url.is_empty() {
        if !notes.is_empty() {
            notes.push_str("\r\n");
        }
        notes.push_str(&entry.url);
    }
    if !entry.autotype.is_empty() {
        if !notes.is_empty() {
            notes.push_str("\r\n");
        }
        notes.push_str(AUTOTYPE_MARKER);
        notes.push_str(&entry.autotype);
    }
    notes
}

fn extract_url(notes: &mut String) -> String {
    let Some(start) = URL_SCHEMES.iter().find_map(|s| notes.find(s)) else {
        return String::new();
    };
    let end = notes[start..]
        .find(char::is_whitespace)
        .map_or(notes.len(), |off| start.saturating_add(off));
    let url = notes[start..end].to_owned();
    remove_span(notes, start, end);
    url
}

fn extract_autotype(notes: &mut String) -> String {
    let Some(marker) = notes.find(AUTOTYPE_MARKER) else {
        return String::new();
    };
    let value_start = marker.saturating_add(AUTOTYPE_MARKER.len());
    let value_end = notes[value_start..]
        .find(['\r', '\n'])
        .map_or(notes.len(), |off| value_start.saturating_add(off));
    let autotype = notes[value_start..value_end].to_owned();
    remove_span(notes, marker, value_end);
    autotype
}

/// Remove `[start, end)` plus one preceding line break, if any.
fn remove_span(notes: &mut String, start: usize, end: usize) {
    let mut from = start;
    if notes[..from].ends_with("\r\n") {
        from = from.saturating_sub(2);
    } else if notes[..from].ends_with('\n') {
        from = from.saturating_sub(1);
    }
    notes.replace_range(from..end, "");
}

// ---------------------------------------------------------------------------
// Unit tests — full write/read cycles live in tests/roundtrip.rs
// ---------------------------------------------------------------------------
