//! The database-wide header record.

use crate::error::StoreError;
use crate::field::RawField;
use uuid::Uuid;

/// Format major version this build reads and writes.
pub const VERSION_MAJOR: u8 = 0x03;

/// Format minor version this build writes.
pub const VERSION_MINOR: u8 = 0x0c;

/// Header field type bytes.
pub mod tag {
    /// Format version, minor byte then major byte.
    pub const VERSION: u8 = 0x00;
    /// File UUID, 16 raw bytes.
    pub const UUID: u8 = 0x01;
    /// Serialized non-default preferences.
    pub const PREFERENCES: u8 = 0x02;
    /// Tree display status, one `'1'`/`'0'` character per group.
    pub const DISPLAY_STATUS: u8 = 0x03;
    /// Last-saved time.
    pub const LAST_SAVED: u8 = 0x04;
    /// Combined who/where field written by very old releases; read only.
    pub const LAST_SAVED_USER_HOST: u8 = 0x05;
    /// Application that last wrote the file.
    pub const LAST_SAVED_APPLICATION: u8 = 0x06;
    /// User who last wrote the file.
    pub const LAST_SAVED_USER: u8 = 0x07;
    /// Host the file was last written on.
    pub const LAST_SAVED_HOST: u8 = 0x08;
    /// End of header.
    pub const END: u8 = 0xff;
}

/// File-level metadata, stored as the first record of the data stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    /// Format major version read from the file (0 until read).
    pub major: u8,
    /// Format minor version read from the file.
    pub minor: u8,
    /// Stable identity of the database file.
    pub file_uuid: Option<Uuid>,
    /// Serialized non-default preferences, opaque to this layer.
    pub preferences: String,
    /// Expanded/collapsed state of each displayed group.
    pub display_status: Vec<bool>,
    /// When the file was last written, Unix seconds.
    pub when_last_saved: u32,
    /// Who last wrote the file.
    pub last_saved_by: String,
    /// Host the file was last written on.
    pub last_saved_on: String,
    /// Application that last wrote the file.
    pub last_saved_what: String,
    /// Key-stretching iteration count the file was written with.
    pub iterations: u32,
    /// Unrecognized header fields, preserved in arrival order.
    pub unknown: Vec<RawField>,
}

impl Header {
    /// Absorb one decrypted header field.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedVersion` when the version field names a major
    /// version this build does not understand.
    pub fn apply_field(&mut self, field: RawField) -> Result<(), StoreError> {
        match field.ftype {
            tag::VERSION => {
                if field.data.len() < 2 {
                    return Err(StoreError::Corrupt("version field too short".into()));
                }
                let (minor, major) = (field.data[0], field.data[1]);
                if major != VERSION_MAJOR {
                    return Err(StoreError::UnsupportedVersion { major, minor });
                }
                self.major = major;
                self.minor = minor;
            }
            tag::UUID => match Uuid::from_slice(&field.data) {
                Ok(uuid) => self.file_uuid = Some(uuid),
                Err(_) => self.unknown.push(field),
            },
            tag::PREFERENCES => self.preferences = text(&field.data),
            tag::DISPLAY_STATUS => {
                self.display_status = field.data.iter().map(|&b| b == b'1').collect();
            }
            tag::LAST_SAVED => match parse_when(&field.data) {
                Some(when) => self.when_last_saved = when,
                None => self.unknown.push(field),
            },
            tag::LAST_SAVED_USER_HOST => {
                // "llll" hex length of the username, then username, then host.
                if !self.parse_user_host(&field.data) {
                    self.unknown.push(field);
                }
            }
            tag::LAST_SAVED_USER => self.last_saved_by = text(&field.data),
            tag::LAST_SAVED_HOST => self.last_saved_on = text(&field.data),
            tag::LAST_SAVED_APPLICATION => self.last_saved_what = text(&field.data),
            _ => self.unknown.push(field),
        }
        Ok(())
    }

    fn parse_user_host(&mut self, data: &[u8]) -> bool {
        let Ok(s) = std::str::from_utf8(data) else {
            return false;
        };
        let (Some(prefix), Some(rest)) = (s.get(..4), s.get(4..)) else {
            return false;
        };
        let Ok(ulen) = usize::from_str_radix(prefix, 16) else {
            return false;
        };
        if ulen > rest.len() || !rest.is_char_boundary(ulen) {
            return false;
        }
        let (user, host) = rest.split_at(ulen);
        self.last_saved_by = user.to_owned();
        self.last_saved_on = host.to_owned();
        true
    }

    /// Walk every field the header would serialize, in canonical order,
    /// excluding the end-of-header marker (the caller writes that).
    ///
    /// # Errors
    ///
    /// Propagates the first error the visitor returns.
    pub fn visit_fields(
        &self,
        visit: &mut dyn FnMut(u8, &[u8]) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        visit(tag::VERSION, &[VERSION_MINOR, VERSION_MAJOR])?;
        if let Some(uuid) = self.file_uuid {
            visit(tag::UUID, uuid.as_bytes())?;
        }
        // Preferences are written even when empty; readers rely on the
        // field being present to distinguish "all defaults" from "never
        // saved".
        visit(tag::PREFERENCES, self.preferences.as_bytes())?;
        if !self.display_status.is_empty() {
            let chars: Vec<u8> = self
                .display_status
                .iter()
                .map(|&open| if open { b'1' } else { b'0' })
                .collect();
            visit(tag::DISPLAY_STATUS, &chars)?;
        }
        if self.when_last_saved != 0 {
            visit(tag::LAST_SAVED, &self.when_last_saved.to_le_bytes())?;
        }
        if !self.last_saved_by.is_empty() {
            visit(tag::LAST_SAVED_USER, self.last_saved_by.as_bytes())?;
        }
        if !self.last_saved_on.is_empty() {
            visit(tag::LAST_SAVED_HOST, self.last_saved_on.as_bytes())?;
        }
        if !self.last_saved_what.is_empty() {
            visit(
                tag::LAST_SAVED_APPLICATION,
                self.last_saved_what.as_bytes(),
            )?;
        }
        for field in &self.unknown {
            visit(field.ftype, &field.data)?;
        }
        Ok(())
    }
}

fn text(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}

/// Last-saved time: 4 raw little-endian bytes, or 8 ASCII hex characters
/// as written by much older releases.
fn parse_when(data: &[u8]) -> Option<u32> {
    match data.len() {
        4 => {
            let bytes: [u8; 4] = data.try_into().ok()?;
            Some(u32::from_le_bytes(bytes))
        }
        8 => {
            let s = std::str::from_utf8(data).ok()?;
            u32::from_str_radix(s.trim(), 16).ok()
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
