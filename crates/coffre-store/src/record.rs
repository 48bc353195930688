//! Database entries and their on-disk field tags.

use crate::error::StoreError;
use crate::field::RawField;
use std::fmt;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Hard cap on fields per record. A healthy record has a dozen or so;
/// hitting this cap means the stream is desynchronized or hostile.
pub const MAX_RECORD_FIELDS: usize = 255;

/// Record field type bytes.
pub mod tag {
    /// Pre-2.0 combined "title ‖ split ‖ username" field.
    pub const NAME: u8 = 0x00;
    /// Entry UUID, 16 raw bytes.
    pub const UUID: u8 = 0x01;
    /// Group path, `.`-separated.
    pub const GROUP: u8 = 0x02;
    /// Entry title.
    pub const TITLE: u8 = 0x03;
    /// Username.
    pub const USERNAME: u8 = 0x04;
    /// Free-form notes.
    pub const NOTES: u8 = 0x05;
    /// The password itself.
    pub const PASSWORD: u8 = 0x06;
    /// Creation time, 4-byte little-endian Unix seconds.
    pub const CTIME: u8 = 0x07;
    /// Password modification time.
    pub const PMTIME: u8 = 0x08;
    /// Last access time.
    pub const ATIME: u8 = 0x09;
    /// Password expiry time.
    pub const XTIME: u8 = 0x0a;
    /// Record modification time.
    pub const RMTIME: u8 = 0x0c;
    /// Associated URL.
    pub const URL: u8 = 0x0d;
    /// Autotype keystroke template.
    pub const AUTOTYPE: u8 = 0x0e;
    /// Password history blob (opaque here).
    pub const PWHIST: u8 = 0x0f;
    /// End of record.
    pub const END: u8 = 0xff;
}

/// One password entry.
///
/// String fields are owned `String`s (UTF-8 on the wire); timestamps are
/// Unix seconds, `None`/zero meaning "not set". Fields this build does
/// not understand are preserved verbatim in `unknown` and written back
/// unchanged, so a newer writer's data survives a round trip through us.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Entry {
    /// Stable identity of the entry across edits.
    #[zeroize(skip)]
    pub uuid: Option<Uuid>,
    /// Group path, `.`-separated, empty for top level.
    pub group: String,
    /// Entry title.
    pub title: String,
    /// Username.
    pub username: String,
    /// The password.
    pub password: String,
    /// Free-form notes.
    pub notes: String,
    /// Associated URL.
    pub url: String,
    /// Autotype keystroke template.
    pub autotype: String,
    /// Password history blob, opaque to this layer.
    pub password_history: String,
    /// Creation time.
    pub ctime: Option<u32>,
    /// Password modification time.
    pub pmtime: Option<u32>,
    /// Last access time.
    pub atime: Option<u32>,
    /// Password expiry time.
    pub xtime: Option<u32>,
    /// Record modification time.
    pub rmtime: Option<u32>,
    /// Unrecognized fields, preserved in arrival order.
    pub unknown: Vec<RawField>,
}

impl Entry {
    /// Create an entry with a fresh UUID and everything else empty.
    #[must_use]
    pub fn new() -> Self {
        let mut entry = Self::default();
        entry.uuid = Some(Uuid::new_v4());
        entry
    }

    /// Absorb one decrypted field into the entry.
    ///
    /// Unrecognized tags, and recognized tags whose payload does not
    /// parse (for example a timestamp that is not 4 bytes), land in
    /// `unknown` so they survive a rewrite byte-for-byte.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` keeps the signature aligned
    /// with the sibling header type, whose version field can fail.
    pub fn apply_field(&mut self, field: RawField) -> Result<(), StoreError> {
        match field.ftype {
            tag::UUID => match Uuid::from_slice(&field.data) {
                Ok(uuid) => self.uuid = Some(uuid),
                Err(_) => self.unknown.push(field),
            },
            tag::GROUP => self.group = text(&field.data),
            tag::TITLE => self.title = text(&field.data),
            tag::USERNAME => self.username = text(&field.data),
            tag::PASSWORD => self.password = text(&field.data),
            tag::NOTES => self.notes = text(&field.data),
            tag::URL => self.url = text(&field.data),
            tag::AUTOTYPE => self.autotype = text(&field.data),
            tag::PWHIST => self.password_history = text(&field.data),
            tag::CTIME | tag::PMTIME | tag::ATIME | tag::XTIME | tag::RMTIME => {
                match timestamp(&field.data) {
                    Some(t) => {
                        let slot = match field.ftype {
                            tag::CTIME => &mut self.ctime,
                            tag::PMTIME => &mut self.pmtime,
                            tag::ATIME => &mut self.atime,
                            tag::XTIME => &mut self.xtime,
                            _ => &mut self.rmtime,
                        };
                        *slot = Some(t);
                    }
                    None => self.unknown.push(field),
                }
            }
            _ => self.unknown.push(field),
        }
        Ok(())
    }

    /// Walk every field the entry would serialize, in canonical order,
    /// excluding the end-of-record marker (the caller writes that).
    ///
    /// A fresh UUID is generated on the fly when the entry has none, so
    /// every stored record carries one. Empty optional fields are
    /// skipped; title, username, and password are always emitted.
    ///
    /// # Errors
    ///
    /// Propagates the first error the visitor returns.
    pub fn visit_fields(
        &self,
        visit: &mut dyn FnMut(u8, &[u8]) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let uuid = self.uuid.unwrap_or_else(Uuid::new_v4);
        visit(tag::UUID, uuid.as_bytes())?;
        if !self.group.is_empty() {
            visit(tag::GROUP, self.group.as_bytes())?;
        }
        visit(tag::TITLE, self.title.as_bytes())?;
        visit(tag::USERNAME, self.username.as_bytes())?;
        visit(tag::PASSWORD, self.password.as_bytes())?;
        if !self.notes.is_empty() {
            visit(tag::NOTES, self.notes.as_bytes())?;
        }
        if !self.url.is_empty() {
            visit(tag::URL, self.url.as_bytes())?;
        }
        if !self.autotype.is_empty() {
            visit(tag::AUTOTYPE, self.autotype.as_bytes())?;
        }
        if !self.password_history.is_empty() {
            visit(tag::PWHIST, self.password_history.as_bytes())?;
        }
        for (t, stamp) in [
            (tag::CTIME, self.ctime),
            (tag::PMTIME, self.pmtime),
            (tag::ATIME, self.atime),
            (tag::XTIME, self.xtime),
            (tag::RMTIME, self.rmtime),
        ] {
            if let Some(s) = stamp {
                if s != 0 {
                    visit(t, &s.to_le_bytes())?;
                }
            }
        }
        for field in &self.unknown {
            visit(field.ftype, &field.data)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("uuid", &self.uuid)
            .field("group", &self.group)
            .field("title", &self.title)
            .field("username", &self.username)
            .field("password", &"***")
            .field("unknown", &self.unknown.len())
            .finish_non_exhaustive()
    }
}

fn text(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}

fn timestamp(data: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = data.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(entry: &Entry) -> Entry {
        let mut out = Entry::default();
        entry
            .visit_fields(&mut |ftype, data| {
                out.apply_field(RawField::new(ftype, data.to_vec()))
            })
            .unwrap();
        out
    }

    #[test]
    fn visit_then_apply_reproduces_entry() {
        let mut entry = Entry::new();
        entry.group = "banking.eu".into();
        entry.title = "Credit Union".into();
        entry.username = "alice".into();
        entry.password = "s3cr3t".into();
        entry.notes = "second card\nin the drawer".into();
        entry.url = "https://example.test/login".into();
        entry.ctime = Some(1_700_000_000);
        entry.rmtime = Some(1_700_000_500);
        let back = roundtrip(&entry);
        assert_eq!(back, entry);
    }

    #[test]
    fn empty_optionals_are_skipped() {
        let entry = Entry::new();
        let mut tags = Vec::new();
        entry
            .visit_fields(&mut |ftype, _| {
                tags.push(ftype);
                Ok(())
            })
            .unwrap();
        assert_eq!(
            tags,
            vec![tag::UUID, tag::TITLE, tag::USERNAME, tag::PASSWORD]
        );
    }

    #[test]
    fn unknown_fields_are_preserved_verbatim() {
        let mut entry = Entry::new();
        let exotic = RawField::new(0x20, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        entry.apply_field(exotic.clone()).unwrap();
        assert_eq!(entry.unknown, vec![exotic.clone()]);
        let back = roundtrip(&entry);
        assert_eq!(back.unknown, vec![exotic]);
    }

    #[test]
    fn malformed_timestamp_lands_in_unknown() {
        let mut entry = Entry::default();
        entry
            .apply_field(RawField::new(tag::CTIME, vec![1, 2, 3]))
            .unwrap();
        assert!(entry.ctime.is_none());
        assert_eq!(entry.unknown.len(), 1);
    }

    #[test]
    fn malformed_uuid_lands_in_unknown() {
        let mut entry = Entry::default();
        entry
            .apply_field(RawField::new(tag::UUID, vec![0; 5]))
            .unwrap();
        assert!(entry.uuid.is_none());
        assert_eq!(entry.unknown.len(), 1);
    }

    #[test]
    fn entry_without_uuid_gets_one_on_write() {
        let entry = Entry::default();
        let mut saw_uuid = false;
        entry
            .visit_fields(&mut |ftype, data| {
                if ftype == tag::UUID {
                    saw_uuid = true;
                    assert_eq!(data.len(), 16);
                }
                Ok(())
            })
            .unwrap();
        assert!(saw_uuid);
    }

    #[test]
    fn debug_masks_password() {
        let mut entry = Entry::new();
        entry.password = "tops3cret".into();
        let debug = format!("{entry:?}");
        assert!(!debug.contains("tops3cret"));
    }
}
