#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

//! End-to-end write/read cycles across the format generations: header
//! and entry fidelity, passphrase checks, authentication of the modern
//! trailer, and tamper detection.

use coffre_crypto_core::{Passphrase, RandomSource, MIN_ITERATIONS};
use coffre_store::v2::LegacyVersion;
use coffre_store::{
    check_passphrase, read_version, Entry, Header, RawField, StoreError, V2File, V3File, Version,
};
use std::path::Path;

fn sample_entries() -> Vec<Entry> {
    let mut email = Entry::new();
    email.group = "Email".into();
    email.title = "Gmail".into();
    email.username = "alice".into();
    email.password = "s3cr3t".into();

    let mut bank = Entry::new();
    bank.group = "Finance.Banks".into();
    // non-ASCII survives the UTF-8 wire encoding
    bank.title = "Credit Union — Zürich".into();
    bank.username = "a.liddell".into();
    bank.password = "correct horse battery staple".into();
    bank.notes = "ask for Bob\nsecond line".into();
    bank.url = "https://bank.example.test".into();
    bank.autotype = "\\u\\t\\p\\n".into();
    bank.ctime = Some(1_600_000_000);
    bank.pmtime = Some(1_650_000_000);
    bank.rmtime = Some(1_700_000_000);

    let mut wifi = Entry::new();
    wifi.title = "home wifi".into();
    wifi.password = "hunter2".into();
    wifi.password_history = "1ff00".into();

    vec![email, bank, wifi]
}

fn write_v3(path: &Path, passphrase: &Passphrase, entries: &[Entry]) {
    let mut file = V3File::create(
        path,
        passphrase,
        MIN_ITERATIONS,
        Header::default(),
        RandomSource::new(),
    )
    .expect("create");
    for entry in entries {
        file.write_record(entry).expect("write record");
    }
    file.close().expect("seal");
}

fn read_all_v3(path: &Path, passphrase: &Passphrase) -> (Header, Vec<Entry>) {
    let mut file = V3File::open(path, passphrase).expect("open");
    let header = file.header().clone();
    let mut entries = Vec::new();
    while let Some(entry) = file.read_record().expect("read record") {
        entries.push(entry);
    }
    file.close().expect("authenticate");
    (header, entries)
}

// -------------------------------------------------------------------------
// Modern format round trip
// -------------------------------------------------------------------------

#[test]
fn v3_roundtrip_preserves_entries_and_header() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("vault.psafe3");
    let passphrase = Passphrase::from("open sesame");
    let entries = sample_entries();

    write_v3(&path, &passphrase, &entries);
    let (header, back) = read_all_v3(&path, &passphrase);

    assert_eq!(back, entries);
    assert_eq!(header.iterations, MIN_ITERATIONS);
    assert!(header.file_uuid.is_some());
    assert!(header.when_last_saved > 0);
    assert!(!header.last_saved_by.is_empty());
    assert!(!header.last_saved_on.is_empty());
    assert_eq!(header.last_saved_what, "coffre-store");
}

#[test]
fn v3_empty_database_roundtrips() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("empty.psafe3");
    let passphrase = Passphrase::from("nothing inside");

    write_v3(&path, &passphrase, &[]);
    let (_, back) = read_all_v3(&path, &passphrase);
    assert!(back.is_empty());
}

#[test]
fn v3_unknown_fields_survive_a_rewrite() {
    let dir = tempfile::tempdir().expect("tempdir");
    let first = dir.path().join("first.psafe3");
    let second = dir.path().join("second.psafe3");
    let passphrase = Passphrase::from("carrier");

    let mut entry = Entry::new();
    entry.title = "has exotic fields".into();
    entry.password = "pw".into();
    entry.unknown.push(RawField::new(0x20, vec![0x01, 0x02]));
    entry
        .unknown
        .push(RawField::new(0x41, b"from a newer writer".to_vec()));

    write_v3(&first, &passphrase, std::slice::from_ref(&entry));
    let (_, read_once) = read_all_v3(&first, &passphrase);
    write_v3(&second, &passphrase, &read_once);
    let (_, read_twice) = read_all_v3(&second, &passphrase);

    assert_eq!(read_twice[0].unknown, entry.unknown);
}

#[test]
fn v3_close_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("twice.psafe3");
    let passphrase = Passphrase::from("pw");
    write_v3(&path, &passphrase, &sample_entries());

    let mut file = V3File::open(&path, &passphrase).expect("open");
    while file.read_record().expect("read").is_some() {}
    file.close().expect("first close");
    file.close().expect("second close is a no-op");
    assert!(file.read_record().expect("read after close").is_none());
}

#[test]
fn v3_single_entry_scenario() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("email.psafe3");
    let passphrase = Passphrase::from("correct-horse");

    let mut entry = Entry::new();
    entry.group = "Email".into();
    entry.title = "Gmail".into();
    entry.username = "alice".into();
    entry.password = "s3cr3t".into();

    let mut file = V3File::create(&path, &passphrase, 2048, Header::default(), RandomSource::new())
        .expect("create");
    file.write_record(&entry).expect("write");
    file.close().expect("seal");

    let mut file = V3File::open(&path, &passphrase).expect("open");
    let back = file.read_record().expect("read").expect("one record");
    assert_eq!(back, entry);
    assert!(file.read_record().expect("read").is_none());
    file.close().expect("authenticate");

    // The wrong passphrase fails before a single record is produced.
    let err = V3File::open(&path, &Passphrase::from("wrong")).unwrap_err();
    assert!(matches!(err, StoreError::WrongPassphrase));
}

// -------------------------------------------------------------------------
// Passphrase handling
// -------------------------------------------------------------------------

#[test]
fn v3_wrong_passphrase_is_rejected_before_any_data() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("vault.psafe3");
    write_v3(&path, &Passphrase::from("right"), &sample_entries());

    let err = V3File::open(&path, &Passphrase::from("wrong")).unwrap_err();
    assert!(matches!(err, StoreError::WrongPassphrase));
    let err = V3File::check_passphrase(&path, &Passphrase::from("also wrong")).unwrap_err();
    assert!(matches!(err, StoreError::WrongPassphrase));
}

#[test]
fn check_passphrase_reports_the_format_generation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let modern = dir.path().join("modern.psafe3");
    let legacy = dir.path().join("legacy.dat");
    let passphrase = Passphrase::from("shared");

    write_v3(&modern, &passphrase, &[]);
    V2File::create(
        &legacy,
        &passphrase,
        LegacyVersion::V2,
        Header::default(),
        RandomSource::new(),
    )
    .expect("create legacy")
    .close()
    .expect("close legacy");

    assert_eq!(check_passphrase(&modern, &passphrase).unwrap(), Version::V3);
    assert_eq!(check_passphrase(&legacy, &passphrase).unwrap(), Version::V2);
    assert_eq!(read_version(&modern).unwrap(), Version::V3);
    assert_eq!(read_version(&legacy).unwrap(), Version::V2);
}

// -------------------------------------------------------------------------
// Tamper detection
// -------------------------------------------------------------------------

/// Flipping any single ciphertext or trailer byte must surface as
/// `Corrupt` somewhere between open and close.
fn assert_flip_detected(original: &[u8], offset: usize, dir: &Path) {
    let mut bytes = original.to_vec();
    bytes[offset] ^= 0x01;
    let path = dir.join(format!("flip{offset}.psafe3"));
    std::fs::write(&path, &bytes).expect("write tampered copy");

    let passphrase = Passphrase::from("integrity");
    let mut file = match V3File::open(&path, &passphrase) {
        Ok(f) => f,
        Err(StoreError::Corrupt(_)) => return,
        Err(e) => panic!("unexpected open error at offset {offset}: {e}"),
    };
    loop {
        match file.read_record() {
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(StoreError::Corrupt(_)) => return,
            Err(e) => panic!("unexpected read error at offset {offset}: {e}"),
        }
    }
    match file.close() {
        Err(StoreError::Corrupt(_)) => {}
        Ok(()) => panic!("byte flip at offset {offset} went undetected"),
        Err(e) => panic!("unexpected close error at offset {offset}: {e}"),
    }
}

#[test]
fn v3_single_byte_flips_are_detected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("vault.psafe3");
    let passphrase = Passphrase::from("integrity");
    write_v3(&path, &passphrase, &sample_entries());
    let bytes = std::fs::read(&path).expect("read file back");

    let first_field = 152; // end of the fixed prelude
    let mid_data = bytes.len() / 2;
    let in_digest = bytes.len() - 1;
    let before_sentinel = bytes.len() - 49;
    for offset in [first_field, mid_data, before_sentinel, in_digest] {
        assert_flip_detected(&bytes, offset, dir.path());
    }
}

#[test]
fn v3_truncated_file_is_corrupt() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("vault.psafe3");
    let passphrase = Passphrase::from("integrity");
    write_v3(&path, &passphrase, &sample_entries());

    let mut bytes = std::fs::read(&path).expect("read");
    bytes.truncate(bytes.len() - 20);
    std::fs::write(&path, &bytes).expect("rewrite");
    let err = V3File::open(&path, &passphrase).unwrap_err();
    assert!(matches!(err, StoreError::Corrupt(_)));
}

#[test]
fn v3_record_with_too_many_fields_is_corrupt() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bloated.psafe3");
    let passphrase = Passphrase::from("cap");

    // A writer with no field cap can emit a record that never ends
    // within the limit; the reader must refuse it rather than spin.
    let mut entry = Entry::new();
    for i in 0..300u16 {
        entry
            .unknown
            .push(RawField::new(0x40, i.to_le_bytes().to_vec()));
    }
    write_v3(&path, &passphrase, std::slice::from_ref(&entry));

    let mut file = V3File::open(&path, &passphrase).expect("open");
    let err = file.read_record().unwrap_err();
    assert!(matches!(err, StoreError::Corrupt(_)));
}

#[test]
fn v3_lowered_iteration_count_is_rejected_at_open() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("downgrade.psafe3");
    let passphrase = Passphrase::from("floor");
    write_v3(&path, &passphrase, &sample_entries());

    // Iteration count sits after the tag and salt; stamp in a value
    // below the floor, as a downgrade attack would.
    let mut bytes = std::fs::read(&path).expect("read");
    bytes[36..40].copy_from_slice(&100u32.to_le_bytes());
    std::fs::write(&path, &bytes).expect("rewrite");

    let err = V3File::open(&path, &passphrase).unwrap_err();
    assert!(matches!(err, StoreError::Corrupt(_)));
}

// -------------------------------------------------------------------------
// Legacy formats
// -------------------------------------------------------------------------

#[test]
fn v2_roundtrip_preserves_core_fields() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("legacy.dat");
    let passphrase = Passphrase::from("legacy pass");
    let entries = sample_entries();

    let mut header = Header::default();
    header.preferences = "B 24 1".into();
    let mut file = V2File::create(
        &path,
        &passphrase,
        LegacyVersion::V2,
        header,
        RandomSource::new(),
    )
    .expect("create");
    for entry in &entries {
        file.write_record(entry).expect("write");
    }
    file.close().expect("close");

    let mut file = V2File::open(&path, &passphrase, LegacyVersion::V2).expect("open");
    assert_eq!(file.header().preferences, "B 24 1");
    assert_eq!(file.header().major, 2);
    let mut back = Vec::new();
    while let Some(entry) = file.read_record().expect("read") {
        back.push(entry);
    }
    file.close().expect("close");

    assert_eq!(back.len(), entries.len());
    for (got, want) in back.iter().zip(&entries) {
        assert_eq!(got.uuid, want.uuid);
        assert_eq!(got.group, want.group);
        assert_eq!(got.title, want.title);
        assert_eq!(got.username, want.username);
        assert_eq!(got.password, want.password);
        assert_eq!(got.notes, want.notes);
        assert_eq!(got.url, want.url);
        assert_eq!(got.autotype, want.autotype);
        assert_eq!(got.ctime, want.ctime);
    }
}

#[test]
fn v2_rejects_wrong_passphrase() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("legacy.dat");
    V2File::create(
        &path,
        &Passphrase::from("right"),
        LegacyVersion::V2,
        Header::default(),
        RandomSource::new(),
    )
    .expect("create")
    .close()
    .expect("close");

    let err = V2File::open(&path, &Passphrase::from("wrong"), LegacyVersion::V2).unwrap_err();
    assert!(matches!(err, StoreError::WrongPassphrase));
}

#[test]
fn v1_roundtrip_packs_name_and_notes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ancient.dat");
    let passphrase = Passphrase::from("v1 pass");

    let mut entry = Entry::default();
    entry.group = "net".into();
    entry.title = "router".into();
    entry.username = "admin".into();
    entry.password = "changeme".into();
    entry.url = "http://192.0.2.1".into();
    entry.notes = "port forwarding notes".into();

    let mut file = V2File::create(
        &path,
        &passphrase,
        LegacyVersion::V1,
        Header::default(),
        RandomSource::new(),
    )
    .expect("create");
    file.write_record(&entry).expect("write");
    file.close().expect("close");

    let mut file = V2File::open(&path, &passphrase, LegacyVersion::V1).expect("open");
    let back = file.read_record().expect("read").expect("one record");
    assert!(file.read_record().expect("read").is_none());
    file.close().expect("close");

    // V1 has no group field: it arrives folded into the title.
    assert_eq!(back.title, "net.router");
    assert_eq!(back.username, "admin");
    assert_eq!(back.password, "changeme");
    assert_eq!(back.url, "http://192.0.2.1");
    assert_eq!(back.notes, "port forwarding notes");
}
