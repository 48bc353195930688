#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

//! Property tests for the wire format: arbitrary payloads and entries
//! must survive the codec, and whole files must survive a write/read
//! cycle.

use coffre_crypto_core::{LegacyCipher, ModernCipher, Passphrase, RandomSource, MIN_ITERATIONS};
use coffre_store::cbc::{CbcCodec, FieldRead};
use coffre_store::record::tag;
use coffre_store::{Entry, Header, RawField, V3File};
use proptest::collection::vec;
use proptest::option;
use proptest::prelude::*;
use std::io::Cursor;
use uuid::Uuid;

fn modern_pair() -> (CbcCodec<ModernCipher>, CbcCodec<ModernCipher>) {
    let iv = [0x17u8; 16];
    (
        CbcCodec::new(ModernCipher::new(&[0x51; 32]).unwrap(), &iv),
        CbcCodec::new(ModernCipher::new(&[0x51; 32]).unwrap(), &iv),
    )
}

fn arb_text() -> impl Strategy<Value = String> {
    ".{0,40}"
}

/// Tags no format generation defines, so they always land in `unknown`.
fn arb_unknown_field() -> impl Strategy<Value = RawField> {
    (0x20u8..=0x7e, vec(any::<u8>(), 0..64)).prop_map(|(ftype, data)| RawField::new(ftype, data))
}

fn arb_entry() -> impl Strategy<Value = Entry> {
    (
        (any::<[u8; 16]>(), arb_text(), arb_text(), arb_text(), arb_text()),
        (arb_text(), arb_text(), arb_text(), arb_text()),
        (
            option::of(1u32..),
            option::of(1u32..),
            option::of(1u32..),
            option::of(1u32..),
            option::of(1u32..),
        ),
        vec(arb_unknown_field(), 0..4),
    )
        .prop_map(
            |(
                (uuid, group, title, username, password),
                (notes, url, autotype, password_history),
                (ctime, pmtime, atime, xtime, rmtime),
                unknown,
            )| {
                let mut entry = Entry::default();
                entry.uuid = Some(Uuid::from_bytes(uuid));
                entry.group = group;
                entry.title = title;
                entry.username = username;
                entry.password = password;
                entry.notes = notes;
                entry.url = url;
                entry.autotype = autotype;
                entry.password_history = password_history;
                entry.ctime = ctime;
                entry.pmtime = pmtime;
                entry.atime = atime;
                entry.xtime = xtime;
                entry.rmtime = rmtime;
                entry.unknown = unknown;
                entry
            },
        )
}

proptest! {
    #[test]
    fn modern_payloads_roundtrip(payload in vec(any::<u8>(), 0..600), ftype in any::<u8>()) {
        let (mut enc, mut dec) = modern_pair();
        let mut rng = RandomSource::new();
        let mut wire = Vec::new();
        enc.write_field(&mut wire, &mut rng, ftype, &payload).unwrap();
        let mut cursor = Cursor::new(wire);
        match dec.read_field(&mut cursor, None, 0).unwrap() {
            FieldRead::Field(f) => {
                prop_assert_eq!(f.ftype, ftype);
                prop_assert_eq!(&f.data, &payload);
            }
            _ => prop_assert!(false, "expected a field"),
        }
    }

    #[test]
    fn legacy_payloads_roundtrip(payload in vec(any::<u8>(), 0..200), ftype in any::<u8>()) {
        let iv = [0x09u8; 8];
        let mut enc = CbcCodec::new(LegacyCipher::new(&[0x51; 20]).unwrap(), &iv);
        let mut dec = CbcCodec::new(LegacyCipher::new(&[0x51; 20]).unwrap(), &iv);
        let mut rng = RandomSource::new();
        let mut wire = Vec::new();
        enc.write_field(&mut wire, &mut rng, ftype, &payload).unwrap();
        let mut cursor = Cursor::new(wire);
        match dec.read_field(&mut cursor, None, 0).unwrap() {
            FieldRead::Field(f) => {
                prop_assert_eq!(f.ftype, ftype);
                prop_assert_eq!(&f.data, &payload);
            }
            _ => prop_assert!(false, "expected a field"),
        }
    }

    #[test]
    fn entries_roundtrip_through_the_codec(entries in vec(arb_entry(), 0..8)) {
        let (mut enc, mut dec) = modern_pair();
        let mut rng = RandomSource::new();
        let mut wire = Vec::new();
        for entry in &entries {
            entry
                .visit_fields(&mut |ftype, data| {
                    enc.write_field(&mut wire, &mut rng, ftype, data).map(|_| ())
                })
                .unwrap();
            enc.write_field(&mut wire, &mut rng, tag::END, b"").unwrap();
        }

        let mut cursor = Cursor::new(wire);
        let mut back = Vec::new();
        'records: loop {
            let mut entry = Entry::default();
            let mut any = false;
            loop {
                match dec.read_field(&mut cursor, None, 0).unwrap() {
                    FieldRead::Field(f) if f.ftype == tag::END => {
                        back.push(entry);
                        continue 'records;
                    }
                    FieldRead::Field(f) => {
                        entry.apply_field(f).unwrap();
                        any = true;
                    }
                    _ => {
                        prop_assert!(!any, "stream ended inside a record");
                        break 'records;
                    }
                }
            }
        }
        prop_assert_eq!(back, entries);
    }
}

proptest! {
    // Full files stretch the passphrase each time; keep the case count low.
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn v3_files_roundtrip(entries in vec(arb_entry(), 0..5)) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prop.psafe3");
        let passphrase = Passphrase::from("property");
        let mut file = V3File::create(
            &path,
            &passphrase,
            MIN_ITERATIONS,
            Header::default(),
            RandomSource::new(),
        )
        .unwrap();
        for entry in &entries {
            file.write_record(entry).unwrap();
        }
        file.close().unwrap();

        let mut file = V3File::open(&path, &passphrase).unwrap();
        let mut back = Vec::new();
        while let Some(entry) = file.read_record().unwrap() {
            back.push(entry);
        }
        file.close().unwrap();
        prop_assert_eq!(back, entries);
    }
}
