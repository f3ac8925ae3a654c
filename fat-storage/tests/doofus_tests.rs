//! Doofus sidecar-table behaviour and the fixed-capacity limit.

mod common;

use common::SharedMem;
use fat_storage::formats::doofus::{open_doofus, DoofusType};
use fat_storage::{
    standard_filters, Archive, ArchiveType, Attributes, Error, SuppData, SuppItem,
    FILETYPE_GENERIC,
};
use seg_stream::{FilterRegistry, MemStream, Stream};
use std::rc::Rc;

const FAT_LEN: usize = 8 * 64;

fn filters() -> Rc<FilterRegistry> {
    Rc::new(standard_filters())
}

fn fat_with(entries: &[(u16, u16)]) -> Vec<u8> {
    let mut fat = Vec::new();
    for &(size, code) in entries {
        fat.extend_from_slice(&size.to_le_bytes());
        fat.extend_from_slice(&code.to_le_bytes());
        fat.extend_from_slice(&[0u8; 4]);
    }
    fat.resize(FAT_LEN, 0);
    fat
}

fn open(
    content: &SharedMem,
    fat: &SharedMem,
) -> fat_storage::FatArchive<fat_storage::formats::doofus::DoofusFormat> {
    open_doofus(
        Box::new(content.clone()),
        Box::new(fat.clone()),
        filters(),
    )
    .unwrap()
}

#[test]
fn full_table_refuses_inserts() {
    // All 64 slots in use, one byte per file.
    let slots: Vec<(u16, u16)> = (0..64).map(|_| (1u16, 0u16)).collect();
    let content = SharedMem::new(&vec![0u8; 64]);
    let fat = SharedMem::new(&fat_with(&slots));
    let mut arch = open(&content, &fat);
    assert_eq!(arch.files().len(), 64);

    let err = arch
        .insert(None, "", 5, FILETYPE_GENERIC, Attributes::NONE)
        .unwrap_err();
    assert!(matches!(err, Error::FormatFull));
    assert_eq!(arch.files().len(), 64);
}

#[test]
fn insert_fills_a_vacant_slot() {
    let content = SharedMem::new(b"abc");
    let fat = SharedMem::new(&fat_with(&[(3, 0x59ee)]));
    let mut arch = open(&content, &fat);

    arch.insert(None, "", 4, "unknown/doofus-1636", Attributes::NONE)
        .unwrap();
    arch.flush().unwrap();

    let expected = fat_with(&[(3, 0x59ee), (4, 0x1636)]);
    assert_eq!(fat.bytes(), expected);
    assert_eq!(content.bytes().len(), 7);
}

#[test]
fn remove_vacates_its_slot() {
    let content = SharedMem::new(b"abcdefg");
    let fat = SharedMem::new(&fat_with(&[(3, 0x59ee), (4, 0x1636)]));
    let mut arch = open(&content, &fat);

    let first = arch.files()[0].clone();
    arch.remove(&first).unwrap();
    arch.flush().unwrap();

    assert_eq!(fat.bytes(), fat_with(&[(4, 0x1636)]));
    assert_eq!(content.bytes(), b"defg");
}

#[test]
fn resize_updates_the_sidecar() {
    let content = SharedMem::new(b"abc");
    let fat = SharedMem::new(&fat_with(&[(3, 0)]));
    let mut arch = open(&content, &fat);

    let f = arch.files()[0].clone();
    arch.resize(&f, 5, 5).unwrap();
    arch.flush().unwrap();

    assert_eq!(fat.bytes(), fat_with(&[(5, 0)]));
    assert_eq!(content.bytes(), b"abc\0\0");
}

#[test]
fn rename_is_unsupported() {
    let content = SharedMem::new(b"abc");
    let fat = SharedMem::new(&fat_with(&[(3, 0)]));
    let mut arch = open(&content, &fat);
    let f = arch.files()[0].clone();
    assert!(matches!(
        arch.rename(&f, "NAME"),
        Err(Error::Unsupported(_))
    ));
}

#[test]
fn plugin_declares_its_sidecar() {
    let t = DoofusType::new(filters());
    let mut probe = MemStream::new();
    let supps = t
        .required_supps(&mut probe as &mut dyn Stream, "doofus.g-d")
        .unwrap();
    assert_eq!(supps.get(&SuppItem::Fat).map(String::as_str), Some("doofus.exe"));

    // Opening without the sidecar fails cleanly.
    let err = t
        .open(Box::new(MemStream::new()), SuppData::new())
        .unwrap_err();
    assert!(matches!(err, Error::MissingSupp(SuppItem::Fat)));
}
