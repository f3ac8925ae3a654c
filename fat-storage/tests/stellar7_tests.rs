//! Stellar 7 RES folders open as live nested archives.

mod common;

use common::SharedMem;
use fat_storage::formats::stellar7::open_res;
use fat_storage::{standard_filters, Archive, Attributes, FILETYPE_GENERIC};
use seg_stream::FilterRegistry;
use std::io::{Read, Seek, SeekFrom, Write};
use std::rc::Rc;

fn filters() -> Rc<FilterRegistry> {
    Rc::new(standard_filters())
}

fn res_entry(name: &str, payload: &[u8], folder: bool) -> Vec<u8> {
    let mut out = Vec::new();
    let mut n = name.as_bytes().to_vec();
    n.resize(4, 0);
    out.extend_from_slice(&n);
    let raw = payload.len() as u32 | if folder { 0x8000_0000 } else { 0 };
    out.extend_from_slice(&raw.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

#[test]
fn folder_opens_as_nested_archive() {
    let mut inner = res_entry("SHP", b"ship data", false);
    inner.extend_from_slice(&res_entry("SND", b"pew", false));
    let mut image = res_entry("DIR", &inner, true);
    image.extend_from_slice(&res_entry("TOP", b"top-level", false));

    let store = SharedMem::new(&image);
    let mut arch = open_res(Box::new(store.clone()), filters()).unwrap();

    let dir = arch.find("DIR").unwrap();
    assert!(dir.borrow().attrs.contains(Attributes::FOLDER));
    let mut folder = arch.open_folder(&dir).unwrap();

    let names: Vec<String> = folder
        .files()
        .iter()
        .map(|h| h.borrow().name.clone())
        .collect();
    assert_eq!(names, vec!["SHP".to_string(), "SND".to_string()]);

    let shp = folder.find("SHP").unwrap();
    let mut f = folder.open(&shp, false).unwrap();
    let mut text = String::new();
    f.read_to_string(&mut text).unwrap();
    assert_eq!(text, "ship data");
}

#[test]
fn same_size_edits_inside_a_folder_write_through()
{
    let inner = res_entry("SHP", b"ship data", false);
    let image = res_entry("DIR", &inner, true);

    let store = SharedMem::new(&image);
    let mut arch = open_res(Box::new(store.clone()), filters()).unwrap();

    let dir = arch.find("DIR").unwrap();
    let mut folder = arch.open_folder(&dir).unwrap();
    let shp = folder.find("SHP").unwrap();
    let mut f = folder.open(&shp, false).unwrap();
    f.seek(SeekFrom::Start(0)).unwrap();
    f.write_all(b"SHIP DATA").unwrap();
    folder.flush().unwrap();
    arch.flush().unwrap();

    let expected = res_entry("DIR", &res_entry("SHP", b"SHIP DATA", false), true);
    assert_eq!(store.bytes(), expected);
}

#[test]
fn open_folder_on_a_file_is_unsupported() {
    let image = res_entry("TOP", b"plain", false);
    let store = SharedMem::new(&image);
    let mut arch = open_res(Box::new(store.clone()), filters()).unwrap();
    let top = arch.find("TOP").unwrap();
    assert!(arch.open_folder(&top).is_err());
}

#[test]
fn insert_and_remove_round_trip() {
    let mut image = res_entry("ONE", b"first", false);
    image.extend_from_slice(&res_entry("TWO", b"second", false));
    let store = SharedMem::new(&image);
    let mut arch = open_res(Box::new(store.clone()), filters()).unwrap();

    let two = arch.find("TWO").unwrap();
    let h = arch
        .insert(Some(&two), "MID", 3, FILETYPE_GENERIC, Attributes::NONE)
        .unwrap();
    arch.open(&h, false).unwrap().write_all(b"mid").unwrap();
    arch.remove(&h).unwrap();
    arch.flush().unwrap();

    assert_eq!(store.bytes(), image);
}
