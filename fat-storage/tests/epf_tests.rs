//! EPF mutation behaviour against reference images.

mod common;

use common::{epf_image, SharedMem};
use fat_storage::formats::epf::open_epf;
use fat_storage::{standard_filters, Archive, AttrValue, Attributes, FILETYPE_GENERIC};
use seg_stream::FilterRegistry;
use std::io::Write;
use std::rc::Rc;

const ONE: &[u8] = b"This is one.dat";
const TWO: &[u8] = b"This is two.dat";
const THREE: &[u8] = b"This is three.dat";

fn filters() -> Rc<FilterRegistry> {
    Rc::new(standard_filters())
}

fn initial() -> Vec<u8> {
    epf_image(&[("ONE.DAT", ONE), ("TWO.DAT", TWO)], "Extra data")
}

fn open(store: &SharedMem) -> fat_storage::FatArchive<fat_storage::formats::epf::EpfFormat> {
    open_epf(Box::new(store.clone()), filters()).unwrap()
}

#[test]
fn rename_touches_only_the_name_field() {
    let store = SharedMem::new(&initial());
    let mut arch = open(&store);

    let one = arch.find("ONE.DAT").unwrap();
    arch.rename(&one, "THREE.DAT").unwrap();
    arch.flush().unwrap();

    assert_eq!(
        store.bytes(),
        epf_image(&[("THREE.DAT", ONE), ("TWO.DAT", TWO)], "Extra data")
    );
}

#[test]
fn insert_at_end_lands_before_the_description() {
    let store = SharedMem::new(&initial());
    let mut arch = open(&store);

    let h = arch
        .insert(
            None,
            "THREE.DAT",
            THREE.len() as u64,
            FILETYPE_GENERIC,
            Attributes::NONE,
        )
        .unwrap();
    arch.open(&h, false).unwrap().write_all(THREE).unwrap();
    arch.flush().unwrap();

    assert_eq!(
        store.bytes(),
        epf_image(
            &[("ONE.DAT", ONE), ("TWO.DAT", TWO), ("THREE.DAT", THREE)],
            "Extra data"
        )
    );
}

#[test]
fn insert_in_the_middle() {
    let store = SharedMem::new(&initial());
    let mut arch = open(&store);

    let two = arch.find("TWO.DAT").unwrap();
    let h = arch
        .insert(
            Some(&two),
            "THREE.DAT",
            THREE.len() as u64,
            FILETYPE_GENERIC,
            Attributes::NONE,
        )
        .unwrap();
    arch.open(&h, false).unwrap().write_all(THREE).unwrap();
    arch.flush().unwrap();

    assert_eq!(
        store.bytes(),
        epf_image(
            &[("ONE.DAT", ONE), ("THREE.DAT", THREE), ("TWO.DAT", TWO)],
            "Extra data"
        )
    );
}

#[test]
fn remove_then_remove_leaves_description_only() {
    let store = SharedMem::new(&initial());
    let mut arch = open(&store);

    let one = arch.find("ONE.DAT").unwrap();
    arch.remove(&one).unwrap();
    let two = arch.find("TWO.DAT").unwrap();
    arch.remove(&two).unwrap();
    arch.flush().unwrap();

    assert_eq!(store.bytes(), epf_image(&[], "Extra data"));
}

#[test]
fn resize_moves_the_trailing_table() {
    let store = SharedMem::new(&initial());
    let mut arch = open(&store);

    let one = arch.find("ONE.DAT").unwrap();
    arch.resize(&one, 10, 10).unwrap();
    arch.flush().unwrap();

    assert_eq!(
        store.bytes(),
        epf_image(&[("ONE.DAT", &ONE[..10]), ("TWO.DAT", TWO)], "Extra data")
    );
}

#[test]
fn compressed_insert_records_the_filter_name() {
    let store = SharedMem::new(&initial());
    let mut arch = open(&store);

    let h = arch
        .insert(None, "Z.DAT", 4, FILETYPE_GENERIC, Attributes::COMPRESSED)
        .unwrap();
    assert_eq!(h.borrow().filter, "lzw-epfs");
    assert_eq!(arch.supported_attrs(), Attributes::COMPRESSED);

    // The flag survives a flush and re-parse.
    arch.flush().unwrap();
    let reopened = open(&store);
    let z = reopened.find("Z.DAT").unwrap();
    assert!(z.borrow().attrs.contains(Attributes::COMPRESSED));
    assert_eq!(z.borrow().filter, "lzw-epfs");
}

#[test]
fn description_attribute_grows_the_gap() {
    let store = SharedMem::new(&initial());
    let mut arch = open(&store);

    arch.set_attribute(
        0,
        AttrValue::Text {
            value: "A much longer description".to_string(),
            max_len: None,
        },
    )
    .unwrap();
    arch.flush().unwrap();

    assert_eq!(
        store.bytes(),
        epf_image(
            &[("ONE.DAT", ONE), ("TWO.DAT", TWO)],
            "A much longer description"
        )
    );

    // And shrink it again.
    let mut arch = open(&store);
    arch.set_attribute(
        0,
        AttrValue::Text {
            value: "tiny".to_string(),
            max_len: None,
        },
    )
    .unwrap();
    arch.flush().unwrap();
    assert_eq!(
        store.bytes(),
        epf_image(&[("ONE.DAT", ONE), ("TWO.DAT", TWO)], "tiny")
    );
}
