//! POD mutation behaviour against reference images.

mod common;

use common::SharedMem;
use fat_storage::formats::pod::open_pod;
use fat_storage::{standard_filters, Archive, AttrValue, Attributes, Error, FILETYPE_GENERIC};
use seg_stream::FilterRegistry;
use std::io::Write;
use std::rc::Rc;

fn filters() -> Rc<FilterRegistry> {
    Rc::new(standard_filters())
}

fn pod_image(desc: &str, files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(files.len() as u32).to_le_bytes());
    let mut d = desc.as_bytes().to_vec();
    d.resize(80, 0);
    out.extend_from_slice(&d);
    let mut off = 84 + files.len() as u32 * 40;
    for (name, data) in files {
        let mut n = name.as_bytes().to_vec();
        n.resize(32, 0);
        out.extend_from_slice(&n);
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&off.to_le_bytes());
        off += data.len() as u32;
    }
    for (_, data) in files {
        out.extend_from_slice(data);
    }
    out
}

fn open(store: &SharedMem) -> fat_storage::FatArchive<fat_storage::formats::pod::PodFormat> {
    open_pod(Box::new(store.clone()), filters()).unwrap()
}

#[test]
fn insert_updates_offsets_and_count() {
    let store = SharedMem::new(&pod_image("demo", &[("A.LVL", b"aaaa"), ("B.LVL", b"bb")]));
    let mut arch = open(&store);

    let b = arch.find("B.LVL").unwrap();
    let h = arch
        .insert(Some(&b), "MID.LVL", 3, FILETYPE_GENERIC, Attributes::NONE)
        .unwrap();
    arch.open(&h, false).unwrap().write_all(b"mid").unwrap();
    arch.flush().unwrap();

    assert_eq!(
        store.bytes(),
        pod_image("demo", &[("A.LVL", b"aaaa"), ("MID.LVL", b"mid"), ("B.LVL", b"bb")])
    );
}

#[test]
fn remove_compacts_the_table() {
    let store = SharedMem::new(&pod_image("demo", &[("A.LVL", b"aaaa"), ("B.LVL", b"bb")]));
    let mut arch = open(&store);

    let a = arch.find("A.LVL").unwrap();
    arch.remove(&a).unwrap();
    arch.flush().unwrap();

    assert_eq!(store.bytes(), pod_image("demo", &[("B.LVL", b"bb")]));
}

#[test]
fn description_persists_at_flush() {
    let store = SharedMem::new(&pod_image("old words", &[("A.LVL", b"aaaa")]));
    let mut arch = open(&store);

    arch.set_attribute(
        0,
        AttrValue::Text {
            value: "new words".to_string(),
            max_len: None,
        },
    )
    .unwrap();
    arch.flush().unwrap();

    assert_eq!(store.bytes(), pod_image("new words", &[("A.LVL", b"aaaa")]));
}

#[test]
fn overlong_description_is_rejected() {
    let store = SharedMem::new(&pod_image("ok", &[]));
    let mut arch = open(&store);
    let err = arch
        .set_attribute(
            0,
            AttrValue::Text {
                value: "x".repeat(81),
                max_len: None,
            },
        )
        .unwrap_err();
    assert!(matches!(err, Error::AttributeValue(_)));
    assert_eq!(arch.attributes()[0].text_value(), Some("ok"));
}
