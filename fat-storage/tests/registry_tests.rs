//! Format sniffing through the standard registry.

mod common;

use common::{bash_image, grp_image, wad_image, SharedMem};
use fat_storage::{Archive, Attributes, Certainty, FormatRegistry, SuppData, FILETYPE_GENERIC};
use seg_stream::{MemStream, Stream};

fn identify_code(data: Vec<u8>) -> Option<&'static str> {
    let reg = FormatRegistry::standard();
    let mut m = MemStream::from_vec(data);
    reg.identify(&mut m as &mut dyn Stream)
        .unwrap()
        .map(|t| t.code())
}

#[test]
fn identifies_signature_formats() {
    assert_eq!(
        identify_code(wad_image(&[("ONE", b"aaaa")])),
        Some("wad-doom")
    );
    assert_eq!(
        identify_code(grp_image(&[("A.DAT", b"xy")])),
        Some("grp-duke3d")
    );

    let mut epf = b"EPFS".to_vec();
    epf.extend_from_slice(&11u32.to_le_bytes());
    epf.push(0);
    epf.extend_from_slice(&0u16.to_le_bytes());
    assert_eq!(identify_code(epf), Some("epf-lionking"));
}

#[test]
fn identifies_headerless_bash_by_structure() {
    let data = bash_image(&[(0, "FOO", b"some map info", 0)]);
    assert_eq!(identify_code(data), Some("dat-bash"));
}

#[test]
fn garbage_matches_nothing_definite() {
    // High bytes fail every structural walk and every signature.
    let reg = FormatRegistry::standard();
    let mut m = MemStream::from_vec(vec![0x81; 64]);
    let found = reg.identify(&mut m as &mut dyn Stream).unwrap();
    // Doofus always answers Unsure, so the fallback match is at most that.
    if let Some(t) = found {
        assert_eq!(
            t.is_instance(&mut m as &mut dyn Stream).unwrap(),
            Certainty::Unsure
        );
    }
}

#[test]
fn by_code_finds_plugins() {
    let reg = FormatRegistry::standard();
    assert!(reg.by_code("rff-blood").is_some());
    assert!(reg.by_code("res-stellar7").is_some());
    assert!(reg.by_code("zip").is_none());
    assert_eq!(reg.iter().count(), 8);
}

#[test]
fn open_via_registry_round_trips() {
    let store = SharedMem::new(&wad_image(&[("ONE", b"aaaa")]));
    let reg = FormatRegistry::standard();
    let t = {
        let mut probe = store.clone();
        reg.identify(&mut probe as &mut dyn Stream).unwrap().unwrap()
    };
    let mut arch = t.open(Box::new(store.clone()), SuppData::new()).unwrap();
    let one = arch.find("ONE").unwrap();
    arch.insert(Some(&one), "ZERO", 2, FILETYPE_GENERIC, Attributes::NONE)
        .unwrap();
    arch.flush().unwrap();

    assert_eq!(
        store.bytes(),
        wad_image(&[("ZERO", b"\0\0"), ("ONE", b"aaaa")])
    );
}
