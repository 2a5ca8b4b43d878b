use crate::constant::{
    ATTRIBUTE_SETS, OPTIONS_ALWAYS_REQUESTED, InitOptions, PduTag, ProtocolVersion, SYNTAXES,
    diagnostic_message, lookup_name, lookup_oid, resolve,
};
use crate::protocol::ber::Oid;

#[test]
fn syntax_names_are_case_insensitive() {
    let upper = lookup_name(SYNTAXES, "USMARC").unwrap();
    let lower = lookup_name(SYNTAXES, "usmarc").unwrap();
    assert_eq!(upper.arcs, lower.arcs);
    assert!(lookup_name(SYNTAXES, "klingon").is_none());
}

#[test]
fn canonical_name_is_first_entry() {
    let marc21 = resolve(SYNTAXES, "marc21").unwrap();
    assert_eq!(lookup_oid(SYNTAXES, &marc21).unwrap().name, "usmarc");

    let xml = resolve(SYNTAXES, "text-xml").unwrap();
    assert_eq!(lookup_oid(SYNTAXES, &xml).unwrap().name, "xml");
}

#[test]
fn resolve_accepts_dotted_oids() {
    let oid = resolve(SYNTAXES, "1.2.840.10003.5.9999").unwrap();
    assert_eq!(oid.to_string(), "1.2.840.10003.5.9999");
    assert!(lookup_oid(SYNTAXES, &oid).is_none());
    assert!(resolve(SYNTAXES, "marc").is_none());
}

#[test]
fn attribute_sets() {
    let bib1: Oid = "1.2.840.10003.3.1".parse().unwrap();
    assert_eq!(resolve(ATTRIBUTE_SETS, "Bib-1"), Some(bib1));
    assert!(resolve(ATTRIBUTE_SETS, "gils").is_some());
}

#[test]
fn requested_options() {
    assert!(OPTIONS_ALWAYS_REQUESTED.contains(InitOptions::SEARCH));
    assert!(OPTIONS_ALWAYS_REQUESTED.contains(InitOptions::PRESENT));
    assert!(OPTIONS_ALWAYS_REQUESTED.contains(InitOptions::DEL_SET));
    assert!(!OPTIONS_ALWAYS_REQUESTED.contains(InitOptions::NAMED_RESULT_SETS));
}

#[test]
fn highest_protocol_version() {
    assert_eq!((ProtocolVersion::V2 | ProtocolVersion::V3).highest(), Some(3));
    assert_eq!(ProtocolVersion::V1.highest(), Some(1));
    assert_eq!(ProtocolVersion::empty().highest(), None);
}

#[test]
fn pdu_tags() {
    assert_eq!(PduTag::from_u32(22), Some(PduTag::SearchRequest));
    assert_eq!(PduTag::from_u32(48), Some(PduTag::Close));
    assert_eq!(PduTag::from_u32(49), None);
}

#[test]
fn diagnostic_messages() {
    assert_eq!(diagnostic_message(109), Some("Database unavailable"));
    assert_eq!(diagnostic_message(100), Some("(unspecified) error"));
    assert_eq!(diagnostic_message(-1), None);
}
