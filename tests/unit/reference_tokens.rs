use tbl_engine::reference::{ParsedReference, ReferenceKind, apply_suffix, extract_id, parse, strip_suffixes, trailing_suffix};

#[test]
fn test_prefix_table() {
    let cases = [
        ("width", ReferenceKind::Field, "width"),
        ("@value.width", ReferenceKind::Field, "width"),
        ("node-formula:f-area", ReferenceKind::Formula, "f-area"),
        ("@value.node-formula:f-area", ReferenceKind::Formula, "f-area"),
        ("condition:c-pitch", ReferenceKind::Condition, "c-pitch"),
        ("node-condition:c-pitch", ReferenceKind::Condition, "c-pitch"),
        ("@table.t-supplier", ReferenceKind::Table, "t-supplier"),
        ("node-table:t-supplier", ReferenceKind::Table, "t-supplier"),
        ("table:t-supplier", ReferenceKind::Table, "t-supplier"),
        ("node-variable:roofArea", ReferenceKind::Variable, "roofArea"),
    ];

    for (token, kind, id) in cases {
        let parsed = parse(token).unwrap_or_else(|| panic!("{token} should parse"));
        assert_eq!(parsed.kind, kind, "{token}");
        assert_eq!(parsed.id, id, "{token}");
        assert_eq!(parsed.to_string(), token, "{token} should re-serialise unchanged");
    }
}

#[test]
fn test_rejected_tokens() {
    for token in ["", "node-formula:", "@value.", "two words", "@table."] {
        assert!(parse(token).is_none(), "{token:?} should not parse");
        assert_eq!(apply_suffix(token, 1), token);
    }
}

#[test]
fn test_suffixes_compose() {
    let once = apply_suffix("@value.node-table:t-supplier", 1);
    assert_eq!(once, "@value.node-table:t-supplier-1");
    let twice = apply_suffix(&once, 2);
    assert_eq!(twice, "@value.node-table:t-supplier-1-2");
    assert_eq!(extract_id(&twice).as_deref(), Some("t-supplier-1-2"));

    assert_eq!(apply_suffix("width", 0), "width");
}

#[test]
fn test_trailing_suffix_helpers() {
    assert_eq!(trailing_suffix("pan-12"), Some(12));
    assert_eq!(trailing_suffix("pan"), None);
    assert_eq!(trailing_suffix("pan-a"), None);
    assert_eq!(trailing_suffix("-3"), None);
    assert_eq!(strip_suffixes("size-1-2"), "size");
    assert_eq!(strip_suffixes("f-area"), "f-area");
}

#[test]
fn test_constructors_use_canonical_prefix() {
    assert_eq!(ParsedReference::new(ReferenceKind::Table, "t").to_string(), "@table.t");
    assert_eq!(ParsedReference::new(ReferenceKind::Condition, "c").to_string(), "condition:c");
    assert_eq!(ParsedReference::field("w").to_string(), "@value.w");

    let table = parse("table:t").unwrap();
    assert_eq!(table.retarget("t-3").to_string(), "table:t-3");
}

#[test]
fn test_serde_uses_wire_form() {
    let parsed: ParsedReference = serde_json::from_str(r#""node-formula:f-area""#).unwrap();
    assert_eq!(parsed.kind, ReferenceKind::Formula);
    assert_eq!(serde_json::to_string(&parsed).unwrap(), r#""node-formula:f-area""#);
    assert!(serde_json::from_str::<ParsedReference>(r#""""#).is_err());
}
