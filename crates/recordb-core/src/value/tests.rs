use crate::value::{FieldMap, RecordId, Value};
use std::cmp::Ordering;

#[test]
fn blank_values_cover_null_empty_text_and_empty_ids() {
    assert!(Value::Null.is_blank());
    assert!(Value::from("").is_blank());
    assert!(Value::Ids(Vec::new()).is_blank());
    assert!(Value::Bool(false).is_blank());

    assert!(!Value::from("x").is_blank());
    assert!(!Value::Int(0).is_blank(), "zero is a real value");
    assert!(!Value::from(RecordId(3)).is_blank());
}

#[test]
fn null_reads_as_empty_relation() {
    assert!(Value::Null.ids().is_empty());
    assert_eq!(Value::from(RecordId(9)).first_id(), Some(RecordId(9)));
}

#[test]
fn numeric_compare_crosses_int_and_float() {
    assert_eq!(Value::Int(2).compare(&Value::Float(2.5)), Some(Ordering::Less));
    assert_eq!(Value::Float(3.0).compare(&Value::Int(3)), Some(Ordering::Equal));
    assert_eq!(Value::Int(1).compare(&Value::from("1")), None);
    assert_eq!(Value::Null.compare(&Value::Null), None);
}

#[test]
fn option_conversion_maps_none_to_null() {
    let none: Option<&str> = None;
    assert_eq!(Value::from(none), Value::Null);
    assert_eq!(Value::from(Some(5i64)), Value::Int(5));
}

#[test]
fn field_map_equality_ignores_order() {
    let a = crate::field_map! { "Name" => "Jane", "Age" => 24 };
    let b = crate::field_map! { "Age" => 24, "Name" => "Jane" };

    assert_eq!(a, b);
    assert_eq!(a.names().collect::<Vec<_>>(), vec!["Name", "Age"]);
}

#[test]
fn field_map_merge_prefers_overlay() {
    let mut base = crate::field_map! { "Name" => "Jane", "Age" => 24 };
    base.merge(crate::field_map! { "Name" => "Copy" });

    assert_eq!(base.value("Name"), &Value::from("Copy"));
    assert_eq!(base.value("Age"), &Value::Int(24));
    assert_eq!(base.value("Missing"), &Value::Null);
}

#[test]
fn field_map_serializes_as_plain_object() {
    let map = FieldMap::new().with("Name", "Jane");
    let json = serde_json::to_string(&map).expect("field map should serialize");

    assert_eq!(json, r#"{"Name":{"Text":"Jane"}}"#);
}
