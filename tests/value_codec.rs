use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::json;

use redis_om::value::{
    datetime_to_epoch, decode_datetime, decode_hash, decode_json, encode_hash, encode_json,
};
use redis_om::{FieldDef, FieldType, RecordDef};

fn hash_def() -> RecordDef {
    RecordDef::hash("Customer")
        .field(FieldDef::new("pk", FieldType::String).primary_key())
        .field(FieldDef::new("first_name", FieldType::String))
        .field(FieldDef::new("age", FieldType::Integer).indexed().sortable())
        .field(FieldDef::new("balance", FieldType::Float))
        .field(FieldDef::new("active", FieldType::Boolean).indexed())
        .field(FieldDef::new("joined", FieldType::DateTime).indexed())
        .field(FieldDef::new("skills", FieldType::List(Box::new(FieldType::String))).indexed())
        .field(FieldDef::new("note", FieldType::Optional(Box::new(FieldType::String))))
}

#[test]
fn hash_round_trip_preserves_every_scalar() {
    let def = hash_def();
    let record = json!({
        "pk": "01ABC",
        "first_name": "Ann",
        "age": 38,
        "balance": 12.5,
        "active": true,
        "joined": "2023-10-19T14:30:00+00:00",
        "skills": ["rust", "go"],
        "note": null,
    });
    let pairs = encode_hash(&def, &record).unwrap();
    let raw: HashMap<String, Vec<u8>> = pairs.into_iter().collect();
    // nulls are elided from the hash
    assert!(!raw.contains_key("note"));
    // booleans encode as "0"/"1", datetimes as epoch seconds
    assert_eq!(raw["active"], b"1");
    assert_eq!(raw["joined"], b"1697725800");

    let decoded = decode_hash(&def, &raw).unwrap();
    assert_eq!(decoded["pk"], json!("01ABC"));
    assert_eq!(decoded["age"], json!(38));
    assert_eq!(decoded["balance"], json!(12.5));
    assert_eq!(decoded["active"], json!(true));
    assert_eq!(decoded["joined"], json!("2023-10-19T14:30:00+00:00"));
    assert_eq!(decoded["skills"], json!(["rust", "go"]));
}

#[test]
fn json_round_trip_with_embedded_record() {
    let address = RecordDef::embedded("Address")
        .field(FieldDef::new("city", FieldType::String).indexed())
        .field(FieldDef::new("since", FieldType::DateTime));
    let def = RecordDef::json("Customer")
        .field(FieldDef::new("pk", FieldType::String).primary_key())
        .field(FieldDef::new("address", FieldType::Embedded(Box::new(address))));
    let record = json!({
        "pk": "01ABC",
        "address": {"city": "SA", "since": "2020-01-02T03:04:05+00:00"},
    });
    let stored = encode_json(&def, record.clone()).unwrap();
    assert!(stored["address"]["since"].is_number(), "datetimes store as numbers");
    let decoded = decode_json(&def, stored).unwrap();
    assert_eq!(decoded, record);
}

#[test]
fn datetime_iso_and_numeric_forms_decode_identically() {
    let instants = [
        "2020-01-01T00:00:00Z",
        "2023-10-19T14:30:00.123456Z",
        "1999-12-31T23:59:59+02:00",
    ];
    for iso in instants {
        let t: DateTime<Utc> = DateTime::parse_from_rfc3339(iso).unwrap().with_timezone(&Utc);
        let from_iso = decode_datetime(&json!(iso)).unwrap();
        let from_epoch = decode_datetime(&json!(datetime_to_epoch(&t))).unwrap();
        let delta = (datetime_to_epoch(&from_iso) - datetime_to_epoch(&from_epoch)).abs();
        assert!(delta < 1e-6, "{iso}: {delta}");
        assert_eq!(from_iso, t);
    }
}

#[test]
fn legacy_hash_datetime_decodes_without_offset() {
    let def = RecordDef::hash("T")
        .field(FieldDef::new("pk", FieldType::String).primary_key())
        .field(FieldDef::new("seen", FieldType::DateTime));
    let mut raw = HashMap::new();
    raw.insert("pk".to_string(), b"1".to_vec());
    // pre-transition records carry naive ISO strings
    raw.insert("seen".to_string(), b"2023-10-19T14:30:00".to_vec());
    let decoded = decode_hash(&def, &raw).unwrap();
    assert_eq!(decoded["seen"], json!("2023-10-19T14:30:00+00:00"));
}

#[test]
fn date_fields_encode_as_utc_midnight() {
    let def = RecordDef::hash("T")
        .field(FieldDef::new("pk", FieldType::String).primary_key())
        .field(FieldDef::new("born", FieldType::Date));
    let record = json!({"pk": "1", "born": "2023-10-19"});
    let pairs = encode_hash(&def, &record).unwrap();
    let raw: HashMap<String, Vec<u8>> = pairs.into_iter().collect();
    assert_eq!(raw["born"], b"1697673600");
    let decoded = decode_hash(&def, &raw).unwrap();
    assert_eq!(decoded["born"], json!("2023-10-19"));
}

#[test]
fn typed_records_survive_serde_round_trip() {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Customer {
        pk: String,
        age: i64,
        active: bool,
        joined: DateTime<Utc>,
        skills: Vec<String>,
    }

    let def = RecordDef::hash("Customer")
        .field(FieldDef::new("pk", FieldType::String).primary_key())
        .field(FieldDef::new("age", FieldType::Integer).indexed())
        .field(FieldDef::new("active", FieldType::Boolean))
        .field(FieldDef::new("joined", FieldType::DateTime).indexed())
        .field(FieldDef::new("skills", FieldType::List(Box::new(FieldType::String))));

    let original = Customer {
        pk: "01ABC".into(),
        age: 38,
        active: false,
        joined: DateTime::parse_from_rfc3339("2023-10-19T14:30:00Z")
            .unwrap()
            .with_timezone(&Utc),
        skills: vec!["rust".into()],
    };
    let tree = serde_json::to_value(&original).unwrap();
    let pairs = encode_hash(&def, &tree).unwrap();
    let raw: HashMap<String, Vec<u8>> = pairs.into_iter().collect();
    let back: Customer = serde_json::from_value(decode_hash(&def, &raw).unwrap()).unwrap();
    assert_eq!(back, original);
}
