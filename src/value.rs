//! Value codec: encode/decode record field values for Hash storage (flat
//! strings, binary-safe) and JSON storage (native JSON), guided by the
//! declared record definition.
//!
//! Records move through `serde_json::Value` trees: a record serializes to a
//! tree, the codec rewrites the tree per field type (datetimes to epoch
//! seconds, vectors to packed bytes or base64), and the inverse rewrite
//! feeds deserialization. Legacy ISO-8601 datetime strings are accepted on
//! read and normalized.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use crate::error::{Error, Result, SchemaError};
use crate::schema::fields::{FieldDef, FieldType, RecordDef, StorageLayout, VectorType};

// ── Datetime encoding ───────────────────────────────────────────────────

/// Parse a stored datetime in either supported shape: numeric seconds since
/// epoch (the current format) or an ISO-8601 / RFC 3339 string (legacy).
pub fn decode_datetime(value: &Value) -> Result<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let secs = n
                .as_f64()
                .ok_or_else(|| Error::Validation(format!("datetime out of range: {n}")))?;
            epoch_to_datetime(secs)
        }
        Value::String(s) => parse_datetime_string(s),
        other => Err(Error::Validation(format!(
            "expected datetime as number or string, got {other}"
        ))),
    }
}

pub fn parse_datetime_string(s: &str) -> Result<DateTime<Utc>> {
    // Numeric strings occur in hash fields, where everything is a string.
    if let Ok(secs) = s.parse::<f64>() {
        return epoch_to_datetime(secs);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    // ISO-8601 without an offset: interpret as UTC.
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    Err(Error::Validation(format!("unparseable datetime: {s:?}")))
}

pub fn epoch_to_datetime(secs: f64) -> Result<DateTime<Utc>> {
    let whole = secs.trunc() as i64;
    let nanos = ((secs - secs.trunc()) * 1e9).round() as u32;
    DateTime::from_timestamp(whole, nanos)
        .ok_or_else(|| Error::Validation(format!("epoch seconds out of range: {secs}")))
}

pub fn datetime_to_epoch(dt: &DateTime<Utc>) -> f64 {
    dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) / 1e9
}

/// A date encodes as the UTC midnight timestamp of that day.
pub fn decode_date(value: &Value) -> Result<NaiveDate> {
    match value {
        Value::Number(_) => Ok(decode_datetime(value)?.date_naive()),
        Value::String(s) => {
            if let Ok(secs) = s.parse::<f64>() {
                return Ok(epoch_to_datetime(secs)?.date_naive());
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|_| Error::Validation(format!("unparseable date: {s:?}")))
        }
        other => Err(Error::Validation(format!("expected date, got {other}"))),
    }
}

pub fn date_to_epoch(date: NaiveDate) -> f64 {
    let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
    Utc.from_utc_datetime(&midnight).timestamp() as f64
}

fn number_from_f64(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

// ── Vector packing ──────────────────────────────────────────────────────

/// Pack a float array into little-endian bytes for the declared dtype.
pub fn pack_vector(values: &[f64], dtype: VectorType) -> Vec<u8> {
    match dtype {
        VectorType::Float32 => values
            .iter()
            .flat_map(|v| (*v as f32).to_le_bytes())
            .collect(),
        VectorType::Float64 => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
    }
}

pub fn unpack_vector(bytes: &[u8], dtype: VectorType) -> Result<Vec<f64>> {
    let width = match dtype {
        VectorType::Float32 => 4,
        VectorType::Float64 => 8,
    };
    if bytes.len() % width != 0 {
        return Err(Error::Validation(format!(
            "vector payload of {} bytes is not a multiple of {width}",
            bytes.len()
        )));
    }
    let mut out = Vec::with_capacity(bytes.len() / width);
    for chunk in bytes.chunks_exact(width) {
        match dtype {
            VectorType::Float32 => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(chunk);
                out.push(f64::from(f32::from_le_bytes(buf)));
            }
            VectorType::Float64 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(chunk);
                out.push(f64::from_le_bytes(buf));
            }
        }
    }
    Ok(out)
}

fn vector_values(field: &str, value: &Value) -> Result<Vec<f64>> {
    let arr = value
        .as_array()
        .ok_or_else(|| Error::Validation(format!("field '{field}' is not a float array")))?;
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        match item.as_f64() {
            Some(f) => out.push(f),
            None => {
                return Err(Error::Validation(format!(
                    "field '{field}' has a non-numeric element"
                )))
            }
        }
    }
    Ok(out)
}

fn field_dtype(field: &FieldDef) -> VectorType {
    field
        .options
        .vector
        .as_ref()
        .map(|v| v.dtype)
        .unwrap_or(VectorType::Float32)
}

// ── Hash layout ─────────────────────────────────────────────────────────

fn check_separator(field: &FieldDef, value: &str) -> Result<()> {
    // Full-text values are tokenized, not split; anything goes there.
    if field.options.full_text_search {
        return Ok(());
    }
    let sep = field.options.separator;
    if value.contains(sep) {
        return Err(SchemaError::SeparatorInValue { field: field.name.clone(), separator: sep }.into());
    }
    Ok(())
}

fn encode_hash_field(field: &FieldDef, value: &Value) -> Result<Option<Vec<u8>>> {
    if value.is_null() {
        // Nulls are elided from the hash.
        return Ok(None);
    }
    let encoded = match field.field_type.unwrap_optional() {
        FieldType::String | FieldType::Enum(_) | FieldType::Geo => {
            let s = value
                .as_str()
                .ok_or_else(|| Error::Validation(format!("field '{}' is not a string", field.name)))?;
            if matches!(field.field_type.unwrap_optional(), FieldType::String | FieldType::Enum(_)) {
                check_separator(field, s)?;
            }
            s.as_bytes().to_vec()
        }
        FieldType::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => n.to_string().into_bytes(),
            _ => return Err(Error::Validation(format!("field '{}' is not an integer", field.name))),
        },
        FieldType::Float => match value.as_f64() {
            Some(f) => format_float(f).into_bytes(),
            None => return Err(Error::Validation(format!("field '{}' is not a number", field.name))),
        },
        FieldType::Boolean => match value.as_bool() {
            Some(true) => b"1".to_vec(),
            Some(false) => b"0".to_vec(),
            None => return Err(Error::Validation(format!("field '{}' is not a boolean", field.name))),
        },
        FieldType::DateTime => {
            let dt = decode_datetime(value)?;
            format_float(datetime_to_epoch(&dt)).into_bytes()
        }
        FieldType::Date => {
            let date = decode_date(value)?;
            format_float(date_to_epoch(date)).into_bytes()
        }
        FieldType::Vector => {
            let floats = vector_values(&field.name, value)?;
            pack_vector(&floats, field_dtype(field))
        }
        FieldType::List(_) => {
            let arr = value
                .as_array()
                .ok_or_else(|| Error::Validation(format!("field '{}' is not a list", field.name)))?;
            let mut parts = Vec::with_capacity(arr.len());
            for item in arr {
                let s = item.as_str().ok_or_else(|| {
                    Error::Validation(format!("field '{}' has a non-string element", field.name))
                })?;
                check_separator(field, s)?;
                parts.push(s.to_string());
            }
            parts.join(&field.options.separator.to_string()).into_bytes()
        }
        FieldType::Embedded(_) | FieldType::Json => {
            return Err(SchemaError::ContainerInHashModel { field: field.name.clone() }.into())
        }
        FieldType::Optional(_) => unreachable!("unwrap_optional strips Optional"),
    };
    Ok(Some(encoded))
}

/// Encode a serialized record into HSET field/value pairs.
pub fn encode_hash(def: &RecordDef, record: &Value) -> Result<Vec<(String, Vec<u8>)>> {
    let map = record
        .as_object()
        .ok_or_else(|| Error::Validation("record did not serialize to an object".into()))?;
    let mut pairs = Vec::with_capacity(def.fields.len());
    for field in &def.fields {
        let value = map.get(&field.name).unwrap_or(&Value::Null);
        if let Some(bytes) = encode_hash_field(field, value)? {
            pairs.push((field.name.clone(), bytes));
        }
    }
    Ok(pairs)
}

/// Decode one hash field back into the JSON shape serde expects.
pub fn decode_hash_field(field: &FieldDef, raw: &[u8]) -> Result<Value> {
    let as_str = || -> Result<&str> {
        std::str::from_utf8(raw)
            .map_err(|_| Error::Validation(format!("field '{}' is not valid utf-8", field.name)))
    };
    let value = match field.field_type.unwrap_optional() {
        FieldType::String | FieldType::Enum(_) | FieldType::Geo => Value::String(as_str()?.to_string()),
        FieldType::Integer => {
            let n: i64 = as_str()?.parse().map_err(|_| {
                Error::Validation(format!("field '{}' is not an integer", field.name))
            })?;
            Value::Number(n.into())
        }
        FieldType::Float => {
            let f: f64 = as_str()?.parse().map_err(|_| {
                Error::Validation(format!("field '{}' is not a number", field.name))
            })?;
            number_from_f64(f)
        }
        FieldType::Boolean => Value::Bool(as_str()? == "1"),
        FieldType::DateTime => {
            let dt = parse_datetime_string(as_str()?)?;
            Value::String(dt.to_rfc3339())
        }
        FieldType::Date => {
            let date = decode_date(&Value::String(as_str()?.to_string()))?;
            Value::String(date.format("%Y-%m-%d").to_string())
        }
        FieldType::Vector => {
            let floats = unpack_vector(raw, field_dtype(field))?;
            Value::Array(floats.into_iter().map(number_from_f64).collect())
        }
        FieldType::List(_) => {
            let s = as_str()?;
            if s.is_empty() {
                Value::Array(Vec::new())
            } else {
                Value::Array(
                    s.split(field.options.separator)
                        .map(|part| Value::String(part.to_string()))
                        .collect(),
                )
            }
        }
        FieldType::Embedded(_) | FieldType::Json => {
            return Err(SchemaError::ContainerInHashModel { field: field.name.clone() }.into())
        }
        FieldType::Optional(_) => unreachable!("unwrap_optional strips Optional"),
    };
    Ok(value)
}

/// Decode a full HGETALL reply into the JSON tree a record deserializes from.
pub fn decode_hash(def: &RecordDef, raw: &HashMap<String, Vec<u8>>) -> Result<Value> {
    let mut map = serde_json::Map::with_capacity(raw.len());
    for field in &def.fields {
        if let Some(bytes) = raw.get(&field.name) {
            map.insert(field.name.clone(), decode_hash_field(field, bytes)?);
        }
    }
    Ok(Value::Object(map))
}

// ── JSON layout ─────────────────────────────────────────────────────────

fn encode_json_field(field: &FieldDef, value: Value) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let encoded = match field.field_type.unwrap_optional() {
        FieldType::String
        | FieldType::Enum(_)
        | FieldType::Geo
        | FieldType::Integer
        | FieldType::Float
        | FieldType::Json => value,
        // Stored as 0/1 so the index can treat the field as numeric.
        FieldType::Boolean => match value.as_bool() {
            Some(b) => Value::Number(if b { 1.into() } else { 0.into() }),
            None => {
                return Err(Error::Validation(format!(
                    "field '{}' is not a boolean",
                    field.name
                )))
            }
        },
        FieldType::DateTime => {
            let dt = decode_datetime(&value)?;
            number_from_f64(datetime_to_epoch(&dt))
        }
        FieldType::Date => {
            let date = decode_date(&value)?;
            number_from_f64(date_to_epoch(date))
        }
        FieldType::Vector => {
            let floats = vector_values(&field.name, &value)?;
            Value::String(BASE64.encode(pack_vector(&floats, field_dtype(field))))
        }
        FieldType::List(element) => {
            let arr = match value {
                Value::Array(items) => items,
                _ => return Err(Error::Validation(format!("field '{}' is not a list", field.name))),
            };
            let inner = FieldDef::new(field.name.clone(), element.as_ref().clone());
            let mut out = Vec::with_capacity(arr.len());
            for item in arr {
                out.push(encode_json_field(&inner, item)?);
            }
            Value::Array(out)
        }
        FieldType::Embedded(sub) => encode_json(sub, value)?,
        FieldType::Optional(_) => unreachable!("unwrap_optional strips Optional"),
    };
    Ok(encoded)
}

/// Encode a serialized record into the JSON document stored under the key.
pub fn encode_json(def: &RecordDef, record: Value) -> Result<Value> {
    let mut map = match record {
        Value::Object(map) => map,
        _ => return Err(Error::Validation("record did not serialize to an object".into())),
    };
    for field in &def.fields {
        if let Some(value) = map.remove(&field.name) {
            map.insert(field.name.clone(), encode_json_field(field, value)?);
        }
    }
    Ok(Value::Object(map))
}

fn decode_json_field(field: &FieldDef, value: Value) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let decoded = match field.field_type.unwrap_optional() {
        FieldType::String
        | FieldType::Enum(_)
        | FieldType::Geo
        | FieldType::Integer
        | FieldType::Float
        | FieldType::Json => value,
        FieldType::Boolean => match &value {
            Value::Number(n) => Value::Bool(n.as_f64().unwrap_or(0.0) != 0.0),
            // Documents written before the numeric encoding carry booleans.
            Value::Bool(_) => value,
            other => {
                return Err(Error::Validation(format!(
                    "field '{}' holds neither 0/1 nor a boolean: {other}",
                    field.name
                )))
            }
        },
        FieldType::DateTime => {
            // Accepts both the numeric form and legacy ISO strings.
            let dt = decode_datetime(&value)?;
            Value::String(dt.to_rfc3339())
        }
        FieldType::Date => {
            let date = decode_date(&value)?;
            Value::String(date.format("%Y-%m-%d").to_string())
        }
        FieldType::Vector => match value {
            Value::String(b64) => {
                let bytes = BASE64
                    .decode(b64.as_bytes())
                    .map_err(|e| Error::Validation(format!("field '{}': {e}", field.name)))?;
                let floats = unpack_vector(&bytes, field_dtype(field))?;
                Value::Array(floats.into_iter().map(number_from_f64).collect())
            }
            // Already a float array (pre-transition document).
            Value::Array(items) => Value::Array(items),
            other => {
                return Err(Error::Validation(format!(
                    "field '{}' holds neither base64 nor an array: {other}",
                    field.name
                )))
            }
        },
        FieldType::List(element) => {
            let arr = match value {
                Value::Array(items) => items,
                _ => return Err(Error::Validation(format!("field '{}' is not a list", field.name))),
            };
            let inner = FieldDef::new(field.name.clone(), element.as_ref().clone());
            let mut out = Vec::with_capacity(arr.len());
            for item in arr {
                out.push(decode_json_field(&inner, item)?);
            }
            Value::Array(out)
        }
        FieldType::Embedded(sub) => decode_json(sub, value)?,
        FieldType::Optional(_) => unreachable!("unwrap_optional strips Optional"),
    };
    Ok(decoded)
}

/// Decode a stored JSON document into the tree a record deserializes from.
pub fn decode_json(def: &RecordDef, stored: Value) -> Result<Value> {
    let mut map = match stored {
        Value::Object(map) => map,
        other => return Err(Error::Validation(format!("stored document is not an object: {other}"))),
    };
    for field in &def.fields {
        if let Some(value) = map.remove(&field.name) {
            map.insert(field.name.clone(), decode_json_field(field, value)?);
        }
    }
    Ok(Value::Object(map))
}

/// Extract a dotted path (`address.city`) from a decoded document.
pub fn extract_path<'v>(doc: &'v Value, path: &str) -> Option<&'v Value> {
    let mut cursor = doc;
    for segment in path.split('.') {
        cursor = cursor.as_object()?.get(segment)?;
    }
    Some(cursor)
}

/// Format a float the way the server stores numerics: integral values drop
/// the fraction so `38.0` round-trips as `38`.
pub fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{f}")
    }
}

/// Typed decode of a single projected value returned by the server for a
/// `RETURN` field, given the declared type of the underlying record field
/// and the storage layout. Hash indexes return the stored flat string;
/// JSON indexes return the JSON-serialized value (quoted strings, literal
/// array syntax), so each layout routes through its own field decoder.
pub fn decode_projected(field: &FieldDef, layout: StorageLayout, raw: &str) -> Result<Value> {
    if field.field_type.unwrap_optional() == &FieldType::Vector {
        return Err(Error::Validation(format!(
            "vector field '{}' cannot be projected",
            field.name
        )));
    }
    match layout {
        StorageLayout::Hash => decode_hash_field(field, raw.as_bytes()),
        StorageLayout::Json => {
            let parsed: Value = serde_json::from_str(raw)
                .unwrap_or_else(|_| Value::String(raw.to_string()));
            decode_json_field(field, parsed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::fields::{DistanceMetric, IndexOptions, VectorOptions};
    use serde_json::json;

    fn field(name: &str, ft: FieldType) -> FieldDef {
        FieldDef::new(name, ft)
    }

    #[test]
    fn datetime_forms_agree() {
        let iso = Value::String("2023-10-19T14:30:00.250Z".to_string());
        let numeric = json!(1697725800.25);
        let a = decode_datetime(&iso).unwrap();
        let b = decode_datetime(&numeric).unwrap();
        assert!((datetime_to_epoch(&a) - datetime_to_epoch(&b)).abs() < 1e-6);
    }

    #[test]
    fn naive_iso_is_utc() {
        let dt = parse_datetime_string("2023-10-19T14:30:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2023-10-19T14:30:00+00:00");
    }

    #[test]
    fn date_is_utc_midnight() {
        let secs = date_to_epoch(NaiveDate::from_ymd_opt(2023, 10, 19).unwrap());
        let back = epoch_to_datetime(secs).unwrap();
        assert_eq!(back.to_rfc3339(), "2023-10-19T00:00:00+00:00");
    }

    #[test]
    fn hash_scalar_round_trip() {
        let def = RecordDef::hash("T")
            .field(field("name", FieldType::String))
            .field(field("age", FieldType::Integer))
            .field(field("score", FieldType::Float))
            .field(field("active", FieldType::Boolean));
        let record = json!({"name": "A", "age": 38, "score": 1.5, "active": true});
        let pairs = encode_hash(&def, &record).unwrap();
        let raw: HashMap<String, Vec<u8>> = pairs.into_iter().collect();
        assert_eq!(raw["active"], b"1");
        assert_eq!(raw["age"], b"38");
        let back = decode_hash(&def, &raw).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn hash_nulls_are_elided() {
        let def = RecordDef::hash("T")
            .field(field("bio", FieldType::Optional(Box::new(FieldType::String))));
        let pairs = encode_hash(&def, &json!({"bio": null})).unwrap();
        assert!(pairs.is_empty());
    }

    #[test]
    fn hash_datetime_encodes_as_epoch() {
        let def = RecordDef::hash("T").field(field("created", FieldType::DateTime));
        let pairs = encode_hash(&def, &json!({"created": "2023-10-19T14:30:00Z"})).unwrap();
        let text = String::from_utf8(pairs[0].1.clone()).unwrap();
        assert_eq!(text, "1697725800");
        // legacy ISO value decodes too
        let mut raw = HashMap::new();
        raw.insert("created".to_string(), b"2023-10-19T14:30:00".to_vec());
        let back = decode_hash(&def, &raw).unwrap();
        assert_eq!(back["created"], json!("2023-10-19T14:30:00+00:00"));
    }

    #[test]
    fn separator_in_tag_value_is_rejected() {
        let def = RecordDef::hash("T").field(field("tag", FieldType::String));
        let err = encode_hash(&def, &json!({"tag": "a|b"})).unwrap_err();
        assert!(matches!(err, Error::Schema(SchemaError::SeparatorInValue { .. })));
    }

    #[test]
    fn full_text_values_may_contain_separator() {
        let mut f = field("title", FieldType::String);
        f.options = IndexOptions { full_text_search: true, ..Default::default() };
        let def = RecordDef::hash("T").field(f);
        assert!(encode_hash(&def, &json!({"title": "a|b c"})).is_ok());
    }

    #[test]
    fn string_list_round_trip() {
        let def = RecordDef::hash("T")
            .field(field("skills", FieldType::List(Box::new(FieldType::String))));
        let record = json!({"skills": ["rust", "go"]});
        let pairs = encode_hash(&def, &record).unwrap();
        assert_eq!(pairs[0].1, b"rust|go");
        let raw: HashMap<String, Vec<u8>> = pairs.into_iter().collect();
        assert_eq!(decode_hash(&def, &raw).unwrap(), record);
    }

    #[test]
    fn vector_round_trip_hash_and_json() {
        let opts = VectorOptions::flat(3, VectorType::Float32, DistanceMetric::Cosine);
        let f = FieldDef::new("embedding", FieldType::Vector).vector(opts);
        let def = RecordDef::hash("T").field(f.clone());
        let record = json!({"embedding": [1.0, -2.0, 0.5]});
        let pairs = encode_hash(&def, &record).unwrap();
        assert_eq!(pairs[0].1.len(), 12);
        let raw: HashMap<String, Vec<u8>> = pairs.into_iter().collect();
        assert_eq!(decode_hash(&def, &raw).unwrap(), record);

        let jdef = RecordDef::json("T").field(f);
        let encoded = encode_json(&jdef, record.clone()).unwrap();
        assert!(encoded["embedding"].is_string());
        assert_eq!(decode_json(&jdef, encoded).unwrap(), record);
    }

    #[test]
    fn json_embedded_datetime_encodes_nested() {
        let address = RecordDef::embedded("Address")
            .field(field("city", FieldType::String))
            .field(field("since", FieldType::DateTime));
        let def = RecordDef::json("Customer")
            .field(field("name", FieldType::String))
            .field(field("address", FieldType::Embedded(Box::new(address))));
        let record = json!({
            "name": "A",
            "address": {"city": "SA", "since": "2023-10-19T14:30:00Z"}
        });
        let encoded = encode_json(&def, record.clone()).unwrap();
        assert!(encoded["address"]["since"].is_number());
        let decoded = decode_json(&def, encoded).unwrap();
        assert_eq!(decoded["address"]["since"], json!("2023-10-19T14:30:00+00:00"));
    }

    #[test]
    fn json_booleans_store_as_numeric() {
        let def = RecordDef::json("T").field(field("active", FieldType::Boolean));
        let encoded = encode_json(&def, json!({"active": true})).unwrap();
        assert_eq!(encoded["active"], json!(1));
        assert_eq!(decode_json(&def, encoded).unwrap()["active"], json!(true));
        // pre-transition documents hold native booleans
        let legacy = decode_json(&def, json!({"active": false})).unwrap();
        assert_eq!(legacy["active"], json!(false));
    }

    #[test]
    fn legacy_iso_in_json_document_is_tolerated() {
        let def = RecordDef::json("T").field(field("created", FieldType::DateTime));
        let legacy = json!({"created": "2023-10-19T14:30:00"});
        let decoded = decode_json(&def, legacy).unwrap();
        assert_eq!(decoded["created"], json!("2023-10-19T14:30:00+00:00"));
    }

    #[test]
    fn projected_values_decode_per_layout() {
        // Hash indexes RETURN the stored flat string
        let f = field("city", FieldType::String);
        assert_eq!(
            decode_projected(&f, StorageLayout::Hash, "SA").unwrap(),
            json!("SA")
        );
        // JSON indexes RETURN the JSON-serialized value, quotes included
        assert_eq!(
            decode_projected(&f, StorageLayout::Json, "\"SA\"").unwrap(),
            json!("SA")
        );

        let f = field("skills", FieldType::List(Box::new(FieldType::String)));
        assert_eq!(
            decode_projected(&f, StorageLayout::Hash, "rust|go").unwrap(),
            json!(["rust", "go"])
        );
        assert_eq!(
            decode_projected(&f, StorageLayout::Json, "[\"rust\",\"go\"]").unwrap(),
            json!(["rust", "go"])
        );

        let f = field("tier", FieldType::Enum(vec!["gold".into(), "basic".into()]));
        assert_eq!(
            decode_projected(&f, StorageLayout::Json, "\"gold\"").unwrap(),
            json!("gold")
        );

        let f = field("location", FieldType::Geo);
        assert_eq!(
            decode_projected(&f, StorageLayout::Json, "\"-122.4,37.7\"").unwrap(),
            json!("-122.4,37.7")
        );

        let f = field("age", FieldType::Integer);
        assert_eq!(decode_projected(&f, StorageLayout::Hash, "38").unwrap(), json!(38));
        assert_eq!(decode_projected(&f, StorageLayout::Json, "38").unwrap(), json!(38));

        let f = field("active", FieldType::Boolean);
        assert_eq!(decode_projected(&f, StorageLayout::Hash, "1").unwrap(), json!(true));
        assert_eq!(decode_projected(&f, StorageLayout::Json, "1").unwrap(), json!(true));

        let f = field("joined", FieldType::DateTime);
        assert_eq!(
            decode_projected(&f, StorageLayout::Hash, "1697725800").unwrap(),
            json!("2023-10-19T14:30:00+00:00")
        );
        assert_eq!(
            decode_projected(&f, StorageLayout::Json, "1697725800").unwrap(),
            json!("2023-10-19T14:30:00+00:00")
        );
    }

    #[test]
    fn projected_vectors_are_rejected() {
        let opts = VectorOptions::flat(2, VectorType::Float32, DistanceMetric::Cosine);
        let f = FieldDef::new("embedding", FieldType::Vector).vector(opts);
        assert!(decode_projected(&f, StorageLayout::Hash, "junk").is_err());
        assert!(decode_projected(&f, StorageLayout::Json, "\"anVuaw==\"").is_err());
    }

    #[test]
    fn extract_path_walks_nested_objects() {
        let doc = json!({"address": {"city": "SA"}});
        assert_eq!(extract_path(&doc, "address.city"), Some(&json!("SA")));
        assert_eq!(extract_path(&doc, "address.zip"), None);
    }

    #[test]
    fn float_formatting_drops_integral_fraction() {
        assert_eq!(format_float(38.0), "38");
        assert_eq!(format_float(1.5), "1.5");
    }
}
