//! Extended JSON mapping.
//!
//! Native types that JSON cannot express are wrapped in single-purpose
//! objects: `{"$date": "..."}`, `{"$oid": "..."}` and
//! `{"$regex": "...", "$options": "..."}`.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::de::{self, Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_json::{Map, Number};
use thiserror::Error;

use crate::document::Document;
use crate::oid::ObjectId;
use crate::value::Value;

#[derive(Debug, Error)]
pub enum JsonError {
    #[error("invalid json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("expected a json object, got {0}")]
    NotAnObject(&'static str),
}

fn date_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn wrapped_value(map: &Map<String, serde_json::Value>) -> Option<Value> {
    match map.len() {
        1 => {
            if let Some(date) = map.get("$date") {
                return match date {
                    serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
                        .ok()
                        .map(|dt| Value::DateTime(dt.with_timezone(&Utc))),
                    serde_json::Value::Number(n) => n
                        .as_i64()
                        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                        .map(Value::DateTime),
                    _ => None,
                };
            }
            if let Some(serde_json::Value::String(hex)) = map.get("$oid") {
                return ObjectId::parse_str(hex).ok().map(Value::ObjectId);
            }
            None
        }
        2 => match (map.get("$regex"), map.get("$options")) {
            (Some(serde_json::Value::String(p)), Some(serde_json::Value::String(o))) => {
                Some(Value::Regex {
                    pattern: p.clone(),
                    options: o.clone(),
                })
            }
            _ => None,
        },
        _ => None,
    }
}

/// Convert a JSON value into a document value.
pub fn from_json(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(0.0)),
        },
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => Value::Array(items.into_iter().map(from_json).collect()),
        serde_json::Value::Object(map) => {
            if let Some(value) = wrapped_value(&map) {
                return value;
            }
            Value::Document(map.into_iter().map(|(k, v)| (k, from_json(v))).collect())
        }
    }
}

/// Convert a document value into JSON. Non-finite floats become `null`.
pub fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::Number((*i).into()),
        Value::Float(f) => Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::DateTime(dt) => {
            let mut map = Map::new();
            map.insert("$date".into(), serde_json::Value::String(date_string(dt)));
            serde_json::Value::Object(map)
        }
        Value::ObjectId(id) => {
            let mut map = Map::new();
            map.insert("$oid".into(), serde_json::Value::String(id.to_hex()));
            serde_json::Value::Object(map)
        }
        Value::Regex { pattern, options } => {
            let mut map = Map::new();
            map.insert("$regex".into(), serde_json::Value::String(pattern.clone()));
            map.insert("$options".into(), serde_json::Value::String(options.clone()));
            serde_json::Value::Object(map)
        }
        Value::Array(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
        Value::Document(doc) => serde_json::Value::Object(
            doc.iter().map(|(k, v)| (k.clone(), to_json(v))).collect(),
        ),
    }
}

impl Document {
    pub fn from_json_str(s: &str) -> Result<Document, JsonError> {
        let json: serde_json::Value = serde_json::from_str(s)?;
        match from_json(json) {
            Value::Document(doc) => Ok(doc),
            other => Err(JsonError::NotAnObject(other.type_name())),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.iter().map(|(k, v)| (k.clone(), to_json(v))).collect(),
        )
    }
}

/// Parse a JSON array of objects, as used by fixture files.
pub fn documents_from_json_str(s: &str) -> Result<Vec<Document>, JsonError> {
    let json: serde_json::Value = serde_json::from_str(s)?;
    match from_json(json) {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Document(doc) => Ok(doc),
                other => Err(JsonError::NotAnObject(other.type_name())),
            })
            .collect(),
        Value::Document(doc) => Ok(vec![doc]),
        other => Err(JsonError::NotAnObject(other.type_name())),
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            Value::Float(_) => serializer.serialize_unit(),
            Value::String(s) => serializer.serialize_str(s),
            Value::DateTime(dt) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("$date", &date_string(dt))?;
                map.end()
            }
            Value::ObjectId(id) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("$oid", &id.to_hex())?;
                map.end()
            }
            Value::Regex { pattern, options } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("$regex", pattern)?;
                map.serialize_entry("$options", options)?;
                map.end()
            }
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Document(doc) => doc.serialize(serializer),
        }
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (k, v) in self.iter() {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(from_json)
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Document(doc) => Ok(doc),
            other => Err(de::Error::custom(format!(
                "expected a document, got {}",
                other.type_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_types_are_recognised() {
        let doc = Document::from_json_str(
            r#"{
                "_id": {"$oid": "5099803df3f4948bd2f98391"},
                "at": {"$date": "2012-10-30T16:00:00.000Z"},
                "name": {"$regex": "^C14", "$options": "i"},
                "filter": {"$regex": "^C14"}
            }"#,
        )
        .unwrap();
        assert!(matches!(doc.get("_id"), Some(Value::ObjectId(_))));
        assert!(matches!(doc.get("at"), Some(Value::DateTime(_))));
        assert!(matches!(doc.get("name"), Some(Value::Regex { .. })));
        // A lone $regex is an operator document, not a native regex.
        assert!(matches!(doc.get("filter"), Some(Value::Document(_))));
    }

    #[test]
    fn serialization_preserves_field_order_and_types() {
        let text = r#"{"z":1,"a":2.5,"m":{"$date":"2012-10-30T16:00:00.000Z"},"b":[true,null]}"#;
        let doc = Document::from_json_str(text).unwrap();
        assert_eq!(serde_json::to_string(&doc).unwrap(), text);
        assert_eq!(doc.to_json().to_string(), text);
    }

    #[test]
    fn malformed_wrappers_stay_documents() {
        let doc = Document::from_json_str(r#"{"_id": {"$oid": "nothex"}}"#).unwrap();
        assert!(matches!(doc.get("_id"), Some(Value::Document(_))));
    }

    #[test]
    fn fixture_arrays_parse() {
        let docs = documents_from_json_str(r#"[{"a":1},{"a":2}]"#).unwrap();
        assert_eq!(docs.len(), 2);
        assert!(documents_from_json_str("[1]").is_err());
    }

    #[test]
    fn deserializes_through_serde() {
        let doc: Document = serde_json::from_str(r#"{"a":{"b":"c"}}"#).unwrap();
        assert_eq!(doc.get_path("a.b"), Some(&Value::from("c")));
        assert!(serde_json::from_str::<Document>("[1,2]").is_err());
    }
}
