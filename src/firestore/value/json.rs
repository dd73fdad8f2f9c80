use std::collections::BTreeMap;

use serde_json::{Map as JsonMap, Number, Value as JsonValue};

use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::value::{FirestoreValue, MapValue, SentinelValue, ValueKind};

impl FirestoreValue {
    /// Converts a plain JSON value. Integral numbers become integers, every
    /// other number becomes a double.
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => FirestoreValue::null(),
            JsonValue::Bool(flag) => FirestoreValue::from_bool(flag),
            JsonValue::Number(number) => match number.as_i64() {
                Some(integer) => FirestoreValue::from_integer(integer),
                None => FirestoreValue::from_double(number.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(text) => FirestoreValue::from_string(text),
            JsonValue::Array(values) => {
                FirestoreValue::from_array(values.into_iter().map(FirestoreValue::from_json).collect())
            }
            JsonValue::Object(object) => FirestoreValue::from_map(
                object
                    .into_iter()
                    .map(|(key, value)| (key, FirestoreValue::from_json(value)))
                    .collect(),
            ),
        }
    }

    /// Renders the value as plain JSON. Timestamps become RFC 3339 strings and
    /// references their path; sentinels have no JSON form and render as `null`.
    pub fn to_json(&self) -> JsonValue {
        match self.kind() {
            ValueKind::Null => JsonValue::Null,
            ValueKind::Boolean(flag) => JsonValue::Bool(*flag),
            ValueKind::Integer(integer) => JsonValue::Number((*integer).into()),
            ValueKind::Double(double) => Number::from_f64(*double)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            ValueKind::Timestamp(timestamp) => timestamp
                .to_rfc3339()
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
            ValueKind::String(text) => JsonValue::String(text.clone()),
            ValueKind::Reference(path) => JsonValue::String(path.clone()),
            ValueKind::Array(array) => {
                JsonValue::Array(array.values().iter().map(FirestoreValue::to_json).collect())
            }
            ValueKind::Map(map) => map_to_json(map),
            ValueKind::Sentinel(SentinelValue::Delete)
            | ValueKind::Sentinel(SentinelValue::ServerTimestamp)
            | ValueKind::Sentinel(SentinelValue::NumericIncrement(_)) => JsonValue::Null,
        }
    }
}

/// Converts a JSON object into document fields.
pub fn map_from_json(value: JsonValue) -> FirestoreResult<BTreeMap<String, FirestoreValue>> {
    match value {
        JsonValue::Object(object) => Ok(object
            .into_iter()
            .map(|(key, value)| (key, FirestoreValue::from_json(value)))
            .collect()),
        other => Err(invalid_argument(format!(
            "Document data must be a JSON object, found {other}"
        ))),
    }
}

pub fn map_to_json(map: &MapValue) -> JsonValue {
    let object: JsonMap<String, JsonValue> = map
        .fields()
        .iter()
        .map(|(key, value)| (key.clone(), value.to_json()))
        .collect();
    JsonValue::Object(object)
}
