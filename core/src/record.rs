use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};

use crate::errors::{LoadError, Result};

/// A single cell of a record.
///
/// `Absent` is the only representation of "no value". Source-specific null
/// conventions are collapsed into it by [`normalize`](crate::normalize::normalize).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Absent,
    Text(String),
    Integer(i64),
    /// Integers above `i64::MAX`.
    Unsigned(u64),
    Float(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    /// Text rendering used for document ids and table inserts.
    /// `None` for `Absent`.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Absent => None,
            Value::Text(s) => Some(s.clone()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Unsigned(u) => Some(u.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Boolean(b) => Some(b.to_string()),
            Value::Timestamp(ts) => Some(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        }
    }

    fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Value::Absent,
            JsonValue::Bool(b) => Value::Boolean(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else if let Some(u) = n.as_u64() {
                    Value::Unsigned(u)
                } else {
                    n.as_f64().map(Value::Float).unwrap_or(Value::Absent)
                }
            }
            JsonValue::String(s) => Value::Text(s),
            // nested structures are carried as their JSON text
            other => Value::Text(other.to_string()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Absent => serializer.serialize_none(),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Unsigned(u) => serializer.serialize_u64(*u),
            Value::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            Value::Float(_) => serializer.serialize_none(),
            Value::Boolean(b) => serializer.serialize_bool(*b),
            Value::Timestamp(ts) => {
                serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Timestamp(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Absent)
    }
}

/// A flat, immutable mapping from field name to [`Value`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Builds a record from a JSON object. Returns `None` for any other JSON type.
    pub fn from_json(value: JsonValue) -> Option<Self> {
        match value {
            JsonValue::Object(map) => Some(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
            _ => None,
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// The full, ordered set of records handed to one `save` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    records: Vec<Record>,
}

impl Batch {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    /// Builds a batch from JSON rows, each of which must be an object.
    pub fn from_json_rows(rows: Vec<JsonValue>, destination: &str) -> Result<Self> {
        let mut records = Vec::with_capacity(rows.len());
        for (position, row) in rows.into_iter().enumerate() {
            let record = Record::from_json(row).ok_or_else(|| {
                LoadError::invalid_input(
                    destination,
                    format!("row {position} is not a JSON object"),
                )
            })?;
            records.push(record);
        }
        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    /// Union of the field names of every record, in sorted order.
    pub fn field_names(&self) -> BTreeSet<String> {
        self.records
            .iter()
            .flat_map(|r| r.field_names().map(str::to_string))
            .collect()
    }
}

impl From<Vec<Record>> for Batch {
    fn from(records: Vec<Record>) -> Self {
        Self::new(records)
    }
}

impl FromIterator<Record> for Batch {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_record_serializes_absent_as_null() {
        let ts = Utc.with_ymd_and_hms(2023, 1, 3, 0, 0, 0).unwrap();
        let record: Record = [
            ("title", Value::from("Title 3")),
            ("quantity", Value::from(7i64)),
            ("created_at", Value::from(ts)),
            ("updated_at", Value::Absent),
        ]
        .into_iter()
        .collect();

        let doc = serde_json::to_value(&record).unwrap();
        assert_eq!(
            doc,
            json!({
                "title": "Title 3",
                "quantity": 7,
                "created_at": "2023-01-03T00:00:00Z",
                "updated_at": null
            })
        );
    }

    #[test]
    fn test_batch_from_json_rows() {
        let batch = Batch::from_json_rows(
            vec![
                json!({"id": 1, "value": 1523.5, "tags": ["a"]}),
                json!({"id": 2, "region": null}),
            ],
            "products",
        )
        .unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.records()[0].get("value"), Some(&Value::Float(1523.5)));
        assert_eq!(
            batch.records()[0].get("tags"),
            Some(&Value::Text("[\"a\"]".to_string()))
        );
        assert_eq!(batch.records()[1].get("region"), Some(&Value::Absent));

        let fields: Vec<String> = batch.field_names().into_iter().collect();
        assert_eq!(fields, vec!["id", "region", "tags", "value"]);
    }

    #[test]
    fn test_large_unsigned_integers_stay_exact() {
        let record = Record::from_json(json!({"id": 18446744073709551615u64})).unwrap();

        assert_eq!(record.get("id"), Some(&Value::Unsigned(u64::MAX)));
        assert_eq!(
            record.get("id").and_then(Value::as_text).as_deref(),
            Some("18446744073709551615")
        );
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({"id": 18446744073709551615u64})
        );
    }

    #[test]
    fn test_batch_from_json_rows_rejects_non_objects() {
        let err = Batch::from_json_rows(vec![json!({"id": 1}), json!([1, 2])], "products")
            .unwrap_err();
        assert!(err.to_string().contains("row 1"));
        assert!(err.to_string().contains("products"));
    }
}
