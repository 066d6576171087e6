use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{LoadError, Result};
use crate::record::{Batch, Record, Value};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NormalizeOptions {
    /// Treat empty and whitespace-only text as absent.
    #[serde(default = "default_true")]
    pub empty_strings_as_absent: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            empty_strings_as_absent: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// One destination field and the source field it is copied from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FieldMapping {
    pub destination: String,
    pub source: String,
}

/// Returns a copy of `batch` with every null-like cell replaced by [`Value::Absent`].
pub fn normalize(batch: &Batch, options: &NormalizeOptions) -> Batch {
    batch
        .iter()
        .map(|record| {
            record
                .iter()
                .map(|(field, value)| (field, normalize_value(value, options)))
                .collect::<Record>()
        })
        .collect()
}

fn normalize_value(value: &Value, options: &NormalizeOptions) -> Value {
    match value {
        Value::Float(f) if f.is_nan() => Value::Absent,
        Value::Text(s) if options.empty_strings_as_absent && s.trim().is_empty() => Value::Absent,
        other => other.clone(),
    }
}

/// Restricts every record to the mapped destination fields.
///
/// Fails with `SchemaMismatch` when a mapped source field appears in no record
/// at all, which points at a configuration error rather than sparse data.
pub fn project(batch: &Batch, mapping: &[FieldMapping], destination: &str) -> Result<Batch> {
    for entry in mapping {
        if !batch.iter().any(|record| record.contains(&entry.source)) {
            return Err(LoadError::SchemaMismatch {
                destination: destination.to_string(),
                field: entry.source.clone(),
            });
        }
    }

    debug!(
        destination,
        fields = mapping.len(),
        "Projecting batch onto field mapping"
    );

    Ok(batch
        .iter()
        .map(|record| project_record(record, mapping))
        .collect())
}

fn project_record(record: &Record, mapping: &[FieldMapping]) -> Record {
    mapping
        .iter()
        .map(|entry| {
            let value = record.get(&entry.source).cloned().unwrap_or(Value::Absent);
            (entry.destination.as_str(), value)
        })
        .collect()
}
