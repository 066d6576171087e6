use serde::Serialize;
use std::collections::BTreeSet;

/// Type given to columns created by schema reconciliation.
pub const ADDED_COLUMN_TYPE: &str = "text";

/// A destination column as reported by the store.
///
/// `data_type` is the cast target for bound cells. It carries no length
/// modifier, so assigning the cast value to the column still enforces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    /// Identity, generated or defaulted: the store fills it when omitted.
    pub defaulted: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            defaulted: false,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ADDED_COLUMN_TYPE)
    }

    pub fn with_default(mut self) -> Self {
        self.defaulted = true;
        self
    }
}

/// Column drift between an incoming batch and a destination table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableSchemaDelta {
    /// In the batch, missing from the table.
    pub columns_to_add: BTreeSet<String>,
    /// In the table, missing from every record of the batch, with no default.
    pub columns_to_null_fill: BTreeSet<String>,
}

impl TableSchemaDelta {
    pub fn compute(batch_fields: &BTreeSet<String>, existing: &[Column]) -> Self {
        let names: BTreeSet<&str> = existing.iter().map(|c| c.name.as_str()).collect();

        Self {
            columns_to_add: batch_fields
                .iter()
                .filter(|f| !names.contains(f.as_str()))
                .cloned()
                .collect(),
            columns_to_null_fill: existing
                .iter()
                .filter(|c| !c.defaulted && !batch_fields.contains(&c.name))
                .map(|c| c.name.clone())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.columns_to_add.is_empty() && self.columns_to_null_fill.is_empty()
    }
}

/// Columns an insert of the batch writes to: the table columns the batch
/// carries or that need a null-fill, in ordinal order, then the columns the
/// batch adds.
///
/// Null-fill columns are written as explicit NULLs, which fills exactly the
/// inserted rows and leaves every other row untouched. Defaulted columns the
/// batch lacks are left out so the store applies their default.
pub fn insert_columns(batch_fields: &BTreeSet<String>, existing: &[Column]) -> Vec<Column> {
    let mut columns: Vec<Column> = existing
        .iter()
        .filter(|c| !c.defaulted || batch_fields.contains(&c.name))
        .cloned()
        .collect();
    columns.extend(
        batch_fields
            .iter()
            .filter(|field| !existing.iter().any(|c| &c.name == *field))
            .map(|field| Column::text(field.as_str())),
    );
    columns
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn table() -> Vec<Column> {
        vec![
            Column::new("id", "integer"),
            Column::new("title", "character varying"),
            Column::new("created_at", "timestamp with time zone"),
        ]
    }

    #[test]
    fn test_delta_detects_drift_both_ways() {
        let delta = TableSchemaDelta::compute(&fields(&["id", "title", "region"]), &table());

        assert_eq!(delta.columns_to_add, fields(&["region"]));
        assert_eq!(delta.columns_to_null_fill, fields(&["created_at"]));
        assert!(!delta.is_empty());
    }

    #[test]
    fn test_delta_empty_when_shapes_match() {
        let delta = TableSchemaDelta::compute(&fields(&["id", "title", "created_at"]), &table());
        assert!(delta.is_empty());
    }

    #[test]
    fn test_defaulted_columns_are_left_to_the_store() {
        let existing = vec![
            Column::new("id", "integer").with_default(),
            Column::new("created_at", "timestamp with time zone").with_default(),
            Column::new("note", "text"),
            Column::new("name", "text"),
        ];
        let batch = fields(&["name"]);

        let delta = TableSchemaDelta::compute(&batch, &existing);
        assert_eq!(delta.columns_to_null_fill, fields(&["note"]));

        let names: Vec<String> = insert_columns(&batch, &existing)
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["note", "name"]);

        // a defaulted column the batch does carry is written
        let names: Vec<String> = insert_columns(&fields(&["id", "name"]), &existing)
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["id", "note", "name"]);
    }

    #[test]
    fn test_insert_columns_keep_existing_types() {
        let columns = insert_columns(&fields(&["id", "region"]), &table());
        assert_eq!(
            columns,
            vec![
                Column::new("id", "integer"),
                Column::new("title", "character varying"),
                Column::new("created_at", "timestamp with time zone"),
                Column::new("region", "text"),
            ]
        );
    }
}
