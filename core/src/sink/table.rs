use std::fmt;
use std::future::Future;
use tracing::{debug, info};

use crate::chunk::Chunk;
use crate::errors::{LoadError, Result, StoreError};
use crate::record::{Batch, Value};
use crate::sink::schema::{Column, TableSchemaDelta, insert_columns};
use crate::sink::{Sink, SinkKind};
use crate::summary::TransferOutcome;

/// Fully qualified destination table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: &str, table: &str) -> Self {
        Self {
            schema: schema.to_string(),
            table: table.to_string(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Storage operations the table sink needs from a relational backend.
///
/// Rows are passed as text cells; the store casts each cell to the column's
/// type. `None` is NULL.
pub trait TableStore: Send + Sync {
    fn ping(&self) -> impl Future<Output = std::result::Result<(), StoreError>> + Send;

    /// Current columns in ordinal order. Empty when the table does not exist.
    fn columns(
        &self,
        table: &TableRef,
    ) -> impl Future<Output = std::result::Result<Vec<Column>, StoreError>> + Send;

    /// Creates the table with nullable text columns.
    fn create_table(
        &self,
        table: &TableRef,
        columns: &[String],
    ) -> impl Future<Output = std::result::Result<(), StoreError>> + Send;

    /// Adds a nullable text column.
    fn add_column(
        &self,
        table: &TableRef,
        column: &str,
    ) -> impl Future<Output = std::result::Result<(), StoreError>> + Send;

    /// Inserts all rows atomically and returns the number inserted.
    fn insert_rows(
        &self,
        table: &TableRef,
        columns: &[Column],
        rows: &[Vec<Option<String>>],
    ) -> impl Future<Output = std::result::Result<u64, StoreError>> + Send;
}

/// Appends records to a relational table, adding columns the batch brings
/// that the table lacks.
///
/// Schema reconciliation reads and then alters the table without isolation
/// from other loaders: two concurrent loads into the same table can both see a
/// column as missing and the second `ADD COLUMN` then fails the load.
pub struct TableSink<S> {
    store: S,
    schema: String,
}

#[derive(Debug, Clone)]
pub struct InsertPlan {
    pub table: TableRef,
    pub columns: Vec<Column>,
    pub delta: TableSchemaDelta,
}

impl<S: TableStore> TableSink<S> {
    pub fn new(store: S, schema: String) -> Self {
        Self { store, schema }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Brings the table's columns in line with the batch, creating the table
    /// when it does not exist yet.
    async fn reconcile(&self, table: &TableRef, batch: &Batch) -> Result<InsertPlan> {
        let destination = table.to_string();
        let fields = batch.field_names();
        if fields.is_empty() {
            return Err(LoadError::invalid_input(&destination, "records carry no fields"));
        }

        let existing = self.store.columns(table).await.map_err(|e| match e {
            StoreError::Unavailable { reason } => LoadError::unavailable(&destination, reason),
            StoreError::Rejected { reason } => LoadError::SchemaRead {
                destination: destination.clone(),
                reason,
            },
        })?;

        if existing.is_empty() {
            let names: Vec<String> = fields.iter().cloned().collect();
            self.store
                .create_table(table, &names)
                .await
                .map_err(|e| write_error(&destination, "CREATE TABLE", e))?;
            info!(table = %table, columns = names.len(), "Created destination table");

            return Ok(InsertPlan {
                table: table.clone(),
                columns: names.into_iter().map(Column::text).collect(),
                delta: TableSchemaDelta {
                    columns_to_add: fields,
                    ..Default::default()
                },
            });
        }

        let delta = TableSchemaDelta::compute(&fields, &existing);
        for column in &delta.columns_to_add {
            self.store
                .add_column(table, column)
                .await
                .map_err(|e| write_error(&destination, &format!("ADD COLUMN {column}"), e))?;
            info!(table = %table, column = %column, "Added missing column");
        }
        if !delta.columns_to_null_fill.is_empty() {
            debug!(
                table = %table,
                columns = ?delta.columns_to_null_fill,
                "Columns absent from batch are inserted as NULL"
            );
        }

        Ok(InsertPlan {
            table: table.clone(),
            columns: insert_columns(&fields, &existing),
            delta,
        })
    }
}

impl<S: TableStore> Sink for TableSink<S> {
    type Plan = InsertPlan;

    fn kind(&self) -> SinkKind {
        SinkKind::Table
    }

    async fn prepare(&self, destination: &str, batch: &Batch) -> Result<InsertPlan> {
        let table = TableRef::new(&self.schema, destination);
        self.store
            .ping()
            .await
            .map_err(|e| LoadError::unavailable(&table.to_string(), e.to_string()))?;

        self.reconcile(&table, batch).await
    }

    async fn transfer(&self, plan: &InsertPlan, chunk: Chunk<'_>) -> Result<TransferOutcome> {
        let rows: Vec<Vec<Option<String>>> = chunk
            .records
            .iter()
            .map(|record| {
                plan.columns
                    .iter()
                    .map(|c| record.get(&c.name).and_then(Value::as_text))
                    .collect()
            })
            .collect();

        let inserted = self
            .store
            .insert_rows(&plan.table, &plan.columns, &rows)
            .await
            .map_err(|e| {
                write_error(
                    &plan.table.to_string(),
                    &format!("insert of chunk {}", chunk.index),
                    e,
                )
            })?;

        debug!(table = %plan.table, chunk = chunk.index, rows = inserted, "Inserted chunk");
        Ok(TransferOutcome::success(chunk.index, chunk.len()))
    }
}

fn write_error(destination: &str, operation: &str, err: StoreError) -> LoadError {
    match err {
        StoreError::Unavailable { reason } => LoadError::unavailable(destination, reason),
        StoreError::Rejected { reason } => {
            LoadError::write(destination, format!("{operation} failed: {reason}"))
        }
    }
}
