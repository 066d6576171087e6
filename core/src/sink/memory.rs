//! In-memory [`TableStore`], for dry runs and tests of table loads without a
//! database.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::errors::StoreError;
use crate::sink::schema::{ADDED_COLUMN_TYPE, Column};
use crate::sink::table::{TableRef, TableStore};

pub type Row = BTreeMap<String, Option<String>>;

#[derive(Debug, Default)]
struct MemoryTable {
    columns: Vec<Column>,
    rows: Vec<Row>,
}

#[derive(Debug, Default)]
pub struct MemoryTableStore {
    tables: Mutex<HashMap<TableRef, MemoryTable>>,
    ddl: Mutex<Vec<String>>,
    unavailable: AtomicBool,
    fail_schema_reads: AtomicBool,
    reject_inserts: AtomicBool,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `table` with the given columns, replacing any previous contents.
    pub fn seed(&self, table: &TableRef, columns: Vec<Column>) {
        self.tables().insert(
            table.clone(),
            MemoryTable {
                columns,
                rows: Vec::new(),
            },
        );
    }

    pub fn column_names(&self, table: &TableRef) -> Vec<String> {
        self.tables()
            .get(table)
            .map(|t| t.columns.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn rows(&self, table: &TableRef) -> Vec<Row> {
        self.tables()
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Schema statements applied so far, in order.
    pub fn ddl_log(&self) -> Vec<String> {
        self.ddl.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn fail_schema_reads(&self, fail: bool) {
        self.fail_schema_reads.store(fail, Ordering::SeqCst);
    }

    pub fn reject_inserts(&self, reject: bool) {
        self.reject_inserts.store(reject, Ordering::SeqCst);
    }

    fn tables(&self) -> MutexGuard<'_, HashMap<TableRef, MemoryTable>> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn log_ddl(&self, statement: String) {
        self.ddl
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(statement);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

impl TableStore for MemoryTableStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }

    async fn columns(&self, table: &TableRef) -> Result<Vec<Column>, StoreError> {
        self.check_available()?;
        if self.fail_schema_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected {
                reason: "permission denied for catalog".to_string(),
            });
        }
        Ok(self
            .tables()
            .get(table)
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    async fn create_table(&self, table: &TableRef, columns: &[String]) -> Result<(), StoreError> {
        self.check_available()?;
        {
            let mut tables = self.tables();
            if tables.contains_key(table) {
                return Err(StoreError::Rejected {
                    reason: format!("relation {table} already exists"),
                });
            }
            tables.insert(
                table.clone(),
                MemoryTable {
                    columns: columns.iter().map(|c| Column::text(c.as_str())).collect(),
                    rows: Vec::new(),
                },
            );
        }

        let definitions: Vec<String> = columns
            .iter()
            .map(|c| format!("{c} {ADDED_COLUMN_TYPE}"))
            .collect();
        self.log_ddl(format!("CREATE TABLE {table} ({})", definitions.join(", ")));
        Ok(())
    }

    async fn add_column(&self, table: &TableRef, column: &str) -> Result<(), StoreError> {
        self.check_available()?;
        {
            let mut tables = self.tables();
            let target = tables.get_mut(table).ok_or_else(|| StoreError::Rejected {
                reason: format!("relation {table} does not exist"),
            })?;
            if target.columns.iter().any(|c| c.name == column) {
                return Err(StoreError::Rejected {
                    reason: format!("column {column} of relation {table} already exists"),
                });
            }
            target.columns.push(Column::text(column));
        }

        self.log_ddl(format!(
            "ALTER TABLE {table} ADD COLUMN {column} {ADDED_COLUMN_TYPE}"
        ));
        Ok(())
    }

    async fn insert_rows(
        &self,
        table: &TableRef,
        columns: &[Column],
        rows: &[Vec<Option<String>>],
    ) -> Result<u64, StoreError> {
        self.check_available()?;
        if self.reject_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected {
                reason: "null value violates not-null constraint".to_string(),
            });
        }

        let mut tables = self.tables();
        let target = tables.get_mut(table).ok_or_else(|| StoreError::Rejected {
            reason: format!("relation {table} does not exist"),
        })?;
        if let Some(unknown) = columns
            .iter()
            .find(|c| !target.columns.iter().any(|t| t.name == c.name))
        {
            return Err(StoreError::Rejected {
                reason: format!("column {} of relation {table} does not exist", unknown.name),
            });
        }

        for row in rows {
            target.rows.push(
                columns
                    .iter()
                    .map(|c| c.name.clone())
                    .zip(row.iter().cloned())
                    .collect(),
            );
        }
        Ok(rows.len() as u64)
    }
}
