use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::{debug, info};

use crate::config::TableSettings;
use crate::errors::StoreError;
use crate::sink::schema::{ADDED_COLUMN_TYPE, Column};
use crate::sink::table::{TableRef, TableStore};

/// Postgres limits a statement to 65535 bind parameters.
const MAX_BIND_PARAMS: usize = 65535;

/// Column names with their base type and whether the server fills them when
/// omitted. The type carries no length modifier: an explicit cast to
/// `varchar(n)` or `bit(n)` truncates silently, the assignment that follows
/// the cast does not. `bit` widens to `bit varying` because a bare `bit` cast
/// means `bit(1)`.
const COLUMNS_QUERY: &str = r#"
SELECT a.attname::text,
       CASE WHEN a.atttypid = 'bit'::regtype THEN 'bit varying'
            ELSE format_type(a.atttypid, NULL)
       END,
       (a.attidentity <> '' OR a.attgenerated <> '' OR a.atthasdef) AS defaulted
FROM pg_attribute a
JOIN pg_class c ON a.attrelid = c.oid
JOIN pg_namespace n ON c.relnamespace = n.oid
WHERE n.nspname = $1
  AND c.relname = $2
  AND a.attnum > 0
  AND NOT a.attisdropped
ORDER BY a.attnum
"#;

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Builds a pool without opening a connection; the first statement connects.
    pub fn connect_lazy(settings: &TableSettings) -> Self {
        let options = PgConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .database(&settings.database)
            .username(&settings.user)
            .password(&settings.password);

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.connect_timeout)
            .connect_lazy_with(options);

        info!(
            host = %settings.host,
            port = settings.port,
            database = %settings.database,
            max_connections = settings.max_connections,
            "Postgres connection pool configured"
        );

        Self { pool }
    }
}

impl TableStore for PostgresStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn columns(&self, table: &TableRef) -> Result<Vec<Column>, StoreError> {
        let rows: Vec<(String, String, bool)> = sqlx::query_as(COLUMNS_QUERY)
            .bind(&table.schema)
            .bind(&table.table)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(name, data_type, defaulted)| Column {
                name,
                data_type,
                defaulted,
            })
            .collect())
    }

    async fn create_table(&self, table: &TableRef, columns: &[String]) -> Result<(), StoreError> {
        let sql = create_table_statement(table, columns);
        debug!(sql = %sql, "Executing DDL");
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn add_column(&self, table: &TableRef, column: &str) -> Result<(), StoreError> {
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {ADDED_COLUMN_TYPE}",
            qualified_name(table),
            quote_ident(column)
        );
        debug!(sql = %sql, "Executing DDL");
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_rows(
        &self,
        table: &TableRef,
        columns: &[Column],
        rows: &[Vec<Option<String>>],
    ) -> Result<u64, StoreError> {
        if rows.is_empty() || columns.is_empty() {
            return Ok(0);
        }

        // a chunk wider than one statement allows is split, inside one transaction
        let rows_per_statement = (MAX_BIND_PARAMS / columns.len()).max(1);
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for group in rows.chunks(rows_per_statement) {
            let sql = insert_statement(table, columns, group.len());
            let mut query = sqlx::query(&sql);
            for row in group {
                for value in row {
                    query = query.bind(value.as_deref());
                }
            }
            inserted += query.execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn qualified_name(table: &TableRef) -> String {
    format!("{}.{}", quote_ident(&table.schema), quote_ident(&table.table))
}

fn create_table_statement(table: &TableRef, columns: &[String]) -> String {
    let definitions: Vec<String> = columns
        .iter()
        .map(|c| format!("{} {ADDED_COLUMN_TYPE}", quote_ident(c)))
        .collect();
    format!(
        "CREATE TABLE {} ({})",
        qualified_name(table),
        definitions.join(", ")
    )
}

/// Multi-row INSERT with every cell bound as text and cast to its column type.
fn insert_statement(table: &TableRef, columns: &[Column], row_count: usize) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote_ident(&c.name)).collect();
    let values: Vec<String> = (0..row_count)
        .map(|row| {
            let cells: Vec<String> = columns
                .iter()
                .enumerate()
                .map(|(i, column)| {
                    let param = row * columns.len() + i + 1;
                    format!("CAST(${param} AS {})", column.data_type)
                })
                .collect();
            format!("({})", cells.join(", "))
        })
        .collect();

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        qualified_name(table),
        names.join(", "),
        values.join(", ")
    )
}
