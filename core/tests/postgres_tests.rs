//! Table loads against a real Postgres started with testcontainers.
//!
//! These need a Docker daemon: `cargo test -p bulk-load-core -- --ignored`.

use bulk_load_core::errors::ErrorKind;
use bulk_load_core::{Batch, Loader, LoaderConfig, Record, Value};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
    host: String,
    port: u16,
}

impl TestPostgres {
    async fn start() -> Self {
        let container = Postgres::default()
            .with_tag("15-alpine")
            .start()
            .await
            .expect("Failed to start PostgreSQL container");
        let host = container.get_host().await.unwrap().to_string();
        let port = container.get_host_port_ipv4(5432).await.unwrap();

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&format!("postgresql://postgres:postgres@{host}:{port}/postgres"))
            .await
            .expect("Failed to connect to PostgreSQL");

        Self {
            _container: container,
            pool,
            host,
            port,
        }
    }

    async fn execute(&self, sql: &str) {
        sqlx::query(sql).execute(&self.pool).await.unwrap();
    }

    async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT count(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }

    fn loader(&self, chunk_size: usize) -> Loader {
        let config = LoaderConfig::from_yaml(&format!(
            r#"
sink:
  type: postgres
  host: {}
  port: {}
  database: postgres
  user: postgres
  password: postgres
  schema: public
tuning:
  chunk_size: {chunk_size}
  workers: 2
"#,
            self.host, self.port
        ))
        .unwrap();
        Loader::from_config(config).unwrap()
    }
}

fn batch(rows: Vec<Vec<(&str, Value)>>) -> Batch {
    rows.into_iter()
        .map(|fields| fields.into_iter().collect::<Record>())
        .collect()
}

#[tokio::test]
#[ignore = "starts a Postgres container"]
async fn test_overlong_value_fails_instead_of_truncating() {
    let pg = TestPostgres::start().await;
    pg.execute("CREATE TABLE vc (id integer, code varchar(3))").await;

    let rows = batch(vec![vec![("id", Value::Integer(1)), ("code", Value::from("ABCDEF"))]]);
    let err = pg.loader(10).save(&rows, "vc").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SinkWrite);
    assert!(err.to_string().contains("too long"));
    assert_eq!(pg.count("vc").await, 0);
}

#[tokio::test]
#[ignore = "starts a Postgres container"]
async fn test_typed_columns_accept_text_cells() {
    let pg = TestPostgres::start().await;
    pg.execute("CREATE TABLE typed (id integer, amount numeric(8,2), code varchar(3), flags bit(3))")
        .await;

    let rows = batch(vec![vec![
        ("id", Value::Integer(7)),
        ("amount", Value::Float(12.5)),
        ("code", Value::from("ABC")),
        ("flags", Value::from("101")),
    ]]);
    pg.loader(10).save(&rows, "typed").await.unwrap();

    let (amount, flags): (String, String) =
        sqlx::query_as("SELECT amount::text, flags::text FROM typed WHERE id = 7")
            .fetch_one(&pg.pool)
            .await
            .unwrap();
    assert_eq!(amount, "12.50");
    assert_eq!(flags, "101");
}

#[tokio::test]
#[ignore = "starts a Postgres container"]
async fn test_identity_serial_and_default_columns_are_filled_by_server() {
    let pg = TestPostgres::start().await;
    pg.execute("CREATE TABLE ident (id integer GENERATED ALWAYS AS IDENTITY, name text)")
        .await;
    pg.execute(
        "CREATE TABLE ser (id serial PRIMARY KEY, created_at timestamptz NOT NULL DEFAULT now(), name text)",
    )
    .await;

    let rows = batch(vec![vec![("name", Value::from("x"))], vec![("name", Value::from("y"))]]);
    let loader = pg.loader(10);
    loader.save(&rows, "ident").await.unwrap();
    loader.save(&rows, "ser").await.unwrap();

    let ids: Vec<i32> = sqlx::query_scalar("SELECT id FROM ident ORDER BY id")
        .fetch_all(&pg.pool)
        .await
        .unwrap();
    assert_eq!(ids, vec![1, 2]);

    let stamped: i64 = sqlx::query_scalar("SELECT count(*) FROM ser WHERE created_at IS NOT NULL")
        .fetch_one(&pg.pool)
        .await
        .unwrap();
    assert_eq!(stamped, 2);
}

#[tokio::test]
#[ignore = "starts a Postgres container"]
async fn test_schema_drift_and_scoped_null_fill() {
    let pg = TestPostgres::start().await;
    let loader = pg.loader(10);

    let first = batch(vec![vec![
        ("id", Value::Integer(1)),
        ("region", Value::from("north")),
        ("note", Value::from("vip")),
    ]]);
    loader.save(&first, "events").await.unwrap();

    let second = batch(vec![
        vec![("id", Value::Integer(2)), ("region", Value::from("south"))],
        vec![("id", Value::Integer(3)), ("channel", Value::from("web"))],
    ]);
    loader.save(&second, "events").await.unwrap();

    let rows: Vec<(String, Option<String>, Option<String>)> =
        sqlx::query_as("SELECT id, note, channel FROM events ORDER BY id")
            .fetch_all(&pg.pool)
            .await
            .unwrap();
    assert_eq!(
        rows,
        vec![
            ("1".to_string(), Some("vip".to_string()), None),
            ("2".to_string(), None, None),
            ("3".to_string(), None, Some("web".to_string())),
        ]
    );
}

#[tokio::test]
#[ignore = "starts a Postgres container"]
async fn test_chunk_wider_than_one_statement_is_split() {
    let pg = TestPostgres::start().await;

    // 40 000 rows of 2 cells exceed the 65 535 bind parameters of one statement
    let rows: Batch = (0..40_000)
        .map(|i| {
            [("id", Value::Integer(i)), ("code", Value::from("x"))]
                .into_iter()
                .collect::<Record>()
        })
        .collect();
    let summary = pg.loader(40_000).save(&rows, "wide").await.unwrap();

    assert_eq!(summary.chunks, 1);
    assert_eq!(summary.succeeded, 40_000);
    assert_eq!(pg.count("wide").await, 40_000);
}
