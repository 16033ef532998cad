//! A PostgreSQL [`RecordStore`] over a `diesel-async` pool.

use std::sync::Arc;

use anyhow::Context;
use diesel::pg::Pg;
use diesel::query_builder::BoxedSqlQuery;
use diesel::sql_types::{BigInt, Binary, Bool, Double, Jsonb, Nullable, Text, Timestamptz};
use diesel::QueryableByName;
use diesel_async::RunQueryDsl;

use crate::db::grammar::{ColumnCasts, Grammar};
use crate::db::{FindMany, InsertRows, RecordStore, SchemaIntrospector, Statement};
use crate::json::attributes_from_json;
use crate::updater::CastTypes;
use crate::value::{Attributes, Value};

pub mod pg_pool;

use pg_pool::{PgConn, PgPool};

type PgQuery = BoxedSqlQuery<'static, Pg, diesel::query_builder::SqlQuery>;

/// Values are bound with the driver's own types, so every placeholder is
/// cast to its column's type, resolved through [`CastTypes`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    cast_types: Arc<CastTypes>,
}

#[derive(QueryableByName)]
struct JsonRow {
    #[diesel(sql_type = Jsonb)]
    record_json: serde_json::Value,
}

#[derive(QueryableByName)]
struct NameRow {
    #[diesel(sql_type = Text)]
    name: String,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            cast_types: Arc::new(CastTypes::default()),
        }
    }

    /// Share cast rules (and their column cache) with a
    /// [`BatchConfig`](crate::config::BatchConfig).
    pub fn with_cast_types(mut self, cast_types: Arc<CastTypes>) -> Self {
        self.cast_types = cast_types;
        self
    }

    /// Uses the pool set up by [`pg_pool::init`].
    pub fn from_global() -> anyhow::Result<Self> {
        let pool = pg_pool::get_pool().context("the global postgres pool is not initialized")?;
        Ok(Self::new(pool.clone()))
    }

    async fn conn(&self) -> anyhow::Result<PgConn> {
        Ok(self.pool.get().await?)
    }

    async fn casts(&self, table: &str, columns: &[String]) -> anyhow::Result<ColumnCasts> {
        let mut casts = ColumnCasts::none();
        for column in columns {
            let cast = self.cast_types.cast_for_column(self, table, column).await?;
            casts.insert(column.as_str(), cast);
        }
        Ok(casts)
    }

    fn query(statement: Statement) -> PgQuery {
        statement
            .bindings
            .into_iter()
            .fold(diesel::sql_query(statement.sql).into_boxed::<Pg>(), bind_value)
    }
}

fn bind_value(query: PgQuery, value: Value) -> PgQuery {
    match value {
        // The placeholder cast gives the NULL its column type.
        Value::Null => query.bind::<Nullable<Text>, _>(None::<String>),
        Value::Bool(v) => query.bind::<Bool, _>(v),
        Value::Int(v) => query.bind::<BigInt, _>(v),
        Value::Float(v) => query.bind::<Double, _>(v),
        Value::Text(v) => query.bind::<Text, _>(v),
        Value::Timestamp(v) => query.bind::<Timestamptz, _>(v),
        Value::Json(v) => query.bind::<Jsonb, _>(v),
        Value::Bytes(v) => query.bind::<Binary, _>(v),
    }
}

/// `schema.table` into its schema (if any) and table name.
fn split_table(table: &str) -> (Option<String>, String) {
    match table.split_once('.') {
        Some((schema, table)) => (Some(schema.to_string()), table.to_string()),
        None => (None, table.to_string()),
    }
}

#[async_trait::async_trait]
impl RecordStore for PgStore {
    fn driver_name(&self) -> &str {
        "pgsql"
    }

    async fn insert(&self, rows: InsertRows) -> anyhow::Result<()> {
        let casts = self.casts(&rows.table, &rows.columns).await?;
        let statement = Grammar::Postgres.compile_insert(&rows, &casts);
        let mut conn = self.conn().await?;
        Self::query(statement).execute(&mut *conn).await?;
        Ok(())
    }

    async fn execute(&self, statement: Statement) -> anyhow::Result<u64> {
        let mut conn = self.conn().await?;
        let affected = Self::query(statement).execute(&mut *conn).await?;
        Ok(affected as u64)
    }

    async fn find_many(&self, query: FindMany) -> anyhow::Result<Vec<Attributes>> {
        let casts = self
            .casts(&query.table, std::slice::from_ref(&query.key_name))
            .await?;
        let inner = Grammar::Postgres.compile_find_many(&query, &casts);
        let statement = Statement::new(
            format!("SELECT row_to_json(found)::jsonb AS record_json FROM ({}) AS found", inner.sql),
            inner.bindings,
        );

        let mut conn = self.conn().await?;
        let rows: Vec<JsonRow> = Self::query(statement).load(&mut *conn).await?;

        rows.into_iter().map(|r| attributes_from_json(r.record_json)).collect()
    }
}

#[async_trait::async_trait]
impl SchemaIntrospector for PgStore {
    async fn column_listing(&self, table: &str) -> anyhow::Result<Vec<String>> {
        let (schema, table_name) = split_table(table);
        let query = diesel::sql_query(
            "SELECT column_name::text AS name FROM information_schema.columns \
             WHERE table_schema = COALESCE($1, current_schema()) AND table_name = $2 \
             ORDER BY ordinal_position",
        )
        .bind::<Nullable<Text>, _>(schema)
        .bind::<Text, _>(table_name);

        let mut conn = self.conn().await?;
        let rows: Vec<NameRow> = query.load(&mut *conn).await?;

        Ok(rows.into_iter().map(|r| r.name).collect())
    }

    async fn column_type(&self, table: &str, column: &str) -> anyhow::Result<String> {
        let (schema, table_name) = split_table(table);
        let query = diesel::sql_query(
            "SELECT data_type::text AS name FROM information_schema.columns \
             WHERE table_schema = COALESCE($1, current_schema()) AND table_name = $2 \
             AND column_name = $3",
        )
        .bind::<Nullable<Text>, _>(schema)
        .bind::<Text, _>(table_name)
        .bind::<Text, _>(column.to_string());

        let mut conn = self.conn().await?;
        let mut rows: Vec<NameRow> = query.load(&mut *conn).await?;

        rows.pop()
            .map(|r| r.name)
            .with_context(|| format!("unknown column {table}.{column}"))
    }
}

impl std::fmt::Debug for PgStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStore")
            .field("status", &self.pool.status())
            .finish()
    }
}
