use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::alternate;
use crate::db::grammar::{ColumnCasts, Grammar};
use crate::db::{SchemaIntrospector, Statement};
use crate::entity::KeyType;
use crate::result::{BatchError, Result};
use crate::settings::Settings;
use crate::value::Value;

use super::{ensure_aligned, unique_value, update_using_where_in, Updater};

const FALLBACK_CAST: &str = "text";

/// Storage type name to PostgreSQL cast, plus the per-column resolutions.
///
/// Resolved columns are cached for the life of the registry and never
/// invalidated; register custom rules before the first batch touching the
/// column.
#[derive(Debug)]
pub struct CastTypes {
    rules: RwLock<HashMap<String, String>>,
    resolved: RwLock<HashMap<(String, String), String>>,
}

impl Default for CastTypes {
    fn default() -> Self {
        let seed: &[(&str, &str)] = &[
            ("smallint", "integer"),
            ("integer", "integer"),
            ("int", "integer"),
            ("int2", "integer"),
            ("int4", "integer"),
            ("bigint", "bigint"),
            ("int8", "bigint"),
            ("decimal", "float"),
            ("numeric", "float"),
            ("float", "float"),
            ("real", "float"),
            ("float4", "float"),
            ("float8", "float"),
            ("double precision", "float"),
            ("boolean", "boolean"),
            ("bool", "boolean"),
            ("uuid", "uuid"),
            ("guid", "uuid"),
            ("datetime", "timestamp"),
            ("datetimetz", "timestamp"),
            ("timestamp", "timestamp"),
            ("timestamptz", "timestamptz"),
            ("timestamp without time zone", "timestamp"),
            ("timestamp with time zone", "timestamptz"),
            ("date", "date"),
            ("time", "time"),
            ("time without time zone", "time"),
            ("time with time zone", "timetz"),
            ("json", "json"),
            ("jsonb", "jsonb"),
            ("blob", "bytea"),
            ("binary", "bytea"),
            ("bytea", "bytea"),
            ("inet", "inet"),
            ("macaddr", "macaddr"),
            ("string", "text"),
            ("text", "text"),
            ("varchar", "text"),
            ("character varying", "text"),
        ];

        Self {
            rules: RwLock::new(
                seed.iter()
                    .map(|(storage, cast)| (storage.to_string(), cast.to_string()))
                    .collect(),
            ),
            resolved: RwLock::new(HashMap::new()),
        }
    }
}

impl CastTypes {
    /// Adds or overrides the cast used for columns of `storage_type`.
    pub fn register(&self, storage_type: &str, cast: &str) -> Result<()> {
        let storage_type = storage_type.trim().to_ascii_lowercase();
        if storage_type.is_empty() {
            return Err(BatchError::invalid_registration(cast, "storage type is empty"));
        }
        if !is_cast_type(cast) {
            return Err(BatchError::invalid_registration(
                &storage_type,
                format!("'{cast}' is not a usable type name"),
            ));
        }

        let mut lock = self.rules.write().unwrap_or_else(|e| e.into_inner());
        lock.insert(storage_type, cast.to_string());
        Ok(())
    }

    /// Cast for a storage type name, `text` when unknown.
    pub fn cast_for(&self, storage_type: &str) -> String {
        let storage_type = storage_type.trim().to_ascii_lowercase();
        let lock = self.rules.read().unwrap_or_else(|e| e.into_inner());
        lock.get(&storage_type)
            .cloned()
            .unwrap_or_else(|| FALLBACK_CAST.to_string())
    }

    pub async fn cast_for_column(
        &self,
        schema: &dyn SchemaIntrospector,
        table: &str,
        column: &str,
    ) -> Result<String> {
        let cache_key = (table.to_string(), column.to_string());
        {
            let lock = self.resolved.read().unwrap_or_else(|e| e.into_inner());
            if let Some(cast) = lock.get(&cache_key) {
                return Ok(cast.clone());
            }
        }

        let storage_type = schema.column_type(table, column).await?;
        let cast = self.cast_for(&storage_type);
        tracing::debug!(table, column, storage_type = storage_type.as_str(), cast = cast.as_str(), "resolved column cast");

        let mut lock = self.resolved.write().unwrap_or_else(|e| e.into_inner());
        Ok(lock.entry(cache_key).or_insert(cast).clone())
    }
}

/// Letters, digits, `_`, spaces, a precision suffix `(p[,s])` and a
/// trailing `[]`; nothing that could end the cast expression.
fn is_cast_type(cast: &str) -> bool {
    let base = cast.strip_suffix("[]").unwrap_or(cast);
    let (name, precision) = match base.split_once('(') {
        Some((name, rest)) => match rest.strip_suffix(')') {
            Some(p) => (name, Some(p)),
            None => return false,
        },
        None => (base, None),
    };

    let name_ok = name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ' ');
    let precision_ok = precision.map_or(true, |p| {
        !p.is_empty() && p.split(',').all(|n| !n.trim().is_empty() && n.trim().chars().all(|c| c.is_ascii_digit()))
    });

    name_ok && precision_ok
}

/// Joins the table against a `VALUES` list of `(key, value)` pairs. Every
/// placeholder carries its cast, so the list settles on the column's type
/// whatever the driver bound (a text `NULL` next to a `bigint`, say).
#[derive(Debug, Clone)]
pub struct PostgresUpdater {
    cast_types: Arc<CastTypes>,
}

impl PostgresUpdater {
    pub fn new(cast_types: Arc<CastTypes>) -> Self {
        Self { cast_types }
    }

    pub fn cast_types(&self) -> &Arc<CastTypes> {
        &self.cast_types
    }

    pub fn key_cast(key_type: KeyType) -> &'static str {
        match key_type {
            KeyType::Integer => "bigint",
            KeyType::Text | KeyType::Other => "text",
        }
    }

    pub fn compile(
        table: &str,
        key_name: &str,
        key_type: KeyType,
        column: &str,
        cast: &str,
        values: Vec<Value>,
        ids: Vec<Value>,
    ) -> Result<Statement> {
        let grammar = Grammar::Postgres;
        let count = values.len();
        let bindings = alternate::interleave(vec![ids, values])?;

        let key_cast = Self::key_cast(key_type);

        let params = grammar.parameters(0, count * 2);
        let rows = params
            .chunks(2)
            .map(|p| format!("(({})::{key_cast}, ({})::{cast})", p[0], p[1]))
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            "UPDATE {} AS t SET {} = batch_values.row_value \
             FROM (VALUES {rows}) AS batch_values(row_key, row_value) \
             WHERE batch_values.row_key = t.{}::{key_cast}",
            grammar.wrap(table),
            grammar.wrap(column),
            grammar.wrap(key_name),
        );

        Ok(Statement::new(sql, bindings))
    }
}

#[async_trait::async_trait]
impl Updater for PostgresUpdater {
    fn grammar(&self) -> Grammar {
        Grammar::Postgres
    }

    async fn perform_update(
        &self,
        settings: &Settings,
        column: &str,
        values: Vec<Value>,
        ids: Vec<Value>,
    ) -> Result<()> {
        ensure_aligned(&values, &ids)?;
        if ids.is_empty() {
            return Ok(());
        }

        let cast = self
            .cast_types
            .cast_for_column(settings.schema(), &settings.table, column)
            .await?;

        if let Some(value) = unique_value(&values) {
            let key_cast = self
                .cast_types
                .cast_for_column(settings.schema(), &settings.table, &settings.key_name)
                .await?;
            let casts = ColumnCasts::none()
                .with(column, cast)
                .with(settings.key_name.as_str(), key_cast);
            return update_using_where_in(
                settings,
                Grammar::Postgres,
                column,
                ids,
                value.clone(),
                &casts,
            )
            .await;
        }

        let statement = Self::compile(
            &settings.table,
            &settings.key_name,
            settings.key_type,
            column,
            &cast,
            values,
            ids,
        )?;
        tracing::trace!(sql = %statement.sql, "values join update");
        settings.store().execute(statement).await?;

        Ok(())
    }
}
