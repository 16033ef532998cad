//! An in-memory backend for tests and examples.
//!
//! Inserted rows are kept per table and served back by `find_many`;
//! compiled UPDATE/DELETE statements are recorded rather than interpreted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Context;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::value::{Attributes, Value};

use super::{FindMany, InsertRows, RecordStore, SchemaIntrospector, Statement};

#[derive(Debug, Default)]
pub struct MemoryStore {
    driver: String,
    clock: Option<DateTime<Utc>>,
    tables: Mutex<HashMap<String, Vec<Attributes>>>,
    schema: Mutex<HashMap<String, IndexMap<String, String>>>,
    inserts: Mutex<Vec<InsertRows>>,
    statements: Mutex<Vec<Statement>>,
    lookups: Mutex<Vec<FindMany>>,
    listings: AtomicUsize,
    type_lookups: AtomicUsize,
    remaining_writes: Mutex<Option<usize>>,
}

impl MemoryStore {
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            ..Default::default()
        }
    }

    /// Fixed value for [`RecordStore::now`].
    pub fn with_clock(mut self, now: DateTime<Utc>) -> Self {
        self.clock = Some(now);
        self
    }

    /// Declares a table: `(column, storage type)` pairs in order.
    pub fn with_table(self, table: &str, columns: &[(&str, &str)]) -> Self {
        {
            let mut schema = lock(&self.schema);
            schema.insert(
                table.to_string(),
                columns
                    .iter()
                    .map(|(c, t)| (c.to_string(), t.to_string()))
                    .collect(),
            );
        }
        self
    }

    pub fn seed(&self, table: &str, rows: Vec<Attributes>) {
        lock(&self.tables)
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    /// Lets `n` more writes succeed, then fails every following one.
    pub fn fail_after_writes(&self, n: usize) {
        *lock(&self.remaining_writes) = Some(n);
    }

    pub fn rows(&self, table: &str) -> Vec<Attributes> {
        lock(&self.tables).get(table).cloned().unwrap_or_default()
    }

    pub fn inserts(&self) -> Vec<InsertRows> {
        lock(&self.inserts).clone()
    }

    pub fn statements(&self) -> Vec<Statement> {
        lock(&self.statements).clone()
    }

    pub fn lookups(&self) -> Vec<FindMany> {
        lock(&self.lookups).clone()
    }

    pub fn column_listing_calls(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }

    pub fn column_type_calls(&self) -> usize {
        self.type_lookups.load(Ordering::SeqCst)
    }

    fn take_write(&self) -> anyhow::Result<()> {
        let mut remaining = lock(&self.remaining_writes);
        match remaining.as_mut() {
            Some(0) => anyhow::bail!("memory store: write rejected"),
            Some(n) => *n -= 1,
            None => {}
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait::async_trait]
impl RecordStore for MemoryStore {
    fn driver_name(&self) -> &str {
        &self.driver
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.unwrap_or_else(Utc::now)
    }

    async fn insert(&self, rows: InsertRows) -> anyhow::Result<()> {
        self.take_write()?;

        let stored = rows.rows.iter().map(|row| {
            rows.columns
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect::<Attributes>()
        });
        lock(&self.tables)
            .entry(rows.table.clone())
            .or_default()
            .extend(stored);
        lock(&self.inserts).push(rows);

        Ok(())
    }

    async fn execute(&self, statement: Statement) -> anyhow::Result<u64> {
        self.take_write()?;

        let affected = statement.bindings.len() as u64;
        lock(&self.statements).push(statement);
        Ok(affected)
    }

    async fn find_many(&self, query: FindMany) -> anyhow::Result<Vec<Attributes>> {
        let tables = lock(&self.tables);
        let rows = tables.get(&query.table).map(Vec::as_slice).unwrap_or_default();

        let found = rows
            .iter()
            .filter(|row| {
                row.get(&query.key_name)
                    .is_some_and(|key| query.keys.contains(key))
            })
            .filter(|row| match &query.exclude_trashed {
                Some(column) => row.get(column).map_or(true, Value::is_null),
                None => true,
            })
            .map(|row| {
                if query.keys_only {
                    row.iter()
                        .filter(|(column, _)| **column == query.key_name)
                        .map(|(c, v)| (c.clone(), v.clone()))
                        .collect()
                } else {
                    row.clone()
                }
            })
            .collect();
        drop(tables);

        lock(&self.lookups).push(query);
        Ok(found)
    }
}

#[async_trait::async_trait]
impl SchemaIntrospector for MemoryStore {
    async fn column_listing(&self, table: &str) -> anyhow::Result<Vec<String>> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        let schema = lock(&self.schema);
        Ok(schema
            .get(table)
            .map(|columns| columns.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn column_type(&self, table: &str, column: &str) -> anyhow::Result<String> {
        self.type_lookups.fetch_add(1, Ordering::SeqCst);
        let schema = lock(&self.schema);
        schema
            .get(table)
            .and_then(|columns| columns.get(column))
            .cloned()
            .with_context(|| format!("unknown column {table}.{column}"))
    }
}
