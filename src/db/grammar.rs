//! SQL text per dialect. Only identifiers and placeholder counts become
//! text; every value goes to the binding list.

use std::collections::HashMap;

use crate::value::Value;

use super::{FindMany, InsertRows, Statement};

/// Type casts for the placeholders bound to each column. Only the Postgres
/// grammar writes them: its drivers bind typed parameters, so text meant for
/// a `uuid` or `date` column, or a `NULL` bound as text, must be cast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnCasts(HashMap<String, String>);

impl ColumnCasts {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, cast: impl Into<String>) -> Self {
        self.insert(column, cast);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, cast: impl Into<String>) {
        self.0.insert(column.into(), cast.into());
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.0.get(column).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Grammar {
    /// Backtick-quoted identifiers, `?` placeholders (MySQL, SQLite).
    Generic,
    /// Double-quoted identifiers, `$n` placeholders.
    Postgres,
}

impl Grammar {
    /// Best guess from a driver name when no updater says otherwise.
    pub fn for_driver(driver: &str) -> Self {
        match driver {
            "pgsql" | "postgres" | "postgresql" => Grammar::Postgres,
            _ => Grammar::Generic,
        }
    }

    fn quote_char(&self) -> char {
        match self {
            Grammar::Generic => '`',
            Grammar::Postgres => '"',
        }
    }

    /// Quotes `name`, or each segment of `schema.table`.
    pub fn wrap(&self, name: &str) -> String {
        name.split('.')
            .map(|segment| self.wrap_segment(segment))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn wrap_segment(&self, segment: &str) -> String {
        let q = self.quote_char();
        let escaped = segment.replace(q, &format!("{q}{q}"));
        format!("{q}{escaped}{q}")
    }

    /// Placeholder for the 1-based binding `position`.
    pub fn parameter(&self, position: usize) -> String {
        match self {
            Grammar::Generic => "?".to_string(),
            Grammar::Postgres => format!("${position}"),
        }
    }

    /// `count` placeholders starting after `offset` bindings.
    pub fn parameters(&self, offset: usize, count: usize) -> Vec<String> {
        (offset + 1..=offset + count)
            .map(|position| self.parameter(position))
            .collect()
    }

    /// Placeholder for a value of `column`, wrapped in its cast if any.
    pub fn typed_parameter(&self, position: usize, column: &str, casts: &ColumnCasts) -> String {
        match (self, casts.get(column)) {
            (Grammar::Postgres, Some(cast)) => format!("({})::{cast}", self.parameter(position)),
            _ => self.parameter(position),
        }
    }

    fn typed_parameters(&self, offset: usize, count: usize, column: &str, casts: &ColumnCasts) -> String {
        (offset + 1..=offset + count)
            .map(|position| self.typed_parameter(position, column, casts))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn compile_insert(&self, insert: &InsertRows, casts: &ColumnCasts) -> Statement {
        let columns = insert
            .columns
            .iter()
            .map(|c| self.wrap(c))
            .collect::<Vec<_>>()
            .join(", ");

        let width = insert.columns.len();
        let tuples = (0..insert.rows.len())
            .map(|row| {
                let placeholders = insert
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(i, column)| self.typed_parameter(row * width + i + 1, column, casts))
                    .collect::<Vec<_>>();
                format!("({})", placeholders.join(", "))
            })
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            "INSERT INTO {} ({columns}) VALUES {tuples}",
            self.wrap(&insert.table)
        );
        let bindings = insert.rows.iter().flatten().cloned().collect();

        Statement::new(sql, bindings)
    }

    pub fn compile_find_many(&self, query: &FindMany, casts: &ColumnCasts) -> Statement {
        let selected = if query.keys_only {
            self.wrap(&query.key_name)
        } else {
            "*".to_string()
        };
        let mut sql = format!(
            "SELECT {selected} FROM {} WHERE {} IN ({})",
            self.wrap(&query.table),
            self.wrap(&query.key_name),
            self.typed_parameters(0, query.keys.len(), &query.key_name, casts)
        );
        if let Some(deleted_at) = &query.exclude_trashed {
            sql.push_str(&format!(" AND {} IS NULL", self.wrap(deleted_at)));
        }

        Statement::new(sql, query.keys.clone())
    }

    /// `UPDATE table SET a = ?, b = ? WHERE key IN (...)`
    pub fn compile_update_where_in(
        &self,
        table: &str,
        key_name: &str,
        assignments: Vec<(&str, Value)>,
        ids: Vec<Value>,
        casts: &ColumnCasts,
    ) -> Statement {
        let set = assignments
            .iter()
            .enumerate()
            .map(|(i, (column, _))| {
                format!("{} = {}", self.wrap(column), self.typed_parameter(i + 1, column, casts))
            })
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {set} WHERE {} IN ({})",
            self.wrap(table),
            self.wrap(key_name),
            self.typed_parameters(assignments.len(), ids.len(), key_name, casts)
        );

        let mut bindings: Vec<Value> = assignments.into_iter().map(|(_, v)| v).collect();
        bindings.extend(ids);

        Statement::new(sql, bindings)
    }

    pub fn compile_delete(
        &self,
        table: &str,
        key_name: &str,
        ids: Vec<Value>,
        casts: &ColumnCasts,
    ) -> Statement {
        let sql = format!(
            "DELETE FROM {} WHERE {} IN ({})",
            self.wrap(table),
            self.wrap(key_name),
            self.typed_parameters(0, ids.len(), key_name, casts)
        );

        Statement::new(sql, ids)
    }
}
