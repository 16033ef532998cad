use crate::alternate;
use crate::db::grammar::{ColumnCasts, Grammar};
use crate::db::Statement;
use crate::result::Result;
use crate::settings::Settings;
use crate::value::Value;

use super::{ensure_aligned, unique_value, update_using_where_in, Updater};

/// `UPDATE t SET c = CASE WHEN key = ? THEN ? ... END WHERE key IN (...)`
#[derive(Debug, Clone, Copy)]
pub struct GenericUpdater {
    grammar: Grammar,
}

impl Default for GenericUpdater {
    fn default() -> Self {
        Self {
            grammar: Grammar::Generic,
        }
    }
}

impl GenericUpdater {
    /// The CASE form is portable; this lets it run with another quoting and
    /// placeholder style.
    pub fn with_grammar(grammar: Grammar) -> Self {
        Self { grammar }
    }

    pub fn compile(
        &self,
        table: &str,
        key_name: &str,
        column: &str,
        values: Vec<Value>,
        ids: Vec<Value>,
    ) -> Result<Statement> {
        let count = values.len();
        let mut bindings = alternate::interleave(vec![ids.clone(), values])?;
        bindings.extend(ids);

        let key = self.grammar.wrap(key_name);
        let params = self.grammar.parameters(0, count * 3);
        let (pairs, in_list) = params.split_at(count * 2);
        let cases = pairs
            .chunks(2)
            .map(|p| format!("WHEN {key} = {} THEN {}", p[0], p[1]))
            .collect::<Vec<_>>()
            .join(" ");

        let sql = format!(
            "UPDATE {} SET {} = CASE {cases} END WHERE {key} IN ({})",
            self.grammar.wrap(table),
            self.grammar.wrap(column),
            in_list.join(", ")
        );

        Ok(Statement::new(sql, bindings))
    }
}

#[async_trait::async_trait]
impl Updater for GenericUpdater {
    fn grammar(&self) -> Grammar {
        self.grammar
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

        if let Some(value) = unique_value(&values) {
            return update_using_where_in(
                settings,
                self.grammar,
                column,
                ids,
                value.clone(),
                &ColumnCasts::none(),
            )
            .await;
        }

        let statement = self.compile(&settings.table, &settings.key_name, column, values, ids)?;
        tracing::trace!(sql = %statement.sql, "case update");
        settings.store().execute(statement).await?;

        Ok(())
    }
}
