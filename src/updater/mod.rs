//! Dialect strategies that rewrite one column across many rows in a single
//! UPDATE statement.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::db::grammar::{ColumnCasts, Grammar};
use crate::entity::is_identifier;
use crate::result::{BatchError, Result};
use crate::settings::Settings;
use crate::value::Value;

pub mod generic;
pub mod postgres;

pub use generic::GenericUpdater;
pub use postgres::{CastTypes, PostgresUpdater};

#[async_trait::async_trait]
pub trait Updater: Send + Sync + 'static {
    /// Quoting and placeholder rules of the backend.
    fn grammar(&self) -> Grammar;

    /// Sets `column` to `values[i]` on the row keyed by `ids[i]`.
    async fn perform_update(
        &self,
        settings: &Settings,
        column: &str,
        values: Vec<Value>,
        ids: Vec<Value>,
    ) -> Result<()>;
}

/// The single value shared by every row, if there is one.
pub fn unique_value(values: &[Value]) -> Option<&Value> {
    let first = values.first()?;
    values.iter().all(|v| v == first).then_some(first)
}

pub(crate) fn ensure_aligned(values: &[Value], ids: &[Value]) -> Result<()> {
    if values.len() != ids.len() {
        return Err(BatchError::SequenceLengthMismatch {
            expected: ids.len(),
            actual: values.len(),
        });
    }
    Ok(())
}

/// `UPDATE table SET column = ? WHERE key IN (...)` for the all-equal case.
pub(crate) async fn update_using_where_in(
    settings: &Settings,
    grammar: Grammar,
    column: &str,
    ids: Vec<Value>,
    value: Value,
    casts: &ColumnCasts,
) -> Result<()> {
    let statement = grammar.compile_update_where_in(
        &settings.table,
        &settings.key_name,
        vec![(column, value)],
        ids,
        casts,
    );
    tracing::trace!(sql = %statement.sql, "unique value update");
    settings.store().execute(statement).await?;
    Ok(())
}

/// Built-in strategies addressable by name from configuration.
pub fn strategy(name: &str, cast_types: &Arc<CastTypes>) -> Result<Arc<dyn Updater>> {
    match name {
        "generic" => Ok(Arc::new(GenericUpdater::default())),
        "postgres" => Ok(Arc::new(PostgresUpdater::new(cast_types.clone()))),
        other => Err(BatchError::invalid_registration(
            other,
            "unknown updater strategy, expected 'generic' or 'postgres'",
        )),
    }
}

/// Driver name to strategy map.
pub struct UpdaterRegistry {
    updaters: RwLock<HashMap<String, Arc<dyn Updater>>>,
}

impl UpdaterRegistry {
    pub fn empty() -> Self {
        Self {
            updaters: RwLock::new(HashMap::new()),
        }
    }

    /// `pgsql`/`postgres` use the Postgres strategy, `mysql`/`sqlite` the
    /// generic one.
    pub fn seeded(cast_types: Arc<CastTypes>) -> Self {
        let postgres: Arc<dyn Updater> = Arc::new(PostgresUpdater::new(cast_types));
        let generic: Arc<dyn Updater> = Arc::new(GenericUpdater::default());

        let mut updaters = HashMap::new();
        updaters.insert("pgsql".to_string(), postgres.clone());
        updaters.insert("postgres".to_string(), postgres);
        updaters.insert("mysql".to_string(), generic.clone());
        updaters.insert("sqlite".to_string(), generic);

        Self {
            updaters: RwLock::new(updaters),
        }
    }

    pub fn register(&self, driver: &str, updater: Arc<dyn Updater>) -> Result<()> {
        if !is_identifier(driver) {
            return Err(BatchError::invalid_registration(
                driver,
                "driver name must be a plain identifier",
            ));
        }

        let mut lock = self.updaters.write().unwrap_or_else(|e| e.into_inner());
        lock.insert(driver.to_string(), updater);
        Ok(())
    }

    pub fn resolve(&self, driver: &str) -> Result<Arc<dyn Updater>> {
        let lock = self.updaters.read().unwrap_or_else(|e| e.into_inner());
        lock.get(driver)
            .cloned()
            .ok_or_else(|| BatchError::UnregisteredDialect(driver.to_string()))
    }

    pub fn drivers(&self) -> Vec<String> {
        let lock = self.updaters.read().unwrap_or_else(|e| e.into_inner());
        let mut drivers: Vec<String> = lock.keys().cloned().collect();
        drivers.sort();
        drivers
    }
}

impl std::fmt::Debug for UpdaterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdaterRegistry")
            .field("drivers", &self.drivers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_value_detection() {
        assert_eq!(unique_value(&[]), None);
        assert_eq!(unique_value(&[Value::from(1), Value::from(1)]), Some(&Value::from(1)));
        assert_eq!(unique_value(&[Value::Null, Value::Null]), Some(&Value::Null));
        assert_eq!(unique_value(&[Value::from(1), Value::from(2)]), None);
        assert_eq!(unique_value(&[Value::Null, Value::from(0)]), None);
    }

    #[test]
    fn seeded_registry_knows_builtin_drivers() {
        let registry = UpdaterRegistry::seeded(Arc::new(CastTypes::default()));
        assert_eq!(registry.drivers(), vec!["mysql", "pgsql", "postgres", "sqlite"]);
        assert_eq!(registry.resolve("pgsql").unwrap().grammar(), Grammar::Postgres);
        assert_eq!(registry.resolve("sqlite").unwrap().grammar(), Grammar::Generic);

        let err = registry.resolve("sqlsrv").err().unwrap();
        assert!(matches!(err, BatchError::UnregisteredDialect(d) if d == "sqlsrv"));
    }

    #[test]
    fn registration_validates_names_and_strategies() {
        let casts = Arc::new(CastTypes::default());
        let registry = UpdaterRegistry::empty();

        let err = registry.register("", Arc::new(GenericUpdater::default())).unwrap_err();
        assert!(matches!(err, BatchError::InvalidStrategyRegistration { .. }));

        let err = strategy("mariadb-fast", &casts).err().unwrap();
        assert!(matches!(err, BatchError::InvalidStrategyRegistration { .. }));

        registry.register("mariadb", strategy("generic", &casts).unwrap()).unwrap();
        assert!(registry.resolve("mariadb").is_ok());
    }
}
