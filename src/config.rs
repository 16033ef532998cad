use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::db::SchemaIntrospector;
use crate::entity::EntityType;
use crate::result::{BatchError, Result};
use crate::updater::{self, CastTypes, Updater, UpdaterRegistry};

pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Serializable configuration, e.g. loaded with
/// [`FromJson`](crate::json::FromJson).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Options {
    pub default_chunk_size: usize,
    pub default_queue: Option<String>,
    /// Driver name to built-in strategy name (`generic` or `postgres`).
    pub updaters: BTreeMap<String, String>,
    /// Column storage type to PostgreSQL cast.
    pub cast_types: BTreeMap<String, String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            default_chunk_size: DEFAULT_CHUNK_SIZE,
            default_queue: None,
            updaters: BTreeMap::new(),
            cast_types: BTreeMap::new(),
        }
    }
}

/// Registries and caches shared by every batch run against them.
#[derive(Debug)]
pub struct BatchConfig {
    updaters: UpdaterRegistry,
    cast_types: Arc<CastTypes>,
    default_chunk_size: AtomicUsize,
    default_queue: RwLock<Option<String>>,
    columns: ColumnCache,
}

impl Default for BatchConfig {
    fn default() -> Self {
        let cast_types = Arc::new(CastTypes::default());
        Self {
            updaters: UpdaterRegistry::seeded(cast_types.clone()),
            cast_types,
            default_chunk_size: AtomicUsize::new(DEFAULT_CHUNK_SIZE),
            default_queue: RwLock::new(None),
            columns: ColumnCache::default(),
        }
    }
}

impl BatchConfig {
    pub fn from_options(options: &Options) -> Result<Self> {
        let this = Self::default();
        this.set_default_chunk_size(options.default_chunk_size)?;
        this.set_default_queue(options.default_queue.clone());

        for (storage_type, cast) in &options.cast_types {
            this.register_cast_type(storage_type, cast)?;
        }
        for (driver, strategy) in &options.updaters {
            this.register_strategy(driver, strategy)?;
        }

        Ok(this)
    }

    pub fn register_updater(&self, driver: &str, updater: Arc<dyn Updater>) -> Result<()> {
        self.updaters.register(driver, updater)?;
        tracing::debug!(driver, "updater registered");
        Ok(())
    }

    /// Registers one of the built-in strategies by name.
    pub fn register_strategy(&self, driver: &str, strategy: &str) -> Result<()> {
        let updater = updater::strategy(strategy, &self.cast_types)?;
        self.register_updater(driver, updater)
    }

    pub fn register_cast_type(&self, storage_type: &str, cast: &str) -> Result<()> {
        self.cast_types.register(storage_type, cast)
    }

    pub fn set_default_chunk_size(&self, size: usize) -> Result<()> {
        if size == 0 {
            return Err(BatchError::InvalidChunkSize(size));
        }
        self.default_chunk_size.store(size, Ordering::Relaxed);
        Ok(())
    }

    pub fn set_default_queue(&self, queue: Option<String>) {
        *self.default_queue.write().unwrap_or_else(|e| e.into_inner()) = queue;
    }

    pub fn default_chunk_size(&self) -> usize {
        self.default_chunk_size.load(Ordering::Relaxed)
    }

    pub fn default_queue(&self) -> Option<String> {
        self.default_queue
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn updaters(&self) -> &UpdaterRegistry {
        &self.updaters
    }

    pub fn cast_types(&self) -> &Arc<CastTypes> {
        &self.cast_types
    }

    pub fn columns(&self) -> &ColumnCache {
        &self.columns
    }
}

/// Non-key columns per entity, loaded once and kept for the life of the
/// config.
#[derive(Debug, Default)]
pub struct ColumnCache {
    entries: RwLock<HashMap<String, Arc<[String]>>>,
}

impl ColumnCache {
    pub async fn get_or_load(
        &self,
        entity: &EntityType,
        schema: &dyn SchemaIntrospector,
    ) -> Result<Arc<[String]>> {
        {
            let lock = self.entries.read().unwrap_or_else(|e| e.into_inner());
            if let Some(columns) = lock.get(entity.name()) {
                return Ok(columns.clone());
            }
        }

        let columns: Arc<[String]> = schema
            .column_listing(entity.table())
            .await?
            .into_iter()
            .filter(|column| column != entity.key_name())
            .collect();
        tracing::debug!(entity = entity.name(), columns = columns.len(), "column listing cached");

        let mut lock = self.entries.write().unwrap_or_else(|e| e.into_inner());
        Ok(lock
            .entry(entity.name().to_string())
            .or_insert(columns)
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::grammar::Grammar;
    use crate::db::memory::MemoryStore;
    use crate::json::FromJson;

    #[test]
    fn options_from_json() {
        let options = Options::from_json_str(
            r#"{"default_chunk_size": 100, "updaters": {"mariadb": "generic"}, "cast_types": {"citext": "text"}}"#,
        )
        .unwrap();
        assert_eq!(options.default_chunk_size, 100);
        assert_eq!(options.default_queue, None);

        let config = BatchConfig::from_options(&options).unwrap();
        assert_eq!(config.default_chunk_size(), 100);
        assert_eq!(config.updaters().resolve("mariadb").unwrap().grammar(), Grammar::Generic);
        assert_eq!(config.cast_types().cast_for("citext"), "text");
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let config = BatchConfig::default();
        assert_eq!(config.default_chunk_size(), 500);
        assert!(matches!(
            config.set_default_chunk_size(0),
            Err(BatchError::InvalidChunkSize(0))
        ));
        assert_eq!(config.default_chunk_size(), 500);

        let options = Options {
            updaters: BTreeMap::from([("x".to_string(), "oracle".to_string())]),
            ..Default::default()
        };
        assert!(matches!(
            BatchConfig::from_options(&options),
            Err(BatchError::InvalidStrategyRegistration { .. })
        ));
    }

    #[tokio::test]
    async fn column_listing_is_cached_without_key() -> anyhow::Result<()> {
        let store = MemoryStore::new("sqlite").with_table(
            "cars",
            &[("id", "integer"), ("name", "text"), ("color", "text")],
        );
        let cache = ColumnCache::default();
        let car = EntityType::new("car", "cars");

        let first = cache.get_or_load(&car, &store).await?;
        let second = cache.get_or_load(&car, &store).await?;
        assert_eq!(&*first, &["name".to_string(), "color".to_string()]);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.column_listing_calls(), 1);
        Ok(())
    }
}
