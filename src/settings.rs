use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::BatchConfig;
use crate::db::grammar::{ColumnCasts, Grammar};
use crate::db::{Connection, RecordStore, SchemaIntrospector};
use crate::entity::{EntityType, KeyType};
use crate::event::{Channel, EventDispatcher, EventKind};
use crate::handler::BatchContext;
use crate::result::Result;
use crate::updater::Updater;

/// Everything a batch run needs to know about its entity type, captured
/// once so the timestamp and the listener snapshot hold for every chunk.
pub struct Settings {
    entity: EntityType,
    pub table: String,
    pub key_name: String,
    pub key_type: KeyType,
    pub uses_timestamps: bool,
    pub now: DateTime<Utc>,
    connection: Connection,
    config: Arc<BatchConfig>,
    dispatcher: Arc<dyn EventDispatcher>,
    generic_listened: HashMap<EventKind, bool>,
    custom_listened: HashMap<EventKind, Channel>,
}

impl Settings {
    pub fn resolve(entity: &EntityType, ctx: &BatchContext) -> Result<Self> {
        entity.validate()?;

        let connection = ctx.connections().connection(entity)?;
        let dispatcher = ctx.events().clone();
        let now = connection.store.now();

        let mut generic_listened = HashMap::new();
        let mut custom_listened = HashMap::new();
        for kind in EventKind::all() {
            let generic = dispatcher.has_listeners(&Channel::model(entity.name(), kind));
            generic_listened.insert(kind, generic);

            if let Some(name) = entity.custom_event_for(kind) {
                let channel = Channel::custom(name);
                if dispatcher.has_listeners(&channel) {
                    custom_listened.insert(kind, channel);
                }
            }
        }

        tracing::trace!(
            entity = entity.name(),
            driver = connection.driver_name(),
            "settings resolved"
        );

        Ok(Self {
            entity: entity.clone(),
            table: entity.table().to_string(),
            key_name: entity.key_name().to_string(),
            key_type: entity.key_type(),
            uses_timestamps: entity.uses_timestamps(),
            now,
            connection,
            config: ctx.config().clone(),
            dispatcher,
            generic_listened,
            custom_listened,
        })
    }

    pub fn entity(&self) -> &EntityType {
        &self.entity
    }

    /// A generic or a custom listener exists for `kind`.
    pub fn dispatchable(&self, kind: EventKind) -> bool {
        self.listens_generic(kind) || self.custom_listened.contains_key(&kind)
    }

    pub fn listens_generic(&self, kind: EventKind) -> bool {
        self.generic_listened.get(&kind).copied().unwrap_or(false)
    }

    /// The custom channel for `kind`, when it had listeners at resolve time.
    pub fn custom_event(&self, kind: EventKind) -> Option<&Channel> {
        self.custom_listened.get(&kind)
    }

    pub fn model_channel(&self, kind: EventKind) -> Channel {
        Channel::model(self.entity.name(), kind)
    }

    pub fn dispatcher(&self) -> &dyn EventDispatcher {
        self.dispatcher.as_ref()
    }

    /// Non-key columns of the table.
    pub async fn columns(&self) -> Result<Arc<[String]>> {
        self.config
            .columns()
            .get_or_load(&self.entity, self.schema())
            .await
    }

    pub fn store(&self) -> &dyn RecordStore {
        self.connection.store.as_ref()
    }

    pub fn schema(&self) -> &dyn SchemaIntrospector {
        self.connection.schema.as_ref()
    }

    pub fn driver_name(&self) -> &str {
        self.connection.driver_name()
    }

    pub fn updater(&self) -> Result<Arc<dyn Updater>> {
        self.config.updaters().resolve(self.driver_name())
    }

    /// The registered updater's grammar, or a guess from the driver name.
    pub fn grammar(&self) -> Grammar {
        self.updater()
            .map(|updater| updater.grammar())
            .unwrap_or_else(|_| Grammar::for_driver(self.driver_name()))
    }

    /// Placeholder casts for `columns` of the table. Empty unless the
    /// grammar is Postgres.
    pub async fn casts(&self, columns: &[&str]) -> Result<ColumnCasts> {
        let mut casts = ColumnCasts::none();
        if self.grammar() != Grammar::Postgres {
            return Ok(casts);
        }

        for column in columns {
            let cast = self
                .config
                .cast_types()
                .cast_for_column(self.schema(), &self.table, column)
                .await?;
            casts.insert(*column, cast);
        }
        Ok(casts)
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("entity", &self.entity.name())
            .field("table", &self.table)
            .field("key_name", &self.key_name)
            .field("now", &self.now)
            .field("connection", &self.connection)
            .finish()
    }
}
