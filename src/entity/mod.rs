use std::collections::HashMap;

use crate::event::EventKind;
use crate::result::{BatchError, Result};

pub mod field;
pub mod record;

pub use record::Record;

/// Implemented by types that describe a class of records. Usually derived:
///
/// ```ignore
/// #[derive(Entity)]
/// #[entity(table = "cars", timestamps, soft_deletes)]
/// pub struct Car;
/// ```
pub trait Entity: 'static {
    fn entity_type() -> EntityType;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    Integer,
    Text,
    Other,
}

/// Per-type metadata: table, key, timestamp and soft-delete columns, event
/// namespace and custom event names.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityType {
    name: String,
    table: String,
    key_name: String,
    key_type: KeyType,
    timestamps: Option<TimestampColumns>,
    deleted_at: Option<String>,
    remembers_batch_state: bool,
    connection: Option<String>,
    custom_events: HashMap<EventKind, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampColumns {
    pub created_at: String,
    pub updated_at: String,
}

impl Default for TimestampColumns {
    fn default() -> Self {
        Self {
            created_at: "created_at".to_string(),
            updated_at: "updated_at".to_string(),
        }
    }
}

impl EntityType {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            key_name: "id".to_string(),
            key_type: KeyType::Integer,
            timestamps: None,
            deleted_at: None,
            remembers_batch_state: false,
            connection: None,
            custom_events: HashMap::new(),
        }
    }

    pub fn of<E: Entity>() -> Self {
        E::entity_type()
    }

    pub fn key(mut self, name: impl Into<String>, key_type: KeyType) -> Self {
        self.key_name = name.into();
        self.key_type = key_type;
        self
    }

    pub fn with_timestamps(mut self) -> Self {
        self.timestamps = Some(TimestampColumns::default());
        self
    }

    pub fn timestamp_columns(
        mut self,
        created_at: impl Into<String>,
        updated_at: impl Into<String>,
    ) -> Self {
        self.timestamps = Some(TimestampColumns {
            created_at: created_at.into(),
            updated_at: updated_at.into(),
        });
        self
    }

    pub fn soft_deletes(self) -> Self {
        self.soft_delete_column("deleted_at")
    }

    pub fn soft_delete_column(mut self, column: impl Into<String>) -> Self {
        self.deleted_at = Some(column.into());
        self
    }

    pub fn remembers_batch_state(mut self) -> Self {
        self.remembers_batch_state = true;
        self
    }

    pub fn on_connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }

    /// Route `kind` through a custom event name in addition to the
    /// conventional `<entity>.<kind>` channel.
    pub fn custom_event(mut self, kind: EventKind, event: impl Into<String>) -> Self {
        self.custom_events.insert(kind, event.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn uses_timestamps(&self) -> bool {
        self.timestamps.is_some()
    }

    pub fn timestamps(&self) -> Option<&TimestampColumns> {
        self.timestamps.as_ref()
    }

    pub fn deleted_at_column(&self) -> Option<&str> {
        self.deleted_at.as_deref()
    }

    pub fn soft_deleting(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn remembers_state(&self) -> bool {
        self.remembers_batch_state
    }

    pub fn connection(&self) -> Option<&str> {
        self.connection.as_deref()
    }

    pub fn custom_event_for(&self, kind: EventKind) -> Option<&str> {
        self.custom_events.get(&kind).map(String::as_str)
    }

    /// A record type is recognised when every name it contributes to SQL is a
    /// plain identifier.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BatchError::invalid_entity(&self.name, "entity name is empty"));
        }
        if !is_identifier_path(&self.table) {
            return Err(BatchError::invalid_entity(
                &self.name,
                format!("table name '{}' is not an identifier", self.table),
            ));
        }

        let mut columns = vec![self.key_name.as_str()];
        if let Some(ts) = &self.timestamps {
            columns.push(&ts.created_at);
            columns.push(&ts.updated_at);
        }
        if let Some(deleted_at) = &self.deleted_at {
            columns.push(deleted_at);
        }
        if let Some(bad) = columns.into_iter().find(|c| !is_identifier(c)) {
            return Err(BatchError::invalid_entity(
                &self.name,
                format!("column name '{bad}' is not an identifier"),
            ));
        }

        Ok(())
    }
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// `table` or `schema.table`.
pub(crate) fn is_identifier_path(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2 && parts.iter().all(|p| is_identifier(p))
}
