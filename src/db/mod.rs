use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::entity::EntityType;
use crate::value::{Attributes, Value};

#[cfg(feature = "diesel-postgres")]
pub mod diesel;
pub mod grammar;
pub mod memory;

/// Compiled SQL text plus its bound parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub bindings: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            bindings,
        }
    }
}

/// Rows sharing one column list, ready for a single INSERT.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertRows {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Fetch rows by primary key, without any scope but the optional trashed
/// filter.
#[derive(Debug, Clone, PartialEq)]
pub struct FindMany {
    pub table: String,
    pub key_name: String,
    pub keys: Vec<Value>,
    /// Only the key column is needed.
    pub keys_only: bool,
    /// Skip rows whose soft-delete column is set.
    pub exclude_trashed: Option<String>,
}

#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Backend family, used to pick the updater strategy (`pgsql`, `mysql`,
    /// `sqlite`, ...).
    fn driver_name(&self) -> &str;

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn insert(&self, rows: InsertRows) -> anyhow::Result<()>;

    /// Runs an UPDATE or DELETE and returns the affected row count.
    async fn execute(&self, statement: Statement) -> anyhow::Result<u64>;

    async fn find_many(&self, query: FindMany) -> anyhow::Result<Vec<Attributes>>;
}

#[async_trait::async_trait]
pub trait SchemaIntrospector: Send + Sync {
    async fn column_listing(&self, table: &str) -> anyhow::Result<Vec<String>>;

    async fn column_type(&self, table: &str, column: &str) -> anyhow::Result<String>;
}

/// A live handle on one database.
#[derive(Clone)]
pub struct Connection {
    pub store: Arc<dyn RecordStore>,
    pub schema: Arc<dyn SchemaIntrospector>,
}

impl Connection {
    pub fn new(store: Arc<dyn RecordStore>, schema: Arc<dyn SchemaIntrospector>) -> Self {
        Self { store, schema }
    }

    /// For backends that implement both halves.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: RecordStore + SchemaIntrospector + 'static,
    {
        Self {
            store: backend.clone(),
            schema: backend,
        }
    }

    pub fn driver_name(&self) -> &str {
        self.store.driver_name()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("driver", &self.store.driver_name())
            .finish()
    }
}

pub trait ConnectionResolver: Send + Sync + 'static {
    fn connection(&self, entity: &EntityType) -> anyhow::Result<Connection>;
}

/// Every entity lives on the same database.
#[derive(Clone, Debug)]
pub struct SingleConnection(pub Connection);

impl ConnectionResolver for SingleConnection {
    fn connection(&self, _entity: &EntityType) -> anyhow::Result<Connection> {
        Ok(self.0.clone())
    }
}

/// Routes entities by their declared connection name.
#[derive(Clone, Debug)]
pub struct NamedConnections {
    default: Connection,
    named: HashMap<String, Connection>,
}

impl NamedConnections {
    pub fn new(default: Connection) -> Self {
        Self {
            default,
            named: HashMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, connection: Connection) -> Self {
        self.named.insert(name.into(), connection);
        self
    }
}

impl ConnectionResolver for NamedConnections {
    fn connection(&self, entity: &EntityType) -> anyhow::Result<Connection> {
        match entity.connection() {
            None => Ok(self.default.clone()),
            Some(name) => match self.named.get(name) {
                Some(conn) => Ok(conn.clone()),
                None => anyhow::bail!(
                    "Database connection [{name}] not configured (entity '{}')",
                    entity.name()
                ),
            },
        }
    }
}
