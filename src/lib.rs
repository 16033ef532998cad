#![allow(async_fn_in_trait)]

pub mod alternate;
pub mod batch;
pub mod config;
pub mod db;
pub mod entity;
pub mod event;
pub mod handler;
pub mod json;
pub mod queue;
pub mod result;
pub mod settings;
pub mod updater;
pub mod value;

pub use batch::{Batch, RecordInput};
pub use config::{BatchConfig, Options};
pub use entity::{Entity, EntityType, KeyType, Record};
pub use event::{Channel, EventBus, EventDispatcher, EventKind, Response};
pub use handler::{BatchContext, DeleteHandler, SaveHandler};
pub use result::{BatchError, Result};
pub use value::{Attributes, Value};

pub use macros::Entity;
