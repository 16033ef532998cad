use crate::entity::{Entity, EntityType, Record};
use crate::handler::{BatchContext, DeleteAction, DeleteHandler, Handler, SaveAction, SaveHandler};
use crate::result::{BatchError, Result};
use crate::value::{Attributes, Value};

/// One item of a batch.
#[derive(Debug, Clone, PartialEq, derive_more::From)]
pub enum RecordInput {
    /// A record instance, persisted or not.
    Existing(Record),
    /// A bare primary key.
    Key(Value),
    /// Raw attributes for a fresh record.
    Attributes(Attributes),
}

impl From<i64> for RecordInput {
    fn from(key: i64) -> Self {
        RecordInput::Key(key.into())
    }
}

impl From<i32> for RecordInput {
    fn from(key: i32) -> Self {
        RecordInput::Key(key.into())
    }
}

impl From<&str> for RecordInput {
    fn from(key: &str) -> Self {
        RecordInput::Key(key.into())
    }
}

impl From<String> for RecordInput {
    fn from(key: String) -> Self {
        RecordInput::Key(key.into())
    }
}

/// An ordered collection of inputs of one entity type.
#[derive(Debug, Clone)]
pub struct Batch {
    entity: EntityType,
    items: Vec<RecordInput>,
    chunk_size: Option<usize>,
}

impl Batch {
    /// Fails when a record instance belongs to another entity. Keys and
    /// attribute maps are taken as they are.
    pub fn of<I>(entity: EntityType, items: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<RecordInput>,
    {
        entity.validate()?;

        let items: Vec<RecordInput> = items.into_iter().map(Into::into).collect();
        for item in &items {
            if let RecordInput::Existing(record) = item {
                if record.entity() != entity.name() {
                    return Err(BatchError::TypeMismatch {
                        expected: entity.name().to_string(),
                        actual: record.entity().to_string(),
                    });
                }
            }
        }

        Ok(Self {
            entity,
            items,
            chunk_size: None,
        })
    }

    pub fn of_entity<E, I>(items: I) -> Result<Self>
    where
        E: Entity,
        I: IntoIterator,
        I::Item: Into<RecordInput>,
    {
        Self::of(E::entity_type(), items)
    }

    pub fn with_chunk_size(mut self, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(BatchError::InvalidChunkSize(size));
        }
        self.chunk_size = Some(size);
        Ok(self)
    }

    pub fn entity(&self) -> &EntityType {
        &self.entity
    }

    pub fn items(&self) -> &[RecordInput] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The explicit chunk size, or `default`.
    pub fn chunk_size_or(&self, default: usize) -> usize {
        self.chunk_size.unwrap_or(default).max(1)
    }

    pub fn into_chunks(self, default: usize) -> Vec<Vec<RecordInput>> {
        let size = self.chunk_size_or(default);
        let mut chunks = Vec::with_capacity(self.items.len().div_ceil(size));
        let mut items = self.items.into_iter().peekable();
        while items.peek().is_some() {
            chunks.push(items.by_ref().take(size).collect());
        }
        chunks
    }

    pub fn save(self, ctx: &BatchContext) -> SaveHandler {
        Handler::new(SaveAction::new(self), ctx.clone())
    }

    pub fn delete(self, ctx: &BatchContext) -> DeleteHandler {
        Handler::new(DeleteAction::new(self), ctx.clone())
    }

    pub async fn save_now(self, ctx: &BatchContext) -> Result<Vec<Value>> {
        self.save(ctx).now().await
    }

    pub async fn delete_now(self, ctx: &BatchContext) -> Result<Vec<Value>> {
        self.delete(ctx).now().await
    }
}
