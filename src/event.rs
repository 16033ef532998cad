//! Lifecycle events.
//!
//! Every [`EventKind`] is published on the conventional channel
//! `<entity>.<kind>` and, when the entity declares one, on a custom named
//! event. Listeners receive the record mutably and may answer with a
//! [`Response`]; a [`Response::Veto`] from a halting dispatch cancels the
//! pending operation for that record.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::entity::Record;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Saving,
    Creating,
    Updating,
    Saved,
    Created,
    Updated,
    Deleting,
    Deleted,
    ForceDeleted,
}

impl EventKind {
    pub const SAVE: [EventKind; 6] = [
        EventKind::Saving,
        EventKind::Creating,
        EventKind::Updating,
        EventKind::Saved,
        EventKind::Created,
        EventKind::Updated,
    ];

    pub const DELETE: [EventKind; 3] = [
        EventKind::Deleting,
        EventKind::Deleted,
        EventKind::ForceDeleted,
    ];

    pub fn all() -> impl Iterator<Item = EventKind> {
        Self::SAVE.into_iter().chain(Self::DELETE)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Saving => "saving",
            EventKind::Creating => "creating",
            EventKind::Updating => "updating",
            EventKind::Saved => "saved",
            EventKind::Created => "created",
            EventKind::Updated => "updated",
            EventKind::Deleting => "deleting",
            EventKind::Deleted => "deleted",
            EventKind::ForceDeleted => "forceDeleted",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    /// `<entity>.<kind>`
    Model { entity: String, kind: EventKind },
    /// An entity-declared event name.
    Custom(String),
}

impl Channel {
    pub fn model(entity: impl Into<String>, kind: EventKind) -> Self {
        Channel::Model {
            entity: entity.into(),
            kind,
        }
    }

    pub fn custom(name: impl Into<String>) -> Self {
        Channel::Custom(name.into())
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Model { entity, kind } => write!(f, "{entity}.{kind}"),
            Channel::Custom(name) => f.write_str(name),
        }
    }
}

/// A non-null listener answer.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Explicit `false`: stop the pending operation.
    Veto,
    Value(Value),
}

pub trait EventDispatcher: Send + Sync {
    fn has_listeners(&self, channel: &Channel) -> bool;

    /// Calls listeners in registration order and stops at the first
    /// non-null response.
    fn until(&self, channel: &Channel, record: &mut Record) -> Option<Response>;

    /// Calls every listener and returns the non-null responses.
    fn dispatch(&self, channel: &Channel, record: &mut Record) -> Vec<Response>;
}

pub type Listener = Arc<dyn Fn(&mut Record) -> Option<Response> + Send + Sync>;

/// In-process dispatcher keyed by channel.
#[derive(Default, Clone)]
pub struct EventBus {
    listeners: Arc<RwLock<HashMap<Channel, Vec<Listener>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listen<F>(&self, channel: Channel, listener: F)
    where
        F: Fn(&mut Record) -> Option<Response> + Send + Sync + 'static,
    {
        let mut lock = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        lock.entry(channel).or_default().push(Arc::new(listener));
    }

    pub fn forget(&self, channel: &Channel) {
        let mut lock = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        lock.remove(channel);
    }

    fn listeners_for(&self, channel: &Channel) -> Vec<Listener> {
        // Cloned out so listeners may register further listeners.
        let lock = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        lock.get(channel).cloned().unwrap_or_default()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lock = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        let mut map = f.debug_map();
        for (channel, listeners) in lock.iter() {
            map.entry(&channel.to_string(), &listeners.len());
        }
        map.finish()
    }
}

impl EventDispatcher for EventBus {
    fn has_listeners(&self, channel: &Channel) -> bool {
        let lock = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        lock.get(channel).is_some_and(|l| !l.is_empty())
    }

    fn until(&self, channel: &Channel, record: &mut Record) -> Option<Response> {
        self.listeners_for(channel)
            .iter()
            .find_map(|listener| listener(record))
    }

    fn dispatch(&self, channel: &Channel, record: &mut Record) -> Vec<Response> {
        self.listeners_for(channel)
            .iter()
            .filter_map(|listener| listener(record))
            .collect()
    }
}
