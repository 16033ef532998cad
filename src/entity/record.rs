use indexmap::IndexMap;

use crate::value::{Attributes, Value};

use super::field::Field;
use super::{Entity, EntityType};

/// A dynamically shaped row of some entity type, tracking which attributes
/// changed since it was last synchronised with storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    entity: String,
    attributes: IndexMap<String, Field<Value>>,
    exists: bool,
    was_recently_created: bool,
    batch_saving: bool,
    batch_deleting: bool,
}

impl Record {
    /// A fresh, never persisted record.
    pub fn new(entity: &EntityType) -> Self {
        Self::named(entity.name())
    }

    pub fn of<E: Entity>() -> Self {
        Self::new(&E::entity_type())
    }

    pub(crate) fn named(entity: &str) -> Self {
        Self {
            entity: entity.to_string(),
            attributes: IndexMap::new(),
            exists: false,
            was_recently_created: false,
            batch_saving: false,
            batch_deleting: false,
        }
    }

    /// A record loaded from storage: exists and clean.
    pub fn from_storage(entity: &EntityType, attributes: Attributes) -> Self {
        let mut this = Self::new(entity);
        this.attributes = attributes
            .into_iter()
            .map(|(column, value)| (column, Field::Unchanged(value)))
            .collect();
        this.exists = true;
        this
    }

    /// Assigns every attribute, marking those that differ as changed.
    pub fn fill(mut self, attributes: Attributes) -> Self {
        for (column, value) in attributes {
            self.set(column, value);
        }
        self
    }

    /// Assigns every attribute as changed, even when equal to the stored value.
    pub fn force_fill(mut self, attributes: Attributes) -> Self {
        for (column, value) in attributes {
            match self.attributes.get_mut(&column) {
                Some(field) => field.set(value),
                None => {
                    self.attributes.insert(column, Field::Set(value));
                }
            }
        }
        self
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.attributes.get_mut(&column) {
            Some(field) => field.assign(value),
            None => {
                self.attributes.insert(column, Field::Set(value));
            }
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.attributes.get(column).map(Field::value_ref)
    }

    pub fn key(&self, key_name: &str) -> Option<&Value> {
        self.get(key_name)
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// All attributes with their current values.
    pub fn attributes(&self) -> Attributes {
        self.attributes
            .iter()
            .map(|(column, field)| (column.clone(), field.value_ref().clone()))
            .collect()
    }

    /// Attributes changed since the last synchronisation.
    pub fn dirty(&self) -> Attributes {
        self.attributes
            .iter()
            .filter_map(|(column, field)| field.changed_ref().map(|v| (column.clone(), v.clone())))
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        self.attributes.values().any(Field::is_changed)
    }

    pub fn sync_original(&mut self) {
        self.attributes.values_mut().for_each(Field::sync);
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn was_recently_created(&self) -> bool {
        self.was_recently_created
    }

    pub fn is_batch_saving(&self) -> bool {
        self.batch_saving
    }

    pub fn is_batch_deleting(&self) -> bool {
        self.batch_deleting
    }

    pub(crate) fn mark_exists(&mut self) {
        self.exists = true;
    }

    pub(crate) fn mark_recently_created(&mut self) {
        self.was_recently_created = true;
    }

    pub(crate) fn start_batch_save(&mut self) {
        self.batch_saving = true;
    }

    pub(crate) fn start_batch_delete(&mut self) {
        self.batch_deleting = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes;

    fn car() -> EntityType {
        EntityType::new("car", "cars")
    }

    #[test]
    fn stored_records_start_clean() {
        let mut r = Record::from_storage(&car(), attributes! { "id" => 1, "name" => "a" });
        assert!(r.exists());
        assert!(!r.is_dirty());

        r.set("name", "a");
        assert!(!r.is_dirty());

        r.set("name", "b");
        assert_eq!(r.dirty(), attributes! { "name" => "b" });
    }

    #[test]
    fn force_fill_marks_everything_changed() {
        let r = Record::from_storage(&car(), attributes! { "id" => 1, "name" => "a" })
            .force_fill(attributes! { "name" => "a" });
        assert_eq!(r.dirty(), attributes! { "name" => "a" });
    }

    #[test]
    fn sync_clears_changes() {
        let mut r = Record::new(&car()).fill(attributes! { "name" => "x", "color" => "red" });
        assert!(!r.exists());
        assert_eq!(r.dirty().len(), 2);
        r.sync_original();
        assert!(!r.is_dirty());
        assert_eq!(r.attributes(), attributes! { "name" => "x", "color" => "red" });
    }
}
