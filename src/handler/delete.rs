use crate::batch::{Batch, RecordInput};
use crate::db::{FindMany, Statement};
use crate::entity::Record;
use crate::event::EventKind;
use crate::result::Result;
use crate::settings::Settings;
use crate::value::Value;

use super::events::{gate, notify};
use super::{BatchAction, BatchContext, Handler, Report};

#[derive(Debug, Clone)]
pub struct DeleteAction {
    batch: Batch,
    force: bool,
}

impl DeleteAction {
    pub fn new(batch: Batch) -> Self {
        Self { batch, force: false }
    }
}

impl Handler<DeleteAction> {
    /// Physically delete rows, even for soft-deleting entities.
    pub fn force(mut self, force: bool) -> Self {
        self.action.force = force;
        self
    }
}

#[derive(Debug, Default)]
pub struct DeleteReport {
    pub keys: Vec<Value>,
    /// Deleted records, when deletion events required loading them.
    pub records: Vec<Record>,
}

impl Report for DeleteReport {
    fn keys(&self) -> &[Value] {
        &self.keys
    }

    fn into_keys(self) -> Vec<Value> {
        self.keys
    }
}

enum Candidate {
    Loaded(Record),
    Key(Value),
}

impl BatchAction for DeleteAction {
    type Report = DeleteReport;

    async fn perform(self, ctx: &BatchContext) -> Result<DeleteReport> {
        let mut report = DeleteReport::default();
        if self.batch.is_empty() {
            return Ok(report);
        }

        let settings = Settings::resolve(self.batch.entity(), ctx)?;
        let deleter = Deleter {
            settings: &settings,
            force: self.force,
        };
        let entity = settings.entity().name();

        let chunks = self.batch.into_chunks(ctx.config().default_chunk_size());
        for (index, chunk) in chunks.into_iter().enumerate() {
            tracing::debug!(entity, chunk = index, size = chunk.len(), "deleting chunk");

            let candidates = deleter.remove_not_existing(chunk);

            if !deleter.has_deletion_events() {
                let keys = deleter.existing_keys(candidates).await?;
                deleter.perform_delete(keys.clone()).await?;
                report.keys.extend(keys);
                continue;
            }

            let mut records = deleter.refresh(candidates).await?;
            if settings.entity().remembers_state() {
                records.iter_mut().for_each(Record::start_batch_delete);
            }
            records.retain_mut(|record| !gate(&settings, record, EventKind::Deleting));

            let keys: Vec<Value> = records
                .iter()
                .filter_map(|record| record.key(&settings.key_name).cloned())
                .collect();
            deleter.perform_delete(keys.clone()).await?;
            report.keys.extend(keys);

            for mut record in records {
                deleter.fire_post_delete_events(&mut record);
                report.records.push(record);
            }
        }

        tracing::info!(entity, affected = report.keys.len(), force = self.force, "batch deleted");
        Ok(report)
    }
}

fn has_key(key: Option<&Value>) -> bool {
    key.is_some_and(|key| !key.is_null())
}

struct Deleter<'a> {
    settings: &'a Settings,
    force: bool,
}

impl Deleter<'_> {
    fn has_deletion_events(&self) -> bool {
        self.settings.dispatchable(EventKind::Deleting)
            || self.settings.dispatchable(EventKind::Deleted)
            || (self.force && self.settings.dispatchable(EventKind::ForceDeleted))
    }

    /// Trashed rows stay out of reach unless deleting for good.
    fn trashed_filter(&self) -> Option<String> {
        if self.force {
            return None;
        }
        self.settings
            .entity()
            .deleted_at_column()
            .map(str::to_string)
    }

    fn remove_not_existing(&self, chunk: Vec<RecordInput>) -> Vec<Candidate> {
        let entity = self.settings.entity().name();
        let key_name = &self.settings.key_name;

        chunk
            .into_iter()
            .filter_map(|input| match input {
                RecordInput::Existing(record) if !record.exists() => {
                    tracing::warn!(entity, "record was never persisted, not deleting it");
                    None
                }
                RecordInput::Existing(record) if !has_key(record.key(key_name)) => {
                    tracing::warn!(entity, key_name = key_name.as_str(), "record without a key, not deleting it");
                    None
                }
                RecordInput::Existing(record) => Some(Candidate::Loaded(record)),
                RecordInput::Key(key) => Some(Candidate::Key(key)),
                RecordInput::Attributes(mut attributes) => match attributes.swap_remove(key_name) {
                    Some(key) if !key.is_null() => Some(Candidate::Key(key)),
                    _ => {
                        tracing::warn!(entity, key_name = key_name.as_str(), "attributes without a key, not deleting them");
                        None
                    }
                },
            })
            .collect()
    }

    /// Keys of the candidates that are still stored.
    async fn existing_keys(&self, candidates: Vec<Candidate>) -> Result<Vec<Value>> {
        let key_name = &self.settings.key_name;
        let keys: Vec<Value> = candidates
            .into_iter()
            .filter_map(|candidate| match candidate {
                Candidate::Loaded(record) => record.key(key_name).cloned(),
                Candidate::Key(key) => Some(key),
            })
            .collect();
        if keys.is_empty() {
            return Ok(keys);
        }

        let rows = self.find_many(keys, true).await?;
        Ok(rows
            .into_iter()
            .filter_map(|mut row| row.swap_remove(key_name))
            .collect())
    }

    /// Loaded records as they are, followed by the stored rows for bare keys.
    async fn refresh(&self, candidates: Vec<Candidate>) -> Result<Vec<Record>> {
        let mut records = Vec::with_capacity(candidates.len());
        let mut missing = Vec::new();
        for candidate in candidates {
            match candidate {
                Candidate::Loaded(record) => records.push(record),
                Candidate::Key(key) => missing.push(key),
            }
        }

        if !missing.is_empty() {
            let entity = self.settings.entity();
            let rows = self.find_many(missing, false).await?;
            records.extend(rows.into_iter().map(|row| Record::from_storage(entity, row)));
        }

        Ok(records)
    }

    async fn find_many(&self, keys: Vec<Value>, keys_only: bool) -> Result<Vec<crate::value::Attributes>> {
        let query = FindMany {
            table: self.settings.table.clone(),
            key_name: self.settings.key_name.clone(),
            keys,
            keys_only,
            exclude_trashed: self.trashed_filter(),
        };
        Ok(self.settings.store().find_many(query).await?)
    }

    async fn compile(&self, keys: Vec<Value>) -> Result<Statement> {
        let settings = self.settings;
        let grammar = settings.grammar();
        let key_name = settings.key_name.as_str();

        let statement = match settings.entity().deleted_at_column() {
            Some(deleted_at) if !self.force => {
                let now = Value::from(settings.now);
                let mut assignments = vec![(deleted_at, now.clone())];
                if let Some(columns) = settings.entity().timestamps() {
                    assignments.push((columns.updated_at.as_str(), now));
                }

                let mut columns: Vec<&str> = assignments.iter().map(|(column, _)| *column).collect();
                columns.push(key_name);
                let casts = settings.casts(&columns).await?;
                grammar.compile_update_where_in(&settings.table, key_name, assignments, keys, &casts)
            }
            _ => {
                let casts = settings.casts(&[key_name]).await?;
                grammar.compile_delete(&settings.table, key_name, keys, &casts)
            }
        };
        Ok(statement)
    }

    async fn perform_delete(&self, keys: Vec<Value>) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        tracing::debug!(
            table = self.settings.table.as_str(),
            keys = keys.len(),
            force = self.force,
            "deleting rows"
        );
        let statement = self.compile(keys).await?;
        tracing::trace!(sql = %statement.sql, "delete");
        self.settings.store().execute(statement).await?;

        Ok(())
    }

    fn fire_post_delete_events(&self, record: &mut Record) {
        notify(self.settings, record, EventKind::Deleted);
        if self.force {
            notify(self.settings, record, EventKind::ForceDeleted);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::attributes;
    use crate::db::memory::MemoryStore;
    use crate::db::Connection;
    use crate::entity::EntityType;
    use crate::event::{Channel, EventBus, Response};

    fn car() -> EntityType {
        EntityType::new("car", "cars")
    }

    fn store(driver: &str) -> Arc<MemoryStore> {
        let store = MemoryStore::new(driver)
            .with_clock(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
            .with_table("cars", &[("id", "integer"), ("name", "text"), ("deleted_at", "timestamp")]);
        store.seed(
            "cars",
            vec![
                attributes! { "id" => 1, "name" => "a", "deleted_at" => Value::Null },
                attributes! { "id" => 2, "name" => "b", "deleted_at" => Value::Null },
                attributes! { "id" => 3, "name" => "c", "deleted_at" => "2020-01-01 00:00:00" },
            ],
        );
        Arc::new(store)
    }

    fn context(store: &Arc<MemoryStore>, events: &EventBus) -> BatchContext {
        BatchContext::single(Connection::from_backend(store.clone()), Arc::new(events.clone()))
    }

    fn log_events(events: &EventBus) -> Arc<Mutex<Vec<String>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        for kind in EventKind::DELETE {
            let log = log.clone();
            events.listen(Channel::model("car", kind), move |record| {
                let id = record.get("id").map(Value::to_string).unwrap_or_default();
                log.lock().unwrap().push(format!("{kind}:{id}"));
                None
            });
        }
        log
    }

    #[tokio::test]
    async fn missing_keys_issue_no_statement() -> anyhow::Result<()> {
        let store = store("sqlite");
        let keys = Batch::of(car(), [40_i64, 41, 42])?
            .delete_now(&context(&store, &EventBus::new()))
            .await?;

        assert!(keys.is_empty());
        assert!(store.statements().is_empty());
        assert!(store.lookups()[0].keys_only);
        Ok(())
    }

    #[tokio::test]
    async fn only_real_keys_are_deleted_and_events_fire_once() -> anyhow::Result<()> {
        let store = store("sqlite");
        let events = EventBus::new();
        let log = log_events(&events);

        let keys = Batch::of(car(), [1_i64, 40, 41])?
            .delete_now(&context(&store, &events))
            .await?;

        assert_eq!(keys, vec![Value::from(1)]);
        assert_eq!(*log.lock().unwrap(), vec!["deleting:1", "deleted:1"]);

        let statements = store.statements();
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].sql, "DELETE FROM `cars` WHERE `id` IN (?)");
        assert_eq!(statements[0].bindings, vec![Value::from(1)]);
        assert!(!store.lookups()[0].keys_only);
        Ok(())
    }

    #[tokio::test]
    async fn force_delete_fires_force_deleted() -> anyhow::Result<()> {
        let store = store("pgsql");
        let events = EventBus::new();
        let log = log_events(&events);
        let ctx = context(&store, &events);
        let entity = car().soft_deletes();

        Batch::of(entity.clone(), [1_i64])?.delete(&ctx).now().await?;
        assert_eq!(*log.lock().unwrap(), vec!["deleting:1", "deleted:1"]);
        assert_eq!(
            store.statements()[0].sql,
            r#"UPDATE "cars" SET "deleted_at" = ($1)::timestamp WHERE "id" IN (($2)::integer)"#
        );
        assert_eq!(store.lookups()[0].exclude_trashed.as_deref(), Some("deleted_at"));

        log.lock().unwrap().clear();
        let keys = Batch::of(entity, [2_i64, 3])?.delete(&ctx).force(true).now().await?;
        assert_eq!(keys, vec![Value::from(2), Value::from(3)]);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["deleting:2", "deleting:3", "deleted:2", "forceDeleted:2", "deleted:3", "forceDeleted:3"]
        );
        assert_eq!(
            store.statements()[1].sql,
            r#"DELETE FROM "cars" WHERE "id" IN (($1)::integer, ($2)::integer)"#
        );
        assert_eq!(store.lookups()[1].exclude_trashed, None);
        Ok(())
    }

    #[tokio::test]
    async fn soft_delete_touches_updated_at() -> anyhow::Result<()> {
        let store = store("sqlite");
        Batch::of(car().soft_deletes().with_timestamps(), [1_i64, 3])?
            .delete_now(&context(&store, &EventBus::new()))
            .await?;

        let statements = store.statements();
        assert_eq!(
            statements[0].sql,
            "UPDATE `cars` SET `deleted_at` = ?, `updated_at` = ? WHERE `id` IN (?)"
        );
        assert_eq!(statements[0].bindings[2], Value::from(1));
        Ok(())
    }

    #[tokio::test]
    async fn unsaved_records_are_dropped() -> anyhow::Result<()> {
        let store = store("sqlite");
        let events = EventBus::new();
        let log = log_events(&events);

        let unsaved = Record::new(&car()).fill(attributes! { "id" => 2 });
        let stored = Record::from_storage(&car(), attributes! { "id" => 1, "name" => "a" });

        let report = Batch::of(car(), [unsaved, stored])?
            .delete(&context(&store, &events))
            .execute()
            .await?;

        assert_eq!(report.keys, vec![Value::from(1)]);
        assert_eq!(report.records.len(), 1);
        assert!(store.lookups().is_empty());
        assert_eq!(*log.lock().unwrap(), vec!["deleting:1", "deleted:1"]);
        Ok(())
    }

    #[tokio::test]
    async fn keyless_records_get_no_events() -> anyhow::Result<()> {
        let store = store("sqlite");
        let events = EventBus::new();
        let log = log_events(&events);

        let keyless = Record::from_storage(&car(), attributes! { "name" => "ghost" });
        let null_key = Record::from_storage(&car(), attributes! { "id" => Value::Null, "name" => "void" });
        let stored = Record::from_storage(&car(), attributes! { "id" => 2, "name" => "b" });

        let report = Batch::of(car(), [keyless, null_key, stored])?
            .delete(&context(&store, &events))
            .force(true)
            .execute()
            .await?;

        assert_eq!(report.keys, vec![Value::from(2)]);
        assert_eq!(report.records.len(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["deleting:2", "deleted:2", "forceDeleted:2"]);
        assert_eq!(store.statements()[0].bindings, vec![Value::from(2)]);
        Ok(())
    }

    #[tokio::test]
    async fn deleting_veto_keeps_the_row() -> anyhow::Result<()> {
        let store = store("sqlite");
        let events = EventBus::new();
        events.listen(Channel::model("car", EventKind::Deleting), |record| {
            (record.get("name") == Some(&Value::from("b"))).then_some(Response::Veto)
        });

        let report = Batch::of(car().remembers_batch_state(), [1_i64, 2])?
            .delete(&context(&store, &events))
            .execute()
            .await?;

        assert_eq!(report.keys, vec![Value::from(1)]);
        assert!(report.records[0].is_batch_deleting());
        assert_eq!(store.statements()[0].bindings, vec![Value::from(1)]);
        Ok(())
    }

    #[tokio::test]
    async fn attribute_maps_delete_by_key() -> anyhow::Result<()> {
        let store = store("sqlite");
        let keys = Batch::of(
            car(),
            [attributes! { "id" => 2, "name" => "b" }, attributes! { "name" => "no key" }],
        )?
        .with_chunk_size(1)?
        .delete_now(&context(&store, &EventBus::new()))
        .await?;

        assert_eq!(keys, vec![Value::from(2)]);
        assert_eq!(store.lookups().len(), 1);
        Ok(())
    }
}
