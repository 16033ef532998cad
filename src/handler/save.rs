use indexmap::IndexMap;

use crate::batch::{Batch, RecordInput};
use crate::db::InsertRows;
use crate::entity::Record;
use crate::event::EventKind;
use crate::result::Result;
use crate::settings::Settings;
use crate::updater::{unique_value, Updater};
use crate::value::{Attributes, Value};

use super::events::{gate, notify};
use super::{BatchAction, BatchContext, Report};

#[derive(Debug, Clone)]
pub struct SaveAction {
    batch: Batch,
}

impl SaveAction {
    pub fn new(batch: Batch) -> Self {
        Self { batch }
    }
}

#[derive(Debug, Default)]
pub struct SaveReport {
    /// Keys of inserted rows that carried one, then keys of updated rows.
    pub keys: Vec<Value>,
    /// Every record that went through, synchronised with storage.
    pub records: Vec<Record>,
    /// Records a `saving`, `creating` or `updating` listener vetoed.
    pub skipped: usize,
}

impl Report for SaveReport {
    fn keys(&self) -> &[Value] {
        &self.keys
    }

    fn into_keys(self) -> Vec<Value> {
        self.keys
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Created,
    Updated,
    Unchanged,
}

#[derive(Default)]
struct Prepared {
    creates: Vec<Attributes>,
    updates: Vec<Attributes>,
    finals: Vec<(Record, Outcome)>,
    skipped: usize,
}

impl BatchAction for SaveAction {
    type Report = SaveReport;

    async fn perform(self, ctx: &BatchContext) -> Result<SaveReport> {
        let mut report = SaveReport::default();
        if self.batch.is_empty() {
            return Ok(report);
        }

        let settings = Settings::resolve(self.batch.entity(), ctx)?;
        let updater = settings.updater()?;
        let entity = settings.entity().name();

        let chunks = self.batch.into_chunks(ctx.config().default_chunk_size());
        for (index, chunk) in chunks.into_iter().enumerate() {
            tracing::debug!(entity, chunk = index, size = chunk.len(), "saving chunk");

            let prepared = prepare_chunk(&settings, chunk);
            report.skipped += prepared.skipped;

            report.keys.extend(batch_insert(&settings, prepared.creates).await?);
            report.keys.extend(batch_update(&settings, updater.as_ref(), prepared.updates).await?);

            for (mut record, outcome) in prepared.finals {
                fire_post_save_events(&settings, &mut record, outcome);
                report.records.push(record);
            }
        }

        tracing::info!(entity, affected = report.keys.len(), skipped = report.skipped, "batch saved");
        Ok(report)
    }
}

fn prepare_chunk(settings: &Settings, chunk: Vec<RecordInput>) -> Prepared {
    let mut prepared = Prepared::default();

    for input in chunk {
        let mut record = prepare_record(settings, input);

        if !fire_pre_save_events(settings, &mut record) {
            prepared.skipped += 1;
            continue;
        }

        if !record.exists() {
            record.mark_recently_created();
            prepared.creates.push(record.attributes());
            prepared.finals.push((record, Outcome::Created));
            continue;
        }

        let mut delta = record.dirty();
        if delta.is_empty() {
            prepared.finals.push((record, Outcome::Unchanged));
            continue;
        }
        let key = record.key(&settings.key_name).cloned().unwrap_or(Value::Null);
        delta.entry(settings.key_name.clone()).or_insert(key);
        prepared.updates.push(delta);
        prepared.finals.push((record, Outcome::Updated));
    }

    prepared
}

fn prepare_record(settings: &Settings, input: RecordInput) -> Record {
    let entity = settings.entity();
    let mut record = match input {
        RecordInput::Existing(record) => record,
        RecordInput::Attributes(attributes) => Record::new(entity).force_fill(attributes),
        RecordInput::Key(key) => {
            tracing::warn!(entity = entity.name(), %key, "primary key saved as a fresh record");
            let mut record = Record::new(entity);
            record.set(settings.key_name.clone(), key);
            record
        }
    };

    if let Some(columns) = entity.timestamps() {
        if !record.exists() {
            record.set(columns.created_at.clone(), settings.now);
        }
        record.set(columns.updated_at.clone(), settings.now);
    }

    if entity.remembers_state() {
        record.start_batch_save();
    }

    record
}

/// `saving`, then `updating` or `creating`. False when a listener vetoed.
fn fire_pre_save_events(settings: &Settings, record: &mut Record) -> bool {
    if gate(settings, record, EventKind::Saving) {
        return false;
    }

    let kind = if !record.exists() {
        EventKind::Creating
    } else if record.is_dirty() {
        EventKind::Updating
    } else {
        return true;
    };

    !gate(settings, record, kind)
}

fn fire_post_save_events(settings: &Settings, record: &mut Record, outcome: Outcome) {
    record.mark_exists();

    match outcome {
        Outcome::Created => notify(settings, record, EventKind::Created),
        Outcome::Updated => notify(settings, record, EventKind::Updated),
        Outcome::Unchanged => {}
    }
    notify(settings, record, EventKind::Saved);

    record.sync_original();
}

/// One INSERT per attribute-key shape, columns in the order of the shape's
/// first row.
async fn batch_insert(settings: &Settings, creates: Vec<Attributes>) -> Result<Vec<Value>> {
    let mut keys = Vec::new();
    let mut groups: IndexMap<Vec<String>, Vec<Attributes>> = IndexMap::new();

    for row in creates {
        if let Some(key) = row.get(&settings.key_name).filter(|k| k.is_present_key()) {
            keys.push(key.clone());
        }

        let mut shape: Vec<String> = row.keys().cloned().collect();
        shape.sort();
        groups.entry(shape).or_default().push(row);
    }

    for rows in groups.into_values() {
        let columns: Vec<String> = rows[0].keys().cloned().collect();
        let values = rows
            .into_iter()
            .map(|mut row| {
                columns
                    .iter()
                    .map(|column| row.swap_remove(column).unwrap_or(Value::Null))
                    .collect()
            })
            .collect::<Vec<Vec<Value>>>();

        tracing::debug!(
            table = settings.table.as_str(),
            rows = values.len(),
            columns = columns.len(),
            "inserting rows"
        );
        settings
            .store()
            .insert(InsertRows {
                table: settings.table.clone(),
                columns,
                rows: values,
            })
            .await?;
    }

    Ok(keys)
}

/// One statement per non-key column that any update touches.
async fn batch_update(
    settings: &Settings,
    updater: &dyn Updater,
    updates: Vec<Attributes>,
) -> Result<Vec<Value>> {
    if updates.is_empty() {
        return Ok(Vec::new());
    }

    for column in settings.columns().await?.iter() {
        let (ids, values): (Vec<Value>, Vec<Value>) = updates
            .iter()
            .filter_map(|update| {
                let value = update.get(column)?;
                let id = update.get(&settings.key_name).cloned().unwrap_or(Value::Null);
                Some((id, value.clone()))
            })
            .unzip();

        if ids.is_empty() {
            continue;
        }

        tracing::debug!(
            table = settings.table.as_str(),
            column = column.as_str(),
            rows = ids.len(),
            unique = unique_value(&values).is_some(),
            "updating column"
        );
        updater.perform_update(settings, column, values, ids).await?;
    }

    Ok(updates
        .iter()
        .filter_map(|update| update.get(&settings.key_name).cloned())
        .collect())
}
