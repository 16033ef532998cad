use std::sync::{Arc, Mutex};

use bagua_batch::db::memory::MemoryStore;
use bagua_batch::db::Connection;
use bagua_batch::entity::{EntityType, KeyType};
use bagua_batch::{attributes, Batch, BatchContext, Channel, Entity, EventBus, EventKind, Value};

#[derive(Entity)]
struct Car;

#[derive(Entity)]
#[entity(table = "fleet.companies", key = "uuid", key_type = "text")]
struct Company;

#[derive(Entity)]
#[entity(
    name = "truck",
    timestamps,
    soft_deletes,
    remembers_batch_state,
    connection = "archive",
    events(saving = "TruckSaving", force_deleted = "TruckPurged")
)]
struct HeavyVehicle;

#[derive(Entity)]
#[entity(timestamps(created_at = "inserted_at"), soft_deletes = "removed_at")]
struct Invoice;

#[test]
fn defaults_follow_the_type_name() {
    let car = Car::entity_type();
    assert_eq!(car.name(), "car");
    assert_eq!(car.table(), "cars");
    assert_eq!(car.key_name(), "id");
    assert_eq!(car.key_type(), KeyType::Integer);
    assert!(!car.uses_timestamps());
    assert!(!car.soft_deleting());
    assert!(!car.remembers_state());
    assert_eq!(car.connection(), None);
    assert_eq!(car, EntityType::new("car", "cars"));
}

#[test]
fn table_and_key_attributes() {
    let company = Company::entity_type();
    assert_eq!(company.name(), "company");
    assert_eq!(company.table(), "fleet.companies");
    assert_eq!(company.key_name(), "uuid");
    assert_eq!(company.key_type(), KeyType::Text);
}

#[test]
fn flags_connection_and_custom_events() {
    let truck = HeavyVehicle::entity_type();
    assert_eq!(truck.name(), "truck");
    assert_eq!(truck.table(), "heavy_vehicles");

    let timestamps = truck.timestamps().unwrap();
    assert_eq!(timestamps.created_at, "created_at");
    assert_eq!(timestamps.updated_at, "updated_at");
    assert_eq!(truck.deleted_at_column(), Some("deleted_at"));
    assert!(truck.remembers_state());
    assert_eq!(truck.connection(), Some("archive"));

    assert_eq!(truck.custom_event_for(EventKind::Saving), Some("TruckSaving"));
    assert_eq!(
        truck.custom_event_for(EventKind::ForceDeleted),
        Some("TruckPurged")
    );
    assert_eq!(truck.custom_event_for(EventKind::Deleted), None);
}

#[test]
fn partial_column_overrides() {
    let invoice = Invoice::entity_type();
    let timestamps = invoice.timestamps().unwrap();
    assert_eq!(timestamps.created_at, "inserted_at");
    assert_eq!(timestamps.updated_at, "updated_at");
    assert_eq!(invoice.deleted_at_column(), Some("removed_at"));
}

#[tokio::test]
async fn derived_entities_save_in_batches() -> anyhow::Result<()> {
    let store = Arc::new(
        MemoryStore::new("sqlite").with_table("cars", &[("id", "integer"), ("name", "text")]),
    );
    let events = EventBus::new();
    let created = Arc::new(Mutex::new(Vec::new()));
    {
        let created = created.clone();
        events.listen(Channel::model("car", EventKind::Created), move |record| {
            let name = record.get("name").cloned().unwrap_or(Value::Null);
            created.lock().unwrap().push(name);
            None
        });
    }

    let ctx = BatchContext::single(Connection::from_backend(store.clone()), Arc::new(events));
    let batch = Batch::of_entity::<Car, _>(vec![
        attributes! { "id" => 1, "name" => "Model S" },
        attributes! { "id" => 2, "name" => "Model 3" },
    ])?;

    let keys = batch.save_now(&ctx).await?;
    assert_eq!(keys, vec![Value::Int(1), Value::Int(2)]);
    assert_eq!(store.rows("cars").len(), 2);
    assert_eq!(
        *created.lock().unwrap(),
        vec![Value::from("Model S"), Value::from("Model 3")]
    );

    Ok(())
}
