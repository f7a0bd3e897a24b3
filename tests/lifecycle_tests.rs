/// Lifecycle tests
///
/// Events and vetoes, dirty checking, transactions and rollback, soft
/// deletes, single-table inheritance and embedded value objects.
/// Run with: cargo test --test lifecycle_tests
mod common;

use common::{count, post, session, session_on, session_with_config, session_with_events, user};
use datamapper::{
    AttributeValue, Connection, Entity, Events, LifecycleEvent, ManagerConfig, OrmError, Value, row,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

fn counter(events: &Events, lifecycle: LifecycleEvent, type_name: &str) -> Rc<Cell<usize>> {
    let calls = Rc::new(Cell::new(0));
    let seen = calls.clone();
    events.listen(lifecycle, Some(type_name), move |_| {
        seen.set(seen.get() + 1);
        true
    });
    calls
}

#[test]
fn test_event_order_for_insert() {
    let events = Rc::new(Events::new());
    let log = Rc::new(RefCell::new(Vec::new()));
    for lifecycle in [
        LifecycleEvent::Storing,
        LifecycleEvent::Creating,
        LifecycleEvent::Created,
        LifecycleEvent::Updating,
        LifecycleEvent::Updated,
        LifecycleEvent::Stored,
    ] {
        let log = log.clone();
        events.listen(lifecycle, None, move |entity| {
            log.borrow_mut().push(format!("{}:{}", lifecycle, entity.type_name()));
            true
        });
    }
    let (manager, _connection) = session_with_events(events);

    manager.store(&user("alice")).unwrap();
    assert_eq!(
        *log.borrow(),
        vec!["storing:User", "creating:User", "created:User", "stored:User"]
    );
}

#[test]
fn test_creating_veto_skips_insert() {
    let events = Rc::new(Events::new());
    events.listen(LifecycleEvent::Creating, Some("User"), |_| false);
    let (manager, connection) = session_with_events(events);

    let alice = user("alice");
    assert!(!manager.store(&alice).unwrap());
    assert_eq!(count(&connection, "users"), 0);
    assert!(alice.value("id").is_null());
}

#[test]
fn test_storing_veto_skips_everything() {
    let events = Rc::new(Events::new());
    events.listen(LifecycleEvent::Storing, Some("Post"), |_| false);
    let (manager, connection) = session_with_events(events);

    manager.store(&user("alice").with("posts", vec![post("hidden")])).unwrap();
    assert_eq!(count(&connection, "users"), 1);
    assert_eq!(count(&connection, "posts"), 0);
}

#[test]
fn test_deleting_veto_keeps_row() {
    let events = Rc::new(Events::new());
    events.listen(LifecycleEvent::Deleting, None, |_| false);
    let (manager, connection) = session_with_events(events);

    let alice = user("alice");
    manager.store(&alice).unwrap();
    assert!(!manager.delete(&alice).unwrap());
    assert_eq!(count(&connection, "users"), 1);
    assert!(!alice.value("id").is_null());
}

#[test]
fn test_update_after_insert_in_same_store() {
    let events = Rc::new(Events::new());
    events.listen(LifecycleEvent::Created, Some("User"), |entity| {
        let slug = format!("{}-{}", entity.value("name"), entity.value("id"));
        entity.set("slug", slug);
        true
    });
    let updates = counter(&events, LifecycleEvent::Updated, "User");
    let (manager, connection) = session_with_events(events);

    let alice = user("alice");
    manager.store(&alice).unwrap();

    // The attribute set by the listener is written by a follow-up update
    assert_eq!(updates.get(), 1);
    let rows = connection.rows("users");
    assert_eq!(rows[0].get("slug"), Some(&Value::from("alice-1")));

    // Nothing left to write afterwards
    manager.store(&alice).unwrap();
    assert_eq!(updates.get(), 1);
}

#[test]
fn test_numeric_equivalence_rule() {
    let events = Rc::new(Events::new());
    let updates = counter(&events, LifecycleEvent::Updated, "User");
    let (manager, connection) = session_with_events(events);

    let alice = user("alice").with("age", 5);
    manager.store(&alice).unwrap();

    // "5" reads the same as 5
    alice.set("age", "5");
    manager.store(&alice).unwrap();
    assert_eq!(updates.get(), 0);
    assert_eq!(connection.rows("users")[0].get("age"), Some(&Value::Integer(5)));

    // "05" and "5.0" do not
    alice.set("age", "05");
    manager.store(&alice).unwrap();
    assert_eq!(updates.get(), 1);
    assert_eq!(connection.rows("users")[0].get("age"), Some(&Value::from("05")));

    alice.set("age", 5);
    manager.store(&alice).unwrap();
    assert_eq!(updates.get(), 2);

    alice.set("age", "5.0");
    manager.store(&alice).unwrap();
    assert_eq!(updates.get(), 3);
}

#[test]
fn test_failed_store_rolls_back_everything() {
    let (manager, connection) = session();
    let users = manager.mapper("User").unwrap();
    let alice = user("alice");

    // The second entity is not a User: the whole batch is undone
    let err = users.store_many(&[alice.clone(), post("stray")]).unwrap_err();
    assert!(err.is_mapping());
    assert_eq!(count(&connection, "users"), 0);
    assert!(!alice.has("id"));
    assert!(!alice.has("posts"));
    assert!(!manager.in_transaction());

    // The same entity can be stored afterwards
    users.store(&alice).unwrap();
    assert_eq!(count(&connection, "users"), 1);
    let found = manager.find("User", alice.value("id")).unwrap().unwrap();
    assert!(found.ptr_eq(&alice));
}

#[test]
fn test_outer_transaction_failure_undoes_inner_stores() {
    let (manager, connection) = session();
    let alice = user("alice");

    let result: datamapper::Result<()> = manager.transaction(|| {
        manager.store(&alice)?;
        assert!(manager.in_transaction());
        assert_eq!(count(&connection, "users"), 1);
        Err(OrmError::Storage("disk full".into()))
    });

    assert!(matches!(result, Err(OrmError::Storage(_))));
    assert_eq!(count(&connection, "users"), 0);
    assert!(alice.value("id").is_null());
    assert!(manager.find("User", 1).unwrap().is_none());
}

#[test]
fn test_rolled_back_update_restores_snapshot() {
    let (manager, connection) = session();
    let alice = user("alice").with("age", 30);
    manager.store(&alice).unwrap();

    let result: datamapper::Result<()> = manager.transaction(|| {
        alice.set("age", 31);
        manager.store(&alice)?;
        Err(OrmError::Storage("abort".into()))
    });
    assert!(result.is_err());
    assert_eq!(connection.rows("users")[0].get("age"), Some(&Value::Integer(30)));

    // The snapshot still says 30, so the pending change is written again
    manager.store(&alice).unwrap();
    assert_eq!(connection.rows("users")[0].get("age"), Some(&Value::Integer(31)));
}

#[test]
fn test_soft_delete() {
    let (manager, connection) = session();
    let articles = manager.mapper("Article").unwrap();
    let kept = Entity::new("Article").with("title", "kept");
    let trashed = Entity::new("Article").with("title", "trashed");
    articles.store_many(&[kept.clone(), trashed.clone()]).unwrap();

    assert!(articles.delete(&trashed).unwrap());
    assert_eq!(count(&connection, "articles"), 2);
    assert!(!trashed.value("id").is_null());
    assert!(trashed.value("deleted_at").as_str().is_some());

    let visible = articles.all().unwrap();
    assert_eq!(visible.len(), 1);
    assert!(visible[0].ptr_eq(&kept));
    assert_eq!(articles.query().with_trashed().get().unwrap().len(), 2);

    let other = session_on(&connection);
    assert!(other.find("Article", trashed.value("id")).unwrap().is_none());
}

#[test]
fn test_single_table_inheritance() {
    let (manager, connection) = session();
    let car = Entity::new("Car").with("wheels", 4);
    let truck = Entity::new("Truck").with("wheels", 18);
    manager.store(&car).unwrap();
    manager.store(&truck).unwrap();

    let rows = connection.rows("vehicles");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("kind"), Some(&Value::from("car")));
    assert_eq!(rows[1].get("kind"), Some(&Value::from("truck")));

    let other = session_on(&connection);
    let vehicles = other.mapper("Vehicle").unwrap().all().unwrap();
    let types: Vec<&str> = vehicles.iter().map(|v| v.type_name()).collect();
    assert_eq!(types, vec!["Car", "Truck"]);

    let trucks = other.mapper("Truck").unwrap().all().unwrap();
    assert_eq!(trucks.len(), 1);
    assert!(trucks[0].ptr_eq(&vehicles[1]));

    // A Vehicle mapper accepts subtypes
    let van = Entity::new("Truck").with("wheels", 6);
    other.mapper("Vehicle").unwrap().store(&van).unwrap();
    assert_eq!(count(&connection, "vehicles"), 3);
}

#[test]
fn test_unknown_discriminator_value_is_rejected() {
    let (manager, connection) = session();
    connection
        .insert("vehicles", row([("id", Value::Integer(1)), ("kind", "bike".into())]))
        .unwrap();
    let err = manager.mapper("Vehicle").unwrap().all().unwrap_err();
    assert!(err.is_mapping());
}

#[test]
fn test_embedded_value_objects() {
    let (manager, connection) = session();
    let address = Entity::new("Address").with("street", "Main St").with("city", "Springfield");
    let homer = user("homer").with("address", address);
    let drifter = user("drifter").with("address", Value::Null);
    manager.store(&homer).unwrap();
    manager.store(&drifter).unwrap();

    let rows = connection.rows("users");
    assert_eq!(rows[0].get("address_street"), Some(&Value::from("Main St")));
    assert_eq!(rows[0].get("address_city"), Some(&Value::from("Springfield")));
    assert_eq!(rows[1].get("address_city"), Some(&Value::Null));

    let other = session_on(&connection);
    let loaded = other.find("User", homer.value("id")).unwrap().unwrap();
    let loaded_address = loaded.get("address").and_then(|a| a.as_entity().cloned()).unwrap();
    assert_eq!(loaded_address.type_name(), "Address");
    assert_eq!(loaded_address.value("city"), Value::from("Springfield"));
    assert!(!loaded.has("address_city"));

    let loaded_drifter = other.find("User", drifter.value("id")).unwrap().unwrap();
    assert!(loaded_drifter.get("address").is_some_and(|a| a.is_null()));

    // Changing a field of the value object updates the owner's row
    loaded_address.set("city", "Shelbyville");
    other.store(&loaded).unwrap();
    assert_eq!(connection.rows("users")[0].get("address_city"), Some(&Value::from("Shelbyville")));
}

#[test]
fn test_lazy_loading_can_be_disabled() {
    let (manager, connection) = session_with_config(ManagerConfig::new().lazy_loading(false));
    manager.store(&user("alice").with("posts", vec![post("one")])).unwrap();

    let other_config = ManagerConfig::new().lazy_loading(false);
    let other = datamapper::Manager::builder(common::registry(), connection.clone())
        .config(other_config)
        .build()
        .unwrap();
    let loaded = other.find("User", 1).unwrap().unwrap();
    assert!(!loaded.has("posts"));
    assert!(loaded.collection("posts").unwrap().is_empty());

    let eager = other.mapper("User").unwrap().with(["posts"]).all().unwrap();
    assert!(matches!(eager[0].get("posts"), Some(AttributeValue::Collection(_))));
}
