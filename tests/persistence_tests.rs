/// Persistence tests
///
/// Insert, update, find and delete through mappers, plus the identity map.
/// Run with: cargo test --test persistence_tests
mod common;

use common::{count, post, session, session_on, user};
use datamapper::{Aggregate, Entity, Value};

#[test]
fn test_insert_then_find_round_trip() {
    let (manager, connection) = session();
    let users = manager.mapper("User").unwrap();

    let alice = user("alice").with("age", 30).with("active", true);
    assert!(users.store(&alice).unwrap());

    // Generated key is written back to the entity
    let key = alice.value("id");
    assert!(key.as_i64().is_some_and(|id| id > 0));
    assert_eq!(count(&connection, "users"), 1);

    // A second session reads the row from storage
    let other = session_on(&connection);
    let loaded = other.find("User", key).unwrap().unwrap();
    assert!(!loaded.ptr_eq(&alice));
    assert_eq!(loaded.value("name"), Value::from("alice"));
    assert_eq!(loaded.value("age"), Value::Integer(30));
    assert_eq!(loaded.value("active"), Value::Boolean(true));
}

#[test]
fn test_explicit_key_is_kept() {
    let (manager, connection) = session();
    let tag = Entity::new("Tag").with("id", 42).with("label", "rust");
    manager.store(&tag).unwrap();

    assert_eq!(tag.value("id"), Value::Integer(42));
    let rows = connection.rows("tags");
    assert_eq!(rows[0].get("id"), Some(&Value::Integer(42)));

    // Generated keys continue after explicit ones
    let next = Entity::new("Tag").with("label", "orm");
    manager.store(&next).unwrap();
    assert_eq!(next.value("id"), Value::Integer(43));
}

#[test]
fn test_identity_map_returns_same_instance() {
    let (manager, connection) = session();
    let alice = user("alice");
    manager.store(&alice).unwrap();

    // The stored instance is what later lookups hand out
    let found = manager.find("User", 1).unwrap().unwrap();
    assert!(found.ptr_eq(&alice));

    let other = session_on(&connection);
    let first = other.find("User", 1).unwrap().unwrap();
    let second = other.find("User", 1).unwrap().unwrap();
    let listed = other.mapper("User").unwrap().all().unwrap();
    assert!(first.ptr_eq(&second));
    assert!(first.ptr_eq(&listed[0]));

    // Key given as numeric text resolves to the same row and instance
    let by_text = other.find("User", "1").unwrap().unwrap();
    assert!(first.ptr_eq(&by_text));
}

#[test]
fn test_clear_caches_forgets_instances() {
    let (manager, _connection) = session();
    let alice = user("alice");
    manager.store(&alice).unwrap();

    manager.clear_caches();
    let reloaded = manager.find("User", 1).unwrap().unwrap();
    assert!(!reloaded.ptr_eq(&alice));
    assert_eq!(reloaded.value("name"), Value::from("alice"));
}

#[test]
fn test_update_writes_only_changes() {
    let (manager, connection) = session();
    let alice = user("alice").with("age", 30);
    manager.store(&alice).unwrap();

    alice.set("age", 31);
    manager.store(&alice).unwrap();

    let rows = connection.rows("users");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("age"), Some(&Value::Integer(31)));
    assert_eq!(rows[0].get("name"), Some(&Value::from("alice")));
}

#[test]
fn test_dirty_check_is_idempotent_after_store() {
    let (manager, _connection) = session();
    let alice = user("alice").with("posts", vec![post("first"), post("second")]);
    manager.store(&alice).unwrap();

    let aggregate = Aggregate::new(&manager, &alice).unwrap();
    assert!(aggregate.exists().unwrap());
    assert!(aggregate.get_dirty_raw_attributes().unwrap().is_empty());
    for child in aggregate.children_of("posts") {
        assert!(child.get_dirty_raw_attributes().unwrap().is_empty());
    }
    assert!(!aggregate.needs_store().unwrap());
}

#[test]
fn test_cascade_create_through_belongs_to() {
    let (manager, connection) = session();
    let author = user("bob");
    let draft = post("hello").with("user", &author);

    manager.store(&draft).unwrap();

    assert_eq!(count(&connection, "users"), 1);
    assert_eq!(count(&connection, "posts"), 1);
    let author_key = author.value("id");
    assert!(!author_key.is_null());
    let rows = connection.rows("posts");
    assert_eq!(rows[0].get("user_id"), Some(&author_key));
}

#[test]
fn test_cascade_create_through_has_many() {
    let (manager, connection) = session();
    let alice = user("alice").with("posts", vec![post("one"), post("two")]);
    manager.store(&alice).unwrap();

    let rows = connection.rows("posts");
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(row.get("user_id"), Some(&alice.value("id")));
    }
}

#[test]
fn test_cycles_are_stored_once() {
    let (manager, connection) = session();
    let alice = user("alice");
    let first = post("first").with("user", &alice);
    alice.set("posts", vec![first.clone()]);

    // Either side of the cycle can be the root
    manager.store(&first).unwrap();
    manager.store(&alice).unwrap();

    assert_eq!(count(&connection, "users"), 1);
    assert_eq!(count(&connection, "posts"), 1);
    assert_eq!(connection.rows("posts")[0].get("user_id"), Some(&alice.value("id")));

    let aggregate = Aggregate::new(&manager, &alice).unwrap();
    let children = aggregate.children_of("posts");
    assert_eq!(children.len(), 1);
    assert!(children[0].children_of("user").is_empty());
    assert_eq!(children[0].back_references("user").len(), 1);
}

#[test]
fn test_store_many_counts_stored_entities() {
    let (manager, connection) = session();
    let users = manager.mapper("User").unwrap();
    let stored = users.store_many(&[user("a"), user("b"), user("c")]).unwrap();
    assert_eq!(stored, 3);
    assert_eq!(count(&connection, "users"), 3);
}

#[test]
fn test_delete_nulls_key_and_repeat_delete_fails() {
    let (manager, connection) = session();
    let alice = user("alice");
    manager.store(&alice).unwrap();

    assert!(manager.delete(&alice).unwrap());
    assert!(alice.value("id").is_null());
    assert_eq!(count(&connection, "users"), 0);
    assert!(manager.find("User", 1).unwrap().is_none());

    let err = manager.delete(&alice).unwrap_err();
    assert!(err.is_mapping());
    assert!(err.to_string().contains("null primary key"));
}

#[test]
fn test_explicit_key_is_reusable_after_delete() {
    let (manager, connection) = session();
    let first = Entity::new("Tag").with("id", 7).with("label", "a");
    manager.store(&first).unwrap();
    assert!(manager.delete(&first).unwrap());
    assert_eq!(count(&connection, "tags"), 0);

    let second = Entity::new("Tag").with("id", 7).with("label", "b");
    assert!(!Aggregate::new(&manager, &second).unwrap().exists().unwrap());
    assert!(manager.store(&second).unwrap());

    let rows = connection.rows("tags");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("label"), Some(&Value::from("b")));
    assert!(manager.find("Tag", 7).unwrap().unwrap().ptr_eq(&second));
}

#[test]
fn test_delete_many() {
    let (manager, connection) = session();
    let users = manager.mapper("User").unwrap();
    let batch = [user("a"), user("b")];
    users.store_many(&batch).unwrap();

    assert_eq!(users.delete_many(&batch).unwrap(), 2);
    assert_eq!(count(&connection, "users"), 0);
}

#[test]
fn test_find_or_fail() {
    let (manager, _connection) = session();
    let users = manager.mapper("User").unwrap();
    let err = users.find_or_fail(7).unwrap_err();
    assert!(err.is_not_found());

    users.store(&user("alice")).unwrap();
    assert_eq!(users.find_or_fail(1).unwrap().value("name"), Value::from("alice"));
}

#[test]
fn test_mapper_rejects_other_types() {
    let (manager, _connection) = session();
    let users = manager.mapper("User").unwrap();
    assert!(users.store(&post("stray")).unwrap_err().is_mapping());
}

#[test]
fn test_unregistered_type() {
    let (manager, _connection) = session();
    assert!(manager.mapper("Planet").err().unwrap().is_mapping());
    assert!(manager.store(&Entity::new("Planet")).unwrap_err().is_mapping());
}

#[test]
fn test_timestamps_are_filled() {
    let (manager, connection) = session();
    let draft = post("stamped");
    manager.store(&draft).unwrap();

    let created = draft.value("created_at");
    assert!(created.as_str().is_some());
    assert_eq!(draft.value("updated_at"), created);
    let rows = connection.rows("posts");
    assert_eq!(rows[0].get("created_at"), Some(&created));
}
