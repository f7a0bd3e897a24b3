//! Shared fixtures for the integration suites
//!
//! A small blog schema over the in-memory connection: users with posts,
//! comments and tags, roles with permissions (join rows carry `granted_by`),
//! countries reaching posts through users, profiles, polymorphic images and
//! labels shared by posts and videos, prices keyed by currency code, a
//! vehicle inheritance hierarchy and soft-deleted articles.
#![allow(dead_code)]

use datamapper::{
    Connection, Entity, EntityMap, Events, Manager, ManagerConfig, MemoryConnection, Registry,
    RelationDefinition, Value,
};
use std::rc::Rc;

pub fn registry() -> Registry {
    Registry::new()
        .register(
            EntityMap::new("User")
                .has_many("posts", "Post")
                .has_one("profile", "Profile")
                .belongs_to("country", "Country")
                .embed("address", "Address", ["street", "city"]),
        )
        .register(
            EntityMap::new("Post")
                .belongs_to("user", "User")
                .has_many("comments", "Comment")
                .belongs_to_many("tags", "Tag")
                .relation(RelationDefinition::morph_many("images", "Image", "imageable"))
                .relation(RelationDefinition::morph_to_many("labels", "Label", "labelable"))
                .timestamps(),
        )
        .register(EntityMap::new("Profile").belongs_to("user", "User"))
        .register(
            EntityMap::new("Video")
                .relation(RelationDefinition::morph_one("thumbnail", "Image", "imageable"))
                .relation(RelationDefinition::morph_to_many("labels", "Label", "labelable")),
        )
        .register(
            EntityMap::new("Label")
                .relation(RelationDefinition::morphed_by_many("posts", "Post", "labelable"))
                .relation(RelationDefinition::morphed_by_many("videos", "Video", "labelable")),
        )
        .register(EntityMap::new("Comment").belongs_to("post", "Post"))
        .register(EntityMap::new("Tag"))
        .register(
            EntityMap::new("Role").relation(
                RelationDefinition::belongs_to_many("permissions", "Permission").with_pivot(["granted_by"]),
            ),
        )
        .register(EntityMap::new("Permission"))
        .register(
            EntityMap::new("Country")
                .has_many("users", "User")
                .relation(RelationDefinition::has_many_through("posts", "Post", "User")),
        )
        .register(EntityMap::new("Currency").table("currencies"))
        .register(
            EntityMap::new("Price").relation(
                RelationDefinition::belongs_to("currency", "Currency")
                    .foreign_key("currency_code")
                    .owner_key("code"),
            ),
        )
        .register(EntityMap::new("Image").morph_to("imageable"))
        .register(EntityMap::new("Vehicle").discriminator("kind", [("car", "Car"), ("truck", "Truck")]))
        .register(EntityMap::new("Car").extends("Vehicle"))
        .register(EntityMap::new("Truck").extends("Vehicle"))
        .register(EntityMap::new("Article").soft_deletes())
}

/// Fresh session over a fresh store.
pub fn session() -> (Manager, Rc<MemoryConnection>) {
    let connection = Rc::new(MemoryConnection::new());
    (session_on(&connection), connection)
}

/// Second session over an existing store, with empty caches.
pub fn session_on(connection: &Rc<MemoryConnection>) -> Manager {
    Manager::new(registry(), connection.clone()).unwrap()
}

pub fn session_with_events(events: Rc<Events>) -> (Manager, Rc<MemoryConnection>) {
    let connection = Rc::new(MemoryConnection::new());
    let manager = Manager::builder(registry(), connection.clone())
        .events(events)
        .build()
        .unwrap();
    (manager, connection)
}

pub fn session_with_config(config: ManagerConfig) -> (Manager, Rc<MemoryConnection>) {
    let connection = Rc::new(MemoryConnection::new());
    let manager = Manager::builder(registry(), connection.clone())
        .config(config)
        .build()
        .unwrap();
    (manager, connection)
}

pub fn user(name: &str) -> Entity {
    Entity::new("User").with("name", name)
}

pub fn post(title: &str) -> Entity {
    Entity::new("Post").with("title", title)
}

/// `(role_id, permission_id)` pairs currently in the join table.
pub fn role_permissions(connection: &MemoryConnection) -> Vec<(Value, Value)> {
    let mut pairs: Vec<(Value, Value)> = connection
        .rows("permission_role")
        .into_iter()
        .map(|row| {
            (
                row.get("role_id").cloned().unwrap_or(Value::Null),
                row.get("permission_id").cloned().unwrap_or(Value::Null),
            )
        })
        .collect();
    pairs.sort_by_key(|(role, permission)| (role.to_string(), permission.to_string()));
    pairs
}

/// Number of rows in `table` as seen through the connection trait.
pub fn count(connection: &MemoryConnection, table: &str) -> usize {
    connection
        .select(&datamapper::Query::from(table))
        .map(|rows| rows.len())
        .unwrap_or(0)
}
