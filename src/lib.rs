// ============================================================================
// Datamapper Library
// ============================================================================
//
// Data-mapper persistence core: entities are plain attribute bags (or user
// structs), schema lives in registered entity maps, and a session manager
// keeps an identity map plus a snapshot of every row it has seen so a store
// call writes only what changed across a whole entity graph.
//
// ============================================================================

pub mod aggregate;
pub mod builder;
pub mod cache;
pub mod commands;
pub mod config;
pub mod connection;
pub mod core;
pub mod entity;
pub mod events;
pub mod manager;
pub mod map;
pub mod mapper;
pub mod relationships;
pub mod wrapper;

// Re-export main types for convenience
pub use aggregate::{Aggregate, RelationState};
pub use config::ManagerConfig;
pub use connection::{Connection, Direction, MemoryConnection, Query};
pub use crate::core::{OrmError, Result, Row, Value, row};
pub use entity::{AttributeValue, Entity, Lazy, ObjectAttributes};
pub use events::{EventDispatcher, Events, LifecycleEvent};
pub use manager::{Manager, ManagerBuilder};
pub use map::{EntityMap, Registry, RelationDefinition, RelationKind};
pub use mapper::{EntityQuery, Mapper};
pub use relationships::Relationship;
pub use wrapper::Wrapper;
