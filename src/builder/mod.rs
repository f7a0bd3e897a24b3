// ============================================================================
// Result Building
// ============================================================================
//
// Turns raw rows into entities: caches the rows, eager loads the requested
// relations in one batch per relation, hydrates embedded value objects,
// installs lazy proxies on everything else and keeps the identity map
// authoritative (a row whose key is already live yields the live instance).
//
// ============================================================================

pub mod entity_builder;
pub mod proxy;
pub mod result_builder;

pub use entity_builder::EntityBuilder;
pub use proxy::ProxyFactory;
pub use result_builder::ResultBuilder;
