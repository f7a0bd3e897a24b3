pub mod attribute_cache;
pub mod cached_relationship;
pub mod instance_cache;

pub use attribute_cache::AttributeCache;
pub use cached_relationship::{CachedAttribute, CachedRecord, CachedRelationship};
pub use instance_cache::InstanceCache;
