use crate::core::OrmError;
use crate::entity::{Entity, Lazy, Loader};
use crate::manager::Manager;
use crate::map::RelationDefinition;
use crate::relationships::Relationship;
use std::rc::Rc;
use tracing::{Level, event};

/// Builds the lazy proxies installed on relations that were not loaded.
pub struct ProxyFactory;

impl ProxyFactory {
    /// Proxy that loads `definition` for `entity` on first access. It holds
    /// neither the session nor the entity alive.
    pub fn make(manager: &Manager, entity: &Entity, definition: &Rc<RelationDefinition>) -> Lazy {
        let session = manager.downgrade();
        let owner = entity.downgrade();
        let relation = definition.clone();

        let loader: Loader = Rc::new(move || {
            let manager = session.upgrade().ok_or_else(|| {
                OrmError::mapping(format!("session closed before '{}' was loaded", relation.name))
            })?;
            let entity = owner.upgrade().ok_or_else(|| {
                OrmError::mapping(format!("owner of '{}' dropped before it was loaded", relation.name))
            })?;
            event!(
                Level::TRACE,
                entity = ?entity,
                relation = %relation.name,
                "loading lazy relation"
            );
            let map = manager.entity_map(entity.type_name())?;
            Relationship::new(&manager, map, relation.clone())?.get_results(&entity)
        });

        if definition.is_many() {
            Lazy::many(loader)
        } else {
            Lazy::single(loader)
        }
    }
}
