use super::{EntityMap, KeySetting, RelationClasses, RelationDefinition, naming};
use crate::config::ManagerConfig;
use crate::core::{OrmError, Result};
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::{Level, event};

/// Type name to [`EntityMap`] resolution for one session.
///
/// Maps are registered up front and frozen by [`Registry::boot`]; after that
/// the registry only hands out shared, immutable descriptors.
#[derive(Debug, Default)]
pub struct Registry {
    pending: Vec<EntityMap>,
    maps: BTreeMap<String, Rc<EntityMap>>,
    morph_types: BTreeMap<String, String>,
    booted: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, map: EntityMap) -> Self {
        self.pending.push(map);
        self
    }

    pub fn is_booted(&self) -> bool {
        self.booted
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.maps.contains_key(type_name)
    }

    pub fn get(&self, type_name: &str) -> Result<Rc<EntityMap>> {
        self.maps
            .get(type_name)
            .cloned()
            .ok_or_else(|| OrmError::mapping(format!("no entity map registered for '{}'", type_name)))
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.maps.keys().map(String::as_str)
    }

    /// Type registered under a polymorphic type column value.
    pub fn type_for_morph_class(&self, class: &str) -> Result<&str> {
        self.morph_types
            .get(class)
            .map(String::as_str)
            .ok_or_else(|| OrmError::mapping(format!("no entity map uses morph class '{}'", class)))
    }

    /// Whether `type_name` is `ancestor` or inherits from it.
    pub fn is_a(&self, type_name: &str, ancestor: &str) -> bool {
        let mut current = Some(type_name);
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            current = self.maps.get(name).and_then(|map| map.parent_type());
        }
        false
    }

    /// Freezes every registered map. Runs once; later calls are no-ops.
    pub fn boot(&mut self, config: &ManagerConfig) -> Result<()> {
        if self.booted {
            return Ok(());
        }

        let mut working: BTreeMap<String, EntityMap> = BTreeMap::new();
        for map in self.pending.drain(..) {
            working.insert(map.type_name.clone(), map);
        }

        for map in working.values_mut() {
            if map.extends.is_none() {
                if map.table.is_none() {
                    map.table = Some(naming::table_name(&map.type_name));
                }
                if map.key == KeySetting::Default {
                    map.key = KeySetting::Named(config.default_key_name.clone());
                }
            }
        }

        let names: Vec<String> = working.keys().cloned().collect();
        for name in &names {
            let Some(root_name) = inheritance_root(&working, name)? else {
                continue;
            };
            let root = working
                .get(&root_name)
                .cloned()
                .ok_or_else(|| OrmError::mapping(format!("unknown parent type '{}'", root_name)))?;
            let discriminator_value = root
                .discriminator_map
                .iter()
                .find(|(_, ty)| *ty == name)
                .map(|(value, _)| value.clone())
                .ok_or_else(|| {
                    OrmError::mapping(format!(
                        "'{}' extends '{}' but has no discriminator value",
                        name, root_name
                    ))
                })?;
            if let Some(map) = working.get_mut(name) {
                map.table = root.table.clone();
                if map.key == KeySetting::Default {
                    map.key = root.key.clone();
                }
                if map.sequence.is_none() {
                    map.sequence = root.sequence.clone();
                }
                map.discriminator_column = root.discriminator_column.clone();
                map.discriminator_map = root.discriminator_map.clone();
                map.discriminator_value = Some(discriminator_value);
                map.timestamps |= root.timestamps;
                map.soft_deletes |= root.soft_deletes;
            }
        }

        for map in working.values_mut() {
            if map.has_inheritance() && map.extends.is_none() {
                for (value, ty) in &map.discriminator_map {
                    if ty == &map.type_name {
                        map.discriminator_value = Some(value.clone());
                    }
                }
            }
        }
        for map in working.values() {
            for (value, ty) in &map.discriminator_map {
                if !working.contains_key(ty) {
                    return Err(OrmError::mapping(format!(
                        "discriminator value '{}' of '{}' maps to unregistered type '{}'",
                        value, map.type_name, ty
                    )));
                }
            }
        }

        let keys: BTreeMap<String, Option<String>> = working
            .iter()
            .map(|(name, map)| (name.clone(), map.key_name().map(str::to_string)))
            .collect();
        let key_of = |type_name: &str| -> Result<String> {
            match keys.get(type_name) {
                Some(Some(key)) => Ok(key.clone()),
                Some(None) => Err(OrmError::mapping(format!(
                    "'{}' has no primary key and cannot be related to",
                    type_name
                ))),
                None => Err(OrmError::mapping(format!(
                    "relation target '{}' is not registered",
                    type_name
                ))),
            }
        };

        // Roots first so subtypes can inherit resolved relations.
        let mut ordered = names.clone();
        ordered.sort_by_key(|name| inheritance_depth(&working, name));
        for name in &ordered {
            let Some(map) = working.get(name) else { continue };
            let parent_relations = match &map.extends {
                Some(parent) => working
                    .get(parent)
                    .map(|p| p.relations.clone())
                    .unwrap_or_default(),
                None => Vec::new(),
            };
            let mut own = map.pending_relations.clone();
            let parent_key = map.key_name().unwrap_or_default().to_string();
            for relation in own.iter_mut() {
                relation.resolve(name, &parent_key, &key_of)?;
            }

            let mut relations = parent_relations;
            for relation in own {
                relations.retain(|r| r.name != relation.name);
                relations.push(Rc::new(relation));
            }

            if let Some(map) = working.get_mut(name) {
                map.pending_relations.clear();
                map.classes = classify(&relations);
                map.relations = relations;
            }
        }

        for (name, map) in working {
            self.morph_types
                .insert(map.morph_class_name().to_string(), name.clone());
            event!(
                Level::TRACE,
                entity_type = %name,
                table = %map.table_name(),
                relations = map.relations.len(),
                "entity map booted"
            );
            self.maps.insert(name, Rc::new(map));
        }

        self.booted = true;
        Ok(())
    }
}

fn classify(relations: &[Rc<RelationDefinition>]) -> RelationClasses {
    let mut classes = RelationClasses::default();
    for relation in relations {
        let name = relation.name.clone();
        if relation.kind.is_many() {
            classes.many.push(name.clone());
        } else {
            classes.single.push(name.clone());
        }
        if relation.kind.is_local() {
            classes.local.push(name.clone());
        }
        if relation.kind.is_foreign() {
            classes.foreign.push(name.clone());
        }
        if relation.kind.is_pivot() {
            classes.pivot.push(name);
        }
    }
    classes
}

fn inheritance_root(maps: &BTreeMap<String, EntityMap>, name: &str) -> Result<Option<String>> {
    let mut current = name.to_string();
    let mut seen = vec![current.clone()];
    loop {
        let map = maps
            .get(&current)
            .ok_or_else(|| OrmError::mapping(format!("unknown parent type '{}'", current)))?;
        match &map.extends {
            None if current == name => return Ok(None),
            None => return Ok(Some(current)),
            Some(parent) => {
                if seen.contains(parent) {
                    return Err(OrmError::mapping(format!(
                        "inheritance cycle through '{}'",
                        parent
                    )));
                }
                seen.push(parent.clone());
                current = parent.clone();
            }
        }
    }
}

fn inheritance_depth(maps: &BTreeMap<String, EntityMap>, name: &str) -> usize {
    let mut depth = 0;
    let mut current = maps.get(name).and_then(|m| m.extends.clone());
    while let Some(parent) = current {
        depth += 1;
        if depth > maps.len() {
            break;
        }
        current = maps.get(&parent).and_then(|m| m.extends.clone());
    }
    depth
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boot(registry: Registry) -> Result<Registry> {
        let mut registry = registry;
        registry.boot(&ManagerConfig::default())?;
        Ok(registry)
    }

    #[test]
    fn test_defaults_and_classification() {
        let registry = boot(
            Registry::new()
                .register(EntityMap::new("User").has_many("posts", "Post"))
                .register(
                    EntityMap::new("Post")
                        .belongs_to("author", "User")
                        .belongs_to_many("tags", "Tag"),
                )
                .register(EntityMap::new("Tag")),
        )
        .unwrap();

        let post = registry.get("Post").unwrap();
        assert_eq!(post.table_name(), "posts");
        assert_eq!(post.key_name(), Some("id"));
        assert_eq!(post.local_relations(), ["author".to_string()]);
        assert_eq!(post.pivot_relations(), ["tags".to_string()]);
        assert_eq!(post.single_relations(), ["author".to_string()]);

        let user = registry.get("User").unwrap();
        let posts = user.relation_definition("posts").unwrap();
        assert_eq!(posts.foreign_key_name(), "user_id");
        assert_eq!(user.foreign_relations(), ["posts".to_string()]);
    }

    #[test]
    fn test_single_table_inheritance() {
        let registry = boot(
            Registry::new()
                .register(
                    EntityMap::new("Vehicle")
                        .discriminator("kind", [("car", "Car"), ("truck", "Truck")])
                        .belongs_to("owner", "User"),
                )
                .register(EntityMap::new("Car").extends("Vehicle"))
                .register(EntityMap::new("Truck").extends("Vehicle").table("ignored"))
                .register(EntityMap::new("User")),
        )
        .unwrap();

        let truck = registry.get("Truck").unwrap();
        assert_eq!(truck.table_name(), "vehicles");
        assert_eq!(truck.discriminator_value(), Some("truck"));
        assert!(truck.is_relation("owner"));
        assert_eq!(registry.get("Vehicle").unwrap().subtype_for("car"), Some("Car"));
    }

    #[test]
    fn test_unknown_subtype_is_rejected() {
        let result = boot(
            Registry::new().register(EntityMap::new("Vehicle").discriminator("kind", [("bike", "Bike")])),
        );
        assert!(result.unwrap_err().is_mapping());
    }

    #[test]
    fn test_subtype_missing_from_discriminator_map() {
        let result = boot(
            Registry::new()
                .register(EntityMap::new("Vehicle").discriminator("kind", [("car", "Car")]))
                .register(EntityMap::new("Car").extends("Vehicle"))
                .register(EntityMap::new("Boat").extends("Vehicle")),
        );
        assert!(result.unwrap_err().is_mapping());
    }

    #[test]
    fn test_morph_classes() {
        let registry = boot(
            Registry::new()
                .register(EntityMap::new("Post").morph_class("post"))
                .register(
                    EntityMap::new("Comment").relation(RelationDefinition::morph_to("commentable")),
                ),
        )
        .unwrap();
        assert_eq!(registry.type_for_morph_class("post").unwrap(), "Post");
        assert_eq!(registry.type_for_morph_class("Comment").unwrap(), "Comment");
        assert!(registry.type_for_morph_class("Video").is_err());
    }

    #[test]
    fn test_relation_to_unregistered_type() {
        let result = boot(Registry::new().register(EntityMap::new("User").has_many("posts", "Post")));
        assert!(result.unwrap_err().is_mapping());
    }
}
