use super::EntityBuilder;
use crate::core::{OrmError, Result, Row};
use crate::entity::{AttributeValue, Entity};
use crate::manager::Manager;
use crate::map::EntityMap;
use crate::relationships::{Relationship, ResultRow};
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::{Level, event};

/// Builds entities from the rows of one query.
pub struct ResultBuilder {
    manager: Manager,
    map: Rc<EntityMap>,
    eager: Vec<String>,
}

impl ResultBuilder {
    pub fn new(manager: &Manager, map: Rc<EntityMap>, eager: Vec<String>) -> Self {
        Self {
            manager: manager.clone(),
            map,
            eager,
        }
    }

    /// Entities for `rows`, in row order. Rows of an inheritance hierarchy
    /// are built by the map of the type their discriminator names.
    pub fn build(&self, rows: Vec<Row>) -> Result<Vec<Entity>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let Some(column) = self.map.discriminator_column().filter(|_| self.map.has_inheritance()) else {
            return self.build_homogeneous(self.map.clone(), rows);
        };

        let mut groups: BTreeMap<String, Vec<(usize, Row)>> = BTreeMap::new();
        for (index, row) in rows.into_iter().enumerate() {
            let type_name = match row.get(column).filter(|value| !value.is_null()) {
                Some(value) => self
                    .map
                    .subtype_for(&value.to_string())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        OrmError::mapping(format!(
                            "discriminator value '{}' in {}.{} maps to no type",
                            value,
                            self.map.table_name(),
                            column
                        ))
                    })?,
                None => self.map.type_name().to_string(),
            };
            groups.entry(type_name).or_default().push((index, row));
        }

        let mut built: Vec<(usize, Entity)> = Vec::new();
        for (type_name, members) in groups {
            let map = self.manager.entity_map(&type_name)?;
            let (indexes, rows): (Vec<usize>, Vec<Row>) = members.into_iter().unzip();
            let entities = self.build_homogeneous(map, rows)?;
            built.extend(indexes.into_iter().zip(entities));
        }
        built.sort_by_key(|(index, _)| *index);
        Ok(built.into_iter().map(|(_, entity)| entity).collect())
    }

    fn build_homogeneous(&self, map: Rc<EntityMap>, rows: Vec<Row>) -> Result<Vec<Entity>> {
        self.manager
            .attribute_cache_mut(map.type_name(), |cache| cache.add(&rows))?;

        let mut results: Vec<ResultRow> = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|(column, value)| (column, AttributeValue::Scalar(value)))
                    .collect()
            })
            .collect();

        let eager = self.eager_relations(&map)?;
        for (name, nested) in &eager {
            let definition = map.relation_definition(name).cloned().ok_or_else(|| {
                OrmError::mapping(format!(
                    "cannot eager load '{}': '{}' has no such relation",
                    name,
                    map.type_name()
                ))
            })?;
            Relationship::new(&self.manager, map.clone(), definition)?.eager_load(&mut results, nested)?;
            event!(
                Level::TRACE,
                entity_type = %map.type_name(),
                relation = %name,
                parents = results.len(),
                "relation eager loaded"
            );
        }

        let names: Vec<String> = eager.into_keys().collect();
        let builder = EntityBuilder::new(&self.manager, map, &names);
        results.into_iter().map(|row| builder.build(row)).collect()
    }

    /// Requested relations grouped by first segment: `posts.comments`
    /// eager loads `posts` with `comments` nested on the related query.
    fn eager_relations(&self, map: &EntityMap) -> Result<BTreeMap<String, Vec<String>>> {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for path in &self.eager {
            let (head, rest) = match path.split_once('.') {
                Some((head, rest)) => (head, Some(rest)),
                None => (path.as_str(), None),
            };
            if head.is_empty() {
                return Err(OrmError::mapping(format!(
                    "invalid eager load path '{}' on '{}'",
                    path,
                    map.type_name()
                )));
            }
            let nested = grouped.entry(head.to_string()).or_default();
            if let Some(rest) = rest {
                nested.push(rest.to_string());
            }
        }
        Ok(grouped)
    }
}
