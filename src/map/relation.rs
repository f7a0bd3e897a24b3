use super::naming;
use crate::core::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    BelongsTo,
    MorphTo,
    HasOne,
    HasMany,
    MorphOne,
    MorphMany,
    BelongsToMany,
    MorphToMany,
    HasManyThrough,
}

impl RelationKind {
    /// Multi-valued relations hold collections, the others a single entity.
    pub fn is_many(&self) -> bool {
        matches!(
            self,
            Self::HasMany
                | Self::MorphMany
                | Self::BelongsToMany
                | Self::MorphToMany
                | Self::HasManyThrough
        )
    }

    /// The foreign key lives on the owner's own row.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::BelongsTo | Self::MorphTo)
    }

    /// The foreign key lives on the related row or on a join table.
    pub fn is_foreign(&self) -> bool {
        matches!(
            self,
            Self::HasOne
                | Self::HasMany
                | Self::MorphOne
                | Self::MorphMany
                | Self::BelongsToMany
                | Self::MorphToMany
        )
    }

    pub fn is_pivot(&self) -> bool {
        matches!(self, Self::BelongsToMany | Self::MorphToMany)
    }

    pub fn is_morph(&self) -> bool {
        matches!(
            self,
            Self::MorphTo | Self::MorphOne | Self::MorphMany | Self::MorphToMany
        )
    }

    /// Relations whose related rows carry this entity's key.
    pub fn is_owning(&self) -> bool {
        matches!(
            self,
            Self::HasOne | Self::HasMany | Self::MorphOne | Self::MorphMany
        )
    }
}

/// Declaration of one relation on an [`EntityMap`](super::EntityMap).
///
/// Column names left unset follow the naming conventions in
/// [`naming`](super::naming) and are filled in when the registry boots.
#[derive(Debug, Clone)]
pub struct RelationDefinition {
    pub name: String,
    pub kind: RelationKind,
    pub related: Option<String>,
    pub foreign_key: Option<String>,
    /// Key the foreign key points at: the related key for belongs-to, the
    /// parent key for every other kind.
    pub owner_key: Option<String>,
    pub morph_name: Option<String>,
    pub morph_type: Option<String>,
    pub pivot_table: Option<String>,
    pub related_pivot_key: Option<String>,
    /// Related key for many-to-many, key of the intermediate type for has-many-through.
    pub related_key: Option<String>,
    pub pivot_columns: Vec<String>,
    pub inverse: bool,
    pub through: Option<String>,
    pub second_key: Option<String>,
}

impl RelationDefinition {
    fn new(name: &str, kind: RelationKind, related: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            related: related.map(str::to_string),
            foreign_key: None,
            owner_key: None,
            morph_name: None,
            morph_type: None,
            pivot_table: None,
            related_pivot_key: None,
            related_key: None,
            pivot_columns: Vec::new(),
            inverse: false,
            through: None,
            second_key: None,
        }
    }

    pub fn belongs_to(name: &str, related: &str) -> Self {
        Self::new(name, RelationKind::BelongsTo, Some(related))
    }

    /// Polymorphic belongs-to; the related type is read from `<name>_type`.
    pub fn morph_to(name: &str) -> Self {
        let mut relation = Self::new(name, RelationKind::MorphTo, None);
        relation.morph_name = Some(name.to_string());
        relation
    }

    pub fn has_one(name: &str, related: &str) -> Self {
        Self::new(name, RelationKind::HasOne, Some(related))
    }

    pub fn has_many(name: &str, related: &str) -> Self {
        Self::new(name, RelationKind::HasMany, Some(related))
    }

    pub fn morph_one(name: &str, related: &str, morph_name: &str) -> Self {
        let mut relation = Self::new(name, RelationKind::MorphOne, Some(related));
        relation.morph_name = Some(morph_name.to_string());
        relation
    }

    pub fn morph_many(name: &str, related: &str, morph_name: &str) -> Self {
        let mut relation = Self::new(name, RelationKind::MorphMany, Some(related));
        relation.morph_name = Some(morph_name.to_string());
        relation
    }

    pub fn belongs_to_many(name: &str, related: &str) -> Self {
        Self::new(name, RelationKind::BelongsToMany, Some(related))
    }

    pub fn morph_to_many(name: &str, related: &str, morph_name: &str) -> Self {
        let mut relation = Self::new(name, RelationKind::MorphToMany, Some(related));
        relation.morph_name = Some(morph_name.to_string());
        relation
    }

    /// Inverse side of [`RelationDefinition::morph_to_many`].
    pub fn morphed_by_many(name: &str, related: &str, morph_name: &str) -> Self {
        let mut relation = Self::morph_to_many(name, related, morph_name);
        relation.inverse = true;
        relation
    }

    pub fn has_many_through(name: &str, related: &str, through: &str) -> Self {
        let mut relation = Self::new(name, RelationKind::HasManyThrough, Some(related));
        relation.through = Some(through.to_string());
        relation
    }

    pub fn foreign_key(mut self, column: &str) -> Self {
        self.foreign_key = Some(column.to_string());
        self
    }

    pub fn owner_key(mut self, column: &str) -> Self {
        self.owner_key = Some(column.to_string());
        self
    }

    pub fn morph_type(mut self, column: &str) -> Self {
        self.morph_type = Some(column.to_string());
        self
    }

    pub fn pivot_table(mut self, table: &str) -> Self {
        self.pivot_table = Some(table.to_string());
        self
    }

    pub fn related_pivot_key(mut self, column: &str) -> Self {
        self.related_pivot_key = Some(column.to_string());
        self
    }

    pub fn related_key(mut self, column: &str) -> Self {
        self.related_key = Some(column.to_string());
        self
    }

    pub fn second_key(mut self, column: &str) -> Self {
        self.second_key = Some(column.to_string());
        self
    }

    /// Extra join-table columns exposed on the `pivot` sub-entity.
    pub fn with_pivot<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pivot_columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn is_many(&self) -> bool {
        self.kind.is_many()
    }

    pub fn related_type(&self) -> &str {
        self.related.as_deref().unwrap_or_default()
    }

    pub fn foreign_key_name(&self) -> &str {
        self.foreign_key.as_deref().unwrap_or_default()
    }

    pub fn owner_key_name(&self) -> &str {
        self.owner_key.as_deref().unwrap_or_default()
    }

    pub fn morph_type_name(&self) -> Option<&str> {
        self.morph_type.as_deref()
    }

    pub fn pivot_table_name(&self) -> &str {
        self.pivot_table.as_deref().unwrap_or_default()
    }

    pub fn related_pivot_key_name(&self) -> &str {
        self.related_pivot_key.as_deref().unwrap_or_default()
    }

    pub fn related_key_name(&self) -> &str {
        self.related_key.as_deref().unwrap_or_default()
    }

    pub fn through_type(&self) -> &str {
        self.through.as_deref().unwrap_or_default()
    }

    pub fn second_key_name(&self) -> &str {
        self.second_key.as_deref().unwrap_or_default()
    }

    /// Join-table columns that identify the association rather than describe it.
    pub fn pivot_key_columns(&self) -> Vec<&str> {
        let mut columns = vec![self.foreign_key_name(), self.related_pivot_key_name()];
        if let Some(morph_type) = self.morph_type_name() {
            columns.push(morph_type);
        }
        columns
    }

    /// Fills every unset column from the naming conventions. `key_of`
    /// returns the primary key name of a registered type.
    pub(crate) fn resolve(
        &mut self,
        parent_type: &str,
        parent_key: &str,
        key_of: &dyn Fn(&str) -> Result<String>,
    ) -> Result<()> {
        fn fill(slot: &mut Option<String>, default: impl FnOnce() -> String) {
            if slot.is_none() {
                *slot = Some(default());
            }
        }

        let related = self.related.clone().unwrap_or_default();
        match self.kind {
            RelationKind::BelongsTo => {
                let owner = key_of(&related)?;
                fill(&mut self.foreign_key, || naming::foreign_key(&self.name));
                fill(&mut self.owner_key, || owner);
            }
            RelationKind::MorphTo => {
                let (id, ty) = naming::morph_columns(self.morph_name.as_deref().unwrap_or(&self.name));
                fill(&mut self.foreign_key, || id);
                fill(&mut self.morph_type, || ty);
            }
            RelationKind::HasOne | RelationKind::HasMany => {
                key_of(&related)?;
                fill(&mut self.foreign_key, || naming::foreign_key(parent_type));
                fill(&mut self.owner_key, || parent_key.to_string());
            }
            RelationKind::MorphOne | RelationKind::MorphMany => {
                key_of(&related)?;
                let (id, ty) = naming::morph_columns(self.morph_name.as_deref().unwrap_or(&self.name));
                fill(&mut self.foreign_key, || id);
                fill(&mut self.morph_type, || ty);
                fill(&mut self.owner_key, || parent_key.to_string());
            }
            RelationKind::BelongsToMany => {
                let related_key = key_of(&related)?;
                fill(&mut self.pivot_table, || naming::pivot_table(parent_type, &related));
                fill(&mut self.foreign_key, || naming::foreign_key(parent_type));
                fill(&mut self.related_pivot_key, || naming::foreign_key(&related));
                fill(&mut self.owner_key, || parent_key.to_string());
                fill(&mut self.related_key, || related_key);
            }
            RelationKind::MorphToMany => {
                let related_key = key_of(&related)?;
                let morph_name = self.morph_name.clone().unwrap_or_else(|| self.name.clone());
                let (id, ty) = naming::morph_columns(&morph_name);
                fill(&mut self.pivot_table, || format!("{}s", naming::snake(&morph_name)));
                if self.inverse {
                    fill(&mut self.foreign_key, || naming::foreign_key(parent_type));
                    fill(&mut self.related_pivot_key, || id);
                } else {
                    fill(&mut self.foreign_key, || id);
                    fill(&mut self.related_pivot_key, || naming::foreign_key(&related));
                }
                fill(&mut self.morph_type, || ty);
                fill(&mut self.owner_key, || parent_key.to_string());
                fill(&mut self.related_key, || related_key);
            }
            RelationKind::HasManyThrough => {
                key_of(&related)?;
                let through = self.through.clone().unwrap_or_default();
                let through_key = key_of(&through)?;
                fill(&mut self.foreign_key, || naming::foreign_key(parent_type));
                fill(&mut self.second_key, || naming::foreign_key(&through));
                fill(&mut self.owner_key, || parent_key.to_string());
                fill(&mut self.related_key, || through_key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::OrmError;

    fn keys(type_name: &str) -> Result<String> {
        match type_name {
            "User" | "Post" | "Role" | "Permission" | "Tag" | "Country" => Ok("id".into()),
            other => Err(OrmError::mapping(format!("unknown type {}", other))),
        }
    }

    #[test]
    fn test_belongs_to_defaults() {
        let mut relation = RelationDefinition::belongs_to("author", "User");
        relation.resolve("Post", "id", &keys).unwrap();
        assert_eq!(relation.foreign_key_name(), "author_id");
        assert_eq!(relation.owner_key_name(), "id");
    }

    #[test]
    fn test_belongs_to_many_defaults() {
        let mut relation = RelationDefinition::belongs_to_many("permissions", "Permission");
        relation.resolve("Role", "id", &keys).unwrap();
        assert_eq!(relation.pivot_table_name(), "permission_role");
        assert_eq!(relation.foreign_key_name(), "role_id");
        assert_eq!(relation.related_pivot_key_name(), "permission_id");
        assert_eq!(relation.pivot_key_columns(), vec!["role_id", "permission_id"]);
    }

    #[test]
    fn test_morph_to_many_sides() {
        let mut forward = RelationDefinition::morph_to_many("tags", "Tag", "taggable");
        forward.resolve("Post", "id", &keys).unwrap();
        assert_eq!(forward.pivot_table_name(), "taggables");
        assert_eq!(forward.foreign_key_name(), "taggable_id");
        assert_eq!(forward.related_pivot_key_name(), "tag_id");

        let mut inverse = RelationDefinition::morphed_by_many("posts", "Post", "taggable");
        inverse.resolve("Tag", "id", &keys).unwrap();
        assert_eq!(inverse.foreign_key_name(), "tag_id");
        assert_eq!(inverse.related_pivot_key_name(), "taggable_id");
        assert_eq!(inverse.morph_type_name(), Some("taggable_type"));
    }

    #[test]
    fn test_explicit_columns_win() {
        let mut relation = RelationDefinition::has_many("posts", "Post").foreign_key("writer_id");
        relation.resolve("User", "id", &keys).unwrap();
        assert_eq!(relation.foreign_key_name(), "writer_id");
    }

    #[test]
    fn test_unknown_related_type() {
        let mut relation = RelationDefinition::has_many("things", "Thing");
        assert!(relation.resolve("User", "id", &keys).unwrap_err().is_mapping());
    }

    #[test]
    fn test_classification() {
        assert!(RelationKind::BelongsTo.is_local());
        assert!(!RelationKind::BelongsTo.is_many());
        assert!(RelationKind::MorphToMany.is_pivot());
        assert!(RelationKind::MorphToMany.is_foreign());
        assert!(!RelationKind::HasManyThrough.is_foreign());
        assert!(!RelationKind::HasManyThrough.is_local());
    }
}
