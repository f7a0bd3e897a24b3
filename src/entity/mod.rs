// ============================================================================
// Entities
// ============================================================================
//
// Domain objects handled by the mapper. An `Entity` is a shared handle: the
// identity map hands the same handle to every caller asking for the same row,
// and relations point at other handles, so graphs may contain cycles.
//
// ============================================================================

pub mod lazy;
pub mod object;

pub use lazy::{Lazy, Loader};
pub use object::{ObjectAttributes, ObjectFactory};

use crate::core::{OrmError, Result, Value};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// What an attribute slot holds.
#[derive(Clone, Debug)]
pub enum AttributeValue {
    Scalar(Value),
    Entity(Entity),
    Collection(Vec<Entity>),
    Lazy(Lazy),
}

impl AttributeValue {
    pub fn null() -> Self {
        AttributeValue::Scalar(Value::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Scalar(Value::Null))
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            AttributeValue::Scalar(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            AttributeValue::Entity(entity) => Some(entity),
            _ => None,
        }
    }
}

macro_rules! scalar_attribute {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for AttributeValue {
                fn from(value: $ty) -> Self {
                    AttributeValue::Scalar(value.into())
                }
            }
        )*
    };
}

scalar_attribute!(Value, i64, i32, u32, f64, bool, String, &str, Option<i64>, Option<String>);

impl From<Entity> for AttributeValue {
    fn from(entity: Entity) -> Self {
        AttributeValue::Entity(entity)
    }
}

impl From<&Entity> for AttributeValue {
    fn from(entity: &Entity) -> Self {
        AttributeValue::Entity(entity.clone())
    }
}

impl From<Vec<Entity>> for AttributeValue {
    fn from(items: Vec<Entity>) -> Self {
        AttributeValue::Collection(items)
    }
}

impl From<Lazy> for AttributeValue {
    fn from(lazy: Lazy) -> Self {
        AttributeValue::Lazy(lazy)
    }
}

enum Body {
    Attributes(BTreeMap<String, AttributeValue>),
    Object(Box<dyn ObjectAttributes>),
}

struct EntityCell {
    type_name: String,
    serial: u64,
    body: RefCell<Body>,
}

/// Shared handle to an entity instance.
#[derive(Clone)]
pub struct Entity(Rc<EntityCell>);

/// Non-owning handle, used by lazy loaders so proxies do not keep their
/// owner alive.
#[derive(Clone)]
pub struct WeakEntity(Weak<EntityCell>);

impl WeakEntity {
    pub fn upgrade(&self) -> Option<Entity> {
        self.0.upgrade().map(Entity)
    }
}

impl Entity {
    fn from_body(type_name: &str, body: Body) -> Self {
        Self(Rc::new(EntityCell {
            type_name: type_name.to_string(),
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            body: RefCell::new(body),
        }))
    }

    /// A new attribute-map entity of `type_name`.
    pub fn new(type_name: &str) -> Self {
        Self::from_body(type_name, Body::Attributes(BTreeMap::new()))
    }

    /// A new entity whose attributes live in a user struct.
    pub fn from_object(type_name: &str, object: Box<dyn ObjectAttributes>) -> Self {
        Self::from_body(type_name, Body::Object(object))
    }

    pub fn type_name(&self) -> &str {
        &self.0.type_name
    }

    /// Process-unique number, stable for the lifetime of the instance.
    pub fn serial(&self) -> u64 {
        self.0.serial
    }

    pub fn is_object(&self) -> bool {
        matches!(&*self.0.body.borrow(), Body::Object(_))
    }

    /// Raw slot content. Lazy proxies are returned as they are.
    pub fn get(&self, name: &str) -> Option<AttributeValue> {
        match &*self.0.body.borrow() {
            Body::Attributes(map) => map.get(name).cloned(),
            Body::Object(object) => object.get_attribute(name),
        }
    }

    /// Scalar content of `name`, `Null` when absent or not a scalar.
    pub fn value(&self, name: &str) -> Value {
        match self.get(name) {
            Some(AttributeValue::Scalar(value)) => value,
            _ => Value::Null,
        }
    }

    pub fn set(&self, name: &str, value: impl Into<AttributeValue>) {
        let value = value.into();
        match &mut *self.0.body.borrow_mut() {
            Body::Attributes(map) => {
                map.insert(name.to_string(), value);
            }
            Body::Object(object) => object.set_attribute(name, value),
        }
    }

    /// Builder form of [`Entity::set`].
    pub fn with(self, name: &str, value: impl Into<AttributeValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn has(&self, name: &str) -> bool {
        match &*self.0.body.borrow() {
            Body::Attributes(map) => map.contains_key(name),
            Body::Object(object) => object.get_attribute(name).is_some(),
        }
    }

    pub fn unset(&self, name: &str) {
        match &mut *self.0.body.borrow_mut() {
            Body::Attributes(map) => {
                map.remove(name);
            }
            Body::Object(object) => object.unset_attribute(name),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        match &*self.0.body.borrow() {
            Body::Attributes(map) => map.keys().cloned().collect(),
            Body::Object(object) => object.attribute_names(),
        }
    }

    /// Relation content with lazy proxies resolved.
    pub fn relation(&self, name: &str) -> Result<Option<AttributeValue>> {
        match self.get(name) {
            Some(AttributeValue::Lazy(lazy)) => lazy.load().map(Some),
            other => Ok(other),
        }
    }

    /// Single related entity behind `name`, loading it if needed.
    pub fn related(&self, name: &str) -> Result<Option<Entity>> {
        match self.relation(name)? {
            None | Some(AttributeValue::Scalar(Value::Null)) => Ok(None),
            Some(AttributeValue::Entity(entity)) => Ok(Some(entity)),
            Some(AttributeValue::Collection(_)) => Err(OrmError::mapping(format!(
                "{}.{}: expected an object, found a collection",
                self.type_name(),
                name
            ))),
            Some(other) => Err(OrmError::mapping(format!(
                "{}.{}: expected an object, found {:?}",
                self.type_name(),
                name,
                other
            ))),
        }
    }

    /// Related collection behind `name`, loading it if needed.
    pub fn collection(&self, name: &str) -> Result<Vec<Entity>> {
        match self.relation(name)? {
            None | Some(AttributeValue::Scalar(Value::Null)) => Ok(Vec::new()),
            Some(AttributeValue::Collection(items)) => Ok(items),
            Some(_) => Err(OrmError::mapping(format!(
                "{}.{}: expected a collection, found an object",
                self.type_name(),
                name
            ))),
        }
    }

    /// Appends to a collection attribute. An unloaded proxy keeps the item
    /// aside without loading.
    pub fn push(&self, name: &str, entity: Entity) -> Result<()> {
        match self.get(name) {
            Some(AttributeValue::Lazy(lazy)) if lazy.is_many() => {
                lazy.add(entity);
                Ok(())
            }
            Some(AttributeValue::Collection(mut items)) => {
                items.push(entity);
                self.set(name, items);
                Ok(())
            }
            None | Some(AttributeValue::Scalar(Value::Null)) => {
                self.set(name, vec![entity]);
                Ok(())
            }
            Some(_) => Err(OrmError::mapping(format!(
                "{}.{} does not hold a collection",
                self.type_name(),
                name
            ))),
        }
    }

    /// Removes `entity` from a collection attribute, loading it if needed.
    pub fn remove_from(&self, name: &str, entity: &Entity) -> Result<()> {
        let items: Vec<Entity> = self
            .collection(name)?
            .into_iter()
            .filter(|item| !item.ptr_eq(entity))
            .collect();
        self.set(name, items);
        Ok(())
    }

    pub fn ptr_eq(&self, other: &Entity) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakEntity {
        WeakEntity(Rc::downgrade(&self.0))
    }

    /// Runs `f` against the backing object when it is a `T`.
    pub fn with_object<T: 'static, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        match &*self.0.body.borrow() {
            Body::Object(object) => object.as_any().downcast_ref::<T>().map(f),
            Body::Attributes(_) => None,
        }
    }

    pub fn with_object_mut<T: 'static, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        match &mut *self.0.body.borrow_mut() {
            Body::Object(object) => object.as_any_mut().downcast_mut::<T>().map(f),
            Body::Attributes(_) => None,
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.type_name(), self.serial())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_access() {
        let user = Entity::new("User").with("name", "alice").with("age", 30);
        assert_eq!(user.value("name"), Value::Text("alice".into()));
        assert_eq!(user.value("missing"), Value::Null);
        assert!(user.has("age"));
        user.unset("age");
        assert!(!user.has("age"));
    }

    #[test]
    fn test_clones_share_state() {
        let user = Entity::new("User");
        let alias = user.clone();
        alias.set("name", "bob");
        assert_eq!(user.value("name"), Value::Text("bob".into()));
        assert!(user.ptr_eq(&alias));
        assert!(!user.ptr_eq(&Entity::new("User")));
    }

    #[test]
    fn test_push_and_remove() {
        let user = Entity::new("User");
        let first = Entity::new("Post");
        let second = Entity::new("Post");
        user.push("posts", first.clone()).unwrap();
        user.push("posts", second.clone()).unwrap();
        assert_eq!(user.collection("posts").unwrap().len(), 2);

        user.remove_from("posts", &first).unwrap();
        let posts = user.collection("posts").unwrap();
        assert_eq!(posts.len(), 1);
        assert!(posts[0].ptr_eq(&second));
    }

    #[test]
    fn test_single_relation_rejects_collection() {
        let post = Entity::new("Post").with("author", vec![Entity::new("User")]);
        assert!(post.related("author").unwrap_err().is_mapping());
    }

    #[test]
    fn test_weak_handle() {
        let user = Entity::new("User");
        let weak = user.downgrade();
        assert!(weak.upgrade().is_some());
        drop(user);
        assert!(weak.upgrade().is_none());
    }
}
