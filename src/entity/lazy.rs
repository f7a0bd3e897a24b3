use super::{AttributeValue, Entity};
use crate::core::{OrmError, Result, Value};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Deferred loader for a relation value.
pub type Loader = Rc<dyn Fn() -> Result<AttributeValue>>;

enum LazyState {
    Unresolved(Loader),
    Loading,
    Resolved(AttributeValue),
}

struct LazyInner {
    many: bool,
    state: RefCell<LazyState>,
    added: RefCell<Vec<Entity>>,
}

/// Placeholder for a relation that has not been fetched yet.
///
/// Cloning shares the underlying state, so every holder observes the same
/// `Unresolved -> Loading -> Resolved` transition. Entities pushed onto an
/// unloaded collection are kept aside and folded into the collection when it
/// loads.
#[derive(Clone)]
pub struct Lazy(Rc<LazyInner>);

impl Lazy {
    fn with_state(many: bool, state: LazyState) -> Self {
        Self(Rc::new(LazyInner {
            many,
            state: RefCell::new(state),
            added: RefCell::new(Vec::new()),
        }))
    }

    /// Proxy for a single related entity (or null).
    pub fn single(loader: Loader) -> Self {
        Self::with_state(false, LazyState::Unresolved(loader))
    }

    /// Proxy for a collection of related entities.
    pub fn many(loader: Loader) -> Self {
        Self::with_state(true, LazyState::Unresolved(loader))
    }

    pub fn is_many(&self) -> bool {
        self.0.many
    }

    pub fn is_loaded(&self) -> bool {
        matches!(&*self.0.state.borrow(), LazyState::Resolved(_))
    }

    pub fn ptr_eq(&self, other: &Lazy) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Resolves the proxy, running the loader on first use only.
    pub fn load(&self) -> Result<AttributeValue> {
        let loader = {
            let mut state = self.0.state.borrow_mut();
            match &*state {
                LazyState::Resolved(value) => return Ok(value.clone()),
                LazyState::Loading => {
                    return Err(OrmError::mapping(
                        "lazy relation dereferenced while it was being loaded",
                    ));
                }
                LazyState::Unresolved(loader) => {
                    let loader = loader.clone();
                    *state = LazyState::Loading;
                    loader
                }
            }
        };

        let value = match loader() {
            Ok(value) => value,
            Err(err) => {
                *self.0.state.borrow_mut() = LazyState::Unresolved(loader);
                return Err(err);
            }
        };

        let value = self.fold_added(value)?;
        *self.0.state.borrow_mut() = LazyState::Resolved(value.clone());
        Ok(value)
    }

    fn fold_added(&self, value: AttributeValue) -> Result<AttributeValue> {
        let added: Vec<Entity> = self.0.added.borrow_mut().drain(..).collect();
        if !self.0.many {
            return match value {
                AttributeValue::Collection(_) => Err(OrmError::mapping(
                    "expected an object, found a collection",
                )),
                other => Ok(other),
            };
        }
        let mut items = match value {
            AttributeValue::Collection(items) => items,
            AttributeValue::Scalar(Value::Null) => Vec::new(),
            _ => {
                return Err(OrmError::mapping(
                    "expected a collection, found an object",
                ));
            }
        };
        for entity in added {
            if !items.iter().any(|e| e.ptr_eq(&entity)) {
                items.push(entity);
            }
        }
        Ok(AttributeValue::Collection(items))
    }

    /// Appends to the collection without forcing a load.
    pub fn add(&self, entity: Entity) {
        let mut state = self.0.state.borrow_mut();
        if let LazyState::Resolved(AttributeValue::Collection(items)) = &mut *state {
            if !items.iter().any(|e| e.ptr_eq(&entity)) {
                items.push(entity);
            }
            return;
        }
        drop(state);
        self.0.added.borrow_mut().push(entity);
    }

    pub fn added_items(&self) -> Vec<Entity> {
        self.0.added.borrow().clone()
    }

    pub fn has_added_items(&self) -> bool {
        !self.0.added.borrow().is_empty()
    }

    /// The resolved value, without triggering a load.
    pub fn loaded_value(&self) -> Option<AttributeValue> {
        match &*self.0.state.borrow() {
            LazyState::Resolved(value) => Some(value.clone()),
            _ => None,
        }
    }
}

impl fmt::Debug for Lazy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.0.state.borrow() {
            LazyState::Unresolved(_) => "unresolved",
            LazyState::Loading => "loading",
            LazyState::Resolved(_) => "resolved",
        };
        f.debug_struct("Lazy")
            .field("many", &self.0.many)
            .field("state", &state)
            .field("added", &self.0.added.borrow().len())
            .finish()
    }
}
