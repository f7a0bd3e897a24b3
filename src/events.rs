use crate::entity::Entity;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::{Level, event};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LifecycleEvent {
    Storing,
    Stored,
    Creating,
    Created,
    Updating,
    Updated,
    Deleting,
    Deleted,
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Storing => "storing",
            Self::Stored => "stored",
            Self::Creating => "creating",
            Self::Created => "created",
            Self::Updating => "updating",
            Self::Updated => "updated",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Hook dispatcher consulted by the store and delete commands.
pub trait EventDispatcher {
    /// Runs the handlers for `event`. With `halt`, a handler returning
    /// `false` stops dispatch and vetoes the operation; the return value is
    /// `false` exactly then.
    fn fire(&self, event: LifecycleEvent, entity: &Entity, halt: bool) -> bool;
}

pub type Listener = Rc<dyn Fn(&Entity) -> bool>;

struct Registration {
    event: LifecycleEvent,
    type_name: Option<String>,
    listener: Listener,
}

/// Default dispatcher: listeners per event, optionally per entity type.
#[derive(Default)]
pub struct Events {
    listeners: RefCell<Vec<Registration>>,
}

impl Events {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for `event`, for every type when `type_name` is `None`.
    pub fn listen<F>(&self, event: LifecycleEvent, type_name: Option<&str>, listener: F)
    where
        F: Fn(&Entity) -> bool + 'static,
    {
        self.listeners.borrow_mut().push(Registration {
            event,
            type_name: type_name.map(str::to_string),
            listener: Rc::new(listener),
        });
    }

    pub fn forget(&self, event: LifecycleEvent) {
        self.listeners.borrow_mut().retain(|r| r.event != event);
    }

    pub fn has_listeners(&self, event: LifecycleEvent) -> bool {
        self.listeners.borrow().iter().any(|r| r.event == event)
    }
}

impl EventDispatcher for Events {
    fn fire(&self, lifecycle: LifecycleEvent, entity: &Entity, halt: bool) -> bool {
        // Listeners may register more listeners or store other entities.
        let listeners: Vec<Listener> = self
            .listeners
            .borrow()
            .iter()
            .filter(|r| r.event == lifecycle)
            .filter(|r| r.type_name.as_deref().is_none_or(|t| t == entity.type_name()))
            .map(|r| r.listener.clone())
            .collect();

        for listener in listeners {
            if !listener(entity) && halt {
                event!(
                    Level::DEBUG,
                    event = %lifecycle,
                    entity_type = %entity.type_name(),
                    "operation vetoed by listener"
                );
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_veto_only_when_halting() {
        let events = Events::new();
        events.listen(LifecycleEvent::Creating, None, |_| false);
        let user = Entity::new("User");

        assert!(!events.fire(LifecycleEvent::Creating, &user, true));
        assert!(events.fire(LifecycleEvent::Creating, &user, false));
        assert!(events.fire(LifecycleEvent::Updating, &user, true));
    }

    #[test]
    fn test_type_filter() {
        let events = Events::new();
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        events.listen(LifecycleEvent::Stored, Some("Post"), move |_| {
            counter.set(counter.get() + 1);
            true
        });

        events.fire(LifecycleEvent::Stored, &Entity::new("User"), false);
        events.fire(LifecycleEvent::Stored, &Entity::new("Post"), false);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_listeners_can_mutate_entity() {
        let events = Events::new();
        events.listen(LifecycleEvent::Storing, None, |entity| {
            entity.set("slug", "generated");
            true
        });
        let post = Entity::new("Post");
        events.fire(LifecycleEvent::Storing, &post, true);
        assert_eq!(post.value("slug"), crate::core::Value::Text("generated".into()));
    }

    #[test]
    fn test_forget() {
        let events = Events::new();
        events.listen(LifecycleEvent::Deleting, None, |_| false);
        assert!(events.has_listeners(LifecycleEvent::Deleting));
        events.forget(LifecycleEvent::Deleting);
        assert!(events.fire(LifecycleEvent::Deleting, &Entity::new("User"), true));
    }
}
