use super::AttributeValue;
use std::any::Any;

/// Attribute access for entities backed by a user-defined struct instead of
/// an attribute map.
///
/// Relation fields are stored as [`AttributeValue`]s so the engine can put
/// lazy proxies and hydrated entities into them.
pub trait ObjectAttributes: 'static {
    fn get_attribute(&self, name: &str) -> Option<AttributeValue>;

    fn set_attribute(&mut self, name: &str, value: AttributeValue);

    /// Names of the attributes currently set on the object.
    fn attribute_names(&self) -> Vec<String>;

    fn unset_attribute(&mut self, name: &str) {
        self.set_attribute(name, AttributeValue::null());
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Builds an empty object for hydration.
pub type ObjectFactory = std::rc::Rc<dyn Fn() -> Box<dyn ObjectAttributes>>;
