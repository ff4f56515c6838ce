//! The registry of component types.
//!
//! Types form a name-keyed hierarchy rooted at the built-in `Component`
//! type. A type is registered with the list of its parents, whether it can
//! be instantiated, and its configuration strategy (in the constructor or as
//! a separate step after creation).

use std::collections::HashMap;
use std::sync::Arc;

use crate::component::{Component, ComponentContext};
use crate::error::{ConfigError, Result};

/// Name of the implicit root of the component hierarchy.
pub const ROOT_TYPE: &str = "Component";

/// Factory invoked to instantiate a registered concrete type.
pub type CreatorFn = dyn Fn(ComponentContext) -> Result<Arc<dyn Component>> + Send + Sync;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    pub name: String,
    pub parents: Vec<String>,
    pub can_be_created: bool,
    pub is_interface: bool,
    pub configures_in_constructor: bool,
}

struct TypeEntry {
    info: TypeInfo,
    creator: Option<Arc<CreatorFn>>,
}

pub(crate) struct TypeRegistry {
    types: HashMap<String, TypeEntry>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        let mut types = HashMap::new();
        types.insert(
            ROOT_TYPE.to_owned(),
            TypeEntry {
                info: TypeInfo {
                    name: ROOT_TYPE.to_owned(),
                    parents: Vec::new(),
                    can_be_created: false,
                    is_interface: false,
                    configures_in_constructor: true,
                },
                creator: None,
            },
        );
        Self { types }
    }

    pub fn register(&mut self, info: TypeInfo, creator: Option<Arc<CreatorFn>>) -> Result<()> {
        if info.name == ROOT_TYPE {
            return Err(ConfigError::CannotReRegisterType {
                type_name: info.name,
                reason: "the root component type is built in",
            });
        }
        if let Some(existing) = self.types.get(&info.name) {
            if existing.info != info {
                return Err(ConfigError::CannotReRegisterType {
                    type_name: info.name,
                    reason: "declaration differs from the previous registration",
                });
            }
            // Identical re-registration only refreshes the creator
        }
        for parent in &info.parents {
            if !self.types.contains_key(parent) {
                return Err(ConfigError::AncestorNotRegistered {
                    type_name: info.name.clone(),
                    ancestor: parent.clone(),
                });
            }
        }
        if !info.is_interface && !info.parents.iter().any(|p| self.is_component_type(p)) {
            return Err(ConfigError::ComponentHasNoParentComponent(info.name));
        }
        if info.configures_in_constructor {
            // A type cannot configure in its constructor when an ancestor
            // component already committed to configuring afterwards
            for parent in &info.parents {
                if let Some(ancestor) = self.separate_step_ancestor(parent) {
                    return Err(ConfigError::IncompatibleConfigurationStrategy {
                        type_name: info.name,
                        ancestor,
                    });
                }
            }
        }
        self.types
            .insert(info.name.clone(), TypeEntry { info, creator });
        Ok(())
    }

    pub fn info(&self, name: &str) -> Result<&TypeInfo> {
        self.types
            .get(name)
            .map(|e| &e.info)
            .ok_or_else(|| ConfigError::TypeNotRegistered(name.to_owned()))
    }

    pub fn creator(&self, name: &str) -> Result<Arc<CreatorFn>> {
        let entry = self
            .types
            .get(name)
            .ok_or_else(|| ConfigError::TypeNotRegistered(name.to_owned()))?;
        if !entry.info.can_be_created {
            return Err(ConfigError::TypeIsAbstract(name.to_owned()));
        }
        entry
            .creator
            .clone()
            .ok_or_else(|| ConfigError::TypeIsAbstract(name.to_owned()))
    }

    /// Whether `name` is `ancestor` or transitively descends from it.
    pub fn is_subtype(&self, name: &str, ancestor: &str) -> bool {
        if name == ancestor {
            return true;
        }
        match self.types.get(name) {
            Some(entry) => entry
                .info
                .parents
                .iter()
                .any(|p| self.is_subtype(p, ancestor)),
            None => false,
        }
    }

    fn is_component_type(&self, name: &str) -> bool {
        !self.info(name).map(|i| i.is_interface).unwrap_or(true) && self.is_subtype(name, ROOT_TYPE)
    }

    /// Nearest component ancestor (including `name` itself) that configures
    /// in a separate step, if any.
    fn separate_step_ancestor(&self, name: &str) -> Option<String> {
        let entry = self.types.get(name)?;
        if entry.info.is_interface {
            return None;
        }
        if !entry.info.configures_in_constructor {
            return Some(entry.info.name.clone());
        }
        entry
            .info
            .parents
            .iter()
            .find_map(|p| self.separate_step_ancestor(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, parents: &[&str]) -> TypeInfo {
        TypeInfo {
            name: name.to_owned(),
            parents: parents.iter().map(|p| (*p).to_owned()).collect(),
            can_be_created: true,
            is_interface: false,
            configures_in_constructor: true,
        }
    }

    #[test]
    fn test_register_and_subtype() {
        let mut reg = TypeRegistry::new();
        reg.register(info("A", &[ROOT_TYPE]), None).unwrap();
        reg.register(info("B", &["A"]), None).unwrap();
        assert!(reg.is_subtype("B", "A"));
        assert!(reg.is_subtype("B", ROOT_TYPE));
        assert!(!reg.is_subtype("A", "B"));
    }

    #[test]
    fn test_unregistered_ancestor() {
        let mut reg = TypeRegistry::new();
        assert!(matches!(
            reg.register(info("A", &["Missing"]), None),
            Err(ConfigError::AncestorNotRegistered { .. })
        ));
    }

    #[test]
    fn test_no_component_parent() {
        let mut reg = TypeRegistry::new();
        let mut iface = info("Iface", &[]);
        iface.is_interface = true;
        iface.can_be_created = false;
        reg.register(iface, None).unwrap();
        assert_eq!(
            reg.register(info("A", &["Iface"]), None),
            Err(ConfigError::ComponentHasNoParentComponent("A".to_owned()))
        );
        reg.register(info("B", &[ROOT_TYPE, "Iface"]), None).unwrap();
        assert!(reg.is_subtype("B", "Iface"));
    }

    #[test]
    fn test_incompatible_strategy() {
        let mut reg = TypeRegistry::new();
        let mut base = info("Base", &[ROOT_TYPE]);
        base.configures_in_constructor = false;
        reg.register(base, None).unwrap();
        assert!(matches!(
            reg.register(info("Derived", &["Base"]), None),
            Err(ConfigError::IncompatibleConfigurationStrategy { .. })
        ));
        let mut derived = info("Derived", &["Base"]);
        derived.configures_in_constructor = false;
        reg.register(derived, None).unwrap();
    }

    #[test]
    fn test_reregistration() {
        let mut reg = TypeRegistry::new();
        reg.register(info("A", &[ROOT_TYPE]), None).unwrap();
        // Identical declaration is accepted
        reg.register(info("A", &[ROOT_TYPE]), None).unwrap();
        let mut changed = info("A", &[ROOT_TYPE]);
        changed.can_be_created = false;
        assert!(matches!(
            reg.register(changed, None),
            Err(ConfigError::CannotReRegisterType { .. })
        ));
        assert!(matches!(
            reg.register(info(ROOT_TYPE, &[]), None),
            Err(ConfigError::CannotReRegisterType { .. })
        ));
    }

    #[test]
    fn test_creator_lookup() {
        let mut reg = TypeRegistry::new();
        let mut abstract_info = info("A", &[ROOT_TYPE]);
        abstract_info.can_be_created = false;
        reg.register(abstract_info, None).unwrap();
        assert_eq!(
            reg.creator("A").err(),
            Some(ConfigError::TypeIsAbstract("A".to_owned()))
        );
        assert_eq!(
            reg.creator("Nope").err(),
            Some(ConfigError::TypeNotRegistered("Nope".to_owned()))
        );
    }
}
