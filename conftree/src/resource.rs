//! Resource values and the name → owner registry.
//!
//! A resource is a named value published by a component (or by the container
//! itself). The registry keeps, for every name, one handler per owner; a
//! handler may be created before the owner declares anything, to hold early
//! subscribers, but deleting a declared resource destroys the handler along
//! with its subscriber set.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::component::ComponentId;
use crate::error::{ConfigError, Result};
use crate::notify::{NotifeeRef, ResourceEvent};

/// Shareable payload published as a resource.
pub trait GenericResource: Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
}

/// Payload that carries its own change-notification machinery.
pub trait ObservableObject: Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
}

/// The value carried by a declared resource.
#[derive(Clone)]
pub enum ResourceValue {
    /// Declared but intentionally valueless. The resource exists; typed
    /// fetches yield `None`.
    DeclaredNull,
    Int(i32),
    Float(f32),
    Double(f64),
    Bool(bool),
    Resource(Arc<dyn GenericResource>),
    Observable(Arc<dyn ObservableObject>),
    Component(ComponentId),
}

impl ResourceValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ResourceValue::DeclaredNull)
    }
}

impl fmt::Debug for ResourceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceValue::DeclaredNull => write!(f, "DeclaredNull"),
            ResourceValue::Int(v) => write!(f, "Int({v})"),
            ResourceValue::Float(v) => write!(f, "Float({v})"),
            ResourceValue::Double(v) => write!(f, "Double({v})"),
            ResourceValue::Bool(v) => write!(f, "Bool({v})"),
            ResourceValue::Resource(_) => write!(f, "Resource(..)"),
            ResourceValue::Observable(_) => write!(f, "Observable(..)"),
            ResourceValue::Component(id) => write!(f, "Component({id:?})"),
        }
    }
}

impl PartialEq for ResourceValue {
    fn eq(&self, other: &Self) -> bool {
        use ResourceValue::*;
        match (self, other) {
            (DeclaredNull, DeclaredNull) => true,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Double(a), Double(b)) => a == b,
            (Bool(a), Bool(b)) => a == b,
            (Resource(a), Resource(b)) => Arc::ptr_eq(a, b),
            (Observable(a), Observable(b)) => Arc::ptr_eq(a, b),
            (Component(a), Component(b)) => a == b,
            _ => false,
        }
    }
}

macro_rules! impl_into_resource {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for ResourceValue {
            fn from(v: $ty) -> Self {
                ResourceValue::$variant(v)
            }
        }
    };
}

impl_into_resource!(i32, Int);
impl_into_resource!(f32, Float);
impl_into_resource!(f64, Double);
impl_into_resource!(bool, Bool);
impl_into_resource!(Arc<dyn GenericResource>, Resource);
impl_into_resource!(Arc<dyn ObservableObject>, Observable);
impl_into_resource!(ComponentId, Component);

/// Conversion out of a [`ResourceValue`] for typed lookups.
///
/// Every implementation treats [`ResourceValue::DeclaredNull`] as compatible
/// but extracts it as `None`.
pub trait FromResource: Sized {
    /// Whether the value could carry this type.
    fn matches(value: &ResourceValue) -> bool;

    /// Extract the typed value; `None` for a declared-null resource.
    fn extract(value: &ResourceValue) -> Option<Self>;
}

macro_rules! impl_from_resource {
    ($ty:ty, $variant:ident) => {
        impl FromResource for $ty {
            fn matches(value: &ResourceValue) -> bool {
                matches!(value, ResourceValue::$variant(_) | ResourceValue::DeclaredNull)
            }

            fn extract(value: &ResourceValue) -> Option<Self> {
                match value {
                    ResourceValue::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }
    };
}

impl_from_resource!(i32, Int);
impl_from_resource!(f32, Float);
impl_from_resource!(f64, Double);
impl_from_resource!(bool, Bool);
impl_from_resource!(Arc<dyn GenericResource>, Resource);
impl_from_resource!(Arc<dyn ObservableObject>, Observable);
impl_from_resource!(ComponentId, Component);

/// Change queued while the registry lock-side state is borrowed; delivered
/// to the notifee once the borrow is released.
#[derive(Debug, Clone)]
pub(crate) struct PendingNotice {
    pub notifee: NotifeeRef,
    pub name: String,
    pub owner: ComponentId,
    pub event: ResourceEvent,
    pub value: Option<ResourceValue>,
}

#[derive(Debug, Default)]
struct ResourceHandler {
    /// `None` until the owner declares the resource; a handler can exist
    /// beforehand to hold subscribers.
    value: Option<ResourceValue>,
    subscribers: Vec<NotifeeRef>,
}

impl ResourceHandler {
    fn is_empty(&self) -> bool {
        self.value.is_none() && self.subscribers.is_empty()
    }

    fn notices_for_all(
        &self,
        name: &str,
        owner: ComponentId,
        event: ResourceEvent,
        value: Option<&ResourceValue>,
    ) -> Vec<PendingNotice> {
        self.subscribers
            .iter()
            .map(|notifee| PendingNotice {
                notifee: notifee.clone(),
                name: name.to_owned(),
                owner,
                event,
                value: value.cloned(),
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub(crate) struct ResourceRegistry {
    by_name: HashMap<String, BTreeMap<ComponentId, ResourceHandler>>,
}

impl ResourceRegistry {
    /// Declare or re-declare a resource. Returns the notices to deliver.
    pub fn declare(
        &mut self,
        owner: ComponentId,
        name: &str,
        value: ResourceValue,
    ) -> Vec<PendingNotice> {
        let handler = self
            .by_name
            .entry(name.to_owned())
            .or_default()
            .entry(owner)
            .or_default();
        let event = if value.is_null() {
            ResourceEvent::DeclaredNull
        } else if handler.value.is_some() {
            ResourceEvent::Modified
        } else {
            ResourceEvent::Created
        };
        handler.value = Some(value);
        let value_ref = handler.value.clone();
        handler.notices_for_all(name, owner, event, value_ref.as_ref())
    }

    /// Delete a declared resource. Every subscriber receives one final
    /// deletion notice, then the handler is destroyed together with its
    /// subscriber set.
    pub fn delete(&mut self, owner: ComponentId, name: &str) -> Result<Vec<PendingNotice>> {
        let handlers = self
            .by_name
            .get_mut(name)
            .ok_or_else(|| ConfigError::ResourceNotDeclared(name.to_owned()))?;
        let handler = match handlers.get(&owner) {
            Some(handler) if handler.value.is_some() => handlers.remove(&owner),
            _ => None,
        }
        .ok_or_else(|| ConfigError::ResourceNotDeclared(name.to_owned()))?;
        let notices = handler.notices_for_all(name, owner, ResourceEvent::Deleted, None);
        if handlers.is_empty() {
            self.by_name.remove(name);
        }
        Ok(notices)
    }

    /// Register a subscriber on a (name, owner) pair, creating the handler if
    /// the resource has not been declared yet. If the resource already
    /// exists the returned notice replays its current state to the new
    /// subscriber only. Subscribing twice is a no-op.
    pub fn subscribe(
        &mut self,
        owner: ComponentId,
        name: &str,
        notifee: NotifeeRef,
    ) -> Vec<PendingNotice> {
        let handler = self
            .by_name
            .entry(name.to_owned())
            .or_default()
            .entry(owner)
            .or_default();
        if handler.subscribers.iter().any(|n| n.same(&notifee)) {
            return Vec::new();
        }
        handler.subscribers.push(notifee.clone());
        // An existing resource replays as a creation, declared-null included
        match &handler.value {
            Some(value) => vec![PendingNotice {
                notifee,
                name: name.to_owned(),
                owner,
                event: ResourceEvent::Created,
                value: Some(value.clone()),
            }],
            None => Vec::new(),
        }
    }

    /// Drop a subscriber from a (name, owner) pair. The removed subscriber
    /// receives one final deletion notice; removing an absent subscription
    /// is a no-op.
    pub fn unsubscribe(
        &mut self,
        owner: ComponentId,
        name: &str,
        notifee: &NotifeeRef,
    ) -> Vec<PendingNotice> {
        let handlers = match self.by_name.get_mut(name) {
            Some(handlers) => handlers,
            None => return Vec::new(),
        };
        let handler = match handlers.get_mut(&owner) {
            Some(handler) => handler,
            None => return Vec::new(),
        };
        let before = handler.subscribers.len();
        handler.subscribers.retain(|n| !n.same(notifee));
        if handler.subscribers.len() == before {
            return Vec::new();
        }
        // The farewell notice only makes sense for a resource that exists
        let notices = if handler.value.is_some() {
            vec![PendingNotice {
                notifee: notifee.clone(),
                name: name.to_owned(),
                owner,
                event: ResourceEvent::Deleted,
                value: None,
            }]
        } else {
            Vec::new()
        };
        if handler.is_empty() {
            handlers.remove(&owner);
        }
        if handlers.is_empty() {
            self.by_name.remove(name);
        }
        notices
    }

    /// Remove a subscriber from every handler it appears in. Used when the
    /// subscriber itself goes away; no notices are produced.
    pub fn remove_subscriber(&mut self, notifee: &NotifeeRef) {
        self.by_name.retain(|_, handlers| {
            handlers.retain(|_, handler| {
                handler.subscribers.retain(|n| !n.same(notifee));
                !handler.is_empty()
            });
            !handlers.is_empty()
        });
    }

    /// Current value of a (name, owner) pair, if declared.
    pub fn value(&self, owner: ComponentId, name: &str) -> Option<&ResourceValue> {
        self.by_name
            .get(name)?
            .get(&owner)?
            .value
            .as_ref()
    }

    pub fn exists(&self, owner: ComponentId, name: &str) -> bool {
        self.value(owner, name).is_some()
    }

    /// Owners that currently declare `name`, with their values.
    pub fn candidates(&self, name: &str) -> Vec<(ComponentId, ResourceValue)> {
        match self.by_name.get(name) {
            Some(handlers) => handlers
                .iter()
                .filter_map(|(&owner, h)| h.value.clone().map(|v| (owner, v)))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Names of the resources currently declared by `owner`.
    pub fn owned_names(&self, owner: ComponentId) -> Vec<String> {
        let mut names: Vec<String> = self
            .by_name
            .iter()
            .filter(|(_, handlers)| {
                handlers.get(&owner).is_some_and(|h| h.value.is_some())
            })
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::tests::recorder;

    fn owner(n: u64) -> ComponentId {
        ComponentId::from_raw(n)
    }

    #[test]
    fn test_declare_then_modify_events() {
        let mut reg = ResourceRegistry::default();
        let (notifee, _log) = recorder();
        reg.subscribe(owner(1), "r", notifee);
        let notices = reg.declare(owner(1), "r", ResourceValue::Int(1));
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].event, ResourceEvent::Created);
        let notices = reg.declare(owner(1), "r", ResourceValue::Int(2));
        assert_eq!(notices[0].event, ResourceEvent::Modified);
        let notices = reg.declare(owner(1), "r", ResourceValue::DeclaredNull);
        assert_eq!(notices[0].event, ResourceEvent::DeclaredNull);
    }

    #[test]
    fn test_subscribe_replays_existing_value() {
        let mut reg = ResourceRegistry::default();
        reg.declare(owner(1), "r", ResourceValue::Bool(true));
        let (notifee, _log) = recorder();
        let notices = reg.subscribe(owner(1), "r", notifee);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].event, ResourceEvent::Created);
        assert_eq!(notices[0].value, Some(ResourceValue::Bool(true)));
    }

    #[test]
    fn test_subscribe_before_declaration_is_silent() {
        let mut reg = ResourceRegistry::default();
        let (notifee, _log) = recorder();
        assert!(reg.subscribe(owner(1), "r", notifee).is_empty());
        assert!(!reg.exists(owner(1), "r"));
        let notices = reg.declare(owner(1), "r", ResourceValue::Int(7));
        assert_eq!(notices.len(), 1);
    }

    #[test]
    fn test_duplicate_subscribe_notifies_once() {
        let mut reg = ResourceRegistry::default();
        let (notifee, _log) = recorder();
        reg.subscribe(owner(1), "r", notifee.clone());
        reg.subscribe(owner(1), "r", notifee);
        let notices = reg.declare(owner(1), "r", ResourceValue::Int(0));
        assert_eq!(notices.len(), 1);
    }

    #[test]
    fn test_delete_drops_subscribers_with_handler() {
        let mut reg = ResourceRegistry::default();
        let (notifee, _log) = recorder();
        reg.subscribe(owner(1), "r", notifee);
        reg.declare(owner(1), "r", ResourceValue::Int(5));
        let notices = reg.delete(owner(1), "r").unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].event, ResourceEvent::Deleted);
        assert!(notices[0].value.is_none());
        assert!(!reg.exists(owner(1), "r"));
        // The subscriber set went down with the handler; a re-declaration
        // starts from a clean slate
        assert!(reg.declare(owner(1), "r", ResourceValue::Int(6)).is_empty());
    }

    #[test]
    fn test_subscribe_to_null_resource_replays_created() {
        let mut reg = ResourceRegistry::default();
        reg.declare(owner(1), "n", ResourceValue::DeclaredNull);
        let (notifee, _log) = recorder();
        let notices = reg.subscribe(owner(1), "n", notifee);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].event, ResourceEvent::Created);
        assert_eq!(notices[0].value, Some(ResourceValue::DeclaredNull));
    }

    #[test]
    fn test_delete_undeclared_fails() {
        let mut reg = ResourceRegistry::default();
        assert!(matches!(
            reg.delete(owner(1), "r"),
            Err(ConfigError::ResourceNotDeclared(_))
        ));
        let (notifee, _log) = recorder();
        reg.subscribe(owner(1), "r", notifee);
        // A subscriber-only handler is not a declared resource
        assert!(reg.delete(owner(1), "r").is_err());
    }

    #[test]
    fn test_unsubscribe_sends_final_deletion() {
        let mut reg = ResourceRegistry::default();
        let (notifee, _log) = recorder();
        reg.subscribe(owner(1), "r", notifee.clone());
        reg.declare(owner(1), "r", ResourceValue::Int(3));
        let notices = reg.unsubscribe(owner(1), "r", &notifee);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].event, ResourceEvent::Deleted);
        // Further declarations are silent for the removed subscriber
        assert!(reg.declare(owner(1), "r", ResourceValue::Int(4)).is_empty());
    }

    #[test]
    fn test_candidates_per_owner() {
        let mut reg = ResourceRegistry::default();
        reg.declare(owner(1), "r", ResourceValue::Int(1));
        reg.declare(owner(2), "r", ResourceValue::Int(2));
        let candidates = reg.candidates("r");
        assert_eq!(candidates.len(), 2);
        assert_eq!(reg.value(owner(2), "r"), Some(&ResourceValue::Int(2)));
        assert_eq!(reg.owned_names(owner(1)), vec!["r".to_owned()]);
    }

    #[test]
    fn test_from_resource_null_matches_all() {
        assert!(i32::matches(&ResourceValue::DeclaredNull));
        assert!(bool::matches(&ResourceValue::DeclaredNull));
        assert_eq!(i32::extract(&ResourceValue::DeclaredNull), None);
        assert_eq!(i32::extract(&ResourceValue::Int(9)), Some(9));
        assert!(!i32::matches(&ResourceValue::Bool(false)));
    }
}
