//! Synchronous resource-change notifications.
//!
//! Subscribers implement [`Notifee`] and are called inline, on the thread
//! that performed the change, while the container lock is held. The lock is
//! reentrant, so a callback may call back into the container.

use std::fmt;
use std::sync::Arc;

use crate::component::ComponentId;
use crate::error::{ConfigError, Result};
use crate::resource::{FromResource, ResourceValue};
use crate::tree::NodeId;

/// What happened to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ResourceEvent {
    Created,
    Modified,
    DeclaredNull,
    Deleted,
}

/// Receiver of resource-change callbacks.
pub trait Notifee: Send + Sync + 'static {
    fn resource_changed(&self, notification: &Notification<'_>);
}

/// One resource change, as seen from inside a callback.
pub struct Notification<'a> {
    name: &'a str,
    owner: ComponentId,
    event: ResourceEvent,
    value: Option<&'a ResourceValue>,
}

impl<'a> Notification<'a> {
    pub(crate) fn new(
        name: &'a str,
        owner: ComponentId,
        event: ResourceEvent,
        value: Option<&'a ResourceValue>,
    ) -> Self {
        Self {
            name,
            owner,
            event,
            value,
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn owner(&self) -> ComponentId {
        self.owner
    }

    pub fn event(&self) -> ResourceEvent {
        self.event
    }

    /// The typed value the notification carries.
    ///
    /// Returns `Ok(None)` for a declared-null resource. Fails when the
    /// notification reports a deletion (there is no value to fetch) or when
    /// the value does not carry `T`.
    pub fn fetch<T: FromResource>(&self) -> Result<Option<T>> {
        match self.value {
            Some(value) if T::matches(value) => Ok(T::extract(value)),
            _ => Err(ConfigError::CannotFetchOutsideNotification),
        }
    }
}

impl fmt::Debug for Notification<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notification")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("event", &self.event)
            .field("value", &self.value)
            .finish()
    }
}

/// Identity of a subscriber. External notifees compare by `Arc` identity,
/// component notifees by component id.
#[derive(Clone)]
pub(crate) enum NotifeeRef {
    External(Arc<dyn Notifee>),
    Component(ComponentId),
}

impl NotifeeRef {
    pub fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (NotifeeRef::External(a), NotifeeRef::External(b)) => Arc::ptr_eq(a, b),
            (NotifeeRef::Component(a), NotifeeRef::Component(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for NotifeeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifeeRef::External(_) => write!(f, "External(..)"),
            NotifeeRef::Component(id) => write!(f, "Component({id:?})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubscriptionAction {
    Subscribe,
    Unsubscribe,
}

/// A subscribe/unsubscribe request, possibly deferred until the outermost
/// build in progress completes.
#[derive(Debug, Clone)]
pub(crate) struct SubscriptionRequest {
    pub notifee: NotifeeRef,
    pub name: String,
    /// `None` means "resolve the owner by tree distance from `requester`
    /// when the request is applied".
    pub owner: Option<ComponentId>,
    pub requester: NodeId,
    pub action: SubscriptionAction,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Test notifee that logs every callback it receives.
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub log: Mutex<Vec<(String, ResourceEvent)>>,
    }

    impl Recorder {
        pub fn events(&self) -> Vec<(String, ResourceEvent)> {
            self.log.lock().clone()
        }
    }

    impl Notifee for Recorder {
        fn resource_changed(&self, notification: &Notification<'_>) {
            self.log
                .lock()
                .push((notification.name().to_owned(), notification.event()));
        }
    }

    pub(crate) fn recorder() -> (NotifeeRef, Arc<Recorder>) {
        let rec = Arc::new(Recorder::default());
        (NotifeeRef::External(rec.clone()), rec)
    }

    #[test]
    fn test_fetch_typed_value() {
        let value = ResourceValue::Int(42);
        let n = Notification::new("r", ComponentId::from_raw(1), ResourceEvent::Created, Some(&value));
        assert_eq!(n.fetch::<i32>().unwrap(), Some(42));
        assert_eq!(
            n.fetch::<bool>(),
            Err(ConfigError::CannotFetchOutsideNotification)
        );
    }

    #[test]
    fn test_fetch_null_value() {
        let value = ResourceValue::DeclaredNull;
        let n = Notification::new(
            "r",
            ComponentId::from_raw(1),
            ResourceEvent::DeclaredNull,
            Some(&value),
        );
        assert_eq!(n.fetch::<i32>().unwrap(), None);
        assert_eq!(n.fetch::<f64>().unwrap(), None);
    }

    #[test]
    fn test_fetch_on_deletion_fails() {
        let n = Notification::new("r", ComponentId::from_raw(1), ResourceEvent::Deleted, None);
        assert_eq!(
            n.fetch::<i32>(),
            Err(ConfigError::CannotFetchOutsideNotification)
        );
    }

    #[test]
    fn test_notifee_identity() {
        let (a, _) = recorder();
        let (b, _) = recorder();
        assert!(a.same(&a.clone()));
        assert!(!a.same(&b));
        let ca = NotifeeRef::Component(ComponentId::from_raw(1));
        let cb = NotifeeRef::Component(ComponentId::from_raw(2));
        assert!(ca.same(&ca.clone()));
        assert!(!ca.same(&cb));
        assert!(!ca.same(&a));
    }
}
