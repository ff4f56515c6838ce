//! Container-level lifecycle observers.

use crate::component::ComponentId;

/// Callbacks fired when the container creates or destroys components.
///
/// Observers are held weakly; dropping the observer unregisters it.
pub trait ContainerObserver: Send + Sync + 'static {
    fn component_created(&self, _id: ComponentId, _type_name: &str) {}

    /// Fired just before the component entry is dropped; its resources have
    /// already been deleted.
    fn component_destroyed(&self, _id: ComponentId, _type_name: &str) {}
}
