//! Components and the context they are built with.
//!
//! A component is created by the container from a registered type, bound to
//! a group of the tree, and driven through its lifecycle:
//! `NotCreated → Creating → CreatedNotConfigured → Configuring →
//! CreatedAndConfigured` (types that configure in their constructor jump
//! straight from `Creating` to `CreatedAndConfigured`).

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::container::{ConfigContainer, SharedStore};
use crate::error::{ConfigError, Result};
use crate::notify::Notifee;
use crate::resource::{FromResource, ResourceValue};
use crate::tree::NodeId;

/// Identity of one component instance. Never reused within a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(u64);

impl ComponentId {
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "component#{}", self.0)
    }
}

/// Where a group's component stands in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
pub enum ComponentStatus {
    #[default]
    NotCreated,
    Creating,
    CreatedNotConfigured,
    Configuring,
    CreatedAndConfigured,
}

/// An object managed by the container.
///
/// Implementations hold the [`ComponentContext`] they were created with and
/// return it from [`context`](Component::context).
pub trait Component: Send + Sync + 'static {
    fn context(&self) -> &ComponentContext;

    /// Upcast used by the container to recover the concrete type.
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// The notifee identity of this component, for types that subscribe to
    /// resource changes. The default opts out.
    fn as_notifee(self: Arc<Self>) -> Option<Arc<dyn Notifee>> {
        None
    }

    /// Second lifecycle phase for types that do not configure in their
    /// constructor.
    fn configure(&self) -> Result<()> {
        Ok(())
    }

    /// Hook run once, in creation order, when the outermost build completes.
    fn post_configure_init(&self) -> Result<()> {
        Ok(())
    }
}

/// Handle a component uses to reach its group and the container it lives in.
///
/// Holds the container weakly, so a component kept alive outside the
/// container does not keep the container alive in turn.
#[derive(Clone)]
pub struct ComponentContext {
    container: Weak<SharedStore>,
    node: NodeId,
    id: ComponentId,
    type_name: String,
}

impl ComponentContext {
    pub(crate) fn new(
        container: Weak<SharedStore>,
        node: NodeId,
        id: ComponentId,
        type_name: String,
    ) -> Self {
        Self {
            container,
            node,
            id,
            type_name,
        }
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The container this component belongs to.
    pub fn container(&self) -> Result<ConfigContainer> {
        self.container
            .upgrade()
            .map(ConfigContainer::from_shared)
            .ok_or(ConfigError::ContainerGone)
    }

    /// Path of the component's group, relative to the root group.
    pub fn group_path(&self) -> Result<String> {
        self.container()?.node_path(self.node)
    }

    /// A parameter of the component's own group.
    pub fn parameter(&self, name: &str) -> Result<String> {
        self.container()?.parameter_at(self.node, name, false)
    }

    /// A parameter of the component's group or, failing that, of the nearest
    /// ancestor group that has it.
    pub fn parameter_also_match_parents(&self, name: &str) -> Result<String> {
        self.container()?.parameter_at(self.node, name, true)
    }

    /// Publish a resource owned by this component.
    pub fn declare_resource<V: Into<ResourceValue>>(&self, name: &str, value: V) -> Result<()> {
        self.container()?
            .declare_resource_for(self.id, name, value.into())
    }

    /// Publish the resource as existing but valueless.
    pub fn declare_resource_as_null(&self, name: &str) -> Result<()> {
        self.container()?
            .declare_resource_for(self.id, name, ResourceValue::DeclaredNull)
    }

    pub fn delete_resource(&self, name: &str) -> Result<()> {
        self.container()?.delete_resource_for(self.id, name)
    }

    /// Delete every resource this component currently declares.
    pub fn delete_all_resources(&self) -> Result<()> {
        self.container()?.delete_all_resources_for(self.id)
    }

    /// Every type-compatible declaration of `name` with its owner.
    pub fn all_resources<T: FromResource>(
        &self,
        name: &str,
    ) -> Result<Vec<(ComponentId, Option<T>)>> {
        self.container()?.resources_with_name::<T>(name)
    }

    /// Fetch a resource by name, disambiguating multiple owners by tree
    /// distance from this component's group.
    pub fn resource<T: FromResource>(&self, name: &str) -> Result<Option<T>> {
        self.container()?.resource_from::<T>(self.node, name)
    }

    /// Fetch a resource published by a specific owner.
    pub fn resource_with_owner<T: FromResource>(
        &self,
        name: &str,
        owner: ComponentId,
    ) -> Result<Option<T>> {
        self.container()?.resource_of::<T>(owner, name)
    }

    /// Owners currently declaring `name`.
    pub fn resource_owners(&self, name: &str) -> Result<Vec<ComponentId>> {
        self.container()?.resource_owners(name)
    }

    /// Subscribe this component to changes of `name`, owner resolved by tree
    /// distance. During a build the request is queued and applied when the
    /// outermost build completes.
    pub fn add_notified_resource(&self, name: &str) -> Result<()> {
        self.container()?
            .subscribe_component(self.id, self.node, name, None)
    }

    pub fn add_notified_resource_with_owner(&self, name: &str, owner: ComponentId) -> Result<()> {
        self.container()?
            .subscribe_component(self.id, self.node, name, Some(owner))
    }

    pub fn remove_notified_resource(&self, name: &str) -> Result<()> {
        self.container()?
            .unsubscribe_component(self.id, self.node, name, None)
    }

    pub fn remove_notified_resource_with_owner(
        &self,
        name: &str,
        owner: ComponentId,
    ) -> Result<()> {
        self.container()?
            .unsubscribe_component(self.id, self.node, name, Some(owner))
    }

    /// Build (or fetch) the component of a group named relative to this
    /// component's group. Used to assemble sub-components during
    /// configuration.
    pub fn build_child<T: Component>(&self, relative_path: &str) -> Result<Arc<T>> {
        self.container()?.build_component_at(self.node, relative_path)
    }
}

impl fmt::Debug for ComponentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentContext")
            .field("node", &self.node)
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .finish()
    }
}
