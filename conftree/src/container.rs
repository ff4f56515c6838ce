//! The configuration container.
//!
//! One container holds a tree of groups and parameters, the registry of
//! component types, the components built from the tree, and the resources
//! those components exchange. Handles are cheap clones of a shared state
//! behind one reentrant lock, so resource callbacks and component creators
//! may call back into the container on the same thread.
//!
//! Mutations follow one discipline: state is changed while the inner cell is
//! borrowed, pending notices are collected, the borrow is released, and the
//! callbacks run with only the lock held. A callback that re-enters takes a
//! fresh borrow.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::ReentrantMutex;

use crate::component::{Component, ComponentContext, ComponentId, ComponentStatus};
use crate::error::{ConfigError, Result};
use crate::notify::{
    Notifee, NotifeeRef, Notification, SubscriptionAction, SubscriptionRequest,
};
use crate::observer::ContainerObserver;
use crate::path::{self, PARENT_GROUP};
use crate::registry::{CreatorFn, TypeInfo, TypeRegistry};
use crate::resource::{FromResource, PendingNotice, ResourceRegistry, ResourceValue};
use crate::tree::{ConfigTree, NodeId};

/// Owner id under which the container itself declares resources.
pub const CONTAINER_OWNER: ComponentId = ComponentId::from_raw(0);

/// Parameter naming the registered type a group is built from.
pub const TYPE_PARAMETER: &str = "type";

pub(crate) struct SharedStore {
    lock: ReentrantMutex<RefCell<Store>>,
}

struct ComponentEntry {
    component: Arc<dyn Component>,
    /// Cached notifee identity, `None` for types that opted out.
    notifee: Option<Arc<dyn Notifee>>,
    node: NodeId,
    type_name: String,
}

#[derive(Default)]
struct BuildState {
    /// Nesting depth of in-progress builds on the locking thread.
    recursion_level: usize,
    /// Components awaiting their configure step, tagged with the level that
    /// requested it. An entry runs when the level unwinds past its tag.
    to_configure: Vec<(ComponentId, usize)>,
    /// Components configured during the current outermost build, in order.
    /// Their `post_configure_init` runs when the build completes.
    configured_not_initialized: Vec<ComponentId>,
    /// Subscription changes requested during the build, replayed in request
    /// order when the outermost build completes.
    queued_requests: Vec<SubscriptionRequest>,
}

struct Store {
    tree: ConfigTree,
    resources: ResourceRegistry,
    types: TypeRegistry,
    components: BTreeMap<ComponentId, ComponentEntry>,
    next_component_id: u64,
    build: BuildState,
    observers: Vec<Weak<dyn ContainerObserver>>,
}

impl Store {
    fn new() -> Self {
        Self {
            tree: ConfigTree::new(),
            resources: ResourceRegistry::default(),
            types: TypeRegistry::new(),
            components: BTreeMap::new(),
            next_component_id: 1,
            build: BuildState::default(),
            observers: Vec::new(),
        }
    }
}

/// Handle to a shared configuration container. Clones refer to the same
/// container.
#[derive(Clone)]
pub struct ConfigContainer {
    shared: Arc<SharedStore>,
}

impl Default for ConfigContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConfigContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigContainer").finish_non_exhaustive()
    }
}

/// Components bound in the subtree under `node`, parents before children.
fn bound_components(tree: &ConfigTree, node: NodeId) -> Result<Vec<ComponentId>> {
    let mut out = Vec::new();
    let mut queue = vec![node];
    while let Some(cur) = queue.pop() {
        if let (Some(id), _) = tree.component_of(cur)? {
            out.push(id);
        }
        let mut children = tree.children_ids(cur)?;
        children.reverse();
        queue.extend(children);
    }
    Ok(out)
}

impl ConfigContainer {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SharedStore {
                lock: ReentrantMutex::new(RefCell::new(Store::new())),
            }),
        }
    }

    pub(crate) fn from_shared(shared: Arc<SharedStore>) -> Self {
        Self { shared }
    }

    fn with_store<R>(&self, f: impl FnOnce(&mut Store) -> Result<R>) -> Result<R> {
        let guard = self.shared.lock.lock();
        let result = f(&mut guard.borrow_mut());
        result
    }

    /// Run `f` under the lock, then deliver the notices it produced with the
    /// borrow released.
    fn with_store_notify<R>(
        &self,
        f: impl FnOnce(&mut Store) -> Result<(R, Vec<PendingNotice>)>,
    ) -> Result<R> {
        let guard = self.shared.lock.lock();
        let (result, notices) = f(&mut guard.borrow_mut())?;
        self.deliver(&guard, notices);
        Ok(result)
    }

    fn deliver(&self, cell: &RefCell<Store>, notices: Vec<PendingNotice>) {
        for notice in notices {
            let target: Option<Arc<dyn Notifee>> = match &notice.notifee {
                NotifeeRef::External(notifee) => Some(notifee.clone()),
                NotifeeRef::Component(id) => cell
                    .borrow()
                    .components
                    .get(id)
                    .and_then(|entry| entry.notifee.clone()),
            };
            if let Some(target) = target {
                let notification = Notification::new(
                    &notice.name,
                    notice.owner,
                    notice.event,
                    notice.value.as_ref(),
                );
                target.resource_changed(&notification);
            }
        }
    }

    fn observers_snapshot(&self, cell: &RefCell<Store>) -> Vec<Arc<dyn ContainerObserver>> {
        let mut store = cell.borrow_mut();
        store.observers.retain(|w| w.strong_count() > 0);
        store.observers.iter().filter_map(Weak::upgrade).collect()
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    /// Create the group at `path`, creating missing intermediate groups.
    /// Existing groups along the way are reused.
    pub fn create_group(&self, group: &str) -> Result<NodeId> {
        self.with_store(|store| {
            let mut cur = store.tree.root();
            for segment in path::segments(group) {
                cur = if segment == PARENT_GROUP {
                    store.tree.get_node(cur, PARENT_GROUP)?
                } else {
                    store.tree.add_node_or_get_existing(cur, segment)?
                };
            }
            Ok(cur)
        })
    }

    /// Add a child group under an existing group; fails if it already
    /// exists.
    pub fn add_group(&self, parent: &str, name: &str) -> Result<NodeId> {
        self.with_store(|store| {
            let parent = store.tree.get_node(store.tree.root(), parent)?;
            store.tree.add_node(parent, name)
        })
    }

    pub fn group_exists(&self, group: &str) -> bool {
        self.with_store(|store| Ok(store.tree.node_exists(store.tree.root(), group)))
            .unwrap_or(false)
    }

    /// Delete a group and its subtree. Components bound inside are
    /// destroyed first, parents before children, with the usual resource
    /// deletion notifications.
    pub fn delete_group(&self, group: &str) -> Result<()> {
        let guard = self.shared.lock.lock();
        let ids = {
            let store = guard.borrow();
            let node = store.tree.get_node(store.tree.root(), group)?;
            if node == store.tree.root() {
                return Err(ConfigError::InvalidName(group.to_owned()));
            }
            bound_components(&store.tree, node)?
        };
        for id in ids {
            self.destroy_entry(&guard, id)?;
        }
        let mut store = guard.borrow_mut();
        let (parent_path, name) = path::split_last(group);
        let parent = store.tree.get_node(store.tree.root(), parent_path)?;
        store.tree.delete_child(parent, name)?;
        Ok(())
    }

    pub fn rename_group(&self, group: &str, new_name: &str) -> Result<()> {
        self.with_store(|store| {
            let (parent_path, name) = path::split_last(group);
            let parent = store.tree.get_node(store.tree.root(), parent_path)?;
            store.tree.rename_child(parent, name, new_name)
        })
    }

    /// Copy the groups and parameters under `source` into `dest`, creating
    /// `dest` if needed. Components are not copied.
    pub fn copy_group(&self, source: &str, dest: &str) -> Result<()> {
        self.with_store(|store| {
            let src = store.tree.get_node(store.tree.root(), source)?;
            let snapshot = store.tree.snapshot(src)?;
            let mut cur = store.tree.root();
            for segment in path::segments(dest) {
                cur = if segment == PARENT_GROUP {
                    store.tree.get_node(cur, PARENT_GROUP)?
                } else {
                    store.tree.add_node_or_get_existing(cur, segment)?
                };
            }
            store.tree.paste(cur, &snapshot)
        })
    }

    pub fn group_names(&self, group: &str) -> Result<Vec<String>> {
        self.with_store(|store| {
            let node = store.tree.get_node(store.tree.root(), group)?;
            store.tree.children_names(node)
        })
    }

    /// Names of the child groups of `group` starting with `prefix`, in key
    /// order.
    pub fn groups_with_prefix(&self, group: &str, prefix: &str) -> Result<Vec<String>> {
        let mut names = self.group_names(group)?;
        names.retain(|name| name.starts_with(prefix));
        Ok(names)
    }

    /// Destroy every component and wipe groups, parameters and resources.
    /// Lingering external subscriptions are dropped without notices.
    pub fn clear_all(&self) -> Result<()> {
        self.destroy_all_components()?;
        self.with_store_notify(|store| {
            let mut notices = Vec::new();
            for name in store.resources.owned_names(CONTAINER_OWNER) {
                if let Ok(batch) = store.resources.delete(CONTAINER_OWNER, &name) {
                    notices.extend(batch);
                }
            }
            Ok(((), notices))
        })?;
        self.with_store(|store| {
            store.resources = ResourceRegistry::default();
            let root = store.tree.root();
            store.tree.clear_node(root)?;
            Ok(())
        })
    }

    /// New independent container with a copy of the groups and parameters.
    /// Components, resources and subscriptions are not carried over.
    pub fn deep_copy(&self) -> Result<ConfigContainer> {
        let tree = self.with_store(|store| store.tree.deep_copy())?;
        let copy = ConfigContainer::new();
        {
            let guard = copy.shared.lock.lock();
            guard.borrow_mut().tree = tree;
        }
        Ok(copy)
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    pub fn node_id(&self, group: &str) -> Result<NodeId> {
        self.with_store(|store| store.tree.get_node(store.tree.root(), group))
    }

    pub fn node_path(&self, node: NodeId) -> Result<String> {
        self.with_store(|store| store.tree.full_path(node))
    }

    pub fn distance(&self, a: NodeId, b: NodeId) -> Result<usize> {
        self.with_store(|store| store.tree.distance(a, b))
    }

    pub fn lowest_common_ancestor(&self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.with_store(|store| store.tree.lowest_common_ancestor(a, b))
    }

    // ------------------------------------------------------------------
    // Parameters
    // ------------------------------------------------------------------

    /// Add a parameter with an empty value.
    pub fn add_parameter(&self, group: &str, name: &str) -> Result<()> {
        self.with_store(|store| {
            let node = store.tree.get_node(store.tree.root(), group)?;
            store.tree.add_parameter(node, name)
        })
    }

    pub fn parameter(&self, group: &str, name: &str) -> Result<String> {
        self.with_store(|store| {
            let node = store.tree.get_node(store.tree.root(), group)?;
            store.tree.parameter(node, name)
        })
    }

    /// Read a parameter, falling back to the nearest ancestor group that
    /// defines it.
    pub fn parameter_also_match_parents(&self, group: &str, name: &str) -> Result<String> {
        self.with_store(|store| {
            let node = store.tree.get_node(store.tree.root(), group)?;
            store.tree.parameter_also_match_parents(node, name)
        })
    }

    pub fn set_parameter(&self, group: &str, name: &str, value: &str) -> Result<()> {
        self.with_store(|store| {
            let node = store.tree.get_node(store.tree.root(), group)?;
            store.tree.set_parameter(node, name, value)
        })
    }

    pub fn delete_parameter(&self, group: &str, name: &str) -> Result<()> {
        self.with_store(|store| {
            let node = store.tree.get_node(store.tree.root(), group)?;
            store.tree.delete_parameter(node, name)
        })
    }

    pub fn parameter_exists(&self, group: &str, name: &str) -> bool {
        self.with_store(|store| {
            let node = store.tree.get_node(store.tree.root(), group)?;
            store.tree.parameter_exists(node, name)
        })
        .unwrap_or(false)
    }

    pub fn parameter_names(&self, group: &str) -> Result<Vec<String>> {
        self.with_store(|store| {
            let node = store.tree.get_node(store.tree.root(), group)?;
            store.tree.parameters_names(node)
        })
    }

    pub(crate) fn parameter_at(
        &self,
        node: NodeId,
        name: &str,
        also_parents: bool,
    ) -> Result<String> {
        self.with_store(|store| {
            if also_parents {
                store.tree.parameter_also_match_parents(node, name)
            } else {
                store.tree.parameter(node, name)
            }
        })
    }

    // ------------------------------------------------------------------
    // Type registration
    // ------------------------------------------------------------------

    /// Register a concrete component type under `name`.
    pub fn register_component<T, F>(
        &self,
        name: &str,
        parents: &[&str],
        configures_in_constructor: bool,
        create: F,
    ) -> Result<()>
    where
        T: Component,
        F: Fn(ComponentContext) -> Result<T> + Send + Sync + 'static,
    {
        let creator: Arc<CreatorFn> =
            Arc::new(move |ctx| Ok(Arc::new(create(ctx)?) as Arc<dyn Component>));
        self.with_store(|store| {
            store.types.register(
                TypeInfo {
                    name: name.to_owned(),
                    parents: parents.iter().map(|p| (*p).to_owned()).collect(),
                    can_be_created: true,
                    is_interface: false,
                    configures_in_constructor,
                },
                Some(creator.clone()),
            )
        })
    }

    /// Register an abstract component type: it anchors a hierarchy but
    /// cannot be built.
    pub fn register_abstract_component(
        &self,
        name: &str,
        parents: &[&str],
        configures_in_constructor: bool,
    ) -> Result<()> {
        self.with_store(|store| {
            store.types.register(
                TypeInfo {
                    name: name.to_owned(),
                    parents: parents.iter().map(|p| (*p).to_owned()).collect(),
                    can_be_created: false,
                    is_interface: false,
                    configures_in_constructor,
                },
                None,
            )
        })
    }

    /// Register an interface type. Interfaces can appear among a component
    /// type's parents but are not components themselves.
    pub fn register_interface(&self, name: &str, parents: &[&str]) -> Result<()> {
        self.with_store(|store| {
            store.types.register(
                TypeInfo {
                    name: name.to_owned(),
                    parents: parents.iter().map(|p| (*p).to_owned()).collect(),
                    can_be_created: false,
                    is_interface: true,
                    configures_in_constructor: true,
                },
                None,
            )
        })
    }

    pub fn type_registered(&self, name: &str) -> bool {
        self.with_store(|store| Ok(store.types.info(name).is_ok())).unwrap_or(false)
    }

    pub fn is_subtype(&self, name: &str, ancestor: &str) -> bool {
        self.with_store(|store| Ok(store.types.is_subtype(name, ancestor)))
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Components
    // ------------------------------------------------------------------

    /// Build the component of the given group, or return it if it already
    /// exists, and recover its concrete type.
    pub fn build_component<T: Component>(&self, group: &str) -> Result<Arc<T>> {
        let component = self.build_component_dyn(group)?;
        component
            .as_any_arc()
            .downcast::<T>()
            .map_err(|_| ConfigError::WrongComponentType(group.to_owned()))
    }

    /// Build the component of the group named by a parameter's value.
    ///
    /// A value starting with `/` is resolved from the root; anything else is
    /// resolved against the parameter's own group.
    pub fn build_component_from_parameter<T: Component>(
        &self,
        group: &str,
        parameter: &str,
    ) -> Result<Arc<T>> {
        let guard = self.shared.lock.lock();
        let (from, target) = {
            let store = guard.borrow();
            let node = store.tree.get_node(store.tree.root(), group)?;
            let value = store.tree.parameter(node, parameter)?;
            match value.strip_prefix(path::GROUP_SEPARATOR) {
                Some(rest) => (store.tree.root(), rest.to_owned()),
                None => (node, value),
            }
        };
        let component = self.build_frame(&guard, from, &target, true)?;
        component
            .as_any_arc()
            .downcast::<T>()
            .map_err(|_| ConfigError::WrongComponentType(target))
    }

    /// Build the component of the given group, or return it if it already
    /// exists.
    ///
    /// The group's `type` parameter names the registered type to
    /// instantiate. Nested builds triggered by the component's creator are
    /// part of the same outermost build: separate-step components are
    /// configured as the nesting unwinds, `post_configure_init` hooks run in
    /// creation order at the very end, and subscription requests made along
    /// the way are applied last, in request order.
    pub fn build_component_dyn(&self, group: &str) -> Result<Arc<dyn Component>> {
        let guard = self.shared.lock.lock();
        let root = guard.borrow().tree.root();
        self.build_frame(&guard, root, group, true)
    }

    pub(crate) fn build_component_at<T: Component>(
        &self,
        from: NodeId,
        relative_path: &str,
    ) -> Result<Arc<T>> {
        let guard = self.shared.lock.lock();
        let component = self.build_frame(&guard, from, relative_path, true)?;
        component
            .as_any_arc()
            .downcast::<T>()
            .map_err(|_| ConfigError::WrongComponentType(relative_path.to_owned()))
    }

    fn build_frame(
        &self,
        cell: &RefCell<Store>,
        from: NodeId,
        group: &str,
        want_configure: bool,
    ) -> Result<Arc<dyn Component>> {
        let (configure, level) = {
            let mut store = cell.borrow_mut();
            // The outermost build always configures and starts clean
            let configure = if store.build.recursion_level == 0 {
                store.build.to_configure.clear();
                store.build.configured_not_initialized.clear();
                store.build.queued_requests.clear();
                true
            } else {
                want_configure
            };
            store.build.recursion_level += 1;
            (configure, store.build.recursion_level)
        };
        let result = self.build_body(cell, from, group, configure, level);
        self.build_unwind(cell, level, result)
    }

    fn build_body(
        &self,
        cell: &RefCell<Store>,
        from: NodeId,
        group: &str,
        configure: bool,
        level: usize,
    ) -> Result<Arc<dyn Component>> {
        enum Plan {
            Existing(Arc<dyn Component>),
            Create {
                node: NodeId,
                id: ComponentId,
                type_name: String,
                creator: Arc<CreatorFn>,
                configures_in_constructor: bool,
            },
        }

        let plan = {
            let mut store = cell.borrow_mut();
            let node = store.tree.get_node(from, group)?;
            let (existing, status) = store.tree.component_of(node)?;
            match status {
                ComponentStatus::Creating => {
                    return Err(ConfigError::CyclicDependency(store.tree.name(node)?));
                }
                ComponentStatus::Configuring if configure => {
                    return Err(ConfigError::CyclicDependency(store.tree.name(node)?));
                }
                _ => {}
            }
            if let Some(id) = existing {
                let component = match store.components.get(&id) {
                    Some(entry) => entry.component.clone(),
                    None => {
                        return Err(ConfigError::GroupNotFound(store.tree.full_path(node)?));
                    }
                };
                if configure && status == ComponentStatus::CreatedNotConfigured {
                    store.build.to_configure.push((id, level));
                }
                Plan::Existing(component)
            } else {
                let type_name = store.tree.parameter(node, TYPE_PARAMETER)?;
                let creator = store.types.creator(&type_name)?;
                let configures_in_constructor =
                    store.types.info(&type_name)?.configures_in_constructor;
                let id = ComponentId::from_raw(store.next_component_id);
                store.next_component_id += 1;
                store
                    .tree
                    .set_component(node, None, ComponentStatus::Creating)?;
                Plan::Create {
                    node,
                    id,
                    type_name,
                    creator,
                    configures_in_constructor,
                }
            }
        };

        let (node, id, type_name, creator, configures_in_constructor) = match plan {
            Plan::Existing(component) => return Ok(component),
            Plan::Create {
                node,
                id,
                type_name,
                creator,
                configures_in_constructor,
            } => (node, id, type_name, creator, configures_in_constructor),
        };

        tracing::debug!(group, ty = %type_name, %id, "creating component");
        let ctx = ComponentContext::new(
            Arc::downgrade(&self.shared),
            node,
            id,
            type_name.clone(),
        );
        let component = match creator(ctx) {
            Ok(component) => component,
            Err(err) => {
                let _ = cell
                    .borrow_mut()
                    .tree
                    .set_component(node, None, ComponentStatus::NotCreated);
                return Err(err);
            }
        };

        let notices = {
            let mut store = cell.borrow_mut();
            let status = if configures_in_constructor {
                ComponentStatus::CreatedAndConfigured
            } else {
                ComponentStatus::CreatedNotConfigured
            };
            store.tree.set_component(node, Some(id), status)?;
            store.components.insert(
                id,
                ComponentEntry {
                    component: component.clone(),
                    notifee: component.clone().as_notifee(),
                    node,
                    type_name: type_name.clone(),
                },
            );
            if configures_in_constructor {
                store.build.configured_not_initialized.push(id);
            } else if configure {
                store.build.to_configure.push((id, level));
            }
            // The component publishes itself under its group's name
            let group_name = store.tree.name(node)?;
            store
                .resources
                .declare(id, &group_name, ResourceValue::Component(id))
        };
        self.deliver(cell, notices);
        for observer in self.observers_snapshot(cell) {
            observer.component_created(id, &type_name);
        }
        Ok(component)
    }

    fn build_unwind(
        &self,
        cell: &RefCell<Store>,
        level: usize,
        result: Result<Arc<dyn Component>>,
    ) -> Result<Arc<dyn Component>> {
        cell.borrow_mut().build.recursion_level -= 1;
        let current = level - 1;
        let mut result = result;

        if result.is_ok() {
            let due: Vec<ComponentId> = {
                let mut store = cell.borrow_mut();
                let (due, pending): (Vec<_>, Vec<_>) = store
                    .build
                    .to_configure
                    .drain(..)
                    .partition(|&(_, tag)| tag > current);
                store.build.to_configure = pending;
                due.into_iter().map(|(id, _)| id).collect()
            };
            for id in due {
                if let Err(err) = self.configure_component(cell, id) {
                    result = Err(err);
                    break;
                }
            }
        }

        if current == 0 {
            if result.is_ok() {
                let to_init: Vec<ComponentId> = {
                    let mut store = cell.borrow_mut();
                    store.build.configured_not_initialized.drain(..).collect()
                };
                for id in to_init {
                    let component = cell
                        .borrow()
                        .components
                        .get(&id)
                        .map(|entry| entry.component.clone());
                    if let Some(component) = component {
                        if let Err(err) = component.post_configure_init() {
                            result = Err(err);
                            break;
                        }
                    }
                }
            }
            if result.is_ok() {
                let queued: Vec<SubscriptionRequest> = {
                    let mut store = cell.borrow_mut();
                    store.build.queued_requests.drain(..).collect()
                };
                for request in queued {
                    if let Err(err) = self.apply_request(cell, request) {
                        result = Err(err);
                        break;
                    }
                }
            }
            let mut store = cell.borrow_mut();
            store.build.to_configure.clear();
            store.build.configured_not_initialized.clear();
            store.build.queued_requests.clear();
        }
        result
    }

    fn configure_component(&self, cell: &RefCell<Store>, id: ComponentId) -> Result<()> {
        let (node, component) = {
            let mut store = cell.borrow_mut();
            let (node, component) = match store.components.get(&id) {
                Some(entry) => (entry.node, entry.component.clone()),
                // Destroyed while waiting, nothing to configure
                None => return Ok(()),
            };
            if store.tree.component_of(node)?.1 == ComponentStatus::CreatedAndConfigured {
                return Ok(());
            }
            store
                .tree
                .set_component(node, Some(id), ComponentStatus::Configuring)?;
            (node, component)
        };
        tracing::debug!(%id, "configuring component");
        let result = component.configure();
        let mut store = cell.borrow_mut();
        match result {
            Ok(()) => {
                store
                    .tree
                    .set_component(node, Some(id), ComponentStatus::CreatedAndConfigured)?;
                store.build.configured_not_initialized.push(id);
                Ok(())
            }
            Err(err) => {
                store
                    .tree
                    .set_component(node, Some(id), ComponentStatus::CreatedNotConfigured)?;
                Err(err)
            }
        }
    }

    /// Destroy the component bound to a group, if any. Its resources are
    /// deleted with notifications, its subscriptions dropped, and the group
    /// returns to `NotCreated`.
    pub fn destroy_component(&self, group: &str) -> Result<()> {
        let guard = self.shared.lock.lock();
        let id = {
            let store = guard.borrow();
            let node = store.tree.get_node(store.tree.root(), group)?;
            store.tree.component_of(node)?.0
        };
        match id {
            Some(id) => self.destroy_entry(&guard, id),
            None => Ok(()),
        }
    }

    /// Destroy every component, parents before children.
    pub fn destroy_all_components(&self) -> Result<()> {
        let guard = self.shared.lock.lock();
        let ids = {
            let store = guard.borrow();
            let root = store.tree.root();
            let mut ids = bound_components(&store.tree, root)?;
            // Entries whose group disappeared are destroyed last
            for &id in store.components.keys() {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            ids
        };
        for id in ids {
            self.destroy_entry(&guard, id)?;
        }
        Ok(())
    }

    fn destroy_entry(&self, cell: &RefCell<Store>, id: ComponentId) -> Result<()> {
        let (component, type_name, notices) = {
            let mut store = cell.borrow_mut();
            let entry = match store.components.remove(&id) {
                Some(entry) => entry,
                None => return Ok(()),
            };
            // Null every owned resource before deleting it, so subscribers
            // can react while the backing objects are still alive
            let mut notices = Vec::new();
            let owned = store.resources.owned_names(id);
            for name in &owned {
                notices.extend(store.resources.declare(id, name, ResourceValue::DeclaredNull));
            }
            for name in &owned {
                if let Ok(batch) = store.resources.delete(id, name) {
                    notices.extend(batch);
                }
            }
            let this = NotifeeRef::Component(id);
            store.resources.remove_subscriber(&this);
            store.build.queued_requests.retain(|r| !r.notifee.same(&this));
            // The group may already be gone
            let _ = store
                .tree
                .set_component(entry.node, None, ComponentStatus::NotCreated);
            (entry.component, entry.type_name, notices)
        };
        self.deliver(cell, notices);
        for observer in self.observers_snapshot(cell) {
            observer.component_destroyed(id, &type_name);
        }
        tracing::debug!(%id, ty = %type_name, "destroyed component");
        drop(component);
        Ok(())
    }

    pub fn component_status(&self, group: &str) -> Result<ComponentStatus> {
        self.with_store(|store| {
            let node = store.tree.get_node(store.tree.root(), group)?;
            Ok(store.tree.component_of(node)?.1)
        })
    }

    pub fn component_id(&self, group: &str) -> Result<Option<ComponentId>> {
        self.with_store(|store| {
            let node = store.tree.get_node(store.tree.root(), group)?;
            Ok(store.tree.component_of(node)?.0)
        })
    }

    // ------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------

    /// Declare a resource owned by the container itself.
    pub fn declare_resource<V: Into<ResourceValue>>(&self, name: &str, value: V) -> Result<()> {
        self.declare_resource_for(CONTAINER_OWNER, name, value.into())
    }

    pub fn declare_resource_as_null(&self, name: &str) -> Result<()> {
        self.declare_resource_for(CONTAINER_OWNER, name, ResourceValue::DeclaredNull)
    }

    pub fn delete_resource(&self, name: &str) -> Result<()> {
        self.delete_resource_for(CONTAINER_OWNER, name)
    }

    pub(crate) fn declare_resource_for(
        &self,
        owner: ComponentId,
        name: &str,
        value: ResourceValue,
    ) -> Result<()> {
        path::validate_name(name)?;
        self.with_store_notify(|store| Ok(((), store.resources.declare(owner, name, value))))
    }

    pub(crate) fn delete_resource_for(&self, owner: ComponentId, name: &str) -> Result<()> {
        self.with_store_notify(|store| Ok(((), store.resources.delete(owner, name)?)))
    }

    /// Fetch a resource by name, disambiguating multiple owners by tree
    /// distance from the root group.
    pub fn resource<T: FromResource>(&self, name: &str) -> Result<Option<T>> {
        let root = self.with_store(|store| Ok(store.tree.root()))?;
        self.resource_from::<T>(root, name)
    }

    /// Fetch the resource declared by a specific owner.
    pub fn resource_of<T: FromResource>(
        &self,
        owner: ComponentId,
        name: &str,
    ) -> Result<Option<T>> {
        self.with_store(|store| match store.resources.value(owner, name) {
            Some(value) if T::matches(value) => Ok(T::extract(value)),
            _ => Err(ConfigError::ResourceNotDeclared(name.to_owned())),
        })
    }

    pub fn resource_exists(&self, name: &str) -> bool {
        self.with_store(|store| Ok(!store.resources.candidates(name).is_empty()))
            .unwrap_or(false)
    }

    pub fn resource_owners(&self, name: &str) -> Result<Vec<ComponentId>> {
        self.with_store(|store| {
            Ok(store
                .resources
                .candidates(name)
                .into_iter()
                .map(|(owner, _)| owner)
                .collect())
        })
    }

    /// Every type-compatible declaration of `name`, paired with its owner,
    /// regardless of tree distance. Declared-null entries extract as `None`.
    pub fn resources_with_name<T: FromResource>(
        &self,
        name: &str,
    ) -> Result<Vec<(ComponentId, Option<T>)>> {
        self.with_store(|store| {
            Ok(store
                .resources
                .candidates(name)
                .into_iter()
                .filter(|(_, value)| T::matches(value))
                .map(|(owner, value)| (owner, T::extract(&value)))
                .collect())
        })
    }

    pub(crate) fn delete_all_resources_for(&self, owner: ComponentId) -> Result<()> {
        self.with_store_notify(|store| {
            let mut notices = Vec::new();
            for name in store.resources.owned_names(owner) {
                notices.extend(store.resources.delete(owner, &name)?);
            }
            Ok(((), notices))
        })
    }

    fn owner_node(store: &Store, owner: ComponentId) -> Option<NodeId> {
        if owner == CONTAINER_OWNER {
            Some(store.tree.root())
        } else {
            store.components.get(&owner).map(|entry| entry.node)
        }
    }

    /// Pick the owner of `name` closest to `from` among `candidates`.
    fn nearest_owner(
        store: &Store,
        from: NodeId,
        name: &str,
        candidates: &[ComponentId],
    ) -> Result<ComponentId> {
        if candidates.is_empty() {
            return Err(ConfigError::ResourceNotDeclared(name.to_owned()));
        }
        if candidates.len() == 1 {
            return Ok(candidates[0]);
        }
        let mut best: Option<(usize, ComponentId)> = None;
        let mut tied = 0usize;
        for &owner in candidates {
            let node = match Self::owner_node(store, owner) {
                Some(node) => node,
                None => continue,
            };
            let distance = match store.tree.distance(from, node) {
                Ok(d) => d,
                Err(_) => continue,
            };
            match best {
                Some((min, _)) if distance > min => {}
                Some((min, _)) if distance == min => tied += 1,
                _ => {
                    best = Some((distance, owner));
                    tied = 1;
                }
            }
        }
        match best {
            Some((_, owner)) if tied == 1 => Ok(owner),
            Some(_) => Err(ConfigError::ResourceAmbiguous {
                name: name.to_owned(),
                count: tied,
            }),
            None => Err(ConfigError::ResourceNotDeclared(name.to_owned())),
        }
    }

    pub(crate) fn resource_from<T: FromResource>(
        &self,
        from: NodeId,
        name: &str,
    ) -> Result<Option<T>> {
        self.with_store(|store| {
            let candidates: Vec<ComponentId> = store
                .resources
                .candidates(name)
                .into_iter()
                .filter(|(_, value)| T::matches(value))
                .map(|(owner, _)| owner)
                .collect();
            let owner = Self::nearest_owner(store, from, name, &candidates)?;
            match store.resources.value(owner, name) {
                Some(value) => Ok(T::extract(value)),
                None => Err(ConfigError::ResourceNotDeclared(name.to_owned())),
            }
        })
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Subscribe an external notifee to changes of `name`. When several
    /// owners declare it, the one closest to the root group wins. If the
    /// resource already exists the notifee immediately receives its current
    /// state.
    pub fn add_notifee(&self, notifee: Arc<dyn Notifee>, name: &str) -> Result<()> {
        let root = self.with_store(|store| Ok(store.tree.root()))?;
        self.enqueue_or_apply(SubscriptionRequest {
            notifee: NotifeeRef::External(notifee),
            name: name.to_owned(),
            owner: None,
            requester: root,
            action: SubscriptionAction::Subscribe,
        })
    }

    /// Subscribe to a specific owner's resource. The subscription may be
    /// made before the resource is declared.
    pub fn add_notifee_with_owner(
        &self,
        notifee: Arc<dyn Notifee>,
        name: &str,
        owner: ComponentId,
    ) -> Result<()> {
        let root = self.with_store(|store| Ok(store.tree.root()))?;
        self.enqueue_or_apply(SubscriptionRequest {
            notifee: NotifeeRef::External(notifee),
            name: name.to_owned(),
            owner: Some(owner),
            requester: root,
            action: SubscriptionAction::Subscribe,
        })
    }

    /// Drop an external subscription. The notifee receives one final
    /// deletion notice.
    pub fn remove_notifee(&self, notifee: &Arc<dyn Notifee>, name: &str) -> Result<()> {
        let root = self.with_store(|store| Ok(store.tree.root()))?;
        self.enqueue_or_apply(SubscriptionRequest {
            notifee: NotifeeRef::External(notifee.clone()),
            name: name.to_owned(),
            owner: None,
            requester: root,
            action: SubscriptionAction::Unsubscribe,
        })
    }

    pub fn remove_notifee_with_owner(
        &self,
        notifee: &Arc<dyn Notifee>,
        name: &str,
        owner: ComponentId,
    ) -> Result<()> {
        let root = self.with_store(|store| Ok(store.tree.root()))?;
        self.enqueue_or_apply(SubscriptionRequest {
            notifee: NotifeeRef::External(notifee.clone()),
            name: name.to_owned(),
            owner: Some(owner),
            requester: root,
            action: SubscriptionAction::Unsubscribe,
        })
    }

    pub(crate) fn subscribe_component(
        &self,
        id: ComponentId,
        node: NodeId,
        name: &str,
        owner: Option<ComponentId>,
    ) -> Result<()> {
        self.enqueue_or_apply(SubscriptionRequest {
            notifee: NotifeeRef::Component(id),
            name: name.to_owned(),
            owner,
            requester: node,
            action: SubscriptionAction::Subscribe,
        })
    }

    pub(crate) fn unsubscribe_component(
        &self,
        id: ComponentId,
        node: NodeId,
        name: &str,
        owner: Option<ComponentId>,
    ) -> Result<()> {
        self.enqueue_or_apply(SubscriptionRequest {
            notifee: NotifeeRef::Component(id),
            name: name.to_owned(),
            owner,
            requester: node,
            action: SubscriptionAction::Unsubscribe,
        })
    }

    /// Apply a subscription request now, or queue it when a build is in
    /// progress. Queued requests run, in order, when the outermost build
    /// completes.
    fn enqueue_or_apply(&self, request: SubscriptionRequest) -> Result<()> {
        let guard = self.shared.lock.lock();
        let building = guard.borrow().build.recursion_level > 0;
        if building {
            guard.borrow_mut().build.queued_requests.push(request);
            Ok(())
        } else {
            self.apply_request(&guard, request)
        }
    }

    fn apply_request(&self, cell: &RefCell<Store>, request: SubscriptionRequest) -> Result<()> {
        let notices = {
            let mut store = cell.borrow_mut();
            // A component subscriber must expose a notifee identity; a
            // destroyed one is silently skipped
            if let NotifeeRef::Component(id) = &request.notifee {
                match store.components.get(id) {
                    Some(entry) if entry.notifee.is_none() => {
                        return Err(ConfigError::NotifeeNotSupported(entry.type_name.clone()));
                    }
                    Some(_) => {}
                    None => return Ok(()),
                }
            }
            // Subscribe and unsubscribe resolve an unspecified owner the
            // same way, so resolution failures surface on both paths
            let owner = match request.owner {
                Some(owner) => owner,
                None => {
                    let candidates: Vec<ComponentId> = store
                        .resources
                        .candidates(&request.name)
                        .into_iter()
                        .map(|(owner, _)| owner)
                        .collect();
                    Self::nearest_owner(&store, request.requester, &request.name, &candidates)?
                }
            };
            match request.action {
                SubscriptionAction::Subscribe => {
                    store
                        .resources
                        .subscribe(owner, &request.name, request.notifee.clone())
                }
                SubscriptionAction::Unsubscribe => {
                    store
                        .resources
                        .unsubscribe(owner, &request.name, &request.notifee)
                }
            }
        };
        self.deliver(cell, notices);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    /// Register a lifecycle observer. The container holds it weakly;
    /// dropping the `Arc` unregisters it.
    pub fn add_observer(&self, observer: &Arc<dyn ContainerObserver>) {
        let _ = self.with_store(|store| {
            store.observers.push(Arc::downgrade(observer));
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_and_parameter_api() {
        let container = ConfigContainer::new();
        container.create_group("a/b/c").unwrap();
        assert!(container.group_exists("a/b"));
        container.add_parameter("a/b", "p").unwrap();
        container.set_parameter("a/b", "p", "v").unwrap();
        assert_eq!(container.parameter("a/b", "p").unwrap(), "v");
        assert_eq!(
            container.parameter_also_match_parents("a/b/c", "p").unwrap(),
            "v"
        );
        assert_eq!(container.group_names("a").unwrap(), vec!["b".to_owned()]);
        container.rename_group("a/b", "z").unwrap();
        assert!(container.group_exists("a/z/c"));
        container.delete_group("a/z").unwrap();
        assert!(!container.group_exists("a/z"));
        assert!(container.group_exists("a"));
    }

    #[test]
    fn test_add_group_strict() {
        let container = ConfigContainer::new();
        container.add_group("", "a").unwrap();
        assert!(matches!(
            container.add_group("", "a"),
            Err(ConfigError::GroupAlreadyExists(_))
        ));
        assert!(matches!(
            container.add_group("missing", "b"),
            Err(ConfigError::GroupNotFound(_))
        ));
    }

    #[test]
    fn test_delete_root_rejected() {
        let container = ConfigContainer::new();
        assert!(container.delete_group("").is_err());
    }

    #[test]
    fn test_copy_group() {
        let container = ConfigContainer::new();
        container.create_group("src/inner").unwrap();
        container.add_parameter("src/inner", "p").unwrap();
        container.set_parameter("src/inner", "p", "1").unwrap();
        container.copy_group("src", "dst").unwrap();
        assert_eq!(container.parameter("dst/inner", "p").unwrap(), "1");
        // The copy is independent
        container.set_parameter("src/inner", "p", "2").unwrap();
        assert_eq!(container.parameter("dst/inner", "p").unwrap(), "1");
    }

    #[test]
    fn test_deep_copy_drops_runtime_state() {
        let container = ConfigContainer::new();
        container.create_group("a").unwrap();
        container.declare_resource("r", 1i32).unwrap();
        let copy = container.deep_copy().unwrap();
        assert!(copy.group_exists("a"));
        assert!(!copy.resource_exists("r"));
    }

    #[test]
    fn test_container_resources() {
        let container = ConfigContainer::new();
        container.declare_resource("num", 5i32).unwrap();
        assert_eq!(container.resource::<i32>("num").unwrap(), Some(5));
        assert!(matches!(
            container.resource::<bool>("num"),
            Err(ConfigError::ResourceNotDeclared(_))
        ));
        container.declare_resource_as_null("num").unwrap();
        assert_eq!(container.resource::<i32>("num").unwrap(), None);
        container.delete_resource("num").unwrap();
        assert!(!container.resource_exists("num"));
    }

    #[test]
    fn test_resource_name_validated() {
        let container = ConfigContainer::new();
        assert!(matches!(
            container.declare_resource("a/b", 1i32),
            Err(ConfigError::InvalidName(_))
        ));
    }
}
