//! The in-memory tree of named groups.
//!
//! Nodes live in a slab arena and refer to each other through [`NodeId`]
//! handles. Every id carries the owning tree's identity plus a generation
//! counter, so ids from another tree never resolve and ids of deleted nodes
//! go stale instead of aliasing whatever reuses the slot.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use slab::Slab;

use crate::component::{ComponentId, ComponentStatus};
use crate::error::{ConfigError, Result};
use crate::key::ConfigKey;
use crate::path::{self, GROUP_SEPARATOR, PARENT_GROUP};

static TREE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Handle to one node of a [`ConfigTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    tree: u64,
    slot: usize,
    generation: u64,
}

#[derive(Debug)]
pub(crate) struct TreeNode {
    name: String,
    parent: Option<NodeId>,
    depth: usize,
    generation: u64,
    children: BTreeMap<ConfigKey, NodeId>,
    parameters: BTreeMap<ConfigKey, String>,
    component: Option<ComponentId>,
    status: ComponentStatus,
}

impl TreeNode {
    fn new(name: String, parent: Option<NodeId>, depth: usize, generation: u64) -> Self {
        Self {
            name,
            parent,
            depth,
            generation,
            children: BTreeMap::new(),
            parameters: BTreeMap::new(),
            component: None,
            status: ComponentStatus::NotCreated,
        }
    }
}

#[derive(Debug)]
pub(crate) struct ConfigTree {
    id: u64,
    nodes: Slab<TreeNode>,
    root: NodeId,
    next_generation: u64,
}

/// Detached copy of a subtree: parameters and children, no components.
#[derive(Debug, Default)]
pub(crate) struct Snapshot {
    parameters: Vec<(String, String)>,
    children: Vec<(String, Snapshot)>,
}

impl ConfigTree {
    pub fn new() -> Self {
        let id = TREE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut nodes = Slab::new();
        let slot = nodes.insert(TreeNode::new("root".to_owned(), None, 0, 0));
        let root = NodeId {
            tree: id,
            slot,
            generation: 0,
        };
        Self {
            id,
            nodes,
            root,
            next_generation: 1,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    fn node(&self, id: NodeId) -> Result<&TreeNode> {
        if id.tree != self.id {
            return Err(ConfigError::GroupNotFound("<foreign node>".to_owned()));
        }
        match self.nodes.get(id.slot) {
            Some(n) if n.generation == id.generation => Ok(n),
            _ => Err(ConfigError::GroupNotFound("<stale node>".to_owned())),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut TreeNode> {
        if id.tree != self.id {
            return Err(ConfigError::GroupNotFound("<foreign node>".to_owned()));
        }
        match self.nodes.get_mut(id.slot) {
            Some(n) if n.generation == id.generation => Ok(n),
            _ => Err(ConfigError::GroupNotFound("<stale node>".to_owned())),
        }
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        self.node(id).is_ok()
    }

    pub fn name(&self, id: NodeId) -> Result<String> {
        Ok(self.node(id)?.name.clone())
    }

    pub fn depth(&self, id: NodeId) -> Result<usize> {
        Ok(self.node(id)?.depth)
    }

    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.node(id)?.parent)
    }

    /// Path of a node relative to the root (the root itself is the empty path).
    pub fn full_path(&self, id: NodeId) -> Result<String> {
        let mut names = Vec::new();
        let mut cur = self.node(id)?;
        while let Some(parent) = cur.parent {
            names.push(cur.name.clone());
            cur = self.node(parent)?;
        }
        names.reverse();
        Ok(names.join(&GROUP_SEPARATOR.to_string()))
    }

    // ------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------

    pub fn add_node(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        path::validate_name(name)?;
        let key = ConfigKey::new(name);
        if self.node(parent)?.children.contains_key(&key) {
            return Err(ConfigError::GroupAlreadyExists(name.to_owned()));
        }
        let depth = self.node(parent)?.depth + 1;
        let generation = self.next_generation;
        self.next_generation += 1;
        let slot = self
            .nodes
            .insert(TreeNode::new(name.to_owned(), Some(parent), depth, generation));
        let id = NodeId {
            tree: self.id,
            slot,
            generation,
        };
        self.node_mut(parent)?.children.insert(key, id);
        Ok(id)
    }

    pub fn add_node_or_get_existing(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        let key = ConfigKey::new(name);
        if let Some(&child) = self.node(parent)?.children.get(&key) {
            return Ok(child);
        }
        self.add_node(parent, name)
    }

    /// Resolve a path starting from `from`. The empty path names `from`
    /// itself, `..` the parent (the parent of the root is the root).
    pub fn get_node(&self, from: NodeId, path: &str) -> Result<NodeId> {
        let mut cur = from;
        for segment in path::segments(path) {
            if segment == PARENT_GROUP {
                cur = self.node(cur)?.parent.unwrap_or(cur);
            } else {
                let key = ConfigKey::new(segment);
                match self.node(cur)?.children.get(&key) {
                    Some(&child) => cur = child,
                    None => return Err(ConfigError::GroupNotFound(segment.to_owned())),
                }
            }
        }
        // Validates `from` even for the empty path
        self.node(cur)?;
        Ok(cur)
    }

    pub fn node_exists(&self, from: NodeId, path: &str) -> bool {
        self.get_node(from, path).is_ok()
    }

    pub fn has_child(&self, id: NodeId, name: &str) -> Result<bool> {
        Ok(self.node(id)?.children.contains_key(&ConfigKey::new(name)))
    }

    pub fn children_names(&self, id: NodeId) -> Result<Vec<String>> {
        Ok(self
            .node(id)?
            .children
            .keys()
            .map(|k| k.as_str().to_owned())
            .collect())
    }

    pub fn children_ids(&self, id: NodeId) -> Result<Vec<NodeId>> {
        Ok(self.node(id)?.children.values().copied().collect())
    }

    /// Delete a child and its whole subtree. Returns the components that
    /// were bound inside the deleted subtree, parents first.
    pub fn delete_child(&mut self, parent: NodeId, name: &str) -> Result<Vec<ComponentId>> {
        let key = ConfigKey::new(name);
        let child = match self.node(parent)?.children.get(&key) {
            Some(&c) => c,
            None => return Err(ConfigError::GroupNotFound(name.to_owned())),
        };
        self.node_mut(parent)?.children.remove(&key);
        let mut bound = Vec::new();
        self.remove_subtree(child, &mut bound);
        Ok(bound)
    }

    fn remove_subtree(&mut self, id: NodeId, bound: &mut Vec<ComponentId>) {
        let (children, component) = match self.nodes.get(id.slot) {
            Some(n) if n.generation == id.generation => {
                (n.children.values().copied().collect::<Vec<_>>(), n.component)
            }
            _ => return,
        };
        if let Some(component) = component {
            bound.push(component);
        }
        self.nodes.remove(id.slot);
        for child in children {
            self.remove_subtree(child, bound);
        }
    }

    pub fn rename_child(&mut self, parent: NodeId, old_name: &str, new_name: &str) -> Result<()> {
        path::validate_name(new_name)?;
        let old_key = ConfigKey::new(old_name);
        let new_key = ConfigKey::new(new_name);
        if self.node(parent)?.children.contains_key(&new_key) {
            return Err(ConfigError::GroupAlreadyExists(new_name.to_owned()));
        }
        let child = match self.node_mut(parent)?.children.remove(&old_key) {
            Some(child) => child,
            None => return Err(ConfigError::GroupNotFound(old_name.to_owned())),
        };
        self.node_mut(child)?.name = new_name.to_owned();
        self.node_mut(parent)?.children.insert(new_key, child);
        Ok(())
    }

    /// Remove every child and parameter of the node and reset its component
    /// slot. Returns the components bound in the cleared subtrees.
    pub fn clear_node(&mut self, id: NodeId) -> Result<Vec<ComponentId>> {
        let children: Vec<NodeId> = self.node(id)?.children.values().copied().collect();
        let mut bound = Vec::new();
        if let Some(component) = self.node(id)?.component {
            bound.push(component);
        }
        for child in children {
            self.remove_subtree(child, &mut bound);
        }
        let node = self.node_mut(id)?;
        node.children.clear();
        node.parameters.clear();
        node.component = None;
        node.status = ComponentStatus::NotCreated;
        Ok(bound)
    }

    // ------------------------------------------------------------------
    // Parameters
    // ------------------------------------------------------------------

    pub fn add_parameter(&mut self, id: NodeId, name: &str) -> Result<()> {
        path::validate_name(name)?;
        let key = ConfigKey::new(name);
        if self.node(id)?.parameters.contains_key(&key) {
            return Err(ConfigError::ParameterAlreadyExists(name.to_owned()));
        }
        self.node_mut(id)?.parameters.insert(key, String::new());
        Ok(())
    }

    pub fn parameter_exists(&self, id: NodeId, name: &str) -> Result<bool> {
        Ok(self.node(id)?.parameters.contains_key(&ConfigKey::new(name)))
    }

    pub fn delete_parameter(&mut self, id: NodeId, name: &str) -> Result<()> {
        let key = ConfigKey::new(name);
        if self.node_mut(id)?.parameters.remove(&key).is_none() {
            return Err(ConfigError::ParameterNotFound(name.to_owned()));
        }
        Ok(())
    }

    pub fn parameter(&self, id: NodeId, name: &str) -> Result<String> {
        self.node(id)?
            .parameters
            .get(&ConfigKey::new(name))
            .cloned()
            .ok_or_else(|| ConfigError::ParameterNotFound(name.to_owned()))
    }

    /// Like [`parameter`](Self::parameter) but searches ancestor groups when
    /// the parameter is missing from the given node.
    pub fn parameter_also_match_parents(&self, id: NodeId, name: &str) -> Result<String> {
        let key = ConfigKey::new(name);
        let mut cur = Some(id);
        while let Some(node_id) = cur {
            let node = self.node(node_id)?;
            if let Some(value) = node.parameters.get(&key) {
                return Ok(value.clone());
            }
            cur = node.parent;
        }
        Err(ConfigError::ParameterNotFound(name.to_owned()))
    }

    pub fn set_parameter(&mut self, id: NodeId, name: &str, value: &str) -> Result<()> {
        let key = ConfigKey::new(name);
        match self.node_mut(id)?.parameters.get_mut(&key) {
            Some(slot) => {
                value.clone_into(slot);
                Ok(())
            }
            None => Err(ConfigError::ParameterNotFound(name.to_owned())),
        }
    }

    pub fn parameters_names(&self, id: NodeId) -> Result<Vec<String>> {
        Ok(self
            .node(id)?
            .parameters
            .keys()
            .map(|k| k.as_str().to_owned())
            .collect())
    }

    // ------------------------------------------------------------------
    // Component slot
    // ------------------------------------------------------------------

    pub fn component_of(&self, id: NodeId) -> Result<(Option<ComponentId>, ComponentStatus)> {
        let node = self.node(id)?;
        Ok((node.component, node.status))
    }

    pub fn set_component(
        &mut self,
        id: NodeId,
        component: Option<ComponentId>,
        status: ComponentStatus,
    ) -> Result<()> {
        let node = self.node_mut(id)?;
        node.component = component;
        node.status = status;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Distance
    // ------------------------------------------------------------------

    /// Lowest common ancestor of two nodes of this tree.
    pub fn lowest_common_ancestor(&self, a: NodeId, b: NodeId) -> Result<NodeId> {
        if a.tree != self.id || b.tree != self.id {
            return Err(ConfigError::NoCommonAncestor);
        }
        let mut ca = a;
        let mut cb = b;
        while self.node(ca)?.depth != self.node(cb)?.depth {
            if self.node(ca)?.depth < self.node(cb)?.depth {
                cb = self.node(cb)?.parent.ok_or(ConfigError::NoCommonAncestor)?;
            } else {
                ca = self.node(ca)?.parent.ok_or(ConfigError::NoCommonAncestor)?;
            }
        }
        while ca != cb {
            match (self.node(ca)?.parent, self.node(cb)?.parent) {
                (Some(pa), Some(pb)) => {
                    ca = pa;
                    cb = pb;
                }
                _ => return Err(ConfigError::NoCommonAncestor),
            }
        }
        Ok(ca)
    }

    /// Tree distance: `depth(a) + depth(b) - 2 * depth(lca(a, b))`.
    pub fn distance(&self, a: NodeId, b: NodeId) -> Result<usize> {
        let lca = self.lowest_common_ancestor(a, b)?;
        Ok(self.node(a)?.depth + self.node(b)?.depth - 2 * self.node(lca)?.depth)
    }

    // ------------------------------------------------------------------
    // Copying
    // ------------------------------------------------------------------

    /// Detach a copy of the subtree rooted at `id`. Bound components are not
    /// part of the copy.
    pub fn snapshot(&self, id: NodeId) -> Result<Snapshot> {
        let node = self.node(id)?;
        let parameters = node
            .parameters
            .iter()
            .map(|(k, v)| (k.as_str().to_owned(), v.clone()))
            .collect();
        let mut children = Vec::new();
        for (key, &child) in &node.children {
            children.push((key.as_str().to_owned(), self.snapshot(child)?));
        }
        Ok(Snapshot {
            parameters,
            children,
        })
    }

    /// Paste a snapshot into the node `id`, merging parameters and creating
    /// children.
    pub fn paste(&mut self, id: NodeId, snapshot: &Snapshot) -> Result<()> {
        for (name, value) in &snapshot.parameters {
            self.add_parameter(id, name)?;
            self.set_parameter(id, name, value)?;
        }
        for (name, child_snapshot) in &snapshot.children {
            let child = self.add_node(id, name)?;
            self.paste(child, child_snapshot)?;
        }
        Ok(())
    }

    /// Fresh tree with the same groups and parameters, no components.
    pub fn deep_copy(&self) -> Result<ConfigTree> {
        let snapshot = self.snapshot(self.root)?;
        let mut copy = ConfigTree::new();
        let root = copy.root();
        copy.paste(root, &snapshot)?;
        Ok(copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with(paths: &[&str]) -> (ConfigTree, Vec<NodeId>) {
        let mut tree = ConfigTree::new();
        let mut ids = Vec::new();
        for p in paths {
            let (parent_path, name) = crate::path::split_last(p);
            let parent = tree.get_node(tree.root(), parent_path).unwrap();
            ids.push(tree.add_node(parent, name).unwrap());
        }
        (tree, ids)
    }

    #[test]
    fn test_add_twice_fails() {
        let mut tree = ConfigTree::new();
        let root = tree.root();
        tree.add_node(root, "a").unwrap();
        assert_eq!(
            tree.add_node(root, "a"),
            Err(ConfigError::GroupAlreadyExists("a".to_owned()))
        );
    }

    #[test]
    fn test_invalid_names_rejected() {
        let mut tree = ConfigTree::new();
        let root = tree.root();
        assert!(matches!(
            tree.add_node(root, ""),
            Err(ConfigError::InvalidName(_))
        ));
        assert!(matches!(
            tree.add_node(root, ".."),
            Err(ConfigError::InvalidName(_))
        ));
        assert!(matches!(
            tree.add_node(root, "a/b"),
            Err(ConfigError::InvalidName(_))
        ));
    }

    #[test]
    fn test_path_resolution() {
        let (tree, ids) = tree_with(&["a", "a/b", "a/b/c"]);
        let root = tree.root();
        assert_eq!(tree.get_node(root, "a/b/c").unwrap(), ids[2]);
        assert_eq!(tree.get_node(root, "a//b/").unwrap(), ids[1]);
        assert_eq!(tree.get_node(root, "").unwrap(), root);
        assert_eq!(tree.get_node(ids[2], "../..").unwrap(), ids[0]);
        // Parent of the root is the root
        assert_eq!(tree.get_node(root, "../../a").unwrap(), ids[0]);
        assert_eq!(
            tree.get_node(root, "a/x"),
            Err(ConfigError::GroupNotFound("x".to_owned()))
        );
    }

    #[test]
    fn test_delete_then_readd_is_fresh() {
        let mut tree = ConfigTree::new();
        let root = tree.root();
        let a = tree.add_node(root, "a").unwrap();
        tree.add_parameter(a, "p").unwrap();
        tree.delete_child(root, "a").unwrap();
        assert!(!tree.is_live(a));
        let a2 = tree.add_node(root, "a").unwrap();
        assert_ne!(a, a2);
        assert!(!tree.parameter_exists(a2, "p").unwrap());
        // The stale id does not resolve to the new node
        assert!(tree.parameter(a, "p").is_err());
    }

    #[test]
    fn test_rename() {
        let (mut tree, ids) = tree_with(&["a", "a/b"]);
        let root = tree.root();
        tree.rename_child(root, "a", "z").unwrap();
        assert_eq!(tree.get_node(root, "z/b").unwrap(), ids[1]);
        assert!(tree.get_node(root, "a").is_err());
        assert_eq!(tree.name(ids[0]).unwrap(), "z");
    }

    #[test]
    fn test_parameters() {
        let mut tree = ConfigTree::new();
        let root = tree.root();
        tree.add_parameter(root, "p").unwrap();
        assert_eq!(tree.parameter(root, "p").unwrap(), "");
        tree.set_parameter(root, "p", "v").unwrap();
        assert_eq!(tree.parameter(root, "p").unwrap(), "v");
        assert_eq!(
            tree.add_parameter(root, "p"),
            Err(ConfigError::ParameterAlreadyExists("p".to_owned()))
        );
        assert_eq!(
            tree.parameter(root, "q"),
            Err(ConfigError::ParameterNotFound("q".to_owned()))
        );
        tree.delete_parameter(root, "p").unwrap();
        assert!(!tree.parameter_exists(root, "p").unwrap());
    }

    #[test]
    fn test_parameter_match_parents() {
        let (mut tree, ids) = tree_with(&["a", "a/b"]);
        let root = tree.root();
        tree.add_parameter(root, "p").unwrap();
        tree.set_parameter(root, "p", "top").unwrap();
        assert_eq!(tree.parameter_also_match_parents(ids[1], "p").unwrap(), "top");
        tree.add_parameter(ids[0], "p").unwrap();
        tree.set_parameter(ids[0], "p", "mid").unwrap();
        assert_eq!(tree.parameter_also_match_parents(ids[1], "p").unwrap(), "mid");
    }

    #[test]
    fn test_distance() {
        let (tree, ids) = tree_with(&["r0", "r0/s0", "r1", "r1/s0"]);
        let root = tree.root();
        assert_eq!(tree.distance(ids[1], ids[1]).unwrap(), 0);
        assert_eq!(tree.distance(ids[1], ids[0]).unwrap(), 1);
        assert_eq!(tree.distance(ids[1], ids[3]).unwrap(), 4);
        assert_eq!(tree.distance(ids[1], root).unwrap(), 2);
        assert_eq!(tree.distance(root, ids[2]).unwrap(), 1);
        assert_eq!(
            tree.lowest_common_ancestor(ids[1], ids[3]).unwrap(),
            root
        );
    }

    #[test]
    fn test_distance_across_trees_fails() {
        let (tree_a, ids_a) = tree_with(&["a"]);
        let (tree_b, ids_b) = tree_with(&["a"]);
        assert_eq!(
            tree_a.distance(ids_a[0], ids_b[0]),
            Err(ConfigError::NoCommonAncestor)
        );
        assert_eq!(
            tree_b.lowest_common_ancestor(ids_a[0], ids_b[0]),
            Err(ConfigError::NoCommonAncestor)
        );
    }

    #[test]
    fn test_numeric_sibling_keys_collide() {
        let mut tree = ConfigTree::new();
        let root = tree.root();
        tree.add_node(root, "s:1").unwrap();
        assert_eq!(
            tree.add_node(root, "s:01"),
            Err(ConfigError::GroupAlreadyExists("s:01".to_owned()))
        );
        let names = tree.children_names(root).unwrap();
        assert_eq!(names, vec!["s:1".to_owned()]);
    }

    #[test]
    fn test_snapshot_paste() {
        let (mut tree, ids) = tree_with(&["a", "a/b"]);
        tree.add_parameter(ids[1], "p").unwrap();
        tree.set_parameter(ids[1], "p", "v").unwrap();
        let snap = tree.snapshot(ids[0]).unwrap();
        let root = tree.root();
        let dest = tree.add_node(root, "copy").unwrap();
        tree.paste(dest, &snap).unwrap();
        let copied = tree.get_node(root, "copy/b").unwrap();
        assert_eq!(tree.parameter(copied, "p").unwrap(), "v");
    }

    #[test]
    fn test_deep_copy_is_independent() {
        let (tree, ids) = tree_with(&["a"]);
        let copy = tree.deep_copy().unwrap();
        assert!(copy.node_exists(copy.root(), "a"));
        // Ids of the source tree do not resolve in the copy
        assert!(copy.name(ids[0]).is_err());
    }
}
