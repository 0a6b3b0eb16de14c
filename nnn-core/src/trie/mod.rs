//! Name-keyed prefix trie with a pluggable admission/eviction policy.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. Every node keeps a
//! back-reference to its parent, which is what path reconstruction and the
//! removal-safe successor walk rely on. A handle carries the generation of the
//! slot it was issued for, so a handle to an erased node stays dead even after
//! the slot is reused.
//!
//! Traversal is pre-order with children visited in ascending component order,
//! which yields nodes in ascending [`Name`] order.

pub mod policy;

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;

use log::trace;

use crate::name::{Name, NameComponent};

pub use policy::{Admission, CountingPolicy, LruPolicy, PolicyKind, TriePolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrieError {
    #[error("Table is full ({0} entries)")]
    Full(usize),
    #[error("Node handle {0} is no longer valid")]
    StaleHandle(NodeId),
}

/// Outcome of [`Trie::insert_with`].
#[derive(Debug, PartialEq, Eq)]
pub struct Inserted<P> {
    pub id: NodeId,
    /// `false` when the name already held a payload.
    pub created: bool,
    /// Payload the policy evicted to make room, if any.
    pub evicted: Option<P>,
}

#[derive(Debug)]
struct Node<P> {
    component: Option<NameComponent>,
    parent: Option<NodeId>,
    children: BTreeMap<NameComponent, NodeId>,
    payload: Option<P>,
    depth: usize,
}

impl<P> Node<P> {
    fn root() -> Self {
        Self {
            component: None,
            parent: None,
            children: BTreeMap::new(),
            payload: None,
            depth: 0,
        }
    }

    fn is_prunable(&self) -> bool {
        self.payload.is_none() && self.children.is_empty()
    }
}

#[derive(Debug)]
struct Slot<P> {
    generation: u32,
    node: Option<Node<P>>,
}

#[derive(Debug)]
pub struct Trie<P> {
    slots: Vec<Slot<P>>,
    free: Vec<u32>,
    root: NodeId,
    payloads: usize,
    policy: Box<dyn TriePolicy>,
}

impl<P> Default for Trie<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Trie<P> {
    /// Create a trie with an unbounded [`CountingPolicy`].
    pub fn new() -> Self {
        Self::with_policy(Box::new(CountingPolicy::unbounded()))
    }

    pub fn with_policy(policy: Box<dyn TriePolicy>) -> Self {
        Self {
            slots: vec![Slot {
                generation: 0,
                node: Some(Node::root()),
            }],
            free: Vec::new(),
            root: NodeId::new(0, 0),
            payloads: 0,
            policy,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn policy(&self) -> &dyn TriePolicy {
        self.policy.as_ref()
    }

    /// Number of nodes holding a payload.
    pub fn len(&self) -> usize {
        self.payloads
    }

    pub fn is_empty(&self) -> bool {
        self.payloads == 0
    }

    /// Number of live nodes, including the root and empty interior nodes.
    pub fn node_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    fn node(&self, id: NodeId) -> Option<&Node<P>> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node<P>> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    /// Whether `id` still refers to a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn get(&self, id: NodeId) -> Option<&P> {
        self.node(id).and_then(|node| node.payload.as_ref())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut P> {
        self.node_mut(id).and_then(|node| node.payload.as_mut())
    }

    pub fn depth(&self, id: NodeId) -> Option<usize> {
        self.node(id).map(|node| node.depth)
    }

    /// Reconstruct the name of a node by walking up to the root.
    pub fn name_of(&self, id: NodeId) -> Option<Name> {
        let mut components = Vec::with_capacity(self.node(id)?.depth);
        let mut current = self.node(id)?;
        while let Some(parent) = current.parent {
            components.extend(current.component.clone());
            current = self.node(parent)?;
        }
        components.reverse();
        Some(Name { components })
    }

    fn alloc(&mut self, node: Node<P>) -> NodeId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                NodeId::new(index, slot.generation)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeId::new(index, 0)
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        if let Some(slot) = self.slots.get_mut(id.index as usize) {
            if slot.generation == id.generation && slot.node.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(id.index);
            }
        }
    }

    /// Walk `name` and return the deepest node reached plus whether every
    /// component was consumed.
    fn walk(&self, name: &Name) -> (NodeId, bool) {
        let mut current = self.root;
        for component in name {
            let next = self
                .node(current)
                .and_then(|node| node.children.get(component))
                .copied();
            match next {
                Some(child) => current = child,
                None => return (current, false),
            }
        }
        (current, true)
    }

    /// Exact-match lookup. Only nodes holding a payload are returned; a missing
    /// component never falls back to a shorter prefix.
    pub fn find_exact(&self, name: &Name) -> Option<NodeId> {
        match self.walk(name) {
            (id, true) if self.get(id).is_some() => Some(id),
            _ => None,
        }
    }

    /// Deepest node along `name` that holds a payload.
    pub fn longest_prefix_match(&self, name: &Name) -> Option<NodeId> {
        let mut current = self.root;
        let mut best = self.get(current).map(|_| current);
        for component in name {
            let next = self
                .node(current)
                .and_then(|node| node.children.get(component))
                .copied();
            match next {
                Some(child) => {
                    current = child;
                    if self.get(child).is_some() {
                        best = Some(child);
                    }
                }
                None => break,
            }
        }
        best
    }

    /// Report a read of `id` to the policy.
    pub fn touch(&mut self, id: NodeId) {
        if self.get(id).is_some() {
            self.policy.on_access(id);
        }
    }

    /// Attach a payload built by `make` at `name`, creating intermediate nodes.
    ///
    /// The policy is consulted only for new payloads and may evict another
    /// payload, which is handed back to the caller, or reject the insert.
    pub fn insert_with<F>(&mut self, name: &Name, make: F) -> Result<Inserted<P>, TrieError>
    where
        F: FnOnce() -> P,
    {
        if let Some(id) = self.find_exact(name) {
            return Ok(Inserted {
                id,
                created: false,
                evicted: None,
            });
        }

        let evicted = match self.policy.admit() {
            Admission::Admit => None,
            Admission::Evict(victim) => {
                trace!("trie policy evicts {victim} to admit {name}");
                self.erase(victim)
            }
            Admission::Reject => return Err(TrieError::Full(self.payloads)),
        };

        let mut current = self.root;
        for (depth, component) in name.iter().enumerate() {
            let existing = self
                .node(current)
                .and_then(|node| node.children.get(component))
                .copied();
            current = match existing {
                Some(child) => child,
                None => {
                    let child = self.alloc(Node {
                        component: Some(component.clone()),
                        parent: Some(current),
                        children: BTreeMap::new(),
                        payload: None,
                        depth: depth + 1,
                    });
                    if let Some(parent) = self.node_mut(current) {
                        parent.children.insert(component.clone(), child);
                    }
                    child
                }
            };
        }

        if let Some(node) = self.node_mut(current) {
            node.payload = Some(make());
        }
        self.payloads += 1;
        self.policy.on_insert(current);
        Ok(Inserted {
            id: current,
            created: true,
            evicted,
        })
    }

    /// Apply `mutator` to the payload of `id` in place. Trie shape is untouched.
    pub fn modify<R, F>(&mut self, id: NodeId, mutator: F) -> Option<R>
    where
        F: FnOnce(&mut P) -> R,
    {
        self.node_mut(id)
            .and_then(|node| node.payload.as_mut())
            .map(mutator)
    }

    /// Detach the payload of `id` and prune the now-empty chain of ancestors
    /// below the root.
    pub fn erase(&mut self, id: NodeId) -> Option<P> {
        let payload = self.node_mut(id).and_then(|node| node.payload.take());
        if payload.is_some() {
            self.payloads -= 1;
            self.policy.on_erase(id);
        }
        self.prune(id);
        payload
    }

    fn prune(&mut self, id: NodeId) {
        let mut current = id;
        while current != self.root {
            let (parent, component) = match self.node(current) {
                Some(node) if node.is_prunable() => (node.parent, node.component.clone()),
                _ => return,
            };
            if let (Some(parent), Some(component)) = (parent, component) {
                if let Some(parent_node) = self.node_mut(parent) {
                    parent_node.children.remove(&component);
                }
                self.release(current);
                current = parent;
            } else {
                return;
            }
        }
    }

    pub fn clear(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate().skip(1) {
            if slot.node.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
            }
        }
        if let Some(root) = self.slots.first_mut() {
            root.node = Some(Node::root());
        }
        self.payloads = 0;
        self.policy.clear();
    }

    /// Next node after `id` in pre-order, computed from parent links only.
    pub fn successor(&self, id: NodeId) -> Option<NodeId> {
        let node = self.node(id)?;
        if let Some(&child) = node.children.values().next() {
            return Some(child);
        }

        let mut current = node;
        loop {
            let parent = self.node(current.parent?)?;
            let component = current.component.as_deref()?;
            let sibling = parent
                .children
                .range::<[u8], _>((Bound::Excluded(component), Bound::Unbounded))
                .next();
            if let Some((_, &sibling)) = sibling {
                return Some(sibling);
            }
            current = parent;
        }
    }

    /// First node holding a payload strictly after `from` in pre-order, or the
    /// first one overall when `from` is `None`.
    ///
    /// Callers that erase while walking capture the successor before erasing
    /// the current node.
    pub fn next_payload(&self, from: Option<NodeId>) -> Option<NodeId> {
        let mut cursor = match from {
            Some(id) => self.successor(id),
            None => Some(self.root),
        };
        while let Some(id) = cursor {
            if self.get(id).is_some() {
                return Some(id);
            }
            cursor = self.successor(id);
        }
        None
    }

    /// Pre-order iteration over every node, including payload-empty ones.
    pub fn nodes(&self) -> Nodes<'_, P> {
        Nodes {
            trie: self,
            next: Some(self.root),
        }
    }

    /// Pre-order iteration over payload-holding nodes.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &P)> + '_ {
        self.nodes()
            .filter_map(move |id| self.get(id).map(|payload| (id, payload)))
    }
}

pub struct Nodes<'a, P> {
    trie: &'a Trie<P>,
    next: Option<NodeId>,
}

impl<'a, P> Iterator for Nodes<'a, P> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.trie.successor(current);
        Some(current)
    }
}
