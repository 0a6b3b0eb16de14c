//! Admission and eviction policies attached to a [`Trie`](super::Trie).
//!
//! A policy only sees node handles. It is told when a payload is attached,
//! detached or read, and it decides whether a new payload may be attached.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::NodeId;

/// Decision returned by [`TriePolicy::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    /// Erase the payload at this node first, then admit.
    Evict(NodeId),
    Reject,
}

pub trait TriePolicy: fmt::Debug + Send {
    /// Asked before a payload is attached to a node that has none.
    fn admit(&mut self) -> Admission;

    fn on_insert(&mut self, node: NodeId);

    fn on_erase(&mut self, node: NodeId);

    fn on_access(&mut self, _node: NodeId) {}

    fn clear(&mut self);

    /// Number of payloads the policy is tracking.
    fn size(&self) -> usize;

    fn max_size(&self) -> Option<usize>;
}

/// Counts payloads and refuses new ones once `max_size` is reached.
#[derive(Debug, Clone, Default)]
pub struct CountingPolicy {
    max_size: Option<usize>,
    size: usize,
}

impl CountingPolicy {
    pub fn new(max_size: Option<usize>) -> Self {
        Self { max_size, size: 0 }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }
}

impl TriePolicy for CountingPolicy {
    fn admit(&mut self) -> Admission {
        match self.max_size {
            Some(max) if self.size >= max => Admission::Reject,
            _ => Admission::Admit,
        }
    }

    fn on_insert(&mut self, _node: NodeId) {
        self.size += 1;
    }

    fn on_erase(&mut self, _node: NodeId) {
        self.size = self.size.saturating_sub(1);
    }

    fn clear(&mut self) {
        self.size = 0;
    }

    fn size(&self) -> usize {
        self.size
    }

    fn max_size(&self) -> Option<usize> {
        self.max_size
    }
}

/// Evicts the least recently inserted or accessed payload when full.
#[derive(Debug, Clone, Default)]
pub struct LruPolicy {
    max_size: Option<usize>,
    tick: u64,
    stamps: HashMap<NodeId, u64>,
    by_age: BTreeMap<u64, NodeId>,
}

impl LruPolicy {
    pub fn new(max_size: Option<usize>) -> Self {
        Self {
            max_size,
            ..Self::default()
        }
    }

    fn stamp(&mut self, node: NodeId) {
        self.tick += 1;
        if let Some(old) = self.stamps.insert(node, self.tick) {
            self.by_age.remove(&old);
        }
        self.by_age.insert(self.tick, node);
    }
}

impl TriePolicy for LruPolicy {
    fn admit(&mut self) -> Admission {
        match self.max_size {
            Some(max) if self.stamps.len() >= max => match self.by_age.values().next() {
                Some(&victim) => Admission::Evict(victim),
                None => Admission::Reject,
            },
            _ => Admission::Admit,
        }
    }

    fn on_insert(&mut self, node: NodeId) {
        self.stamp(node);
    }

    fn on_erase(&mut self, node: NodeId) {
        if let Some(stamp) = self.stamps.remove(&node) {
            self.by_age.remove(&stamp);
        }
    }

    fn on_access(&mut self, node: NodeId) {
        if self.stamps.contains_key(&node) {
            self.stamp(node);
        }
    }

    fn clear(&mut self) {
        self.stamps.clear();
        self.by_age.clear();
    }

    fn size(&self) -> usize {
        self.stamps.len()
    }

    fn max_size(&self) -> Option<usize> {
        self.max_size
    }
}

/// Policy selector used by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    #[default]
    Counting,
    Lru,
}

impl PolicyKind {
    pub fn build(self, max_size: Option<usize>) -> Box<dyn TriePolicy> {
        match self {
            PolicyKind::Counting => Box::new(CountingPolicy::new(max_size)),
            PolicyKind::Lru => Box::new(LruPolicy::new(max_size)),
        }
    }
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "counting" => Ok(PolicyKind::Counting),
            "lru" => Ok(PolicyKind::Lru),
            other => Err(format!("unknown trie policy: {other}")),
        }
    }
}
