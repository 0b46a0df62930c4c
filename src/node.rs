//! Immutable, content-addressed tree nodes, and the store that resolves a
//! hash back to a node.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};
use crate::hash::{NodeHash, NodeHasher};

/// The payload carried by one entry of a node: a value at a leaf, or a
/// reference to a child subtree at an interior node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Value(Vec<u8>),
    Child { hash: NodeHash, subtree_count: u64 },
}

impl Payload {
    pub fn as_value(&self) -> Option<&[u8]> {
        match self {
            Payload::Value(v) => Some(v),
            Payload::Child { .. } => None,
        }
    }

    pub fn as_child(&self) -> Option<(&NodeHash, u64)> {
        match self {
            Payload::Child { hash, subtree_count } => Some((hash, *subtree_count)),
            Payload::Value(_) => None,
        }
    }
}

/// One keyed entry of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEntry {
    pub key: Vec<u8>,
    pub payload: Payload,
}

/// An immutable chunk of the tree: an ordered sequence of keyed entries, all
/// values (level 0) or all child references (level > 0), plus its content
/// hash.
///
/// Every key `k` below child `i` satisfies `key_{i-1} < k <= key_i` — each
/// entry's key is the maximum key of the range it covers, closed on the
/// right and open on the left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    level: u8,
    entries: Vec<NodeEntry>,
    hash: NodeHash,
}

impl Node {
    /// Builds a node from its entries, computing and caching its content
    /// hash via `hasher`. Entries must already be sorted ascending by key;
    /// this is a raw constructor, not a balancing insert.
    pub fn new(level: u8, entries: Vec<NodeEntry>, hasher: &impl NodeHasher) -> Self {
        let hash = hasher.hash_node(level, &entries);
        Node { level, entries, hash }
    }

    pub fn empty(level: u8, hasher: &impl NodeHasher) -> Self {
        Node::new(level, Vec::new(), hasher)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[NodeEntry] {
        &self.entries
    }

    pub fn key_at(&self, i: usize) -> &[u8] {
        &self.entries[i].key
    }

    pub fn value_at(&self, i: usize) -> Option<&[u8]> {
        self.entries[i].payload.as_value()
    }

    pub fn child_at(&self, i: usize) -> Option<(&NodeHash, u64)> {
        self.entries[i].payload.as_child()
    }

    pub fn subtree_size(&self, i: usize) -> u64 {
        match self.entries[i].payload {
            Payload::Child { subtree_count, .. } => subtree_count,
            Payload::Value(_) => 1,
        }
    }

    pub fn max_key(&self) -> Option<&[u8]> {
        self.entries.last().map(|e| e.key.as_slice())
    }

    pub fn hash(&self) -> NodeHash {
        self.hash
    }

    /// Total number of leaves covered by this node (itself, if a leaf; the
    /// sum of children's subtree counts otherwise).
    pub fn total_count(&self) -> u64 {
        if self.level == 0 {
            self.entries.len() as u64
        } else {
            self.entries.iter().map(|e| match e.payload {
                Payload::Child { subtree_count, .. } => subtree_count,
                Payload::Value(_) => 1,
            }).sum()
        }
    }
}

/// Content-addressed resolver from a node's hash to its bytes. Logically
/// read-only within a diff/apply session: nodes are shareable across
/// threads and never mutated once resolved.
pub trait NodeStore: Send + Sync {
    fn resolve(&self, hash: &NodeHash) -> Result<Arc<Node>>;

    /// Stores a freshly built node, making it resolvable by its hash.
    /// Not part of the read contract in `spec.md` §4.1, but every concrete
    /// store needs a way to register nodes that the chunker just built.
    fn insert(&self, node: Node) -> Arc<Node>;
}

/// Reference, in-memory `NodeStore`. Used by tests and as the example store
/// a caller wires the engine against; the on-disk archive/page format that
/// would back a production `NodeStore` is out of this crate's scope (see
/// `spec.md` §1).
#[derive(Debug, Default)]
pub struct MemoryNodeStore {
    nodes: RwLock<HashMap<NodeHash, Arc<Node>>>,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().unwrap().len()
    }
}

impl NodeStore for MemoryNodeStore {
    fn resolve(&self, hash: &NodeHash) -> Result<Arc<Node>> {
        self.nodes
            .read()
            .unwrap()
            .get(hash)
            .cloned()
            .ok_or_else(|| Error::NodeStore(format!("hash not found: {hash}")))
    }

    fn insert(&self, node: Node) -> Arc<Node> {
        let hash = node.hash();
        let arc = Arc::new(node);
        self.nodes.write().unwrap().entry(hash).or_insert_with(|| arc.clone());
        self.nodes.read().unwrap().get(&hash).unwrap().clone()
    }
}
