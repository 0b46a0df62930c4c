//! Streaming tree builder with content-defined, re-balancing chunk splits.
//!
//! A [`Chunker`] ingests a left-to-right stream of key/value pairs (or whole
//! subtree references) and re-emits a tree whose node boundaries are a pure
//! function of the leaf sequence — the property that makes two trees with
//! the same leaves structurally identical ("unicity", in the teacher
//! crate's own vocabulary for `storage::prolly`), and lets diffing stop as
//! soon as two subtrees hash equal.

use std::cmp::Ordering;
use std::sync::Arc;

use log::trace;

use crate::cursor::Cursor;
use crate::error::Result;
use crate::hash::{NodeHash, NodeHasher};
use crate::node::{Node, NodeEntry, NodeStore, Payload};
use crate::order::KeyOrder;

/// The boundary-decision and content-hash policy for a chunker. Generalizes
/// the teacher's own `storage::prolly::Policy` trait sketch (same method
/// names, same contract) to the spec's requirement of a pure,
/// allocator-independent split predicate.
pub trait ChunkPolicy {
    /// Returns `true` iff a node boundary should be placed right after the
    /// entry keyed by `key`, given the pending node at `level` already has
    /// `size` entries. Must be a pure function of `(level, key, size)`, and
    /// the implicit threshold must be monotonically non-decreasing in
    /// `size` so runs cannot cascade indefinitely.
    fn boundary(&self, level: u8, key: &[u8], size: usize) -> bool;
}

/// Reference content-defined boundary policy: a pseudo-random value seeded
/// on `(level, key)` compared against a threshold that grows from 0 (at
/// `min_size`) to `target_size` (at `min_size + target_size` entries), and
/// a hard cap at `max_size` to bound worst-case node size.
#[derive(Debug, Clone, Copy)]
pub struct RollingHashPolicy {
    pub min_size: usize,
    pub target_size: usize,
    pub max_size: usize,
}

impl Default for RollingHashPolicy {
    fn default() -> Self {
        RollingHashPolicy { min_size: 2, target_size: 6, max_size: 32 }
    }
}

impl ChunkPolicy for RollingHashPolicy {
    fn boundary(&self, level: u8, key: &[u8], size: usize) -> bool {
        if size >= self.max_size {
            return true;
        }
        if size < self.min_size {
            return false;
        }
        let mut seed_input = Vec::with_capacity(key.len() + 1);
        seed_input.push(level);
        seed_input.extend_from_slice(key);
        let seed = xxhash_rust::xxh3::xxh3_64(&seed_input);
        let value = seed % self.target_size as u64;
        let excess = (size - self.min_size) as u64;
        let threshold = excess.min(self.target_size as u64);
        value < threshold
    }
}

#[derive(Debug, Default)]
struct LevelState {
    pending: Vec<NodeEntry>,
}

/// Streaming builder. Shares bytes with a `base` tree wherever the output
/// hasn't diverged from it yet, and only re-serializes the entries that
/// actually changed.
pub struct Chunker<'s, S: NodeStore, O: KeyOrder, P: ChunkPolicy, H: NodeHasher> {
    store: &'s S,
    order: O,
    policy: P,
    hasher: H,
    base: Cursor,
    levels: Vec<LevelState>,
}

impl<'s, S: NodeStore, O: KeyOrder, P: ChunkPolicy, H: NodeHasher> Chunker<'s, S, O, P, H> {
    /// Initializes a builder positioned at `base`. Up to this cursor
    /// position, output shares the base tree's chunks byte-for-byte — no
    /// bytes are actually copied until [`advance_to`](Self::advance_to) is
    /// called.
    pub fn new(store: &'s S, base: Cursor, order: O, policy: P, hasher: H) -> Self {
        Chunker { store, order, policy, hasher, base, levels: vec![LevelState::default()] }
    }

    fn ensure_level(&mut self, level: u8) {
        while self.levels.len() <= level as usize {
            self.levels.push(LevelState::default());
        }
    }

    fn pending_len(&mut self, level: u8) -> usize {
        self.ensure_level(level);
        self.levels[level as usize].pending.len()
    }

    fn push_leaf_entry(&mut self, key: Vec<u8>, payload: Payload) {
        self.ensure_level(0);
        self.levels[0].pending.push(NodeEntry { key, payload });
        self.maybe_close(0);
    }

    fn maybe_close(&mut self, level: u8) {
        let size = self.levels[level as usize].pending.len();
        if size == 0 {
            return;
        }
        let key = self.levels[level as usize].pending.last().unwrap().key.clone();
        if self.policy.boundary(level, &key, size) {
            self.close_level(level);
        }
    }

    /// Closes out whatever is pending at `level` into a real `Node`,
    /// registers it in the store, and promotes a reference to it into
    /// `level + 1`'s pending list.
    fn close_level(&mut self, level: u8) {
        let entries = std::mem::take(&mut self.levels[level as usize].pending);
        if entries.is_empty() {
            return;
        }
        let node = Node::new(level, entries, &self.hasher);
        let key = node.max_key().expect("non-empty node has a max key").to_vec();
        let hash = node.hash();
        let count = node.total_count();
        trace!("chunker: closed level {level} node {hash} ({count} leaves)");
        self.store.insert(node);
        self.promote(level + 1, key, Payload::Child { hash, subtree_count: count });
    }

    fn promote(&mut self, level: u8, key: Vec<u8>, payload: Payload) {
        self.ensure_level(level);
        self.levels[level as usize].pending.push(NodeEntry { key, payload });
        self.maybe_close(level);
    }

    /// Adds a brand-new key/value pair (the key is absent from the base
    /// tree at this point in the stream).
    pub fn add_pair(&mut self, key: &[u8], value: &[u8]) {
        self.push_leaf_entry(key.to_vec(), Payload::Value(value.to_vec()));
    }

    /// Replaces the value of a key that was present in the base tree. The
    /// caller must have already advanced the builder's base cursor past
    /// this key (via [`advance_to`](Self::advance_to)); the old entry is
    /// consumed from the base stream here, and the new value is emitted in
    /// its place.
    pub fn update_pair<K: AsRef<[u8]>>(&mut self, key: K, value: &[u8]) -> Result<()> {
        self.consume_base_key(key.as_ref())?;
        self.push_leaf_entry(key.as_ref().to_vec(), Payload::Value(value.to_vec()));
        Ok(())
    }

    /// Removes a key (leaf value or whole subtree) that was present in the
    /// base tree. A no-op if the base cursor isn't sitting on a matching
    /// entry (deleting a missing key never fails).
    pub fn delete_pair(&mut self, key: &[u8]) -> Result<()> {
        self.consume_base_key(key)
    }

    /// Advances the base cursor past its current entry if it matches `key`,
    /// without copying it into the output. Used both for plain leaf
    /// deletes and for consuming a whole subtree a patch is about to
    /// replace or remove.
    fn consume_base_key(&mut self, key: &[u8]) -> Result<()> {
        if self.base.valid() && self.base.current_key() == key {
            if self.base.level() == 0 {
                self.base.advance(self.store)?;
            } else {
                self.base.step_sibling();
            }
        }
        Ok(())
    }

    /// Splices a whole subtree reference covering `(from_key, to_key]` into
    /// the output. If the builder's current output level for `level` is
    /// exactly at a chunk boundary (nothing pending), the hash is appended
    /// verbatim with zero re-serialization; otherwise the referenced node
    /// is resolved and its children are recursively re-streamed at the
    /// correct level.
    pub fn insert_node(
        &mut self,
        from_key: Option<&[u8]>,
        to_key: &[u8],
        hash: NodeHash,
        subtree_count: u64,
        level: u8,
    ) -> Result<()> {
        let _ = from_key; // kept for contract fidelity with spec.md §4.3; alignment is the caller's responsibility
        if self.pending_len(level) == 0 {
            trace!("chunker: splicing level {level} subtree {hash} verbatim");
            self.promote(level + 1, to_key.to_vec(), Payload::Child { hash, subtree_count });
            return Ok(());
        }
        let node = self.store.resolve(&hash)?;
        if level == 0 {
            for entry in node.entries() {
                self.push_leaf_entry(entry.key.clone(), entry.payload.clone());
            }
        } else {
            let mut prev_key: Option<Vec<u8>> = from_key.map(|k| k.to_vec());
            for entry in node.entries() {
                let (child_hash, child_count) =
                    entry.payload.as_child().expect("interior entry has a child");
                self.insert_node(prev_key.as_deref(), &entry.key, *child_hash, child_count, level - 1)?;
                prev_key = Some(entry.key.clone());
            }
        }
        Ok(())
    }

    /// Copies entries from the base tree up to (but not including) `target`
    /// into the builder. `target` carries both the key and the level of the
    /// patch driving this advance. `None` drains the base cursor to the end.
    /// Whole untouched subtrees are spliced by hash instead of being
    /// re-walked leaf by leaf whenever the base cursor sits at a clean
    /// boundary.
    ///
    /// When the current interior entry's key exactly matches `target`'s key
    /// *and* its level matches `target`'s level, the entry is exactly the
    /// unit a Modified/Removed range patch is about to replace: this stops
    /// without splicing or descending, leaving the whole entry for the
    /// caller's `delete_pair`/`insert_node` to consume atomically via
    /// `step_sibling`. Without the level check, a leaf-level target whose
    /// key happens to equal a coarser ancestor subtree's boundary key would
    /// wrongly stop here instead of descending for finer granularity.
    pub fn advance_to(&mut self, target: Option<(&[u8], u8)>) -> Result<()> {
        loop {
            if !self.base.valid() {
                return Ok(());
            }

            if self.base.level() == 0 {
                let key = self.base.current_key().to_vec();
                if let Some((tk, _)) = target {
                    if self.order.compare(&key, tk) != Ordering::Less {
                        return Ok(());
                    }
                }
                let value = self.base.current_value().expect("leaf entry has a value").to_vec();
                self.push_leaf_entry(key, Payload::Value(value));
                self.base.advance(self.store)?;
            } else {
                let (hash, count) = self.base.current_ref().expect("interior entry has a ref");
                let entry_key = self.base.current_key().to_vec();
                let level = self.base.level();
                let cmp = target.map(|(tk, _)| self.order.compare(&entry_key, tk));
                let is_replaced_unit =
                    matches!((cmp, target), (Some(Ordering::Equal), Some((_, tl))) if level == tl);
                if is_replaced_unit {
                    return Ok(());
                }
                let splice_whole = matches!(cmp, None | Some(Ordering::Less));
                if splice_whole {
                    self.insert_node(None, &entry_key, hash, count, level)?;
                    self.base.step_sibling();
                } else {
                    self.base.descend_into_current_child(self.store)?;
                }
            }
        }
    }

    /// Finalizes the builder: copies any remainder from the base cursor to
    /// the end, flushes pending chunk boundaries at every level, and
    /// returns the new root node.
    pub fn done(mut self) -> Result<Arc<Node>> {
        self.advance_to(None)?;
        if !self.levels[0].pending.is_empty() {
            self.close_level(0);
        }
        if self.levels.len() == 1 {
            return Ok(Arc::new(Node::empty(0, &self.hasher)));
        }
        let mut level = 1u8;
        loop {
            self.ensure_level(level + 1);
            let this_len = self.levels[level as usize].pending.len();
            let has_above = !self.levels[(level + 1) as usize].pending.is_empty();
            if this_len == 1 && !has_above {
                let entry = self.levels[level as usize].pending.pop().unwrap();
                let hash = entry.payload.as_child().expect("interior entry").0;
                return self.store.resolve(&hash);
            }
            if this_len > 0 {
                self.close_level(level);
            }
            level += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::XxHasher;
    use crate::node::MemoryNodeStore;
    use crate::order::ByteOrder;

    fn build_from_scratch(store: &MemoryNodeStore, pairs: &[(&str, &str)]) -> Arc<Node> {
        let chunker = Chunker::new(store, Cursor::empty(), ByteOrder, RollingHashPolicy::default(), XxHasher);
        let mut chunker = chunker;
        for (k, v) in pairs {
            chunker.add_pair(k.as_bytes(), v.as_bytes());
        }
        chunker.done().unwrap()
    }

    #[test]
    fn empty_stream_produces_empty_leaf() {
        let store = MemoryNodeStore::new();
        let root = build_from_scratch(&store, &[]);
        assert!(root.is_empty());
        assert_eq!(root.level(), 0);
    }

    #[test]
    fn small_stream_stays_a_single_leaf() {
        let store = MemoryNodeStore::new();
        let root = build_from_scratch(&store, &[("a", "1"), ("b", "2")]);
        assert_eq!(root.level(), 0);
        assert_eq!(root.len(), 2);
    }

    #[test]
    fn large_stream_produces_a_multi_level_tree_with_all_keys() {
        let store = MemoryNodeStore::new();
        let pairs: Vec<(String, String)> =
            (0..500).map(|i| (format!("k{i:05}"), format!("v{i}"))).collect();
        let refs: Vec<(&str, &str)> = pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let root = build_from_scratch(&store, &refs);
        assert!(root.level() > 0, "500 entries must not fit in a single leaf");

        // Walk the tree and confirm every key/value survived in order.
        let mut cur = Cursor::new_at_key(&store, root.clone(), &[], &ByteOrder).unwrap();
        let mut out = Vec::new();
        while cur.valid() {
            out.push((cur.current_key().to_vec(), cur.current_value().unwrap().to_vec()));
            cur.advance(&store).unwrap();
        }
        assert_eq!(out.len(), 500);
        for (i, (k, v)) in out.iter().enumerate() {
            assert_eq!(k, refs[i].0.as_bytes());
            assert_eq!(v, refs[i].1.as_bytes());
        }
    }

    #[test]
    fn same_leaves_produce_the_same_root_hash() {
        let store_a = MemoryNodeStore::new();
        let store_b = MemoryNodeStore::new();
        let pairs: Vec<(String, String)> =
            (0..200).map(|i| (format!("k{i:05}"), format!("v{i}"))).collect();
        let refs: Vec<(&str, &str)> = pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let root_a = build_from_scratch(&store_a, &refs);
        let root_b = build_from_scratch(&store_b, &refs);
        assert_eq!(root_a.hash(), root_b.hash());
    }

    #[test]
    fn advance_to_splices_untouched_subtrees_by_hash() {
        let store = MemoryNodeStore::new();
        let pairs: Vec<(String, String)> =
            (0..200).map(|i| (format!("k{i:05}"), format!("v{i}"))).collect();
        let refs: Vec<(&str, &str)> = pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let base_root = build_from_scratch(&store, &refs);
        let before_len = store.len();

        // Rebuild the exact same tree by copying through a base cursor positioned
        // at root: this must not re-insert a fresh copy of every leaf node, only
        // splice the existing top-level subtree references by hash.
        let base_cursor = Cursor::new_at_root(base_root.clone());
        let mut chunker = Chunker::new(&store, base_cursor, ByteOrder, RollingHashPolicy::default(), XxHasher);
        let new_root = chunker.done().unwrap();
        assert_eq!(new_root.hash(), base_root.hash());
        assert_eq!(store.len(), before_len, "splicing by hash must not grow the store");
    }
}
