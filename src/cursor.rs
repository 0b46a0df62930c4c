//! Positioned traversal over a tree.
//!
//! A cursor is a stack of `(node, index)` frames from the root down to
//! whatever node the cursor currently considers "current" — which, unlike a
//! plain iterator, need not be a leaf: the differ deliberately keeps cursors
//! at interior levels as long as both sides stay aligned, only descending
//! (via [`split`](crate::diff::PatchGenerator)) when it needs finer
//! granularity. Frames are value-stacked (`Vec<Frame>`), never a
//! child-to-parent ownership cycle, so ascending to a parent is O(1) and
//! does not require an arena.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::hash::NodeHash;
use crate::node::{Node, NodeStore};
use crate::order::KeyOrder;

#[derive(Debug, Clone)]
struct Frame {
    node: Arc<Node>,
    idx: usize,
}

/// A positioned traversal over a tree, with its parent chain.
#[derive(Debug, Clone)]
pub struct Cursor {
    frames: Vec<Frame>,
}

impl Cursor {
    /// Positions the cursor at entry 0 of `root`, with an empty parent
    /// chain. A cursor over an empty root is immediately invalid.
    pub fn new_at_root(root: Arc<Node>) -> Self {
        Cursor { frames: vec![Frame { node: root, idx: 0 }] }
    }

    /// The sentinel cursor for an empty side of a diff: always invalid,
    /// never descends into anything.
    pub fn empty() -> Self {
        Cursor { frames: Vec::new() }
    }

    /// Descends the tree seeking the smallest entry whose key is `>= key`.
    /// The resulting cursor may be invalid (past the end of the tree).
    pub fn new_at_key<S: NodeStore, O: KeyOrder>(
        store: &S,
        root: Arc<Node>,
        key: &[u8],
        order: &O,
    ) -> Result<Self> {
        let mut cursor = Cursor { frames: Vec::new() };
        let mut node = root;
        loop {
            let idx = search(&node, key, order);
            let level = node.level();
            let past_end = idx >= node.len();
            cursor.frames.push(Frame { node: node.clone(), idx });
            if past_end || level == 0 {
                break;
            }
            let (hash, _) = node.child_at(idx).expect("interior entry has a child");
            node = store.resolve(hash)?;
        }
        Ok(cursor)
    }

    /// True iff the cursor references an extant entry.
    pub fn valid(&self) -> bool {
        match self.frames.last() {
            Some(f) => f.idx < f.node.len(),
            None => false,
        }
    }

    /// The node level of the current position.
    pub fn level(&self) -> u8 {
        self.frames.last().map(|f| f.node.level()).unwrap_or(0)
    }

    pub fn current_key(&self) -> &[u8] {
        let f = self.frames.last().expect("valid() checked by caller");
        f.node.key_at(f.idx)
    }

    pub fn current_value(&self) -> Option<&[u8]> {
        let f = self.frames.last()?;
        f.node.value_at(f.idx)
    }

    pub fn current_ref(&self) -> Option<(NodeHash, u64)> {
        let f = self.frames.last()?;
        f.node.child_at(f.idx).map(|(h, c)| (*h, c))
    }

    /// True iff the cursor is at the last entry of its current node.
    pub fn at_node_end(&self) -> bool {
        match self.frames.last() {
            Some(f) => f.idx + 1 >= f.node.len(),
            None => true,
        }
    }

    /// Moves to the next entry in full leaf-to-leaf traversal order: when
    /// the current node is exhausted, ascends to the parent, advances it,
    /// and descends to the new leftmost entry (possibly through several
    /// levels).
    pub fn advance<S: NodeStore>(&mut self, store: &S) -> Result<()> {
        self.step_sibling();
        while self.valid() && self.level() > 0 {
            self.descend_leftmost(store)?;
        }
        Ok(())
    }

    /// Moves to the next entry at the *current* level without forcing a
    /// descent to leaf level: if the node is exhausted, ascends to the
    /// parent and advances it, stopping there. This is a deliberate,
    /// documented extension beyond the plain iterator contract in
    /// `spec.md` §4.2 — the differ needs it to step through interior-level
    /// siblings (added/removed/modified *ranges*) without re-diving into
    /// already-accounted-for leaves. See `DESIGN.md`.
    pub(crate) fn step_sibling(&mut self) {
        loop {
            match self.frames.last_mut() {
                None => return,
                Some(top) => {
                    top.idx += 1;
                    if top.idx < top.node.len() {
                        return;
                    }
                    self.frames.pop();
                    if self.frames.is_empty() {
                        return;
                    }
                }
            }
        }
    }

    /// Descends into the child referenced by the current entry, pushing a
    /// new frame positioned at its first entry. The caller must ensure the
    /// cursor is valid and at an interior level.
    pub(crate) fn descend_into_current_child<S: NodeStore>(&mut self, store: &S) -> Result<()> {
        let hash = {
            let top = self.frames.last().expect("valid interior cursor");
            match top.node.child_at(top.idx) {
                Some((hash, _)) => hash,
                None => return Err(Error::IllegalSplit),
            }
        };
        let child = store.resolve(hash)?;
        self.frames.push(Frame { node: child, idx: 0 });
        Ok(())
    }

    fn descend_leftmost<S: NodeStore>(&mut self, store: &S) -> Result<()> {
        self.descend_into_current_child(store)
    }

    /// Restores the cursor to the smallest position `>= key`, ascending
    /// first if `key` is past the current node's range, then descending
    /// back down to leaf level. Used by the applier to realign to a
    /// mutation point.
    pub fn seek<S: NodeStore, O: KeyOrder>(&mut self, store: &S, key: &[u8], order: &O) -> Result<()> {
        while self.frames.len() > 1 {
            let covers = match self.frames.last().unwrap().node.max_key() {
                Some(mk) => order.compare(mk, key) != Ordering::Less,
                None => false,
            };
            if covers {
                break;
            }
            self.frames.pop();
        }
        if self.frames.is_empty() {
            return Ok(());
        }
        loop {
            let (level, past_end) = {
                let top = self.frames.last_mut().unwrap();
                let idx = search(&top.node, key, order);
                top.idx = idx;
                (top.node.level(), idx >= top.node.len())
            };
            if level == 0 || past_end {
                break;
            }
            self.descend_into_current_child(store)?;
        }
        Ok(())
    }

    /// Returns a copy of the current position, independent of `self`.
    pub fn snapshot(&self) -> Cursor {
        self.clone()
    }
}

/// Smallest index `i` such that `node.key_at(i) >= key` under `order`.
fn search(node: &Node, key: &[u8], order: &impl KeyOrder) -> usize {
    let mut lo = 0usize;
    let mut hi = node.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if order.compare(node.key_at(mid), key) == Ordering::Less {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}
