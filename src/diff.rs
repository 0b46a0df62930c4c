//! The structural differ: walks two trees in lockstep and emits the
//! smallest set of [`Patch`]es that turns one into the other.
//!
//! Two cursors are kept one per side. Before every comparison the higher of
//! the two is `split()` (descended one level) until both sit at the same
//! level — this is the resolution of the "interior-patch level mismatch"
//! question the source spec leaves open (see `DESIGN.md`): once levels are
//! equalized, the three-way (`Less`/`Equal`/`Greater`) dispatch below only
//! ever compares cursors at matched granularity.

use std::cmp::Ordering;
use std::sync::Arc;

use log::trace;

use crate::cursor::Cursor;
use crate::error::Result;
use crate::node::{Node, NodeStore};
use crate::order::KeyOrder;
use crate::patch::{Patch, PatchValue};

/// Dual-cursor structural differ over two (possibly different) node stores.
pub struct PatchGenerator<'s, SF: NodeStore, ST: NodeStore, O: KeyOrder> {
    store_from: &'s SF,
    store_to: &'s ST,
    order: O,
    from: Cursor,
    to: Cursor,
    prev_end_key: Vec<u8>,
}

impl<'s, SF: NodeStore, ST: NodeStore, O: KeyOrder> PatchGenerator<'s, SF, ST, O> {
    pub fn new(store_from: &'s SF, store_to: &'s ST, from: Cursor, to: Cursor, order: O) -> Self {
        PatchGenerator { store_from, store_to, order, from, to, prev_end_key: Vec::new() }
    }

    /// Builds a generator positioned at the root of each side, per spec.md
    /// §4.4 ("initialized at root of each side") and the `PatchGeneratorFromRoots`
    /// constructor required by spec.md §6. This is the entry point real
    /// callers should use: starting at root (rather than descended to leaf
    /// level via [`Cursor::new_at_key`]) is what lets `equalize_levels` ever
    /// have work to do, which is what lets the dispatch in
    /// `find_next_patch` emit interior-level patches instead of degrading
    /// to one leaf patch per key.
    pub fn from_roots(store_from: &'s SF, store_to: &'s ST, root_from: Arc<Node>, root_to: Arc<Node>, order: O) -> Self {
        Self::new(store_from, store_to, Cursor::new_at_root(root_from), Cursor::new_at_root(root_to), order)
    }

    /// Descends whichever cursor is at the higher level, so the main
    /// dispatch never has to compare across levels.
    fn equalize_levels(&mut self) -> Result<()> {
        loop {
            if !self.from.valid() || !self.to.valid() {
                return Ok(());
            }
            match self.from.level().cmp(&self.to.level()) {
                Ordering::Greater => self.from.descend_into_current_child(self.store_from)?,
                Ordering::Less => self.to.descend_into_current_child(self.store_to)?,
                Ordering::Equal => return Ok(()),
            }
        }
    }

    fn step(cursor: &mut Cursor, store: &impl NodeStore) -> Result<()> {
        if cursor.level() == 0 {
            cursor.advance(store)
        } else {
            cursor.step_sibling();
            Ok(())
        }
    }

    fn emit(&mut self, end_key: Vec<u8>, from: Option<PatchValue>, to: Option<PatchValue>, subtree_count: u64, level: u8) -> Patch {
        let patch = Patch {
            end_key: end_key.clone(),
            key_below_start: self.prev_end_key.clone(),
            from,
            to,
            subtree_count,
            level,
        };
        self.prev_end_key = end_key;
        trace!("diff: emitted {:?} patch up to {:?}", patch.diff_type(), patch.end_key);
        patch
    }

    fn current_from_value(&self) -> PatchValue {
        if self.from.level() == 0 {
            PatchValue::Value(self.from.current_value().expect("leaf has a value").to_vec())
        } else {
            let (hash, count) = self.from.current_ref().expect("interior entry has a ref");
            PatchValue::Ref { hash, subtree_count: count }
        }
    }

    fn current_to_value(&self) -> PatchValue {
        if self.to.level() == 0 {
            PatchValue::Value(self.to.current_value().expect("leaf has a value").to_vec())
        } else {
            let (hash, count) = self.to.current_ref().expect("interior entry has a ref");
            PatchValue::Ref { hash, subtree_count: count }
        }
    }

    fn from_subtree_count(&self) -> u64 {
        if self.from.level() == 0 { 1 } else { self.from.current_ref().expect("ref").1 }
    }

    fn to_subtree_count(&self) -> u64 {
        if self.to.level() == 0 { 1 } else { self.to.current_ref().expect("ref").1 }
    }

    /// Produces the next patch, or `Patch::terminator()` once both sides are
    /// exhausted. Calling it again after a terminator keeps returning
    /// terminators.
    pub fn find_next_patch(&mut self) -> Result<Patch> {
        loop {
            match (self.from.valid(), self.to.valid()) {
                (false, false) => return Ok(Patch::terminator()),
                (true, false) => {
                    let key = self.from.current_key().to_vec();
                    let level = self.from.level();
                    let count = self.from_subtree_count();
                    let value = self.current_from_value();
                    Self::step(&mut self.from, self.store_from)?;
                    return Ok(self.emit(key, Some(value), None, count, level));
                }
                (false, true) => {
                    let key = self.to.current_key().to_vec();
                    let level = self.to.level();
                    let count = self.to_subtree_count();
                    let value = self.current_to_value();
                    Self::step(&mut self.to, self.store_to)?;
                    return Ok(self.emit(key, None, Some(value), count, level));
                }
                (true, true) => {
                    self.equalize_levels()?;
                    if !self.from.valid() || !self.to.valid() {
                        continue; // one side ran out while descending; loop re-dispatches above
                    }
                    let level = self.from.level();
                    let c = self.order.compare(self.from.current_key(), self.to.current_key());
                    match c {
                        Ordering::Equal => {
                            if level == 0 {
                                let fv = self.from.current_value().expect("leaf value");
                                let tv = self.to.current_value().expect("leaf value");
                                if fv == tv {
                                    Self::step(&mut self.from, self.store_from)?;
                                    Self::step(&mut self.to, self.store_to)?;
                                    continue;
                                }
                                let key = self.from.current_key().to_vec();
                                let fval = self.current_from_value();
                                let tval = self.current_to_value();
                                Self::step(&mut self.from, self.store_from)?;
                                Self::step(&mut self.to, self.store_to)?;
                                return Ok(self.emit(key, Some(fval), Some(tval), 1, level));
                            } else {
                                let (fh, fc) = self.from.current_ref().expect("ref");
                                let (th, _tc) = self.to.current_ref().expect("ref");
                                if fh == th {
                                    Self::step(&mut self.from, self.store_from)?;
                                    Self::step(&mut self.to, self.store_to)?;
                                    continue;
                                }
                                // Hashes differ at matched level: descend both one level
                                // finer and keep looking for the smallest differing range.
                                let _ = fc;
                                self.from.descend_into_current_child(self.store_from)?;
                                self.to.descend_into_current_child(self.store_to)?;
                                continue;
                            }
                        }
                        Ordering::Less => {
                            // `from`'s current range ends before `to`'s: it has no
                            // counterpart yet, so it was removed.
                            let key = self.from.current_key().to_vec();
                            let count = self.from_subtree_count();
                            let value = self.current_from_value();
                            Self::step(&mut self.from, self.store_from)?;
                            return Ok(self.emit(key, Some(value), None, count, level));
                        }
                        Ordering::Greater => {
                            let key = self.to.current_key().to_vec();
                            let count = self.to_subtree_count();
                            let value = self.current_to_value();
                            Self::step(&mut self.to, self.store_to)?;
                            return Ok(self.emit(key, None, Some(value), count, level));
                        }
                    }
                }
            }
        }
    }
}

/// Adapts [`PatchGenerator`] to a plain iterator of patches, stopping at the
/// first terminator instead of yielding it.
impl<'s, SF: NodeStore, ST: NodeStore, O: KeyOrder> Iterator for PatchGenerator<'s, SF, ST, O> {
    type Item = Result<Patch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.find_next_patch() {
            Ok(p) if p.is_terminator() => None,
            Ok(p) => Some(Ok(p)),
            Err(e) => Some(Err(e)),
        }
    }
}
