//! Applies an ordered [`Patch`] stream to a base tree, producing a new root.
//!
//! The heavy lifting is the [`Chunker`]: the applier's job is just to turn
//! each patch into the right sequence of chunker calls — copy the
//! untouched prefix up to the patch, consume whatever the base tree had
//! there, and push (or splice) the replacement.

use std::sync::Arc;

use crate::chunker::{ChunkPolicy, Chunker};
use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::hash::NodeHasher;
use crate::node::{Node, NodeStore};
use crate::order::KeyOrder;
use crate::patch::{Patch, PatchValue};

/// Applies `patches` to `root` within `store`, returning the new root.
/// Stops at the first terminator patch (or at iterator exhaustion, for a
/// caller that omits it); patches after that point are never read.
pub fn apply_patches<S, O, P, H>(
    store: &S,
    root: Arc<Node>,
    order: O,
    policy: P,
    hasher: H,
    patches: impl IntoIterator<Item = Result<Patch>>,
) -> Result<Arc<Node>>
where
    S: NodeStore,
    O: KeyOrder + Clone,
    P: ChunkPolicy,
    H: NodeHasher,
{
    let base = Cursor::new_at_root(root);
    let order_check = order.clone();
    let mut chunker = Chunker::new(store, base, order, policy, hasher);

    let mut prev_end_key: Option<Vec<u8>> = None;
    for patch in patches {
        let patch = patch?;
        if patch.is_terminator() {
            break;
        }
        // spec.md §4.6 step 4: each successive patch's end_key must be >= the
        // previous one's, or the stream isn't a valid left-to-right diff.
        if let Some(prev) = &prev_end_key {
            if order_check.compare(&patch.end_key, prev) == std::cmp::Ordering::Less {
                return Err(Error::OrderViolation { prev: prev.clone(), next: patch.end_key.clone() });
            }
        }
        prev_end_key = Some(patch.end_key.clone());
        apply_one(&mut chunker, &patch)?;
    }

    chunker.done()
}

fn apply_one<S, O, P, H>(chunker: &mut Chunker<'_, S, O, P, H>, patch: &Patch) -> Result<()>
where
    S: NodeStore,
    O: KeyOrder,
    P: ChunkPolicy,
    H: NodeHasher,
{
    chunker.advance_to(Some((&patch.end_key, patch.level)))?;

    if patch.from.is_some() {
        chunker.delete_pair(&patch.end_key)?;
    }

    match &patch.to {
        Some(PatchValue::Value(v)) => chunker.add_pair(&patch.end_key, v),
        Some(PatchValue::Ref { hash, subtree_count }) => {
            chunker.insert_node(None, &patch.end_key, *hash, *subtree_count, patch.level)?;
        }
        None => {}
    }
    Ok(())
}
