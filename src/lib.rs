//! Structural diff-and-patch engine for content-addressed, ordered prolly
//! trees.
//!
//! A prolly tree is an N-ary search tree with a structure similar to a B+
//! tree, except it does not balance itself through rotations: it uses a
//! pseudo-random value seeded on `(level, key)` pairs and a size-dependent
//! threshold to decide node boundaries instead. Two trees holding the same
//! keys end up structurally identical no matter how they were built —
//! *unicity* — which is what lets this crate diff two trees in time
//! proportional to how much actually changed between them, not to their
//! size.
//!
//! The pieces:
//! - [`node`] / [`hash`]: immutable, content-addressed nodes and their
//!   canonical byte encoding.
//! - [`cursor`]: positioned traversal, usable at any tree level.
//! - [`chunker`]: streaming tree builder with content-defined splits.
//! - [`diff`]: the dual-cursor differ ([`diff::PatchGenerator`]); build one
//!   with [`diff::PatchGenerator::from_roots`], which positions both sides
//!   at the root of their respective trees.
//! - [`patch`]: the wire format of one diff step.
//! - [`buffer`]: a cancellable channel for streaming a patch sequence.
//! - [`apply`]: replays a patch stream against a base tree.
//!
//! Out of scope: a CLI, the on-disk archive/page format a production
//! [`node::NodeStore`] would be backed by, SQL-engine integration,
//! import/export formats, and any auth/network/replication layer — see
//! `DESIGN.md`.

pub mod apply;
pub mod buffer;
pub mod chunker;
pub mod cursor;
pub mod diff;
pub mod error;
pub mod hash;
pub mod node;
pub mod order;
pub mod patch;

pub use apply::apply_patches;
pub use chunker::{ChunkPolicy, Chunker, RollingHashPolicy};
pub use cursor::Cursor;
pub use diff::PatchGenerator;
pub use error::{Error, Result};
pub use hash::{NodeHash, NodeHasher, XxHasher};
pub use node::{MemoryNodeStore, Node, NodeEntry, NodeStore, Payload};
pub use order::{ByteOrder, KeyOrder};
pub use patch::{DiffType, Patch, PatchValue};
