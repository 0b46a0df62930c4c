//! Crate-wide error type.
//!
//! The engine never retries: a [`NodeStore`](crate::node::NodeStore) failure,
//! an ordering violation in a patch stream, or a logic error (splitting a
//! leaf) all bubble straight up to the caller.

use std::array::TryFromSliceError;
use std::num::TryFromIntError;

/// Errors produced by the diff/apply engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The [`NodeStore`](crate::node::NodeStore) failed to resolve a hash to
    /// a node (missing hash, I/O failure, or corrupt bytes).
    #[error("node store error: {0}")]
    NodeStore(String),

    /// A patch stream violated the monotone `end_key` invariant (I1).
    #[error("patch stream order violation: {prev:?} then {next:?}")]
    OrderViolation { prev: Vec<u8>, next: Vec<u8> },

    /// [`split`](crate::diff::PatchGenerator) was called on a cursor already
    /// at leaf level. Always a logic error in the generator.
    #[error("illegal split at leaf level")]
    IllegalSplit,

    /// The calling context was cancelled; any in-flight generator/apply
    /// state is discardable, and nothing was committed.
    #[error("operation cancelled")]
    Cancelled,

    /// A node's byte encoding could not be decoded.
    #[error("corrupt node encoding: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<TryFromIntError> for Error {
    fn from(err: TryFromIntError) -> Self {
        Error::Corrupt(err.to_string())
    }
}

impl From<TryFromSliceError> for Error {
    fn from(err: TryFromSliceError) -> Self {
        Error::Corrupt(err.to_string())
    }
}
