//! PatternError: unified error type for halo-sieve public APIs
//!
//! Every fallible operation in the crate returns this type. None of the
//! variants are retried internally: a retry would silently distort the
//! timing a benchmark run is measuring.

use crate::topology::face::Face;
use thiserror::Error;

/// Which side of a point-to-point exchange an operation belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpKind {
    Send,
    Recv,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::Send => f.write_str("send"),
            OpKind::Recv => f.write_str("recv"),
        }
    }
}

/// Unified error type for halo-sieve operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PatternError {
    /// Process grid shape does not match the number of participating processes,
    /// or a rank/coordinate lies outside the grid.
    #[error("Invalid topology: process grid {dims:?} does not fit {procs} process(es)")]
    InvalidTopology { dims: [usize; 3], procs: usize },
    /// Non-positive extents or payload, an out-of-range fraction, or a buffer
    /// size that would overflow the addressable range.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
    /// Waiting on an operation that was never posted, belongs to an earlier
    /// epoch, or has already been completed.
    #[error("Invalid handle: {kind} on {face} in sub-iteration {sub_iter} (epoch {epoch}) is not outstanding")]
    InvalidHandle {
        sub_iter: usize,
        face: Face,
        kind: OpKind,
        epoch: u64,
    },
    /// Posting would exceed the bound on concurrently outstanding operations.
    #[error("Request pool exhausted: more than {capacity} outstanding {kind} operation(s)")]
    CapacityExceeded { kind: OpKind, capacity: usize },
    /// The message-passing layer reported an error or delivered a malformed message.
    #[error("Transport failure with rank {neighbor}: {source}")]
    TransportFailure {
        neighbor: usize,
        #[source]
        source: TransportError,
    },
    /// A received payload differs from the sender's synthetic pattern.
    #[error("Payload mismatch from rank {neighbor} on {face}: first differing byte at offset {offset}")]
    PayloadMismatch {
        neighbor: usize,
        face: Face,
        offset: usize,
    },
}

/// Opaque description of a backend failure, kept `Clone` so partial-run
/// reports can carry it around.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<String> for TransportError {
    fn from(s: String) -> Self {
        TransportError(s)
    }
}

impl From<&str> for TransportError {
    fn from(s: &str) -> Self {
        TransportError(s.to_owned())
    }
}

impl PatternError {
    /// Shorthand for a [`PatternError::TransportFailure`].
    pub fn transport(neighbor: usize, msg: impl Into<TransportError>) -> Self {
        PatternError::TransportFailure {
            neighbor,
            source: msg.into(),
        }
    }
}
