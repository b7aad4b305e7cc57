#![cfg_attr(docsrs, feature(doc_cfg))]
//! # halo-sieve
//!
//! halo-sieve is a synthetic communication-pattern generator for benchmarking
//! nearest-neighbor ("halo") exchange over a distributed interconnect. It
//! reproduces the communication skeleton of iterative 3D stencil solvers
//! without any numerical work, so latency, bandwidth and message rate can be
//! measured in isolation.
//!
//! ## Features
//! - Cartesian process topology with open or periodic boundaries
//! - Face-sized exchange buffers with a reproducible synthetic payload
//! - Keyed request pool with `wait_all`/`wait_any` and stale-handle detection
//! - Deterministic, pairwise-consistent participation selection
//! - Strict (per sub-iteration) or pipelined (per iteration) waiting
//! - Pluggable communication backends (serial, in-process simulated ranks, MPI)
//!
//! ## Determinism
//!
//! Participation is never sampled from an unseeded source: the cycling rule
//! is a pure function of the topology and sub-iteration, and the seeded rule
//! draws from `SmallRng` seeds taken from configuration. Identical parameters
//! give identical message patterns.
//!
//! ## Usage
//! ```rust
//! use halo_sieve::prelude::*;
//!
//! let cfg = PatternConfig::stencil_3d(
//!     2, 3, 1.0, 8, [2, 1, 1], [4, 4, 4], WaitGranularity::PerSubIteration,
//! );
//! let reports = LocalUniverse::new(2).run(|comm| run_stencil_pattern(&comm, &cfg));
//! for r in reports {
//!     assert_eq!(r.unwrap().sends_posted, 6);
//! }
//! ```
//!
//! Under MPI, enable `mpi-support` and use `MpiComm`, or the
//! `stencil_pattern` binary.

pub mod algs;
pub mod config;
pub mod data;
pub mod debug_invariants;
pub mod pattern_error;
pub mod topology;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{
        CommTag, Communicator, LocalComm, LocalUniverse, NoComm, PostLog, RecordingComm, Wait,
    };
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::participation::{ParticipationSet, SelectionPolicy, select};
    pub use crate::algs::request_pool::{Completion, OpHandle, OpKey, RequestPool};
    pub use crate::algs::run::{PartialRun, RunReport, run_stencil_pattern};
    pub use crate::algs::scheduler::PatternScheduler;
    pub use crate::config::{PatternConfig, WaitGranularity};
    pub use crate::data::exchange_buffers::{BufferRole, ExchangeBufferSet, GridExtents};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::pattern_error::{OpKind, PatternError};
    pub use crate::topology::{
        Axis, Face, Neighbor, ProcessCoordinate, ProcessGrid, ProcessTopology, Sign,
    };
}
