//! Re-export public algorithms.

pub mod communicator;
pub mod participation;
pub mod request_pool;
pub mod run;
pub mod scheduler;

pub use run::{PartialRun, RunReport, run_stencil_pattern};
