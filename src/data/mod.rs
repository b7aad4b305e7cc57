//! Data module: exchange buffers and synthetic payload
#![warn(missing_docs)]

pub mod exchange_buffers;
pub mod payload;

pub use crate::debug_invariants::DebugInvariants;

pub use exchange_buffers::{BufferRole, ExchangeBufferSet, GridExtents};
