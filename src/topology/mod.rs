//! Process topology for a 3D block decomposition.
//!
//! This module provides:
//! - [`Axis`], [`Sign`] and [`Face`]: the six (axis, direction) pairs of a block
//! - [`ProcessGrid`]: the `Px × Py × Pz` grid shape and its boundary policy
//! - [`ProcessTopology`]: one rank's coordinate and neighbor set
//!
//! Everything here is pure; each process computes the same global structure
//! locally without communication.

pub mod cartesian;
pub mod face;

pub use cartesian::{Neighbor, ProcessCoordinate, ProcessGrid, ProcessTopology};
pub use face::{Axis, Face, Sign};
