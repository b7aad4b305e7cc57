//! Run configuration for the halo-exchange pattern.
//!
//! [`WaitGranularity`] has no default; every configuration names one.

use serde::{Deserialize, Serialize};

use crate::algs::communicator::TAG_WINDOW;
use crate::algs::participation::SelectionPolicy;
use crate::data::exchange_buffers::GridExtents;
use crate::pattern_error::PatternError;

/// When the scheduler waits for posted operations.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitGranularity {
    /// Complete every sub-iteration before starting the next one.
    PerSubIteration,
    /// Post all sub-iterations, then wait once at the end of the outer
    /// iteration. Uses one buffer slot per sub-iteration.
    PerIteration,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatternConfig {
    /// Outer repeat count.
    pub iterations: usize,
    /// Exchange rounds per outer iteration.
    pub n_sub_iters: usize,
    /// Share of eligible faces active per round, in `[0, 1]`.
    pub participation_fraction: f64,
    /// Bytes exchanged per grid cell.
    pub payload_size: usize,
    /// `[Px, Py, Pz]`; the product must equal the process count.
    pub process_grid: [usize; 3],
    /// Local block extents `[gx, gy, gz]`.
    pub grid_extents: [usize; 3],
    #[serde(default)]
    pub periodic: bool,
    pub wait_granularity: WaitGranularity,
    #[serde(default)]
    pub selection: SelectionPolicy,
    /// Check every received payload against the sender's pattern.
    #[serde(default)]
    pub verify_payload: bool,
}

impl PatternConfig {
    /// Configuration from the positional benchmark parameters (iterations,
    /// sub-iterations, fraction, payload, process grid, extents, wait mode)
    /// with an open boundary, cycling selection and no verification.
    #[allow(clippy::too_many_arguments)]
    pub fn stencil_3d(
        iterations: usize,
        n_sub_iters: usize,
        participation_fraction: f64,
        payload_size: usize,
        process_grid: [usize; 3],
        grid_extents: [usize; 3],
        wait_granularity: WaitGranularity,
    ) -> Self {
        Self {
            iterations,
            n_sub_iters,
            participation_fraction,
            payload_size,
            process_grid,
            grid_extents,
            periodic: false,
            wait_granularity,
            selection: SelectionPolicy::default(),
            verify_payload: false,
        }
    }

    /// Check scalar parameters. Topology is checked against the actual process
    /// count when the run starts.
    ///
    /// # Errors
    /// [`PatternError::InvalidParameters`] for a fraction outside `[0, 1]` (or NaN),
    /// a zero payload size or extent, or too many sub-iterations for distinct
    /// tags in [`WaitGranularity::PerIteration`] mode.
    pub fn validate(&self) -> Result<(), PatternError> {
        let f = self.participation_fraction;
        if !(0.0..=1.0).contains(&f) {
            return Err(PatternError::InvalidParameters(format!(
                "participation fraction {f} is not in [0, 1]"
            )));
        }
        if self.payload_size == 0 {
            return Err(PatternError::InvalidParameters(
                "payload size must be positive".into(),
            ));
        }
        GridExtents::new(self.grid_extents)?;
        if self.wait_granularity == WaitGranularity::PerIteration && self.n_sub_iters > TAG_WINDOW {
            return Err(PatternError::InvalidParameters(format!(
                "{} sub-iterations exceed the {TAG_WINDOW} that can be outstanding at once",
                self.n_sub_iters
            )));
        }
        Ok(())
    }

    /// Buffer slots a run needs: one per concurrently outstanding sub-iteration.
    pub fn buffer_slots(&self) -> usize {
        match self.wait_granularity {
            WaitGranularity::PerSubIteration => 1,
            WaitGranularity::PerIteration => self.n_sub_iters.max(1),
        }
    }

    /// Slot used by sub-iteration `sub_iter`.
    #[inline]
    pub fn slot_for(&self, sub_iter: usize) -> usize {
        match self.wait_granularity {
            WaitGranularity::PerSubIteration => 0,
            WaitGranularity::PerIteration => sub_iter,
        }
    }
}
