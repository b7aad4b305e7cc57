//! `run_stencil_pattern`: set up topology and buffers, run the timed
//! iteration loop, report counts and elapsed time.

use std::time::{Duration, Instant};
use thiserror::Error;

use crate::algs::communicator::Communicator;
use crate::algs::scheduler::PatternScheduler;
use crate::config::PatternConfig;
use crate::data::exchange_buffers::ExchangeBufferSet;
use crate::pattern_error::PatternError;
use crate::topology::cartesian::ProcessTopology;

/// Counters and timings of one run (or of the part of it that completed).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunReport {
    pub iterations_completed: usize,
    pub sub_iterations_completed: usize,
    pub sends_posted: usize,
    pub receives_posted: usize,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Wall time of the iteration loop; setup and allocation are excluded.
    pub elapsed: Duration,
    pub per_iteration: Vec<Duration>,
}

impl RunReport {
    pub fn mean_iteration_time(&self) -> Option<Duration> {
        let n = u32::try_from(self.per_iteration.len()).ok().filter(|&n| n > 0)?;
        Some(self.per_iteration.iter().sum::<Duration>() / n)
    }

    /// Bytes sent and received per second of loop time.
    pub fn bandwidth_bytes_per_sec(&self) -> Option<f64> {
        let secs = self.elapsed.as_secs_f64();
        (secs > 0.0).then(|| (self.bytes_sent + self.bytes_received) as f64 / secs)
    }
}

/// A run aborted by an error, with the progress made before it.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("run aborted after {} complete iteration(s): {source}", .report.iterations_completed)]
pub struct PartialRun {
    pub report: RunReport,
    #[source]
    pub source: PatternError,
}

/// Execute the configured halo-exchange pattern on `comm`.
///
/// The process grid must contain exactly `comm.size()` processes; this rank's
/// place in it is `comm.rank()`.
///
/// # Errors
/// A [`PartialRun`] carrying the first error and the counters accumulated up
/// to it. Setup errors ([`PatternError::InvalidParameters`],
/// [`PatternError::InvalidTopology`]) occur before any buffer is allocated.
pub fn run_stencil_pattern<C: Communicator>(comm: &C, config: &PatternConfig) -> Result<RunReport, PartialRun> {
    let mut report = RunReport::default();
    match run_into(comm, config, &mut report) {
        Ok(()) => Ok(report),
        Err(source) => {
            log::error!(
                "rank {}: halo exchange aborted in iteration {}: {source}",
                comm.rank(),
                report.iterations_completed
            );
            Err(PartialRun { report, source })
        }
    }
}

fn run_into<C: Communicator>(comm: &C, config: &PatternConfig, report: &mut RunReport) -> Result<(), PatternError> {
    config.validate()?;
    let topology = ProcessTopology::new(config.process_grid, config.periodic, comm.size(), comm.rank())?;
    let mut buffers = ExchangeBufferSet::new(
        config.grid_extents,
        config.payload_size,
        config.buffer_slots(),
        comm.rank(),
    )?;

    if comm.rank() == 0 {
        log::info!(
            "halo exchange: {} iteration(s) × {} sub-iteration(s), f = {}, grid {:?}{}, extents {:?}, {} B/cell, {:?}, {:?}",
            config.iterations,
            config.n_sub_iters,
            config.participation_fraction,
            config.process_grid,
            if config.periodic { " periodic" } else { "" },
            config.grid_extents,
            config.payload_size,
            config.wait_granularity,
            config.selection,
        );
        if config.n_sub_iters == 0 || config.participation_fraction == 0.0 {
            log::warn!("configuration exchanges no messages");
        }
    }
    log::debug!(
        "rank {} at {}: {} neighbor(s), {} buffer bytes",
        comm.rank(),
        topology.coordinate(),
        topology.available_faces().count(),
        buffers.total_bytes()
    );

    let mut scheduler = PatternScheduler::new(comm, &topology, &mut buffers, config)?;
    let start = Instant::now();
    for it in 0..config.iterations {
        let t0 = Instant::now();
        let result = scheduler.run_iteration(it, report);
        report.elapsed = start.elapsed();
        result?;
        report.per_iteration.push(t0.elapsed());
        report.iterations_completed += 1;
    }

    if comm.rank() == 0 {
        log::info!(
            "halo exchange done: {} iteration(s) in {:?} (mean {:?})",
            report.iterations_completed,
            report.elapsed,
            report.mean_iteration_time().unwrap_or_default()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::config::WaitGranularity;

    #[test]
    fn single_open_process_runs_without_messages() {
        let cfg = PatternConfig::stencil_3d(3, 4, 1.0, 2, [1, 1, 1], [4, 4, 4], WaitGranularity::PerSubIteration);
        let report = run_stencil_pattern(&NoComm, &cfg).unwrap();
        assert_eq!(report.iterations_completed, 3);
        assert_eq!(report.sub_iterations_completed, 12);
        assert_eq!(report.sends_posted + report.receives_posted, 0);
        assert_eq!(report.per_iteration.len(), 3);
    }

    #[test]
    fn failure_keeps_partial_counters() {
        // a periodic single process talks to itself, which NoComm refuses
        let cfg = PatternConfig {
            periodic: true,
            ..PatternConfig::stencil_3d(2, 1, 1.0, 1, [1, 1, 1], [2, 2, 2], WaitGranularity::PerSubIteration)
        };
        let err = run_stencil_pattern(&NoComm, &cfg).unwrap_err();
        assert!(matches!(err.source, PatternError::TransportFailure { .. }));
        assert_eq!(err.report.iterations_completed, 0);
        assert_eq!(err.report.receives_posted, 0);
    }

    #[test]
    fn report_helpers_handle_empty_runs() {
        let r = RunReport::default();
        assert_eq!(r.mean_iteration_time(), None);
        assert_eq!(r.bandwidth_bytes_per_sec(), None);
    }
}
