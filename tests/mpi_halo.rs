#![cfg(feature = "mpi-support")]
//! Run with `mpirun -n 2 cargo test --features mpi-support --test mpi_halo`.
//! Under a single process the grid collapses to one open rank.

use halo_sieve::prelude::*;
use serial_test::serial;

#[test]
#[serial]
fn halo_exchange_over_mpi_world() {
    let comm = MpiComm::new().unwrap();
    let size = comm.size();
    let cfg = PatternConfig {
        verify_payload: true,
        ..PatternConfig::stencil_3d(3, 4, 1.0, 8, [size, 1, 1], [8, 8, 8], WaitGranularity::PerIteration)
    };
    let report = run_stencil_pattern(&comm, &cfg).unwrap();
    assert_eq!(report.iterations_completed, 3);
    let neighbors = [comm.rank() > 0, comm.rank() + 1 < size]
        .into_iter()
        .filter(|&b| b)
        .count();
    assert_eq!(report.sends_posted, 3 * 4 * neighbors);
    assert_eq!(report.bytes_received, report.bytes_sent);
}
