#![allow(dead_code)]
use std::time::Duration;

use halo_sieve::prelude::*;

/// Generous bound so a mismatched pattern fails the test instead of hanging it.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(10);

pub fn universe(size: usize) -> LocalUniverse {
    LocalUniverse::with_timeout(size, RECV_TIMEOUT)
}

pub fn config(
    process_grid: [usize; 3],
    n_sub_iters: usize,
    fraction: f64,
    wait: WaitGranularity,
) -> PatternConfig {
    PatternConfig {
        verify_payload: true,
        ..PatternConfig::stencil_3d(2, n_sub_iters, fraction, 2, process_grid, [3, 4, 5], wait)
    }
}

/// Run `cfg` on one simulated rank per grid cell and return every rank's result.
pub fn run_all(cfg: &PatternConfig) -> Vec<Result<RunReport, PartialRun>> {
    let n = cfg.process_grid.iter().product();
    universe(n).run(|comm| run_stencil_pattern(&comm, cfg))
}

/// Assert vec is a permutation of another vec (order-agnostic).
pub fn assert_permutation<T: Ord + Clone + std::fmt::Debug>(got: &[T], want: &[T]) {
    let mut a = got.to_vec();
    a.sort_unstable();
    let mut b = want.to_vec();
    b.sort_unstable();
    assert_eq!(a, b, "not a permutation\n got={:?}\nwant={:?}", got, want);
}
