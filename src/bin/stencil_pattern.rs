//! cargo mpirun -n 8 --features mpi-support --bin stencil_pattern -- 10 4 1.0 8 2 2 2 32 32 32 --wait per-sub-iteration
//!
//! MPI driver for the 3D stencil halo-exchange pattern. Positional arguments
//! are `iterations n_sub_iters fraction payload px py pz gx gy gz`; `--config` loads a JSON
//! `PatternConfig` instead.

use clap::{Parser, ValueEnum};
use mpi::collective::SystemOperation;
use mpi::traits::CommunicatorCollectives;
use std::path::PathBuf;
use std::process;

use halo_sieve::prelude::*;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum WaitArg {
    PerSubIteration,
    PerIteration,
}

impl From<WaitArg> for WaitGranularity {
    fn from(w: WaitArg) -> Self {
        match w {
            WaitArg::PerSubIteration => WaitGranularity::PerSubIteration,
            WaitArg::PerIteration => WaitGranularity::PerIteration,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON file holding a full PatternConfig
    #[arg(long, conflicts_with_all = ["iterations", "wait"])]
    config: Option<PathBuf>,
    /// Outer iterations
    #[arg(required_unless_present = "config")]
    iterations: Option<usize>,
    /// Sub-iterations per outer iteration
    #[arg(required_unless_present = "config")]
    n_sub_iters: Option<usize>,
    /// Fraction of eligible faces active per sub-iteration
    #[arg(required_unless_present = "config")]
    fraction: Option<f64>,
    /// Bytes per grid cell
    #[arg(required_unless_present = "config")]
    payload_size: Option<usize>,
    #[arg(required_unless_present = "config")]
    px: Option<usize>,
    #[arg(required_unless_present = "config")]
    py: Option<usize>,
    #[arg(required_unless_present = "config")]
    pz: Option<usize>,
    #[arg(required_unless_present = "config")]
    gx: Option<usize>,
    #[arg(required_unless_present = "config")]
    gy: Option<usize>,
    #[arg(required_unless_present = "config")]
    gz: Option<usize>,
    /// When to wait for posted operations
    #[arg(long, value_enum, required_unless_present = "config")]
    wait: Option<WaitArg>,
    /// Wrap neighbors around the process grid
    #[arg(long)]
    periodic: bool,
    /// Use seeded per-link selection instead of cycling
    #[arg(long)]
    seed: Option<u64>,
    /// Verify every received payload
    #[arg(long)]
    verify: bool,
}

impl Args {
    fn into_config(self) -> Result<PatternConfig, String> {
        if let Some(path) = self.config {
            let text = std::fs::read_to_string(&path).map_err(|e| format!("{}: {e}", path.display()))?;
            return serde_json::from_str(&text).map_err(|e| format!("{}: {e}", path.display()));
        }
        let missing = || "missing positional argument".to_string();
        let mut cfg = PatternConfig::stencil_3d(
            self.iterations.ok_or_else(missing)?,
            self.n_sub_iters.ok_or_else(missing)?,
            self.fraction.ok_or_else(missing)?,
            self.payload_size.ok_or_else(missing)?,
            [
                self.px.ok_or_else(missing)?,
                self.py.ok_or_else(missing)?,
                self.pz.ok_or_else(missing)?,
            ],
            [
                self.gx.ok_or_else(missing)?,
                self.gy.ok_or_else(missing)?,
                self.gz.ok_or_else(missing)?,
            ],
            self.wait.ok_or_else(missing)?.into(),
        );
        cfg.periodic = self.periodic;
        cfg.verify_payload = self.verify;
        if let Some(seed) = self.seed {
            cfg.selection = SelectionPolicy::Seeded { seed };
        }
        Ok(cfg)
    }
}

fn main() {
    env_logger::init();
    let cfg = match Args::parse().into_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            process::exit(2);
        }
    };

    let comm = match MpiComm::new() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("MPI initialization failed: {e}");
            process::exit(1);
        }
    };
    let rank = comm.rank();

    let (report, failure) = match run_stencil_pattern(&comm, &cfg) {
        Ok(report) => (report, None),
        Err(PartialRun { report, source }) => (report, Some(source)),
    };

    let local = report.elapsed.as_secs_f64();
    let mut slowest = 0.0f64;
    comm.world
        .all_reduce_into(&local, &mut slowest, SystemOperation::max());

    if let Some(e) = &failure {
        eprintln!("[rank {rank}] aborted: {e}");
    }
    if rank == 0 {
        println!("iterations           {}", report.iterations_completed);
        println!("sub-iterations       {}", report.sub_iterations_completed);
        println!("sends/recvs (rank 0) {}/{}", report.sends_posted, report.receives_posted);
        println!("bytes out/in         {}/{}", report.bytes_sent, report.bytes_received);
        println!("elapsed (max rank)   {slowest:.6} s");
        if let Some(mean) = report.mean_iteration_time() {
            println!("mean iteration       {:.3} us", mean.as_secs_f64() * 1e6);
        }
    }
    if failure.is_some() {
        // finalize MPI before leaving
        drop(comm);
        process::exit(1);
    }
}
