use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use halo_sieve::prelude::*;

// 2×2×2 periodic cube of simulated ranks; every rank sees all six faces
fn bench_halo_exchange(c: &mut Criterion) {
    let mut group = c.benchmark_group("local-halo-exchange");

    for &(extent, wait) in &[
        (8, WaitGranularity::PerSubIteration),
        (8, WaitGranularity::PerIteration),
        (32, WaitGranularity::PerSubIteration),
        (32, WaitGranularity::PerIteration),
    ] {
        let cfg = PatternConfig {
            periodic: true,
            ..PatternConfig::stencil_3d(4, 4, 1.0, 8, [2, 2, 2], [extent; 3], wait)
        };
        let universe = LocalUniverse::new(8);

        group.bench_with_input(
            BenchmarkId::new(format!("g{extent}"), format!("{wait:?}")),
            &cfg,
            |b, cfg| {
                b.iter(|| {
                    for r in universe.run(|comm| run_stencil_pattern(&comm, cfg)) {
                        let _ = r.unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_halo_exchange);
criterion_main!(benches);
