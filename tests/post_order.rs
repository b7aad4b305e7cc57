//! Every process posts all receives of a sub-iteration before its sends, and
//! the posted sends and receives pair up across processes.
mod util;

use halo_sieve::algs::communicator::PostEvent;
use halo_sieve::prelude::*;
use util::*;

fn record(cfg: &PatternConfig) -> Vec<PostEvent> {
    let n = cfg.process_grid.iter().product();
    let log = PostLog::new();
    let results = universe(n).run(|comm| run_stencil_pattern(&RecordingComm::new(comm, log.clone()), cfg));
    for r in results {
        r.unwrap();
    }
    log.events()
}

fn sub_iter_of(ev: &PostEvent) -> usize {
    ev.tag.as_u16() as usize / 6
}

fn check_receives_precede_sends(events: &[PostEvent], ranks: usize) {
    for rank in 0..ranks {
        let mine: Vec<_> = events.iter().filter(|e| e.rank == rank).collect();
        for (k, ev) in mine.iter().enumerate() {
            if ev.kind != OpKind::Send {
                continue;
            }
            let later_recv = mine[k + 1..]
                .iter()
                .take_while(|e| sub_iter_of(e) == sub_iter_of(ev))
                .any(|e| e.kind == OpKind::Recv);
            assert!(!later_recv, "rank {rank} posted a receive after a send: {ev:?}");
        }
    }
}

/// Each send `(from, to, tag)` must match a receive posted by `to` naming `from`.
fn check_sends_match_receives(events: &[PostEvent]) {
    let sends: Vec<_> = events
        .iter()
        .filter(|e| e.kind == OpKind::Send)
        .map(|e| (e.rank, e.peer, e.tag))
        .collect();
    let recvs: Vec<_> = events
        .iter()
        .filter(|e| e.kind == OpKind::Recv)
        .map(|e| (e.peer, e.rank, e.tag))
        .collect();
    assert_permutation(&sends, &recvs);
}

#[test]
fn strict_waiting_keeps_post_order() {
    let cfg = config([2, 1, 1], 3, 1.0, WaitGranularity::PerSubIteration);
    let events = record(&cfg);
    // 2 iterations × 3 sub-iterations × one face per rank × 2 ranks, each way
    assert_eq!(events.len(), 24);
    check_receives_precede_sends(&events, 2);
    check_sends_match_receives(&events);
}

#[test]
fn pipelined_waiting_keeps_post_order() {
    let cfg = config([2, 1, 1], 3, 1.0, WaitGranularity::PerIteration);
    let events = record(&cfg);
    assert_eq!(events.len(), 24);
    check_receives_precede_sends(&events, 2);
    check_sends_match_receives(&events);

    // nothing is waited on between sub-iterations, so a rank's posts run
    // through sub-iterations 0, 1, 2 in order within each iteration
    let rank0: Vec<_> = events.iter().filter(|e| e.rank == 0).map(sub_iter_of).collect();
    assert_eq!(rank0, [0, 0, 1, 1, 2, 2, 0, 0, 1, 1, 2, 2]);
}

#[test]
fn partial_fraction_on_a_larger_grid_matches_up() {
    let policies = [SelectionPolicy::Cycling, SelectionPolicy::Seeded { seed: 7 }];
    for wait in [WaitGranularity::PerSubIteration, WaitGranularity::PerIteration] {
        for selection in policies {
            // one outer iteration, so a tag names its sub-iteration unambiguously
            let cfg = PatternConfig {
                iterations: 1,
                selection,
                ..config([3, 2, 2], 4, 0.5, wait)
            };
            let events = record(&cfg);
            check_receives_precede_sends(&events, 12);
            check_sends_match_receives(&events);
        }
    }
}
