//! Two ranks along x exchange one face and compare it byte for byte.
mod util;

use halo_sieve::prelude::*;
use util::*;

const PX: Face = Face::new(Axis::X, Sign::Plus);
const MX: Face = Face::new(Axis::X, Sign::Minus);

fn fixed_pattern(buf: &mut [u8]) {
    for (k, b) in buf.iter_mut().enumerate() {
        *b = 0xA5 ^ (k as u8);
    }
}

#[test]
fn plus_x_face_arrives_intact_on_the_other_rank() {
    let cfg = PatternConfig::stencil_3d(1, 1, 1.0, 1, [2, 1, 1], [4, 4, 4], WaitGranularity::PerSubIteration);

    let results = universe(2).run(|comm| {
        let topo = ProcessTopology::new(cfg.process_grid, false, comm.size(), comm.rank()).unwrap();
        let mut buffers = ExchangeBufferSet::new(cfg.grid_extents, cfg.payload_size, 1, comm.rank()).unwrap();
        if comm.rank() == 0 {
            buffers.fill_outgoing(0, PX, fixed_pattern).unwrap();
        }
        let sent = buffers.buffer(PX, BufferRole::Outgoing).unwrap().to_vec();

        let mut report = RunReport::default();
        {
            let mut sched = PatternScheduler::new(&comm, &topo, &mut buffers, &cfg).unwrap();
            sched.run_iteration(0, &mut report).unwrap();
        }
        let received = buffers.buffer(MX, BufferRole::Incoming).unwrap().to_vec();
        (topo, sent, received, report)
    });

    let (t0, sent0, _, r0) = &results[0];
    let (t1, _, recv1, r1) = &results[1];
    assert_eq!(sent0.len(), 16);
    let mut want = vec![0u8; 16];
    fixed_pattern(&mut want);
    assert_eq!(sent0, &want);
    assert_eq!(recv1, sent0);

    assert_eq!(t1.neighbor(PX), Neighbor::Absent);
    assert_eq!(t0.neighbor(MX), Neighbor::Absent);
    assert_eq!(t0.neighbor(PX), Neighbor::Rank(1));
    for r in [r0, r1] {
        assert_eq!((r.sends_posted, r.receives_posted), (1, 1));
        assert_eq!((r.bytes_sent, r.bytes_received), (16, 16));
    }
}

#[test]
fn request_pool_wait_all_delivers_the_pattern() {
    let results = universe(2).run(|comm| {
        let topo = ProcessTopology::new([2, 1, 1], false, 2, comm.rank()).unwrap();
        let mut buffers = ExchangeBufferSet::new([4, 4, 4], 1, 1, comm.rank()).unwrap();
        let set = select(&topo, SelectionPolicy::Cycling, 1.0, 0, 0).unwrap();
        assert_eq!(set.len(), 1);

        let mut pool = RequestPool::new(&comm, 6);
        let mut handles = Vec::new();
        for (face, peer) in set.iter() {
            let buf = buffers.take_incoming(0, face).unwrap();
            handles.push(
                pool.post_receive(0, face, peer, CommTag::for_face(0, face.opposite()), buf)
                    .unwrap(),
            );
        }
        for (face, peer) in set.iter() {
            let out = buffers.outgoing(0, face).unwrap();
            handles.push(pool.post_send(0, face, peer, CommTag::for_face(0, face), out).unwrap());
        }
        let done = pool.wait_all(&handles).unwrap();
        assert_eq!(pool.outstanding(), 0);
        assert!(matches!(pool.wait_all(&handles), Err(PatternError::InvalidHandle { .. })));
        done.into_iter()
            .find_map(|c| match c {
                Completion::Received { buf, peer, key } => Some((buf, peer, key.face)),
                Completion::Sent { .. } => None,
            })
            .unwrap()
    });

    let (buf1, peer1, face1) = &results[1];
    assert_eq!((*peer1, *face1), (0, MX));
    let rank0_out = ExchangeBufferSet::new([4, 4, 4], 1, 1, 0).unwrap();
    assert_eq!(&buf1[..], &rank0_out.outgoing(0, PX).unwrap()[..]);

    let (buf0, peer0, face0) = &results[0];
    assert_eq!((*peer0, *face0), (1, PX));
    let rank1_out = ExchangeBufferSet::new([4, 4, 4], 1, 1, 1).unwrap();
    assert_eq!(&buf0[..], &rank1_out.outgoing(0, MX).unwrap()[..]);
}
