//! Thin façade over intra-process (simulated ranks) or inter-process (MPI)
//! message passing.
//!
//! Messages are *contiguous byte buffers*. Sends take a shared [`Bytes`]
//! handle; receives take ownership of the destination `Vec<u8>` and give it
//! back from [`Wait::wait`], so a buffer cannot be touched while its
//! operation is in flight. All handles are **waitable** but non-blocking to
//! post; suspension happens only in `test`/`wait`.

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::pattern_error::{OpKind, PatternError};
use crate::topology::face::Face;

/// Number of sub-iterations that get distinct tags before tags wrap.
///
/// `TAG_WINDOW * 6` stays below 32767, the smallest tag upper bound MPI guarantees.
pub const TAG_WINDOW: usize = 5000;

/// Message tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommTag(u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        CommTag(tag)
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Tag of the message sent across `sender_face` in sub-iteration `sub_iter`.
    ///
    /// The receiver passes the opposite of its own face, so both sides agree.
    /// Distinct faces get distinct tags even when both lead to the same peer.
    pub fn for_face(sub_iter: usize, sender_face: Face) -> Self {
        CommTag(((sub_iter % TAG_WINDOW) * 6 + sender_face.index()) as u16)
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// What a completed operation hands back.
    type Output;

    /// Poll for completion without blocking.
    fn test(&mut self) -> Result<bool, PatternError>;

    /// Block until completion.
    fn wait(self) -> Result<Self::Output, PatternError>;
}

/// Non-blocking point-to-point communication interface.
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait<Output = ()>;
    /// Handle returned by `irecv`; yields the filled buffer.
    type RecvHandle: Wait<Output = Vec<u8>>;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: CommTag, buf: Bytes) -> Result<Self::SendHandle, PatternError>;
    fn irecv(&self, peer: usize, tag: CommTag, buf: Vec<u8>) -> Result<Self::RecvHandle, PatternError>;
}

impl Wait for () {
    type Output = ();
    fn test(&mut self) -> Result<bool, PatternError> {
        Ok(true)
    }
    fn wait(self) -> Result<(), PatternError> {
        Ok(())
    }
}

/// Compile-time no-op comm for a single serial process.
///
/// A lone process in an open grid has no neighbors and never posts; any post
/// is reported as a transport failure.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

/// Receive handle of [`NoComm`]; never constructed.
#[derive(Debug)]
pub enum NoRecv {}

impl Wait for NoRecv {
    type Output = Vec<u8>;
    fn test(&mut self) -> Result<bool, PatternError> {
        match *self {}
    }
    fn wait(self) -> Result<Vec<u8>, PatternError> {
        match self {}
    }
}

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = NoRecv;

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, peer: usize, _tag: CommTag, _buf: Bytes) -> Result<(), PatternError> {
        Err(PatternError::transport(peer, "NoComm cannot send"))
    }
    fn irecv(&self, peer: usize, _tag: CommTag, _buf: Vec<u8>) -> Result<NoRecv, PatternError> {
        Err(PatternError::transport(peer, "NoComm cannot receive"))
    }
}

// --- LocalComm: intra-process / one thread per simulated rank ---
type Key = (usize, usize, u16); // (src, dst, tag)

/// FIFO per key keeps point-to-point messages non-overtaking, as in MPI.
#[derive(Default)]
struct Mailbox {
    queues: DashMap<Key, VecDeque<Bytes>>,
}

impl Mailbox {
    fn push(&self, key: Key, msg: Bytes) {
        self.queues.entry(key).or_default().push_back(msg);
    }

    /// Drained queues are dropped so the map only holds keys with mail.
    fn pop(&self, key: &Key) -> Option<Bytes> {
        let msg = self.queues.get_mut(key).and_then(|mut q| q.pop_front());
        if msg.is_some() {
            self.queues.remove_if(key, |_, q| q.is_empty());
        }
        msg
    }
}

/// A set of simulated ranks sharing one mailbox.
#[derive(Clone)]
pub struct LocalUniverse {
    size: usize,
    timeout: Option<Duration>,
    mailbox: Arc<Mailbox>,
}

impl LocalUniverse {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            timeout: None,
            mailbox: Arc::new(Mailbox::default()),
        }
    }

    /// Receives that stay unmatched for `timeout` fail with a transport error
    /// instead of spinning forever.
    pub fn with_timeout(size: usize, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::new(size)
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn comm(&self, rank: usize) -> LocalComm {
        LocalComm {
            rank,
            size: self.size,
            timeout: self.timeout,
            mailbox: self.mailbox.clone(),
        }
    }

    /// Run `f` once per rank, each on its own thread, and collect the results
    /// in rank order.
    pub fn run<F, R>(&self, f: F) -> Vec<R>
    where
        F: Fn(LocalComm) -> R + Sync,
        R: Send,
    {
        std::thread::scope(|s| {
            let handles: Vec<_> = (0..self.size)
                .map(|rank| {
                    let comm = self.comm(rank);
                    let f = &f;
                    s.spawn(move || f(comm))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(r) => r,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }
}

/// One simulated rank of a [`LocalUniverse`].
#[derive(Clone)]
pub struct LocalComm {
    rank: usize,
    size: usize,
    timeout: Option<Duration>,
    mailbox: Arc<Mailbox>,
}

impl LocalComm {
    fn check_peer(&self, peer: usize) -> Result<(), PatternError> {
        if peer < self.size {
            Ok(())
        } else {
            Err(PatternError::transport(
                peer,
                format!("rank {peer} outside a universe of {}", self.size),
            ))
        }
    }
}

pub struct LocalRecvHandle {
    mailbox: Arc<Mailbox>,
    key: Key,
    buf: Vec<u8>,
    done: bool,
    deadline: Option<Instant>,
}

impl Wait for LocalRecvHandle {
    type Output = Vec<u8>;

    fn test(&mut self) -> Result<bool, PatternError> {
        if self.done {
            return Ok(true);
        }
        let peer = self.key.0;
        match self.mailbox.pop(&self.key) {
            Some(msg) if msg.len() == self.buf.len() => {
                self.buf.copy_from_slice(&msg);
                self.done = true;
                Ok(true)
            }
            Some(msg) => Err(PatternError::transport(
                peer,
                format!("expected {} bytes, got {}", self.buf.len(), msg.len()),
            )),
            None if self.deadline.is_some_and(|d| Instant::now() >= d) => Err(
                PatternError::transport(peer, format!("receive with tag {} timed out", self.key.2)),
            ),
            None => Ok(false),
        }
    }

    fn wait(mut self) -> Result<Vec<u8>, PatternError> {
        while !self.test()? {
            std::thread::yield_now();
        }
        Ok(self.buf)
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();
    type RecvHandle = LocalRecvHandle;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: CommTag, buf: Bytes) -> Result<(), PatternError> {
        self.check_peer(peer)?;
        self.mailbox.push((self.rank, peer, tag.as_u16()), buf);
        Ok(())
    }

    fn irecv(&self, peer: usize, tag: CommTag, buf: Vec<u8>) -> Result<LocalRecvHandle, PatternError> {
        self.check_peer(peer)?;
        Ok(LocalRecvHandle {
            mailbox: self.mailbox.clone(),
            key: (peer, self.rank, tag.as_u16()),
            buf,
            done: false,
            deadline: self.timeout.map(|t| Instant::now() + t),
        })
    }
}

// --- RecordingComm: post-order instrumentation ---

/// One post observed by a [`RecordingComm`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PostEvent {
    pub rank: usize,
    pub kind: OpKind,
    pub peer: usize,
    pub tag: CommTag,
}

/// Globally ordered post log, shareable across simulated ranks.
#[derive(Clone, Default)]
pub struct PostLog(Arc<Mutex<Vec<PostEvent>>>);

impl PostLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, ev: PostEvent) {
        self.0.lock().push(ev);
    }

    /// Snapshot of all events so far, in post order.
    pub fn events(&self) -> Vec<PostEvent> {
        self.0.lock().clone()
    }
}

/// Wraps a communicator and logs every post before forwarding it.
#[derive(Clone)]
pub struct RecordingComm<C> {
    inner: C,
    log: PostLog,
}

impl<C: Communicator> RecordingComm<C> {
    pub fn new(inner: C, log: PostLog) -> Self {
        Self { inner, log }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: Communicator> Communicator for RecordingComm<C> {
    type SendHandle = C::SendHandle;
    type RecvHandle = C::RecvHandle;

    fn rank(&self) -> usize {
        self.inner.rank()
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn isend(&self, peer: usize, tag: CommTag, buf: Bytes) -> Result<Self::SendHandle, PatternError> {
        self.log.push(PostEvent {
            rank: self.rank(),
            kind: OpKind::Send,
            peer,
            tag,
        });
        self.inner.isend(peer, tag, buf)
    }

    fn irecv(&self, peer: usize, tag: CommTag, buf: Vec<u8>) -> Result<Self::RecvHandle, PatternError> {
        self.log.push(PostEvent {
            rank: self.rank(),
            kind: OpKind::Recv,
            peer,
            tag,
        });
        self.inner.irecv(peer, tag, buf)
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::environment::Universe;
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::{Communicator as _, Destination, Equivalence, Source};

    /// World communicator of an initialized MPI environment.
    ///
    /// Finalizes MPI when dropped.
    pub struct MpiComm {
        pub world: SimpleCommunicator,
        rank: usize,
        size: usize,
        _universe: Universe,
    }

    impl MpiComm {
        pub fn new() -> Result<Self, PatternError> {
            let universe = mpi::initialize()
                .ok_or_else(|| PatternError::transport(0, "MPI is already initialized"))?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                world,
                rank,
                size,
                _universe: universe,
            })
        }
    }

    pub struct MpiSendHandle {
        req: Option<Request<'static, [u8], StaticScope>>,
        // dropped after `req`
        _buf: Bytes,
    }

    impl Wait for MpiSendHandle {
        type Output = ();

        fn test(&mut self) -> Result<bool, PatternError> {
            match self.req.take() {
                None => Ok(true),
                Some(r) => match r.test() {
                    Ok(_) => Ok(true),
                    Err(r) => {
                        self.req = Some(r);
                        Ok(false)
                    }
                },
            }
        }

        fn wait(mut self) -> Result<(), PatternError> {
            if let Some(r) = self.req.take() {
                r.wait();
            }
            Ok(())
        }
    }

    impl Drop for MpiSendHandle {
        fn drop(&mut self) {
            if let Some(r) = self.req.take() {
                r.wait();
            }
        }
    }

    pub struct MpiRecvHandle {
        req: Option<Request<'static, [u8], StaticScope>>,
        peer: usize,
        buf: Vec<u8>,
    }

    impl MpiRecvHandle {
        fn check(&self, status: mpi::point_to_point::Status) -> Result<(), PatternError> {
            let got = status.count(u8::equivalent_datatype()) as usize;
            if got == self.buf.len() {
                Ok(())
            } else {
                Err(PatternError::transport(
                    self.peer,
                    format!("expected {} bytes, got {got}", self.buf.len()),
                ))
            }
        }
    }

    impl Wait for MpiRecvHandle {
        type Output = Vec<u8>;

        fn test(&mut self) -> Result<bool, PatternError> {
            match self.req.take() {
                None => Ok(true),
                Some(r) => match r.test() {
                    Ok(status) => self.check(status).map(|_| true),
                    Err(r) => {
                        self.req = Some(r);
                        Ok(false)
                    }
                },
            }
        }

        fn wait(mut self) -> Result<Vec<u8>, PatternError> {
            if let Some(r) = self.req.take() {
                let status = r.wait();
                self.check(status)?;
            }
            Ok(std::mem::take(&mut self.buf))
        }
    }

    impl Drop for MpiRecvHandle {
        fn drop(&mut self) {
            // MPI may still write into `buf`; it must outlive the request.
            if let Some(r) = self.req.take() {
                r.wait();
            }
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: CommTag, buf: Bytes) -> Result<MpiSendHandle, PatternError> {
            // SAFETY: the handle owns `buf` and completes the request before
            // releasing it, so the slice outlives the send.
            let data: &'static [u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr(), buf.len()) };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, data, tag.as_u16() as i32);
            Ok(MpiSendHandle {
                req: Some(req),
                _buf: buf,
            })
        }

        fn irecv(&self, peer: usize, tag: CommTag, mut buf: Vec<u8>) -> Result<MpiRecvHandle, PatternError> {
            // SAFETY: the heap block of `buf` does not move when the Vec is moved
            // into the handle, and it is not accessed until the request completes.
            let data: &'static mut [u8] =
                unsafe { std::slice::from_raw_parts_mut(buf.as_mut_ptr(), buf.len()) };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_receive_into_with_tag(StaticScope, data, tag.as_u16() as i32);
            Ok(MpiRecvHandle {
                req: Some(req),
                peer,
                buf,
            })
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::face::{Axis, Sign};

    #[test]
    fn local_roundtrip_two_ranks() {
        let uni = LocalUniverse::new(2);
        let comm0 = uni.comm(0);
        let comm1 = uni.comm(1);

        // On rank 1: post the receive for data from peer 0 with tag 7
        let recv_handle = comm1.irecv(0, CommTag::new(7), vec![0u8; 4]).unwrap();

        // On rank 0: send the 4 bytes [1,2,3,4] to peer 1 with tag 7
        let send_handle = comm0
            .isend(1, CommTag::new(7), Bytes::from_static(&[1, 2, 3, 4]))
            .unwrap();
        send_handle.wait().unwrap();

        let data = recv_handle.wait().expect("Expected to receive data from rank 0");
        assert_eq!(&data, &[1, 2, 3, 4]);
    }

    #[test]
    fn same_key_messages_stay_in_order() {
        let uni = LocalUniverse::new(2);
        let (a, b) = (uni.comm(0), uni.comm(1));
        a.isend(1, CommTag::new(1), Bytes::from_static(&[1])).unwrap();
        a.isend(1, CommTag::new(1), Bytes::from_static(&[2])).unwrap();
        let first = b.irecv(0, CommTag::new(1), vec![0]).unwrap().wait().unwrap();
        let second = b.irecv(0, CommTag::new(1), vec![0]).unwrap().wait().unwrap();
        assert_eq!((first[0], second[0]), (1, 2));
    }

    #[test]
    fn drained_queues_leave_the_mailbox() {
        let uni = LocalUniverse::new(2);
        let (a, b) = (uni.comm(0), uni.comm(1));
        for t in 0..50u16 {
            a.isend(1, CommTag::new(t), Bytes::from_static(&[9])).unwrap();
        }
        a.isend(1, CommTag::new(0), Bytes::from_static(&[9])).unwrap();
        assert_eq!(uni.mailbox.queues.len(), 50);
        for t in 0..50u16 {
            b.irecv(0, CommTag::new(t), vec![0]).unwrap().wait().unwrap();
        }
        // tag 0 still holds its second message
        assert_eq!(uni.mailbox.queues.len(), 1);
        b.irecv(0, CommTag::new(0), vec![0]).unwrap().wait().unwrap();
        assert!(uni.mailbox.queues.is_empty());
    }

    #[test]
    fn length_mismatch_is_a_transport_failure() {
        let uni = LocalUniverse::new(2);
        uni.comm(0)
            .isend(1, CommTag::new(3), Bytes::from_static(&[1, 2]))
            .unwrap();
        let err = uni
            .comm(1)
            .irecv(0, CommTag::new(3), vec![0; 4])
            .unwrap()
            .wait()
            .unwrap_err();
        assert!(matches!(err, PatternError::TransportFailure { neighbor: 0, .. }));
    }

    #[test]
    fn unmatched_receive_times_out() {
        let uni = LocalUniverse::with_timeout(2, Duration::from_millis(20));
        let mut h = uni.comm(1).irecv(0, CommTag::new(9), vec![0; 1]).unwrap();
        assert!(!h.test().unwrap());
        assert!(h.wait().is_err());
    }

    #[test]
    fn no_comm_rejects_posts() {
        assert!(NoComm.isend(0, CommTag::new(0), Bytes::new()).is_err());
        assert!(NoComm.irecv(0, CommTag::new(0), Vec::new()).is_err());
    }

    #[test]
    fn face_tags_are_distinct_within_a_window() {
        let plus = Face::new(Axis::X, Sign::Plus);
        assert_ne!(CommTag::for_face(0, plus), CommTag::for_face(0, plus.opposite()));
        assert_ne!(CommTag::for_face(0, plus), CommTag::for_face(1, plus));
        assert_eq!(CommTag::for_face(TAG_WINDOW, plus), CommTag::for_face(0, plus));
    }

    #[test]
    fn recording_comm_logs_in_post_order() {
        let uni = LocalUniverse::new(1);
        let log = PostLog::new();
        let c = RecordingComm::new(uni.comm(0), log.clone());
        let r = c.irecv(0, CommTag::new(2), vec![0; 1]).unwrap();
        c.isend(0, CommTag::new(2), Bytes::from_static(&[5])).unwrap();
        assert_eq!(r.wait().unwrap(), vec![5]);
        let kinds: Vec<_> = log.events().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, [OpKind::Recv, OpKind::Send]);
    }
}
