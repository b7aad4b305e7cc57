//! Bookkeeping for outstanding non-blocking operations.
//!
//! Operations are keyed by `(sub-iteration, face, kind)` instead of a position
//! in a flat request array. Every handle also carries the pool's epoch, so a
//! handle kept across [`RequestPool::reset`] can never complete a later
//! operation that happens to reuse the same key.

use bytes::Bytes;
use std::collections::HashMap;

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::pattern_error::{OpKind, PatternError};
use crate::topology::face::Face;

/// Identity of one operation within an outer iteration.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpKey {
    pub sub_iter: usize,
    pub face: Face,
    pub kind: OpKind,
}

/// Ticket returned when posting; redeemed exactly once by a wait call.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct OpHandle {
    key: OpKey,
    epoch: u64,
}

impl OpHandle {
    #[inline]
    pub fn key(&self) -> OpKey {
        self.key
    }
}

/// Result of a completed operation.
#[derive(Debug, PartialEq, Eq)]
pub enum Completion {
    Sent { key: OpKey, peer: usize, bytes: usize },
    /// The receive's buffer, handed back filled.
    Received { key: OpKey, peer: usize, buf: Vec<u8> },
}

impl Completion {
    pub fn key(&self) -> OpKey {
        match self {
            Completion::Sent { key, .. } | Completion::Received { key, .. } => *key,
        }
    }
}

enum Pending<C: Communicator> {
    Send {
        peer: usize,
        bytes: usize,
        handle: C::SendHandle,
    },
    Recv {
        peer: usize,
        handle: C::RecvHandle,
    },
}

impl<C: Communicator> Pending<C> {
    fn test(&mut self) -> Result<bool, PatternError> {
        match self {
            Pending::Send { handle, .. } => handle.test(),
            Pending::Recv { handle, .. } => handle.test(),
        }
    }

    fn finish(self, key: OpKey) -> Result<Completion, PatternError> {
        match self {
            Pending::Send { peer, bytes, handle } => {
                handle.wait()?;
                Ok(Completion::Sent { key, peer, bytes })
            }
            Pending::Recv { peer, handle } => {
                let buf = handle.wait()?;
                Ok(Completion::Received { key, peer, buf })
            }
        }
    }
}

/// Outstanding sends and receives of one outer iteration.
pub struct RequestPool<'c, C: Communicator> {
    comm: &'c C,
    capacity: usize,
    epoch: u64,
    pending: HashMap<OpKey, Pending<C>>,
    outstanding: [usize; 2],
}

impl<'c, C: Communicator> RequestPool<'c, C> {
    /// A pool admitting at most `capacity` outstanding operations of each kind.
    pub fn new(comm: &'c C, capacity: usize) -> Self {
        Self {
            comm,
            capacity,
            epoch: 0,
            pending: HashMap::with_capacity(2 * capacity),
            outstanding: [0, 0],
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Operations posted and not yet waited on.
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    pub fn outstanding_of(&self, kind: OpKind) -> usize {
        self.outstanding[kind as usize]
    }

    /// Handles of every outstanding operation, sorted by key.
    pub fn outstanding_handles(&self) -> Vec<OpHandle> {
        let mut v: Vec<_> = self
            .pending
            .keys()
            .map(|&key| OpHandle {
                key,
                epoch: self.epoch,
            })
            .collect();
        v.sort_unstable_by_key(|h| h.key);
        v
    }

    /// Start a new epoch. Handles of earlier epochs become invalid.
    ///
    /// # Errors
    /// [`PatternError::InvalidParameters`] if operations are still outstanding.
    pub fn reset(&mut self) -> Result<(), PatternError> {
        if !self.pending.is_empty() {
            return Err(PatternError::InvalidParameters(format!(
                "cannot reset request pool with {} outstanding operation(s)",
                self.pending.len()
            )));
        }
        self.epoch += 1;
        Ok(())
    }

    fn admit(&mut self, key: OpKey) -> Result<OpHandle, PatternError> {
        if self.outstanding[key.kind as usize] >= self.capacity {
            return Err(PatternError::CapacityExceeded {
                kind: key.kind,
                capacity: self.capacity,
            });
        }
        if self.pending.contains_key(&key) {
            return Err(PatternError::InvalidParameters(format!(
                "{} on {} in sub-iteration {} is already outstanding",
                key.kind, key.face, key.sub_iter
            )));
        }
        Ok(OpHandle {
            key,
            epoch: self.epoch,
        })
    }

    fn insert(&mut self, h: OpHandle, op: Pending<C>) -> OpHandle {
        self.outstanding[h.key.kind as usize] += 1;
        self.pending.insert(h.key, op);
        h
    }

    /// Post a non-blocking receive from `peer` into `buf`.
    pub fn post_receive(
        &mut self,
        sub_iter: usize,
        face: Face,
        peer: usize,
        tag: CommTag,
        buf: Vec<u8>,
    ) -> Result<OpHandle, PatternError> {
        let h = self.admit(OpKey {
            sub_iter,
            face,
            kind: OpKind::Recv,
        })?;
        log::trace!("post recv {face} <- rank {peer} (tag {}, {} bytes)", tag.as_u16(), buf.len());
        let handle = self.comm.irecv(peer, tag, buf)?;
        Ok(self.insert(h, Pending::Recv { peer, handle }))
    }

    /// Post a non-blocking send of `buf` to `peer`.
    pub fn post_send(
        &mut self,
        sub_iter: usize,
        face: Face,
        peer: usize,
        tag: CommTag,
        buf: Bytes,
    ) -> Result<OpHandle, PatternError> {
        let h = self.admit(OpKey {
            sub_iter,
            face,
            kind: OpKind::Send,
        })?;
        let bytes = buf.len();
        log::trace!("post send {face} -> rank {peer} (tag {}, {bytes} bytes)", tag.as_u16());
        let handle = self.comm.isend(peer, tag, buf)?;
        Ok(self.insert(h, Pending::Send { peer, bytes, handle }))
    }

    fn check(&self, h: &OpHandle) -> Result<(), PatternError> {
        if h.epoch == self.epoch && self.pending.contains_key(&h.key) {
            Ok(())
        } else {
            Err(PatternError::InvalidHandle {
                sub_iter: h.key.sub_iter,
                face: h.key.face,
                kind: h.key.kind,
                epoch: h.epoch,
            })
        }
    }

    fn remove(&mut self, h: &OpHandle) -> Option<Pending<C>> {
        let op = self.pending.remove(&h.key)?;
        self.outstanding[h.key.kind as usize] -= 1;
        Some(op)
    }

    /// Block until every operation in `handles` has completed.
    ///
    /// All handles are validated before anything is waited on. If an operation
    /// fails, the remaining ones are still drained and the first error is
    /// returned.
    pub fn wait_all(&mut self, handles: &[OpHandle]) -> Result<Vec<Completion>, PatternError> {
        for (i, h) in handles.iter().enumerate() {
            self.check(h)?;
            if handles[..i].contains(h) {
                // the second wait would hit an already completed operation
                return Err(PatternError::InvalidHandle {
                    sub_iter: h.key.sub_iter,
                    face: h.key.face,
                    kind: h.key.kind,
                    epoch: h.epoch,
                });
            }
        }
        let mut done = Vec::with_capacity(handles.len());
        let mut first_err = None;
        for h in handles {
            let Some(op) = self.remove(h) else { continue };
            match op.finish(h.key) {
                Ok(c) => done.push(c),
                Err(e) if first_err.is_none() => first_err = Some(e),
                Err(_) => {}
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(done),
        }
    }

    /// Block until any one operation in `handles` completes and return it.
    ///
    /// Returns `Ok(None)` for an empty handle list.
    pub fn wait_any(&mut self, handles: &[OpHandle]) -> Result<Option<(OpHandle, Completion)>, PatternError> {
        for h in handles {
            self.check(h)?;
        }
        if handles.is_empty() {
            return Ok(None);
        }
        loop {
            for h in handles {
                let ready = match self.pending.get_mut(&h.key) {
                    Some(op) => op.test()?,
                    None => continue,
                };
                if ready {
                    if let Some(op) = self.remove(h) {
                        return op.finish(h.key).map(|c| Some((*h, c)));
                    }
                }
            }
            std::thread::yield_now();
        }
    }
}
