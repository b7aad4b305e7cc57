//! Per-iteration halo-exchange state machine.
//!
//! For each sub-iteration `i`:
//! 1. select `ParticipationSet(i)`;
//! 2. post a receive on every selected face;
//! 3. post a send on every selected face;
//! 4. wait now ([`WaitGranularity::PerSubIteration`]) or defer to the end of
//!    the outer iteration ([`WaitGranularity::PerIteration`]).
//!
//! All receives of a sub-iteration are posted before any of its sends, so a
//! peer's message always finds a posted receive on this side.

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::participation::{proposal_count, select};
use crate::algs::request_pool::{Completion, OpHandle, RequestPool};
use crate::algs::run::RunReport;
use crate::config::{PatternConfig, WaitGranularity};
use crate::data::exchange_buffers::ExchangeBufferSet;
use crate::data::payload::first_mismatch;
use crate::pattern_error::PatternError;
use crate::topology::cartesian::ProcessTopology;

pub struct PatternScheduler<'a, C: Communicator> {
    topology: &'a ProcessTopology,
    buffers: &'a mut ExchangeBufferSet,
    config: &'a PatternConfig,
    pool: RequestPool<'a, C>,
}

impl<'a, C: Communicator> PatternScheduler<'a, C> {
    /// # Errors
    /// [`PatternError::InvalidParameters`] if `buffers` has fewer slots than the
    /// configured wait granularity needs.
    pub fn new(
        comm: &'a C,
        topology: &'a ProcessTopology,
        buffers: &'a mut ExchangeBufferSet,
        config: &'a PatternConfig,
    ) -> Result<Self, PatternError> {
        let slots = config.buffer_slots();
        if buffers.slots() < slots {
            return Err(PatternError::InvalidParameters(format!(
                "{:?} needs {slots} buffer slot(s), got {}",
                config.wait_granularity,
                buffers.slots()
            )));
        }
        // 2 directions × 3 axes per sub-iteration that may be in flight at once
        let capacity = 6 * slots;
        Ok(Self {
            topology,
            buffers,
            config,
            pool: RequestPool::new(comm, capacity),
        })
    }

    pub fn buffers(&self) -> &ExchangeBufferSet {
        self.buffers
    }

    pub fn pool(&self) -> &RequestPool<'a, C> {
        &self.pool
    }

    /// Run all sub-iterations of outer iteration `iteration`, accumulating
    /// counters into `report`.
    ///
    /// Counters reflect what was posted and completed even when an error
    /// aborts the iteration midway.
    pub fn run_iteration(&mut self, iteration: usize, report: &mut RunReport) -> Result<(), PatternError> {
        self.pool.reset()?;
        let cfg = self.config;
        let mut deferred_recvs = Vec::new();
        let mut deferred_sends = Vec::new();

        for i in 0..cfg.n_sub_iters {
            let slot = cfg.slot_for(i);
            let set = select(
                self.topology,
                cfg.selection,
                cfg.participation_fraction,
                iteration,
                i,
            )?;
            log::debug!(
                "rank {} iteration {iteration} sub-iteration {i}: {} of {} requested face(s) active {:?}",
                self.topology.rank(),
                set.len(),
                proposal_count(cfg.participation_fraction, self.topology.available_faces().count()),
                set.faces()
            );

            let mut recvs = Vec::with_capacity(set.len());
            for (face, peer) in set.iter() {
                let buf = self.buffers.take_incoming(slot, face)?;
                let tag = CommTag::for_face(i, face.opposite());
                recvs.push(self.pool.post_receive(i, face, peer, tag, buf)?);
                report.receives_posted += 1;
            }

            let mut sends = Vec::with_capacity(set.len());
            for (face, peer) in set.iter() {
                let buf = self.buffers.outgoing(slot, face)?;
                let tag = CommTag::for_face(i, face);
                sends.push(self.pool.post_send(i, face, peer, tag, buf)?);
                report.sends_posted += 1;
            }

            match cfg.wait_granularity {
                WaitGranularity::PerSubIteration => {
                    self.complete(recvs, &sends, report)?;
                    report.sub_iterations_completed += 1;
                }
                WaitGranularity::PerIteration => {
                    deferred_recvs.extend(recvs);
                    deferred_sends.extend(sends);
                }
            }
        }

        if cfg.wait_granularity == WaitGranularity::PerIteration {
            self.complete(deferred_recvs, &deferred_sends, report)?;
            report.sub_iterations_completed += cfg.n_sub_iters;
        }
        debug_assert_eq!(self.pool.outstanding(), 0);
        Ok(())
    }

    /// Drain receives in completion order, then the sends.
    fn complete(
        &mut self,
        mut recvs: Vec<OpHandle>,
        sends: &[OpHandle],
        report: &mut RunReport,
    ) -> Result<(), PatternError> {
        while let Some((h, done)) = self.pool.wait_any(&recvs)? {
            recvs.retain(|&r| r != h);
            self.deliver(done, report)?;
        }
        for done in self.pool.wait_all(sends)? {
            if let Completion::Sent { bytes, .. } = done {
                report.bytes_sent += bytes as u64;
            }
        }
        Ok(())
    }

    fn deliver(&mut self, done: Completion, report: &mut RunReport) -> Result<(), PatternError> {
        let Completion::Received { key, peer, buf } = done else {
            return Ok(());
        };
        let slot = self.config.slot_for(key.sub_iter);
        report.bytes_received += buf.len() as u64;
        log::trace!("recv complete {} <- rank {peer} ({} bytes)", key.face, buf.len());
        if self.config.verify_payload {
            if let Some(offset) = first_mismatch(&buf, peer, key.face.opposite(), slot) {
                return Err(PatternError::PayloadMismatch {
                    neighbor: peer,
                    face: key.face,
                    offset,
                });
            }
        }
        self.buffers.restore_incoming(slot, key.face, buf)
    }
}
