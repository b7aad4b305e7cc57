//! Directional exchange buffers sized from grid extents and payload size.
//!
//! For an exchange along axis `a`, the face area is the product of the cell
//! counts of the two axes orthogonal to `a`; a buffer for that axis holds
//! `area × payload_size` bytes. One *slot* is a full set of twelve buffers
//! (outgoing and incoming for each of the six faces). Pipelined runs use one
//! slot per sub-iteration so no buffer is reused while an operation on it may
//! still be in flight.
//!
//! Outgoing buffers are frozen [`Bytes`]: sends only ever need shared,
//! immutable access. Incoming buffers are owned `Vec<u8>`s that move into a
//! pending receive and come back when it completes, so an incoming buffer
//! cannot be read or overwritten while its receive is outstanding.

use bytes::{Bytes, BytesMut};
use std::collections::HashSet;

use crate::data::payload::fill_pattern;
use crate::debug_invariants::DebugInvariants;
use crate::pattern_error::PatternError;
use crate::topology::face::{Axis, Face};

/// Whether a buffer carries data to a neighbor or from one.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BufferRole {
    /// Filled locally, sent to the neighbor.
    Outgoing,
    /// Written by a receive from the neighbor.
    Incoming,
}

/// Logical grid-cell counts of the local block along each axis.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GridExtents([usize; 3]);

impl GridExtents {
    /// Validated extents.
    ///
    /// # Errors
    /// [`PatternError::InvalidParameters`] if any extent is zero.
    pub fn new(extents: [usize; 3]) -> Result<Self, PatternError> {
        if let Some(axis) = Axis::ALL.into_iter().find(|a| extents[a.index()] == 0) {
            return Err(PatternError::InvalidParameters(format!(
                "grid extent along {axis} must be positive"
            )));
        }
        Ok(Self(extents))
    }

    /// Cell count along `axis`.
    #[inline]
    pub fn get(&self, axis: Axis) -> usize {
        self.0[axis.index()]
    }

    /// Number of cells on a face orthogonal to `axis`, if it fits in `usize`.
    pub fn face_area(&self, axis: Axis) -> Option<usize> {
        let (a, b) = axis.orthogonal();
        self.get(a).checked_mul(self.get(b))
    }
}

struct Slot {
    outgoing: [Bytes; 6],
    incoming: [Option<Vec<u8>>; 6],
}

/// Owner of every exchange buffer of a run.
pub struct ExchangeBufferSet {
    extents: GridExtents,
    payload_size: usize,
    face_bytes: [usize; 3],
    slots: Vec<Slot>,
}

impl std::fmt::Debug for ExchangeBufferSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeBufferSet")
            .field("extents", &self.extents)
            .field("payload_size", &self.payload_size)
            .field("face_bytes", &self.face_bytes)
            .field("slots", &self.slots.len())
            .finish()
    }
}

impl ExchangeBufferSet {
    /// Compute face sizes and allocate `slots` full buffer sets (at least one).
    ///
    /// Outgoing buffers of `rank` are pre-filled with its synthetic payload
    /// pattern; incoming buffers start zeroed.
    ///
    /// # Errors
    /// [`PatternError::InvalidParameters`] if any extent or the payload size is
    /// zero, or if a buffer or the total allocation would exceed `isize::MAX` bytes.
    pub fn new(
        extents: [usize; 3],
        payload_size: usize,
        slots: usize,
        rank: usize,
    ) -> Result<Self, PatternError> {
        let extents = GridExtents::new(extents)?;
        if payload_size == 0 {
            return Err(PatternError::InvalidParameters(
                "payload size must be positive".into(),
            ));
        }
        let slots = slots.max(1);
        let face_bytes = Self::face_bytes(&extents, payload_size)?;

        // 4 buffers per axis (in/out × two directions) per slot
        let total = face_bytes
            .iter()
            .try_fold(0usize, |acc, &b| b.checked_mul(4).and_then(|x| acc.checked_add(x)))
            .and_then(|per_slot| per_slot.checked_mul(slots))
            .filter(|&t| t <= isize::MAX as usize)
            .ok_or_else(|| {
                PatternError::InvalidParameters(format!(
                    "{slots} buffer slot(s) of {face_bytes:?} bytes per face overflow the address space"
                ))
            })?;
        log::debug!("allocating {total} bytes of exchange buffers in {slots} slot(s)");

        let slots = (0..slots)
            .map(|s| Slot {
                outgoing: Face::ALL.map(|f| {
                    let mut buf = BytesMut::zeroed(face_bytes[f.axis.index()]);
                    fill_pattern(&mut buf[..], rank, f, s);
                    buf.freeze()
                }),
                incoming: Face::ALL.map(|f| Some(vec![0u8; face_bytes[f.axis.index()]])),
            })
            .collect();

        let set = Self {
            extents,
            payload_size,
            face_bytes,
            slots,
        };
        set.debug_assert_invariants();
        Ok(set)
    }

    fn face_bytes(extents: &GridExtents, payload_size: usize) -> Result<[usize; 3], PatternError> {
        let mut out = [0usize; 3];
        for axis in Axis::ALL {
            out[axis.index()] = extents
                .face_area(axis)
                .and_then(|a| a.checked_mul(payload_size))
                .filter(|&b| b <= isize::MAX as usize)
                .ok_or_else(|| {
                    PatternError::InvalidParameters(format!(
                        "face buffer for axis {axis} overflows the address space"
                    ))
                })?;
        }
        Ok(out)
    }

    /// Byte size of every buffer tied to `axis`.
    #[inline]
    pub fn size_for(&self, axis: Axis) -> usize {
        self.face_bytes[axis.index()]
    }

    /// Grid extents the buffers were sized from.
    pub fn extents(&self) -> GridExtents {
        self.extents
    }

    /// Bytes exchanged per grid cell.
    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// Number of independent buffer sets.
    pub fn slots(&self) -> usize {
        self.slots.len()
    }

    /// Total bytes held across all slots.
    pub fn total_bytes(&self) -> usize {
        self.slots.len() * 4 * self.face_bytes.iter().sum::<usize>()
    }

    fn slot(&self, slot: usize) -> Result<&Slot, PatternError> {
        let n = self.slots.len();
        self.slots.get(slot).ok_or_else(|| no_slot(slot, n))
    }

    fn slot_mut(&mut self, slot: usize) -> Result<&mut Slot, PatternError> {
        let n = self.slots.len();
        self.slots.get_mut(slot).ok_or_else(|| no_slot(slot, n))
    }

    /// Contents of the first slot's buffer for `face` in `role`.
    ///
    /// Returns `None` for an incoming buffer whose receive is still outstanding.
    pub fn buffer(&self, face: Face, role: BufferRole) -> Option<&[u8]> {
        self.buffer_in_slot(0, face, role).ok().flatten()
    }

    /// Contents of a buffer in a given slot; `Ok(None)` while an incoming
    /// buffer is lent to a pending receive.
    pub fn buffer_in_slot(
        &self,
        slot: usize,
        face: Face,
        role: BufferRole,
    ) -> Result<Option<&[u8]>, PatternError> {
        let s = self.slot(slot)?;
        Ok(match role {
            BufferRole::Outgoing => Some(&s.outgoing[face.index()][..]),
            BufferRole::Incoming => s.incoming[face.index()].as_deref(),
        })
    }

    /// Shared handle to an outgoing buffer, ready to be posted as a send.
    pub fn outgoing(&self, slot: usize, face: Face) -> Result<Bytes, PatternError> {
        Ok(self.slot(slot)?.outgoing[face.index()].clone())
    }

    /// Overwrite an outgoing buffer with caller-provided content.
    ///
    /// # Errors
    /// [`PatternError::InvalidParameters`] if `fill` produced a different length
    /// than [`size_for`](Self::size_for) the face's axis.
    pub fn fill_outgoing<F>(&mut self, slot: usize, face: Face, fill: F) -> Result<(), PatternError>
    where
        F: FnOnce(&mut [u8]),
    {
        let len = self.size_for(face.axis);
        let mut buf = BytesMut::zeroed(len);
        fill(&mut buf[..]);
        self.slot_mut(slot)?.outgoing[face.index()] = buf.freeze();
        Ok(())
    }

    /// Lend an incoming buffer to a receive.
    ///
    /// # Errors
    /// [`PatternError::InvalidParameters`] if the buffer is already lent out.
    pub fn take_incoming(&mut self, slot: usize, face: Face) -> Result<Vec<u8>, PatternError> {
        self.slot_mut(slot)?.incoming[face.index()].take().ok_or_else(|| {
            PatternError::InvalidParameters(format!(
                "incoming buffer for {face} in slot {slot} is still in flight"
            ))
        })
    }

    /// Return an incoming buffer after its receive completed.
    ///
    /// # Errors
    /// [`PatternError::InvalidParameters`] if the slot already holds a buffer or
    /// the length does not match the face size.
    pub fn restore_incoming(&mut self, slot: usize, face: Face, buf: Vec<u8>) -> Result<(), PatternError> {
        let len = self.size_for(face.axis);
        if buf.len() != len {
            return Err(PatternError::InvalidParameters(format!(
                "incoming buffer for {face} has {} bytes, expected {len}",
                buf.len()
            )));
        }
        let cell = &mut self.slot_mut(slot)?.incoming[face.index()];
        if cell.is_some() {
            return Err(PatternError::InvalidParameters(format!(
                "incoming buffer for {face} in slot {slot} was never lent out"
            )));
        }
        *cell = Some(buf);
        Ok(())
    }
}

fn no_slot(slot: usize, have: usize) -> PatternError {
    PatternError::InvalidParameters(format!("buffer slot {slot} out of range (have {have})"))
}

impl DebugInvariants for ExchangeBufferSet {
    fn validate_invariants(&self) -> Result<(), PatternError> {
        let mut seen = HashSet::new();
        for (i, slot) in self.slots.iter().enumerate() {
            for face in Face::ALL {
                let want = self.size_for(face.axis);
                let out = &slot.outgoing[face.index()];
                let inc = slot.incoming[face.index()].as_deref();
                let bad_len = out.len() != want || inc.is_some_and(|b| b.len() != want);
                if bad_len {
                    return Err(PatternError::InvalidParameters(format!(
                        "slot {i}: buffers for {face} are not {want} bytes"
                    )));
                }
                if want == 0 {
                    continue;
                }
                let ptrs = std::iter::once(out.as_ptr()).chain(inc.map(<[u8]>::as_ptr));
                for p in ptrs {
                    if !seen.insert(p as usize) {
                        return Err(PatternError::InvalidParameters(format!(
                            "slot {i}: buffer for {face} aliases another buffer"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::payload::first_mismatch;
    use crate::topology::face::Sign;

    #[test]
    fn sizes_follow_orthogonal_face_area() {
        let set = ExchangeBufferSet::new([2, 3, 5], 4, 1, 0).unwrap();
        assert_eq!(set.size_for(Axis::X), 3 * 5 * 4);
        assert_eq!(set.size_for(Axis::Y), 2 * 5 * 4);
        assert_eq!(set.size_for(Axis::Z), 2 * 3 * 4);
        assert_eq!(set.total_bytes(), 4 * (60 + 40 + 24));
    }

    #[test]
    fn zero_extent_or_payload_is_rejected() {
        assert!(matches!(
            ExchangeBufferSet::new([4, 0, 4], 1, 1, 0),
            Err(PatternError::InvalidParameters(_))
        ));
        assert!(matches!(
            ExchangeBufferSet::new([4, 4, 4], 0, 1, 0),
            Err(PatternError::InvalidParameters(_))
        ));
    }

    #[test]
    fn overflowing_size_is_rejected() {
        let big = usize::MAX / 2;
        assert!(matches!(
            ExchangeBufferSet::new([1, big, 4], 1, 1, 0),
            Err(PatternError::InvalidParameters(_))
        ));
        // each buffer fits but the slot count pushes the total over
        let huge = (isize::MAX as usize) / 8;
        assert!(ExchangeBufferSet::face_bytes(&GridExtents::new([huge, 1, 1]).unwrap(), 1).is_ok());
        assert!(matches!(
            ExchangeBufferSet::new([huge, 1, 1], 1, 64, 0),
            Err(PatternError::InvalidParameters(_))
        ));
    }

    #[test]
    fn outgoing_buffers_carry_rank_pattern() {
        let set = ExchangeBufferSet::new([2, 2, 2], 3, 2, 7).unwrap();
        for slot in 0..2 {
            for f in Face::ALL {
                let out = set.outgoing(slot, f).unwrap();
                assert_eq!(first_mismatch(&out, 7, f, slot), None);
            }
        }
    }

    #[test]
    fn incoming_buffer_is_unavailable_while_lent() {
        let mut set = ExchangeBufferSet::new([2, 2, 2], 1, 1, 0).unwrap();
        let f = Face::new(Axis::Y, Sign::Minus);
        let buf = set.take_incoming(0, f).unwrap();
        assert!(set.buffer(f, BufferRole::Incoming).is_none());
        assert!(set.take_incoming(0, f).is_err());
        set.restore_incoming(0, f, buf).unwrap();
        assert_eq!(set.buffer(f, BufferRole::Incoming).unwrap().len(), 4);
        assert!(set.restore_incoming(0, f, vec![0; 4]).is_err());
    }

    #[test]
    fn no_two_buffers_alias() {
        let set = ExchangeBufferSet::new([3, 3, 3], 2, 3, 1).unwrap();
        assert!(set.validate_invariants().is_ok());
    }
}
