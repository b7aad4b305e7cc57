//! Which faces communicate in a given sub-iteration.
//!
//! Selection is deterministic and reproducible, and it is *pairwise
//! consistent*: a face is active on one process exactly when the opposite
//! face is active on the neighbor. Otherwise a partial fraction would leave
//! posted receives without a matching send.
//!
//! Both policies decide per link rather than per process, so consistency
//! needs no negotiation between the two ends.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::pattern_error::PatternError;
use crate::topology::cartesian::{ProcessGrid, ProcessTopology};
use crate::topology::face::{Axis, Face, Sign};

/// Rule used to pick the active faces of a sub-iteration.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// With `L` axes carrying neighbors, `k = round(f × 2L)` faces are active on
    /// an interior process. Sub-iteration `i` walks the axes from `i mod L`:
    /// the first `k / 2` axes are active on both faces, and for odd `k` the next
    /// axis is active on an alternating matching of its links, so an interior
    /// process uses exactly one of its two faces there. The matching flips
    /// every `L` sub-iterations.
    #[default]
    Cycling,
    /// Each link is active when a generator seeded from the link identity and
    /// `seed` draws below `f`.
    Seeded { seed: u64 },
}

/// Faces (with neighbor ranks) communicating in one sub-iteration, in
/// canonical face order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParticipationSet {
    links: Vec<(Face, usize)>,
}

impl ParticipationSet {
    pub fn iter(&self) -> impl Iterator<Item = (Face, usize)> + '_ {
        self.links.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn contains(&self, face: Face) -> bool {
        self.links.iter().any(|&(f, _)| f == face)
    }

    pub fn faces(&self) -> Vec<Face> {
        self.links.iter().map(|&(f, _)| f).collect()
    }
}

/// Number of faces out of `available` that fraction `f` asks for.
///
/// `f` is expected in `[0, 1]`; out-of-range values are clamped.
pub fn proposal_count(f: f64, available: usize) -> usize {
    let n = (f.clamp(0.0, 1.0) * available as f64).round() as usize;
    n.min(available)
}

/// Axes along which processes have neighbors, in canonical order.
pub fn live_axes(grid: &ProcessGrid) -> Vec<Axis> {
    Axis::ALL
        .into_iter()
        .filter(|&a| grid.dim(a) > 1 || grid.is_periodic())
        .collect()
}

/// Coordinate, along `face.axis`, of the process on the minus side of the link
/// behind `face`.
fn link_owner(grid: &ProcessGrid, c: usize, face: Face) -> usize {
    match face.sign {
        Sign::Plus => c,
        Sign::Minus if c == 0 => grid.dim(face.axis) - 1,
        Sign::Minus => c - 1,
    }
}

/// Whether the link owned by coordinate `owner` belongs to the alternating
/// matching of `phase` along an axis of extent `n`.
///
/// The wrap-around link only joins on even periodic extents; on odd ones it
/// would give process 0 two links.
fn in_matching(owner: usize, n: usize, periodic: bool, phase: usize) -> bool {
    let even = (owner + phase) % 2 == 0;
    if owner + 1 < n {
        even
    } else {
        periodic && n % 2 == 0 && even
    }
}

/// Uniform draw in `[0, 1)` shared by both endpoints of a link.
///
/// A link is named by its axis and the rank on its minus side, i.e. the
/// process for which it is the `+` face.
fn link_draw(seed: u64, iteration: usize, sub_iter: usize, face: Face, me: usize, peer: usize) -> f64 {
    let owner = match face.sign {
        Sign::Plus => me,
        Sign::Minus => peer,
    };
    let mut h = seed ^ 0x5851_F42D_4C95_7F2D;
    for v in [iteration as u64, sub_iter as u64, face.axis.index() as u64, owner as u64] {
        h = h.rotate_left(17) ^ v.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    }
    SmallRng::seed_from_u64(h).r#gen::<f64>()
}

/// Compute `ParticipationSet(sub_iter)` of `topology` for outer iteration `iteration`.
///
/// Only faces with a present neighbor can appear. `f = 0` always yields the
/// empty set and `f = 1` every available face. Under
/// [`SelectionPolicy::Cycling`] an interior process gets exactly
/// `round(f × available)` faces; a process on an open boundary skips the
/// selected faces it does not have. On an odd periodic extent the alternating
/// matching cannot cover every process, so one process per line may get one
/// face fewer.
pub fn select(
    topology: &ProcessTopology,
    policy: SelectionPolicy,
    f: f64,
    iteration: usize,
    sub_iter: usize,
) -> Result<ParticipationSet, PatternError> {
    let grid = topology.grid();
    let mut links = Vec::with_capacity(6);
    match policy {
        SelectionPolicy::Cycling => {
            let live = live_axes(grid);
            if live.is_empty() {
                return Ok(ParticipationSet { links });
            }
            let k = proposal_count(f, 2 * live.len());
            let axis_at = |j: usize| live[(sub_iter + j) % live.len()];
            let full: Vec<Axis> = (0..k / 2).map(axis_at).collect();
            let half = (k % 2 == 1).then(|| axis_at(k / 2));
            let phase = (sub_iter / live.len()) % 2;

            let coord = topology.coordinate();
            for (face, peer) in topology.available_faces() {
                let active = if full.contains(&face.axis) {
                    true
                } else if half == Some(face.axis) {
                    let owner = link_owner(grid, coord.get(face.axis), face);
                    in_matching(owner, grid.dim(face.axis), grid.is_periodic(), phase)
                } else {
                    false
                };
                if active {
                    links.push((face, peer));
                }
            }
        }
        SelectionPolicy::Seeded { seed } => {
            for (face, peer) in topology.available_faces() {
                if link_draw(seed, iteration, sub_iter, face, topology.rank(), peer) < f {
                    links.push((face, peer));
                }
            }
        }
    }
    Ok(ParticipationSet { links })
}
