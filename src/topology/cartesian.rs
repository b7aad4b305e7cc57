//! Cartesian process topology: rank ↔ coordinate mapping and face neighbors.
//!
//! Ranks are laid out row-major with `z` varying fastest, the same layout
//! `MPI_Cart_create` uses without reordering:
//!
//! ```text
//! rank = (x * Py + y) * Pz + z
//! ```
//!
//! Every function here is pure, so each process derives the same global
//! structure without communicating.

use crate::debug_invariants::DebugInvariants;
use crate::pattern_error::PatternError;
use crate::topology::face::{Axis, Face, Sign};
use std::fmt;

/// Position of a process inside the `Px × Py × Pz` grid.
///
/// Only obtainable through a [`ProcessGrid`], so a coordinate is always in range
/// for the grid that produced it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessCoordinate {
    x: usize,
    y: usize,
    z: usize,
}

impl ProcessCoordinate {
    #[inline]
    pub fn x(&self) -> usize {
        self.x
    }
    #[inline]
    pub fn y(&self) -> usize {
        self.y
    }
    #[inline]
    pub fn z(&self) -> usize {
        self.z
    }

    #[inline]
    pub fn get(&self, axis: Axis) -> usize {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    #[inline]
    fn with(mut self, axis: Axis, v: usize) -> Self {
        match axis {
            Axis::X => self.x = v,
            Axis::Y => self.y = v,
            Axis::Z => self.z = v,
        }
        self
    }

    pub fn as_array(&self) -> [usize; 3] {
        [self.x, self.y, self.z]
    }
}

impl fmt::Display for ProcessCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// The process on the other side of a face, if any.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Neighbor {
    Rank(usize),
    /// Domain boundary of a non-periodic grid.
    Absent,
}

impl Neighbor {
    #[inline]
    pub fn rank(self) -> Option<usize> {
        match self {
            Neighbor::Rank(r) => Some(r),
            Neighbor::Absent => None,
        }
    }

    #[inline]
    pub fn is_present(self) -> bool {
        matches!(self, Neighbor::Rank(_))
    }
}

/// Shape and boundary policy of the process grid.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProcessGrid {
    dims: [usize; 3],
    periodic: bool,
}

impl ProcessGrid {
    /// Build a grid for `procs` participating processes.
    ///
    /// # Errors
    /// [`PatternError::InvalidTopology`] if any dimension is zero or the product of
    /// the dimensions differs from `procs`.
    pub fn new(dims: [usize; 3], periodic: bool, procs: usize) -> Result<Self, PatternError> {
        let product = dims
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d));
        match product {
            Some(n) if n == procs && dims.iter().all(|&d| d > 0) => Ok(Self { dims, periodic }),
            _ => Err(PatternError::InvalidTopology { dims, procs }),
        }
    }

    #[inline]
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    #[inline]
    pub fn dim(&self, axis: Axis) -> usize {
        self.dims[axis.index()]
    }

    #[inline]
    pub fn is_periodic(&self) -> bool {
        self.periodic
    }

    /// Number of processes in the grid.
    #[inline]
    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    /// Always false; a valid grid holds at least one process.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    fn out_of_grid(&self) -> PatternError {
        PatternError::InvalidTopology {
            dims: self.dims,
            procs: self.len(),
        }
    }

    /// Checked constructor for a coordinate in this grid.
    pub fn coordinate(&self, x: usize, y: usize, z: usize) -> Result<ProcessCoordinate, PatternError> {
        let [px, py, pz] = self.dims;
        if x < px && y < py && z < pz {
            Ok(ProcessCoordinate { x, y, z })
        } else {
            Err(self.out_of_grid())
        }
    }

    /// Map a flat rank to its coordinate.
    pub fn coordinate_of(&self, rank: usize) -> Result<ProcessCoordinate, PatternError> {
        if rank >= self.len() {
            return Err(self.out_of_grid());
        }
        let [_, py, pz] = self.dims;
        Ok(ProcessCoordinate {
            x: rank / (py * pz),
            y: (rank / pz) % py,
            z: rank % pz,
        })
    }

    /// Inverse of [`coordinate_of`](Self::coordinate_of).
    #[inline]
    pub fn rank_of(&self, c: ProcessCoordinate) -> usize {
        let [_, py, pz] = self.dims;
        (c.x * py + c.y) * pz + c.z
    }

    /// Neighbor of `c` across `face`.
    ///
    /// Non-periodic grids report [`Neighbor::Absent`] exactly at the boundary of the
    /// face's axis; periodic grids wrap around (a dimension of extent 1 wraps onto
    /// the process itself).
    pub fn neighbor(&self, c: ProcessCoordinate, face: Face) -> Neighbor {
        let n = self.dim(face.axis);
        let v = c.get(face.axis);
        let next = match face.sign {
            Sign::Plus if v + 1 < n => Some(v + 1),
            Sign::Minus if v > 0 => Some(v - 1),
            Sign::Plus if self.periodic => Some(0),
            Sign::Minus if self.periodic => Some(n - 1),
            _ => None,
        };
        match next {
            Some(w) => Neighbor::Rank(self.rank_of(c.with(face.axis, w))),
            None => Neighbor::Absent,
        }
    }
}

/// One process's view of the grid: its coordinate and its six neighbors.
///
/// Computed once per run and read-only afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessTopology {
    grid: ProcessGrid,
    rank: usize,
    coord: ProcessCoordinate,
    neighbors: [Neighbor; 6],
}

impl ProcessTopology {
    /// Build the topology of `rank` in a `dims` grid of `procs` processes.
    pub fn new(dims: [usize; 3], periodic: bool, procs: usize, rank: usize) -> Result<Self, PatternError> {
        let grid = ProcessGrid::new(dims, periodic, procs)?;
        Self::from_grid(grid, rank)
    }

    pub fn from_grid(grid: ProcessGrid, rank: usize) -> Result<Self, PatternError> {
        let coord = grid.coordinate_of(rank)?;
        let neighbors = Face::ALL.map(|f| grid.neighbor(coord, f));
        let topo = Self {
            grid,
            rank,
            coord,
            neighbors,
        };
        topo.debug_assert_invariants();
        Ok(topo)
    }

    #[inline]
    pub fn grid(&self) -> &ProcessGrid {
        &self.grid
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    #[inline]
    pub fn coordinate(&self) -> ProcessCoordinate {
        self.coord
    }

    #[inline]
    pub fn neighbor(&self, face: Face) -> Neighbor {
        self.neighbors[face.index()]
    }

    /// Faces with a present neighbor, in canonical order.
    pub fn available_faces(&self) -> impl Iterator<Item = (Face, usize)> + '_ {
        Face::ALL
            .into_iter()
            .filter_map(move |f| self.neighbor(f).rank().map(|r| (f, r)))
    }

    /// True if every face has a neighbor.
    pub fn is_interior(&self) -> bool {
        self.neighbors.iter().all(|n| n.is_present())
    }
}

impl DebugInvariants for ProcessTopology {
    fn validate_invariants(&self) -> Result<(), PatternError> {
        if self.grid.rank_of(self.coord) != self.rank {
            return Err(self.grid.out_of_grid());
        }
        for face in Face::ALL {
            if let Neighbor::Rank(r) = self.neighbor(face) {
                let theirs = self.grid.coordinate_of(r)?;
                if self.grid.neighbor(theirs, face.opposite()) != Neighbor::Rank(self.rank) {
                    return Err(self.grid.out_of_grid());
                }
            }
        }
        Ok(())
    }
}
