//! Axes, directions and the six faces of a 3D block decomposition.
//!
//! A [`Face`] is one (axis, direction) pair. The canonical ordering
//! `+x, -x, +y, -y, +z, -z` is used everywhere a deterministic iteration
//! order over faces matters (participation selection, tag layout, buffer
//! indexing).

use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;
use std::fmt;

/// One of the three Cartesian axes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    /// The two axes orthogonal to `self`, in ascending order.
    #[inline]
    pub const fn orthogonal(self) -> (Axis, Axis) {
        match self {
            Axis::X => (Axis::Y, Axis::Z),
            Axis::Y => (Axis::X, Axis::Z),
            Axis::Z => (Axis::X, Axis::Y),
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        })
    }
}

/// Direction along an axis.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Sign {
    Plus,
    Minus,
}

impl Sign {
    #[inline]
    pub const fn flip(self) -> Sign {
        match self {
            Sign::Plus => Sign::Minus,
            Sign::Minus => Sign::Plus,
        }
    }
}

/// An (axis, direction) pair: one face of a process's block.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Face {
    pub axis: Axis,
    pub sign: Sign,
}

const_assert_eq!(Face::ALL.len(), 2 * Axis::ALL.len());

impl Face {
    pub const fn new(axis: Axis, sign: Sign) -> Self {
        Face { axis, sign }
    }

    /// Canonical face order.
    pub const ALL: [Face; 6] = [
        Face::new(Axis::X, Sign::Plus),
        Face::new(Axis::X, Sign::Minus),
        Face::new(Axis::Y, Sign::Plus),
        Face::new(Axis::Y, Sign::Minus),
        Face::new(Axis::Z, Sign::Plus),
        Face::new(Axis::Z, Sign::Minus),
    ];

    /// Position of this face in [`Face::ALL`].
    #[inline]
    pub const fn index(self) -> usize {
        2 * self.axis.index()
            + match self.sign {
                Sign::Plus => 0,
                Sign::Minus => 1,
            }
    }

    /// The face a neighbor uses to talk back to us.
    #[inline]
    pub const fn opposite(self) -> Face {
        Face::new(self.axis, self.sign.flip())
    }
}

impl fmt::Display for Face {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self.sign {
            Sign::Plus => '+',
            Sign::Minus => '-',
        };
        write!(f, "{s}{}", self.axis)
    }
}
