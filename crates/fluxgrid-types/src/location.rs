//! Block positions and their axis-aligned neighborhoods.
//!
//! A [`Location`] is the secondary lookup key of a machine. Two machines are
//! adjacent when their locations share a dimension and differ by exactly one
//! unit along exactly one axis.

use serde::{Deserialize, Serialize};

/// A block position inside a numbered dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    /// East-west coordinate.
    pub x: i32,
    /// Vertical coordinate.
    pub y: i32,
    /// North-south coordinate.
    pub z: i32,
    /// Numeral of the dimension the position lives in.
    pub dimension: i32,
}

/// Unit offsets of the six face-adjacent neighbors.
const FACE_OFFSETS: [(i32, i32, i32); 6] = [
    (1, 0, 0),
    (-1, 0, 0),
    (0, 1, 0),
    (0, -1, 0),
    (0, 0, 1),
    (0, 0, -1),
];

impl Location {
    /// Create a location from coordinates and a dimension numeral.
    pub const fn new(x: i32, y: i32, z: i32, dimension: i32) -> Self {
        Self { x, y, z, dimension }
    }

    /// Return the six axis-aligned neighbors in the same dimension.
    ///
    /// Neighbors that would leave the `i32` coordinate range are omitted.
    pub fn neighbors(&self) -> Vec<Self> {
        FACE_OFFSETS
            .iter()
            .filter_map(|&(dx, dy, dz)| {
                Some(Self {
                    x: self.x.checked_add(dx)?,
                    y: self.y.checked_add(dy)?,
                    z: self.z.checked_add(dz)?,
                    dimension: self.dimension,
                })
            })
            .collect()
    }

    /// Whether `other` is one of the six face-adjacent neighbors.
    pub fn is_adjacent(&self, other: &Self) -> bool {
        if self.dimension != other.dimension {
            return false;
        }
        let dx = self.x.abs_diff(other.x);
        let dy = self.y.abs_diff(other.y);
        let dz = self.z.abs_diff(other.z);
        matches!((dx, dy, dz), (1, 0, 0) | (0, 1, 0) | (0, 0, 1))
    }
}

impl core::fmt::Display for Location {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{},{},{}@{}", self.x, self.y, self.z, self.dimension)
    }
}
