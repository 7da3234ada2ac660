//! Coordinates and axis-aligned boxes over the 5-D sample grid.
//!
//! Every geometric quantity in the pipeline is carried in five dimensions
//! (x, y, z and two auxiliary axes). Unused axes have extent 1, so a 3-D
//! dataset simply keeps `lower == upper == 0` on axes 3 and 4.

use pidx_error::{PidxError, Result};
use serde::{Deserialize, Serialize};

/// Number of axes carried by every coordinate and box.
pub const MAX_DIMENSIONS: usize = 5;

/// Unsigned grid coordinate, one component per axis.
pub type Coord = [u64; MAX_DIMENSIONS];

/// Inclusive axis-aligned box.
///
/// Bounds are signed so that malformed input can be represented and then
/// rejected by [`GridBox::validate`] instead of wrapping silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridBox {
    pub lower: [i64; MAX_DIMENSIONS],
    pub upper: [i64; MAX_DIMENSIONS],
}

impl GridBox {
    /// The canonical invalid box. Intersections that come up empty compare
    /// invalid through [`GridBox::is_valid`], not necessarily equal to this.
    pub const EMPTY: Self = Self {
        lower: [0; MAX_DIMENSIONS],
        upper: [-1; MAX_DIMENSIONS],
    };

    /// Inclusive box from explicit corners.
    #[must_use]
    pub const fn new(lower: [i64; MAX_DIMENSIONS], upper: [i64; MAX_DIMENSIONS]) -> Self {
        Self { lower, upper }
    }

    /// Box covering `offset .. offset + size` on each axis.
    #[must_use]
    pub fn from_offset_size(offset: [i64; MAX_DIMENSIONS], size: [i64; MAX_DIMENSIONS]) -> Self {
        let mut upper = [0_i64; MAX_DIMENSIONS];
        for d in 0..MAX_DIMENSIONS {
            upper[d] = offset[d] + size[d] - 1;
        }
        Self {
            lower: offset,
            upper,
        }
    }

    /// Box anchored at the origin with the given per-axis extent.
    #[must_use]
    pub fn from_dims(dims: Coord) -> Self {
        let mut size = [0_i64; MAX_DIMENSIONS];
        for d in 0..MAX_DIMENSIONS {
            size[d] = dims[d] as i64;
        }
        Self::from_offset_size([0; MAX_DIMENSIONS], size)
    }

    /// `true` iff `0 <= lower[d] <= upper[d]` on every axis.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        (0..MAX_DIMENSIONS).all(|d| self.lower[d] >= 0 && self.lower[d] <= self.upper[d])
    }

    /// Like [`GridBox::is_valid`] but reports the offending axis.
    pub fn validate(&self) -> Result<()> {
        for d in 0..MAX_DIMENSIONS {
            if self.lower[d] < 0 || self.lower[d] > self.upper[d] {
                return Err(PidxError::MalformedBox {
                    detail: format!(
                        "axis {d}: lower {} upper {}",
                        self.lower[d], self.upper[d]
                    ),
                });
            }
        }
        Ok(())
    }

    /// Per-axis max of lowers and min of uppers. The result may be invalid.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Self {
        let mut out = *self;
        for d in 0..MAX_DIMENSIONS {
            out.lower[d] = self.lower[d].max(other.lower[d]);
            out.upper[d] = self.upper[d].min(other.upper[d]);
        }
        out
    }

    /// Per-axis extent; all zeros for an invalid box.
    #[must_use]
    pub fn size(&self) -> Coord {
        if !self.is_valid() {
            return [0; MAX_DIMENSIONS];
        }
        let mut size = [0_u64; MAX_DIMENSIONS];
        for d in 0..MAX_DIMENSIONS {
            size[d] = (self.upper[d] - self.lower[d] + 1) as u64;
        }
        size
    }

    /// Number of grid points inside the box.
    #[must_use]
    pub fn volume(&self) -> u64 {
        self.size().iter().product()
    }

    /// Whether `coord` lies inside the box.
    #[must_use]
    pub fn contains(&self, coord: &Coord) -> bool {
        (0..MAX_DIMENSIONS).all(|d| {
            let c = coord[d] as i64;
            c >= self.lower[d] && c <= self.upper[d]
        })
    }

    /// Whether `other` lies entirely inside `self`.
    #[must_use]
    pub fn encloses(&self, other: &Self) -> bool {
        (0..MAX_DIMENSIONS)
            .all(|d| other.lower[d] >= self.lower[d] && other.upper[d] <= self.upper[d])
    }

    /// Row-major position of `coord` inside the box, x fastest.
    #[must_use]
    pub fn linear_index(&self, coord: &Coord) -> Option<u64> {
        if !self.contains(coord) {
            return None;
        }
        let size = self.size();
        let mut index = 0_u64;
        for d in (0..MAX_DIMENSIONS).rev() {
            index = index * size[d] + (coord[d] as i64 - self.lower[d]) as u64;
        }
        Some(index)
    }

    /// Inverse of [`GridBox::linear_index`].
    #[must_use]
    pub fn coord_at(&self, mut index: u64) -> Coord {
        let size = self.size();
        let mut coord = [0_u64; MAX_DIMENSIONS];
        for d in 0..MAX_DIMENSIONS {
            let extent = size[d].max(1);
            coord[d] = (self.lower[d] as u64) + index % extent;
            index /= extent;
        }
        coord
    }

    /// Iterate every point of the box in row-major order, x fastest.
    #[must_use]
    pub fn points(&self) -> BoxPoints {
        BoxPoints {
            bounds: *self,
            next: 0,
            len: self.volume(),
        }
    }
}

/// Iterator returned by [`GridBox::points`].
#[derive(Debug, Clone)]
pub struct BoxPoints {
    bounds: GridBox,
    next: u64,
    len: u64,
}

impl Iterator for BoxPoints {
    type Item = Coord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.len {
            return None;
        }
        let coord = self.bounds.coord_at(self.next);
        self.next += 1;
        Some(coord)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.len - self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for BoxPoints {}
