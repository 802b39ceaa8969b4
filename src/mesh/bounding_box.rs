//! Axis-aligned bounding boxes in 2D or 3D.
//!
//! Boxes drive the partitioning handshake: each rank advertises the box
//! around its owned vertices, receivers filter remote vertices against their
//! own (safety-factor inflated) box, and direct-access regions are unioned
//! in before filtering.

use serde::{Deserialize, Serialize};

use crate::error::CouplingError;

/// Axis-aligned box with `min[d] <= max[d]` per dimension.
///
/// A freshly created box is *empty*: `min = +inf`, `max = -inf`, so the
/// first [`expand_by_point`](Self::expand_by_point) sets both bounds. The
/// unused third component of a 2D box stays at its empty values and is
/// never serialized.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    dim: usize,
    min: [f64; 3],
    max: [f64; 3],
}

impl BoundingBox {
    /// An empty box in `dim` dimensions (2 or 3).
    pub fn new(dim: usize) -> Self {
        debug_assert!(dim == 2 || dim == 3, "spatial dimension must be 2 or 3");
        Self {
            dim,
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
        }
    }

    /// Build a box from interleaved `[min0, max0, min1, max1, (min2, max2)]`
    /// bounds, the layout used by `set_mesh_access_region`.
    ///
    /// # Errors
    /// `DegenerateBoundingBox` if any `min > max`.
    pub fn from_bounds(bounds: &[f64]) -> Result<Self, CouplingError> {
        debug_assert!(bounds.len() == 4 || bounds.len() == 6);
        let dim = bounds.len() / 2;
        let mut bb = Self::new(dim);
        for d in 0..dim {
            let (lo, hi) = (bounds[2 * d], bounds[2 * d + 1]);
            if lo > hi {
                return Err(CouplingError::DegenerateBoundingBox {
                    dim: d,
                    min: lo,
                    max: hi,
                });
            }
            bb.min[d] = lo;
            bb.max[d] = hi;
        }
        Ok(bb)
    }

    /// Spatial dimension of the box (2 or 3).
    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// True until the first point or union lands in the box.
    pub fn is_empty(&self) -> bool {
        (0..self.dim).any(|d| self.min[d] > self.max[d])
    }

    /// Grow the box to cover `point` (slice of length `dim`).
    pub fn expand_by_point(&mut self, point: &[f64]) {
        debug_assert_eq!(point.len(), self.dim);
        for d in 0..self.dim {
            self.min[d] = self.min[d].min(point[d]);
            self.max[d] = self.max[d].max(point[d]);
        }
    }

    /// Union with another box of the same dimension.
    pub fn expand(&mut self, other: &BoundingBox) {
        debug_assert_eq!(self.dim, other.dim);
        for d in 0..self.dim {
            self.min[d] = self.min[d].min(other.min[d]);
            self.max[d] = self.max[d].max(other.max[d]);
        }
    }

    /// Inflate every side by `factor` times the longest edge length.
    ///
    /// A `factor` of 0.0 leaves the box unchanged; an empty box stays empty.
    pub fn inflate(&mut self, factor: f64) {
        if self.is_empty() || factor == 0.0 {
            return;
        }
        let longest = (0..self.dim)
            .map(|d| self.max[d] - self.min[d])
            .fold(0.0f64, f64::max);
        let margin = factor * longest;
        for d in 0..self.dim {
            self.min[d] -= margin;
            self.max[d] += margin;
        }
    }

    /// Does `point` lie inside (inclusive bounds)?
    pub fn contains(&self, point: &[f64]) -> bool {
        debug_assert_eq!(point.len(), self.dim);
        (0..self.dim).all(|d| point[d] >= self.min[d] && point[d] <= self.max[d])
    }

    /// Do the two boxes intersect (inclusive bounds)?
    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        debug_assert_eq!(self.dim, other.dim);
        if self.is_empty() || other.is_empty() {
            return false;
        }
        (0..self.dim).all(|d| self.min[d] <= other.max[d] && other.min[d] <= self.max[d])
    }

    /// Is `other` fully inside `self` (inclusive bounds)?
    pub fn contains_box(&self, other: &BoundingBox) -> bool {
        debug_assert_eq!(self.dim, other.dim);
        if other.is_empty() {
            return true;
        }
        (0..self.dim).all(|d| self.min[d] <= other.min[d] && self.max[d] >= other.max[d])
    }

    /// Lower bound in dimension `d`.
    #[inline]
    pub fn min(&self, d: usize) -> f64 {
        self.min[d]
    }

    /// Upper bound in dimension `d`.
    #[inline]
    pub fn max(&self, d: usize) -> f64 {
        self.max[d]
    }

    /// Serialize as `[min0, max0, min1, max1, (min2, max2)]` for the wire.
    pub fn to_wire(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(2 * self.dim);
        for d in 0..self.dim {
            out.push(self.min[d]);
            out.push(self.max[d]);
        }
        out
    }

    /// Inverse of [`to_wire`](Self::to_wire); bounds arrive from a peer, so a
    /// bad layout is a protocol error rather than user misuse.
    pub fn from_wire(dim: usize, wire: &[f64]) -> Result<Self, CouplingError> {
        if wire.len() != 2 * dim {
            return Err(CouplingError::Protocol(format!(
                "bounding box payload has {} entries, expected {}",
                wire.len(),
                2 * dim
            )));
        }
        let mut bb = Self::new(dim);
        for d in 0..dim {
            bb.min[d] = wire[2 * d];
            bb.max[d] = wire[2 * d + 1];
        }
        Ok(bb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_until_first_point() {
        let mut bb = BoundingBox::new(2);
        assert!(bb.is_empty());
        bb.expand_by_point(&[1.0, 2.0]);
        assert!(!bb.is_empty());
        assert_eq!(bb.min(0), 1.0);
        assert_eq!(bb.max(1), 2.0);
    }

    #[test]
    fn from_bounds_rejects_inverted() {
        let err = BoundingBox::from_bounds(&[0.0, 1.0, 2.0, 1.0]).unwrap_err();
        assert!(matches!(
            err,
            CouplingError::DegenerateBoundingBox { dim: 1, .. }
        ));
    }

    #[test]
    fn union_covers_both() {
        let mut a = BoundingBox::from_bounds(&[0.0, 1.0, 0.0, 1.0]).unwrap();
        let b = BoundingBox::from_bounds(&[2.0, 3.0, -1.0, 0.5]).unwrap();
        a.expand(&b);
        assert_eq!(a.min(1), -1.0);
        assert_eq!(a.max(0), 3.0);
    }

    #[test]
    fn inflate_uses_longest_edge() {
        let mut bb = BoundingBox::from_bounds(&[0.0, 2.0, 0.0, 1.0]).unwrap();
        bb.inflate(0.5);
        // longest edge is 2.0, margin 1.0
        assert_eq!(bb.min(0), -1.0);
        assert_eq!(bb.max(1), 2.0);
    }

    #[test]
    fn overlap_is_inclusive() {
        let a = BoundingBox::from_bounds(&[0.0, 1.0, 0.0, 1.0]).unwrap();
        let b = BoundingBox::from_bounds(&[1.0, 2.0, 1.0, 2.0]).unwrap();
        assert!(a.overlaps(&b));
        let c = BoundingBox::from_bounds(&[1.1, 2.0, 1.1, 2.0]).unwrap();
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn empty_boxes_never_overlap() {
        let a = BoundingBox::new(3);
        let b = BoundingBox::from_bounds(&[0.0, 1.0, 0.0, 1.0, 0.0, 1.0]).unwrap();
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
    }

    #[test]
    fn wire_round_trip() {
        let a = BoundingBox::from_bounds(&[0.5, 1.5, -0.5, 0.5]).unwrap();
        let w = a.to_wire();
        let b = BoundingBox::from_wire(2, &w).unwrap();
        assert_eq!(a, b);
    }
}
