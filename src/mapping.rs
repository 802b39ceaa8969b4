//! Mapping seam between two meshes carrying the same field.
//!
//! Numeric kernels are pluggable behind the [`Mapping`] trait; the crate
//! ships nearest-neighbor as the baseline kernel. Projection and RBF
//! kernels slot in through the same interface without touching the
//! orchestration layers.

use crate::error::CouplingError;
use crate::mesh::Mesh;

/// How values are transferred across non-matching meshes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MappingConstraint {
    /// Interpolate: each output vertex takes the value of its stencil.
    Consistent,
    /// Redistribute: input values are summed into output vertices so the
    /// integral quantity is conserved.
    Conservative,
}

/// When a configured mapping runs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MappingTiming {
    /// Once, while exchanging initial data.
    Initial,
    /// On every advance that exchanges data.
    OnAdvance,
}

/// A mapping kernel between a `from` mesh and a `to` mesh.
///
/// `compute` builds the interpolation stencil from the partitioned meshes;
/// `map` applies it to one value buffer. Kernels are re-computed after a
/// mesh is reset and re-partitioned.
pub trait Mapping: Send {
    fn constraint(&self) -> MappingConstraint;

    /// Build the stencil for the given mesh pair.
    fn compute(&mut self, from: &Mesh, to: &Mesh) -> Result<(), CouplingError>;

    /// True once `compute` ran against the current partitions.
    fn has_computed(&self) -> bool;

    /// Drop the stencil (mesh was reset).
    fn clear(&mut self);

    /// Apply the mapping to a buffer of `components` values per vertex.
    ///
    /// `from_values.len()` must equal `|from vertices| * components` at
    /// compute time; same for `to_values` on the output mesh.
    fn map(
        &self,
        components: usize,
        from_values: &[f64],
        to_values: &mut [f64],
    ) -> Result<(), CouplingError>;
}

/// Nearest-neighbor mapping.
///
/// Consistent: every output vertex copies its nearest input vertex.
/// Conservative: every input vertex adds its value to its nearest output
/// vertex.
pub struct NearestNeighborMapping {
    constraint: MappingConstraint,
    /// Consistent: index per output vertex. Conservative: index per input
    /// vertex.
    stencil: Vec<usize>,
    from_count: usize,
    to_count: usize,
    computed: bool,
}

impl NearestNeighborMapping {
    pub fn new(constraint: MappingConstraint) -> Self {
        Self {
            constraint,
            stencil: Vec::new(),
            from_count: 0,
            to_count: 0,
            computed: false,
        }
    }

    fn nearest(mesh: &Mesh, point: &[f64], dim: usize) -> usize {
        let mut best = 0;
        let mut best_d = f64::INFINITY;
        for (i, v) in mesh.vertices().iter().enumerate() {
            let c = v.coords(dim);
            let d: f64 = (0..dim).map(|k| (c[k] - point[k]) * (c[k] - point[k])).sum();
            if d < best_d {
                best_d = d;
                best = i;
            }
        }
        best
    }

    /// One nearest-source index per query vertex.
    #[cfg(feature = "rayon")]
    fn nearest_all(source: &Mesh, queries: &Mesh, dim: usize) -> Vec<usize> {
        use rayon::prelude::*;
        queries
            .vertices()
            .par_iter()
            .map(|v| Self::nearest(source, v.coords(dim), dim))
            .collect()
    }

    #[cfg(not(feature = "rayon"))]
    fn nearest_all(source: &Mesh, queries: &Mesh, dim: usize) -> Vec<usize> {
        queries
            .vertices()
            .iter()
            .map(|v| Self::nearest(source, v.coords(dim), dim))
            .collect()
    }
}

impl Mapping for NearestNeighborMapping {
    fn constraint(&self) -> MappingConstraint {
        self.constraint
    }

    fn compute(&mut self, from: &Mesh, to: &Mesh) -> Result<(), CouplingError> {
        let dim = from.dim();
        debug_assert_eq!(dim, to.dim());
        self.from_count = from.vertex_count();
        self.to_count = to.vertex_count();
        match self.constraint {
            MappingConstraint::Consistent => {
                if self.from_count == 0 && self.to_count > 0 {
                    return Err(CouplingError::Protocol(
                        "cannot map from an empty mesh partition".into(),
                    ));
                }
                self.stencil = Self::nearest_all(from, to, dim);
            }
            MappingConstraint::Conservative => {
                if self.to_count == 0 && self.from_count > 0 {
                    return Err(CouplingError::Protocol(
                        "cannot map onto an empty mesh partition".into(),
                    ));
                }
                self.stencil = Self::nearest_all(to, from, dim);
            }
        }
        self.computed = true;
        Ok(())
    }

    fn has_computed(&self) -> bool {
        self.computed
    }

    fn clear(&mut self) {
        self.stencil.clear();
        self.computed = false;
    }

    fn map(
        &self,
        components: usize,
        from_values: &[f64],
        to_values: &mut [f64],
    ) -> Result<(), CouplingError> {
        debug_assert!(self.computed, "map called before compute");
        debug_assert_eq!(from_values.len(), self.from_count * components);
        debug_assert_eq!(to_values.len(), self.to_count * components);
        match self.constraint {
            MappingConstraint::Consistent => {
                for (out_idx, &in_idx) in self.stencil.iter().enumerate() {
                    let src = &from_values[in_idx * components..(in_idx + 1) * components];
                    to_values[out_idx * components..(out_idx + 1) * components]
                        .copy_from_slice(src);
                }
            }
            MappingConstraint::Conservative => {
                to_values.iter_mut().for_each(|v| *v = 0.0);
                for (in_idx, &out_idx) in self.stencil.iter().enumerate() {
                    for c in 0..components {
                        to_values[out_idx * components + c] +=
                            from_values[in_idx * components + c];
                    }
                }
            }
        }
        Ok(())
    }
}
