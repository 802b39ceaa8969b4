//! Field data attached to a mesh, plus meshless global data.
//!
//! Values are a dense `f64` buffer of length `|vertices| * components`,
//! vertex-major. Gradient storage, when requested, is a matrix of shape
//! `space_dim x (components * |vertices|)` stored column-blockwise: the
//! block of `components` columns belonging to vertex `v` starts at column
//! `v * components`.

use serde::{Deserialize, Serialize};

use crate::error::CouplingError;

/// Stable id of a data field, unique across the whole configuration.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct DataId(pub(crate) u32);

impl DataId {
    /// Create from a raw index.
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw index value.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for DataId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named field living on the vertices of one mesh.
#[derive(Clone, Debug)]
pub struct Data {
    name: String,
    id: DataId,
    /// 1 for scalar data, `space_dim` for vector data.
    components: usize,
    /// Spatial dimension of the owning mesh; fixes the gradient row count.
    space_dim: usize,
    has_gradient: bool,
    values: Vec<f64>,
    gradients: Vec<f64>,
}

impl Data {
    pub fn new(
        name: impl Into<String>,
        id: DataId,
        components: usize,
        space_dim: usize,
        has_gradient: bool,
    ) -> Self {
        debug_assert!(components >= 1);
        Self {
            name: name.into(),
            id,
            components,
            space_dim,
            has_gradient,
            values: Vec::new(),
            gradients: Vec::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn id(&self) -> DataId {
        self.id
    }

    /// Number of components per vertex (1 = scalar).
    #[inline]
    pub fn components(&self) -> usize {
        self.components
    }

    #[inline]
    pub fn space_dim(&self) -> usize {
        self.space_dim
    }

    #[inline]
    pub fn has_gradient(&self) -> bool {
        self.has_gradient
    }

    /// Resize the value (and gradient) buffers for `vertex_count` vertices,
    /// zero-filling. Called on every vertex insertion and after partitioning.
    pub fn allocate_values(&mut self, vertex_count: usize) {
        self.values.clear();
        self.values.resize(vertex_count * self.components, 0.0);
        if self.has_gradient {
            self.gradients.clear();
            self.gradients
                .resize(self.space_dim * self.components * vertex_count, 0.0);
        }
    }

    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[inline]
    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    #[inline]
    pub fn gradients(&self) -> &[f64] {
        &self.gradients
    }

    #[inline]
    pub fn gradients_mut(&mut self) -> &mut [f64] {
        &mut self.gradients
    }

    /// Zero all stored values and gradients, keeping the allocation.
    pub fn reset(&mut self) {
        self.values.iter_mut().for_each(|v| *v = 0.0);
        self.gradients.iter_mut().for_each(|v| *v = 0.0);
    }

    /// Length of the gradient block of one vertex.
    #[inline]
    pub fn gradient_stride(&self) -> usize {
        self.space_dim * self.components
    }
}

/// A field not attached to any mesh: a single scalar or vector value.
///
/// Semantically a [`Data`] on a one-vertex mesh, but transported with a
/// dedicated message kind rather than a mesh id.
#[derive(Clone, Debug)]
pub struct GlobalData {
    name: String,
    id: DataId,
    components: usize,
    values: Vec<f64>,
}

impl GlobalData {
    pub fn new(name: impl Into<String>, id: DataId, components: usize) -> Self {
        debug_assert!(components >= 1);
        Self {
            name: name.into(),
            id,
            components,
            values: vec![0.0; components],
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn id(&self) -> DataId {
        self.id
    }

    #[inline]
    pub fn components(&self) -> usize {
        self.components
    }

    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[inline]
    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// Check that a caller-supplied component count matches.
    pub fn check_components(&self, assumed: usize) -> Result<(), CouplingError> {
        if assumed != self.components {
            return Err(CouplingError::DimensionMismatch {
                data: self.name.clone(),
                actual: self.components,
                assumed,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_matches_invariant() {
        let mut d = Data::new("Forces", DataId::new(0), 2, 2, false);
        d.allocate_values(5);
        assert_eq!(d.values().len(), 10);
        assert!(d.gradients().is_empty());
    }

    #[test]
    fn gradient_buffer_shape() {
        let mut d = Data::new("Velocities", DataId::new(1), 3, 3, true);
        d.allocate_values(4);
        // 3 rows x (3 components * 4 vertices) columns
        assert_eq!(d.gradients().len(), 3 * 3 * 4);
        assert_eq!(d.gradient_stride(), 9);
    }

    #[test]
    fn reallocation_zeroes() {
        let mut d = Data::new("P", DataId::new(2), 1, 2, false);
        d.allocate_values(2);
        d.values_mut()[0] = 3.0;
        d.allocate_values(3);
        assert!(d.values().iter().all(|&v| v == 0.0));
        assert_eq!(d.values().len(), 3);
    }

    #[test]
    fn global_data_component_check() {
        let g = GlobalData::new("Angle", DataId::new(3), 1);
        assert!(g.check_components(1).is_ok());
        assert!(g.check_components(3).is_err());
    }
}
