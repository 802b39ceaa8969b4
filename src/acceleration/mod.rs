//! Fixed-point acceleration for implicit coupling iterations.
//!
//! The scheme hands the accelerator a gather of every coupling data field
//! (current iterate + previous iterate) after a non-converged iteration;
//! the accelerator mutates the current iterates in place to produce the
//! next predictor. Kernels: constant under-relaxation, Aitken, and an
//! IQN-ILS quasi-Newton over the concatenated iterate history.

pub mod aitken;
pub mod constant;
pub mod iqn;

pub use aitken::AitkenAcceleration;
pub use constant::ConstantRelaxation;
pub use iqn::IqnIlsAcceleration;

use crate::error::CouplingError;
use crate::mesh::DataId;

/// Gathered view of one coupling data field for acceleration.
///
/// `values` is the solver's fresh iterate (mutated in place to become the
/// next input); `previous` is the iterate the solver started from.
pub struct IterateSlice {
    pub data: DataId,
    pub values: Vec<f64>,
    pub previous: Vec<f64>,
}

impl IterateSlice {
    /// Residual of this slice, `values - previous`.
    pub fn residual(&self) -> Vec<f64> {
        self.values
            .iter()
            .zip(&self.previous)
            .map(|(v, p)| v - p)
            .collect()
    }
}

/// Concatenate the per-slice buffers into one vector, the layout quasi-
/// Newton kernels operate on.
pub(crate) fn concat(slices: &[IterateSlice], pick: impl Fn(&IterateSlice) -> &[f64]) -> Vec<f64> {
    let mut out = Vec::new();
    for s in slices {
        out.extend_from_slice(pick(s));
    }
    out
}

/// Scatter a concatenated vector back into the slice values.
pub(crate) fn scatter(slices: &mut [IterateSlice], flat: &[f64]) {
    let mut offset = 0;
    for s in slices {
        let n = s.values.len();
        s.values.copy_from_slice(&flat[offset..offset + n]);
        offset += n;
    }
    debug_assert_eq!(offset, flat.len());
}

/// Interface between the implicit scheme and an acceleration kernel.
pub trait Acceleration: Send {
    /// Called once when the scheme initializes its storages.
    fn initialize(&mut self, slices: &[IterateSlice]) -> Result<(), CouplingError>;

    /// Produce the next predictor after a non-converged iteration.
    fn perform_acceleration(&mut self, slices: &mut [IterateSlice])
        -> Result<(), CouplingError>;

    /// A window converged; reset per-window state.
    fn iterations_converged(&mut self, slices: &[IterateSlice]) -> Result<(), CouplingError>;

    /// Columns currently in the least-squares system (quasi-Newton only).
    fn ls_system_cols(&self) -> usize {
        0
    }

    /// Columns removed for near-singularity.
    fn deleted_columns(&self) -> usize {
        0
    }

    /// Columns evicted by the history cap.
    fn dropped_columns(&self) -> usize {
        0
    }
}
