//! Convergence measures for implicit coupling iterations.
//!
//! A measure compares the previous iterate against the current values of
//! one coupling data field and yields a verdict plus the residual norm for
//! the convergence log. Residual norms are l2 over the whole participant,
//! so multi-rank runs reduce the squared sums through the intra
//! communicator before taking the root.

use crate::mesh::DataId;

/// The criterion a measure applies to `||new - old||`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Criterion {
    /// `||new - old|| <= limit`.
    Absolute { limit: f64 },
    /// `||new - old|| <= limit * ||new||`.
    Relative { limit: f64 },
    /// `||new - old|| <= limit * ||first residual of this window||`.
    ResidualRelative { limit: f64 },
}

/// One measure over one coupling data field.
#[derive(Clone, Debug)]
pub struct ConvergenceMeasure {
    criterion: Criterion,
    /// First residual norm of the current measurement series
    /// (residual-relative criterion only).
    first_residual: Option<f64>,
    converged: bool,
    norm: f64,
}

impl ConvergenceMeasure {
    pub fn new(criterion: Criterion) -> Self {
        Self {
            criterion,
            first_residual: None,
            converged: false,
            norm: 0.0,
        }
    }

    /// Forget window-local state when a new measurement series starts.
    pub fn new_series(&mut self) {
        self.first_residual = None;
        self.converged = false;
        self.norm = 0.0;
    }

    /// Measure with pre-reduced global norms (squared sums already summed
    /// over ranks and rooted by the caller).
    pub fn measure_norms(&mut self, residual_norm: f64, new_norm: f64) {
        self.norm = residual_norm;
        self.converged = match self.criterion {
            Criterion::Absolute { limit } => residual_norm <= limit,
            Criterion::Relative { limit } => residual_norm <= limit * new_norm,
            Criterion::ResidualRelative { limit } => {
                let first = *self.first_residual.get_or_insert(residual_norm);
                residual_norm <= limit * first
            }
        };
    }

    /// Single-rank convenience: compute the norms locally.
    pub fn measure(&mut self, old: &[f64], new: &[f64]) {
        debug_assert_eq!(old.len(), new.len());
        let res2: f64 = old
            .iter()
            .zip(new)
            .map(|(o, n)| (n - o) * (n - o))
            .sum();
        let new2: f64 = new.iter().map(|v| v * v).sum();
        self.measure_norms(res2.sqrt(), new2.sqrt());
    }

    #[inline]
    pub fn is_converged(&self) -> bool {
        self.converged
    }

    #[inline]
    pub fn norm_residual(&self) -> f64 {
        self.norm
    }

    /// Column name in the convergence log, e.g. `ResAbs(Forces)`.
    pub fn log_header(&self, data_name: &str) -> String {
        let abbrev = match self.criterion {
            Criterion::Absolute { .. } => "Abs",
            Criterion::Relative { .. } => "Rel",
            Criterion::ResidualRelative { .. } => "Drop",
        };
        format!("Res{abbrev}({data_name})")
    }
}

/// A measure bound to one coupling data field plus its scheme-level flags.
pub struct MeasureContext {
    pub data: DataId,
    pub data_name: String,
    /// This measure alone may declare the iteration converged.
    pub suffices: bool,
    /// This measure must converge; failing at the iteration limit is fatal.
    pub strict: bool,
    pub does_logging: bool,
    pub measure: ConvergenceMeasure,
}
