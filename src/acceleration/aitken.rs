//! Aitken under-relaxation: the relaxation factor adapts to consecutive
//! residuals.

use log::debug;

use super::{concat, Acceleration, IterateSlice};
use crate::error::CouplingError;

/// Dynamic under-relaxation after Aitken/Irons-Tuck.
///
/// The first iteration of every window uses the configured initial factor;
/// afterwards `omega_{k+1} = -omega_k * <R_{k-1}, dR> / <dR, dR>` with
/// `dR = R_k - R_{k-1}` over the concatenated residuals.
pub struct AitkenAcceleration {
    initial_omega: f64,
    omega: f64,
    previous_residual: Option<Vec<f64>>,
}

impl AitkenAcceleration {
    pub fn new(initial_omega: f64) -> Self {
        Self {
            initial_omega,
            omega: initial_omega,
            previous_residual: None,
        }
    }

    /// The factor used by the most recent acceleration step.
    #[inline]
    pub fn omega(&self) -> f64 {
        self.omega
    }
}

impl Acceleration for AitkenAcceleration {
    fn initialize(&mut self, _slices: &[IterateSlice]) -> Result<(), CouplingError> {
        Ok(())
    }

    fn perform_acceleration(
        &mut self,
        slices: &mut [IterateSlice],
    ) -> Result<(), CouplingError> {
        let values = concat(slices, |s| &s.values);
        let previous = concat(slices, |s| &s.previous);
        let residual: Vec<f64> = values.iter().zip(&previous).map(|(v, p)| v - p).collect();

        match &self.previous_residual {
            None => self.omega = self.initial_omega,
            Some(old) => {
                let dr: Vec<f64> = residual.iter().zip(old).map(|(r, o)| r - o).collect();
                let denom: f64 = dr.iter().map(|v| v * v).sum();
                if denom > 0.0 {
                    let num: f64 = old.iter().zip(&dr).map(|(o, d)| o * d).sum();
                    self.omega = -self.omega * num / denom;
                }
                // Keep the factor in a sane band; a wild overshoot is worse
                // than a slow iteration.
                self.omega = self.omega.clamp(-10.0, 10.0);
            }
        }
        debug!("aitken relaxation factor: {}", self.omega);

        let mut offset = 0;
        for s in slices.iter_mut() {
            let n = s.values.len();
            for i in 0..n {
                s.values[i] = s.previous[i] + self.omega * residual[offset + i];
            }
            offset += n;
        }
        self.previous_residual = Some(residual);
        Ok(())
    }

    fn iterations_converged(&mut self, _slices: &[IterateSlice]) -> Result<(), CouplingError> {
        self.previous_residual = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::DataId;

    fn slice(values: Vec<f64>, previous: Vec<f64>) -> IterateSlice {
        IterateSlice {
            data: DataId::new(0),
            values,
            previous,
        }
    }

    #[test]
    fn first_step_uses_initial_factor() {
        let mut acc = AitkenAcceleration::new(0.5);
        let mut s = vec![slice(vec![2.0], vec![0.0])];
        acc.perform_acceleration(&mut s).unwrap();
        assert_eq!(s[0].values, vec![1.0]);
    }

    #[test]
    fn factor_adapts_on_second_step() {
        let mut acc = AitkenAcceleration::new(0.5);
        let mut s = vec![slice(vec![2.0], vec![0.0])];
        acc.perform_acceleration(&mut s).unwrap();
        // Next iterate from the solver, residual shrank.
        let mut s = vec![slice(vec![1.5], vec![1.0])];
        acc.perform_acceleration(&mut s).unwrap();
        // old R = 2, new R = 0.5, dR = -1.5:
        // omega = -0.5 * (2 * -1.5) / 2.25 = 2/3
        let omega = acc.omega();
        assert!((omega - 2.0 / 3.0).abs() < 1e-12);
        assert!((s[0].values[0] - (1.0 + omega * 0.5)).abs() < 1e-12);
    }

    #[test]
    fn converged_window_resets_history() {
        let mut acc = AitkenAcceleration::new(0.5);
        let mut s = vec![slice(vec![2.0], vec![0.0])];
        acc.perform_acceleration(&mut s).unwrap();
        acc.iterations_converged(&s).unwrap();
        let mut s = vec![slice(vec![4.0], vec![0.0])];
        acc.perform_acceleration(&mut s).unwrap();
        // Back to the initial factor.
        assert_eq!(s[0].values, vec![2.0]);
    }
}
