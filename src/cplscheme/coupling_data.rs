//! Exchange-layer wrapper around a data field.
//!
//! A `CouplingData` tracks, next to the live buffer in the store, the
//! previous iterate (for convergence measurement and acceleration) and a
//! bounded history of converged window-end values feeding the
//! extrapolation predictor.

use std::collections::VecDeque;

use crate::mesh::{DataId, DataStore, MeshId};

/// What the wrapped field is attached to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataLocation {
    Mesh(MeshId),
    Global,
}

/// Scheme-side state of one exchanged data field.
pub struct CouplingData {
    data: DataId,
    location: DataLocation,
    components: usize,
    has_gradient: bool,
    pub requires_initialization: bool,
    /// Snapshot of the last iterate handed to the solver.
    previous_iteration: Vec<f64>,
    /// Converged window-end values, most recent first; length is
    /// `extrapolation_order + 1`.
    history: VecDeque<Vec<f64>>,
    extrapolation_order: usize,
}

impl CouplingData {
    pub fn new(
        data: DataId,
        location: DataLocation,
        components: usize,
        has_gradient: bool,
        requires_initialization: bool,
        extrapolation_order: usize,
    ) -> Self {
        Self {
            data,
            location,
            components,
            has_gradient,
            requires_initialization,
            previous_iteration: Vec::new(),
            history: VecDeque::new(),
            extrapolation_order,
        }
    }

    #[inline]
    pub fn id(&self) -> DataId {
        self.data
    }

    #[inline]
    pub fn location(&self) -> DataLocation {
        self.location
    }

    #[inline]
    pub fn components(&self) -> usize {
        self.components
    }

    #[inline]
    pub fn has_gradient(&self) -> bool {
        self.has_gradient
    }

    /// Mesh id for wire addressing; `None` for global data.
    pub fn mesh_id(&self) -> Option<MeshId> {
        match self.location {
            DataLocation::Mesh(m) => Some(m),
            DataLocation::Global => None,
        }
    }

    /// Live values, resolved through the store.
    pub fn values<'s>(&self, store: &'s DataStore) -> &'s [f64] {
        match self.location {
            DataLocation::Mesh(m) => store.values(m, self.data),
            DataLocation::Global => store
                .global(self.data)
                .expect("global data resolved through configuration")
                .values(),
        }
    }

    pub fn values_mut<'s>(&self, store: &'s mut DataStore) -> &'s mut [f64] {
        match self.location {
            DataLocation::Mesh(m) => store.values_mut(m, self.data),
            DataLocation::Global => store
                .global_mut(self.data)
                .expect("global data resolved through configuration")
                .values_mut(),
        }
    }

    #[inline]
    pub fn previous_iteration(&self) -> &[f64] {
        &self.previous_iteration
    }

    /// Snapshot the live values for the next convergence test.
    pub fn store_iteration(&mut self, store: &DataStore) {
        self.previous_iteration = self.values(store).to_vec();
    }

    /// Reserve the extrapolation history, seeded with the current values.
    pub fn initialize_extrapolation(&mut self, store: &DataStore) {
        let current = self.values(store).to_vec();
        self.history = std::iter::repeat(current)
            .take(self.extrapolation_order + 1)
            .collect();
    }

    /// Overwrite the current-window slot of the history with the live
    /// iterate.
    pub fn store_extrapolation(&mut self, store: &DataStore) {
        let current = self.values(store).to_vec();
        if let Some(front) = self.history.front_mut() {
            front.clear();
            front.extend_from_slice(&current);
        }
    }

    /// Window converged: rotate the history and write the predictor for
    /// the next window into the live buffer.
    ///
    /// Order 0 carries the converged values forward; order 1 extrapolates
    /// linearly from the last two converged windows.
    pub fn move_to_next_window(&mut self, store: &mut DataStore) {
        if self.history.is_empty() {
            return;
        }
        // The predictor reads the pre-rotation history: slot 0 holds the
        // just-converged window, slot 1 the window before it. Rotating
        // first would evict slot 1 and collapse order 1 to order 0.
        let predicted: Vec<f64> = match self.extrapolation_order {
            0 => self.history[0].clone(),
            1 => {
                let v0 = &self.history[0];
                let v1 = &self.history[1];
                v0.iter().zip(v1).map(|(a, b)| 2.0 * a - b).collect()
            }
            _ => unreachable!("extrapolation order is validated at configuration"),
        };
        let newest = self.history.front().expect("non-empty history").clone();
        self.history.push_front(newest);
        self.history.truncate(self.extrapolation_order + 1);
        self.values_mut(store).copy_from_slice(&predicted);
    }

    /// Last converged window-end values, if a window completed yet.
    pub fn last_converged(&self) -> Option<&[f64]> {
        self.history.front().map(|v| v.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{GlobalData, Mesh};

    fn store_with_scalar() -> (DataStore, MeshId, DataId) {
        let mut store = DataStore::new();
        let mut mesh = Mesh::new("M", MeshId::new(0), 2);
        let did = DataId::new(0);
        mesh.add_data("x", did, 1, false);
        mesh.add_vertex(&[0.0, 0.0]);
        let mid = store.insert_mesh(mesh);
        (store, mid, did)
    }

    #[test]
    fn store_iteration_snapshots() {
        let (mut store, mid, did) = store_with_scalar();
        let mut cd = CouplingData::new(did, DataLocation::Mesh(mid), 1, false, false, 0);
        store.values_mut(mid, did)[0] = 2.0;
        cd.store_iteration(&store);
        store.values_mut(mid, did)[0] = 5.0;
        assert_eq!(cd.previous_iteration(), &[2.0]);
        assert_eq!(cd.values(&store), &[5.0]);
    }

    #[test]
    fn order_zero_carries_values_forward() {
        let (mut store, mid, did) = store_with_scalar();
        let mut cd = CouplingData::new(did, DataLocation::Mesh(mid), 1, false, false, 0);
        cd.initialize_extrapolation(&store);
        store.values_mut(mid, did)[0] = 3.0;
        cd.store_extrapolation(&store);
        store.values_mut(mid, did)[0] = 99.0;
        cd.move_to_next_window(&mut store);
        assert_eq!(store.values(mid, did), &[3.0]);
    }

    #[test]
    fn order_one_extrapolates_linearly() {
        let (mut store, mid, did) = store_with_scalar();
        let mut cd = CouplingData::new(did, DataLocation::Mesh(mid), 1, false, false, 1);
        cd.initialize_extrapolation(&store); // history seeded with 0.0
        store.values_mut(mid, did)[0] = 1.0;
        cd.store_extrapolation(&store);
        cd.move_to_next_window(&mut store);
        // linear through 0.0 and 1.0 predicts 2.0
        assert_eq!(store.values(mid, did), &[2.0]);
    }

    #[test]
    fn global_data_round_trip() {
        let mut store = DataStore::new();
        let did = DataId::new(7);
        store.insert_global(GlobalData::new("G", did, 2));
        let mut cd = CouplingData::new(did, DataLocation::Global, 2, false, false, 0);
        cd.values_mut(&mut store).copy_from_slice(&[1.0, 2.0]);
        cd.store_iteration(&store);
        assert_eq!(cd.previous_iteration(), &[1.0, 2.0]);
        assert!(cd.mesh_id().is_none());
    }
}
