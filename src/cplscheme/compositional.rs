//! Compositional coupling: a participant involved in several bilateral
//! couplings runs them as one composed scheme.
//!
//! All operations delegate to the sub-schemes in declared order. The
//! composition is ongoing while any sub-scheme is; a window is complete
//! only when every sub-scheme completed one in the same outer step; action
//! queries union over the children.

use super::{Action, CouplingScheme};
use crate::com::IntraComm;
use crate::error::CouplingError;
use crate::mesh::{DataStore, MeshId};

pub struct CompositionalScheme {
    schemes: Vec<CouplingScheme>,
}

impl CompositionalScheme {
    pub fn new(schemes: Vec<CouplingScheme>) -> Result<Self, CouplingError> {
        if schemes.len() < 2 {
            return Err(CouplingError::Config(
                "a compositional coupling scheme needs at least two sub-schemes".into(),
            ));
        }
        Ok(Self { schemes })
    }

    pub fn schemes(&self) -> &[CouplingScheme] {
        &self.schemes
    }

    pub fn initialize(
        &mut self,
        store: &mut DataStore,
        intra: &IntraComm,
        start_time: f64,
        start_window: usize,
    ) -> Result<(), CouplingError> {
        for s in &mut self.schemes {
            s.initialize(store, intra, start_time, start_window)?;
        }
        Ok(())
    }

    pub fn receive_result_of_first_advance(
        &mut self,
        store: &mut DataStore,
        intra: &IntraComm,
    ) -> Result<(), CouplingError> {
        for s in &mut self.schemes {
            s.receive_result_of_first_advance(store, intra)?;
        }
        Ok(())
    }

    pub fn first_synchronization(
        &mut self,
        changes: &[MeshId],
    ) -> Result<Vec<MeshId>, CouplingError> {
        let mut out = Vec::new();
        for s in &mut self.schemes {
            out.extend(s.first_synchronization(changes)?);
        }
        Ok(out)
    }

    pub fn first_exchange(
        &mut self,
        store: &mut DataStore,
        intra: &IntraComm,
    ) -> Result<(), CouplingError> {
        for s in &mut self.schemes {
            s.first_exchange(store, intra)?;
        }
        Ok(())
    }

    pub fn second_synchronization(&mut self) -> Result<Vec<MeshId>, CouplingError> {
        let mut out = Vec::new();
        for s in &mut self.schemes {
            out.extend(s.second_synchronization()?);
        }
        Ok(out)
    }

    pub fn second_exchange(
        &mut self,
        store: &mut DataStore,
        intra: &IntraComm,
    ) -> Result<(), CouplingError> {
        for s in &mut self.schemes {
            s.second_exchange(store, intra)?;
        }
        Ok(())
    }

    pub fn finalize(&mut self) -> Result<(), CouplingError> {
        for s in &mut self.schemes {
            s.finalize()?;
        }
        Ok(())
    }

    pub fn add_computed_time(&mut self, dt: f64) -> Result<(), CouplingError> {
        for s in &mut self.schemes {
            if s.is_coupling_ongoing() {
                s.add_computed_time(dt)?;
            }
        }
        Ok(())
    }

    pub fn is_coupling_ongoing(&self) -> bool {
        self.schemes.iter().any(|s| s.is_coupling_ongoing())
    }

    pub fn is_time_window_complete(&self) -> bool {
        self.schemes.iter().all(|s| s.is_time_window_complete())
    }

    pub fn has_data_been_received(&self) -> bool {
        self.schemes.iter().any(|s| s.has_data_been_received())
    }

    pub fn has_time_window_size(&self) -> bool {
        self.schemes.iter().any(|s| s.has_time_window_size())
    }

    pub fn time_window_size(&self) -> Option<f64> {
        self.schemes.iter().find_map(|s| s.time_window_size())
    }

    pub fn time(&self) -> f64 {
        // Sub-schemes share the same solver time.
        self.schemes[0].time()
    }

    pub fn time_windows(&self) -> usize {
        self.schemes[0].time_windows()
    }

    pub fn this_time_window_remainder(&self) -> f64 {
        self.schemes
            .iter()
            .map(|s| s.this_time_window_remainder())
            .fold(f64::MAX, f64::min)
    }

    pub fn next_timestep_max_length(&self) -> f64 {
        self.schemes
            .iter()
            .map(|s| s.next_timestep_max_length())
            .fold(f64::MAX, f64::min)
    }

    pub fn will_data_be_exchanged(&self, last_dt: f64) -> bool {
        self.schemes.iter().any(|s| s.will_data_be_exchanged(last_dt))
    }

    pub fn sends_initialized_data(&self) -> bool {
        self.schemes.iter().any(|s| s.sends_initialized_data())
    }

    pub fn is_action_required(&self, action: Action) -> bool {
        self.schemes.iter().any(|s| s.is_action_required(action))
    }

    pub fn fulfill_action(&mut self, action: Action) -> bool {
        let mut any = false;
        for s in &mut self.schemes {
            any |= s.fulfill_action(action);
        }
        any
    }

    pub fn sets_time_window_size(&self) -> bool {
        self.schemes.iter().any(|s| s.sets_time_window_size())
    }

    pub fn print_state(&self) -> String {
        self.schemes
            .iter()
            .map(|s| s.print_state())
            .collect::<Vec<_>>()
            .join(" | ")
    }
}
