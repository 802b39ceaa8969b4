//! The coupling scheme engine: time windows, exchange ordering, implicit
//! iteration with convergence measurement and acceleration.
//!
//! Schemes form a closed sum type ([`CouplingScheme`]); each variant drives
//! the same four-phase advance contract the solver interface calls into:
//! `first_synchronization`, `first_exchange`, `second_synchronization`,
//! `second_exchange`.

pub mod base;
pub mod bi;
pub mod compositional;
pub mod convergence;
pub mod coupling_data;
pub mod multi;
pub mod parallel;
pub mod serial;

pub use base::{IterationOutcome, SchemeCore, SchemeParams};
pub use bi::BiData;
pub use compositional::CompositionalScheme;
pub use convergence::{ConvergenceMeasure, Criterion, MeasureContext};
pub use coupling_data::{CouplingData, DataLocation};
pub use multi::MultiScheme;
pub use parallel::ParallelScheme;
pub use serial::SerialScheme;

use crate::com::IntraComm;
use crate::error::CouplingError;
use crate::mesh::{DataStore, MeshId};

/// Explicit: one pass per window. Implicit: fixed-point iterated.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CouplingMode {
    Explicit,
    Implicit,
}

/// How the time window size is determined.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TimesteppingMethod {
    /// Fixed size from the configuration.
    FixedWindowSize,
    /// The first participant announces its measured window size.
    FirstParticipantSets,
}

/// An obligation the scheme places on the solver. The solver fulfills it by
/// calling the matching `requires_*` query before the next phase.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Action {
    InitializeData,
    ReadCheckpoint,
    WriteCheckpoint,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Action::InitializeData => "InitializeData",
            Action::ReadCheckpoint => "ReadCheckpoint",
            Action::WriteCheckpoint => "WriteCheckpoint",
        };
        f.write_str(name)
    }
}

/// Closed sum of the scheme variants.
///
/// `SerialExplicit`/`SerialImplicit` (and the parallel pair) share a
/// variant; the mode lives in the scheme core.
pub enum CouplingScheme {
    Serial(SerialScheme),
    Parallel(ParallelScheme),
    Multi(MultiScheme),
    Compositional(CompositionalScheme),
}

macro_rules! dispatch {
    ($self:expr, $scheme:ident => $body:expr) => {
        match $self {
            CouplingScheme::Serial($scheme) => $body,
            CouplingScheme::Parallel($scheme) => $body,
            CouplingScheme::Multi($scheme) => $body,
            CouplingScheme::Compositional($scheme) => $body,
        }
    };
}

impl CouplingScheme {
    pub fn initialize(
        &mut self,
        store: &mut DataStore,
        intra: &IntraComm,
        start_time: f64,
        start_window: usize,
    ) -> Result<(), CouplingError> {
        dispatch!(self, s => s.initialize(store, intra, start_time, start_window))
    }

    pub fn receive_result_of_first_advance(
        &mut self,
        store: &mut DataStore,
        intra: &IntraComm,
    ) -> Result<(), CouplingError> {
        dispatch!(self, s => s.receive_result_of_first_advance(store, intra))
    }

    pub fn first_synchronization(
        &mut self,
        changes: &[MeshId],
    ) -> Result<Vec<MeshId>, CouplingError> {
        dispatch!(self, s => s.first_synchronization(changes))
    }

    pub fn first_exchange(
        &mut self,
        store: &mut DataStore,
        intra: &IntraComm,
    ) -> Result<(), CouplingError> {
        dispatch!(self, s => s.first_exchange(store, intra))
    }

    pub fn second_synchronization(&mut self) -> Result<Vec<MeshId>, CouplingError> {
        dispatch!(self, s => s.second_synchronization())
    }

    pub fn second_exchange(
        &mut self,
        store: &mut DataStore,
        intra: &IntraComm,
    ) -> Result<(), CouplingError> {
        dispatch!(self, s => s.second_exchange(store, intra))
    }

    pub fn finalize(&mut self) -> Result<(), CouplingError> {
        dispatch!(self, s => s.finalize())
    }

    pub fn add_computed_time(&mut self, dt: f64) -> Result<(), CouplingError> {
        dispatch!(self, s => s.add_computed_time(dt))
    }

    pub fn is_coupling_ongoing(&self) -> bool {
        dispatch!(self, s => s.is_coupling_ongoing())
    }

    pub fn is_time_window_complete(&self) -> bool {
        dispatch!(self, s => s.is_time_window_complete())
    }

    pub fn has_data_been_received(&self) -> bool {
        dispatch!(self, s => s.has_data_been_received())
    }

    pub fn has_time_window_size(&self) -> bool {
        dispatch!(self, s => s.has_time_window_size())
    }

    pub fn time_window_size(&self) -> Option<f64> {
        dispatch!(self, s => s.time_window_size())
    }

    pub fn time(&self) -> f64 {
        dispatch!(self, s => s.time())
    }

    pub fn time_windows(&self) -> usize {
        dispatch!(self, s => s.time_windows())
    }

    pub fn this_time_window_remainder(&self) -> f64 {
        dispatch!(self, s => s.this_time_window_remainder())
    }

    pub fn next_timestep_max_length(&self) -> f64 {
        dispatch!(self, s => s.next_timestep_max_length())
    }

    pub fn will_data_be_exchanged(&self, last_dt: f64) -> bool {
        dispatch!(self, s => s.will_data_be_exchanged(last_dt))
    }

    pub fn sends_initialized_data(&self) -> bool {
        dispatch!(self, s => s.sends_initialized_data())
    }

    pub fn is_action_required(&self, action: Action) -> bool {
        dispatch!(self, s => s.is_action_required(action))
    }

    /// Query-and-fulfill: returns whether the action is required and marks
    /// it fulfilled in one step.
    pub fn fulfill_action(&mut self, action: Action) -> bool {
        dispatch!(self, s => s.fulfill_action(action))
    }

    /// Whether this participant announces the time window size and may
    /// therefore only be read at the window end.
    pub fn sets_time_window_size(&self) -> bool {
        match self {
            CouplingScheme::Serial(s) => s.sets_time_window_size(),
            CouplingScheme::Compositional(c) => c.sets_time_window_size(),
            _ => false,
        }
    }

    /// Human-readable state summary for the participant log.
    pub fn print_state(&self) -> String {
        dispatch!(self, s => s.print_state())
    }
}
