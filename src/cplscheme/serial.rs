//! Serial coupling: the first participant computes and sends, then the
//! second computes on the fresh data and sends back.
//!
//! The serial ordering is what enables the first-participant time-stepping
//! method: the first participant finishes its window before the second
//! starts it, so the measured window size can ride along with the data.

use std::sync::Arc;

use log::debug;

use super::base::{SchemeCore, SchemeParams};
use super::bi::BiData;
use super::coupling_data::DataLocation;
use super::{Action, CouplingMode, TimesteppingMethod};
use crate::acceleration::Acceleration;
use crate::com::{IntraComm, M2N};
use crate::error::CouplingError;
use crate::math;
use crate::mesh::{DataId, DataStore, MeshId};

/// Serial explicit or implicit coupling of two participants.
pub struct SerialScheme {
    core: SchemeCore,
    bi: BiData,
    /// First-participant method: this side measures and announces the size.
    sets_time_window_size: bool,
    /// First-participant method: this side receives the size.
    receives_time_window_size: bool,
}

impl SerialScheme {
    pub fn new(
        params: SchemeParams,
        m2n: Arc<M2N>,
        first: impl Into<String>,
        second: impl Into<String>,
        dt_method: TimesteppingMethod,
    ) -> Result<Self, CouplingError> {
        let local = params.local_participant.clone();
        let mut core = SchemeCore::new(params)?;
        let (bi, does_first_step) = BiData::new(m2n, first, second, &local)?;
        core.set_does_first_step(does_first_step);

        let mut sets = false;
        let mut receives = false;
        match dt_method {
            TimesteppingMethod::FixedWindowSize => {
                if !core.has_time_window_size() {
                    return Err(CouplingError::Config(
                        "the fixed time window size method needs a configured window size"
                            .into(),
                    ));
                }
            }
            TimesteppingMethod::FirstParticipantSets => {
                if does_first_step {
                    core.clear_time_window_size();
                    sets = true;
                } else {
                    receives = true;
                }
            }
        }
        Ok(Self {
            core,
            bi,
            sets_time_window_size: sets,
            receives_time_window_size: receives,
        })
    }

    // --- assembly (configuration time) ---

    pub fn add_data_to_send(
        &mut self,
        id: DataId,
        location: DataLocation,
        components: usize,
        has_gradient: bool,
        requires_initialization: bool,
        name: &str,
    ) -> Result<(), CouplingError> {
        self.core
            .add_coupling_data(id, location, components, has_gradient, requires_initialization);
        match location {
            DataLocation::Mesh(_) => self.bi.add_send(id, name),
            DataLocation::Global => self.bi.add_send_global(id, name),
        }
    }

    pub fn add_data_to_receive(
        &mut self,
        id: DataId,
        location: DataLocation,
        components: usize,
        has_gradient: bool,
        requires_initialization: bool,
        name: &str,
    ) -> Result<(), CouplingError> {
        self.core
            .add_coupling_data(id, location, components, has_gradient, requires_initialization);
        match location {
            DataLocation::Mesh(_) => self.bi.add_recv(id, name),
            DataLocation::Global => self.bi.add_recv_global(id, name),
        }
    }

    /// Derive the initial-data flags from the registered exchanges.
    pub fn determine_initial_data_exchange(&mut self) {
        let send: Vec<DataId> = self
            .bi
            .send_ids()
            .iter()
            .chain(self.bi.send_global_ids())
            .copied()
            .collect();
        let recv: Vec<DataId> = self
            .bi
            .recv_ids()
            .iter()
            .chain(self.bi.recv_global_ids())
            .copied()
            .collect();
        self.core.determine_initial_send(&send);
        self.core.determine_initial_receive(&recv);
    }

    pub fn add_convergence_measure(&mut self, ctx: super::convergence::MeasureContext) {
        self.core.add_convergence_measure(ctx);
    }

    pub fn set_acceleration(&mut self, acceleration: Box<dyn Acceleration>) {
        self.core.set_acceleration(acceleration);
    }

    #[inline]
    pub fn core(&self) -> &SchemeCore {
        &self.core
    }

    #[inline]
    pub fn partner(&self) -> &str {
        self.bi.partner(self.core.does_first_step())
    }

    // --- helpers ---

    fn send_time_window_size(&self, intra: &IntraComm) -> Result<(), CouplingError> {
        if self.sets_time_window_size && intra.is_primary() {
            let measured = self.core.computed_time_window_part();
            debug!("sending time window size {measured}");
            self.bi.m2n().send_time_window_size(measured)?;
        }
        Ok(())
    }

    fn receive_and_set_time_window_size(
        &mut self,
        intra: &IntraComm,
    ) -> Result<(), CouplingError> {
        if self.receives_time_window_size {
            let dt = if intra.is_primary() {
                self.bi.m2n().recv_time_window_size()?
            } else {
                0.0
            };
            let dt = intra.broadcast_f64(dt)?;
            debug!("received time window size {dt}");
            if !math::greater(dt, 0.0, self.core.eps()) {
                return Err(CouplingError::Protocol(format!(
                    "received non-positive time window size {dt}"
                )));
            }
            self.core.set_time_window_size(dt);
        }
        Ok(())
    }

    fn receive_convergence(&mut self, intra: &IntraComm) -> Result<(), CouplingError> {
        let verdict = if intra.is_primary() {
            self.bi.m2n().recv_convergence()?
        } else {
            false
        };
        let verdict = intra.broadcast_bool(verdict)?;
        self.core.set_has_converged(verdict);
        Ok(())
    }

    fn send_all(&self, store: &DataStore, intra: &IntraComm) -> Result<(), CouplingError> {
        self.core
            .send_data(store, self.bi.m2n(), intra, self.bi.send_ids())?;
        self.core
            .send_data(store, self.bi.m2n(), intra, self.bi.send_global_ids())
    }

    fn receive_all(
        &mut self,
        store: &mut DataStore,
        intra: &IntraComm,
    ) -> Result<(), CouplingError> {
        let ids: Vec<DataId> = self.bi.recv_ids().to_vec();
        self.core.receive_data(store, self.bi.m2n(), intra, &ids)?;
        let globals: Vec<DataId> = self.bi.recv_global_ids().to_vec();
        self.core
            .receive_data(store, self.bi.m2n(), intra, &globals)
    }

    fn exchange_initial_data(
        &mut self,
        store: &mut DataStore,
        intra: &IntraComm,
    ) -> Result<(), CouplingError> {
        // First: send then receive; second: receive then send.
        if self.core.does_first_step() {
            if self.core.sends_initialized_data() {
                self.send_all(store, intra)?;
            }
            if self.core.receives_initialized_data() {
                self.receive_all(store, intra)?;
                self.core.check_data_has_been_received();
            }
        } else {
            if self.core.receives_initialized_data() {
                self.receive_all(store, intra)?;
                self.core.check_data_has_been_received();
            }
            if self.core.sends_initialized_data() {
                self.send_all(store, intra)?;
            }
        }
        Ok(())
    }

    // --- contract ---

    pub fn initialize(
        &mut self,
        store: &mut DataStore,
        intra: &IntraComm,
        start_time: f64,
        start_window: usize,
    ) -> Result<(), CouplingError> {
        debug_assert!(!self.core.is_initialized());
        debug_assert!(start_time >= 0.0);
        self.core.set_time(start_time);
        self.core.set_time_windows(start_window);
        self.core.reset_data_received();

        if self.core.is_implicit() {
            if !self.core.does_first_step() {
                if !self.core.has_convergence_measures() {
                    return Err(CouplingError::MissingConvergenceMeasure);
                }
                self.core.initialize_storages(store)?;
            }
            self.core.require_action(Action::WriteCheckpoint);
            self.core.initialize_txt_writers(intra)?;
            self.core.store_iteration(store);
        }

        self.exchange_initial_data(store, intra)?;

        if self.core.is_implicit() && !self.core.does_first_step() {
            self.core.store_extrapolation_data(store);
            self.core.move_to_next_window(store);
        }
        self.core.mark_initialized();
        Ok(())
    }

    /// Serial specialty: the second participant receives the first
    /// participant's initial window result right after `initialize`.
    pub fn receive_result_of_first_advance(
        &mut self,
        store: &mut DataStore,
        intra: &IntraComm,
    ) -> Result<(), CouplingError> {
        debug_assert!(self.core.is_initialized());
        self.core.reset_data_received();
        if !self.core.does_first_step() {
            self.receive_and_set_time_window_size(intra)?;
            debug!("receiving result of first advance");
            self.receive_all(store, intra)?;
            self.core.check_data_has_been_received();
        }
        Ok(())
    }

    pub fn first_synchronization(
        &mut self,
        changes: &[MeshId],
    ) -> Result<Vec<MeshId>, CouplingError> {
        debug_assert!(changes.is_empty(), "runtime mesh changes are not supported");
        Ok(Vec::new())
    }

    pub fn first_exchange(
        &mut self,
        store: &mut DataStore,
        intra: &IntraComm,
    ) -> Result<(), CouplingError> {
        self.core.check_completeness_required_actions()?;
        debug_assert!(self.core.is_initialized(), "first_exchange before initialize");
        self.core.reset_data_received();
        self.core.reset_window_complete();

        if self.core.reached_end_of_time_window() {
            self.core.set_time_windows(self.core.time_windows() + 1);
            if self.core.does_first_step() {
                debug!("sending data");
                self.send_time_window_size(intra)?;
                self.send_all(store, intra)?;
            }
        }
        Ok(())
    }

    pub fn second_synchronization(&mut self) -> Result<Vec<MeshId>, CouplingError> {
        Ok(Vec::new())
    }

    pub fn second_exchange(
        &mut self,
        store: &mut DataStore,
        intra: &IntraComm,
    ) -> Result<(), CouplingError> {
        self.core.check_completeness_required_actions()?;
        debug_assert!(self.core.is_initialized());
        debug_assert!(!self.core.is_time_window_complete());

        if self.core.reached_end_of_time_window() {
            if self.core.does_first_step() {
                if self.core.is_implicit() {
                    self.receive_convergence(intra)?;
                }
                debug!("receiving data");
                self.receive_all(store, intra)?;
                self.core.check_data_has_been_received();
            } else {
                if self.core.is_implicit() {
                    self.core.do_implicit_step(store, intra)?;
                    if intra.is_primary() {
                        self.bi.m2n().send_convergence(self.core.has_converged())?;
                    }
                }
                debug!("sending data");
                self.send_all(store, intra)?;
                // No new data for the second participant in the very last
                // iteration of the last window.
                if self.core.is_coupling_ongoing()
                    || (self.core.is_implicit() && !self.core.has_converged())
                {
                    self.receive_and_set_time_window_size(intra)?;
                    debug!("receiving data");
                    self.receive_all(store, intra)?;
                    self.core.check_data_has_been_received();
                }
            }
            self.core.finish_second_exchange()?;
        }
        Ok(())
    }

    pub fn finalize(&mut self) -> Result<(), CouplingError> {
        self.core.check_completeness_required_actions()?;
        debug_assert!(self.core.is_initialized(), "finalize before initialize");
        self.core.close_txt_writers()
    }

    // --- queries forwarded by the sum type ---

    pub fn add_computed_time(&mut self, dt: f64) -> Result<(), CouplingError> {
        self.core.add_computed_time(dt)
    }

    pub fn is_coupling_ongoing(&self) -> bool {
        self.core.is_coupling_ongoing()
    }

    pub fn is_time_window_complete(&self) -> bool {
        self.core.is_time_window_complete()
    }

    pub fn has_data_been_received(&self) -> bool {
        self.core.has_data_been_received()
    }

    pub fn has_time_window_size(&self) -> bool {
        self.core.has_time_window_size()
    }

    pub fn time_window_size(&self) -> Option<f64> {
        self.core.time_window_size()
    }

    pub fn time(&self) -> f64 {
        self.core.time()
    }

    pub fn time_windows(&self) -> usize {
        self.core.time_windows()
    }

    pub fn this_time_window_remainder(&self) -> f64 {
        self.core.this_time_window_remainder()
    }

    pub fn next_timestep_max_length(&self) -> f64 {
        self.core.next_timestep_max_length()
    }

    pub fn will_data_be_exchanged(&self, last_dt: f64) -> bool {
        self.core.will_data_be_exchanged(last_dt)
    }

    pub fn sends_initialized_data(&self) -> bool {
        self.core.sends_initialized_data()
    }

    pub fn is_action_required(&self, action: Action) -> bool {
        self.core.is_action_required(action)
    }

    pub fn fulfill_action(&mut self, action: Action) -> bool {
        self.core.fulfill_action(action)
    }

    pub fn sets_time_window_size(&self) -> bool {
        self.sets_time_window_size
    }

    pub fn print_state(&self) -> String {
        self.core.print_state()
    }

    #[inline]
    pub fn mode(&self) -> CouplingMode {
        self.core.mode()
    }
}
