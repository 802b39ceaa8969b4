//! Multi coupling: one central participant (the controller) exchanges with
//! N peers in fixed declared order, running the implicit procedure over
//! the aggregated data of all peers.

use std::sync::Arc;

use log::debug;

use super::base::{SchemeCore, SchemeParams};
use super::coupling_data::DataLocation;
use super::{Action, CouplingMode};
use crate::acceleration::Acceleration;
use crate::com::{IntraComm, M2N};
use crate::error::CouplingError;
use crate::mesh::{DataId, DataStore, MeshId};

/// Connection and exchange tables towards one peer.
struct PeerExchange {
    name: String,
    m2n: Arc<M2N>,
    send: Vec<DataId>,
    recv: Vec<DataId>,
    send_global: Vec<DataId>,
    recv_global: Vec<DataId>,
}

/// Implicit coupling of one controller with N peers.
pub struct MultiScheme {
    core: SchemeCore,
    peers: Vec<PeerExchange>,
    is_controller: bool,
}

impl MultiScheme {
    pub fn new(
        params: SchemeParams,
        controller: impl Into<String>,
    ) -> Result<Self, CouplingError> {
        if params.mode != CouplingMode::Implicit {
            return Err(CouplingError::Config(
                "multi coupling schemes are implicit".into(),
            ));
        }
        let controller = controller.into();
        let local = params.local_participant.clone();
        let mut core = SchemeCore::new(params)?;
        if !core.has_time_window_size() {
            return Err(CouplingError::Config(
                "multi coupling schemes require a fixed time window size".into(),
            ));
        }
        let is_controller = local == controller;
        // The controller plays the role of the measuring (second) side.
        core.set_does_first_step(!is_controller);
        Ok(Self {
            core,
            peers: Vec::new(),
            is_controller,
        })
    }

    /// Register the connection to one peer; declared order is exchange
    /// order. Non-controllers register exactly their controller.
    pub fn add_peer(&mut self, name: impl Into<String>, m2n: Arc<M2N>) {
        self.peers.push(PeerExchange {
            name: name.into(),
            m2n,
            send: Vec::new(),
            recv: Vec::new(),
            send_global: Vec::new(),
            recv_global: Vec::new(),
        });
    }

    fn peer_index(&self, peer: &str) -> Result<usize, CouplingError> {
        self.peers
            .iter()
            .position(|p| p.name == peer)
            .ok_or_else(|| CouplingError::UnknownParticipant(peer.to_string()))
    }

    pub fn add_data_to_send(
        &mut self,
        peer: &str,
        id: DataId,
        location: DataLocation,
        components: usize,
        has_gradient: bool,
        requires_initialization: bool,
        name: &str,
    ) -> Result<(), CouplingError> {
        let idx = self.peer_index(peer)?;
        self.core
            .add_coupling_data(id, location, components, has_gradient, requires_initialization);
        let list = match location {
            DataLocation::Mesh(_) => &mut self.peers[idx].send,
            DataLocation::Global => &mut self.peers[idx].send_global,
        };
        if list.contains(&id) {
            return Err(CouplingError::DuplicateExchange(name.to_string(), "sending"));
        }
        list.push(id);
        Ok(())
    }

    pub fn add_data_to_receive(
        &mut self,
        peer: &str,
        id: DataId,
        location: DataLocation,
        components: usize,
        has_gradient: bool,
        requires_initialization: bool,
        name: &str,
    ) -> Result<(), CouplingError> {
        let idx = self.peer_index(peer)?;
        self.core
            .add_coupling_data(id, location, components, has_gradient, requires_initialization);
        let list = match location {
            DataLocation::Mesh(_) => &mut self.peers[idx].recv,
            DataLocation::Global => &mut self.peers[idx].recv_global,
        };
        if list.contains(&id) {
            return Err(CouplingError::DuplicateExchange(
                name.to_string(),
                "receiving",
            ));
        }
        list.push(id);
        Ok(())
    }

    pub fn determine_initial_data_exchange(&mut self) {
        let send: Vec<DataId> = self
            .peers
            .iter()
            .flat_map(|p| p.send.iter().chain(&p.send_global))
            .copied()
            .collect();
        let recv: Vec<DataId> = self
            .peers
            .iter()
            .flat_map(|p| p.recv.iter().chain(&p.recv_global))
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

    pub fn partners(&self) -> Vec<&str> {
        self.peers.iter().map(|p| p.name.as_str()).collect()
    }

    fn send_all(&self, store: &DataStore, intra: &IntraComm) -> Result<(), CouplingError> {
        for peer in &self.peers {
            self.core.send_data(store, &peer.m2n, intra, &peer.send)?;
            self.core
                .send_data(store, &peer.m2n, intra, &peer.send_global)?;
        }
        Ok(())
    }

    fn receive_all(
        &mut self,
        store: &mut DataStore,
        intra: &IntraComm,
    ) -> Result<(), CouplingError> {
        for i in 0..self.peers.len() {
            let (m2n, recv, recv_global) = {
                let p = &self.peers[i];
                (p.m2n.clone(), p.recv.clone(), p.recv_global.clone())
            };
            self.core.receive_data(store, &m2n, intra, &recv)?;
            self.core.receive_data(store, &m2n, intra, &recv_global)?;
        }
        Ok(())
    }

    pub fn initialize(
        &mut self,
        store: &mut DataStore,
        intra: &IntraComm,
        start_time: f64,
        start_window: usize,
    ) -> Result<(), CouplingError> {
        debug_assert!(!self.core.is_initialized());
        self.core.set_time(start_time);
        self.core.set_time_windows(start_window);
        self.core.reset_data_received();

        if self.is_controller {
            if !self.core.has_convergence_measures() {
                return Err(CouplingError::MissingConvergenceMeasure);
            }
            self.core.initialize_storages(store)?;
        }
        self.core.require_action(Action::WriteCheckpoint);
        self.core.initialize_txt_writers(intra)?;
        self.core.store_iteration(store);

        // Controller mirrors the second participant: receive, then send.
        if self.is_controller {
            if self.core.receives_initialized_data() {
                self.receive_all(store, intra)?;
                self.core.check_data_has_been_received();
            }
            if self.core.sends_initialized_data() {
                self.send_all(store, intra)?;
            }
        } else {
            if self.core.sends_initialized_data() {
                self.send_all(store, intra)?;
            }
            if self.core.receives_initialized_data() {
                self.receive_all(store, intra)?;
                self.core.check_data_has_been_received();
            }
        }

        if self.is_controller {
            self.core.store_extrapolation_data(store);
            self.core.move_to_next_window(store);
        }
        self.core.mark_initialized();
        Ok(())
    }

    pub fn receive_result_of_first_advance(
        &mut self,
        _store: &mut DataStore,
        _intra: &IntraComm,
    ) -> Result<(), CouplingError> {
        debug_assert!(self.core.is_initialized());
        self.core.reset_data_received();
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
        debug_assert!(self.core.is_initialized());
        self.core.reset_data_received();
        self.core.reset_window_complete();

        if self.core.reached_end_of_time_window() {
            self.core.set_time_windows(self.core.time_windows() + 1);
            if self.is_controller {
                debug!("controller receiving from all peers");
                self.receive_all(store, intra)?;
                self.core.check_data_has_been_received();
            } else {
                debug!("sending data to controller");
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
            if self.is_controller {
                self.core.do_implicit_step(store, intra)?;
                if intra.is_primary() {
                    for peer in &self.peers {
                        peer.m2n.send_convergence(self.core.has_converged())?;
                    }
                }
                debug!("controller sending to all peers");
                self.send_all(store, intra)?;
            } else {
                let verdict = if intra.is_primary() {
                    self.peers[0].m2n.recv_convergence()?
                } else {
                    false
                };
                let verdict = intra.broadcast_bool(verdict)?;
                self.core.set_has_converged(verdict);
                debug!("receiving data from controller");
                self.receive_all(store, intra)?;
                self.core.check_data_has_been_received();
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

    pub fn print_state(&self) -> String {
        self.core.print_state()
    }
}
