//! Shared core of all concrete coupling schemes: the time model, action
//! bookkeeping, coupling data registry, convergence measurement, and the
//! implicit-step algorithm.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use log::{debug, info};

use super::convergence::MeasureContext;
use super::coupling_data::{CouplingData, DataLocation};
use super::{Action, CouplingMode};
use crate::acceleration::{Acceleration, IterateSlice};
use crate::com::{IntraComm, M2N};
use crate::error::CouplingError;
use crate::io::TableWriter;
use crate::math;
use crate::mesh::{DataId, DataStore};

/// Outcome of one implicit coupling iteration.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IterationOutcome {
    /// All measures converged; the window is done.
    Converged,
    /// The iteration limit forced completion without convergence.
    ForcedConverged,
    /// Not converged; the window is repeated from its checkpoint.
    RetryWindow,
}

impl IterationOutcome {
    #[inline]
    pub fn window_done(self) -> bool {
        !matches!(self, IterationOutcome::RetryWindow)
    }
}

/// Construction parameters shared by every scheme variant.
#[derive(Clone, Debug)]
pub struct SchemeParams {
    pub max_time: Option<f64>,
    pub max_time_windows: Option<usize>,
    /// `None` means the first participant announces the size at runtime.
    pub time_window_size: Option<f64>,
    pub valid_digits: u32,
    pub local_participant: String,
    pub mode: CouplingMode,
    /// Iteration limit; implicit schemes only.
    pub max_iterations: Option<usize>,
    pub extrapolation_order: usize,
    /// Where the iteration/convergence logs go; `None` disables them.
    pub log_dir: Option<PathBuf>,
}

/// State and behavior shared by the serial, parallel, and multi schemes.
pub struct SchemeCore {
    mode: CouplingMode,
    max_time: Option<f64>,
    max_time_windows: Option<usize>,
    time_window_size: Option<f64>,
    eps: f64,
    local_participant: String,
    max_iterations: Option<usize>,
    extrapolation_order: usize,
    log_dir: Option<PathBuf>,

    time: f64,
    computed_time_window_part: f64,
    /// Window counter, starts at 1.
    time_windows: usize,
    iterations: usize,
    total_iterations: usize,

    is_initialized: bool,
    has_converged: bool,
    has_data_been_received: bool,
    is_time_window_complete: bool,
    sends_initialized_data: bool,
    receives_initialized_data: bool,
    does_first_step: bool,

    required_actions: HashSet<Action>,
    fulfilled_actions: HashSet<Action>,

    /// Every exchanged field, keyed by data id ("first one wins" when the
    /// same data appears in several exchanges).
    all_data: BTreeMap<DataId, CouplingData>,
    convergence_measures: Vec<MeasureContext>,
    acceleration: Option<Box<dyn Acceleration>>,

    iterations_writer: Option<TableWriter>,
    convergence_writer: Option<TableWriter>,
}

impl std::fmt::Debug for SchemeCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemeCore")
            .field("mode", &self.mode)
            .field("time", &self.time)
            .field("time_windows", &self.time_windows)
            .field("iterations", &self.iterations)
            .field("is_initialized", &self.is_initialized)
            .field("has_converged", &self.has_converged)
            .finish_non_exhaustive()
    }
}

impl SchemeCore {
    pub fn new(params: SchemeParams) -> Result<Self, CouplingError> {
        if let Some(t) = params.max_time {
            if t < 0.0 {
                return Err(CouplingError::Config(
                    "maximum time has to be larger than zero".into(),
                ));
            }
        }
        if let Some(w) = params.time_window_size {
            if w <= 0.0 {
                return Err(CouplingError::Config(
                    "time window size has to be larger than zero".into(),
                ));
            }
        }
        if !(1..=16).contains(&params.valid_digits) {
            return Err(CouplingError::Config(
                "valid digits of time window size has to be between 1 and 16".into(),
            ));
        }
        match params.mode {
            CouplingMode::Explicit => {
                if params.max_iterations.is_some() {
                    return Err(CouplingError::Config(
                        "explicit coupling has no iteration limit".into(),
                    ));
                }
                if params.extrapolation_order != 0 {
                    return Err(CouplingError::Config(
                        "extrapolation is not allowed for explicit coupling".into(),
                    ));
                }
            }
            CouplingMode::Implicit => {
                match params.max_iterations {
                    Some(n) if n >= 1 => {}
                    _ => {
                        return Err(CouplingError::Config(
                            "implicit coupling needs a maximal iteration limit of at least 1"
                                .into(),
                        ))
                    }
                }
                if params.extrapolation_order > 1 {
                    return Err(CouplingError::InvalidExtrapolationOrder(
                        params.extrapolation_order,
                    ));
                }
            }
        }
        Ok(Self {
            mode: params.mode,
            max_time: params.max_time,
            max_time_windows: params.max_time_windows,
            time_window_size: params.time_window_size,
            eps: math::eps_from_valid_digits(params.valid_digits),
            local_participant: params.local_participant,
            max_iterations: params.max_iterations,
            extrapolation_order: params.extrapolation_order,
            log_dir: params.log_dir,
            time: 0.0,
            computed_time_window_part: 0.0,
            time_windows: 1,
            iterations: 1,
            total_iterations: 1,
            is_initialized: false,
            has_converged: false,
            has_data_been_received: false,
            is_time_window_complete: false,
            sends_initialized_data: false,
            receives_initialized_data: false,
            does_first_step: false,
            required_actions: HashSet::new(),
            fulfilled_actions: HashSet::new(),
            all_data: BTreeMap::new(),
            convergence_measures: Vec::new(),
            acceleration: None,
            iterations_writer: None,
            convergence_writer: None,
        })
    }

    // --- registry ---

    /// Register an exchanged field; a data id already present keeps its
    /// first registration.
    pub fn add_coupling_data(
        &mut self,
        data: DataId,
        location: DataLocation,
        components: usize,
        has_gradient: bool,
        requires_initialization: bool,
    ) -> DataId {
        self.all_data.entry(data).or_insert_with(|| {
            CouplingData::new(
                data,
                location,
                components,
                has_gradient,
                requires_initialization,
                self.extrapolation_order,
            )
        });
        data
    }

    pub fn coupling_data(&self, id: DataId) -> Option<&CouplingData> {
        self.all_data.get(&id)
    }

    pub fn add_convergence_measure(&mut self, ctx: MeasureContext) {
        debug_assert!(self.all_data.contains_key(&ctx.data));
        self.convergence_measures.push(ctx);
    }

    pub fn set_acceleration(&mut self, acceleration: Box<dyn Acceleration>) {
        self.acceleration = Some(acceleration);
    }

    /// Flip the initial-send flag if any outgoing data wants initialization
    /// and demand the matching solver action.
    pub fn determine_initial_send(&mut self, ids: &[DataId]) {
        if self.any_requires_initialization(ids) {
            self.sends_initialized_data = true;
            self.require_action(Action::InitializeData);
        }
    }

    pub fn determine_initial_receive(&mut self, ids: &[DataId]) {
        if self.any_requires_initialization(ids) {
            self.receives_initialized_data = true;
        }
    }

    fn any_requires_initialization(&self, ids: &[DataId]) -> bool {
        ids.iter()
            .any(|id| self.all_data[id].requires_initialization)
    }

    // --- plain queries ---

    #[inline]
    pub fn mode(&self) -> CouplingMode {
        self.mode
    }

    #[inline]
    pub fn is_implicit(&self) -> bool {
        self.mode == CouplingMode::Implicit
    }

    #[inline]
    pub fn does_first_step(&self) -> bool {
        self.does_first_step
    }

    pub fn set_does_first_step(&mut self, first: bool) {
        self.does_first_step = first;
    }

    #[inline]
    pub fn eps(&self) -> f64 {
        self.eps
    }

    #[inline]
    pub fn local_participant(&self) -> &str {
        &self.local_participant
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.is_initialized
    }

    pub fn mark_initialized(&mut self) {
        debug_assert!(!self.is_initialized);
        self.is_initialized = true;
    }

    #[inline]
    pub fn has_converged(&self) -> bool {
        self.has_converged
    }

    pub fn set_has_converged(&mut self, converged: bool) {
        self.has_converged = converged;
    }

    #[inline]
    pub fn sends_initialized_data(&self) -> bool {
        self.sends_initialized_data
    }

    #[inline]
    pub fn receives_initialized_data(&self) -> bool {
        self.receives_initialized_data
    }

    #[inline]
    pub fn has_data_been_received(&self) -> bool {
        self.has_data_been_received
    }

    pub fn reset_data_received(&mut self) {
        self.has_data_been_received = false;
    }

    /// Exactly one receive per iteration feeds the read side.
    pub fn check_data_has_been_received(&mut self) {
        debug_assert!(
            !self.has_data_been_received,
            "data marked received twice within one coupling iteration"
        );
        self.has_data_been_received = true;
    }

    #[inline]
    pub fn is_time_window_complete(&self) -> bool {
        self.is_time_window_complete
    }

    pub fn reset_window_complete(&mut self) {
        self.is_time_window_complete = false;
    }

    #[inline]
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    #[inline]
    pub fn total_iterations(&self) -> usize {
        self.total_iterations
    }

    #[inline]
    pub fn max_iterations(&self) -> Option<usize> {
        self.max_iterations
    }

    // --- time model ---

    pub fn has_time_window_size(&self) -> bool {
        self.time_window_size.is_some()
    }

    pub fn time_window_size(&self) -> Option<f64> {
        self.time_window_size
    }

    pub fn set_time_window_size(&mut self, size: f64) {
        self.time_window_size = Some(size);
    }

    pub fn clear_time_window_size(&mut self) {
        self.time_window_size = None;
    }

    #[inline]
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn set_time(&mut self, time: f64) {
        self.time = time;
    }

    #[inline]
    pub fn time_windows(&self) -> usize {
        self.time_windows
    }

    pub fn set_time_windows(&mut self, windows: usize) {
        self.time_windows = windows;
    }

    #[inline]
    pub fn computed_time_window_part(&self) -> f64 {
        self.computed_time_window_part
    }

    /// Accumulate solver time; exceeding the window is user misuse.
    pub fn add_computed_time(&mut self, dt: f64) -> Result<(), CouplingError> {
        debug_assert!(
            self.is_coupling_ongoing(),
            "addComputedTime called after simulation end"
        );
        self.computed_time_window_part += dt;
        self.time += dt;
        if !math::greater_equals(self.next_timestep_max_length(), 0.0, self.eps) {
            return Err(CouplingError::TimeWindowExceeded {
                dt,
                max: self.next_timestep_max_length() + dt,
            });
        }
        Ok(())
    }

    /// Maximum step the solver may take next.
    pub fn next_timestep_max_length(&self) -> f64 {
        match self.time_window_size {
            Some(w) => w - self.computed_time_window_part,
            None => match self.max_time {
                Some(t) => t - self.time,
                None => f64::MAX,
            },
        }
    }

    pub fn this_time_window_remainder(&self) -> f64 {
        if self.has_time_window_size() {
            self.next_timestep_max_length()
        } else {
            0.0
        }
    }

    pub fn reached_end_of_time_window(&self) -> bool {
        !self.has_time_window_size()
            || math::equals(self.next_timestep_max_length(), 0.0, self.eps)
    }

    pub fn will_data_be_exchanged(&self, last_dt: f64) -> bool {
        let remainder = self.next_timestep_max_length() - last_dt;
        !math::greater(remainder, 0.0, self.eps)
    }

    pub fn is_coupling_ongoing(&self) -> bool {
        let time_left = match self.max_time {
            Some(t) => math::greater(t, self.time, self.eps),
            None => true,
        };
        let windows_left = match self.max_time_windows {
            Some(w) => w >= self.time_windows,
            None => true,
        };
        time_left && windows_left
    }

    // --- actions ---

    pub fn require_action(&mut self, action: Action) {
        self.required_actions.insert(action);
    }

    pub fn is_action_required(&self, action: Action) -> bool {
        self.required_actions.contains(&action)
    }

    /// Query-and-fulfill in one step.
    pub fn fulfill_action(&mut self, action: Action) -> bool {
        if self.required_actions.contains(&action) {
            self.fulfilled_actions.insert(action);
            true
        } else {
            false
        }
    }

    /// Every required action must have been fulfilled before the next
    /// phase; the sets reset afterwards.
    pub fn check_completeness_required_actions(&mut self) -> Result<(), CouplingError> {
        let missing: Vec<String> = self
            .required_actions
            .difference(&self.fulfilled_actions)
            .map(|a| a.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(CouplingError::UnfulfilledActions(missing.join(", ")));
        }
        self.required_actions.clear();
        self.fulfilled_actions.clear();
        Ok(())
    }

    // --- coupling data plumbing ---

    /// Snapshot every field for the next convergence test.
    pub fn store_iteration(&mut self, store: &DataStore) {
        debug_assert!(self.is_implicit());
        for data in self.all_data.values_mut() {
            data.store_iteration(store);
        }
    }

    /// Reserve extrapolation histories and hand the acceleration its first
    /// look at the data.
    pub fn initialize_storages(&mut self, store: &DataStore) -> Result<(), CouplingError> {
        for data in self.all_data.values_mut() {
            data.initialize_extrapolation(store);
        }
        if let Some(acc) = &mut self.acceleration {
            let slices = gather_slices(&self.all_data, store);
            acc.initialize(&slices)?;
        }
        Ok(())
    }

    pub fn store_extrapolation_data(&mut self, store: &DataStore) {
        debug!("store extrapolation data, window {}", self.time_windows);
        for data in self.all_data.values_mut() {
            data.store_extrapolation(store);
        }
    }

    pub fn move_to_next_window(&mut self, store: &mut DataStore) {
        for data in self.all_data.values_mut() {
            data.move_to_next_window(store);
        }
    }

    /// Send the listed fields over `m2n` in id order.
    ///
    /// Mesh-bound payloads travel per rank over the bulk channel; global
    /// payloads go out on the primary rank only.
    pub fn send_data(
        &self,
        store: &DataStore,
        m2n: &M2N,
        intra: &IntraComm,
        ids: &[DataId],
    ) -> Result<(), CouplingError> {
        for id in ids {
            let data = &self.all_data[id];
            match data.location() {
                DataLocation::Mesh(mesh) => {
                    m2n.send_values(mesh, data.components(), data.values(store))?;
                    if data.has_gradient() {
                        let field = store
                            .mesh(mesh)
                            .data(*id)
                            .expect("data resolved through configuration");
                        m2n.send_values(mesh, field.gradient_stride(), field.gradients())?;
                    }
                }
                DataLocation::Global => {
                    if intra.is_primary() {
                        m2n.send_global_values(data.values(store))?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Receive the listed fields over `m2n` in id order. Global payloads
    /// land on the primary rank and are broadcast to the secondaries.
    pub fn receive_data(
        &mut self,
        store: &mut DataStore,
        m2n: &M2N,
        intra: &IntraComm,
        ids: &[DataId],
    ) -> Result<(), CouplingError> {
        for id in ids {
            let data = &self.all_data[id];
            match data.location() {
                DataLocation::Mesh(mesh) => {
                    let expected = data.values(store).len();
                    let received = m2n.recv_values(mesh, data.components(), expected)?;
                    data.values_mut(store).copy_from_slice(&received);
                    if data.has_gradient() {
                        let field = store
                            .mesh(mesh)
                            .data(*id)
                            .expect("data resolved through configuration");
                        let stride = field.gradient_stride();
                        let expected = field.gradients().len();
                        let received = m2n.recv_values(mesh, stride, expected)?;
                        store
                            .mesh_mut(mesh)
                            .data_mut(*id)
                            .expect("data resolved through configuration")
                            .gradients_mut()
                            .copy_from_slice(&received);
                    }
                }
                DataLocation::Global => {
                    let current = data.values(store);
                    let received = if intra.is_primary() {
                        m2n.recv_global_values(current.len())?
                    } else {
                        vec![0.0; current.len()]
                    };
                    let received = intra.broadcast_f64s(&received)?;
                    data.values_mut(store).copy_from_slice(&received);
                }
            }
        }
        Ok(())
    }

    // --- implicit machinery ---

    /// Run all convergence measures against the previous iterate.
    ///
    /// Residual norms are reduced over the participant's ranks so every
    /// rank reaches the same verdict.
    pub fn measure_convergence(
        &mut self,
        store: &DataStore,
        intra: &IntraComm,
    ) -> Result<bool, CouplingError> {
        debug_assert!(!self.does_first_step);
        debug_assert!(!self.convergence_measures.is_empty());
        if let Some(writer) = &mut self.convergence_writer {
            writer.set("TimeWindow", self.time_windows - 1);
            writer.set("Iteration", self.iterations);
        }
        let mut all_converged = true;
        let mut one_suffices = false;
        let mut one_strict_unmet = false;
        for ctx in &mut self.convergence_measures {
            let data = &self.all_data[&ctx.data];
            let old = data.previous_iteration();
            let new = data.values(store);
            debug_assert_eq!(old.len(), new.len());
            let res2: f64 = old.iter().zip(new).map(|(o, n)| (n - o) * (n - o)).sum();
            let new2: f64 = new.iter().map(|v| v * v).sum();
            let res_norm = intra.allreduce_sum(res2)?.sqrt();
            let new_norm = intra.allreduce_sum(new2)?.sqrt();
            ctx.measure.measure_norms(res_norm, new_norm);

            if let (Some(writer), true) = (self.convergence_writer.as_mut(), ctx.does_logging) {
                writer.set(
                    &ctx.measure.log_header(&ctx.data_name),
                    format!("{:.9e}", ctx.measure.norm_residual()),
                );
            }

            if !ctx.measure.is_converged() {
                all_converged = false;
                if ctx.strict {
                    one_strict_unmet = true;
                    if self.iterations >= self.max_iterations.expect("implicit scheme") {
                        return Err(CouplingError::StrictMeasureDiverged(
                            ctx.data_name.clone(),
                        ));
                    }
                }
            } else if ctx.suffices {
                one_suffices = true;
            }
            info!(
                "convergence measure for \"{}\": residual {:.3e}, converged: {}",
                ctx.data_name,
                ctx.measure.norm_residual(),
                ctx.measure.is_converged()
            );
        }
        if let Some(writer) = &mut self.convergence_writer {
            writer.commit_row()?;
        }
        if all_converged {
            info!("all converged");
        } else if one_suffices && !one_strict_unmet {
            info!("sufficient measures converged");
        }
        Ok(all_converged || (one_suffices && !one_strict_unmet))
    }

    /// Reset every measure for the next window's series.
    pub fn new_convergence_measurements(&mut self) {
        for ctx in &mut self.convergence_measures {
            ctx.measure.new_series();
        }
    }

    pub fn has_convergence_measures(&self) -> bool {
        !self.convergence_measures.is_empty()
    }

    /// The implicit-step algorithm run by the measuring participant after
    /// receiving the peer's data.
    pub fn do_implicit_step(
        &mut self,
        store: &mut DataStore,
        intra: &IntraComm,
    ) -> Result<IterationOutcome, CouplingError> {
        self.store_extrapolation_data(store);

        debug!("measure convergence of the coupling iteration");
        let converged = self.measure_convergence(store, intra)?;
        let forced =
            !converged && self.iterations >= self.max_iterations.expect("implicit scheme");
        let outcome = if converged {
            IterationOutcome::Converged
        } else if forced {
            IterationOutcome::ForcedConverged
        } else {
            IterationOutcome::RetryWindow
        };
        self.has_converged = outcome.window_done();

        if self.has_converged {
            if let Some(acc) = &mut self.acceleration {
                let slices = gather_slices(&self.all_data, store);
                acc.iterations_converged(&slices)?;
            }
            self.new_convergence_measurements();
            self.move_to_next_window(store);
        } else if let Some(acc) = &mut self.acceleration {
            let mut slices = gather_slices(&self.all_data, store);
            acc.perform_acceleration(&mut slices)?;
            scatter_slices(&self.all_data, store, &slices);
        }
        self.store_iteration(store);
        Ok(outcome)
    }

    /// Bookkeeping tail of `second_exchange`, shared by all variants.
    pub fn finish_second_exchange(&mut self) -> Result<(), CouplingError> {
        if self.is_implicit() {
            if !self.has_converged {
                debug!("no convergence achieved");
                self.require_action(Action::ReadCheckpoint);
                debug_assert!(self.computed_time_window_part > 0.0);
                self.time -= self.computed_time_window_part;
                self.time_windows -= 1;
            } else {
                debug!("convergence achieved");
                self.advance_txt_writers()?;
                info!("time window completed");
                self.is_time_window_complete = true;
                if self.is_coupling_ongoing() {
                    self.require_action(Action::WriteCheckpoint);
                }
            }
            self.total_iterations += 1;
            if !self.has_converged {
                self.iterations += 1;
            } else {
                self.iterations = 1;
            }
        } else {
            info!("time window completed");
            self.is_time_window_complete = true;
        }
        self.computed_time_window_part = 0.0;
        Ok(())
    }

    // --- log writers ---

    /// Open the iteration (and, on the measuring participant, convergence)
    /// tables. Primary rank of implicit schemes only.
    pub fn initialize_txt_writers(&mut self, intra: &IntraComm) -> Result<(), CouplingError> {
        let Some(dir) = self.log_dir.clone() else {
            return Ok(());
        };
        if !intra.is_primary() {
            return Ok(());
        }
        let mut iterations = TableWriter::create(
            dir.join(format!("precice-{}-iterations.log", self.local_participant)),
        )?;
        iterations.add_column("TimeWindow");
        iterations.add_column("TotalIterations");
        iterations.add_column("Iterations");
        iterations.add_column("Convergence");
        if !self.does_first_step {
            let mut convergence = TableWriter::create(
                dir.join(format!("precice-{}-convergence.log", self.local_participant)),
            )?;
            convergence.add_column("TimeWindow");
            convergence.add_column("Iteration");
            for ctx in &self.convergence_measures {
                if ctx.does_logging {
                    convergence.add_column(ctx.measure.log_header(&ctx.data_name));
                }
            }
            self.convergence_writer = Some(convergence);
            if self.acceleration.is_some() {
                iterations.add_column("QNColumns");
                iterations.add_column("DeletedQNColumns");
                iterations.add_column("DroppedQNColumns");
            }
        }
        self.iterations_writer = Some(iterations);
        Ok(())
    }

    fn advance_txt_writers(&mut self) -> Result<(), CouplingError> {
        if let Some(writer) = &mut self.iterations_writer {
            writer.set("TimeWindow", self.time_windows - 1);
            writer.set("TotalIterations", self.total_iterations);
            writer.set("Iterations", self.iterations);
            let converged = match self.max_iterations {
                Some(max) => (self.iterations < max) as u8,
                None => 1,
            };
            writer.set("Convergence", converged);
            if !self.does_first_step {
                if let Some(acc) = &self.acceleration {
                    writer.set("QNColumns", acc.ls_system_cols());
                    writer.set("DeletedQNColumns", acc.deleted_columns());
                    writer.set("DroppedQNColumns", acc.dropped_columns());
                }
            }
            writer.commit_row()?;
        }
        Ok(())
    }

    /// Close log files; called from `finalize`.
    pub fn close_txt_writers(&mut self) -> Result<(), CouplingError> {
        if let Some(mut w) = self.iterations_writer.take() {
            w.close()?;
        }
        if let Some(mut w) = self.convergence_writer.take() {
            w.close()?;
        }
        Ok(())
    }

    /// Human-readable coupling state, e.g. for participant logs.
    pub fn print_state(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        if self.is_implicit() {
            write!(out, "iteration: {}", self.iterations).ok();
            if let Some(max) = self.max_iterations {
                write!(out, " of {max}").ok();
            }
            out.push_str(", ");
        }
        write!(out, "time-window: {}", self.time_windows).ok();
        if let Some(max) = self.max_time_windows {
            write!(out, " of {max}").ok();
        }
        write!(out, ", time: {}", self.time).ok();
        if let Some(max) = self.max_time {
            write!(out, " of {max}").ok();
        }
        if let Some(w) = self.time_window_size {
            write!(out, ", time-window-size: {w}").ok();
        }
        if self.has_time_window_size() || self.max_time.is_some() {
            write!(out, ", max-time-step-size: {}", self.next_timestep_max_length()).ok();
        }
        write!(
            out,
            ", ongoing: {}, time-window-complete: {}",
            if self.is_coupling_ongoing() { "yes" } else { "no" },
            if self.is_time_window_complete { "yes" } else { "no" },
        )
        .ok();
        out
    }
}

/// Gather every coupling data field into acceleration slices.
pub(crate) fn gather_slices(
    all_data: &BTreeMap<DataId, CouplingData>,
    store: &DataStore,
) -> Vec<IterateSlice> {
    all_data
        .values()
        .map(|d| IterateSlice {
            data: d.id(),
            values: d.values(store).to_vec(),
            previous: d.previous_iteration().to_vec(),
        })
        .collect()
}

/// Write accelerated values back into the store.
pub(crate) fn scatter_slices(
    all_data: &BTreeMap<DataId, CouplingData>,
    store: &mut DataStore,
    slices: &[IterateSlice],
) {
    for slice in slices {
        let data = &all_data[&slice.data];
        data.values_mut(store).copy_from_slice(&slice.values);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(mode: CouplingMode) -> SchemeParams {
        SchemeParams {
            max_time: Some(1.0),
            max_time_windows: None,
            time_window_size: Some(0.5),
            valid_digits: 10,
            local_participant: "A".into(),
            mode,
            max_iterations: match mode {
                CouplingMode::Explicit => None,
                CouplingMode::Implicit => Some(5),
            },
            extrapolation_order: 0,
            log_dir: None,
        }
    }

    #[test]
    fn time_accumulates_within_window() {
        let mut core = SchemeCore::new(params(CouplingMode::Explicit)).unwrap();
        core.add_computed_time(0.25).unwrap();
        assert!(!core.reached_end_of_time_window());
        core.add_computed_time(0.25).unwrap();
        assert!(core.reached_end_of_time_window());
        assert_eq!(core.time(), 0.5);
    }

    #[test]
    fn exceeding_the_window_is_user_error() {
        let mut core = SchemeCore::new(params(CouplingMode::Explicit)).unwrap();
        let err = core.add_computed_time(0.6).unwrap_err();
        assert!(matches!(err, CouplingError::TimeWindowExceeded { .. }));
    }

    #[test]
    fn coupling_ends_at_max_time() {
        let mut core = SchemeCore::new(params(CouplingMode::Explicit)).unwrap();
        assert!(core.is_coupling_ongoing());
        core.add_computed_time(0.5).unwrap();
        core.add_computed_time(0.5).unwrap();
        assert!(!core.is_coupling_ongoing());
    }

    #[test]
    fn unfulfilled_action_is_fatal() {
        let mut core = SchemeCore::new(params(CouplingMode::Implicit)).unwrap();
        core.require_action(Action::WriteCheckpoint);
        let err = core.check_completeness_required_actions().unwrap_err();
        assert!(matches!(err, CouplingError::UnfulfilledActions(_)));
    }

    #[test]
    fn fulfill_resets_with_check() {
        let mut core = SchemeCore::new(params(CouplingMode::Implicit)).unwrap();
        core.require_action(Action::WriteCheckpoint);
        assert!(core.fulfill_action(Action::WriteCheckpoint));
        assert!(!core.fulfill_action(Action::ReadCheckpoint));
        core.check_completeness_required_actions().unwrap();
        assert!(!core.is_action_required(Action::WriteCheckpoint));
    }

    #[test]
    fn explicit_rejects_iteration_limit() {
        let mut p = params(CouplingMode::Explicit);
        p.max_iterations = Some(3);
        assert!(SchemeCore::new(p).is_err());
    }

    #[test]
    fn implicit_rejects_high_extrapolation() {
        let mut p = params(CouplingMode::Implicit);
        p.extrapolation_order = 2;
        assert!(matches!(
            SchemeCore::new(p).unwrap_err(),
            CouplingError::InvalidExtrapolationOrder(2)
        ));
    }

    #[test]
    fn no_window_size_means_window_always_ends() {
        let mut p = params(CouplingMode::Explicit);
        p.time_window_size = None;
        let mut core = SchemeCore::new(p).unwrap();
        core.add_computed_time(0.1).unwrap();
        assert!(core.reached_end_of_time_window());
        assert!((core.next_timestep_max_length() - 0.9).abs() < 1e-12);
    }
}
