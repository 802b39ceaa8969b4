//! The per-participant solver interface: lifecycle state machine, mesh and
//! data access, and the driver of initialization, advance, and shutdown.

mod builder;
pub mod context;

use log::{debug, info, warn};

use context::{DataContext, DataDirection, MappingContext, MeshContext};

use crate::cplscheme::{Action, CouplingScheme};
use crate::com::{IntraComm, M2N, VertexDistribution};
use crate::config::Config;
use crate::error::CouplingError;
use crate::mapping::MappingTiming;
use crate::math;
use crate::mesh::{BoundingBox, DataId, DataStore, MeshId, MeshRequirement, VertexId};
use std::sync::Arc;

/// Lifecycle state of the interface.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Constructed,
    Initialized,
    Finalized,
    /// A fatal error occurred; only `finalize` is allowed.
    Failed,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            State::Constructed => "Constructed",
            State::Initialized => "Initialized",
            State::Finalized => "Finalized",
            State::Failed => "Failed",
        }
    }
}

/// The public facade of one coupling participant.
///
/// Construct it with the participant's name and the shared configuration,
/// declare meshes and data, then drive `initialize` / `advance` /
/// `finalize`. All methods check the lifecycle state and fail with a
/// diagnostic error on misuse.
pub struct SolverInterface {
    state: State,
    participant: String,
    dimensions: usize,
    rank: usize,
    size: usize,
    store: DataStore,
    mesh_contexts: Vec<MeshContext>,
    data_contexts: Vec<DataContext>,
    mappings: Vec<MappingContext>,
    scheme: CouplingScheme,
    intra: IntraComm,
    m2ns: Vec<(String, Arc<M2N>)>,
    two_level: bool,
}

impl std::fmt::Debug for SolverInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolverInterface")
            .field("state", &self.state)
            .field("participant", &self.participant)
            .field("dimensions", &self.dimensions)
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl SolverInterface {
    /// Construct from a configuration file.
    pub fn new(
        participant: impl Into<String>,
        config_path: impl AsRef<std::path::Path>,
        rank: usize,
        size: usize,
    ) -> Result<Self, CouplingError> {
        let config = Config::from_file(config_path)?;
        Self::from_config(participant, &config, rank, size)
    }

    /// Construct from configuration text (mainly for tests).
    pub fn from_config_str(
        participant: impl Into<String>,
        xml: &str,
        rank: usize,
        size: usize,
    ) -> Result<Self, CouplingError> {
        let config = Config::from_str(xml)?;
        Self::from_config(participant, &config, rank, size)
    }

    /// Construct with an externally created intra-participant
    /// communicator (e.g. wrapping an existing MPI world) instead of the
    /// configuration-derived one.
    pub fn with_communicator(
        participant: impl Into<String>,
        config: &Config,
        rank: usize,
        size: usize,
        intra: IntraComm,
    ) -> Result<Self, CouplingError> {
        let mut interface = Self::from_config(participant, config, rank, size)?;
        interface.intra = intra;
        Ok(interface)
    }

    pub fn from_config(
        participant: impl Into<String>,
        config: &Config,
        rank: usize,
        size: usize,
    ) -> Result<Self, CouplingError> {
        let participant = participant.into();
        debug_assert!(rank < size.max(1));
        let assembly = builder::assemble(config, &participant, rank, size)?;
        Ok(Self {
            state: State::Constructed,
            participant,
            dimensions: config.dimensions,
            rank,
            size,
            store: assembly.store,
            mesh_contexts: assembly.mesh_contexts,
            data_contexts: assembly.data_contexts,
            mappings: assembly.mappings,
            scheme: assembly.scheme,
            intra: assembly.intra,
            m2ns: assembly.m2ns,
            two_level: assembly.two_level,
        })
    }

    // ------------------------------------------------------------------
    // status queries
    // ------------------------------------------------------------------

    #[inline]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_coupling_ongoing(&self) -> bool {
        self.scheme.is_coupling_ongoing()
    }

    pub fn is_time_window_complete(&self) -> bool {
        self.scheme.is_time_window_complete()
    }

    // ------------------------------------------------------------------
    // action requirements
    // ------------------------------------------------------------------

    /// Whether the solver has to provide initial data; querying fulfills
    /// the obligation.
    pub fn requires_initial_data(&mut self) -> Result<bool, CouplingError> {
        self.require_state("requires_initial_data", &[State::Constructed])?;
        Ok(self.scheme.fulfill_action(Action::InitializeData))
    }

    pub fn requires_reading_checkpoint(&mut self) -> Result<bool, CouplingError> {
        self.require_state("requires_reading_checkpoint", &[State::Initialized])?;
        Ok(self.scheme.fulfill_action(Action::ReadCheckpoint))
    }

    pub fn requires_writing_checkpoint(&mut self) -> Result<bool, CouplingError> {
        self.require_state("requires_writing_checkpoint", &[State::Initialized])?;
        Ok(self.scheme.fulfill_action(Action::WriteCheckpoint))
    }

    // ------------------------------------------------------------------
    // lifecycle
    // ------------------------------------------------------------------

    /// Establish connections, exchange and partition meshes, exchange
    /// initial data, and hand control to the coupling scheme.
    ///
    /// Returns the maximum size of the first solver time step.
    pub fn initialize(&mut self) -> Result<f64, CouplingError> {
        self.require_state("initialize", &[State::Constructed])?;
        match self.initialize_inner() {
            Ok(dt) => {
                self.state = State::Initialized;
                Ok(dt)
            }
            Err(e) => {
                self.state = State::Failed;
                Err(e)
            }
        }
    }

    fn initialize_inner(&mut self) -> Result<f64, CouplingError> {
        info!("initializing participant \"{}\"", self.participant);

        // Primary-rank connections to every peer.
        for (peer, m2n) in &self.m2ns {
            m2n.connect(&self.participant, peer)?;
        }

        // Mesh phases run in name order on every participant so two
        // opposite-direction exchanges cannot deadlock. Two-level
        // initialization keeps the declaration order.
        let mut order: Vec<usize> = (0..self.mesh_contexts.len()).collect();
        if !self.two_level {
            order.sort_by(|&a, &b| {
                self.mesh_contexts[a].name.cmp(&self.mesh_contexts[b].name)
            });
        }

        // Provided meshes get their global ids before anything ships.
        for &i in &order {
            if self.mesh_contexts[i].is_provided() {
                let ctx = &self.mesh_contexts[i];
                let mesh_id = ctx.mesh;
                if let Some(p) = &ctx.provided {
                    p.assign_global_ids(self.store.mesh_mut(mesh_id), 0);
                }
            }
        }

        self.compare_bounding_boxes(&order)?;
        // Secondary-rank connections piggyback on the switchboard; the
        // channels exist once both sides touch them.
        self.compute_partitions(&order)?;

        // Mapping stencils against the final partitions.
        for m in &mut self.mappings {
            let from = self.store.mesh(m.from_mesh);
            let to = self.store.mesh(m.to_mesh);
            m.mapping.compute(from, to)?;
        }

        // Waveforms sample the post-partition buffers; meshes lock.
        for ctx in &mut self.data_contexts {
            if let Some(w) = &mut ctx.waveform {
                let values = match ctx.mesh {
                    Some(mesh) => self.store.values(mesh, ctx.data),
                    None => self
                        .store
                        .global(ctx.data)
                        .expect("validated data reference")
                        .values(),
                };
                w.initialize(values);
            }
        }
        for ctx in &mut self.mesh_contexts {
            ctx.locked = true;
        }

        if self.scheme.sends_initialized_data() {
            self.perform_write_mappings(None)?;
        }

        self.scheme
            .initialize(&mut self.store, &self.intra, 0.0, 1)?;
        if self.scheme.has_data_been_received() {
            self.perform_read_mappings(None)?;
        }
        for ctx in &mut self.data_contexts {
            if let Some(w) = &mut ctx.waveform {
                w.move_to_next_window();
            }
        }

        self.scheme
            .receive_result_of_first_advance(&mut self.store, &self.intra)?;
        if self.scheme.has_data_been_received() {
            self.perform_read_mappings(None)?;
        }

        self.reset_written_data();
        info!("{}", self.scheme.print_state());
        Ok(self.scheme.next_timestep_max_length())
    }

    /// Advance the coupled simulation by the solver's time step `dt`.
    ///
    /// Returns the maximum size of the next solver time step.
    pub fn advance(&mut self, dt: f64) -> Result<f64, CouplingError> {
        self.require_state("advance", &[State::Initialized])?;
        match self.advance_inner(dt) {
            Ok(next) => Ok(next),
            Err(e) => {
                self.state = State::Failed;
                Err(e)
            }
        }
    }

    fn advance_inner(&mut self, dt: f64) -> Result<f64, CouplingError> {
        if !(dt > 0.0) {
            return Err(CouplingError::NonPositiveTimeStep(dt));
        }
        self.intra
            .sync_timestep(dt, math::NUMERICAL_ZERO, &self.participant)?;
        self.scheme.add_computed_time(dt)?;

        // The solver's time is already booked, so the remaining step is 0
        // exactly when this advance closes the window.
        if self.scheme.will_data_be_exchanged(0.0) {
            self.perform_write_mappings(Some(MappingTiming::OnAdvance))?;
        }

        let changes = self.scheme.first_synchronization(&[])?;
        debug_assert!(changes.is_empty());
        self.scheme.first_exchange(&mut self.store, &self.intra)?;
        self.scheme.second_synchronization()?;
        self.scheme.second_exchange(&mut self.store, &self.intra)?;

        if self.scheme.is_time_window_complete() {
            for ctx in &mut self.data_contexts {
                if let Some(w) = &mut ctx.waveform {
                    w.move_to_next_window();
                }
            }
        }
        if self.scheme.has_data_been_received() {
            self.perform_read_mappings(Some(MappingTiming::OnAdvance))?;
        }

        info!("{}", self.scheme.print_state());
        self.reset_written_data();
        Ok(self.scheme.next_timestep_max_length())
    }

    /// Shut the coupling down. May be called once from any state; the
    /// destructor calls it implicitly when still initialized.
    pub fn finalize(&mut self) -> Result<(), CouplingError> {
        if self.state == State::Finalized {
            return Err(CouplingError::FinalizedTwice);
        }
        let was = self.state;
        self.state = State::Finalized;
        if was == State::Initialized {
            self.scheme.finalize()?;
        }
        for (_, m2n) in &self.m2ns {
            // After a failure the peer may be mid-protocol; skip the close
            // handshake and fail its pending receives instead.
            if was == State::Initialized {
                m2n.close()?;
            } else {
                m2n.abort()?;
            }
        }
        info!("finalized participant \"{}\"", self.participant);
        Ok(())
    }

    // ------------------------------------------------------------------
    // mesh access
    // ------------------------------------------------------------------

    pub fn has_mesh(&self, mesh: &str) -> bool {
        self.mesh_contexts.iter().any(|c| c.name == mesh)
    }

    pub fn requires_mesh_connectivity_for(&self, mesh: &str) -> Result<bool, CouplingError> {
        Ok(self.mesh_context(mesh)?.requirement == MeshRequirement::Full)
    }

    /// Unlock a mesh for re-population. Its partition is dropped; any
    /// exchange on this mesh before the next initialization fails.
    pub fn reset_mesh(&mut self, mesh: &str) -> Result<(), CouplingError> {
        self.require_state("reset_mesh", &[State::Initialized])?;
        let idx = self.mesh_context_index(mesh)?;
        let mesh_id = self.mesh_contexts[idx].mesh;
        self.store.mesh_mut(mesh_id).clear();
        let ctx = &mut self.mesh_contexts[idx];
        ctx.locked = false;
        if let Some(r) = &mut ctx.received {
            r.clear();
        }
        for m in &mut self.mappings {
            if m.from_mesh == mesh_id || m.to_mesh == mesh_id {
                m.mapping.clear();
            }
        }
        Ok(())
    }

    pub fn set_mesh_vertex(
        &mut self,
        mesh: &str,
        position: &[f64],
    ) -> Result<VertexId, CouplingError> {
        if position.len() != self.dimensions {
            return Err(CouplingError::DimensionMismatch {
                data: mesh.to_string(),
                actual: self.dimensions,
                assumed: position.len(),
            });
        }
        let id = self.writable_mesh(mesh)?;
        Ok(self.store.mesh_mut(id).add_vertex(position))
    }

    pub fn set_mesh_vertices(
        &mut self,
        mesh: &str,
        positions: &[f64],
    ) -> Result<Vec<VertexId>, CouplingError> {
        if positions.len() % self.dimensions != 0 {
            return Err(CouplingError::DimensionMismatch {
                data: mesh.to_string(),
                actual: self.dimensions,
                assumed: positions.len(),
            });
        }
        let id = self.writable_mesh(mesh)?;
        Ok(self.store.mesh_mut(id).add_vertices(positions))
    }

    pub fn get_mesh_vertex_size(&self, mesh: &str) -> Result<usize, CouplingError> {
        let ctx = self.mesh_context(mesh)?;
        Ok(self.store.mesh(ctx.mesh).vertex_count())
    }

    pub fn set_mesh_edge(
        &mut self,
        mesh: &str,
        first: VertexId,
        second: VertexId,
    ) -> Result<(), CouplingError> {
        let id = self.writable_mesh(mesh)?;
        self.store.mesh_mut(id).add_unique_edge(first, second)?;
        Ok(())
    }

    pub fn set_mesh_edges(
        &mut self,
        mesh: &str,
        vertices: &[VertexId],
    ) -> Result<(), CouplingError> {
        debug_assert_eq!(vertices.len() % 2, 0);
        let id = self.writable_mesh(mesh)?;
        for pair in vertices.chunks_exact(2) {
            self.store.mesh_mut(id).add_unique_edge(pair[0], pair[1])?;
        }
        Ok(())
    }

    pub fn set_mesh_triangle(
        &mut self,
        mesh: &str,
        a: VertexId,
        b: VertexId,
        c: VertexId,
    ) -> Result<(), CouplingError> {
        let id = self.writable_mesh(mesh)?;
        self.store.mesh_mut(id).add_triangle(a, b, c)
    }

    pub fn set_mesh_triangles(
        &mut self,
        mesh: &str,
        vertices: &[VertexId],
    ) -> Result<(), CouplingError> {
        debug_assert_eq!(vertices.len() % 3, 0);
        let id = self.writable_mesh(mesh)?;
        for t in vertices.chunks_exact(3) {
            self.store.mesh_mut(id).add_triangle(t[0], t[1], t[2])?;
        }
        Ok(())
    }

    pub fn set_mesh_quad(
        &mut self,
        mesh: &str,
        a: VertexId,
        b: VertexId,
        c: VertexId,
        d: VertexId,
    ) -> Result<(), CouplingError> {
        let id = self.writable_mesh(mesh)?;
        self.store.mesh_mut(id).add_quad(a, b, c, d)
    }

    pub fn set_mesh_quads(
        &mut self,
        mesh: &str,
        vertices: &[VertexId],
    ) -> Result<(), CouplingError> {
        debug_assert_eq!(vertices.len() % 4, 0);
        let id = self.writable_mesh(mesh)?;
        for q in vertices.chunks_exact(4) {
            self.store.mesh_mut(id).add_quad(q[0], q[1], q[2], q[3])?;
        }
        Ok(())
    }

    pub fn set_mesh_tetrahedron(
        &mut self,
        mesh: &str,
        a: VertexId,
        b: VertexId,
        c: VertexId,
        d: VertexId,
    ) -> Result<(), CouplingError> {
        let id = self.writable_mesh(mesh)?;
        self.store.mesh_mut(id).add_tetrahedron(a, b, c, d)
    }

    pub fn set_mesh_tetrahedra(
        &mut self,
        mesh: &str,
        vertices: &[VertexId],
    ) -> Result<(), CouplingError> {
        debug_assert_eq!(vertices.len() % 4, 0);
        let id = self.writable_mesh(mesh)?;
        for t in vertices.chunks_exact(4) {
            self.store
                .mesh_mut(id)
                .add_tetrahedron(t[0], t[1], t[2], t[3])?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // direct access
    // ------------------------------------------------------------------

    /// Restrict the received slice of `mesh` to an axis-aligned region.
    /// Constructed state only, at most once per mesh.
    pub fn set_mesh_access_region(
        &mut self,
        mesh: &str,
        bounds: &[f64],
    ) -> Result<(), CouplingError> {
        self.require_state("set_mesh_access_region", &[State::Constructed])?;
        let region = BoundingBox::from_bounds(bounds)?;
        let idx = self.mesh_context_index(mesh)?;
        let ctx = &mut self.mesh_contexts[idx];
        if ctx.access_region_set {
            return Err(CouplingError::AccessRegionAlreadySet(mesh.to_string()));
        }
        let received = ctx.received.as_mut().ok_or_else(|| CouplingError::WrongState {
            operation: "set_mesh_access_region",
            state: "provided mesh",
            detail: format!("mesh \"{mesh}\" is provided, not received"),
        })?;
        if !received.allows_direct_access() {
            return Err(CouplingError::WrongState {
                operation: "set_mesh_access_region",
                state: "direct access disabled",
                detail: format!(
                    "enable direct-access on the receive-mesh tag for \"{mesh}\""
                ),
            });
        }
        received.expand_access_region(&region);
        ctx.access_region_set = true;
        Ok(())
    }

    /// Local vertices of a received mesh inside the access region, as
    /// `(ids, interleaved coordinates)`.
    pub fn get_mesh_vertices_and_ids(
        &self,
        mesh: &str,
    ) -> Result<(Vec<VertexId>, Vec<f64>), CouplingError> {
        self.require_state("get_mesh_vertices_and_ids", &[State::Initialized])?;
        let ctx = self.mesh_context(mesh)?;
        let m = self.store.mesh(ctx.mesh);
        let mut ids = Vec::with_capacity(m.vertex_count());
        let mut coords = Vec::with_capacity(m.vertex_count() * self.dimensions);
        for (i, v) in m.vertices().iter().enumerate() {
            ids.push(VertexId::from_index(i));
            coords.extend_from_slice(v.coords(self.dimensions));
        }
        Ok((ids, coords))
    }

    // ------------------------------------------------------------------
    // data access
    // ------------------------------------------------------------------

    pub fn has_data(&self, mesh: &str, data: &str) -> bool {
        self.mesh_context(mesh)
            .map(|c| self.store.mesh(c.mesh).data_by_name(data).is_some())
            .unwrap_or(false)
    }

    pub fn requires_gradient_data_for(
        &self,
        mesh: &str,
        data: &str,
    ) -> Result<bool, CouplingError> {
        let ctx = self.mesh_context(mesh)?;
        let d = self
            .store
            .mesh(ctx.mesh)
            .data_by_name(data)
            .ok_or_else(|| CouplingError::UnknownData {
                mesh: mesh.to_string(),
                data: data.to_string(),
            })?;
        Ok(d.has_gradient())
    }

    pub fn write_scalar_data(
        &mut self,
        mesh: &str,
        data: &str,
        vertex: VertexId,
        value: f64,
    ) -> Result<(), CouplingError> {
        self.write_block_scalar_data(mesh, data, &[vertex], &[value])
    }

    pub fn write_vector_data(
        &mut self,
        mesh: &str,
        data: &str,
        vertex: VertexId,
        value: &[f64],
    ) -> Result<(), CouplingError> {
        self.write_block_vector_data(mesh, data, &[vertex], value)
    }

    pub fn write_block_scalar_data(
        &mut self,
        mesh: &str,
        data: &str,
        vertices: &[VertexId],
        values: &[f64],
    ) -> Result<(), CouplingError> {
        let (mesh_id, data_id) = self.writable_data(mesh, data, 1)?;
        debug_assert_eq!(vertices.len(), values.len());
        self.check_vertices(mesh, mesh_id, vertices)?;
        let buffer = self.store.values_mut(mesh_id, data_id);
        for (v, &x) in vertices.iter().zip(values) {
            buffer[v.index()] = x;
        }
        Ok(())
    }

    pub fn write_block_vector_data(
        &mut self,
        mesh: &str,
        data: &str,
        vertices: &[VertexId],
        values: &[f64],
    ) -> Result<(), CouplingError> {
        let dim = self.dimensions;
        let (mesh_id, data_id) = self.writable_data(mesh, data, dim)?;
        debug_assert_eq!(values.len(), vertices.len() * dim);
        self.check_vertices(mesh, mesh_id, vertices)?;
        let buffer = self.store.values_mut(mesh_id, data_id);
        for (i, v) in vertices.iter().enumerate() {
            buffer[v.index() * dim..(v.index() + 1) * dim]
                .copy_from_slice(&values[i * dim..(i + 1) * dim]);
        }
        Ok(())
    }

    pub fn write_global_scalar_data(
        &mut self,
        data: &str,
        value: f64,
    ) -> Result<(), CouplingError> {
        self.write_global_vector_data(data, &[value])
    }

    pub fn write_global_vector_data(
        &mut self,
        data: &str,
        value: &[f64],
    ) -> Result<(), CouplingError> {
        self.require_state("write_data", &[State::Constructed, State::Initialized])?;
        let g = self
            .store
            .global_by_name(data)
            .ok_or_else(|| CouplingError::UnknownGlobalData(data.to_string()))?;
        g.check_components(value.len())?;
        let id = g.id();
        self.store
            .global_mut(id)
            .expect("resolved above")
            .values_mut()
            .copy_from_slice(value);
        Ok(())
    }

    /// Gradient writes are ignored unless the data was configured with a
    /// gradient; then the block layout is `space_dim * components` values
    /// per vertex.
    pub fn write_block_vector_gradient_data(
        &mut self,
        mesh: &str,
        data: &str,
        vertices: &[VertexId],
        gradients: &[f64],
    ) -> Result<(), CouplingError> {
        self.write_gradient_block(mesh, data, vertices, gradients, self.dimensions)
    }

    pub fn write_block_scalar_gradient_data(
        &mut self,
        mesh: &str,
        data: &str,
        vertices: &[VertexId],
        gradients: &[f64],
    ) -> Result<(), CouplingError> {
        self.write_gradient_block(mesh, data, vertices, gradients, 1)
    }

    pub fn write_vector_gradient_data(
        &mut self,
        mesh: &str,
        data: &str,
        vertex: VertexId,
        gradients: &[f64],
    ) -> Result<(), CouplingError> {
        self.write_gradient_block(mesh, data, &[vertex], gradients, self.dimensions)
    }

    pub fn write_scalar_gradient_data(
        &mut self,
        mesh: &str,
        data: &str,
        vertex: VertexId,
        gradients: &[f64],
    ) -> Result<(), CouplingError> {
        self.write_gradient_block(mesh, data, &[vertex], gradients, 1)
    }

    fn write_gradient_block(
        &mut self,
        mesh: &str,
        data: &str,
        vertices: &[VertexId],
        gradients: &[f64],
        components: usize,
    ) -> Result<(), CouplingError> {
        if !self.requires_gradient_data_for(mesh, data)? {
            debug!("ignoring gradient write for \"{data}\": no gradient configured");
            return Ok(());
        }
        let (mesh_id, data_id) = self.writable_data(mesh, data, components)?;
        self.check_vertices(mesh, mesh_id, vertices)?;
        let stride = self.dimensions * components;
        if gradients.len() != vertices.len() * stride {
            return Err(CouplingError::DimensionMismatch {
                data: data.to_string(),
                actual: vertices.len() * stride,
                assumed: gradients.len(),
            });
        }
        let field = self
            .store
            .mesh_mut(mesh_id)
            .data_mut(data_id)
            .expect("resolved above");
        let buffer = field.gradients_mut();
        for (i, v) in vertices.iter().enumerate() {
            buffer[v.index() * stride..(v.index() + 1) * stride]
                .copy_from_slice(&gradients[i * stride..(i + 1) * stride]);
        }
        Ok(())
    }

    pub fn read_scalar_data(
        &self,
        mesh: &str,
        data: &str,
        vertex: VertexId,
    ) -> Result<f64, CouplingError> {
        Ok(self.read_block_scalar_data(mesh, data, &[vertex])?[0])
    }

    pub fn read_scalar_data_at(
        &self,
        mesh: &str,
        data: &str,
        vertex: VertexId,
        relative_read_time: f64,
    ) -> Result<f64, CouplingError> {
        Ok(self.read_block_scalar_data_at(mesh, data, &[vertex], relative_read_time)?[0])
    }

    pub fn read_vector_data(
        &self,
        mesh: &str,
        data: &str,
        vertex: VertexId,
    ) -> Result<Vec<f64>, CouplingError> {
        self.read_block_vector_data(mesh, data, &[vertex])
    }

    pub fn read_vector_data_at(
        &self,
        mesh: &str,
        data: &str,
        vertex: VertexId,
        relative_read_time: f64,
    ) -> Result<Vec<f64>, CouplingError> {
        self.read_block_vector_data_at(mesh, data, &[vertex], relative_read_time)
    }

    pub fn read_block_scalar_data(
        &self,
        mesh: &str,
        data: &str,
        vertices: &[VertexId],
    ) -> Result<Vec<f64>, CouplingError> {
        self.read_block(mesh, data, vertices, 1, None)
    }

    pub fn read_block_scalar_data_at(
        &self,
        mesh: &str,
        data: &str,
        vertices: &[VertexId],
        relative_read_time: f64,
    ) -> Result<Vec<f64>, CouplingError> {
        self.read_block(mesh, data, vertices, 1, Some(relative_read_time))
    }

    pub fn read_block_vector_data(
        &self,
        mesh: &str,
        data: &str,
        vertices: &[VertexId],
    ) -> Result<Vec<f64>, CouplingError> {
        self.read_block(mesh, data, vertices, self.dimensions, None)
    }

    pub fn read_block_vector_data_at(
        &self,
        mesh: &str,
        data: &str,
        vertices: &[VertexId],
        relative_read_time: f64,
    ) -> Result<Vec<f64>, CouplingError> {
        self.read_block(mesh, data, vertices, self.dimensions, Some(relative_read_time))
    }

    pub fn read_global_scalar_data(&self, data: &str) -> Result<f64, CouplingError> {
        Ok(self.read_global(data, 1, None)?[0])
    }

    pub fn read_global_scalar_data_at(
        &self,
        data: &str,
        relative_read_time: f64,
    ) -> Result<f64, CouplingError> {
        Ok(self.read_global(data, 1, Some(relative_read_time))?[0])
    }

    pub fn read_global_vector_data(&self, data: &str) -> Result<Vec<f64>, CouplingError> {
        self.read_global(data, self.dimensions, None)
    }

    pub fn read_global_vector_data_at(
        &self,
        data: &str,
        relative_read_time: f64,
    ) -> Result<Vec<f64>, CouplingError> {
        self.read_global(data, self.dimensions, Some(relative_read_time))
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    fn require_state(
        &self,
        operation: &'static str,
        allowed: &[State],
    ) -> Result<(), CouplingError> {
        if self.state == State::Failed {
            return Err(CouplingError::Poisoned);
        }
        if allowed.contains(&self.state) {
            return Ok(());
        }
        Err(CouplingError::WrongState {
            operation,
            state: self.state.name(),
            detail: format!(
                "allowed in {}",
                allowed
                    .iter()
                    .map(|s| s.name())
                    .collect::<Vec<_>>()
                    .join(" or ")
            ),
        })
    }

    fn mesh_context_index(&self, mesh: &str) -> Result<usize, CouplingError> {
        self.mesh_contexts
            .iter()
            .position(|c| c.name == mesh)
            .ok_or_else(|| CouplingError::UnknownMesh(mesh.to_string()))
    }

    fn mesh_context(&self, mesh: &str) -> Result<&MeshContext, CouplingError> {
        self.mesh_contexts
            .iter()
            .find(|c| c.name == mesh)
            .ok_or_else(|| CouplingError::UnknownMesh(mesh.to_string()))
    }

    /// Mesh id if the mesh may be modified in the current state.
    fn writable_mesh(&mut self, mesh: &str) -> Result<MeshId, CouplingError> {
        self.require_state(
            "mesh modification",
            &[State::Constructed, State::Initialized],
        )?;
        let ctx = self.mesh_context(mesh)?;
        if ctx.locked {
            return Err(CouplingError::MeshLocked(mesh.to_string()));
        }
        if !ctx.is_provided() {
            return Err(CouplingError::WrongState {
                operation: "mesh modification",
                state: "received mesh",
                detail: format!(
                    "mesh \"{mesh}\" is received from \"{}\"; its vertices come from the provider",
                    ctx.provider().unwrap_or("?")
                ),
            });
        }
        Ok(ctx.mesh)
    }

    /// Resolve a writable data field and check its component count.
    fn writable_data(
        &mut self,
        mesh: &str,
        data: &str,
        components: usize,
    ) -> Result<(MeshId, DataId), CouplingError> {
        self.require_state("write_data", &[State::Constructed, State::Initialized])?;
        let ctx = self.mesh_context(mesh)?;
        let mesh_id = ctx.mesh;
        let field = self
            .store
            .mesh(mesh_id)
            .data_by_name(data)
            .ok_or_else(|| CouplingError::UnknownData {
                mesh: mesh.to_string(),
                data: data.to_string(),
            })?;
        if field.components() != components {
            return Err(CouplingError::DimensionMismatch {
                data: data.to_string(),
                actual: field.components(),
                assumed: components,
            });
        }
        Ok((mesh_id, field.id()))
    }

    fn check_vertices(
        &self,
        mesh: &str,
        mesh_id: MeshId,
        vertices: &[VertexId],
    ) -> Result<(), CouplingError> {
        let size = self.store.mesh(mesh_id).vertex_count();
        for v in vertices {
            if v.index() >= size {
                return Err(CouplingError::InvalidVertexId {
                    mesh: mesh.to_string(),
                    id: v.index(),
                    size,
                });
            }
        }
        Ok(())
    }

    fn read_block(
        &self,
        mesh: &str,
        data: &str,
        vertices: &[VertexId],
        components: usize,
        relative_read_time: Option<f64>,
    ) -> Result<Vec<f64>, CouplingError> {
        self.require_state("read_data", &[State::Initialized])?;
        let mesh_ctx = self.mesh_context(mesh)?;
        let mesh_id = mesh_ctx.mesh;
        self.check_vertices(mesh, mesh_id, vertices)?;
        let ctx = self
            .data_contexts
            .iter()
            .find(|c| {
                c.mesh == Some(mesh_id)
                    && c.name == data
                    && c.direction == DataDirection::Read
            })
            .ok_or_else(|| CouplingError::UnknownData {
                mesh: mesh.to_string(),
                data: data.to_string(),
            })?;
        if ctx.components != components {
            return Err(CouplingError::DimensionMismatch {
                data: data.to_string(),
                actual: ctx.components,
                assumed: components,
            });
        }
        let sampled = self.sample_read(ctx, relative_read_time)?;
        let mut out = Vec::with_capacity(vertices.len() * components);
        for v in vertices {
            out.extend_from_slice(&sampled[v.index() * components..(v.index() + 1) * components]);
        }
        Ok(out)
    }

    fn read_global(
        &self,
        data: &str,
        components: usize,
        relative_read_time: Option<f64>,
    ) -> Result<Vec<f64>, CouplingError> {
        self.require_state("read_data", &[State::Initialized])?;
        let ctx = self
            .data_contexts
            .iter()
            .find(|c| c.mesh.is_none() && c.name == data && c.direction == DataDirection::Read)
            .ok_or_else(|| CouplingError::UnknownGlobalData(data.to_string()))?;
        if ctx.components != components {
            return Err(CouplingError::DimensionMismatch {
                data: data.to_string(),
                actual: ctx.components,
                assumed: components,
            });
        }
        self.sample_read(ctx, relative_read_time)
    }

    /// Sample a read context's waveform at a relative read time inside
    /// the current window.
    fn sample_read(
        &self,
        ctx: &DataContext,
        relative_read_time: Option<f64>,
    ) -> Result<Vec<f64>, CouplingError> {
        let waveform = ctx.waveform.as_ref().expect("read context has a waveform");
        let remainder = self.scheme.this_time_window_remainder();
        let normalized = match relative_read_time {
            None => {
                if ctx.waveform_order == 0 {
                    warn!(
                        "reading \"{}\" without a relative read time; with waveform order 0 this returns the window-end value",
                        ctx.name
                    );
                }
                1.0
            }
            Some(tau) => {
                let eps = math::NUMERICAL_ZERO;
                if tau < -eps || tau > remainder + eps {
                    return Err(CouplingError::ReadTimeOutOfRange {
                        requested: tau,
                        remainder,
                    });
                }
                if self.scheme.sets_time_window_size()
                    && !math::equals(tau, remainder, eps)
                {
                    return Err(CouplingError::FirstParticipantReadTime);
                }
                match self.scheme.time_window_size() {
                    Some(window) => ((window - remainder + tau) / window).clamp(0.0, 1.0),
                    None => 1.0,
                }
            }
        };
        Ok(waveform.sample(normalized))
    }

    /// Map written data towards its exchange meshes.
    fn perform_write_mappings(
        &mut self,
        timing: Option<MappingTiming>,
    ) -> Result<(), CouplingError> {
        for m in &mut self.mappings {
            if m.direction != DataDirection::Write {
                continue;
            }
            if matches!(timing, Some(t) if t != m.timing) {
                continue;
            }
            for &(from, to) in &m.pairs {
                let from_values = self.store.values(m.from_mesh, from).to_vec();
                let components = self
                    .store
                    .mesh(m.from_mesh)
                    .data(from)
                    .expect("validated pair")
                    .components();
                let to_values = self.store.values_mut(m.to_mesh, to);
                m.mapping.map(components, &from_values, to_values)?;
            }
            m.has_mapped_data = true;
        }
        Ok(())
    }

    /// Map received data onto the read meshes and refresh the waveforms.
    fn perform_read_mappings(
        &mut self,
        timing: Option<MappingTiming>,
    ) -> Result<(), CouplingError> {
        for m in &mut self.mappings {
            if m.direction != DataDirection::Read {
                continue;
            }
            if matches!(timing, Some(t) if t != m.timing) {
                continue;
            }
            for &(from, to) in &m.pairs {
                let from_values = self.store.values(m.from_mesh, from).to_vec();
                let components = self
                    .store
                    .mesh(m.from_mesh)
                    .data(from)
                    .expect("validated pair")
                    .components();
                let to_values = self.store.values_mut(m.to_mesh, to);
                m.mapping.map(components, &from_values, to_values)?;
            }
            m.has_mapped_data = true;
        }
        // Fresh samples become the current-window waveform slot.
        for ctx in &mut self.data_contexts {
            if ctx.direction != DataDirection::Read {
                continue;
            }
            if let Some(w) = &mut ctx.waveform {
                let values = match ctx.mesh {
                    Some(mesh) => self.store.values(mesh, ctx.data),
                    None => self
                        .store
                        .global(ctx.data)
                        .expect("validated data reference")
                        .values(),
                };
                w.store(values);
            }
        }
        Ok(())
    }

    /// Zero the solver-facing write buffers after each exchange.
    fn reset_written_data(&mut self) {
        for ctx in &self.data_contexts {
            if ctx.direction != DataDirection::Write {
                continue;
            }
            if let Some(mesh) = ctx.mesh {
                if let Some(field) = self.store.mesh_mut(mesh).data_mut(ctx.data) {
                    field.reset();
                }
            }
        }
    }

    fn compare_bounding_boxes(&mut self, order: &[usize]) -> Result<(), CouplingError> {
        for &i in order {
            let ctx = &self.mesh_contexts[i];
            let mesh_id = ctx.mesh;
            if ctx.is_provided() {
                for receiver in ctx.receivers.clone() {
                    let m2n = self.m2n_to(&receiver)?;
                    let p = self.mesh_contexts[i]
                        .provided
                        .as_ref()
                        .expect("provided context");
                    p.communicate_bounding_boxes(
                        self.store.mesh(mesh_id),
                        &m2n,
                        self.rank,
                        self.size,
                    )?;
                }
            } else {
                let provider = self.mesh_contexts[i]
                    .provider()
                    .expect("received context")
                    .to_string();
                let m2n = self.m2n_to(&provider)?;
                let region = self.filter_region_for(i)?;
                let ctx = &mut self.mesh_contexts[i];
                let mesh = ctx.mesh;
                let r = ctx.received.as_mut().expect("received context");
                // Borrow juggling: the store is read-only here.
                r.compare_bounding_boxes(
                    // A received mesh has no vertices yet; only id and dim
                    // matter for the wire format.
                    &clone_mesh_header(&self.store, mesh),
                    &m2n,
                    region.as_ref(),
                )?;
            }
        }
        Ok(())
    }

    fn compute_partitions(&mut self, order: &[usize]) -> Result<(), CouplingError> {
        for &i in order {
            let mesh_id = self.mesh_contexts[i].mesh;
            if self.mesh_contexts[i].is_provided() {
                for receiver in self.mesh_contexts[i].receivers.clone() {
                    let m2n = self.m2n_to(&receiver)?;
                    let two_level = self.two_level;
                    let region = if two_level {
                        let p = self.mesh_contexts[i].provided.as_ref().expect("provided");
                        Some(p.receive_receiver_region(self.store.mesh(mesh_id), &m2n)?)
                    } else {
                        None
                    };
                    let p = self.mesh_contexts[i].provided.as_ref().expect("provided");
                    p.communicate_mesh(self.store.mesh(mesh_id), &m2n, region.as_ref())?;
                    m2n.set_vertex_distribution(
                        mesh_id,
                        VertexDistribution::identity(self.store.mesh(mesh_id).vertex_count()),
                    );
                }
            } else {
                let provider = self.mesh_contexts[i]
                    .provider()
                    .expect("received")
                    .to_string();
                let m2n = self.m2n_to(&provider)?;
                let region = self.filter_region_for(i)?;
                let requirement = self.mesh_contexts[i].requirement;
                let ctx = &mut self.mesh_contexts[i];
                let r = ctx.received.as_mut().expect("received");
                let mut mesh = std::mem::replace(
                    self.store.mesh_mut(mesh_id),
                    crate::mesh::Mesh::new("", MeshId::new(u32::MAX), 2),
                );
                let result =
                    r.communicate_and_filter(&mut mesh, &m2n, requirement, region.as_ref());
                *self.store.mesh_mut(mesh_id) = mesh;
                result?;
                let r = self.mesh_contexts[i].received.as_ref().expect("received");
                m2n.set_vertex_distribution(
                    mesh_id,
                    VertexDistribution {
                        total: r.provider_total(),
                        local_to_global: r.global_ids().iter().map(|v| v.get()).collect(),
                    },
                );
            }
        }
        Ok(())
    }

    /// Filter region of a received mesh: owned interface boxes of the
    /// meshes mapped against it, inflated, plus the access region.
    fn filter_region_for(
        &self,
        ctx_index: usize,
    ) -> Result<Option<BoundingBox>, CouplingError> {
        let ctx = &self.mesh_contexts[ctx_index];
        let mesh_id = ctx.mesh;
        let mut owned = Vec::new();
        for m in &self.mappings {
            let other = if m.from_mesh == mesh_id {
                Some(m.to_mesh)
            } else if m.to_mesh == mesh_id {
                Some(m.from_mesh)
            } else {
                None
            };
            if let Some(other) = other {
                if self
                    .mesh_contexts
                    .iter()
                    .any(|c| c.mesh == other && c.is_provided())
                {
                    owned.push(self.store.mesh(other).compute_bounding_box());
                }
            }
        }
        let r = ctx.received.as_ref().expect("received context");
        r.compute_filter_region(&ctx.name, self.dimensions, &owned)
    }

    fn m2n_to(&self, peer: &str) -> Result<Arc<M2N>, CouplingError> {
        self.m2ns
            .iter()
            .find(|(name, _)| name == peer)
            .map(|(_, m)| m.clone())
            .ok_or_else(|| {
                CouplingError::Config(format!(
                    "no m2n connection configured towards \"{peer}\""
                ))
            })
    }
}

/// A vertexless stand-in carrying only id, name, and dimension, for wire
/// phases that never touch vertex data.
fn clone_mesh_header(store: &DataStore, mesh: MeshId) -> crate::mesh::Mesh {
    let m = store.mesh(mesh);
    crate::mesh::Mesh::new(m.name(), m.id(), m.dim())
}

impl Drop for SolverInterface {
    fn drop(&mut self) {
        if self.state == State::Initialized {
            if let Err(e) = self.finalize() {
                warn!("implicit finalize failed: {e}");
            }
        }
    }
}
