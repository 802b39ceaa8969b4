//! Receiver side of the mesh-exchange protocol: communicate, filter,
//! remap.

use hashbrown::HashMap;
use log::debug;

use super::{bbox_tag, mesh_tag};
use crate::com::{Communication, M2N};
use crate::error::CouplingError;
use crate::mesh::{BoundingBox, Mesh, MeshRequirement, Vertex, VertexId};

/// Where geometric filtering of a received mesh happens.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GeometricFilter {
    /// Keep every received vertex.
    NoFilter,
    /// The provider broadcasts everything; each receiver rank filters
    /// locally.
    OnReceiver,
    /// Two-level initialization: the receiver sends its region first and
    /// the provider pre-filters per receiver rank.
    OnProvider,
}

/// Receiver-side state for one received mesh.
pub struct ReceivedPartition {
    filter: GeometricFilter,
    safety_factor: f64,
    allow_direct_access: bool,
    access_region: Option<BoundingBox>,
    /// Provider ranks whose boxes overlap this rank's region.
    connected_ranks: Vec<usize>,
    /// Provider-global id per local vertex index, kept for mappings and
    /// direct access.
    global_ids: Vec<VertexId>,
    /// Vertex count of the full provider mesh, from the communicate phase.
    provider_total: usize,
}

impl ReceivedPartition {
    pub fn new(filter: GeometricFilter, safety_factor: f64, allow_direct_access: bool) -> Self {
        Self {
            filter,
            safety_factor,
            allow_direct_access,
            access_region: None,
            connected_ranks: Vec::new(),
            global_ids: Vec::new(),
            provider_total: 0,
        }
    }

    #[inline]
    pub fn filter(&self) -> GeometricFilter {
        self.filter
    }

    #[inline]
    pub fn allows_direct_access(&self) -> bool {
        self.allow_direct_access
    }

    /// Union a direct-access region into this partition's filter box.
    pub fn expand_access_region(&mut self, region: &BoundingBox) {
        match &mut self.access_region {
            Some(existing) => existing.expand(region),
            None => self.access_region = Some(region.clone()),
        }
    }

    #[inline]
    pub fn access_region(&self) -> Option<&BoundingBox> {
        self.access_region.as_ref()
    }

    /// Provider ranks overlapping this rank's region after the
    /// bounding-box phase.
    #[inline]
    pub fn connected_ranks(&self) -> &[usize] {
        &self.connected_ranks
    }

    /// Provider-global id of local vertex `local`.
    pub fn global_id(&self, local: usize) -> Option<VertexId> {
        self.global_ids.get(local).copied()
    }

    #[inline]
    pub fn global_ids(&self) -> &[VertexId] {
        &self.global_ids
    }

    /// Vertex count of the full provider mesh.
    #[inline]
    pub fn provider_total(&self) -> usize {
        self.provider_total
    }

    /// The region this rank keeps: the union of the owned interface boxes,
    /// inflated by the safety factor, unioned with the access region.
    ///
    /// # Errors
    /// `AccessRegionTooSmall` when a direct-access region is set but does
    /// not cover the owned interface; vertices the attached mappings need
    /// would be silently lost.
    pub fn compute_filter_region(
        &self,
        mesh_name: &str,
        dim: usize,
        owned_boxes: &[BoundingBox],
    ) -> Result<Option<BoundingBox>, CouplingError> {
        let mut own = BoundingBox::new(dim);
        for bb in owned_boxes {
            own.expand(bb);
        }
        own.inflate(self.safety_factor);

        if let Some(region) = &self.access_region {
            if !own.is_empty() && !region.contains_box(&own) {
                return Err(CouplingError::AccessRegionTooSmall(mesh_name.to_string()));
            }
            let mut combined = region.clone();
            if !own.is_empty() {
                combined.expand(&own);
            }
            return Ok(Some(combined));
        }
        if own.is_empty() {
            // Nothing to anchor a filter on: keep the full mesh.
            return Ok(None);
        }
        Ok(Some(own))
    }

    /// Phase 1: read the provider's per-rank boxes and record overlaps.
    pub fn compare_bounding_boxes(
        &mut self,
        mesh: &Mesh,
        m2n: &M2N,
        region: Option<&BoundingBox>,
    ) -> Result<(), CouplingError> {
        let tag = bbox_tag(mesh.id());
        let ch = m2n.primary();
        let ranks = ch.recv_u64(tag)? as usize;
        self.connected_ranks.clear();
        for _ in 0..ranks {
            let wire = ch.recv_f64s(tag, 1 + 2 * mesh.dim())?;
            let rank = wire[0] as usize;
            let bb = BoundingBox::from_wire(mesh.dim(), &wire[1..])?;
            let overlaps = match region {
                Some(r) => r.overlaps(&bb),
                None => true,
            };
            if overlaps {
                self.connected_ranks.push(rank);
            }
        }
        debug!(
            "mesh \"{}\": {} of {} provider ranks overlap",
            mesh.name(),
            self.connected_ranks.len(),
            ranks
        );
        Ok(())
    }

    /// Phases 2-3: receive the mesh, filter it against `region`, and
    /// assign dense local ids while recording the global translation.
    ///
    /// An empty filter result is a valid empty partition, not an error.
    pub fn communicate_and_filter(
        &mut self,
        mesh: &mut Mesh,
        m2n: &M2N,
        requirement: MeshRequirement,
        region: Option<&BoundingBox>,
    ) -> Result<(), CouplingError> {
        let tag = mesh_tag(mesh.id());
        let ch = m2n.distributed();
        let dim = mesh.dim();

        if self.filter == GeometricFilter::OnProvider {
            // Two-level: publish the region; the provider pre-filters.
            let wire = match region {
                Some(r) => r.to_wire(),
                None => {
                    let mut all = BoundingBox::new(dim);
                    all.expand_by_point(&vec![f64::NEG_INFINITY; dim]);
                    all.expand_by_point(&vec![f64::INFINITY; dim]);
                    all.to_wire()
                }
            };
            m2n.primary().send_f64s(bbox_tag(mesh.id()), &wire)?;
        }

        self.provider_total = ch.recv_u64(tag)? as usize;
        let count = ch.recv_u64(tag)? as usize;
        if count == 0 {
            mesh.set_received_vertices(Vec::new());
            self.global_ids.clear();
            return Ok(());
        }
        let coords = ch.recv_f64s(tag, count * dim)?;
        let global = ch.recv_u64s(tag, count)?;

        // Local filtering is skipped when the provider already filtered.
        let filter_here = match self.filter {
            GeometricFilter::NoFilter | GeometricFilter::OnProvider => false,
            GeometricFilter::OnReceiver => region.is_some(),
        };

        let mut vertices = Vec::new();
        let mut kept_global = Vec::new();
        // remote (provider) index -> local index, for connectivity remap
        let mut remote_to_local: HashMap<u64, VertexId> = HashMap::new();
        for i in 0..count {
            let point = &coords[i * dim..(i + 1) * dim];
            if filter_here && !region.expect("filter implies region").contains(point) {
                continue;
            }
            let local = VertexId::from_index(vertices.len());
            let mut c = [0.0; 3];
            c[..dim].copy_from_slice(point);
            vertices.push(Vertex {
                coords: c,
                global_id: Some(VertexId::new(global[i] as u32)),
                owned: false,
            });
            remote_to_local.insert(global[i], local);
            kept_global.push(VertexId::new(global[i] as u32));
        }
        debug!(
            "received mesh \"{}\": kept {} of {} vertices",
            mesh.name(),
            vertices.len(),
            count
        );
        mesh.set_received_vertices(vertices);
        self.global_ids = kept_global;

        if requirement == MeshRequirement::Full {
            let edge_count = ch.recv_u64(tag)? as usize;
            let edges = ch.recv_u64s(tag, edge_count * 2)?;
            for pair in edges.chunks_exact(2) {
                if let (Some(&a), Some(&b)) =
                    (remote_to_local.get(&pair[0]), remote_to_local.get(&pair[1]))
                {
                    mesh.add_unique_edge(a, b)?;
                }
            }
            let tri_count = ch.recv_u64(tag)? as usize;
            let triangles = ch.recv_u64s(tag, tri_count * 3)?;
            for t in triangles.chunks_exact(3) {
                if let (Some(&a), Some(&b), Some(&c)) = (
                    remote_to_local.get(&t[0]),
                    remote_to_local.get(&t[1]),
                    remote_to_local.get(&t[2]),
                ) {
                    mesh.add_triangle(a, b, c)?;
                }
            }
            let tet_count = ch.recv_u64(tag)? as usize;
            let tetrahedra = ch.recv_u64s(tag, tet_count * 4)?;
            for t in tetrahedra.chunks_exact(4) {
                if let (Some(&a), Some(&b), Some(&c), Some(&d)) = (
                    remote_to_local.get(&t[0]),
                    remote_to_local.get(&t[1]),
                    remote_to_local.get(&t[2]),
                    remote_to_local.get(&t[3]),
                ) {
                    mesh.add_tetrahedron(a, b, c, d)?;
                }
            }
        }
        Ok(())
    }

    /// Forget the received slice (mesh reset); the next initialization
    /// rebuilds it.
    pub fn clear(&mut self) {
        self.global_ids.clear();
        self.connected_ranks.clear();
        self.provider_total = 0;
    }
}
