//! Provider side of the mesh-exchange protocol.

use log::debug;

use super::{bbox_tag, mesh_tag};
use crate::com::{Communication, M2N};
use crate::error::CouplingError;
use crate::mesh::{Mesh, MeshRequirement, VertexId};

/// Wraps a locally provided mesh and scatters it to receivers.
///
/// The effective mesh requirement is the maximum of the provider's own and
/// every receiver's declared requirement (`Vertex < Full`).
pub struct ProvidedPartition {
    requirement: MeshRequirement,
}

impl ProvidedPartition {
    pub fn new(requirement: MeshRequirement) -> Self {
        Self { requirement }
    }

    #[inline]
    pub fn requirement(&self) -> MeshRequirement {
        self.requirement
    }

    /// Raise the requirement to cover a receiver's declared need.
    pub fn merge_requirement(&mut self, other: MeshRequirement) {
        self.requirement = self.requirement.max(other);
    }

    /// Assign provider-global ids to the local vertices. Ids equal the
    /// local vertex index offset by the vertex count of lower ranks, so
    /// they are dense and stable across the participant.
    pub fn assign_global_ids(&self, mesh: &mut Mesh, rank_offset: usize) {
        for (i, v) in mesh.vertices_mut().iter_mut().enumerate() {
            v.global_id = Some(VertexId::from_index(rank_offset + i));
        }
    }

    /// Phase 1: advertise the per-rank bounding boxes of this mesh.
    ///
    /// Wire layout per spec: rank count, then `(rank, [min0, max0, ...])`
    /// tuples. A single-rank provider sends exactly one tuple.
    pub fn communicate_bounding_boxes(
        &self,
        mesh: &Mesh,
        m2n: &M2N,
        rank: usize,
        size: usize,
    ) -> Result<(), CouplingError> {
        let tag = bbox_tag(mesh.id());
        let ch = m2n.primary();
        ch.send_u64(tag, size as u64)?;
        let bb = mesh.compute_bounding_box();
        let mut wire = vec![rank as f64];
        wire.extend(bb.to_wire());
        ch.send_f64s(tag, &wire)?;
        Ok(())
    }

    /// Phase 2: ship the mesh to the receiver.
    ///
    /// When `receiver_region` is set (two-level initialization) the provider
    /// pre-filters its vertices against the receiver rank's region, so the
    /// full mesh never crosses the wire.
    pub fn communicate_mesh(
        &self,
        mesh: &Mesh,
        m2n: &M2N,
        receiver_region: Option<&crate::mesh::BoundingBox>,
    ) -> Result<(), CouplingError> {
        let tag = mesh_tag(mesh.id());
        let ch = m2n.distributed();
        let dim = mesh.dim();

        let selected: Vec<usize> = match receiver_region {
            Some(region) => mesh
                .vertices()
                .iter()
                .enumerate()
                .filter(|(_, v)| region.contains(v.coords(dim)))
                .map(|(i, _)| i)
                .collect(),
            None => (0..mesh.vertex_count()).collect(),
        };
        debug!(
            "providing mesh \"{}\": {} of {} vertices",
            mesh.name(),
            selected.len(),
            mesh.vertex_count()
        );

        // Full provider count first: the receiver sizes its vertex
        // distribution from it even when only a slice crosses the wire.
        ch.send_u64(tag, mesh.vertex_count() as u64)?;
        ch.send_u64(tag, selected.len() as u64)?;
        if selected.is_empty() {
            return Ok(());
        }

        let mut coords = Vec::with_capacity(selected.len() * dim);
        let mut global_ids = Vec::with_capacity(selected.len());
        for &i in &selected {
            let v = &mesh.vertices()[i];
            coords.extend_from_slice(v.coords(dim));
            global_ids.push(v.global_id().map_or(i as u64, |g| g.get() as u64));
        }
        ch.send_f64s(tag, &coords)?;
        ch.send_u64s(tag, &global_ids)?;

        if self.requirement == MeshRequirement::Full {
            // Connectivity referencing dropped vertices is skipped; the
            // receiver re-filters anyway. Vertices go out as global ids,
            // the id space the receiver keys its remap by.
            let keep: std::collections::HashSet<usize> = selected.iter().copied().collect();
            let to_global = |v: &VertexId| -> u64 {
                mesh.vertices()[v.index()]
                    .global_id()
                    .map_or(v.get() as u64, |g| g.get() as u64)
            };
            let edges: Vec<u64> = mesh
                .edges()
                .iter()
                .filter(|e| e.vertices.iter().all(|v| keep.contains(&v.index())))
                .flat_map(|e| e.vertices.iter().map(to_global))
                .collect();
            ch.send_u64(tag, (edges.len() / 2) as u64)?;
            ch.send_u64s(tag, &edges)?;
            let triangles: Vec<u64> = mesh
                .triangles()
                .iter()
                .filter(|t| t.vertices.iter().all(|v| keep.contains(&v.index())))
                .flat_map(|t| t.vertices.iter().map(to_global))
                .collect();
            ch.send_u64(tag, (triangles.len() / 3) as u64)?;
            ch.send_u64s(tag, &triangles)?;
            let tetrahedra: Vec<u64> = mesh
                .tetrahedra()
                .iter()
                .filter(|t| t.vertices.iter().all(|v| keep.contains(&v.index())))
                .flat_map(|t| t.vertices.iter().map(to_global))
                .collect();
            ch.send_u64(tag, (tetrahedra.len() / 4) as u64)?;
            ch.send_u64s(tag, &tetrahedra)?;
        }
        Ok(())
    }

    /// Two-level initialization: read the receiver rank's region before
    /// pre-filtering.
    pub fn receive_receiver_region(
        &self,
        mesh: &Mesh,
        m2n: &M2N,
    ) -> Result<crate::mesh::BoundingBox, CouplingError> {
        let tag = bbox_tag(mesh.id());
        let wire = m2n.primary().recv_f64s(tag, 2 * mesh.dim())?;
        crate::mesh::BoundingBox::from_wire(mesh.dim(), &wire)
    }
}
