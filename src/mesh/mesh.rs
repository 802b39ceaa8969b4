//! Mesh storage: vertices, connectivity, and the data fields living on them.
//!
//! A mesh owns its [`Data`] fields (arena style); everything else refers to
//! them by [`DataId`] and resolves through the owning mesh. Vertex ids are
//! dense indices assigned at creation, stable until [`Mesh::clear`].

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use super::bounding_box::BoundingBox;
use super::data::{Data, DataId};
use super::geometry;
use crate::error::CouplingError;

/// Stable id of a mesh, unique across the configuration.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct MeshId(pub(crate) u32);

impl MeshId {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }
}

/// Dense per-mesh vertex id; equals the vertex count at creation time.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct VertexId(pub(crate) u32);

impl VertexId {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// The id as a buffer index.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn from_index(i: usize) -> Self {
        Self(i as u32)
    }
}

impl std::fmt::Debug for VertexId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("VertexId").field(&self.0).finish()
    }
}

impl std::fmt::Display for VertexId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A vertex: 2D or 3D coordinates (third component unused in 2D) plus an
/// optional global id kept through repartitioning.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Vertex {
    pub(crate) coords: [f64; 3],
    /// Id on the providing participant; `None` until partitioning assigns it.
    pub(crate) global_id: Option<VertexId>,
    /// Whether this rank owns the vertex (vs. holding a filtered remote copy).
    pub(crate) owned: bool,
}

impl Vertex {
    /// Coordinate slice of length `dim`.
    #[inline]
    pub fn coords(&self, dim: usize) -> &[f64] {
        &self.coords[..dim]
    }

    /// Global id on the provider side, if assigned.
    #[inline]
    pub fn global_id(&self) -> Option<VertexId> {
        self.global_id
    }

    #[inline]
    pub fn is_owned(&self) -> bool {
        self.owned
    }
}

/// Undirected edge between two vertices of the same mesh.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Edge {
    pub vertices: [VertexId; 2],
}

/// Triangle; quads are decomposed into two of these on creation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Triangle {
    pub vertices: [VertexId; 3],
}

/// Tetrahedron record; its faces and edges are materialized separately.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Tetrahedron {
    pub vertices: [VertexId; 4],
}

/// Connectivity level a participant must provide for a mesh.
///
/// Ordered: `Vertex < Full`, so requirements can be merged with `max`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum MeshRequirement {
    /// Only vertex positions are needed.
    #[default]
    Vertex,
    /// Edges/triangles/tetrahedra are needed (e.g. for projection mappings).
    Full,
}

/// A mesh: ordered vertices, optional connectivity, owned data fields.
#[derive(Clone, Debug)]
pub struct Mesh {
    name: String,
    id: MeshId,
    dim: usize,
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    edge_index: HashMap<(VertexId, VertexId), usize>,
    triangles: Vec<Triangle>,
    tetrahedra: Vec<Tetrahedron>,
    data: Vec<Data>,
}

impl Mesh {
    pub fn new(name: impl Into<String>, id: MeshId, dim: usize) -> Self {
        debug_assert!(dim == 2 || dim == 3, "spatial dimension must be 2 or 3");
        Self {
            name: name.into(),
            id,
            dim,
            vertices: Vec::new(),
            edges: Vec::new(),
            edge_index: HashMap::new(),
            triangles: Vec::new(),
            tetrahedra: Vec::new(),
            data: Vec::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn id(&self) -> MeshId {
        self.id
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    #[inline]
    pub(crate) fn vertices_mut(&mut self) -> &mut [Vertex] {
        &mut self.vertices
    }

    #[inline]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    #[inline]
    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    #[inline]
    pub fn tetrahedra(&self) -> &[Tetrahedron] {
        &self.tetrahedra
    }

    /// Is `id` a vertex of this mesh?
    #[inline]
    pub fn is_valid_vertex(&self, id: VertexId) -> bool {
        id.index() < self.vertices.len()
    }

    fn check_vertex(&self, id: VertexId) -> Result<(), CouplingError> {
        if !self.is_valid_vertex(id) {
            return Err(CouplingError::InvalidVertexId {
                mesh: self.name.clone(),
                id: id.index(),
                size: self.vertices.len(),
            });
        }
        Ok(())
    }

    /// Append a vertex by value copy; its id equals the previous vertex
    /// count. All data buffers are reallocated to the new size.
    pub fn add_vertex(&mut self, coords: &[f64]) -> VertexId {
        debug_assert_eq!(coords.len(), self.dim);
        let id = VertexId::from_index(self.vertices.len());
        let mut c = [0.0; 3];
        c[..self.dim].copy_from_slice(coords);
        self.vertices.push(Vertex {
            coords: c,
            global_id: None,
            owned: true,
        });
        self.allocate_data_values();
        id
    }

    /// Append `n` vertices from an interleaved coordinate buffer, returning
    /// their ids in order. Buffers are reallocated once at the end.
    pub fn add_vertices(&mut self, positions: &[f64]) -> Vec<VertexId> {
        debug_assert_eq!(positions.len() % self.dim, 0);
        let n = positions.len() / self.dim;
        let mut ids = Vec::with_capacity(n);
        for i in 0..n {
            let id = VertexId::from_index(self.vertices.len());
            let mut c = [0.0; 3];
            c[..self.dim].copy_from_slice(&positions[i * self.dim..(i + 1) * self.dim]);
            self.vertices.push(Vertex {
                coords: c,
                global_id: None,
                owned: true,
            });
            ids.push(id);
        }
        self.allocate_data_values();
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        self.debug_assert_invariants();
        ids
    }

    /// Deduplicating edge creation: an edge with the same endpoint set is
    /// returned instead of created again.
    pub fn add_unique_edge(&mut self, a: VertexId, b: VertexId) -> Result<usize, CouplingError> {
        self.check_vertex(a)?;
        self.check_vertex(b)?;
        let key = if a <= b { (a, b) } else { (b, a) };
        if let Some(&idx) = self.edge_index.get(&key) {
            return Ok(idx);
        }
        let idx = self.edges.len();
        self.edges.push(Edge { vertices: [a, b] });
        self.edge_index.insert(key, idx);
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        self.debug_assert_invariants();
        Ok(idx)
    }

    /// Create a triangle, materializing its three edges idempotently.
    pub fn add_triangle(
        &mut self,
        a: VertexId,
        b: VertexId,
        c: VertexId,
    ) -> Result<(), CouplingError> {
        self.add_unique_edge(a, b)?;
        self.add_unique_edge(b, c)?;
        self.add_unique_edge(c, a)?;
        self.triangles.push(Triangle { vertices: [a, b, c] });
        Ok(())
    }

    /// Create a quad, stored as two triangles.
    ///
    /// The four vertices must be distinct and form a convex quad. The split
    /// runs along the shorter diagonal of the canonical vertex order; on a
    /// tie, along `(v0, v2)`.
    pub fn add_quad(
        &mut self,
        a: VertexId,
        b: VertexId,
        c: VertexId,
        d: VertexId,
    ) -> Result<(), CouplingError> {
        let ids = [a, b, c, d];
        for &v in &ids {
            self.check_vertex(v)?;
        }
        for i in 0..4 {
            for j in (i + 1)..4 {
                if ids[i] == ids[j] {
                    return Err(CouplingError::InvalidQuad {
                        mesh: self.name.clone(),
                        detail: format!("duplicate vertex id {}", ids[i]),
                    });
                }
            }
        }
        let coords = [
            self.vertices[a.index()].coords,
            self.vertices[b.index()].coords,
            self.vertices[c.index()].coords,
            self.vertices[d.index()].coords,
        ];
        let order = geometry::convex_quad_order(&coords, self.dim).ok_or_else(|| {
            CouplingError::InvalidQuad {
                mesh: self.name.clone(),
                detail: "vertices do not form a convex quad".into(),
            }
        })?;
        let v: Vec<VertexId> = order.iter().map(|&i| ids[i]).collect();
        let d02 = geometry::distance2(
            &self.vertices[v[0].index()].coords,
            &self.vertices[v[2].index()].coords,
            self.dim,
        );
        let d13 = geometry::distance2(
            &self.vertices[v[1].index()].coords,
            &self.vertices[v[3].index()].coords,
            self.dim,
        );
        if d02 <= d13 {
            self.add_triangle(v[0], v[1], v[2])?;
            self.add_triangle(v[0], v[2], v[3])?;
        } else {
            self.add_triangle(v[1], v[2], v[3])?;
            self.add_triangle(v[1], v[3], v[0])?;
        }
        Ok(())
    }

    /// Create a tetrahedron: the record plus its 4 faces and 6 edges.
    pub fn add_tetrahedron(
        &mut self,
        a: VertexId,
        b: VertexId,
        c: VertexId,
        d: VertexId,
    ) -> Result<(), CouplingError> {
        for &v in &[a, b, c, d] {
            self.check_vertex(v)?;
        }
        self.add_triangle(a, b, c)?;
        self.add_triangle(a, b, d)?;
        self.add_triangle(a, c, d)?;
        self.add_triangle(b, c, d)?;
        self.tetrahedra.push(Tetrahedron {
            vertices: [a, b, c, d],
        });
        Ok(())
    }

    /// Register a new data field; buffers are sized to the current vertices.
    pub fn add_data(
        &mut self,
        name: impl Into<String>,
        id: DataId,
        components: usize,
        has_gradient: bool,
    ) -> DataId {
        let mut data = Data::new(name, id, components, self.dim, has_gradient);
        data.allocate_values(self.vertices.len());
        self.data.push(data);
        id
    }

    pub fn data(&self, id: DataId) -> Option<&Data> {
        self.data.iter().find(|d| d.id() == id)
    }

    pub fn data_mut(&mut self, id: DataId) -> Option<&mut Data> {
        self.data.iter_mut().find(|d| d.id() == id)
    }

    pub fn data_by_name(&self, name: &str) -> Option<&Data> {
        self.data.iter().find(|d| d.name() == name)
    }

    pub fn data_fields(&self) -> &[Data] {
        &self.data
    }

    /// Resize every data buffer to `|vertices| * components`.
    pub fn allocate_data_values(&mut self) {
        let n = self.vertices.len();
        for d in &mut self.data {
            d.allocate_values(n);
        }
    }

    /// Structural invariants: connectivity references valid vertices,
    /// edges are unique, and every data buffer matches the vertex count.
    /// Checked after mutations in debug builds and with the
    /// `check-invariants` feature.
    #[cfg(any(debug_assertions, feature = "check-invariants"))]
    pub(crate) fn debug_assert_invariants(&self) {
        let n = self.vertices.len();
        for e in &self.edges {
            debug_assert!(e.vertices.iter().all(|v| v.index() < n));
        }
        for t in &self.triangles {
            debug_assert!(t.vertices.iter().all(|v| v.index() < n));
        }
        for t in &self.tetrahedra {
            debug_assert!(t.vertices.iter().all(|v| v.index() < n));
        }
        debug_assert_eq!(self.edge_index.len(), self.edges.len());
        for d in &self.data {
            debug_assert_eq!(d.values().len(), n * d.components());
        }
    }

    /// Bounding box of all vertices; empty for an empty mesh.
    pub fn compute_bounding_box(&self) -> BoundingBox {
        let mut bb = BoundingBox::new(self.dim);
        for v in &self.vertices {
            bb.expand_by_point(&v.coords[..self.dim]);
        }
        bb
    }

    /// Drop all vertices, connectivity and buffer contents, keeping the
    /// registered data fields. Vertex ids restart at zero.
    pub fn clear(&mut self) {
        self.vertices.clear();
        self.edges.clear();
        self.edge_index.clear();
        self.triangles.clear();
        self.tetrahedra.clear();
        self.allocate_data_values();
    }

    /// Replace the vertex set with received, filtered copies
    /// (partitioning). Connectivity is rebuilt by the caller when the mesh
    /// requirement asks for it.
    pub(crate) fn set_received_vertices(&mut self, vertices: Vec<Vertex>) {
        self.vertices = vertices;
        self.edges.clear();
        self.edge_index.clear();
        self.triangles.clear();
        self.tetrahedra.clear();
        self.allocate_data_values();
    }
}

#[cfg(test)]
mod layout_tests {
    use super::*;
    use static_assertions::assert_eq_size;

    // Ids ship over the wire as raw integers; repr(transparent) keeps that
    // reinterpretation sound.
    assert_eq_size!(VertexId, u32);
    assert_eq_size!(MeshId, u32);
}
