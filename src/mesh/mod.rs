//! Mesh and data store: vertices, connectivity, per-vertex fields,
//! bounding boxes.

pub mod bounding_box;
pub mod data;
mod geometry;
#[allow(clippy::module_inception)]
pub mod mesh;
pub mod store;

pub use bounding_box::BoundingBox;
pub use data::{Data, DataId, GlobalData};
pub use mesh::{Edge, Mesh, MeshId, MeshRequirement, Tetrahedron, Triangle, Vertex, VertexId};
pub use store::DataStore;
