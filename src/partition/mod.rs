//! Distributed mesh partitioning: a provider scatters its mesh to a
//! receiving participant, which filters it down to the slice each rank
//! needs.
//!
//! The protocol has two phases, driven by the solver interface during
//! `initialize`:
//!
//! 1. `compare_bounding_boxes`: the provider advertises the box of every
//!    one of its ranks; each receiver rank records which provider ranks
//!    overlap its own (inflated) region.
//! 2. `communicate` / `filter` / `remap`: mesh payloads flow, vertices
//!    outside the receiver's region are dropped, dense local ids are
//!    assigned while keeping the translation back to provider-global ids,
//!    and attached mapping kernels get their stencils rebuilt.

pub mod provided;
pub mod received;

pub use provided::ProvidedPartition;
pub use received::{GeometricFilter, ReceivedPartition};

use crate::com::{tags, CommTag};
use crate::mesh::MeshId;

/// Tag for mesh payloads of one mesh, keeping concurrent mesh exchanges
/// on a shared channel separate.
pub(crate) fn mesh_tag(mesh: MeshId) -> CommTag {
    tags::MESH.offset(mesh.get() as u16)
}

/// Tag for the bounding-box phase of one mesh.
pub(crate) fn bbox_tag(mesh: MeshId) -> CommTag {
    tags::BOUNDING_BOX.offset(mesh.get() as u16)
}
