//! Arena for meshes and global data.
//!
//! Back-references (mesh <-> data, context <-> scheme) are avoided by
//! handing out stable integer ids and resolving them here. The solver
//! interface owns the store; the coupling scheme borrows it per phase.

use super::data::{DataId, GlobalData};
use super::mesh::{Mesh, MeshId};

/// Owns every mesh (each mesh owns its data fields) and all global data.
#[derive(Debug, Default)]
pub struct DataStore {
    meshes: Vec<Mesh>,
    globals: Vec<GlobalData>,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mesh; its id must equal its slot index.
    pub fn insert_mesh(&mut self, mesh: Mesh) -> MeshId {
        debug_assert_eq!(mesh.id().get() as usize, self.meshes.len());
        let id = mesh.id();
        self.meshes.push(mesh);
        id
    }

    pub fn insert_global(&mut self, data: GlobalData) -> DataId {
        let id = data.id();
        self.globals.push(data);
        id
    }

    #[inline]
    pub fn mesh(&self, id: MeshId) -> &Mesh {
        &self.meshes[id.get() as usize]
    }

    #[inline]
    pub fn mesh_mut(&mut self, id: MeshId) -> &mut Mesh {
        &mut self.meshes[id.get() as usize]
    }

    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    pub fn mesh_by_name(&self, name: &str) -> Option<&Mesh> {
        self.meshes.iter().find(|m| m.name() == name)
    }

    /// Values of a mesh-bound data field.
    pub fn values(&self, mesh: MeshId, data: DataId) -> &[f64] {
        self.mesh(mesh)
            .data(data)
            .expect("data id resolved through configuration")
            .values()
    }

    pub fn values_mut(&mut self, mesh: MeshId, data: DataId) -> &mut [f64] {
        self.mesh_mut(mesh)
            .data_mut(data)
            .expect("data id resolved through configuration")
            .values_mut()
    }

    pub fn global(&self, id: DataId) -> Option<&GlobalData> {
        self.globals.iter().find(|g| g.id() == id)
    }

    pub fn global_mut(&mut self, id: DataId) -> Option<&mut GlobalData> {
        self.globals.iter_mut().find(|g| g.id() == id)
    }

    pub fn global_by_name(&self, name: &str) -> Option<&GlobalData> {
        self.globals.iter().find(|g| g.name() == name)
    }

    pub fn globals(&self) -> &[GlobalData] {
        &self.globals
    }
}
