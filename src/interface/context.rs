//! Per-participant bookkeeping: mesh contexts, data contexts, mapping
//! contexts.

use crate::mapping::{Mapping, MappingTiming};
use crate::mesh::{DataId, MeshId, MeshRequirement};
use crate::partition::{ProvidedPartition, ReceivedPartition};
use crate::waveform::Waveform;

/// Who owns a used mesh.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MeshDirection {
    Provide,
    ReceiveFrom(String),
}

/// Per-participant record of one used mesh.
pub struct MeshContext {
    pub mesh: MeshId,
    pub name: String,
    pub direction: MeshDirection,
    pub requirement: MeshRequirement,
    /// Locked after partitioning; unlocked again by `reset_mesh`.
    pub locked: bool,
    pub access_region_set: bool,
    pub provided: Option<ProvidedPartition>,
    pub received: Option<ReceivedPartition>,
    /// Remote participants receiving this provided mesh, in name order.
    pub receivers: Vec<String>,
}

impl MeshContext {
    pub fn is_provided(&self) -> bool {
        matches!(self.direction, MeshDirection::Provide)
    }

    pub fn provider(&self) -> Option<&str> {
        match &self.direction {
            MeshDirection::Provide => None,
            MeshDirection::ReceiveFrom(peer) => Some(peer),
        }
    }
}

/// Read or write access of the solver to one data field.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataDirection {
    Read,
    Write,
}

/// Binding of a data field to the solver's read/write surface.
pub struct DataContext {
    pub data: DataId,
    pub name: String,
    /// `None` for global data.
    pub mesh: Option<MeshId>,
    pub components: usize,
    pub direction: DataDirection,
    /// Read contexts sample through a waveform; write contexts have none.
    pub waveform: Option<Waveform>,
    pub waveform_order: usize,
}

/// One configured mapping, bound to the data pairs it moves.
pub struct MappingContext {
    pub mapping: Box<dyn Mapping>,
    pub from_mesh: MeshId,
    pub to_mesh: MeshId,
    pub timing: MappingTiming,
    pub direction: DataDirection,
    /// `(from data, to data)` pairs; one of each pair is the provided data
    /// of a read/write context, and both carry the same name.
    pub pairs: Vec<(DataId, DataId)>,
    pub has_mapped_data: bool,
}
