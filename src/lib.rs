//! # mesh-couple
//!
//! mesh-couple is a partitioned multi-physics coupling core for Rust
//! simulation codes. Independent solver programs (participants) link the
//! library to exchange field data across shared geometric interfaces
//! during a joint time-stepped simulation. The library mediates the data
//! exchange, enforces per-time-window coupling logic (explicit vs.
//! implicit, serial vs. parallel), accelerates fixed-point iterations, and
//! moves numeric fields over pluggable transports.
//!
//! ## Subsystems
//! - [`interface::SolverInterface`]: the per-participant facade driving
//!   the lifecycle `Constructed -> Initialized -> Finalized`
//! - [`cplscheme`]: the coupling scheme engine (time windows, exchange
//!   ordering, convergence measurement, acceleration)
//! - [`partition`]: the distributed mesh-exchange protocol with
//!   bounding-box comparison and geometric filtering
//! - [`mesh`]: vertices, connectivity, per-vertex fields, bounding boxes
//! - [`com`]: communication backends (in-process mailbox, MPI behind the
//!   `mpi-support` feature)
//! - [`waveform`], [`mapping`], [`acceleration`]: time interpolation,
//!   inter-mesh interpolation, and fixed-point accelerators
//!
//! ## Usage
//! ```toml
//! [dependencies]
//! mesh-couple = "0.3"
//! # Optional features: "mpi-support", "check-invariants"
//! ```
//!
//! Participants are configured from a shared XML document; see
//! [`config::Config`] for the schema. A typical solver loop:
//!
//! ```no_run
//! # fn run() -> Result<(), mesh_couple::error::CouplingError> {
//! use mesh_couple::interface::SolverInterface;
//!
//! let mut couple = SolverInterface::new("Fluid", "coupling.xml", 0, 1)?;
//! let forces = couple.set_mesh_vertices("Fluid-Mesh", &[0.0, 0.0, 1.0, 0.0])?;
//! let mut dt = couple.initialize()?;
//! while couple.is_coupling_ongoing() {
//!     couple.write_block_scalar_data("Fluid-Mesh", "Forces", &forces, &[1.0, 2.0])?;
//!     dt = couple.advance(dt)?;
//! }
//! couple.finalize()?;
//! # Ok(())
//! # }
//! ```

pub mod acceleration;
pub mod com;
pub mod config;
pub mod cplscheme;
pub mod error;
pub mod interface;
pub mod io;
pub mod mapping;
pub mod math;
pub mod mesh;
pub mod partition;
pub mod waveform;

/// A convenient prelude to import the most-used types.
pub mod prelude {
    pub use crate::acceleration::{
        Acceleration, AitkenAcceleration, ConstantRelaxation, IqnIlsAcceleration,
    };
    pub use crate::com::{Channel, CommTag, Communication, IntraComm, LocalComm, M2N};
    pub use crate::config::Config;
    pub use crate::cplscheme::{Action, CouplingMode, CouplingScheme, TimesteppingMethod};
    pub use crate::error::{CouplingError, ErrorKind};
    pub use crate::interface::SolverInterface;
    pub use crate::mapping::{Mapping, MappingConstraint, NearestNeighborMapping};
    pub use crate::mesh::{BoundingBox, DataId, Mesh, MeshId, MeshRequirement, VertexId};
    pub use crate::waveform::Waveform;
}
