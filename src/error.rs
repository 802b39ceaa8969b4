//! CouplingError: unified error type for mesh-couple public APIs.
//!
//! Every fallible public operation returns `Result<_, CouplingError>`.
//! Variants fall into four families (see [`ErrorKind`]): solver misuse,
//! static configuration problems, peer protocol violations, and transport
//! failures. Broken *internal* invariants are not representable here; those
//! abort via debug assertions instead of surfacing to the caller.

use std::fmt::Debug;
use thiserror::Error;

/// Coarse error family, for callers that dispatch on severity rather than
/// on the concrete variant.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Misuse by solver code: wrong state, bad ids, bad arguments.
    User,
    /// Static problem in the XML configuration; detected before `Initialized`.
    Configuration,
    /// The peer sent a message violating the expected ordering or layout.
    Protocol,
    /// Lower-level I/O failure surfaced by a channel.
    Transport,
}

/// Unified error type for mesh-couple operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CouplingError {
    /// Operation is not permitted in the interface's current lifecycle state.
    #[error("operation `{operation}` is not allowed in state {state}: {detail}")]
    WrongState {
        operation: &'static str,
        state: &'static str,
        detail: String,
    },
    /// The interface entered its terminal failure state; only `finalize` is allowed.
    #[error("the coupling interface is in a failed state; only finalize() may be called")]
    Poisoned,
    /// `finalize()` was called twice.
    #[error("finalize() may only be called once")]
    FinalizedTwice,
    /// A vertex id does not belong to the addressed mesh.
    #[error("vertex id {id} is out of range for mesh \"{mesh}\" ({size} vertices)")]
    InvalidVertexId { mesh: String, id: usize, size: usize },
    /// Mesh is locked after partitioning; call `reset_mesh` first.
    #[error("mesh \"{0}\" is locked after initialization; call reset_mesh() before modifying it")]
    MeshLocked(String),
    /// Scalar API used on vector data or vice versa.
    #[error("data \"{data}\" has {actual} component(s), but the caller assumed {assumed}")]
    DimensionMismatch {
        data: String,
        actual: usize,
        assumed: usize,
    },
    /// `advance` was called with `dt <= 0`.
    #[error("advance() requires a positive time step, got {0}")]
    NonPositiveTimeStep(f64),
    /// Accumulated solver time exceeds the current time window.
    #[error(
        "time step {dt} exceeds the maximum allowed step {max} remaining in this time window"
    )]
    TimeWindowExceeded { dt: f64, max: f64 },
    /// Ranks of one participant disagreed on the time step passed to `advance`.
    #[error("ranks of participant \"{participant}\" passed different time steps to advance()")]
    TimestepMismatch { participant: String },
    /// Required coupling actions were not fulfilled before the next phase.
    #[error("the required actions [{0}] are not fulfilled; did you forget to call requires_reading_checkpoint() or requires_writing_checkpoint()?")]
    UnfulfilledActions(String),
    /// A sampling time outside `[0, remainder]` was requested.
    #[error("relative read time {requested} is outside [0, {remainder}]")]
    ReadTimeOutOfRange { requested: f64, remainder: f64 },
    /// The participant that sets the time window size may only read at the window end.
    #[error("this participant sets the time window size and may only read at the end of the window (relative read time = remaining window)")]
    FirstParticipantReadTime,
    /// `set_mesh_access_region` called twice for the same mesh.
    #[error("the access region of mesh \"{0}\" was already set")]
    AccessRegionAlreadySet(String),
    /// An access region must have `min <= max` per dimension.
    #[error("bounding box is ill-defined in dimension {dim}: min {min} > max {max}")]
    DegenerateBoundingBox { dim: usize, min: f64, max: f64 },
    /// The declared access region does not cover the provided mesh.
    #[error("the access region set for mesh \"{0}\" is smaller than the mesh's bounding box; vertices would be silently lost")]
    AccessRegionTooSmall(String),
    /// A strict convergence measure failed at the iteration limit.
    #[error("the strict convergence measure for data \"{0}\" did not converge within the maximum allowed iterations")]
    StrictMeasureDiverged(String),
    /// A quad was rejected by the convexity or duplicate-vertex check.
    #[error("invalid quad on mesh \"{mesh}\": {detail}")]
    InvalidQuad { mesh: String, detail: String },
    /// Named participant not present in the configuration.
    #[error("participant \"{0}\" does not match any participant in the configuration")]
    UnknownParticipant(String),
    /// Named mesh not present in the configuration.
    #[error("mesh \"{0}\" is unknown")]
    UnknownMesh(String),
    /// Named data not present on the given mesh.
    #[error("data \"{data}\" is unknown on mesh \"{mesh}\"")]
    UnknownData { mesh: String, data: String },
    /// Named global data not present in the configuration.
    #[error("global data \"{0}\" is unknown")]
    UnknownGlobalData(String),
    /// Data added twice to the same exchange direction.
    #[error("data \"{0}\" cannot be added twice for {1}; remove the duplicate <exchange> tag")]
    DuplicateExchange(String, &'static str),
    /// Extrapolation orders above 1 are rejected at configuration.
    #[error("extrapolation order has to be 0 or 1, got {0}")]
    InvalidExtrapolationOrder(usize),
    /// Implicit schemes need at least one convergence measure.
    #[error("at least one convergence measure has to be defined for an implicit coupling scheme")]
    MissingConvergenceMeasure,
    /// Any other statically detectable configuration problem.
    #[error("configuration error: {0}")]
    Config(String),
    /// XML syntax or schema problem.
    #[error("configuration XML error: {0}")]
    Xml(String),
    /// The peer violated the message ordering or payload layout.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Channel-level I/O failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl CouplingError {
    /// The coarse family this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        use CouplingError::*;
        match self {
            UnknownParticipant(_)
            | UnknownMesh(_)
            | UnknownData { .. }
            | UnknownGlobalData(_)
            | DuplicateExchange(..)
            | InvalidExtrapolationOrder(_)
            | MissingConvergenceMeasure
            | Config(_)
            | Xml(_) => ErrorKind::Configuration,
            Protocol(_) => ErrorKind::Protocol,
            Transport(_) => ErrorKind::Transport,
            _ => ErrorKind::User,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_partition_the_variants() {
        assert_eq!(
            CouplingError::NonPositiveTimeStep(0.0).kind(),
            ErrorKind::User
        );
        assert_eq!(
            CouplingError::UnknownMesh("M".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            CouplingError::Protocol("x".into()).kind(),
            ErrorKind::Protocol
        );
        assert_eq!(
            CouplingError::Transport("x".into()).kind(),
            ErrorKind::Transport
        );
    }

    #[test]
    fn messages_name_the_offender() {
        let e = CouplingError::InvalidVertexId {
            mesh: "Fluid-Mesh".into(),
            id: 17,
            size: 4,
        };
        let msg = e.to_string();
        assert!(msg.contains("Fluid-Mesh"));
        assert!(msg.contains("17"));
    }
}
