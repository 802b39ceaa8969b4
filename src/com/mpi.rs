//! MPI backend for the [`Communication`](super::Communication) trait.
//!
//! One `MpiComm` is a blocking point-to-point channel to a fixed peer rank
//! in `MPI_COMM_WORLD`. The MPI universe is initialized once per process and
//! shared by all channels.

use once_cell::sync::Lazy;

use mpi::environment::Universe;
use mpi::point_to_point::{Destination, Source};
use mpi::topology::{Communicator as _, SimpleCommunicator};

use super::{CommTag, Communication};
use crate::error::CouplingError;

struct UniverseCell(Universe);

// The universe is only used through MPI calls that are themselves
// rank-local; sharing the handle across threads is safe under
// MPI_THREAD_SERIALIZED and above.
unsafe impl Send for UniverseCell {}
unsafe impl Sync for UniverseCell {}

static UNIVERSE: Lazy<UniverseCell> =
    Lazy::new(|| UniverseCell(mpi::initialize().expect("MPI initialization failed")));

/// Blocking MPI channel to a fixed peer rank.
pub struct MpiComm {
    world: SimpleCommunicator,
    peer: i32,
}

unsafe impl Send for MpiComm {}
unsafe impl Sync for MpiComm {}

impl MpiComm {
    /// Channel to `peer` in the world communicator.
    pub fn to_rank(peer: usize) -> Self {
        let world = UNIVERSE.0.world();
        Self {
            world,
            peer: peer as i32,
        }
    }

    /// This process's world rank.
    pub fn world_rank() -> usize {
        UNIVERSE.0.world().rank() as usize
    }

    /// Number of ranks in the world communicator.
    pub fn world_size() -> usize {
        UNIVERSE.0.world().size() as usize
    }
}

impl Communication for MpiComm {
    fn send_bytes(&self, tag: CommTag, payload: &[u8]) -> Result<(), CouplingError> {
        self.world
            .process_at_rank(self.peer)
            .send_with_tag(payload, tag.as_u16() as i32);
        Ok(())
    }

    fn recv_bytes(&self, tag: CommTag) -> Result<Vec<u8>, CouplingError> {
        let (data, _status) = self
            .world
            .process_at_rank(self.peer)
            .receive_vec_with_tag::<u8>(tag.as_u16() as i32);
        Ok(data)
    }
}
