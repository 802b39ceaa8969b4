//! M2N: the connection between two coupled participants.
//!
//! One primary channel carries control traffic and small payloads
//! (handshake, time-window sizes, convergence verdicts); bulk vertex and
//! field payloads go over a distributed channel connecting the secondary
//! ranks pairwise. Single-rank participants fold both roles onto the
//! primary channel.
//!
//! Field payloads are addressed per mesh. After partitioning, both sides
//! install a [`VertexDistribution`] translating their local vertex order
//! into the provider-global order; payloads always travel in global order
//! and full provider size, so a filtered receiver and its provider stay
//! wire-compatible.

use std::sync::Mutex;

use hashbrown::HashMap;
use log::debug;

use super::{tags, Channel, CommTag, Communication};
use crate::error::CouplingError;
use crate::mesh::MeshId;

/// Translation between a rank's local vertex order and provider-global
/// vertex ids for one mesh.
#[derive(Clone, Debug)]
pub struct VertexDistribution {
    /// Vertex count of the full provider mesh.
    pub total: usize,
    /// Provider-global id per local vertex index.
    pub local_to_global: Vec<u32>,
}

impl VertexDistribution {
    /// Identity distribution of a provider rank owning `count` vertices.
    pub fn identity(count: usize) -> Self {
        Self {
            total: count,
            local_to_global: (0..count as u32).collect(),
        }
    }
}

#[derive(Default, Debug)]
struct M2nState {
    connected: bool,
    initiator: bool,
    distributions: HashMap<MeshId, VertexDistribution>,
}

/// Connection to one remote participant.
#[derive(Debug)]
pub struct M2N {
    primary: Channel,
    /// Bulk channel of this rank; `None` folds bulk traffic onto `primary`.
    distributed: Option<Channel>,
    state: Mutex<M2nState>,
}

impl M2N {
    /// Wrap a pre-opened primary channel; bulk traffic shares it.
    pub fn new(primary: Channel) -> Self {
        Self {
            primary,
            distributed: None,
            state: Mutex::new(M2nState::default()),
        }
    }

    /// Attach a dedicated bulk channel for this rank.
    pub fn with_distributed(primary: Channel, distributed: Channel) -> Self {
        Self {
            primary,
            distributed: Some(distributed),
            state: Mutex::new(M2nState::default()),
        }
    }

    /// Exchange identifying strings with the peer and verify them.
    pub fn connect(&self, local: &str, remote: &str) -> Result<(), CouplingError> {
        self.primary.send_str(tags::HANDSHAKE, local)?;
        let peer = self.primary.recv_str(tags::HANDSHAKE)?;
        if peer != remote {
            return Err(CouplingError::Protocol(format!(
                "handshake expected participant \"{remote}\", peer identified as \"{peer}\""
            )));
        }
        let mut state = self.state.lock().expect("m2n state poisoned");
        state.initiator = local < remote;
        state.connected = true;
        debug!("m2n connected: {local} <-> {remote}");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().expect("m2n state poisoned").connected
    }

    /// Install the local-to-global vertex translation for one mesh.
    pub fn set_vertex_distribution(&self, mesh: MeshId, dist: VertexDistribution) {
        self.state
            .lock()
            .expect("m2n state poisoned")
            .distributions
            .insert(mesh, dist);
    }

    fn distribution(&self, mesh: MeshId) -> Option<VertexDistribution> {
        self.state
            .lock()
            .expect("m2n state poisoned")
            .distributions
            .get(&mesh)
            .cloned()
    }

    fn bulk(&self) -> &Channel {
        self.distributed.as_ref().unwrap_or(&self.primary)
    }

    fn mesh_tag(mesh: MeshId) -> CommTag {
        tags::DATA.offset(mesh.get() as u16)
    }

    /// Send a field payload for `mesh` with `per_vertex` values per vertex.
    ///
    /// With a vertex distribution installed, the local slice is scattered
    /// into a provider-sized buffer first; positions this rank does not
    /// hold stay zero.
    pub fn send_values(
        &self,
        mesh: MeshId,
        per_vertex: usize,
        values: &[f64],
    ) -> Result<(), CouplingError> {
        match self.distribution(mesh) {
            Some(dist) => {
                debug_assert_eq!(values.len(), dist.local_to_global.len() * per_vertex);
                let mut wire = vec![0.0; dist.total * per_vertex];
                for (local, &global) in dist.local_to_global.iter().enumerate() {
                    let g = global as usize;
                    wire[g * per_vertex..(g + 1) * per_vertex]
                        .copy_from_slice(&values[local * per_vertex..(local + 1) * per_vertex]);
                }
                self.bulk().send_f64s(Self::mesh_tag(mesh), &wire)
            }
            None => self.bulk().send_f64s(Self::mesh_tag(mesh), values),
        }
    }

    /// Receive a field payload for `mesh`, gathered down to this rank's
    /// local vertex order. `local_len` is the expected local buffer length
    /// and must equal `|local vertices| * per_vertex`.
    pub fn recv_values(
        &self,
        mesh: MeshId,
        per_vertex: usize,
        local_len: usize,
    ) -> Result<Vec<f64>, CouplingError> {
        match self.distribution(mesh) {
            Some(dist) => {
                debug_assert_eq!(local_len, dist.local_to_global.len() * per_vertex);
                let wire = self
                    .bulk()
                    .recv_f64s(Self::mesh_tag(mesh), dist.total * per_vertex)?;
                let mut out = vec![0.0; local_len];
                for (local, &global) in dist.local_to_global.iter().enumerate() {
                    let g = global as usize;
                    out[local * per_vertex..(local + 1) * per_vertex]
                        .copy_from_slice(&wire[g * per_vertex..(g + 1) * per_vertex]);
                }
                Ok(out)
            }
            None => self.bulk().recv_f64s(Self::mesh_tag(mesh), local_len),
        }
    }

    /// Send a meshless payload; a distinct message kind, never a sentinel
    /// mesh id.
    pub fn send_global_values(&self, values: &[f64]) -> Result<(), CouplingError> {
        self.primary.send_f64s(tags::GLOBAL_DATA, values)
    }

    pub fn recv_global_values(&self, expected: usize) -> Result<Vec<f64>, CouplingError> {
        self.primary.recv_f64s(tags::GLOBAL_DATA, expected)
    }

    /// Announce a measured time-window size (first-participant method).
    pub fn send_time_window_size(&self, dt: f64) -> Result<(), CouplingError> {
        self.primary.send_f64(tags::TIME_WINDOW, dt)
    }

    pub fn recv_time_window_size(&self) -> Result<f64, CouplingError> {
        self.primary.recv_f64(tags::TIME_WINDOW)
    }

    /// Broadcast the convergence verdict of an implicit iteration.
    pub fn send_convergence(&self, converged: bool) -> Result<(), CouplingError> {
        self.primary.send_bool(tags::CONVERGENCE, converged)
    }

    pub fn recv_convergence(&self) -> Result<bool, CouplingError> {
        self.primary.recv_bool(tags::CONVERGENCE)
    }

    /// Raw access to the primary channel for partition initialization.
    pub fn primary(&self) -> &Channel {
        &self.primary
    }

    /// Raw access to the bulk channel for partition initialization.
    pub fn distributed(&self) -> &Channel {
        self.bulk()
    }

    /// Abortive close without the handshake, for failure paths: pending
    /// receives on the peer fail with a transport error instead of
    /// blocking forever.
    pub fn abort(&self) -> Result<(), CouplingError> {
        let mut state = self.state.lock().expect("m2n state poisoned");
        state.connected = false;
        drop(state);
        if let Some(d) = &self.distributed {
            d.close()?;
        }
        self.primary.close()
    }

    /// Alternating ping/pong close handshake, then drop the channels.
    pub fn close(&self) -> Result<(), CouplingError> {
        let initiator = {
            let mut state = self.state.lock().expect("m2n state poisoned");
            if !state.connected {
                return Ok(());
            }
            state.connected = false;
            state.initiator
        };
        if initiator {
            self.primary.send_bytes(tags::HANDSHAKE, b"ping")?;
            let pong = self.primary.recv_bytes(tags::HANDSHAKE)?;
            if pong != b"pong" {
                return Err(CouplingError::Protocol(
                    "close handshake expected pong".into(),
                ));
            }
        } else {
            let ping = self.primary.recv_bytes(tags::HANDSHAKE)?;
            if ping != b"ping" {
                return Err(CouplingError::Protocol(
                    "close handshake expected ping".into(),
                ));
            }
            self.primary.send_bytes(tags::HANDSHAKE, b"pong")?;
        }
        if let Some(d) = &self.distributed {
            d.close()?;
        }
        self.primary.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::com::LocalComm;

    fn pair() -> (M2N, M2N) {
        let (a, b) = LocalComm::pair();
        (M2N::new(Channel::Local(a)), M2N::new(Channel::Local(b)))
    }

    #[test]
    fn handshake_and_close() {
        let (a, b) = pair();
        let t = std::thread::spawn(move || {
            b.connect("B", "A").unwrap();
            b.close().unwrap();
        });
        a.connect("A", "B").unwrap();
        assert!(a.is_connected());
        a.close().unwrap();
        t.join().unwrap();
    }

    #[test]
    fn handshake_rejects_wrong_peer() {
        let (a, b) = pair();
        let t = std::thread::spawn(move || {
            let _ = b.connect("Imposter", "A");
        });
        let err = a.connect("A", "B").unwrap_err();
        assert!(matches!(err, CouplingError::Protocol(_)));
        t.join().unwrap();
    }

    #[test]
    fn per_mesh_payloads_do_not_mix() {
        let (a, b) = pair();
        a.send_values(MeshId::new(0), 1, &[1.0]).unwrap();
        a.send_values(MeshId::new(1), 1, &[2.0]).unwrap();
        assert_eq!(b.recv_values(MeshId::new(1), 1, 1).unwrap(), vec![2.0]);
        assert_eq!(b.recv_values(MeshId::new(0), 1, 1).unwrap(), vec![1.0]);
    }

    #[test]
    fn global_data_is_a_distinct_kind() {
        let (a, b) = pair();
        a.send_global_values(&[3.5, 4.5]).unwrap();
        a.send_values(MeshId::new(0), 1, &[1.0]).unwrap();
        assert_eq!(b.recv_global_values(2).unwrap(), vec![3.5, 4.5]);
        assert_eq!(b.recv_values(MeshId::new(0), 1, 1).unwrap(), vec![1.0]);
    }

    #[test]
    fn distribution_scatters_and_gathers() {
        let (a, b) = pair();
        let mesh = MeshId::new(2);
        // Provider a: 4 vertices, identity.
        a.set_vertex_distribution(mesh, VertexDistribution::identity(4));
        // Receiver b kept vertices 1 and 3 of the provider.
        b.set_vertex_distribution(
            mesh,
            VertexDistribution {
                total: 4,
                local_to_global: vec![1, 3],
            },
        );
        a.send_values(mesh, 1, &[10.0, 11.0, 12.0, 13.0]).unwrap();
        assert_eq!(b.recv_values(mesh, 1, 2).unwrap(), vec![11.0, 13.0]);

        // Back direction: b writes its slice, a sees a full-size buffer
        // with untouched positions zeroed.
        b.send_values(mesh, 1, &[21.0, 23.0]).unwrap();
        assert_eq!(
            a.recv_values(mesh, 1, 4).unwrap(),
            vec![0.0, 21.0, 0.0, 23.0]
        );
    }

    #[test]
    fn vector_components_travel_together() {
        let (a, b) = pair();
        let mesh = MeshId::new(3);
        a.set_vertex_distribution(mesh, VertexDistribution::identity(2));
        b.set_vertex_distribution(
            mesh,
            VertexDistribution {
                total: 2,
                local_to_global: vec![1],
            },
        );
        a.send_values(mesh, 2, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(b.recv_values(mesh, 2, 2).unwrap(), vec![3.0, 4.0]);
    }
}
