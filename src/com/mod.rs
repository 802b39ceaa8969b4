//! Communication abstractions between participants.
//!
//! Wire format conventions (shared by all backends):
//! - scalars are little-endian fixed width (`u64` counts/ids, `f64` values,
//!   `u8` bools and message kinds),
//! - numeric buffers are raw `f64` slices reinterpreted via `bytemuck`,
//! - every message carries a `u16` tag identifying the protocol phase;
//!   messages are reliable and FIFO *per (channel, tag)*.
//!
//! Backends form a closed sum type [`Channel`]: the in-process mailbox
//! transport used by tests and single-machine runs, and an MPI transport
//! behind the `mpi-support` feature.

pub mod intra;
pub mod local;
pub mod m2n;
#[cfg(feature = "mpi-support")]
pub mod mpi;

use bytemuck::cast_slice;

use crate::error::CouplingError;

pub use intra::IntraComm;
pub use local::LocalComm;
pub use m2n::{M2N, VertexDistribution};

/// Tag newtype for safer tag arithmetic.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct CommTag(pub u16);

impl CommTag {
    #[inline]
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Offset the tag by `dx`, wrapping on overflow.
    #[inline]
    pub const fn offset(self, dx: u16) -> Self {
        Self(self.0.wrapping_add(dx))
    }
}

/// Protocol phase tags. Each phase of the coupling protocol owns a tag so
/// interleaved exchanges on one channel cannot be confused.
pub mod tags {
    use super::CommTag;

    /// Primary handshake (identifying string, ping/pong close).
    pub const HANDSHAKE: CommTag = CommTag::new(0x0100);
    /// Bounding-box exchange during partition initialization.
    pub const BOUNDING_BOX: CommTag = CommTag::new(0x0200);
    /// Mesh payloads (vertex counts, coordinates, connectivity).
    pub const MESH: CommTag = CommTag::new(0x0300);
    /// Bulk field data payloads.
    pub const DATA: CommTag = CommTag::new(0x0400);
    /// Meshless (global) data payloads; a distinct kind, not mesh id -1.
    pub const GLOBAL_DATA: CommTag = CommTag::new(0x0500);
    /// Time-window size announcements (first-participant method).
    pub const TIME_WINDOW: CommTag = CommTag::new(0x0600);
    /// Convergence verdicts of implicit schemes.
    pub const CONVERGENCE: CommTag = CommTag::new(0x0700);
    /// Intra-participant control traffic.
    pub const INTRA: CommTag = CommTag::new(0x0800);
}

/// Blocking, reliable, tag-multiplexed byte channel between two endpoints.
///
/// Everything above this trait speaks typed helpers
/// ([`send_f64s`](Communication::send_f64s) and friends); implementors only
/// provide raw byte transfer.
pub trait Communication: Send {
    /// Send one message. Blocks until the payload is handed to the transport.
    fn send_bytes(&self, tag: CommTag, payload: &[u8]) -> Result<(), CouplingError>;

    /// Receive the next message with the given tag, blocking until one
    /// arrives. Messages with the same tag arrive in send order.
    fn recv_bytes(&self, tag: CommTag) -> Result<Vec<u8>, CouplingError>;

    /// Close the channel; further traffic is a transport error. Closing an
    /// already-closed channel is a no-op.
    fn close(&self) -> Result<(), CouplingError> {
        Ok(())
    }

    // --- typed helpers ---

    fn send_f64(&self, tag: CommTag, value: f64) -> Result<(), CouplingError> {
        self.send_bytes(tag, &value.to_le_bytes())
    }

    fn recv_f64(&self, tag: CommTag) -> Result<f64, CouplingError> {
        let bytes = self.recv_bytes(tag)?;
        let arr: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| protocol_len("f64", 8, bytes.len()))?;
        Ok(f64::from_le_bytes(arr))
    }

    fn send_u64(&self, tag: CommTag, value: u64) -> Result<(), CouplingError> {
        self.send_bytes(tag, &value.to_le_bytes())
    }

    fn recv_u64(&self, tag: CommTag) -> Result<u64, CouplingError> {
        let bytes = self.recv_bytes(tag)?;
        let arr: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| protocol_len("u64", 8, bytes.len()))?;
        Ok(u64::from_le_bytes(arr))
    }

    fn send_bool(&self, tag: CommTag, value: bool) -> Result<(), CouplingError> {
        self.send_bytes(tag, &[value as u8])
    }

    fn recv_bool(&self, tag: CommTag) -> Result<bool, CouplingError> {
        let bytes = self.recv_bytes(tag)?;
        match bytes.as_slice() {
            [0] => Ok(false),
            [1] => Ok(true),
            _ => Err(CouplingError::Protocol(format!(
                "expected bool payload, got {} byte(s)",
                bytes.len()
            ))),
        }
    }

    fn send_str(&self, tag: CommTag, value: &str) -> Result<(), CouplingError> {
        self.send_bytes(tag, value.as_bytes())
    }

    fn recv_str(&self, tag: CommTag) -> Result<String, CouplingError> {
        let bytes = self.recv_bytes(tag)?;
        String::from_utf8(bytes)
            .map_err(|_| CouplingError::Protocol("string payload is not valid UTF-8".into()))
    }

    /// Send a contiguous `f64` buffer as raw little-endian bytes.
    fn send_f64s(&self, tag: CommTag, values: &[f64]) -> Result<(), CouplingError> {
        self.send_bytes(tag, cast_slice(values))
    }

    /// Receive a `f64` buffer of exactly `expected` entries.
    fn recv_f64s(&self, tag: CommTag, expected: usize) -> Result<Vec<f64>, CouplingError> {
        let bytes = self.recv_bytes(tag)?;
        if bytes.len() != expected * 8 {
            return Err(protocol_len("f64 buffer", expected * 8, bytes.len()));
        }
        let mut out = vec![0.0f64; expected];
        for (i, chunk) in bytes.chunks_exact(8).enumerate() {
            out[i] = f64::from_le_bytes(chunk.try_into().expect("chunk of 8"));
        }
        Ok(out)
    }

    fn send_u64s(&self, tag: CommTag, values: &[u64]) -> Result<(), CouplingError> {
        self.send_bytes(tag, cast_slice(values))
    }

    fn recv_u64s(&self, tag: CommTag, expected: usize) -> Result<Vec<u64>, CouplingError> {
        let bytes = self.recv_bytes(tag)?;
        if bytes.len() != expected * 8 {
            return Err(protocol_len("u64 buffer", expected * 8, bytes.len()));
        }
        let mut out = vec![0u64; expected];
        for (i, chunk) in bytes.chunks_exact(8).enumerate() {
            out[i] = u64::from_le_bytes(chunk.try_into().expect("chunk of 8"));
        }
        Ok(out)
    }
}

fn protocol_len(what: &str, expected: usize, got: usize) -> CouplingError {
    CouplingError::Protocol(format!(
        "expected {what} payload of {expected} bytes, got {got}"
    ))
}

/// Closed sum of the available channel backends.
pub enum Channel {
    /// In-process mailbox channel.
    Local(LocalComm),
    /// MPI point-to-point channel to a fixed peer rank.
    #[cfg(feature = "mpi-support")]
    Mpi(mpi::MpiComm),
}

impl Communication for Channel {
    fn send_bytes(&self, tag: CommTag, payload: &[u8]) -> Result<(), CouplingError> {
        match self {
            Channel::Local(c) => c.send_bytes(tag, payload),
            #[cfg(feature = "mpi-support")]
            Channel::Mpi(c) => c.send_bytes(tag, payload),
        }
    }

    fn recv_bytes(&self, tag: CommTag) -> Result<Vec<u8>, CouplingError> {
        match self {
            Channel::Local(c) => c.recv_bytes(tag),
            #[cfg(feature = "mpi-support")]
            Channel::Mpi(c) => c.recv_bytes(tag),
        }
    }

    fn close(&self) -> Result<(), CouplingError> {
        match self {
            Channel::Local(c) => c.close(),
            #[cfg(feature = "mpi-support")]
            Channel::Mpi(c) => c.close(),
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Local(_) => f.write_str("Channel::Local"),
            #[cfg(feature = "mpi-support")]
            Channel::Mpi(_) => f.write_str("Channel::Mpi"),
        }
    }
}
