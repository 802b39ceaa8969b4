//! Intra-participant communicator: rank 0 (primary) coordinates the
//! secondary ranks of one participant.
//!
//! All ranks execute the same interface calls in lockstep; the primary is
//! the only rank talking to peers over the primary m2n channel, so small
//! decisions (time-step agreement, convergence verdicts, reductions) are
//! funneled through here.

use super::{tags, Channel, Communication};
use crate::error::CouplingError;
use crate::math;

/// Role of this rank inside its participant.
pub enum IntraComm {
    /// Single-rank participant; every collective is the identity.
    Serial,
    /// Rank 0 with one channel per secondary rank (index i = rank i + 1).
    Primary { to_secondaries: Vec<Channel> },
    /// A secondary rank with its channel back to the primary.
    Secondary { rank: usize, to_primary: Channel },
}

impl IntraComm {
    #[inline]
    pub fn is_primary(&self) -> bool {
        !matches!(self, IntraComm::Secondary { .. })
    }

    pub fn rank(&self) -> usize {
        match self {
            IntraComm::Serial | IntraComm::Primary { .. } => 0,
            IntraComm::Secondary { rank, .. } => *rank,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            IntraComm::Serial => 1,
            IntraComm::Primary { to_secondaries } => to_secondaries.len() + 1,
            // Secondaries do not know the total size; callers that need it
            // hold it in the interface state.
            IntraComm::Secondary { .. } => usize::MAX,
        }
    }

    /// Agree on the time step passed to `advance` across all ranks.
    ///
    /// Secondaries send their `dt` to the primary; the primary compares all
    /// values within `eps` and broadcasts the verdict. Disagreement is a
    /// `TimestepMismatch` on every rank.
    pub fn sync_timestep(
        &self,
        dt: f64,
        eps: f64,
        participant: &str,
    ) -> Result<(), CouplingError> {
        match self {
            IntraComm::Serial => Ok(()),
            IntraComm::Primary { to_secondaries } => {
                let mut ok = true;
                for ch in to_secondaries {
                    let other = ch.recv_f64(tags::INTRA)?;
                    if !math::equals(dt, other, eps) {
                        ok = false;
                    }
                }
                for ch in to_secondaries {
                    ch.send_bool(tags::INTRA, ok)?;
                }
                if ok {
                    Ok(())
                } else {
                    Err(CouplingError::TimestepMismatch {
                        participant: participant.to_string(),
                    })
                }
            }
            IntraComm::Secondary { to_primary, .. } => {
                to_primary.send_f64(tags::INTRA, dt)?;
                if to_primary.recv_bool(tags::INTRA)? {
                    Ok(())
                } else {
                    Err(CouplingError::TimestepMismatch {
                        participant: participant.to_string(),
                    })
                }
            }
        }
    }

    /// Sum a scalar over all ranks; every rank receives the global sum.
    pub fn allreduce_sum(&self, local: f64) -> Result<f64, CouplingError> {
        match self {
            IntraComm::Serial => Ok(local),
            IntraComm::Primary { to_secondaries } => {
                let mut total = local;
                for ch in to_secondaries {
                    total += ch.recv_f64(tags::INTRA)?;
                }
                for ch in to_secondaries {
                    ch.send_f64(tags::INTRA, total)?;
                }
                Ok(total)
            }
            IntraComm::Secondary { to_primary, .. } => {
                to_primary.send_f64(tags::INTRA, local)?;
                to_primary.recv_f64(tags::INTRA)
            }
        }
    }

    /// Broadcast a scalar from the primary; secondaries pass their input
    /// through untouched on the primary.
    pub fn broadcast_f64(&self, value: f64) -> Result<f64, CouplingError> {
        match self {
            IntraComm::Serial => Ok(value),
            IntraComm::Primary { to_secondaries } => {
                for ch in to_secondaries {
                    ch.send_f64(tags::INTRA, value)?;
                }
                Ok(value)
            }
            IntraComm::Secondary { to_primary, .. } => to_primary.recv_f64(tags::INTRA),
        }
    }

    /// Broadcast a buffer from the primary; secondaries pass a buffer of
    /// the expected length (contents ignored).
    pub fn broadcast_f64s(&self, local: &[f64]) -> Result<Vec<f64>, CouplingError> {
        match self {
            IntraComm::Serial => Ok(local.to_vec()),
            IntraComm::Primary { to_secondaries } => {
                for ch in to_secondaries {
                    ch.send_f64s(tags::INTRA, local)?;
                }
                Ok(local.to_vec())
            }
            IntraComm::Secondary { to_primary, .. } => {
                to_primary.recv_f64s(tags::INTRA, local.len())
            }
        }
    }

    /// Broadcast a bool from the primary.
    pub fn broadcast_bool(&self, value: bool) -> Result<bool, CouplingError> {
        match self {
            IntraComm::Serial => Ok(value),
            IntraComm::Primary { to_secondaries } => {
                for ch in to_secondaries {
                    ch.send_bool(tags::INTRA, value)?;
                }
                Ok(value)
            }
            IntraComm::Secondary { to_primary, .. } => to_primary.recv_bool(tags::INTRA),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::com::LocalComm;
    use crate::math::NUMERICAL_ZERO;

    fn two_ranks() -> (IntraComm, IntraComm) {
        let (p, s) = LocalComm::pair();
        (
            IntraComm::Primary {
                to_secondaries: vec![Channel::Local(p)],
            },
            IntraComm::Secondary {
                rank: 1,
                to_primary: Channel::Local(s),
            },
        )
    }

    #[test]
    fn serial_collectives_are_identity() {
        let c = IntraComm::Serial;
        assert!(c.sync_timestep(0.1, NUMERICAL_ZERO, "A").is_ok());
        assert_eq!(c.allreduce_sum(2.0).unwrap(), 2.0);
    }

    #[test]
    fn matching_timesteps_pass() {
        let (p, s) = two_ranks();
        let t = std::thread::spawn(move || s.sync_timestep(0.1, NUMERICAL_ZERO, "A"));
        assert!(p.sync_timestep(0.1, NUMERICAL_ZERO, "A").is_ok());
        assert!(t.join().unwrap().is_ok());
    }

    #[test]
    fn mismatched_timesteps_fail_everywhere() {
        let (p, s) = two_ranks();
        let t = std::thread::spawn(move || s.sync_timestep(0.2, NUMERICAL_ZERO, "A"));
        assert!(matches!(
            p.sync_timestep(0.1, NUMERICAL_ZERO, "A").unwrap_err(),
            CouplingError::TimestepMismatch { .. }
        ));
        assert!(t.join().unwrap().is_err());
    }

    #[test]
    fn allreduce_sums_over_ranks() {
        let (p, s) = two_ranks();
        let t = std::thread::spawn(move || s.allreduce_sum(3.0).unwrap());
        assert_eq!(p.allreduce_sum(1.0).unwrap(), 4.0);
        assert_eq!(t.join().unwrap(), 4.0);
    }
}
