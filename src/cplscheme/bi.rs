//! Exchange registries shared by the two-participant schemes.

use std::sync::Arc;

use crate::com::M2N;
use crate::error::CouplingError;
use crate::mesh::DataId;

/// Send/receive tables plus the connection for a scheme coupling exactly
/// two named participants.
#[derive(Debug)]
pub struct BiData {
    m2n: Arc<M2N>,
    first: String,
    second: String,
    send: Vec<DataId>,
    recv: Vec<DataId>,
    send_global: Vec<DataId>,
    recv_global: Vec<DataId>,
}

impl BiData {
    /// Returns the registry plus whether the local participant takes the
    /// first step.
    pub fn new(
        m2n: Arc<M2N>,
        first: impl Into<String>,
        second: impl Into<String>,
        local: &str,
    ) -> Result<(Self, bool), CouplingError> {
        let first = first.into();
        let second = second.into();
        if first == second {
            return Err(CouplingError::Config(
                "first participant and second participant must have different names".into(),
            ));
        }
        let does_first_step = if local == first {
            true
        } else if local == second {
            false
        } else {
            return Err(CouplingError::UnknownParticipant(local.to_string()));
        };
        Ok((
            Self {
                m2n,
                first,
                second,
                send: Vec::new(),
                recv: Vec::new(),
                send_global: Vec::new(),
                recv_global: Vec::new(),
            },
            does_first_step,
        ))
    }

    #[inline]
    pub fn m2n(&self) -> &M2N {
        &self.m2n
    }

    #[inline]
    pub fn first(&self) -> &str {
        &self.first
    }

    #[inline]
    pub fn second(&self) -> &str {
        &self.second
    }

    /// The remote peer's name.
    pub fn partner(&self, does_first_step: bool) -> &str {
        if does_first_step {
            &self.second
        } else {
            &self.first
        }
    }

    fn add(
        list: &mut Vec<DataId>,
        id: DataId,
        name: &str,
        direction: &'static str,
    ) -> Result<(), CouplingError> {
        if list.contains(&id) {
            return Err(CouplingError::DuplicateExchange(name.to_string(), direction));
        }
        // Id order keeps the wire sequence deterministic on both sides.
        let pos = list.partition_point(|&x| x < id);
        list.insert(pos, id);
        Ok(())
    }

    pub fn add_send(&mut self, id: DataId, name: &str) -> Result<(), CouplingError> {
        Self::add(&mut self.send, id, name, "sending")
    }

    pub fn add_recv(&mut self, id: DataId, name: &str) -> Result<(), CouplingError> {
        Self::add(&mut self.recv, id, name, "receiving")
    }

    pub fn add_send_global(&mut self, id: DataId, name: &str) -> Result<(), CouplingError> {
        Self::add(&mut self.send_global, id, name, "sending")
    }

    pub fn add_recv_global(&mut self, id: DataId, name: &str) -> Result<(), CouplingError> {
        Self::add(&mut self.recv_global, id, name, "receiving")
    }

    #[inline]
    pub fn send_ids(&self) -> &[DataId] {
        &self.send
    }

    #[inline]
    pub fn recv_ids(&self) -> &[DataId] {
        &self.recv
    }

    #[inline]
    pub fn send_global_ids(&self) -> &[DataId] {
        &self.send_global
    }

    #[inline]
    pub fn recv_global_ids(&self) -> &[DataId] {
        &self.recv_global
    }

    pub fn has_any_send_data(&self) -> bool {
        !self.send.is_empty() || !self.send_global.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::com::{Channel, LocalComm};

    fn m2n() -> Arc<M2N> {
        let (a, _b) = LocalComm::pair();
        Arc::new(M2N::new(Channel::Local(a)))
    }

    #[test]
    fn local_must_be_first_or_second() {
        let (_, first) = BiData::new(m2n(), "A", "B", "A").unwrap();
        assert!(first);
        let (_, first) = BiData::new(m2n(), "A", "B", "B").unwrap();
        assert!(!first);
        assert!(matches!(
            BiData::new(m2n(), "A", "B", "C").unwrap_err(),
            CouplingError::UnknownParticipant(_)
        ));
    }

    #[test]
    fn duplicate_exchange_is_rejected() {
        let (mut bi, _) = BiData::new(m2n(), "A", "B", "A").unwrap();
        bi.add_send(DataId::new(1), "Forces").unwrap();
        assert!(matches!(
            bi.add_send(DataId::new(1), "Forces").unwrap_err(),
            CouplingError::DuplicateExchange(..)
        ));
    }

    #[test]
    fn send_ids_stay_sorted() {
        let (mut bi, _) = BiData::new(m2n(), "A", "B", "A").unwrap();
        bi.add_send(DataId::new(3), "c").unwrap();
        bi.add_send(DataId::new(1), "a").unwrap();
        bi.add_send(DataId::new(2), "b").unwrap();
        let ids: Vec<u32> = bi.send_ids().iter().map(|d| d.get()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
