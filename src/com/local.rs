//! In-process channel over a shared mailbox, for tests and co-located
//! participants running as threads.
//!
//! Each direction of a channel is a queue of `(tag, payload)` messages
//! guarded by a mutex/condvar pair. Receivers scan for the first message
//! with a matching tag, so different protocol phases can interleave on one
//! channel while staying FIFO per tag.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use super::{CommTag, Communication};
use crate::error::CouplingError;

#[derive(Default)]
struct Slot {
    queue: Vec<(u16, Vec<u8>)>,
    closed: bool,
}

type Cell = Arc<(Mutex<Slot>, Condvar)>;

/// One endpoint of a bidirectional in-process channel.
pub struct LocalComm {
    tx: Cell,
    rx: Cell,
}

impl LocalComm {
    /// Create a connected pair of endpoints.
    pub fn pair() -> (LocalComm, LocalComm) {
        let a: Cell = Arc::new((Mutex::new(Slot::default()), Condvar::new()));
        let b: Cell = Arc::new((Mutex::new(Slot::default()), Condvar::new()));
        (
            LocalComm {
                tx: a.clone(),
                rx: b.clone(),
            },
            LocalComm { tx: b, rx: a },
        )
    }

    /// Connect to a named peer through the process-global switchboard.
    ///
    /// Both sides call this with mirrored names; the first call creates the
    /// mailboxes, the second picks up the other end. Names must be unique
    /// per logical connection within the process (tests use distinct
    /// participant names per case).
    pub fn connect(local: &str, remote: &str) -> LocalComm {
        static SWITCHBOARD: Lazy<Mutex<HashMap<(String, String), Cell>>> =
            Lazy::new(|| Mutex::new(HashMap::new()));

        let mut board = SWITCHBOARD.lock().expect("switchboard poisoned");
        let mut end = |from: &str, to: &str| -> Cell {
            board
                .entry((from.to_string(), to.to_string()))
                .or_insert_with(|| Arc::new((Mutex::new(Slot::default()), Condvar::new())))
                .clone()
        };
        let tx = end(local, remote);
        let rx = end(remote, local);
        LocalComm { tx, rx }
    }
}

impl Communication for LocalComm {
    fn send_bytes(&self, tag: CommTag, payload: &[u8]) -> Result<(), CouplingError> {
        let (lock, cv) = &*self.tx;
        let mut slot = lock.lock().expect("mailbox poisoned");
        if slot.closed {
            return Err(CouplingError::Transport(
                "send on a closed channel".into(),
            ));
        }
        slot.queue.push((tag.as_u16(), payload.to_vec()));
        cv.notify_all();
        Ok(())
    }

    fn recv_bytes(&self, tag: CommTag) -> Result<Vec<u8>, CouplingError> {
        let (lock, cv) = &*self.rx;
        let mut slot = lock.lock().expect("mailbox poisoned");
        loop {
            if let Some(pos) = slot.queue.iter().position(|(t, _)| *t == tag.as_u16()) {
                return Ok(slot.queue.remove(pos).1);
            }
            if slot.closed {
                return Err(CouplingError::Transport(
                    "peer closed the channel while a receive was pending".into(),
                ));
            }
            slot = cv.wait(slot).expect("condvar poisoned");
        }
    }

    fn close(&self) -> Result<(), CouplingError> {
        for cell in [&self.tx, &self.rx] {
            let (lock, cv) = &**cell;
            let mut slot = lock.lock().expect("mailbox poisoned");
            slot.closed = true;
            cv.notify_all();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::com::tags;

    #[test]
    fn round_trip() {
        let (a, b) = LocalComm::pair();
        a.send_bytes(tags::DATA, b"hello").unwrap();
        assert_eq!(b.recv_bytes(tags::DATA).unwrap(), b"hello");
    }

    #[test]
    fn fifo_per_tag() {
        let (a, b) = LocalComm::pair();
        for i in 0..10u8 {
            a.send_bytes(tags::DATA, &[i]).unwrap();
        }
        for i in 0..10u8 {
            assert_eq!(b.recv_bytes(tags::DATA).unwrap(), vec![i]);
        }
    }

    #[test]
    fn tags_do_not_cross() {
        let (a, b) = LocalComm::pair();
        a.send_bytes(tags::DATA, &[1]).unwrap();
        a.send_bytes(tags::CONVERGENCE, &[2]).unwrap();
        // Receive in the opposite order of sending.
        assert_eq!(b.recv_bytes(tags::CONVERGENCE).unwrap(), vec![2]);
        assert_eq!(b.recv_bytes(tags::DATA).unwrap(), vec![1]);
    }

    #[test]
    fn typed_helpers() {
        let (a, b) = LocalComm::pair();
        a.send_f64s(tags::DATA, &[1.0, 2.5, -3.0]).unwrap();
        assert_eq!(b.recv_f64s(tags::DATA, 3).unwrap(), vec![1.0, 2.5, -3.0]);
        a.send_bool(tags::CONVERGENCE, true).unwrap();
        assert!(b.recv_bool(tags::CONVERGENCE).unwrap());
    }

    #[test]
    fn wrong_length_is_protocol_error() {
        let (a, b) = LocalComm::pair();
        a.send_f64s(tags::DATA, &[1.0, 2.0]).unwrap();
        let err = b.recv_f64s(tags::DATA, 3).unwrap_err();
        assert!(matches!(err, CouplingError::Protocol(_)));
    }

    #[test]
    fn close_fails_pending_receives() {
        let (a, b) = LocalComm::pair();
        a.close().unwrap();
        let err = b.recv_bytes(tags::DATA).unwrap_err();
        assert!(matches!(err, CouplingError::Transport(_)));
    }

    #[test]
    fn threaded_exchange() {
        let (a, b) = LocalComm::pair();
        let t = std::thread::spawn(move || {
            let v = b.recv_f64s(tags::DATA, 2).unwrap();
            b.send_f64(tags::DATA, v[0] + v[1]).unwrap();
        });
        a.send_f64s(tags::DATA, &[1.5, 2.5]).unwrap();
        assert_eq!(a.recv_f64(tags::DATA).unwrap(), 4.0);
        t.join().unwrap();
    }
}
