//! Message passing abstraction for cross-process neighbors.
//!
//! The protocol only needs non-blocking send/receive over byte buffers
//! plus explicit waits; an MPI-backed implementation would satisfy this
//! trait directly. Tags encode (sending patch, dimension, sender side,
//! kind) so concurrent in-flight transfers between the same pair of
//! processes never alias.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use super::MigrationError;
use super::topology::Rank;

/// What a message carries: the announced particle count, or the packed
/// particle payload itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Count,
    Payload,
}

/// Disambiguates concurrent in-flight transfers between one pair of ranks.
///
/// `patch` is the global index of the *sending* patch; the receiver
/// reconstructs the tag from its topology (the neighbor's index and the
/// opposite side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageTag {
    pub patch: usize,
    pub dim: u8,
    pub side: u8,
    pub kind: MessageKind,
}

impl MessageTag {
    pub fn new(patch: usize, dim: usize, side: usize, kind: MessageKind) -> Self {
        Self {
            patch,
            dim: dim as u8,
            side: side as u8,
            kind,
        }
    }
}

/// In-flight send, completed by [`Transport::wait_send`].
#[derive(Debug, Clone, Copy)]
pub struct PendingSend {
    pub peer: Rank,
    pub tag: MessageTag,
}

/// In-flight receive, completed by [`Transport::wait_recv`].
#[derive(Debug, Clone, Copy)]
pub struct PendingRecv {
    pub peer: Rank,
    pub tag: MessageTag,
}

/// Non-blocking byte transport between ranks.
///
/// A transfer that cannot complete is fatal: `wait_*` returns
/// [`MigrationError::TransportFailure`] and the simulation aborts. There
/// is no cancellation and no retry.
pub trait Transport {
    fn post_send(
        &self,
        dest: Rank,
        tag: MessageTag,
        bytes: Vec<u8>,
    ) -> Result<PendingSend, MigrationError>;

    fn post_recv(&self, src: Rank, tag: MessageTag) -> Result<PendingRecv, MigrationError>;

    fn wait_send(&self, pending: PendingSend) -> Result<(), MigrationError>;

    fn wait_recv(&self, pending: PendingRecv) -> Result<Vec<u8>, MigrationError>;
}

type MailKey = (Rank, Rank, MessageTag);

#[derive(Debug, Default)]
struct Mailbox {
    queues: HashMap<MailKey, VecDeque<Vec<u8>>>,
}

/// Shared in-process mailbox connecting [`LoopbackTransport`] endpoints.
///
/// Used by tests and single-process drivers to exercise the remote code
/// path: posting a send enqueues the bytes under (src, dest, tag) and a
/// matching wait on the destination endpoint dequeues them. Waiting for a
/// message that was never posted is a [`MigrationError::TransportFailure`]
/// immediately rather than a hang.
#[derive(Debug, Clone, Default)]
pub struct LoopbackHub {
    inner: Arc<Mutex<Mailbox>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Endpoint bound to one rank.
    pub fn endpoint(&self, rank: Rank) -> LoopbackTransport {
        LoopbackTransport {
            rank,
            inner: Arc::clone(&self.inner),
        }
    }
}

/// One rank's view of a [`LoopbackHub`].
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    rank: Rank,
    inner: Arc<Mutex<Mailbox>>,
}

impl Transport for LoopbackTransport {
    fn post_send(
        &self,
        dest: Rank,
        tag: MessageTag,
        bytes: Vec<u8>,
    ) -> Result<PendingSend, MigrationError> {
        let mut mailbox = self.inner.lock().expect("loopback mailbox poisoned");
        mailbox
            .queues
            .entry((self.rank, dest, tag))
            .or_default()
            .push_back(bytes);
        Ok(PendingSend { peer: dest, tag })
    }

    fn post_recv(&self, src: Rank, tag: MessageTag) -> Result<PendingRecv, MigrationError> {
        Ok(PendingRecv { peer: src, tag })
    }

    fn wait_send(&self, _pending: PendingSend) -> Result<(), MigrationError> {
        // Sends complete at post time: the bytes were moved into the hub.
        Ok(())
    }

    fn wait_recv(&self, pending: PendingRecv) -> Result<Vec<u8>, MigrationError> {
        let mut mailbox = self.inner.lock().expect("loopback mailbox poisoned");
        mailbox
            .queues
            .get_mut(&(pending.peer, self.rank, pending.tag))
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| {
                MigrationError::transport(
                    pending.tag,
                    format!("no message from rank {} for this tag", pending.peer),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_roundtrip() {
        let hub = LoopbackHub::new();
        let a = hub.endpoint(0);
        let b = hub.endpoint(1);

        let tag = MessageTag::new(7, 0, 1, MessageKind::Count);
        let send = a.post_send(1, tag, vec![1, 2, 3]).unwrap();
        let recv = b.post_recv(0, tag).unwrap();

        a.wait_send(send).unwrap();
        assert_eq!(b.wait_recv(recv).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_loopback_missing_message_is_fatal() {
        let hub = LoopbackHub::new();
        let b = hub.endpoint(1);
        let tag = MessageTag::new(0, 1, 0, MessageKind::Payload);
        let recv = b.post_recv(0, tag).unwrap();
        let err = b.wait_recv(recv).unwrap_err();
        assert!(matches!(err, MigrationError::TransportFailure { dim: 1, .. }));
    }

    #[test]
    fn test_tags_do_not_alias() {
        let hub = LoopbackHub::new();
        let a = hub.endpoint(0);
        let b = hub.endpoint(1);

        let count = MessageTag::new(3, 0, 0, MessageKind::Count);
        let payload = MessageTag::new(3, 0, 0, MessageKind::Payload);
        a.post_send(1, payload, vec![9]).unwrap();
        a.post_send(1, count, vec![1]).unwrap();

        let recv = b.post_recv(0, count).unwrap();
        assert_eq!(b.wait_recv(recv).unwrap(), vec![1]);
        let recv = b.post_recv(0, payload).unwrap();
        assert_eq!(b.wait_recv(recv).unwrap(), vec![9]);
    }
}
