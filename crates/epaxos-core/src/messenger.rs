//! One messenger per remote peer: a bounded outbound queue backed by a
//! task that owns the peer's bidirectional stream.
//!
//! The queue is the deliberate backpressure point described in the
//! concurrency model: [`PeerHandle::send`] awaits a bounded
//! `tokio::sync::mpsc::Sender`, so a slow or wedged peer throttles the
//! replica actor rather than letting outbound state grow without bound.

use async_trait::async_trait;
use epaxos_types::{Instance, ReplicaId};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::event::{AcceptReplyPayload, BeaconReplyPayload, CommitReplyPayload, Event, PreacceptReplyPayload};

/// Default capacity of a peer's outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// A peer request, carried on the wire as the `PeerRequest` oneof.
#[derive(Debug, Clone)]
pub enum PeerRequest {
    Preaccept(Instance),
    Accept(Instance),
    Commit(Instance),
    Beacon,
}

/// A peer reply, carried on the wire as the `PeerReply` oneof.
#[derive(Debug, Clone)]
pub enum PeerReply {
    Preaccept(PreacceptReplyPayload),
    Accept(AcceptReplyPayload),
    Commit(CommitReplyPayload),
    Beacon(BeaconReplyPayload),
}

impl From<PeerReply> for Event {
    fn from(reply: PeerReply) -> Self {
        match reply {
            PeerReply::Preaccept(payload) => Event::PreacceptReply(payload),
            PeerReply::Accept(payload) => Event::AcceptReply(payload),
            PeerReply::Commit(payload) => Event::CommitReply(payload),
            PeerReply::Beacon(payload) => Event::BeaconReply(payload),
        }
    }
}

/// Errors raised by a peer's transport. Never surfaced to the replica
/// actor: the messenger task recovers locally by going offline and
/// retrying on the next send.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("dial to peer {0} failed: {1}")]
    Dial(ReplicaId, String),
    #[error("send to peer {0} failed: {1}")]
    Send(ReplicaId, String),
    #[error("receive from peer {0} failed: {1}")]
    Recv(ReplicaId, String),
}

/// The transport a messenger drives: dial, send one request, receive one
/// reply. A concrete implementation (gRPC, or an in-memory fake for
/// tests) lives outside this crate so that the actor and messenger logic
/// stay free of any wire-format dependency.
#[async_trait]
pub trait PeerTransport: Send {
    /// Dials the peer, opens the stream, and exchanges the initial beacon.
    /// Idempotent: calling `connect` while already connected is a no-op.
    async fn connect(&mut self) -> Result<(), TransportError>;

    async fn send(&mut self, req: PeerRequest) -> Result<(), TransportError>;

    async fn recv(&mut self) -> Result<PeerReply, TransportError>;
}

/// The actor-side handle to a peer's outbound queue.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    peer: ReplicaId,
    tx: mpsc::Sender<PeerRequest>,
}

impl PeerHandle {
    pub fn peer(&self) -> ReplicaId {
        self.peer
    }

    /// Enqueues `req`. Blocks while the queue is full — this is the
    /// backpressure point described in the concurrency model.
    ///
    /// Returns `false` if the messenger task has already shut down; the
    /// caller should log and move on rather than treat this as a
    /// handler-fatal error.
    pub async fn send(&self, req: PeerRequest) -> bool {
        self.tx.send(req).await.is_ok()
    }

    /// Closes the outbound queue. The messenger task drains whatever is
    /// already enqueued, then tears down the stream.
    pub fn close(self) {
        drop(self.tx);
    }
}

/// Spawns the messenger task for `peer` and returns the actor-side handle
/// plus a join handle for shutdown.
pub fn spawn_messenger<T>(
    peer: ReplicaId,
    transport: T,
    events: mpsc::Sender<Event>,
    capacity: usize,
) -> (PeerHandle, JoinHandle<()>)
where
    T: PeerTransport + 'static,
{
    let (tx, rx) = mpsc::channel(capacity);
    let handle = tokio::spawn(run(peer, transport, rx, events));
    (PeerHandle { peer, tx }, handle)
}

async fn run<T: PeerTransport>(
    peer: ReplicaId,
    mut transport: T,
    mut inbox: mpsc::Receiver<PeerRequest>,
    events: mpsc::Sender<Event>,
) {
    let mut online = false;
    while let Some(req) = inbox.recv().await {
        if !online {
            if let Err(error) = transport.connect().await {
                tracing::warn!(peer, %error, "dial failed, dropping message");
                continue;
            }
            online = true;
        }

        if let Err(error) = transport.send(req).await {
            tracing::warn!(peer, %error, "send failed, going offline");
            online = false;
            continue;
        }

        match transport.recv().await {
            Ok(reply) => {
                if events.send(Event::from(reply)).await.is_err() {
                    break;
                }
            }
            Err(error) => {
                tracing::warn!(peer, %error, "receive failed, going offline");
                online = false;
            }
        }
    }
    tracing::info!(peer, "messenger shut down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use epaxos_types::{AccessType, Operation, Status};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct FakeTransport {
        connect_calls: usize,
        replies: Mutex<VecDeque<Result<PeerReply, TransportError>>>,
        fail_connect: bool,
    }

    #[async_trait]
    impl PeerTransport for FakeTransport {
        async fn connect(&mut self) -> Result<(), TransportError> {
            self.connect_calls += 1;
            if self.fail_connect {
                return Err(TransportError::Dial(1, "boom".into()));
            }
            Ok(())
        }

        async fn send(&mut self, _req: PeerRequest) -> Result<(), TransportError> {
            Ok(())
        }

        async fn recv(&mut self) -> Result<PeerReply, TransportError> {
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(TransportError::Recv(1, "no more replies".into())))
        }
    }

    fn instance() -> Instance {
        Instance {
            replica: 1,
            slot: 0,
            seq: 1,
            deps: Default::default(),
            status: Status::Initial,
            acks: 1,
            changed: false,
            ops: vec![Operation::new(AccessType::Write, b"k".to_vec(), b"v".to_vec())],
        }
    }

    #[tokio::test]
    async fn dispatches_reply_as_event() {
        let transport = FakeTransport {
            connect_calls: 0,
            replies: Mutex::new(VecDeque::from([Ok(PeerReply::Preaccept(PreacceptReplyPayload {
                slot: 0,
                seq: 1,
                deps: Default::default(),
                changed: false,
            }))])),
            fail_connect: false,
        };
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let (handle, join) = spawn_messenger(2, transport, events_tx, 4);

        assert!(handle.send(PeerRequest::Preaccept(instance())).await);
        let event = events_rx.recv().await.unwrap();
        assert!(matches!(event, Event::PreacceptReply(_)));

        handle.close();
        join.await.unwrap();
    }

    #[tokio::test]
    async fn dial_failure_drops_message_without_panicking() {
        let transport = FakeTransport {
            connect_calls: 0,
            replies: Mutex::new(VecDeque::new()),
            fail_connect: true,
        };
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let (handle, join) = spawn_messenger(3, transport, events_tx, 4);

        assert!(handle.send(PeerRequest::Beacon).await);
        handle.close();
        join.await.unwrap();
        assert!(events_rx.try_recv().is_err());
    }
}
