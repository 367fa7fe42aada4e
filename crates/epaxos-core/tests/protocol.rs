//! End-to-end protocol scenarios driven through the public `Replica` API
//! with a scripted, in-memory peer transport standing in for gRPC.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use epaxos_core::{
    spawn_messenger, CommitReplyPayload, Event, PeerReply, PeerRequest, PeerTransport,
    PreacceptReplyPayload, ProposeRequestPayload, Replica, TransportError,
};
use epaxos_types::{AccessType, Operation, ReplicaId};
use tokio::sync::{mpsc, oneshot};

/// A transport that replies from a fixed, pre-scripted queue per peer and
/// never actually touches a network.
struct ScriptedTransport {
    peer: ReplicaId,
    replies: Mutex<VecDeque<PeerReply>>,
}

#[async_trait]
impl PeerTransport for ScriptedTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
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
            .ok_or_else(|| TransportError::Recv(self.peer, "scripted replies exhausted".into()))
    }
}

fn op(key: &str) -> Operation {
    Operation::new(AccessType::Write, key.as_bytes().to_vec(), b"bar".to_vec())
}

/// Builds a replica wired to `peers`, each backed by a scripted transport
/// that answers every request sent to it with its scripted reply
/// sequence in order. Returns the replica, the event-loop receiver it
/// must be run against, and a sender clone for driving client requests.
fn spawn_cluster(
    pid: ReplicaId,
    peers: &[ReplicaId],
    scripts: HashMap<ReplicaId, Vec<PeerReply>>,
    thrifty: bool,
) -> (Replica, mpsc::Receiver<Event>, mpsc::Sender<Event>) {
    let (events_tx, events_rx) = mpsc::channel(64);
    let mut handles = HashMap::new();
    for &peer in peers {
        let replies = scripts.get(&peer).cloned().unwrap_or_default();
        let transport = ScriptedTransport {
            peer,
            replies: Mutex::new(replies.into_iter().collect()),
        };
        let (handle, _join) = spawn_messenger(peer, transport, events_tx.clone(), 16);
        handles.insert(peer, handle);
    }
    let replica = Replica::new(pid, handles, thrifty).expect("cluster has peers");
    (replica, events_rx, events_tx)
}

#[tokio::test]
async fn fast_path_commits_after_quorum_agrees() {
    let peers = [1u32, 3, 4, 5];
    let preaccept_reply = PeerReply::Preaccept(PreacceptReplyPayload {
        slot: 0,
        seq: 1,
        deps: Default::default(),
        changed: false,
    });
    let mut scripts = HashMap::new();
    for &p in &peers {
        scripts.insert(
            p,
            vec![preaccept_reply.clone(), PeerReply::Commit(CommitReplyPayload { slot: 0 })],
        );
    }

    let (mut replica, events_rx, events_tx) = spawn_cluster(2, &peers, scripts, false);
    let loop_handle = tokio::spawn(async move {
        replica.run(events_rx).await.unwrap();
    });

    let (propose_tx, propose_rx) = oneshot::channel();
    events_tx
        .send(Event::ProposeRequest(
            ProposeRequestPayload {
                identity: "client-1".into(),
                op: op("foo"),
            },
            propose_tx,
        ))
        .await
        .expect("dispatch propose");

    let reply = propose_rx.await.expect("propose reply delivered");
    assert!(reply.success);
    assert_eq!(reply.slot, Some(0));

    drop(events_tx);
    loop_handle.await.unwrap();
}

#[tokio::test]
async fn slow_path_commits_after_accept_quorum() {
    // A two-replica cluster makes the single remote's reply the only one
    // that can reach quorum, so the fast/slow path outcome here is
    // deterministic rather than a race between concurrent peer replies.
    let peers = [3u32];
    let mut scripts = HashMap::new();
    scripts.insert(
        3,
        vec![
            PeerReply::Preaccept(PreacceptReplyPayload {
                slot: 0,
                seq: 5,
                deps: std::iter::once((3, 0)).collect(),
                changed: true,
            }),
            PeerReply::Accept(epaxos_core::AcceptReplyPayload {
                slot: 0,
                seq: 5,
                deps: Default::default(),
            }),
            PeerReply::Commit(CommitReplyPayload { slot: 0 }),
        ],
    );

    let (mut replica, events_rx, events_tx) = spawn_cluster(2, &peers, scripts, false);
    let loop_handle = tokio::spawn(async move {
        replica.run(events_rx).await.unwrap();
    });

    let (propose_tx, propose_rx) = oneshot::channel();
    events_tx
        .send(Event::ProposeRequest(
            ProposeRequestPayload {
                identity: "client-1".into(),
                op: op("foo"),
            },
            propose_tx,
        ))
        .await
        .expect("dispatch propose");

    let reply = propose_rx.await.expect("propose reply delivered");
    assert!(reply.success);

    drop(events_tx);
    loop_handle.await.unwrap();
}

#[tokio::test]
async fn follower_learns_committed_instance_directly() {
    let (mut replica, events_rx, events_tx) = spawn_cluster(1, &[2], HashMap::new(), false);
    let loop_handle = tokio::spawn(async move {
        replica.run(events_rx).await.unwrap();
    });

    let inst = epaxos_types::Instance {
        replica: 2,
        slot: 0,
        seq: 1,
        deps: Default::default(),
        status: epaxos_types::Status::Initial,
        acks: 0,
        changed: false,
        ops: vec![op("x")],
    };
    let (tx, rx) = oneshot::channel();
    events_tx
        .send(Event::CommitRequest(
            epaxos_core::CommitRequestPayload { inst },
            tx,
        ))
        .await
        .unwrap();
    let reply = rx.await.unwrap();
    assert_eq!(reply.slot, 0);

    drop(events_tx);
    loop_handle.await.unwrap();
}
