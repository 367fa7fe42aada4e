//! The single-threaded replica actor: owns the instance log, the pending
//! client table, and the peer table, and serializes every state mutation
//! through one event loop.

use std::collections::HashMap;

use epaxos_log::{InstanceLog, LogError};
use epaxos_types::{Instance, ReplicaId, Status};
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;

use crate::error::ReplicaError;
use crate::event::{
    AcceptReplyPayload, AcceptRequestPayload, BeaconReplyPayload, CommitReplyPayload,
    CommitRequestPayload, Event, PreacceptReplyPayload, PreacceptRequestPayload,
    ProposeReplyPayload, ProposeRequestPayload,
};
use crate::messenger::{PeerHandle, PeerRequest};

/// Computes the classic majority quorum for a cluster of `total` replicas.
pub fn quorum(total: usize) -> usize {
    total / 2 + 1
}

/// Computes the thrifty fanout: the next `total / 2` peer ids after `pid`
/// in `sorted_ids`, wrapping circularly. `sorted_ids` must include `pid`
/// itself. Returns an empty vec if `pid` is not present.
pub fn thrifty_peers(sorted_ids: &[ReplicaId], pid: ReplicaId) -> Vec<ReplicaId> {
    let Some(pos) = sorted_ids.iter().position(|&id| id == pid) else {
        return Vec::new();
    };
    let n = sorted_ids.len();
    let count = n / 2;
    (1..=count).map(|offset| sorted_ids[(pos + offset) % n]).collect()
}

/// The replica actor.
pub struct Replica {
    pid: ReplicaId,
    log: InstanceLog,
    peers: HashMap<ReplicaId, PeerHandle>,
    /// All remote peer ids, sorted, excluding `pid`.
    remotes: Vec<ReplicaId>,
    /// Thrifty fanout, sorted, excluding `pid`. Empty disables thrifty
    /// mode: broadcasts then fall back to `remotes`.
    thrifty_ids: Vec<ReplicaId>,
    quorum: usize,
    nops: u64,
    clients: HashMap<u64, oneshot::Sender<ProposeReplyPayload>>,
}

impl Replica {
    /// Builds a new replica. `pid` must not appear in `peers`. `thrifty`
    /// enables thrifty broadcast; when `false`, `thrifty_ids` stays empty
    /// and every broadcast targets the full peer set.
    pub fn new(
        pid: ReplicaId,
        peers: HashMap<ReplicaId, PeerHandle>,
        thrifty: bool,
    ) -> Result<Self, ReplicaError> {
        if peers.is_empty() {
            return Err(ReplicaError::NoNetwork);
        }

        let mut all_ids: Vec<ReplicaId> = peers.keys().copied().collect();
        all_ids.push(pid);
        all_ids.sort_unstable();

        let mut remotes: Vec<ReplicaId> = peers.keys().copied().collect();
        remotes.sort_unstable();

        let thrifty_ids = if thrifty {
            thrifty_peers(&all_ids, pid)
        } else {
            Vec::new()
        };

        Ok(Self {
            pid,
            log: InstanceLog::new(all_ids),
            peers,
            remotes,
            thrifty_ids,
            quorum: quorum(remotes_len_plus_self(&remotes)),
            nops: 0,
            clients: HashMap::new(),
        })
    }

    pub fn pid(&self) -> ReplicaId {
        self.pid
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// Runs the event loop until `events` closes or a handler returns an
    /// error (per the propagation policy: any handler error is fatal).
    pub async fn run(&mut self, mut events: mpsc::Receiver<Event>) -> Result<(), ReplicaError> {
        while let Some(event) = events.recv().await {
            let span = tracing::debug_span!("handle", event = event.kind());
            self.dispatch(event).instrument(span).await?;
        }
        Ok(())
    }

    async fn dispatch(&mut self, event: Event) -> Result<(), ReplicaError> {
        match event {
            Event::Error(error) => return Err(error),
            Event::Unknown => return Err(ReplicaError::UnknownEventType),
            Event::Message(msg) => tracing::info!(message = %msg, "informational event"),
            Event::ProposeRequest(payload, reply) => {
                self.on_propose_request(payload, reply).await?;
            }
            Event::PreacceptRequest(payload, reply) => {
                self.on_preaccept_request(payload, reply)?;
            }
            Event::PreacceptReply(payload) => self.on_preaccept_reply(payload).await?,
            Event::AcceptRequest(payload, reply) => {
                self.on_accept_request(payload, reply)?;
            }
            Event::AcceptReply(payload) => self.on_accept_reply(payload).await?,
            Event::CommitRequest(payload, reply) => {
                self.on_commit_request(payload, reply)?;
            }
            Event::CommitReply(_) => {}
            Event::BeaconRequest(reply) => self.on_beacon_request(reply),
            Event::BeaconReply(_) => {}
        }
        Ok(())
    }

    async fn on_propose_request(
        &mut self,
        mut payload: ProposeRequestPayload,
        reply: oneshot::Sender<ProposeReplyPayload>,
    ) -> Result<(), ReplicaError> {
        self.nops += 1;
        payload.op.request = self.nops;
        self.clients.insert(self.nops, reply);

        let inst = self.log.create(self.pid, vec![payload.op])?;
        self.broadcast(PeerRequest::Preaccept(inst), false).await;
        Ok(())
    }

    fn on_preaccept_request(
        &mut self,
        payload: PreacceptRequestPayload,
        reply: oneshot::Sender<PreacceptReplyPayload>,
    ) -> Result<(), ReplicaError> {
        let (replica, slot) = (payload.inst.replica, payload.inst.slot);
        let changed = self.log.insert(payload.inst)?;
        let updated = self.log.get(replica, slot)?;
        let _ = reply.send(PreacceptReplyPayload {
            slot: updated.slot,
            seq: updated.seq,
            deps: updated.deps.clone(),
            changed,
        });
        Ok(())
    }

    async fn on_preaccept_reply(&mut self, rep: PreacceptReplyPayload) -> Result<(), ReplicaError> {
        self.log.observe_sequence(rep.seq);

        let to_commit = {
            let inst = match self.log.get_mut(self.pid, rep.slot) {
                Ok(inst) => inst,
                Err(LogError::SlotNotFound { .. }) => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            if inst.status != Status::Initial {
                return Ok(());
            }

            inst.acks += 1;
            if rep.changed {
                inst.changed = true;
                inst.merge_deps(&rep.deps);
                if rep.seq > inst.seq {
                    inst.seq = rep.seq;
                }
            }

            if inst.acks as usize >= self.quorum {
                inst.acks = 0;
                inst.status = Status::Preaccepted;
                if inst.changed {
                    // The leader self-accepts on entering the slow path,
                    // mirroring the self-vote it already counted at
                    // PreAccept time; this is what lets onAcceptReply's
                    // `status == Accepted` check recognize the leader's
                    // own instance once remote AcceptReplies arrive.
                    inst.status = Status::Accepted;
                    inst.acks = 1;
                    Some((false, inst.clone()))
                } else {
                    Some((true, inst.clone()))
                }
            } else {
                None
            }
        };

        match to_commit {
            Some((true, inst)) => self.commit(inst).await?,
            Some((false, inst)) => self.broadcast(PeerRequest::Accept(inst), false).await,
            None => {}
        }
        Ok(())
    }

    fn on_accept_request(
        &mut self,
        payload: AcceptRequestPayload,
        reply: oneshot::Sender<AcceptReplyPayload>,
    ) -> Result<(), ReplicaError> {
        let mut inst = payload.inst;
        let (replica, slot) = (inst.replica, inst.slot);
        inst.status = Status::Accepted;

        match self.log.get(replica, slot) {
            Ok(existing) if existing.status >= Status::Committed => {
                let existing = existing.clone();
                let _ = reply.send(AcceptReplyPayload {
                    slot: existing.slot,
                    seq: existing.seq,
                    deps: existing.deps,
                });
                return Ok(());
            }
            Ok(_) => {
                let stored = self.log.get_mut(replica, slot)?;
                stored.deps = inst.deps;
                stored.seq = inst.seq;
                stored.status = Status::Accepted;
            }
            Err(LogError::SlotNotFound { .. }) => {
                self.log.insert(inst)?;
            }
            Err(e) => return Err(e.into()),
        }

        let updated = self.log.get(replica, slot)?;
        let _ = reply.send(AcceptReplyPayload {
            slot: updated.slot,
            seq: updated.seq,
            deps: updated.deps.clone(),
        });
        Ok(())
    }

    async fn on_accept_reply(&mut self, rep: AcceptReplyPayload) -> Result<(), ReplicaError> {
        let to_commit = {
            let inst = match self.log.get_mut(self.pid, rep.slot) {
                Ok(inst) => inst,
                Err(LogError::SlotNotFound { .. }) => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            if inst.status != Status::Accepted {
                return Ok(());
            }
            inst.acks += 1;
            if inst.acks as usize >= self.quorum {
                Some(inst.clone())
            } else {
                None
            }
        };

        if let Some(inst) = to_commit {
            self.commit(inst).await?;
        }
        Ok(())
    }

    fn on_commit_request(
        &mut self,
        payload: CommitRequestPayload,
        reply: oneshot::Sender<CommitReplyPayload>,
    ) -> Result<(), ReplicaError> {
        let mut inst = payload.inst;
        let (replica, slot) = (inst.replica, inst.slot);
        inst.status = Status::Committed;

        match self.log.get(replica, slot) {
            Ok(existing) => {
                if existing.status < Status::Committed {
                    let stored = self.log.get_mut(replica, slot)?;
                    stored.deps = inst.deps;
                    stored.seq = inst.seq;
                    stored.status = Status::Committed;
                }
            }
            Err(LogError::SlotNotFound { .. }) => {
                self.log.insert(inst)?;
            }
            Err(e) => return Err(e.into()),
        }

        let _ = reply.send(CommitReplyPayload { slot });
        Ok(())
    }

    fn on_beacon_request(&self, reply: oneshot::Sender<BeaconReplyPayload>) {
        let _ = reply.send(BeaconReplyPayload {
            quorum_member: true,
            replica: self.pid,
        });
    }

    /// Broadcasts `Commit` to all peers, marks the instance committed in
    /// the log, and resolves each op's pending client reply.
    async fn commit(&mut self, mut inst: Instance) -> Result<(), ReplicaError> {
        inst.status = Status::Committed;
        self.broadcast(PeerRequest::Commit(inst.clone()), true).await;

        let stored = self.log.get_mut(inst.replica, inst.slot)?;
        stored.status = Status::Committed;
        let slot = inst.slot;

        for op in std::mem::take(&mut inst.ops) {
            if let Some(sender) = self.clients.remove(&op.request) {
                let _ = sender.send(ProposeReplyPayload::ok(op.key, slot, Vec::new()));
            }
        }
        Ok(())
    }

    /// Sends `req` to peers per the broadcast policy: `to_all` or an
    /// empty thrifty set targets every remote; otherwise only the
    /// thrifty fanout.
    async fn broadcast(&self, req: PeerRequest, to_all: bool) {
        let targets: &[ReplicaId] = if to_all || self.thrifty_ids.is_empty() {
            &self.remotes
        } else {
            &self.thrifty_ids
        };
        for &id in targets {
            if let Some(handle) = self.peers.get(&id) {
                if !handle.send(req.clone()).await {
                    tracing::warn!(peer = id, "peer messenger unavailable, skipping");
                }
            }
        }
    }
}

fn remotes_len_plus_self(remotes: &[ReplicaId]) -> usize {
    remotes.len() + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_sizes_match_classic_majority() {
        assert_eq!(quorum(3), 2);
        assert_eq!(quorum(5), 3);
        assert_eq!(quorum(7), 4);
    }

    #[test]
    fn thrifty_wraps_around_sorted_ids() {
        let ids = vec![1, 2, 3, 4, 5, 6, 7];
        assert_eq!(thrifty_peers(&ids, 5), vec![6, 7, 1]);
    }

    #[test]
    fn thrifty_fanout_sizes_match_expectation() {
        assert_eq!(thrifty_peers(&[1, 2, 3], 1).len(), 1);
        assert_eq!(thrifty_peers(&[1, 2, 3, 4, 5], 1).len(), 2);
        assert_eq!(thrifty_peers(&[1, 2, 3, 4, 5, 6, 7], 1).len(), 3);
    }

    #[test]
    fn thrifty_peers_empty_when_pid_unknown() {
        assert!(thrifty_peers(&[1, 2, 3], 9).is_empty());
    }
}
