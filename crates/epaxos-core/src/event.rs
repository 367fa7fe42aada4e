//! The tagged event type dispatched into the replica's event loop.
//!
//! Each request-shaped variant carries a one-shot channel back to whoever
//! raised the event (an RPC frontend or the local propose path); reply
//! variants, which only ever originate from a peer's stream, carry no
//! sink because nothing downstream awaits them.

use std::collections::BTreeMap;

use epaxos_types::{Instance, Operation, ReplicaId, Seq, Slot};
use tokio::sync::oneshot;

use crate::error::ReplicaError;

#[derive(Debug)]
pub struct ProposeRequestPayload {
    pub identity: String,
    pub op: Operation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposeReplyPayload {
    pub success: bool,
    pub error: Option<String>,
    pub slot: Option<Slot>,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl ProposeReplyPayload {
    pub fn ok(key: Vec<u8>, slot: Slot, value: Vec<u8>) -> Self {
        Self {
            success: true,
            error: None,
            slot: Some(slot),
            key,
            value,
        }
    }

    pub fn err(key: Vec<u8>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            slot: None,
            key,
            value: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct PreacceptRequestPayload {
    pub inst: Instance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreacceptReplyPayload {
    pub slot: Slot,
    pub seq: Seq,
    pub deps: BTreeMap<ReplicaId, Slot>,
    pub changed: bool,
}

#[derive(Debug)]
pub struct AcceptRequestPayload {
    pub inst: Instance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptReplyPayload {
    pub slot: Slot,
    pub seq: Seq,
    pub deps: BTreeMap<ReplicaId, Slot>,
}

#[derive(Debug)]
pub struct CommitRequestPayload {
    pub inst: Instance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReplyPayload {
    pub slot: Slot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconReplyPayload {
    pub quorum_member: bool,
    pub replica: ReplicaId,
}

/// A record dispatched into the replica's event loop.
///
/// `Message` is a catch-all for informational notifications (e.g. a
/// messenger reporting a reconnect) that carry no protocol meaning of
/// their own; handlers observe it only for logging.
#[derive(Debug)]
pub enum Event {
    Error(ReplicaError),
    Message(String),
    ProposeRequest(ProposeRequestPayload, oneshot::Sender<ProposeReplyPayload>),
    PreacceptRequest(
        PreacceptRequestPayload,
        oneshot::Sender<PreacceptReplyPayload>,
    ),
    PreacceptReply(PreacceptReplyPayload),
    AcceptRequest(AcceptRequestPayload, oneshot::Sender<AcceptReplyPayload>),
    AcceptReply(AcceptReplyPayload),
    CommitRequest(CommitRequestPayload, oneshot::Sender<CommitReplyPayload>),
    CommitReply(CommitReplyPayload),
    BeaconRequest(oneshot::Sender<BeaconReplyPayload>),
    BeaconReply(BeaconReplyPayload),
    Unknown,
}

impl Event {
    /// Short tag used as the `event` field on the handler's tracing span.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Error(_) => "error",
            Event::Message(_) => "message",
            Event::ProposeRequest(..) => "propose_request",
            Event::PreacceptRequest(..) => "preaccept_request",
            Event::PreacceptReply(_) => "preaccept_reply",
            Event::AcceptRequest(..) => "accept_request",
            Event::AcceptReply(_) => "accept_reply",
            Event::CommitRequest(..) => "commit_request",
            Event::CommitReply(_) => "commit_reply",
            Event::BeaconRequest(_) => "beacon_request",
            Event::BeaconReply(_) => "beacon_reply",
            Event::Unknown => "unknown",
        }
    }
}
