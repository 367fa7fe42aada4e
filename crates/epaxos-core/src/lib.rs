//! The replica actor, its event type, and the peer messengers that feed
//! it — the leaderless, dependency-tracking consensus core.
//!
//! Nothing in this crate knows about gRPC or protobuf; [`PeerTransport`]
//! is the seam a concrete wire crate implements.

mod error;
mod event;
mod messenger;
mod replica;

pub use error::ReplicaError;
pub use event::{
    AcceptReplyPayload, AcceptRequestPayload, BeaconReplyPayload, CommitReplyPayload,
    CommitRequestPayload, Event, PreacceptReplyPayload, PreacceptRequestPayload,
    ProposeReplyPayload, ProposeRequestPayload,
};
pub use messenger::{
    spawn_messenger, PeerHandle, PeerReply, PeerRequest, PeerTransport, TransportError,
    DEFAULT_QUEUE_CAPACITY,
};
pub use replica::{quorum, thrifty_peers, Replica};
