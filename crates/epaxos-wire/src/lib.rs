//! Protobuf/tonic wire types for the `epaxos.Epaxos` service, and the
//! `TryFrom`/`From` conversions between them and the domain types of
//! `epaxos-types` / `epaxos-core`.
//!
//! No `prost`-generated type crosses into the replica actor's handler
//! signatures; everything that touches a stream goes through a
//! conversion defined here first.

pub mod proto {
    #![allow(clippy::all)]
    tonic::include_proto!("epaxos");
}

use epaxos_core::{
    AcceptReplyPayload, AcceptRequestPayload, BeaconReplyPayload, CommitReplyPayload,
    CommitRequestPayload, PeerReply, PeerRequest, PreacceptReplyPayload, PreacceptRequestPayload,
    ProposeReplyPayload, ProposeRequestPayload,
};
use epaxos_types::{AccessType, Instance, Operation, Status};
use thiserror::Error;

pub use proto::epaxos_client::EpaxosClient;
pub use proto::epaxos_server::{Epaxos, EpaxosServer};

/// Errors converting an inbound wire message into its domain type.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("invalid {field} value: {value}")]
    InvalidEnum { field: &'static str, value: i32 },

    #[error("{message} is missing its oneof payload")]
    MissingPayload { message: &'static str },
}

fn access_type_from_i32(value: i32) -> Result<AccessType, WireError> {
    match proto::AccessType::try_from(value) {
        Ok(proto::AccessType::Read) => Ok(AccessType::Read),
        Ok(proto::AccessType::Write) => Ok(AccessType::Write),
        Ok(proto::AccessType::Writeread) => Ok(AccessType::WriteRead),
        Ok(proto::AccessType::Delete) => Ok(AccessType::Delete),
        Err(_) => Err(WireError::InvalidEnum {
            field: "Operation.type",
            value,
        }),
    }
}

impl From<AccessType> for proto::AccessType {
    fn from(value: AccessType) -> Self {
        match value {
            AccessType::Read => proto::AccessType::Read,
            AccessType::Write => proto::AccessType::Write,
            AccessType::WriteRead => proto::AccessType::Writeread,
            AccessType::Delete => proto::AccessType::Delete,
        }
    }
}

fn status_from_i32(value: i32) -> Result<Status, WireError> {
    match proto::Status::try_from(value) {
        Ok(proto::Status::Initial) => Ok(Status::Initial),
        Ok(proto::Status::Preaccepted) => Ok(Status::Preaccepted),
        Ok(proto::Status::Accepted) => Ok(Status::Accepted),
        Ok(proto::Status::Committed) => Ok(Status::Committed),
        Ok(proto::Status::Executed) => Ok(Status::Executed),
        Err(_) => Err(WireError::InvalidEnum {
            field: "Instance.status",
            value,
        }),
    }
}

impl From<Status> for proto::Status {
    fn from(value: Status) -> Self {
        match value {
            Status::Initial => proto::Status::Initial,
            Status::Preaccepted => proto::Status::Preaccepted,
            Status::Accepted => proto::Status::Accepted,
            Status::Committed => proto::Status::Committed,
            Status::Executed => proto::Status::Executed,
        }
    }
}

impl From<Operation> for proto::Operation {
    fn from(op: Operation) -> Self {
        proto::Operation {
            r#type: proto::AccessType::from(op.access) as i32,
            key: op.key,
            value: op.value,
            request: op.request,
        }
    }
}

impl TryFrom<proto::Operation> for Operation {
    type Error = WireError;
    fn try_from(value: proto::Operation) -> Result<Self, Self::Error> {
        Ok(Operation {
            access: access_type_from_i32(value.r#type)?,
            key: value.key,
            value: value.value,
            request: value.request,
        })
    }
}

impl From<Instance> for proto::Instance {
    fn from(inst: Instance) -> Self {
        proto::Instance {
            replica: inst.replica,
            slot: inst.slot,
            seq: inst.seq,
            deps: inst.deps.into_iter().collect(),
            status: proto::Status::from(inst.status) as i32,
            acks: inst.acks,
            changed: inst.changed,
            ops: inst.ops.into_iter().map(Into::into).collect(),
        }
    }
}

impl TryFrom<proto::Instance> for Instance {
    type Error = WireError;
    fn try_from(value: proto::Instance) -> Result<Self, Self::Error> {
        Ok(Instance {
            replica: value.replica,
            slot: value.slot,
            seq: value.seq,
            deps: value.deps.into_iter().collect(),
            status: status_from_i32(value.status)?,
            acks: value.acks,
            changed: value.changed,
            ops: value
                .ops
                .into_iter()
                .map(Operation::try_from)
                .collect::<Result<_, _>>()?,
        })
    }
}

impl TryFrom<proto::ProposeRequest> for ProposeRequestPayload {
    type Error = WireError;
    fn try_from(value: proto::ProposeRequest) -> Result<Self, Self::Error> {
        let op = value.op.ok_or(WireError::MissingPayload {
            message: "ProposeRequest",
        })?;
        Ok(ProposeRequestPayload {
            identity: value.identity,
            op: op.try_into()?,
        })
    }
}

impl TryFrom<proto::PreacceptRequest> for PreacceptRequestPayload {
    type Error = WireError;
    fn try_from(value: proto::PreacceptRequest) -> Result<Self, Self::Error> {
        let inst = value.inst.ok_or(WireError::MissingPayload {
            message: "PreacceptRequest",
        })?;
        Ok(PreacceptRequestPayload { inst: inst.try_into()? })
    }
}

impl TryFrom<proto::AcceptRequest> for AcceptRequestPayload {
    type Error = WireError;
    fn try_from(value: proto::AcceptRequest) -> Result<Self, Self::Error> {
        let inst = value.inst.ok_or(WireError::MissingPayload {
            message: "AcceptRequest",
        })?;
        Ok(AcceptRequestPayload { inst: inst.try_into()? })
    }
}

impl TryFrom<proto::CommitRequest> for CommitRequestPayload {
    type Error = WireError;
    fn try_from(value: proto::CommitRequest) -> Result<Self, Self::Error> {
        let inst = value.inst.ok_or(WireError::MissingPayload {
            message: "CommitRequest",
        })?;
        Ok(CommitRequestPayload { inst: inst.try_into()? })
    }
}

impl From<ProposeReplyPayload> for proto::ProposeReply {
    fn from(payload: ProposeReplyPayload) -> Self {
        proto::ProposeReply {
            success: payload.success,
            error: payload.error.unwrap_or_default(),
            slot: payload.slot.map_or(-1, |s| s as i64),
            key: payload.key,
            value: payload.value,
        }
    }
}

impl From<PreacceptReplyPayload> for proto::PreacceptReply {
    fn from(payload: PreacceptReplyPayload) -> Self {
        proto::PreacceptReply {
            slot: payload.slot,
            seq: payload.seq,
            deps: payload.deps.into_iter().collect(),
            changed: payload.changed,
        }
    }
}

impl TryFrom<proto::PreacceptReply> for PreacceptReplyPayload {
    type Error = WireError;
    fn try_from(value: proto::PreacceptReply) -> Result<Self, Self::Error> {
        Ok(PreacceptReplyPayload {
            slot: value.slot,
            seq: value.seq,
            deps: value.deps.into_iter().collect(),
            changed: value.changed,
        })
    }
}

impl From<AcceptReplyPayload> for proto::AcceptReply {
    fn from(payload: AcceptReplyPayload) -> Self {
        proto::AcceptReply {
            slot: payload.slot,
            seq: payload.seq,
            deps: payload.deps.into_iter().collect(),
        }
    }
}

impl TryFrom<proto::AcceptReply> for AcceptReplyPayload {
    type Error = WireError;
    fn try_from(value: proto::AcceptReply) -> Result<Self, Self::Error> {
        Ok(AcceptReplyPayload {
            slot: value.slot,
            seq: value.seq,
            deps: value.deps.into_iter().collect(),
        })
    }
}

impl From<CommitReplyPayload> for proto::CommitReply {
    fn from(payload: CommitReplyPayload) -> Self {
        proto::CommitReply { slot: payload.slot }
    }
}

impl TryFrom<proto::CommitReply> for CommitReplyPayload {
    type Error = WireError;
    fn try_from(value: proto::CommitReply) -> Result<Self, Self::Error> {
        Ok(CommitReplyPayload { slot: value.slot })
    }
}

impl From<PeerRequest> for proto::PeerRequest {
    fn from(req: PeerRequest) -> Self {
        use proto::peer_request::Payload;
        let (kind, payload) = match req {
            PeerRequest::Preaccept(inst) => (
                proto::PeerMessageType::Preaccept,
                Payload::Preaccept(proto::PreacceptRequest {
                    inst: Some(inst.into()),
                }),
            ),
            PeerRequest::Accept(inst) => (
                proto::PeerMessageType::Accept,
                Payload::Accept(proto::AcceptRequest {
                    inst: Some(inst.into()),
                }),
            ),
            PeerRequest::Commit(inst) => (
                proto::PeerMessageType::Commit,
                Payload::Commit(proto::CommitRequest {
                    inst: Some(inst.into()),
                }),
            ),
            PeerRequest::Beacon => (
                proto::PeerMessageType::Beacon,
                Payload::Beacon(proto::BeaconRequest {}),
            ),
        };
        proto::PeerRequest {
            r#type: kind as i32,
            sender: String::new(),
            payload: Some(payload),
        }
    }
}

impl TryFrom<proto::PeerRequest> for PeerRequest {
    type Error = WireError;
    fn try_from(value: proto::PeerRequest) -> Result<Self, Self::Error> {
        use proto::peer_request::Payload;
        match value.payload {
            Some(Payload::Preaccept(req)) => {
                let inst = req.inst.ok_or(WireError::MissingPayload {
                    message: "PreacceptRequest",
                })?;
                Ok(PeerRequest::Preaccept(inst.try_into()?))
            }
            Some(Payload::Accept(req)) => {
                let inst = req.inst.ok_or(WireError::MissingPayload {
                    message: "AcceptRequest",
                })?;
                Ok(PeerRequest::Accept(inst.try_into()?))
            }
            Some(Payload::Commit(req)) => {
                let inst = req.inst.ok_or(WireError::MissingPayload {
                    message: "CommitRequest",
                })?;
                Ok(PeerRequest::Commit(inst.try_into()?))
            }
            Some(Payload::Beacon(_)) => Ok(PeerRequest::Beacon),
            None => Err(WireError::MissingPayload {
                message: "PeerRequest",
            }),
        }
    }
}

impl From<PeerReply> for proto::PeerReply {
    fn from(reply: PeerReply) -> Self {
        use proto::peer_reply::Payload;
        let (kind, payload) = match reply {
            PeerReply::Preaccept(payload) => {
                (proto::PeerMessageType::Preaccept, Payload::Preaccept(payload.into()))
            }
            PeerReply::Accept(payload) => {
                (proto::PeerMessageType::Accept, Payload::Accept(payload.into()))
            }
            PeerReply::Commit(payload) => {
                (proto::PeerMessageType::Commit, Payload::Commit(payload.into()))
            }
            PeerReply::Beacon(payload) => (
                proto::PeerMessageType::Beacon,
                Payload::Beacon(proto::BeaconReply {
                    quorum_member: payload.quorum_member,
                    replica: payload.replica,
                }),
            ),
        };
        proto::PeerReply {
            r#type: kind as i32,
            sender: String::new(),
            success: true,
            payload: Some(payload),
        }
    }
}

impl TryFrom<proto::PeerReply> for PeerReply {
    type Error = WireError;
    fn try_from(value: proto::PeerReply) -> Result<Self, Self::Error> {
        use proto::peer_reply::Payload;
        match value.payload {
            Some(Payload::Preaccept(p)) => Ok(PeerReply::Preaccept(p.try_into()?)),
            Some(Payload::Accept(p)) => Ok(PeerReply::Accept(p.try_into()?)),
            Some(Payload::Commit(p)) => Ok(PeerReply::Commit(p.try_into()?)),
            Some(Payload::Beacon(p)) => Ok(PeerReply::Beacon(BeaconReplyPayload {
                quorum_member: p.quorum_member,
                replica: p.replica,
            })),
            None => Err(WireError::MissingPayload {
                message: "PeerReply",
            }),
        }
    }
}
