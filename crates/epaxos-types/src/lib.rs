//! Domain types for the ePaxos consensus core.
//!
//! These types are transport-agnostic: nothing here knows about gRPC,
//! protobuf, or `tonic`. The wire crate converts between these and the
//! generated protobuf structs at the RPC boundary.

use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identifies a replica within the cluster.
///
/// Replica ids are also used as log-leader keys and as indices into the
/// `deps` map of an [`Instance`], so they are kept as a plain `u32` rather
/// than a newtype that would need conversions at every call site.
pub type ReplicaId = u32;

/// Zero-based position of an instance within a replica's sub-log.
pub type Slot = u64;

/// Sequence number used to break execution-order ties among dependent
/// instances. Strictly increases along any dependency chain.
pub type Seq = u64;

/// The kind of access an [`Operation`] performs against the replicated
/// key-value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AccessType {
    Read,
    Write,
    WriteRead,
    Delete,
}

/// An atomic unit of work carried by an [`Instance`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Operation {
    pub access: AccessType,
    /// Non-empty for every access type.
    pub key: Vec<u8>,
    /// Empty for reads and deletes.
    pub value: Vec<u8>,
    /// Assigned by the command leader to correlate this operation with a
    /// pending client reply. Zero until `onProposeRequest` assigns it.
    pub request: u64,
}

impl Operation {
    pub fn new(access: AccessType, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            access,
            key: key.into(),
            value: value.into(),
            request: 0,
        }
    }
}

/// Protocol status of an [`Instance`], advancing monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Status {
    Initial,
    Preaccepted,
    Accepted,
    Committed,
    Executed,
}

/// The unit of consensus: a command-leader/slot pair carrying one or more
/// operations, its dependency set, and its protocol status.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Instance {
    pub replica: ReplicaId,
    pub slot: Slot,
    pub seq: Seq,
    /// Highest slot in `deps[r]`'s sub-log this instance depends on.
    pub deps: BTreeMap<ReplicaId, Slot>,
    pub status: Status,
    /// Tally of replies received in the current phase. Leader-only; left
    /// at its creation value on non-leader replicas.
    pub acks: u32,
    /// Set once any `PreAccept` reply reported a dependency or sequence
    /// update. Leader-only.
    pub changed: bool,
    pub ops: Vec<Operation>,
}

impl Instance {
    /// Merges `other`'s dependency map into `self.deps`, overwriting any
    /// existing entries. Used when applying a `PreAcceptReply`'s reported
    /// dependencies (§4.4 `onPreacceptReply`).
    pub fn merge_deps(&mut self, other: &BTreeMap<ReplicaId, Slot>) {
        for (&replica, &slot) in other {
            self.deps.insert(replica, slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_deps_overwrites_existing_entries() {
        let mut inst = Instance {
            replica: 1,
            slot: 0,
            seq: 1,
            deps: BTreeMap::from([(2, 3)]),
            status: Status::Initial,
            acks: 1,
            changed: false,
            ops: vec![],
        };
        inst.merge_deps(&BTreeMap::from([(2, 5), (3, 1)]));
        assert_eq!(inst.deps, BTreeMap::from([(2, 5), (3, 1)]));
    }

    #[test]
    fn status_ordering_follows_protocol_progression() {
        assert!(Status::Initial < Status::Preaccepted);
        assert!(Status::Preaccepted < Status::Accepted);
        assert!(Status::Accepted < Status::Committed);
        assert!(Status::Committed < Status::Executed);
    }
}
