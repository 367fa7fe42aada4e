//! The 2-D instance log.
//!
//! An instance is identified by `(replica, slot)`, where `replica` is the
//! id of the command leader and `slot` is the index into that leader's
//! sub-log. [`InstanceLog`] owns one [`ReplicaLog`] per known replica plus
//! the global `sequence` upper bound described in the data model.
//!
//! This crate has no knowledge of networking or the actor that drives it;
//! it is a pure, synchronous data structure so that its invariants can be
//! exercised directly by property tests.

use std::collections::HashMap;

use epaxos_types::{Instance, Operation, ReplicaId, Seq, Slot, Status};
use thiserror::Error;

/// Errors returned by [`InstanceLog`] operations.
///
/// `SlotBeyondNext` and `SlotOccupied` are both instances of the
/// `SlotOutOfOrder` error kind described in the design: they are kept as
/// distinct variants because callers (and tests) need to tell "instance
/// arrived ahead of the log" apart from "this slot is already filled".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LogError {
    #[error("unknown replica {0}")]
    UnknownReplica(ReplicaId),

    #[error("cannot insert into slot {attempted} when next slot is {expected}")]
    SlotBeyondNext { attempted: Slot, expected: Slot },

    #[error("there is already an instance in slot {attempted}")]
    SlotOccupied { attempted: Slot },

    #[error("no instance at slot {attempted} in replica {replica}'s log (next slot is {next})")]
    SlotNotFound {
        replica: ReplicaId,
        attempted: Slot,
        next: Slot,
    },

    #[error("sub-log for replica {0} is empty")]
    EmptySubLog(ReplicaId),
}

/// The append-only sequence of instances proposed by one replica, plus the
/// conflict cache used to compute dependencies in O(ops × replicas).
#[derive(Debug, Default, Clone)]
struct ReplicaLog {
    /// Highest slot in this sub-log containing an operation on a given key.
    conflicts: HashMap<Vec<u8>, Slot>,
    instances: Vec<Instance>,
}

/// The authoritative state of all proposed and committed instances across
/// the cluster, as seen by one replica.
#[derive(Debug, Clone)]
pub struct InstanceLog {
    logs: HashMap<ReplicaId, ReplicaLog>,
    sequence: Seq,
}

impl InstanceLog {
    /// Creates an empty log with one sub-log per peer in `replicas`.
    pub fn new(replicas: impl IntoIterator<Item = ReplicaId>) -> Self {
        let logs = replicas
            .into_iter()
            .map(|r| (r, ReplicaLog::default()))
            .collect();
        Self { logs, sequence: 0 }
    }

    /// The maximum `seq` ever assigned or observed by this log.
    pub fn sequence(&self) -> Seq {
        self.sequence
    }

    /// Raises `sequence` to `seq` if `seq` is larger. Used by
    /// `onPreacceptReply` to fold in sequence numbers reported by peers.
    pub fn observe_sequence(&mut self, seq: Seq) {
        if seq > self.sequence {
            self.sequence = seq;
        }
    }

    /// The slot the next instance proposed by `replica` would occupy.
    pub fn next_slot(&self, replica: ReplicaId) -> Result<Slot, LogError> {
        self.logs
            .get(&replica)
            .map(|log| log.instances.len() as Slot)
            .ok_or(LogError::UnknownReplica(replica))
    }

    /// The slot of the most recently applied instance in `replica`'s log.
    pub fn last_applied(&self, replica: ReplicaId) -> Result<Slot, LogError> {
        let log = self
            .logs
            .get(&replica)
            .ok_or(LogError::UnknownReplica(replica))?;
        log.instances
            .len()
            .checked_sub(1)
            .map(|i| i as Slot)
            .ok_or(LogError::EmptySubLog(replica))
    }

    /// Fetches the instance at `(replica, slot)`.
    pub fn get(&self, replica: ReplicaId, slot: Slot) -> Result<&Instance, LogError> {
        let log = self
            .logs
            .get(&replica)
            .ok_or(LogError::UnknownReplica(replica))?;
        log.instances
            .get(slot as usize)
            .ok_or(LogError::SlotNotFound {
                replica,
                attempted: slot,
                next: log.instances.len() as Slot,
            })
    }

    /// Fetches a mutable reference to the instance at `(replica, slot)`.
    pub fn get_mut(&mut self, replica: ReplicaId, slot: Slot) -> Result<&mut Instance, LogError> {
        let log = self
            .logs
            .get_mut(&replica)
            .ok_or(LogError::UnknownReplica(replica))?;
        let next = log.instances.len() as Slot;
        log.instances
            .get_mut(slot as usize)
            .ok_or(LogError::SlotNotFound {
                replica,
                attempted: slot,
                next,
            })
    }

    /// Creates a new instance proposed by `leader`, appends it into that
    /// replica's sub-log, and runs dependency/conflict bookkeeping on it.
    pub fn create(&mut self, leader: ReplicaId, ops: Vec<Operation>) -> Result<Instance, LogError> {
        let slot = self.next_slot(leader)?;
        self.sequence += 1;
        let inst = Instance {
            replica: leader,
            slot,
            seq: self.sequence,
            deps: Default::default(),
            status: Status::Initial,
            acks: 1,
            changed: false,
            ops,
        };
        self.logs.get_mut(&leader).expect("checked above").instances.push(inst);
        self.update_dependencies(leader, slot)?;
        self.update_conflicts(leader, slot)?;
        self.get(leader, slot).cloned()
    }

    /// Appends `inst` into its leader's sub-log, provided its slot is
    /// exactly the next one expected. Runs the same dependency/conflict
    /// bookkeeping as [`InstanceLog::create`].
    ///
    /// Returns the `changed` flag from [`InstanceLog::update_dependencies`],
    /// which `onPreacceptRequest` reports back to the proposer.
    pub fn insert(&mut self, inst: Instance) -> Result<bool, LogError> {
        let expected = self.next_slot(inst.replica)?;
        if inst.slot > expected {
            return Err(LogError::SlotBeyondNext {
                attempted: inst.slot,
                expected,
            });
        }
        if inst.slot < expected {
            return Err(LogError::SlotOccupied {
                attempted: inst.slot,
            });
        }

        let (replica, slot, seq) = (inst.replica, inst.slot, inst.seq);
        self.logs
            .get_mut(&replica)
            .expect("checked above")
            .instances
            .push(inst);
        self.observe_sequence(seq);
        let changed = self.update_dependencies(replica, slot)?;
        self.update_conflicts(replica, slot)?;
        tracing::trace!(replica, slot, changed, "inserted instance into log");
        Ok(changed)
    }

    /// For each operation in the instance at `(replica, slot)`, scans every
    /// sub-log's conflict cache and raises the instance's dependency on
    /// that sub-log to the highest conflicting slot found. Whenever a
    /// dependency is raised, also raises the instance's `seq` past the
    /// dependency's `seq`. Returns whether anything changed.
    pub fn update_dependencies(&mut self, replica: ReplicaId, slot: Slot) -> Result<bool, LogError> {
        let (ops, mut deps, mut seq) = {
            let inst = self.get(replica, slot)?;
            (inst.ops.clone(), inst.deps.clone(), inst.seq)
        };

        let mut changed = false;
        for (&other, log) in &self.logs {
            let mut candidate: Option<Slot> = None;
            for op in &ops {
                if let Some(&s) = log.conflicts.get(&op.key) {
                    candidate = Some(candidate.map_or(s, |c| c.max(s)));
                }
            }
            let Some(candidate_slot) = candidate else {
                continue;
            };
            let should_update = match deps.get(&other) {
                Some(&current) => candidate_slot > current,
                None => true,
            };
            if should_update {
                deps.insert(other, candidate_slot);
                changed = true;
                let dep_seq = self.logs[&other].instances[candidate_slot as usize].seq;
                if dep_seq >= seq {
                    seq = dep_seq + 1;
                }
                tracing::debug!(
                    replica,
                    slot,
                    dep_on = other,
                    dep_slot = candidate_slot,
                    seq,
                    "raised dependency"
                );
            }
        }

        if seq > self.sequence {
            self.sequence = seq;
            changed = true;
        }

        let inst = self.get_mut(replica, slot)?;
        inst.deps = deps;
        inst.seq = seq;
        Ok(changed)
    }

    /// For each operation in the instance at `(replica, slot)`, raises that
    /// replica's conflict cache entry for the operation's key to `slot`,
    /// unless it is already at least `slot`.
    pub fn update_conflicts(&mut self, replica: ReplicaId, slot: Slot) -> Result<(), LogError> {
        let keys: Vec<Vec<u8>> = self.get(replica, slot)?.ops.iter().map(|op| op.key.clone()).collect();
        let log = self
            .logs
            .get_mut(&replica)
            .ok_or(LogError::UnknownReplica(replica))?;
        for key in keys {
            let entry = log.conflicts.entry(key).or_insert(slot);
            if slot > *entry {
                *entry = slot;
            }
        }
        Ok(())
    }
}
