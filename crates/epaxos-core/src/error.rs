use epaxos_log::LogError;
use thiserror::Error;

/// Errors that can terminate the replica's event loop.
///
/// Transport failures are deliberately absent here: the messenger recovers
/// from those locally (see [`crate::messenger::TransportError`]) and never
/// surfaces them to the actor.
#[derive(Debug, Error)]
pub enum ReplicaError {
    #[error(transparent)]
    Log(#[from] LogError),

    #[error("no peers configured")]
    NoNetwork,

    #[error("unknown event type")]
    UnknownEventType,
}
