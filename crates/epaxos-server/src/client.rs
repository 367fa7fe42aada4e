//! A minimal single-target client for the `Epaxos.Propose` RPC. Used by
//! integration tests to drive a real server over the wire; no retry
//! budget, load balancing, or multi-endpoint selection — a real client
//! needs its own connection-selection layer, out of scope here.

use epaxos_types::Operation;
use thiserror::Error;
use tonic::transport::Channel;

use epaxos_wire::proto::epaxos_client::EpaxosClient as WireClient;
use epaxos_wire::proto::ProposeRequest;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {0}: {1}")]
    Connect(String, String),

    #[error("propose failed: {0}")]
    Rpc(#[from] tonic::Status),
}

/// A reply to a single `Propose` call, already converted out of its wire
/// representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposeOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Talks to exactly one replica; does not retry, does not discover peers.
pub struct EpaxosClient {
    inner: WireClient<Channel>,
}

impl EpaxosClient {
    /// Dials `target` (e.g. `"http://127.0.0.1:50051"`).
    pub async fn connect(target: impl Into<String>) -> Result<Self, ClientError> {
        let target = target.into();
        let inner = WireClient::connect(target.clone())
            .await
            .map_err(|e| ClientError::Connect(target, e.to_string()))?;
        Ok(Self { inner })
    }

    /// Proposes a single operation, identified by `identity` (opaque,
    /// caller-chosen, used by the replica only for duplicate detection).
    pub async fn propose(
        &mut self,
        identity: impl Into<String>,
        op: Operation,
    ) -> Result<ProposeOutcome, ClientError> {
        let request = ProposeRequest {
            identity: identity.into(),
            op: Some(op.into()),
        };
        let reply = self.inner.propose(request).await?.into_inner();
        Ok(ProposeOutcome {
            success: reply.success,
            error: (!reply.error.is_empty()).then_some(reply.error),
            key: reply.key,
            value: reply.value,
        })
    }
}
