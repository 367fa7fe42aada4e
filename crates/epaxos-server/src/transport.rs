//! The gRPC-backed [`PeerTransport`]: dials a peer, opens the
//! `Consensus` bidirectional stream, and translates it into the
//! `PeerRequest`/`PeerReply` pairs the messenger speaks.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use epaxos_core::{PeerReply, PeerRequest, PeerTransport, TransportError};
use epaxos_types::ReplicaId;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{Channel, Endpoint};
use tonic::Streaming;

use epaxos_wire::proto::epaxos_client::EpaxosClient;

/// Outbound queue feeding the request half of the `Consensus` stream.
/// Small: a peer's messenger already bounds how much can be in flight.
const STREAM_QUEUE_CAPACITY: usize = 64;

pub struct GrpcPeerTransport {
    peer: ReplicaId,
    address: SocketAddr,
    timeout: Duration,
    outbound: Option<mpsc::Sender<epaxos_wire::proto::PeerRequest>>,
    inbound: Option<Streaming<epaxos_wire::proto::PeerReply>>,
}

impl GrpcPeerTransport {
    pub fn new(peer: ReplicaId, address: SocketAddr, timeout: Duration) -> Self {
        Self {
            peer,
            address,
            timeout,
            outbound: None,
            inbound: None,
        }
    }
}

#[async_trait]
impl PeerTransport for GrpcPeerTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let endpoint = Endpoint::from_shared(format!("http://{}", self.address))
            .map_err(|e| TransportError::Dial(self.peer, e.to_string()))?
            .connect_timeout(self.timeout);

        let channel: Channel = endpoint
            .connect()
            .await
            .map_err(|e| TransportError::Dial(self.peer, e.to_string()))?;

        let mut client = EpaxosClient::new(channel);
        let (tx, rx) = mpsc::channel(STREAM_QUEUE_CAPACITY);
        let response = client
            .consensus(ReceiverStream::new(rx))
            .await
            .map_err(|e| TransportError::Dial(self.peer, e.to_string()))?;

        self.outbound = Some(tx);
        self.inbound = Some(response.into_inner());

        self.send(PeerRequest::Beacon).await?;
        Ok(())
    }

    async fn send(&mut self, req: PeerRequest) -> Result<(), TransportError> {
        let tx = self
            .outbound
            .as_ref()
            .ok_or_else(|| TransportError::Send(self.peer, "not connected".to_string()))?;
        tx.send(req.into())
            .await
            .map_err(|e| TransportError::Send(self.peer, e.to_string()))
    }

    async fn recv(&mut self) -> Result<PeerReply, TransportError> {
        let inbound = self
            .inbound
            .as_mut()
            .ok_or_else(|| TransportError::Recv(self.peer, "not connected".to_string()))?;

        match inbound.message().await {
            Ok(Some(wire)) => wire
                .try_into()
                .map_err(|e: epaxos_wire::WireError| TransportError::Recv(self.peer, e.to_string())),
            Ok(None) => Err(TransportError::Recv(self.peer, "stream closed".to_string())),
            Err(status) => Err(TransportError::Recv(self.peer, status.to_string())),
        }
    }
}
