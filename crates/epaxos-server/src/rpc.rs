//! The tonic-generated `epaxos.Epaxos` service, implemented against a
//! replica's event channel. Every RPC is just: convert, dispatch,
//! await the one-shot reply, convert back.

use std::pin::Pin;

use async_stream::stream;
use epaxos_core::Event;
use epaxos_wire::proto::epaxos_server::Epaxos;
use epaxos_wire::proto::{PeerReply as WirePeerReply, PeerRequest as WirePeerRequest, ProposeReply, ProposeRequest};
use futures::Stream;
use tokio::sync::{mpsc, oneshot};
use tonic::{Request, Response, Status, Streaming};

pub struct EpaxosService {
    events: mpsc::Sender<Event>,
}

impl EpaxosService {
    pub fn new(events: mpsc::Sender<Event>) -> Self {
        Self { events }
    }

    async fn dispatch(&self, event: Event) -> Result<(), Status> {
        self.events
            .send(event)
            .await
            .map_err(|_| Status::unavailable("replica event loop has shut down"))
    }
}

type ConsensusResponseStream = Pin<Box<dyn Stream<Item = Result<WirePeerReply, Status>> + Send>>;

#[tonic::async_trait]
impl Epaxos for EpaxosService {
    async fn propose(
        &self,
        request: Request<ProposeRequest>,
    ) -> Result<Response<ProposeReply>, Status> {
        let payload = request
            .into_inner()
            .try_into()
            .map_err(|e: epaxos_wire::WireError| Status::invalid_argument(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.dispatch(Event::ProposeRequest(payload, tx)).await?;

        let reply = rx
            .await
            .map_err(|_| Status::internal("replica dropped the propose reply"))?;
        Ok(Response::new(reply.into()))
    }

    type ConsensusStream = ConsensusResponseStream;

    async fn consensus(
        &self,
        request: Request<Streaming<WirePeerRequest>>,
    ) -> Result<Response<Self::ConsensusStream>, Status> {
        let mut inbound = request.into_inner();
        let events = self.events.clone();
        // One request in flight at a time: the peer's messenger only ever
        // sends the next request after it has received the previous reply
        // (strict send-then-recv alternation), so processing this stream
        // in order is both sufficient and the server-side backpressure
        // point described for this RPC.
        let output = stream! {
            loop {
                let wire = match inbound.message().await {
                    Ok(Some(wire)) => wire,
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                };
                let domain = match epaxos_core::PeerRequest::try_from(wire) {
                    Ok(domain) => domain,
                    Err(e) => {
                        yield Err(Status::invalid_argument(e.to_string()));
                        break;
                    }
                };
                match dispatch_peer_request(&events, domain).await {
                    Ok(reply) => yield Ok(WirePeerReply::from(reply)),
                    Err(status) => {
                        yield Err(status);
                        break;
                    }
                }
            }
        };
        Ok(Response::new(Box::pin(output)))
    }
}

async fn dispatch_peer_request(
    events: &mpsc::Sender<Event>,
    req: epaxos_core::PeerRequest,
) -> Result<epaxos_core::PeerReply, Status> {
    match req {
        epaxos_core::PeerRequest::Preaccept(inst) => {
            let (tx, rx) = oneshot::channel();
            events
                .send(Event::PreacceptRequest(
                    epaxos_core::PreacceptRequestPayload { inst },
                    tx,
                ))
                .await
                .map_err(|_| Status::unavailable("replica event loop has shut down"))?;
            let payload = rx
                .await
                .map_err(|_| Status::internal("replica dropped the preaccept reply"))?;
            Ok(epaxos_core::PeerReply::Preaccept(payload))
        }
        epaxos_core::PeerRequest::Accept(inst) => {
            let (tx, rx) = oneshot::channel();
            events
                .send(Event::AcceptRequest(
                    epaxos_core::AcceptRequestPayload { inst },
                    tx,
                ))
                .await
                .map_err(|_| Status::unavailable("replica event loop has shut down"))?;
            let payload = rx
                .await
                .map_err(|_| Status::internal("replica dropped the accept reply"))?;
            Ok(epaxos_core::PeerReply::Accept(payload))
        }
        epaxos_core::PeerRequest::Commit(inst) => {
            let (tx, rx) = oneshot::channel();
            events
                .send(Event::CommitRequest(
                    epaxos_core::CommitRequestPayload { inst },
                    tx,
                ))
                .await
                .map_err(|_| Status::unavailable("replica event loop has shut down"))?;
            let payload = rx
                .await
                .map_err(|_| Status::internal("replica dropped the commit reply"))?;
            Ok(epaxos_core::PeerReply::Commit(payload))
        }
        epaxos_core::PeerRequest::Beacon => {
            let (tx, rx) = oneshot::channel();
            events
                .send(Event::BeaconRequest(tx))
                .await
                .map_err(|_| Status::unavailable("replica event loop has shut down"))?;
            let payload = rx
                .await
                .map_err(|_| Status::internal("replica dropped the beacon reply"))?;
            Ok(epaxos_core::PeerReply::Beacon(payload))
        }
    }
}
