use crate::errors::{PeerConnectionError, RemoteServerError};
use futures::channel::oneshot;
use libp2p::request_response::ResponseChannel;
use libp2p::{Multiaddr, PeerId};
use libretrieval::messages::{Query, QueryResponse};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Requests one retrieval peer can make of another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RetrievalRequest {
    /// Can the provider serve this payload, and on what terms?
    Query(Query),
}

/// The answer to a [`RetrievalRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RetrievalResponse {
    Query(Result<QueryResponse, RemoteServerError>),
    Error(String),
}

impl Display for RetrievalResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RetrievalResponse::Query(Ok(response)) => write!(f, "Query response: {response}"),
            RetrievalResponse::Query(Err(e)) => write!(f, "Remote server error: {e} while answering a query"),
            RetrievalResponse::Error(err) => write!(f, "Error: {err}"),
        }
    }
}

/// Commands sent from a [`crate::RetrievalAPI`] handle to the [`crate::EventLoop`].
#[derive(Debug)]
pub enum ClientCommand {
    /// Start listening on a given address. Executed via [`crate::RetrievalAPI::start_listening`].
    StartListening { addr: Multiaddr, sender: oneshot::Sender<Result<Multiaddr, PeerConnectionError>> },
    /// Dial a peer at a given address. Executed via [`crate::RetrievalAPI::dial`].
    Dial { peer_id: PeerId, peer_addr: Multiaddr, sender: oneshot::Sender<Result<(), PeerConnectionError>> },
    ConnectedPeers { sender: oneshot::Sender<Vec<PeerId>> },
    /// Send a query to a provider. Executed via [`crate::RetrievalAPI::query`].
    Query { peer_id: PeerId, query: Query, sender: oneshot::Sender<Result<QueryResponse, RemoteServerError>> },
    /// Generalised response message to peers for all requests.
    ResponseToRequest { res: RetrievalResponse, return_chute: ResponseChannel<RetrievalResponse> },
    Shutdown(oneshot::Sender<bool>),
}

#[derive(Debug)]
pub enum PeerConnectionEvent {
    InboundRequest { peer: PeerId, request: RetrievalRequest, response: ResponseChannel<RetrievalResponse> },
}
