use crate::behaviour::{RetrievalBehaviour, RetrievalBehaviourEvent};
use crate::errors::{PeerConnectionError, RemoteServerError};
use crate::message_types::{ClientCommand, PeerConnectionEvent, RetrievalRequest, RetrievalResponse};
use futures::channel::{mpsc, oneshot};
use futures::{SinkExt, StreamExt};
use libp2p::core::transport::ListenerId;
use libp2p::request_response::{self, Message, OutboundRequestId};
use libp2p::swarm::SwarmEvent;
use libp2p::{identify, Multiaddr, PeerId, Swarm};
use libretrieval::messages::QueryResponse;
use log::*;
use std::collections::HashMap;

type QueryReply = oneshot::Sender<Result<QueryResponse, RemoteServerError>>;

/// Drives the libp2p swarm. Commands arrive from [`crate::RetrievalAPI`] handles; inbound requests are passed on as
/// [`PeerConnectionEvent`]s.
pub struct EventLoop {
    swarm: Swarm<RetrievalBehaviour>,
    command_receiver: mpsc::Receiver<ClientCommand>,
    event_sender: mpsc::Sender<PeerConnectionEvent>,
    pending_listens: HashMap<ListenerId, oneshot::Sender<Result<Multiaddr, PeerConnectionError>>>,
    pending_dials: HashMap<PeerId, Vec<oneshot::Sender<Result<(), PeerConnectionError>>>>,
    pending_queries: HashMap<OutboundRequestId, QueryReply>,
}

impl EventLoop {
    pub fn new(
        swarm: Swarm<RetrievalBehaviour>,
        command_receiver: mpsc::Receiver<ClientCommand>,
        event_sender: mpsc::Sender<PeerConnectionEvent>,
    ) -> Self {
        Self {
            swarm,
            command_receiver,
            event_sender,
            pending_listens: HashMap::new(),
            pending_dials: HashMap::new(),
            pending_queries: HashMap::new(),
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => self.handle_swarm_event(event).await,
                command = self.command_receiver.next() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => {
                        debug!("All network clients dropped. Stopping the event loop.");
                        break;
                    }
                },
            }
        }
    }

    async fn handle_swarm_event(&mut self, event: SwarmEvent<RetrievalBehaviourEvent>) {
        match event {
            SwarmEvent::Behaviour(RetrievalBehaviourEvent::Json(event)) => self.handle_json_event(event).await,
            SwarmEvent::Behaviour(RetrievalBehaviourEvent::Identify(event)) => {
                if let identify::Event::Received { peer_id, info, .. } = event {
                    trace!("Identified {peer_id} running {}", info.protocol_version);
                }
            }
            SwarmEvent::NewListenAddr { listener_id, address } => {
                info!("Listening on {address}");
                if let Some(sender) = self.pending_listens.remove(&listener_id) {
                    let _ = sender.send(Ok(address));
                }
            }
            SwarmEvent::ListenerClosed { listener_id, reason, .. } => {
                if let Some(sender) = self.pending_listens.remove(&listener_id) {
                    let reason = match reason {
                        Ok(()) => "listener closed".to_string(),
                        Err(e) => e.to_string(),
                    };
                    let _ = sender.send(Err(PeerConnectionError::ListenerFailed(reason)));
                }
            }
            SwarmEvent::ListenerError { listener_id, error } => {
                warn!("Listener {listener_id:?} failed: {error}");
                if let Some(sender) = self.pending_listens.remove(&listener_id) {
                    let _ = sender.send(Err(PeerConnectionError::ListenerFailed(error.to_string())));
                }
            }
            SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                debug!("Connected to {peer_id} at {}", endpoint.get_remote_address());
                for sender in self.pending_dials.remove(&peer_id).unwrap_or_default() {
                    let _ = sender.send(Ok(()));
                }
            }
            SwarmEvent::OutgoingConnectionError { peer_id: Some(peer_id), error, .. } => {
                warn!("Could not connect to {peer_id}: {error}");
                if let Some(senders) = self.pending_dials.remove(&peer_id) {
                    let reason = error.to_string();
                    for sender in senders {
                        let _ = sender.send(Err(PeerConnectionError::ConnectionFailed(reason.clone())));
                    }
                }
            }
            SwarmEvent::ConnectionClosed { peer_id, cause, .. } => {
                trace!("Connection to {peer_id} closed. {cause:?}");
            }
            _ => {}
        }
    }

    async fn handle_json_event(&mut self, event: request_response::Event<RetrievalRequest, RetrievalResponse>) {
        match event {
            request_response::Event::Message { peer, message: Message::Request { request, channel, .. }, .. } => {
                debug!("Inbound request from {peer}");
                let event = PeerConnectionEvent::InboundRequest { peer, request, response: channel };
                if let Err(e) = self.event_sender.send(event).await {
                    error!("Could not forward the request from {peer}: {e}");
                }
            }
            request_response::Event::Message { peer, message: Message::Response { request_id, response }, .. } => {
                let Some(sender) = self.pending_queries.remove(&request_id) else {
                    warn!("Response from {peer} for an unknown request {request_id}");
                    return;
                };
                let result = match response {
                    RetrievalResponse::Query(result) => result,
                    RetrievalResponse::Error(e) => Err(RemoteServerError::internal(e)),
                };
                if sender.send(result).is_err() {
                    warn!("Failed to pass on the response to request {request_id}. Receiver dropped.");
                }
            }
            request_response::Event::OutboundFailure { peer, request_id, error, .. } => {
                warn!("Request {request_id} to {peer} failed: {error}");
                if let Some(sender) = self.pending_queries.remove(&request_id) {
                    let _ = sender.send(Err(RemoteServerError::NetworkError));
                }
            }
            request_response::Event::InboundFailure { peer, request_id, error, .. } => {
                warn!("Inbound request {request_id} from {peer} failed: {error}");
            }
            request_response::Event::ResponseSent { peer, request_id, .. } => {
                trace!("Response to request {request_id} sent to {peer}");
            }
        }
    }

    /// Carries out `command`. Returns false once the loop has been asked to stop.
    fn handle_command(&mut self, command: ClientCommand) -> bool {
        match command {
            ClientCommand::StartListening { addr, sender } => match self.swarm.listen_on(addr) {
                Ok(listener_id) => {
                    self.pending_listens.insert(listener_id, sender);
                }
                Err(e) => {
                    let _ = sender.send(Err(e.into()));
                }
            },
            ClientCommand::Dial { peer_id, peer_addr, sender } => {
                if self.swarm.is_connected(&peer_id) {
                    let _ = sender.send(Ok(()));
                    return true;
                }
                match self.swarm.dial(peer_addr) {
                    Ok(()) => self.pending_dials.entry(peer_id).or_default().push(sender),
                    Err(e) => {
                        let _ = sender.send(Err(e.into()));
                    }
                }
            }
            ClientCommand::ConnectedPeers { sender } => {
                let peers = self.swarm.connected_peers().cloned().collect();
                let _ = sender.send(peers);
            }
            ClientCommand::Query { peer_id, query, sender } => {
                let request_id = self.swarm.behaviour_mut().json.send_request(&peer_id, RetrievalRequest::Query(query));
                self.pending_queries.insert(request_id, sender);
            }
            ClientCommand::ResponseToRequest { res, return_chute } => {
                if let Err(res) = self.swarm.behaviour_mut().json.send_response(return_chute, res) {
                    warn!("Could not send response, the connection is gone: {res}");
                }
            }
            ClientCommand::Shutdown(sender) => {
                info!("Network event loop shutting down");
                self.abandon_pending();
                let _ = sender.send(true);
                return false;
            }
        }
        true
    }

    fn abandon_pending(&mut self) {
        for (_, sender) in self.pending_queries.drain() {
            let _ = sender.send(Err(RemoteServerError::ServerShuttingDown));
        }
        self.pending_dials.clear();
        self.pending_listens.clear();
    }
}
