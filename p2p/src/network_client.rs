use crate::behaviour::RetrievalBehaviour;
use crate::errors::PeerConnectionError;
use crate::{ClientCommand, EventLoop, PeerConnectionEvent, RetrievalResponse};
use futures::channel::{mpsc, oneshot};
use futures::SinkExt;
use futures::Stream;
use libp2p::identity::Keypair;
use libp2p::multiaddr::Protocol;
use libp2p::request_response::ResponseChannel;
use libp2p::{
    identify, noise,
    request_response::{json, Config as RequestResponseConfig, ProtocolSupport},
    tcp, yamux, Multiaddr, PeerId, StreamProtocol,
};
use libretrieval::messages::{Query, QueryResponse};
use log::*;
use std::time::Duration;

pub const IDENTIFY_PROTOCOL: &str = "/retrieval/id/1";
pub const QUERY_PROTOCOL: &str = "/retrieval/qry/1";

/// Builds a swarm for `key` and returns a [`RetrievalAPI`] handle, the stream of inbound requests, and the
/// [`EventLoop`] that must be spawned for either of them to make progress.
pub fn new_network(
    key: Keypair,
) -> Result<(RetrievalAPI, impl Stream<Item = PeerConnectionEvent>, EventLoop), PeerConnectionError> {
    let swarm = libp2p::SwarmBuilder::with_existing_identity(key)
        .with_tokio()
        .with_tcp(tcp::Config::default(), noise::Config::new, yamux::Config::default)?
        .with_behaviour(|key| {
            let config = identify::Config::new(IDENTIFY_PROTOCOL.to_string(), key.public())
                .with_interval(Duration::from_secs(5 * 60));
            let identify = identify::Behaviour::new(config);
            let config = RequestResponseConfig::default().with_request_timeout(Duration::from_secs(30));
            let protocols = [(StreamProtocol::new(QUERY_PROTOCOL), ProtocolSupport::Full)];
            let json = json::Behaviour::new(protocols, config);
            RetrievalBehaviour { identify, json }
        })?
        .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(60)))
        .build();

    let (command_sender, command_receiver) = mpsc::channel(0);
    let (event_sender, event_receiver) = mpsc::channel(0);

    Ok((RetrievalAPI { sender: command_sender }, event_receiver, EventLoop::new(swarm, command_receiver, event_sender)))
}

/// A sender interface to the network event loop. It can be cheaply cloned and shared among tasks.
///
/// Every method creates a one-shot channel, sends a [`ClientCommand`] carrying the sending half to the
/// [`EventLoop`], and waits for the answer. The handle itself does no work.
#[derive(Clone)]
pub struct RetrievalAPI {
    sender: mpsc::Sender<ClientCommand>,
}

impl RetrievalAPI {
    /// Listen for incoming connections on the given address. Returns the address actually bound, which differs from
    /// `addr` when it asks for port 0.
    pub async fn start_listening(&mut self, addr: Multiaddr) -> Result<Multiaddr, PeerConnectionError> {
        let (sender, receiver) = oneshot::channel();
        self.sender.send(ClientCommand::StartListening { addr, sender }).await?;
        receiver.await?
    }

    /// Connects to the provider at `peer_addr`, which must end in `/p2p/<peer id>`, and returns that peer id.
    /// Dialling a peer that is already connected succeeds at once.
    pub async fn dial(&mut self, peer_addr: Multiaddr) -> Result<PeerId, PeerConnectionError> {
        let peer_id = peer_id_of(&peer_addr)?;
        let (sender, receiver) = oneshot::channel();
        self.sender.send(ClientCommand::Dial { peer_id, peer_addr, sender }).await?;
        receiver.await??;
        Ok(peer_id)
    }

    pub async fn connected_peers(&mut self) -> Result<Vec<PeerId>, PeerConnectionError> {
        let (sender, receiver) = oneshot::channel();
        self.sender.send(ClientCommand::ConnectedPeers { sender }).await?;
        let peers = receiver.await?;
        Ok(peers)
    }

    /// Asks a connected provider whether it can serve `query`, and on what terms.
    pub async fn query(&mut self, peer_id: PeerId, query: Query) -> Result<QueryResponse, PeerConnectionError> {
        let (sender, receiver) = oneshot::channel();
        trace!("Querying {peer_id} for {}", query.payload_cid);
        self.sender.send(ClientCommand::Query { peer_id, query, sender }).await?;
        let response = receiver.await??;
        Ok(response)
    }

    pub async fn send_response_to_peer(
        &mut self,
        res: RetrievalResponse,
        return_chute: ResponseChannel<RetrievalResponse>,
    ) -> Result<(), PeerConnectionError> {
        self.sender.send(ClientCommand::ResponseToRequest { res, return_chute }).await?;
        Ok(())
    }

    pub async fn shutdown(mut self) -> Result<bool, PeerConnectionError> {
        let (sender, receiver) = oneshot::channel();
        self.sender.send(ClientCommand::Shutdown(sender)).await?;
        let result = receiver.await?;
        Ok(result)
    }
}

/// The peer id in the trailing `/p2p/..` component of `addr`.
pub fn peer_id_of(addr: &Multiaddr) -> Result<PeerId, PeerConnectionError> {
    match addr.iter().last() {
        Some(Protocol::P2p(p)) => Ok(p),
        _ => Err(PeerConnectionError::MissingPeerId),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dial_addresses_need_a_peer_id() {
        let peer = Keypair::generate_ed25519().public().to_peer_id();
        let bare: Multiaddr = "/ip4/127.0.0.1/tcp/7740".parse().unwrap();
        assert!(matches!(peer_id_of(&bare), Err(PeerConnectionError::MissingPeerId)));
        let full = bare.with(Protocol::P2p(peer));
        assert_eq!(peer_id_of(&full).unwrap(), peer);
    }
}
