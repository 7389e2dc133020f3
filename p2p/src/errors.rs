use futures::channel::{mpsc, oneshot};
use libp2p::swarm::DialError;
use libp2p::TransportError;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PeerConnectionError {
    #[error("Could not set up the transport. {0}")]
    TransportError(#[from] TransportError<std::io::Error>),
    #[error("Noise handshake configuration failed. {0}")]
    NoiseError(#[from] libp2p::noise::Error),
    #[error("Could not dial the peer. {0}")]
    DialError(#[from] DialError),
    #[error("The connection to the peer failed. {0}")]
    ConnectionFailed(String),
    #[error("The peer address must end with a /p2p/<peer id> component")]
    MissingPeerId,
    #[error("The listener stopped before it was bound. {0}")]
    ListenerFailed(String),
    #[error("The network event loop is no longer running. {0}")]
    EventLoopStopped(#[from] mpsc::SendError),
    #[error("The network event loop dropped the request")]
    RequestDropped(#[from] oneshot::Canceled),
    #[error("The remote peer could not answer. {0}")]
    Remote(#[from] RemoteServerError),
}

impl From<Infallible> for PeerConnectionError {
    fn from(e: Infallible) -> Self {
        match e {}
    }
}

/// An error code from the peer server, akin to an HTTP error code.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteServerError {
    #[error("The remote server is shutting down and cannot handle any new requests. Try again later.")]
    ServerShuttingDown,
    #[error("The request did not reach the peer due to a network issue.")]
    NetworkError,
    #[error("The peer answered with a response of the wrong type.")]
    UnexpectedResponse,
    #[error("An internal error occurred on the remote server. {0}")]
    InternalError(String),
}

impl RemoteServerError {
    pub fn internal(msg: impl Into<String>) -> Self {
        RemoteServerError::InternalError(msg.into())
    }
}
