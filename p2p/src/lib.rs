//! libp2p networking for retrieval peers. Carries the query protocol, through which a client learns whether a
//! provider holds a payload and on what terms it will serve it.

mod behaviour;
pub mod errors;
mod event_loop;
mod identity;
pub mod message_types;
mod network_client;
pub mod query_server;

pub use event_loop::EventLoop;
pub use identity::{IdentityError, PeerIdentity};
pub use message_types::{ClientCommand, PeerConnectionEvent, RetrievalRequest, RetrievalResponse};
pub use network_client::{new_network, peer_id_of, RetrievalAPI, IDENTIFY_PROTOCOL, QUERY_PROTOCOL};
pub use query_server::{serve_queries, QueryHandler};
