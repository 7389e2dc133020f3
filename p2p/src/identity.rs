use libp2p::identity::{ed25519, Keypair};
use libp2p::{Multiaddr, PeerId};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};
use thiserror::Error;

/// A named libp2p identity that a node runs under.
///
/// Only the 32-byte ed25519 seed is stored, together with the peer id it yields. The peer id is re-derived on load and
/// a record whose key and peer id disagree is refused.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "IdentityRecord", into = "IdentityRecord")]
pub struct PeerIdentity {
    name: String,
    keypair: ed25519::Keypair,
    peer_id: PeerId,
}

#[derive(Serialize, Deserialize)]
struct IdentityRecord {
    name: String,
    seed: String,
    peer_id: String,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Invalid identity key: {0}")]
    InvalidKey(String),
    #[error("Identity {name} claims peer id {claimed} but its key belongs to {derived}")]
    PeerMismatch { name: String, claimed: String, derived: PeerId },
}

impl PeerIdentity {
    /// Create a new identity with the given name and a fresh ed25519 keypair.
    pub fn random_with_name<S: Into<String>>(name: S) -> Self {
        Self::from_keypair(name, ed25519::Keypair::generate())
    }

    /// Create a new identity with a random name and keypair.
    pub fn random() -> Self {
        Self::random_with_name(format!("peer-{:08x}", rand::random::<u32>()))
    }

    fn from_keypair<S: Into<String>>(name: S, keypair: ed25519::Keypair) -> Self {
        let peer_id = Keypair::from(keypair.clone()).public().to_peer_id();
        PeerIdentity { name: name.into(), keypair, peer_id }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn take_keypair(self) -> Keypair {
        Keypair::from(self.keypair)
    }

    /// The address other peers dial to reach this identity at `listen_address`.
    pub fn dial_address(&self, listen_address: &Multiaddr) -> Multiaddr {
        listen_address.clone().with_p2p(self.peer_id).unwrap_or_else(|addr| addr)
    }
}

impl TryFrom<IdentityRecord> for PeerIdentity {
    type Error = IdentityError;

    fn try_from(record: IdentityRecord) -> Result<Self, Self::Error> {
        let mut seed = hex::decode(&record.seed).map_err(|e| IdentityError::InvalidKey(e.to_string()))?;
        let secret =
            ed25519::SecretKey::try_from_bytes(&mut seed).map_err(|e| IdentityError::InvalidKey(e.to_string()))?;
        let identity = PeerIdentity::from_keypair(record.name, ed25519::Keypair::from(secret));
        if identity.peer_id.to_base58() != record.peer_id {
            return Err(IdentityError::PeerMismatch {
                name: identity.name,
                claimed: record.peer_id,
                derived: identity.peer_id,
            });
        }
        Ok(identity)
    }
}

impl From<PeerIdentity> for IdentityRecord {
    fn from(identity: PeerIdentity) -> Self {
        IdentityRecord {
            seed: hex::encode(identity.keypair.secret().as_ref()),
            peer_id: identity.peer_id.to_base58(),
            name: identity.name,
        }
    }
}

impl Display for PeerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.peer_id)
    }
}

impl Debug for PeerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerIdentity({self})")
    }
}

impl PartialEq for PeerIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.peer_id == other.peer_id
    }
}
