use crate::helpers::{deserialize_peer, serialize_peer};
use libp2p::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// A deal identifier, assigned by the client. Ids are handed out in increasing order and never reused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DealId(u64);

impl DealId {
    pub fn new(id: u64) -> Self {
        DealId(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> DealId {
        DealId(self.0 + 1)
    }
}

impl From<u64> for DealId {
    fn from(id: u64) -> Self {
        DealId(id)
    }
}

impl Display for DealId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Provider-side composite key. Deal ids are only unique per client, so the provider qualifies them with the peer it
/// is sending to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderDealIdentifier {
    #[serde(serialize_with = "serialize_peer", deserialize_with = "deserialize_peer")]
    pub receiver: PeerId,
    pub deal_id: DealId,
}

impl ProviderDealIdentifier {
    pub fn new(receiver: PeerId, deal_id: DealId) -> Self {
        Self { receiver, deal_id }
    }
}

impl Display for ProviderDealIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.receiver, self.deal_id)
    }
}

/// Identifies a data-transfer channel. The initiator is the peer that opened the channel (the client for a pull).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferChannelId {
    #[serde(serialize_with = "serialize_peer", deserialize_with = "deserialize_peer")]
    pub initiator: PeerId,
    #[serde(serialize_with = "serialize_peer", deserialize_with = "deserialize_peer")]
    pub responder: PeerId,
    pub id: u64,
}

impl TransferChannelId {
    pub fn new(initiator: PeerId, responder: PeerId, id: u64) -> Self {
        Self { initiator, responder, id }
    }

    /// The remote end of the channel, as seen from `me`.
    pub fn other_party(&self, me: &PeerId) -> PeerId {
        if &self.initiator == me {
            self.responder
        } else {
            self.initiator
        }
    }
}

impl Display for TransferChannelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.initiator, self.responder, self.id)
    }
}
