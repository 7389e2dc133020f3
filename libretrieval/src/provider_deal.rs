use crate::amount::TokenAmount;
use crate::deal_id::{DealId, ProviderDealIdentifier, TransferChannelId};
use crate::helpers::{deserialize_peer, serialize_peer};
use crate::messages::DealProposal;
use crate::node::PieceInfo;
use crate::status::DealStatus;
use libp2p::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// How the provider exchanges messages and data with the client for a deal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DealTransport {
    /// Messages and blocks over a dedicated deal stream. The provider state machine drives every step.
    Stream,
    /// Blocks over a generic data-transfer channel. Payments arrive through revalidation hooks.
    #[default]
    DataTransfer,
}

impl Display for DealTransport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DealTransport::Stream => write!(f, "deal stream"),
            DealTransport::DataTransfer => write!(f, "data transfer"),
        }
    }
}

/// Everything the provider knows about one deal it is serving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDealState {
    pub proposal: DealProposal,
    pub status: DealStatus,
    /// The client receiving the data.
    #[serde(serialize_with = "serialize_peer", deserialize_with = "deserialize_peer")]
    pub receiver: PeerId,
    pub total_sent: u64,
    pub funds_received: TokenAmount,
    pub current_interval: u64,
    pub message: String,
    pub channel_id: Option<TransferChannelId>,
    pub piece_info: Option<PieceInfo>,
    pub unseal_price: TokenAmount,
    pub legacy_protocol: bool,
    pub transport: DealTransport,
}

impl ProviderDealState {
    pub fn new(proposal: DealProposal, receiver: PeerId, transport: DealTransport) -> Self {
        let unseal_price = proposal.params.unseal_price.clone();
        let current_interval = proposal.params.payment_interval;
        ProviderDealState {
            proposal,
            status: DealStatus::New,
            receiver,
            total_sent: 0,
            funds_received: TokenAmount::zero(),
            current_interval,
            message: String::new(),
            channel_id: None,
            piece_info: None,
            unseal_price,
            legacy_protocol: false,
            transport,
        }
    }

    pub fn with_channel(mut self, channel_id: TransferChannelId) -> Self {
        self.channel_id = Some(channel_id);
        self
    }

    pub fn with_legacy_protocol(mut self, legacy: bool) -> Self {
        self.legacy_protocol = legacy;
        self
    }

    pub fn with_piece_info(mut self, piece_info: PieceInfo) -> Self {
        self.piece_info = Some(piece_info);
        self
    }

    pub fn id(&self) -> DealId {
        self.proposal.id
    }

    pub fn identifier(&self) -> ProviderDealIdentifier {
        ProviderDealIdentifier::new(self.receiver, self.proposal.id)
    }

    pub fn price_per_byte(&self) -> &TokenAmount {
        &self.proposal.params.price_per_byte
    }

    /// The number of bytes the funds received so far pay for, once the unseal price has been covered.
    pub fn total_paid_for(&self) -> u64 {
        paid_for(&self.funds_received, &self.unseal_price, self.price_per_byte(), self.total_sent)
    }

    /// Bytes sent that have not been paid for.
    pub fn unpaid_bytes(&self) -> u64 {
        self.total_sent.checked_sub(self.total_paid_for()).unwrap_or(0)
    }

    /// `total_sent * price + unseal_price - funds_received`, or zero when fully paid up.
    pub fn payment_owed(&self) -> TokenAmount {
        payment_owed(&self.funds_received, &self.unseal_price, self.price_per_byte(), self.total_sent)
    }
}

/// Bytes covered by `funds` after the unseal price is deducted. With a zero price every byte sent is paid for.
pub(crate) fn paid_for(funds: &TokenAmount, unseal_price: &TokenAmount, price: &TokenAmount, total_sent: u64) -> u64 {
    funds.saturating_sub(unseal_price).bytes_at(price).unwrap_or(total_sent)
}

pub(crate) fn payment_owed(
    funds: &TokenAmount,
    unseal_price: &TokenAmount,
    price: &TokenAmount,
    total_sent: u64,
) -> TokenAmount {
    (price.for_bytes(total_sent) + unseal_price.clone()).saturating_sub(funds)
}
