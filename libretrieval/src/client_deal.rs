use crate::amount::TokenAmount;
use crate::deal_id::{DealId, TransferChannelId};
use crate::helpers::{deserialize_opt_cid, deserialize_peer, serialize_opt_cid, serialize_peer};
use crate::messages::DealProposal;
use crate::payment::{Address, PaymentInfo};
use crate::status::DealStatus;
use cid::Cid;
use libp2p::PeerId;
use serde::{Deserialize, Serialize};

/// Everything the client knows about one of its retrievals.
///
/// Owned by the client's deal group and only ever mutated by client state machine transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDealState {
    pub proposal: DealProposal,
    pub status: DealStatus,
    /// The provider that is sending us the data.
    #[serde(serialize_with = "serialize_peer", deserialize_with = "deserialize_peer")]
    pub sender: PeerId,
    /// The most we are prepared to spend on this deal, unseal price included.
    pub total_funds: TokenAmount,
    pub client_wallet: Address,
    pub miner_wallet: Address,
    pub payment_info: Option<PaymentInfo>,
    pub total_received: u64,
    pub current_interval: u64,
    pub bytes_paid_for: u64,
    /// The outstanding amount the provider asked for. Zero when nothing is pending.
    pub payment_requested: TokenAmount,
    pub funds_spent: TokenAmount,
    /// The share of `funds_spent` that paid the unseal price.
    pub unseal_funds_paid: TokenAmount,
    pub all_blocks_received: bool,
    pub last_payment_requested: bool,
    pub channel_id: Option<TransferChannelId>,
    pub message: String,
    #[serde(default, serialize_with = "serialize_opt_cid", deserialize_with = "deserialize_opt_cid")]
    pub wait_msg_cid: Option<Cid>,
    pub legacy_protocol: bool,
}

impl ClientDealState {
    pub fn new(
        proposal: DealProposal,
        sender: PeerId,
        total_funds: TokenAmount,
        client_wallet: Address,
        miner_wallet: Address,
    ) -> Self {
        let current_interval = proposal.params.payment_interval;
        ClientDealState {
            proposal,
            status: DealStatus::New,
            sender,
            total_funds,
            client_wallet,
            miner_wallet,
            payment_info: None,
            total_received: 0,
            current_interval,
            bytes_paid_for: 0,
            payment_requested: TokenAmount::zero(),
            funds_spent: TokenAmount::zero(),
            unseal_funds_paid: TokenAmount::zero(),
            all_blocks_received: false,
            last_payment_requested: false,
            channel_id: None,
            message: String::new(),
            wait_msg_cid: None,
            legacy_protocol: false,
        }
    }

    pub fn id(&self) -> DealId {
        self.proposal.id
    }

    pub fn price_per_byte(&self) -> &TokenAmount {
        &self.proposal.params.price_per_byte
    }

    /// Bytes received that have not been paid for yet.
    pub fn unpaid_bytes(&self) -> u64 {
        self.total_received.checked_sub(self.bytes_paid_for).unwrap_or(0)
    }

    /// The part of the unseal price that is still to be paid.
    pub fn unseal_outstanding(&self) -> TokenAmount {
        self.proposal.params.unseal_price.saturating_sub(&self.unseal_funds_paid)
    }

    /// The most the provider can legitimately ask for, given what we have received so far.
    pub fn max_payable(&self) -> TokenAmount {
        self.price_per_byte().for_bytes(self.unpaid_bytes()) + self.unseal_outstanding()
    }
}
