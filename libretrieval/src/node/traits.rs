use crate::amount::TokenAmount;
use crate::deal_id::ProviderDealIdentifier;
use crate::helpers::{deserialize_cid, serialize_cid};
use crate::messages::Block;
use crate::node::error::{BlockError, NodeError, PieceLookupError};
use crate::payment::{Address, Lane, SignedVoucher};
use cid::Cid;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// The outcome of asking the node for a payment channel between a client and a miner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelFunding {
    /// No channel exists yet. `wait_msg` is the message that creates it.
    Creating { wait_msg: Cid },
    /// The channel exists and `wait_msg` tops it up with the requested funds.
    AddingFunds { pay_ch: Address, wait_msg: Cid },
}

/// The piece a payload lives in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceInfo {
    #[serde(serialize_with = "serialize_cid", deserialize_with = "deserialize_cid")]
    pub piece_cid: Cid,
    pub size: u64,
}

//------------------------------------------   Client node   --------------------------------------------------//

/// Payment channel operations a retrieval client needs. Implementations must be safe to use from many deals at once.
pub trait RetrievalClientNode: Send + Sync + 'static {
    fn get_or_create_payment_channel(
        &self,
        client: &Address,
        miner: &Address,
        funds: &TokenAmount,
    ) -> impl Future<Output = Result<ChannelFunding, NodeError>> + Send;

    /// Blocks until the channel creation message lands on chain and returns the new channel's address.
    fn wait_for_payment_channel_creation(
        &self,
        wait_msg: Cid,
    ) -> impl Future<Output = Result<Address, NodeError>> + Send;

    fn wait_for_payment_channel_add_funds(&self, wait_msg: Cid) -> impl Future<Output = Result<(), NodeError>> + Send;

    fn allocate_lane(&self, pay_ch: &Address) -> impl Future<Output = Result<Lane, NodeError>> + Send;

    /// Creates a voucher for the cumulative `amount` on `lane`.
    fn create_payment_voucher(
        &self,
        pay_ch: &Address,
        amount: &TokenAmount,
        lane: Lane,
    ) -> impl Future<Output = Result<SignedVoucher, NodeError>> + Send;
}

//------------------------------------------   Provider node   ------------------------------------------------//

pub trait RetrievalProviderNode: Send + Sync + 'static {
    /// Stores the voucher and returns how much *new* value it carries compared to what has already been saved for
    /// its lane. Submitting the same voucher again must succeed and return zero.
    fn save_payment_voucher(
        &self,
        pay_ch: &Address,
        voucher: &SignedVoucher,
        proof: Option<&[u8]>,
        expected: &TokenAmount,
    ) -> impl Future<Output = Result<TokenAmount, NodeError>> + Send;
}

pub trait PieceLookup: Send + Sync + 'static {
    /// Finds the piece holding `payload`. When `piece` is given, only that piece is considered.
    fn get_piece_info(
        &self,
        payload: &Cid,
        piece: Option<&Cid>,
    ) -> impl Future<Output = Result<PieceInfo, PieceLookupError>> + Send;

    fn get_piece_size(&self, payload: &Cid) -> impl Future<Output = Result<u64, PieceLookupError>> + Send {
        async move { self.get_piece_info(payload, None).await.map(|info| info.size) }
    }
}

/// Supplies payload blocks, in order, for the legacy deal-stream flow.
pub trait BlockSource: Send + Sync + 'static {
    /// Returns the next block for the deal, and whether it is the last one.
    fn next_block(
        &self,
        deal: &ProviderDealIdentifier,
        payload: &Cid,
    ) -> impl Future<Output = Result<(Block, bool), BlockError>> + Send;
}

//--------------------       Convenience all-inclusive provider trait     ----------------------------------------------

/// Everything a provider needs from its node: voucher redemption, piece lookup and block supply.
pub trait ProviderDelegate: Sync + Send + Clone + RetrievalProviderNode + PieceLookup + BlockSource {}

impl<T> ProviderDelegate for T where T: Sync + Send + Clone + RetrievalProviderNode + PieceLookup + BlockSource {}
