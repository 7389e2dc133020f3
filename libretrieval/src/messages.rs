//! Messages exchanged between retrieval clients and providers.
//!
//! The same records are carried over the legacy deal stream and as data-transfer vouchers. Their encoding on the wire
//! is up to the transport.

use crate::amount::TokenAmount;
use crate::deal_id::DealId;
use crate::helpers::{deserialize_cid, deserialize_opt_cid, from_hex, serialize_cid, serialize_opt_cid, to_hex};
use crate::payment::{Address, SignedVoucher};
use crate::status::DealStatus;
use cid::Cid;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Which part of the DAG under the payload root a client wants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Selector {
    /// Recursively explore the whole DAG.
    #[default]
    ExploreAll,
    /// An encoded selector that the data-transfer layer understands. Compared byte for byte.
    Custom(#[serde(serialize_with = "to_hex", deserialize_with = "from_hex")] Vec<u8>),
}

/// The terms of a retrieval deal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    pub selector: Selector,
    #[serde(default, serialize_with = "serialize_opt_cid", deserialize_with = "deserialize_opt_cid")]
    pub piece_cid: Option<Cid>,
    pub price_per_byte: TokenAmount,
    /// Bytes the provider may send before it must be paid.
    pub payment_interval: u64,
    /// Amount the interval grows by after each full payment.
    pub payment_interval_increase: u64,
    pub unseal_price: TokenAmount,
}

impl Params {
    pub fn new(
        price_per_byte: TokenAmount,
        payment_interval: u64,
        payment_interval_increase: u64,
        unseal_price: TokenAmount,
    ) -> Self {
        Params {
            selector: Selector::ExploreAll,
            piece_cid: None,
            price_per_byte,
            payment_interval,
            payment_interval_increase,
            unseal_price,
        }
    }

    pub fn with_selector(mut self, selector: Selector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_piece(mut self, piece_cid: Cid) -> Self {
        self.piece_cid = Some(piece_cid);
        self
    }
}

/// A client's request to retrieve `payload_cid` on the given terms. Immutable once sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealProposal {
    pub id: DealId,
    #[serde(serialize_with = "serialize_cid", deserialize_with = "deserialize_cid")]
    pub payload_cid: Cid,
    pub params: Params,
}

/// A block of payload data sent over the legacy deal stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    #[serde(serialize_with = "serialize_cid", deserialize_with = "deserialize_cid")]
    pub cid: Cid,
    #[serde(serialize_with = "to_hex", deserialize_with = "from_hex")]
    pub data: Vec<u8>,
}

impl Block {
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// The provider's reply to a proposal or payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealResponse {
    pub id: DealId,
    pub status: DealStatus,
    pub message: String,
    pub payment_owed: TokenAmount,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

impl DealResponse {
    pub fn new(id: DealId, status: DealStatus) -> Self {
        DealResponse { id, status, message: String::new(), payment_owed: TokenAmount::zero(), blocks: Vec::new() }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_payment_owed(mut self, owed: TokenAmount) -> Self {
        self.payment_owed = owed;
        self
    }

    pub fn with_blocks(mut self, blocks: Vec<Block>) -> Self {
        self.blocks = blocks;
        self
    }
}

/// The deal response understood by peers on the first version of the protocol. It has no unseal status and no blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyDealResponse {
    pub id: DealId,
    pub status: DealStatus,
    pub message: String,
    pub payment_owed: TokenAmount,
}

impl From<DealResponse> for LegacyDealResponse {
    fn from(res: DealResponse) -> Self {
        let status = match res.status {
            DealStatus::FundsNeededUnseal => DealStatus::FundsNeeded,
            s => s,
        };
        LegacyDealResponse { id: res.id, status, message: res.message, payment_owed: res.payment_owed }
    }
}

impl From<LegacyDealResponse> for DealResponse {
    fn from(res: LegacyDealResponse) -> Self {
        DealResponse {
            id: res.id,
            status: res.status,
            message: res.message,
            payment_owed: res.payment_owed,
            blocks: Vec::new(),
        }
    }
}

/// A payment for a deal: a voucher on the client's payment channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealPayment {
    pub id: DealId,
    pub payment_channel: Address,
    pub payment_voucher: SignedVoucher,
}

/// Vouchers carried on a data-transfer channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferVoucher {
    Proposal(DealProposal),
    LegacyProposal(DealProposal),
    Payment(DealPayment),
    LegacyPayment(DealPayment),
}

impl TransferVoucher {
    pub fn is_legacy(&self) -> bool {
        matches!(self, TransferVoucher::LegacyProposal(_) | TransferVoucher::LegacyPayment(_))
    }

    pub fn voucher_type(&self) -> &'static str {
        match self {
            TransferVoucher::Proposal(_) => "DealProposal",
            TransferVoucher::LegacyProposal(_) => "LegacyDealProposal",
            TransferVoucher::Payment(_) => "DealPayment",
            TransferVoucher::LegacyPayment(_) => "LegacyDealPayment",
        }
    }
}

/// Which response encoding a channel speaks. Chosen once, when the provider starts tracking the channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseFormat {
    #[default]
    Current,
    Legacy,
}

impl ResponseFormat {
    pub fn for_legacy(legacy: bool) -> Self {
        if legacy {
            ResponseFormat::Legacy
        } else {
            ResponseFormat::Current
        }
    }

    pub fn encode(&self, response: DealResponse) -> VoucherResult {
        match self {
            ResponseFormat::Current => VoucherResult::Response(response),
            ResponseFormat::Legacy => VoucherResult::LegacyResponse(response.into()),
        }
    }
}

/// The provider's reply to a voucher, as returned to the data-transfer layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoucherResult {
    Response(DealResponse),
    LegacyResponse(LegacyDealResponse),
}

impl VoucherResult {
    pub fn status(&self) -> DealStatus {
        match self {
            VoucherResult::Response(r) => r.status,
            VoucherResult::LegacyResponse(r) => r.status,
        }
    }

    pub fn into_response(self) -> DealResponse {
        match self {
            VoucherResult::Response(r) => r,
            VoucherResult::LegacyResponse(r) => r.into(),
        }
    }
}

//------------------------------------------   Query protocol   ------------------------------------------------//

/// Asks a provider whether it can serve a payload, and on what terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    #[serde(serialize_with = "serialize_cid", deserialize_with = "deserialize_cid")]
    pub payload_cid: Cid,
    #[serde(default, serialize_with = "serialize_opt_cid", deserialize_with = "deserialize_opt_cid")]
    pub piece_cid: Option<Cid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryResponseStatus {
    Available,
    Unavailable,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryItemStatus {
    Available,
    Unavailable,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub status: QueryResponseStatus,
    pub piece_cid_found: QueryItemStatus,
    /// Size of the piece containing the payload, in bytes.
    pub size: u64,
    pub payment_address: Address,
    pub min_price_per_byte: TokenAmount,
    pub max_payment_interval: u64,
    pub max_payment_interval_increase: u64,
    pub unseal_price: TokenAmount,
    pub message: String,
}

impl QueryResponse {
    /// The total price for retrieving the whole piece at the quoted terms.
    pub fn piece_retrieval_price(&self) -> TokenAmount {
        self.min_price_per_byte.for_bytes(self.size) + self.unseal_price.clone()
    }
}

impl Display for QueryResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.status {
            QueryResponseStatus::Available => write!(
                f,
                "Available: {} bytes at {}/byte (unseal {}), interval {} (+{}), pay to {}",
                self.size,
                self.min_price_per_byte,
                self.unseal_price,
                self.max_payment_interval,
                self.max_payment_interval_increase,
                self.payment_address
            ),
            QueryResponseStatus::Unavailable => write!(f, "Unavailable. {}", self.message),
            QueryResponseStatus::Error => write!(f, "Query failed. {}", self.message),
        }
    }
}
