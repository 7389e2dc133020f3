use crate::amount::TokenAmount;
use crate::deal_id::TransferChannelId;
use crate::payment::{Address, Lane};
use cid::Cid;
use std::fmt::{Display, Formatter};

/// Everything that can happen to a client deal. Failure events carry the error text, which ends up in the deal's
/// `message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Kicks off payment channel setup for a new deal.
    Open,
    PaymentChannelCreateInitiated(Cid),
    PaymentChannelAddingFunds { wait_msg: Cid, pay_ch: Address },
    PaymentChannelReady { pay_ch: Address, lane: Lane },
    PaymentChannelErrored(String),
    PaymentChannelAddFundsErrored(String),
    AllocateLaneErrored(String),
    DealProposed(TransferChannelId),
    WriteDealProposalErrored(String),
    DealAccepted,
    DealRejected(String),
    DealNotFound(String),
    /// The total number of bytes received so far.
    BlocksReceived(u64),
    AllBlocksReceived,
    PaymentRequested(TokenAmount),
    LastPaymentRequested(TokenAmount),
    SendFunds,
    PaymentSent,
    FundsExpended(String),
    BadPaymentRequested(String),
    CreateVoucherFailed(String),
    WriteDealPaymentErrored(String),
    Complete,
    ProviderErrored(String),
    DataTransferError(String),
    Cancel,
    CancelComplete,
}

impl Display for ClientEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientEvent::Open => write!(f, "Open"),
            ClientEvent::PaymentChannelCreateInitiated(_) => write!(f, "PaymentChannelCreateInitiated"),
            ClientEvent::PaymentChannelAddingFunds { .. } => write!(f, "PaymentChannelAddingFunds"),
            ClientEvent::PaymentChannelReady { .. } => write!(f, "PaymentChannelReady"),
            ClientEvent::PaymentChannelErrored(_) => write!(f, "PaymentChannelErrored"),
            ClientEvent::PaymentChannelAddFundsErrored(_) => write!(f, "PaymentChannelAddFundsErrored"),
            ClientEvent::AllocateLaneErrored(_) => write!(f, "AllocateLaneErrored"),
            ClientEvent::DealProposed(_) => write!(f, "DealProposed"),
            ClientEvent::WriteDealProposalErrored(_) => write!(f, "WriteDealProposalErrored"),
            ClientEvent::DealAccepted => write!(f, "DealAccepted"),
            ClientEvent::DealRejected(_) => write!(f, "DealRejected"),
            ClientEvent::DealNotFound(_) => write!(f, "DealNotFound"),
            ClientEvent::BlocksReceived(n) => write!(f, "BlocksReceived({n})"),
            ClientEvent::AllBlocksReceived => write!(f, "AllBlocksReceived"),
            ClientEvent::PaymentRequested(amt) => write!(f, "PaymentRequested({amt})"),
            ClientEvent::LastPaymentRequested(amt) => write!(f, "LastPaymentRequested({amt})"),
            ClientEvent::SendFunds => write!(f, "SendFunds"),
            ClientEvent::PaymentSent => write!(f, "PaymentSent"),
            ClientEvent::FundsExpended(_) => write!(f, "FundsExpended"),
            ClientEvent::BadPaymentRequested(_) => write!(f, "BadPaymentRequested"),
            ClientEvent::CreateVoucherFailed(_) => write!(f, "CreateVoucherFailed"),
            ClientEvent::WriteDealPaymentErrored(_) => write!(f, "WriteDealPaymentErrored"),
            ClientEvent::Complete => write!(f, "Complete"),
            ClientEvent::ProviderErrored(_) => write!(f, "ProviderErrored"),
            ClientEvent::DataTransferError(_) => write!(f, "DataTransferError"),
            ClientEvent::Cancel => write!(f, "Cancel"),
            ClientEvent::CancelComplete => write!(f, "CancelComplete"),
        }
    }
}
