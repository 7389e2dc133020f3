use crate::amount::TokenAmount;
use crate::node::PieceInfo;
use std::fmt::{Display, Formatter};

/// Everything that can happen to a provider deal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// The request validator accepted a pull request for the deal.
    Open,
    /// The deal was accepted on the deal stream.
    DealAccepted(Option<PieceInfo>),
    DealRejected(String),
    DealNotFound(String),
    GetPieceSizeErrored(String),
    WriteResponseFailed(String),
    TransferResumed,
    /// The total number of bytes sent so far.
    BlockSent(u64),
    BlocksCompleted(u64),
    PaymentRequested(u64),
    NothingOwed,
    PartialPaymentReceived(TokenAmount),
    PaymentReceived(TokenAmount),
    BlockErrored(String),
    ReadPaymentFailed(String),
    SaveVoucherFailed(String),
    FailResponseSent,
    DataTransferError(String),
    ClientCancelled,
    Complete,
}

impl Display for ProviderEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderEvent::Open => write!(f, "Open"),
            ProviderEvent::DealAccepted(_) => write!(f, "DealAccepted"),
            ProviderEvent::DealRejected(_) => write!(f, "DealRejected"),
            ProviderEvent::DealNotFound(_) => write!(f, "DealNotFound"),
            ProviderEvent::GetPieceSizeErrored(_) => write!(f, "GetPieceSizeErrored"),
            ProviderEvent::WriteResponseFailed(_) => write!(f, "WriteResponseFailed"),
            ProviderEvent::TransferResumed => write!(f, "TransferResumed"),
            ProviderEvent::BlockSent(n) => write!(f, "BlockSent({n})"),
            ProviderEvent::BlocksCompleted(n) => write!(f, "BlocksCompleted({n})"),
            ProviderEvent::PaymentRequested(n) => write!(f, "PaymentRequested({n})"),
            ProviderEvent::NothingOwed => write!(f, "NothingOwed"),
            ProviderEvent::PartialPaymentReceived(amt) => write!(f, "PartialPaymentReceived({amt})"),
            ProviderEvent::PaymentReceived(amt) => write!(f, "PaymentReceived({amt})"),
            ProviderEvent::BlockErrored(_) => write!(f, "BlockErrored"),
            ProviderEvent::ReadPaymentFailed(_) => write!(f, "ReadPaymentFailed"),
            ProviderEvent::SaveVoucherFailed(_) => write!(f, "SaveVoucherFailed"),
            ProviderEvent::FailResponseSent => write!(f, "FailResponseSent"),
            ProviderEvent::DataTransferError(_) => write!(f, "DataTransferError"),
            ProviderEvent::ClientCancelled => write!(f, "ClientCancelled"),
            ProviderEvent::Complete => write!(f, "Complete"),
        }
    }
}
