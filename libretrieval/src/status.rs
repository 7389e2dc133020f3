use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// The status of a retrieval deal. Client and provider share this set, although each side only ever visits a subset
/// of it. The status also travels in [`crate::messages::DealResponse`]s so that the client can follow the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DealStatus {
    New,
    PaymentChannelCreating,
    PaymentChannelAddingFunds,
    PaymentChannelReady,
    WaitForAcceptance,
    Accepted,
    /// The provider wants the unseal price paid before it sends any data.
    FundsNeededUnseal,
    Ongoing,
    FundsNeeded,
    FundsNeededLastPayment,
    SendFunds,
    SendFundsLastPayment,
    BlocksComplete,
    Finalizing,
    Failing,
    Cancelling,
    Completed,
    Failed,
    Rejected,
    DealNotFound,
    Cancelled,
    Errored,
}

impl DealStatus {
    /// Terminal deals are kept for inspection but never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DealStatus::Completed
                | DealStatus::Failed
                | DealStatus::Rejected
                | DealStatus::DealNotFound
                | DealStatus::Cancelled
                | DealStatus::Errored
        )
    }

    pub fn is_funds_needed(&self) -> bool {
        matches!(self, DealStatus::FundsNeeded | DealStatus::FundsNeededLastPayment | DealStatus::FundsNeededUnseal)
    }
}

impl Display for DealStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DealStatus::New => "New",
            DealStatus::PaymentChannelCreating => "PaymentChannelCreating",
            DealStatus::PaymentChannelAddingFunds => "PaymentChannelAddingFunds",
            DealStatus::PaymentChannelReady => "PaymentChannelReady",
            DealStatus::WaitForAcceptance => "WaitForAcceptance",
            DealStatus::Accepted => "Accepted",
            DealStatus::FundsNeededUnseal => "FundsNeededUnseal",
            DealStatus::Ongoing => "Ongoing",
            DealStatus::FundsNeeded => "FundsNeeded",
            DealStatus::FundsNeededLastPayment => "FundsNeededLastPayment",
            DealStatus::SendFunds => "SendFunds",
            DealStatus::SendFundsLastPayment => "SendFundsLastPayment",
            DealStatus::BlocksComplete => "BlocksComplete",
            DealStatus::Finalizing => "Finalizing",
            DealStatus::Failing => "Failing",
            DealStatus::Cancelling => "Cancelling",
            DealStatus::Completed => "Completed",
            DealStatus::Failed => "Failed",
            DealStatus::Rejected => "Rejected",
            DealStatus::DealNotFound => "DealNotFound",
            DealStatus::Cancelled => "Cancelled",
            DealStatus::Errored => "Errored",
        };
        f.write_str(s)
    }
}
