//! The generic data-transfer layer, as seen by the retrieval client.
//!
//! A client opens a pull channel carrying its deal proposal as the first voucher and later sends payment vouchers on
//! the same channel. The provider side of the layer calls into [`crate::request_validator::RequestValidator`] and
//! [`crate::revalidator::Revalidator`].

#[cfg(feature = "dummy_node")]
mod recording;

#[cfg(feature = "dummy_node")]
pub use recording::{RecordingTransfer, TransferCall};

use crate::deal_id::TransferChannelId;
use crate::messages::{Selector, TransferVoucher};
use cid::Cid;
use libp2p::PeerId;
use std::future::Future;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransferError {
    #[error("Data-transfer channel {0} does not exist")]
    ChannelNotFound(String),
    #[error("The remote peer rejected the request. {0}")]
    Rejected(String),
    #[error("Data-transfer network error. {0}")]
    Network(String),
}

pub trait DataTransfer: Send + Sync + 'static {
    /// Opens a channel pulling the DAG under `base_cid` from `to`, with `voucher` as the opening voucher.
    fn open_pull_channel(
        &self,
        to: PeerId,
        voucher: TransferVoucher,
        base_cid: Cid,
        selector: Selector,
    ) -> impl Future<Output = Result<TransferChannelId, TransferError>> + Send;

    fn send_voucher(
        &self,
        channel: TransferChannelId,
        voucher: TransferVoucher,
    ) -> impl Future<Output = Result<(), TransferError>> + Send;

    /// Resumes a paused channel. This may race with the pause that it undoes, so implementations must accept a resume
    /// for a channel that is not paused yet. Hooks triggered by the resumed transfer must not be delivered from within
    /// this call.
    fn resume_channel(&self, channel: TransferChannelId) -> impl Future<Output = Result<(), TransferError>> + Send;

    fn close_channel(&self, channel: TransferChannelId) -> impl Future<Output = Result<(), TransferError>> + Send;
}
