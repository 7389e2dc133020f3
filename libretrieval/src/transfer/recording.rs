use crate::deal_id::TransferChannelId;
use crate::messages::{Selector, TransferVoucher};
use crate::transfer::{DataTransfer, TransferError};
use cid::Cid;
use libp2p::PeerId;
use parking_lot::Mutex;
use std::sync::Arc;

/// A call made on a [`RecordingTransfer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferCall {
    Open { to: PeerId, voucher: TransferVoucher, base_cid: Cid, selector: Selector },
    Voucher { channel: TransferChannelId, voucher: TransferVoucher },
    Resume(TransferChannelId),
    Close(TransferChannelId),
}

#[derive(Default)]
struct Recorder {
    calls: Vec<TransferCall>,
    next_id: u64,
    failure: Option<TransferError>,
}

/// A data-transfer layer that transfers nothing. It hands out channel ids and remembers every call it received.
#[derive(Clone)]
pub struct RecordingTransfer {
    local: PeerId,
    recorder: Arc<Mutex<Recorder>>,
}

impl RecordingTransfer {
    pub fn new(local: PeerId) -> Self {
        Self { local, recorder: Arc::new(Mutex::new(Recorder::default())) }
    }

    pub fn calls(&self) -> Vec<TransferCall> {
        self.recorder.lock().calls.clone()
    }

    /// Make every later call fail with `err`. `None` restores normal service.
    pub fn fail_with(&self, err: Option<TransferError>) {
        self.recorder.lock().failure = err;
    }

    fn record(&self, call: TransferCall) -> Result<(), TransferError> {
        let mut recorder = self.recorder.lock();
        if let Some(err) = recorder.failure.clone() {
            return Err(err);
        }
        recorder.calls.push(call);
        Ok(())
    }
}

impl DataTransfer for RecordingTransfer {
    async fn open_pull_channel(
        &self,
        to: PeerId,
        voucher: TransferVoucher,
        base_cid: Cid,
        selector: Selector,
    ) -> Result<TransferChannelId, TransferError> {
        self.record(TransferCall::Open { to, voucher, base_cid, selector })?;
        let mut recorder = self.recorder.lock();
        recorder.next_id += 1;
        Ok(TransferChannelId::new(self.local, to, recorder.next_id))
    }

    async fn send_voucher(&self, channel: TransferChannelId, voucher: TransferVoucher) -> Result<(), TransferError> {
        self.record(TransferCall::Voucher { channel, voucher })
    }

    async fn resume_channel(&self, channel: TransferChannelId) -> Result<(), TransferError> {
        self.record(TransferCall::Resume(channel))
    }

    async fn close_channel(&self, channel: TransferChannelId) -> Result<(), TransferError> {
        self.record(TransferCall::Close(channel))
    }
}
