use crate::messages::{DealPayment, DealProposal, DealResponse};
use crate::stream::{DealStream, StreamError};
use futures::channel::mpsc;
use futures::StreamExt;
use libp2p::PeerId;
use tokio::sync::Mutex;

#[derive(Debug)]
enum StreamMessage {
    Proposal(DealProposal),
    Response(DealResponse),
    Payment(DealPayment),
}

impl StreamMessage {
    fn kind(&self) -> &'static str {
        match self {
            StreamMessage::Proposal(_) => "DealProposal",
            StreamMessage::Response(_) => "DealResponse",
            StreamMessage::Payment(_) => "DealPayment",
        }
    }
}

/// One end of an in-process deal stream. Create connected ends with [`MemoryDealStream::pair`].
pub struct MemoryDealStream {
    remote: PeerId,
    outbound: mpsc::UnboundedSender<StreamMessage>,
    inbound: Mutex<mpsc::UnboundedReceiver<StreamMessage>>,
}

impl MemoryDealStream {
    /// Returns `(a, b)`, where `a` is held by peer `a_peer` and talks to `b_peer`, and vice versa.
    pub fn pair(a_peer: PeerId, b_peer: PeerId) -> (MemoryDealStream, MemoryDealStream) {
        let (a_tx, b_rx) = mpsc::unbounded();
        let (b_tx, a_rx) = mpsc::unbounded();
        let a = MemoryDealStream { remote: b_peer, outbound: a_tx, inbound: Mutex::new(a_rx) };
        let b = MemoryDealStream { remote: a_peer, outbound: b_tx, inbound: Mutex::new(b_rx) };
        (a, b)
    }

    fn send(&self, msg: StreamMessage) -> Result<(), StreamError> {
        self.outbound.unbounded_send(msg).map_err(|_| StreamError::Closed)
    }

    async fn next(&self) -> Result<StreamMessage, StreamError> {
        self.inbound.lock().await.next().await.ok_or(StreamError::Closed)
    }
}

impl DealStream for MemoryDealStream {
    fn remote_peer(&self) -> PeerId {
        self.remote
    }

    async fn read_deal_proposal(&self) -> Result<DealProposal, StreamError> {
        match self.next().await? {
            StreamMessage::Proposal(p) => Ok(p),
            other => Err(StreamError::UnexpectedMessage { expected: "DealProposal", actual: other.kind() }),
        }
    }

    async fn write_deal_proposal(&self, proposal: DealProposal) -> Result<(), StreamError> {
        self.send(StreamMessage::Proposal(proposal))
    }

    async fn read_deal_response(&self) -> Result<DealResponse, StreamError> {
        match self.next().await? {
            StreamMessage::Response(r) => Ok(r),
            other => Err(StreamError::UnexpectedMessage { expected: "DealResponse", actual: other.kind() }),
        }
    }

    async fn write_deal_response(&self, response: DealResponse) -> Result<(), StreamError> {
        self.send(StreamMessage::Response(response))
    }

    async fn read_deal_payment(&self) -> Result<DealPayment, StreamError> {
        match self.next().await? {
            StreamMessage::Payment(p) => Ok(p),
            other => Err(StreamError::UnexpectedMessage { expected: "DealPayment", actual: other.kind() }),
        }
    }

    async fn write_deal_payment(&self, payment: DealPayment) -> Result<(), StreamError> {
        self.send(StreamMessage::Payment(payment))
    }

    fn close(&self) -> Result<(), StreamError> {
        self.outbound.close_channel();
        Ok(())
    }
}
