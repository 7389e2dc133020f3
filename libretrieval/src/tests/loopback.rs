//! An in-process data-transfer layer joining one client to one provider. Everything the provider says to the client
//! goes through a single ordered inbox, so callbacks reach the client in the order a network would deliver them and
//! never from inside one of the client's own handlers.

use crate::deal_id::{DealId, TransferChannelId};
use crate::helpers::raw_cid;
use crate::messages::{Selector, TransferVoucher, VoucherResult};
use crate::node::{DummyPaymentNode, DummyProviderDelegate};
use crate::revalidator::RevalidationResult;
use crate::stream::MemoryDealStream;
use crate::transfer::{DataTransfer, TransferError};
use crate::{RetrievalClient, RetrievalProvider};
use cid::Cid;
use futures::channel::mpsc;
use futures::StreamExt;
use libp2p::PeerId;
use log::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;

pub type TestClient = RetrievalClient<DummyPaymentNode, Loopback>;
pub type TestProvider = RetrievalProvider<DummyProviderDelegate, MemoryDealStream, Loopback>;

enum ToClient {
    Data(DealId, u64),
    Response(VoucherResult),
    Complete(DealId),
    Error(DealId, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Running,
    Paused,
    Closed,
}

struct Channel {
    deal: DealId,
    flow: watch::Sender<Flow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Client,
    Provider,
}

struct Hub {
    client_peer: PeerId,
    payloads: Mutex<HashMap<Cid, Vec<Vec<u8>>>>,
    channels: Mutex<HashMap<TransferChannelId, Channel>>,
    next_id: AtomicU64,
    provider: OnceLock<Arc<TestProvider>>,
    inbox: mpsc::UnboundedSender<ToClient>,
    pending: Mutex<Option<mpsc::UnboundedReceiver<ToClient>>>,
}

impl Hub {
    fn deliver(&self, message: ToClient) {
        if self.inbox.unbounded_send(message).is_err() {
            warn!("Client inbox is closed");
        }
    }

    fn set_flow(&self, channel: &TransferChannelId, flow: Flow) -> Result<DealId, TransferError> {
        let channels = self.channels.lock();
        let entry = channels.get(channel).ok_or_else(|| TransferError::ChannelNotFound(channel.to_string()))?;
        entry.flow.send_if_modified(|current| {
            let changed = *current != Flow::Closed && *current != flow;
            if changed {
                *current = flow;
            }
            changed
        });
        Ok(entry.deal)
    }

    fn provider(&self) -> Result<Arc<TestProvider>, TransferError> {
        self.provider.get().cloned().ok_or_else(|| TransferError::Network("provider is not connected".into()))
    }

    /// Applies a validator's verdict to the channel: pause or run, then pass its response on.
    fn apply(&self, channel: &TransferChannelId, result: RevalidationResult) {
        let flow = if result.pause { Flow::Paused } else { Flow::Running };
        if let Err(e) = self.set_flow(channel, flow) {
            debug!("{e}");
        }
        if let Some(response) = result.response {
            self.deliver(ToClient::Response(response));
        }
    }
}

/// One end of the loopback. The client end opens channels and sends vouchers; the provider end resumes and closes
/// them.
#[derive(Clone)]
pub struct Loopback {
    hub: Arc<Hub>,
    side: Side,
}

impl Loopback {
    pub fn new(client_peer: PeerId) -> Self {
        let (inbox, pending) = mpsc::unbounded();
        let hub = Hub {
            client_peer,
            payloads: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            provider: OnceLock::new(),
            inbox,
            pending: Mutex::new(Some(pending)),
        };
        Self { hub: Arc::new(hub), side: Side::Client }
    }

    pub fn provider_side(&self) -> Self {
        Self { hub: Arc::clone(&self.hub), side: Side::Provider }
    }

    /// Makes `data` available for transfer in the same blocks the provider's block source would serve.
    pub fn add_payload(&self, data: &[u8], block_size: usize) -> Cid {
        let root = raw_cid(data);
        let blocks = data.chunks(block_size.max(1)).map(<[u8]>::to_vec).collect();
        self.hub.payloads.lock().insert(root, blocks);
        root
    }

    /// Joins the two ends. Must be called once, before the client opens any channel.
    pub fn connect(&self, client: Arc<TestClient>, provider: Arc<TestProvider>) {
        if self.hub.provider.set(provider).is_err() {
            warn!("Loopback is already connected");
            return;
        }
        if let Some(inbox) = self.hub.pending.lock().take() {
            tokio::spawn(deliver_to_client(client, inbox));
        }
    }

    fn ensure_side(&self, side: Side, operation: &str) -> Result<(), TransferError> {
        if self.side == side {
            Ok(())
        } else {
            Err(TransferError::Network(format!("{operation} is not available on the {:?} end", self.side)))
        }
    }
}

async fn deliver_to_client(client: Arc<TestClient>, mut inbox: mpsc::UnboundedReceiver<ToClient>) {
    while let Some(message) = inbox.next().await {
        let result = match message {
            ToClient::Data(deal, total) => client.on_data_received(deal, total).await,
            ToClient::Response(response) => client.on_voucher_result(response).await,
            ToClient::Complete(deal) => client.on_transfer_complete(deal).await,
            ToClient::Error(deal, error) => client.on_transfer_error(deal, error).await,
        };
        if let Err(e) = result {
            debug!("Client callback failed: {e}");
        }
    }
}

async fn wait_while_paused(flow: &mut watch::Receiver<Flow>) -> bool {
    matches!(flow.wait_for(|f| *f != Flow::Paused).await.map(|f| *f), Ok(Flow::Running))
}

/// Streams the payload over `channel`, reporting every block to the provider's revalidator and honouring its pauses.
async fn pump(hub: Arc<Hub>, channel: TransferChannelId, deal: DealId, payload: Cid) {
    let Ok(provider) = hub.provider() else { return };
    let Some(mut flow) = hub.channels.lock().get(&channel).map(|c| c.flow.subscribe()) else { return };
    let blocks = hub.payloads.lock().get(&payload).cloned().unwrap_or_default();
    let revalidator = provider.revalidator();
    let mut sent = 0u64;
    for block in blocks {
        if !wait_while_paused(&mut flow).await {
            return;
        }
        sent += block.len() as u64;
        hub.deliver(ToClient::Data(deal, sent));
        match revalidator.on_pull_data_sent(&channel, block.len() as u64).await {
            Ok(Some(result)) => hub.apply(&channel, result),
            Ok(None) => return,
            Err(e) => {
                hub.deliver(ToClient::Error(deal, e.to_string()));
                return;
            }
        }
    }
    if !wait_while_paused(&mut flow).await {
        return;
    }
    hub.deliver(ToClient::Complete(deal));
    match revalidator.on_complete(&channel).await {
        Ok(Some(result)) => hub.apply(&channel, result),
        Ok(None) => {}
        Err(e) => hub.deliver(ToClient::Error(deal, e.to_string())),
    }
}

impl DataTransfer for Loopback {
    async fn open_pull_channel(
        &self,
        to: PeerId,
        voucher: TransferVoucher,
        base_cid: Cid,
        selector: Selector,
    ) -> Result<TransferChannelId, TransferError> {
        self.ensure_side(Side::Client, "open_pull_channel")?;
        let hub = &self.hub;
        let provider = hub.provider()?;
        let deal = match &voucher {
            TransferVoucher::Proposal(p) | TransferVoucher::LegacyProposal(p) => p.id,
            other => {
                let reason = format!("cannot open a channel with a {}", other.voucher_type());
                return Err(TransferError::Rejected(reason));
            }
        };
        let channel = TransferChannelId::new(hub.client_peer, to, hub.next_id.fetch_add(1, Ordering::SeqCst));
        let (flow, _) = watch::channel(Flow::Paused);
        hub.channels.lock().insert(channel, Channel { deal, flow });

        let validator = provider.request_validator();
        match validator.validate_pull(channel, hub.client_peer, &voucher, &base_cid, &selector).await {
            Ok(result) => {
                // The deal may already have resumed the channel; only a proceed verdict changes it here
                if !result.pause {
                    hub.set_flow(&channel, Flow::Running)?;
                }
                if let Some(response) = result.response {
                    hub.deliver(ToClient::Response(response));
                }
                tokio::spawn(pump(Arc::clone(hub), channel, deal, base_cid));
            }
            Err(e) => {
                hub.channels.lock().remove(&channel);
                if let Some(response) = e.response(&voucher) {
                    hub.deliver(ToClient::Response(response));
                }
            }
        }
        Ok(channel)
    }

    async fn send_voucher(&self, channel: TransferChannelId, voucher: TransferVoucher) -> Result<(), TransferError> {
        self.ensure_side(Side::Client, "send_voucher")?;
        let provider = self.hub.provider()?;
        match provider.revalidator().revalidate(&channel, &voucher).await {
            Ok(Some(result)) => {
                self.hub.apply(&channel, result);
                Ok(())
            }
            Ok(None) => Err(TransferError::ChannelNotFound(channel.to_string())),
            Err(e) => Err(TransferError::Rejected(e.to_string())),
        }
    }

    async fn resume_channel(&self, channel: TransferChannelId) -> Result<(), TransferError> {
        self.ensure_side(Side::Provider, "resume_channel")?;
        self.hub.set_flow(&channel, Flow::Running).map(|_| ())
    }

    async fn close_channel(&self, channel: TransferChannelId) -> Result<(), TransferError> {
        let deal = self.hub.set_flow(&channel, Flow::Closed)?;
        match self.side {
            Side::Client => {
                let provider = self.hub.provider()?;
                tokio::spawn(async move {
                    if let Err(e) = provider.revalidator().on_channel_cancelled(&channel).await {
                        debug!("Cancelling {channel} on the provider: {e}");
                    }
                });
            }
            Side::Provider => self.hub.deliver(ToClient::Error(deal, "channel closed by the provider".into())),
        }
        Ok(())
    }
}
