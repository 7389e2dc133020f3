//! The provider's side of a data-transfer retrieval.
//!
//! The data-transfer layer moves the blocks; the revalidator decides when it must stop. Every hook keeps the deal's
//! state machine informed and answers with a [`RevalidationResult`], which tells the transfer layer whether to pause
//! the channel and what response to send the client.

use crate::amount::TokenAmount;
use crate::deal_id::{DealId, ProviderDealIdentifier, TransferChannelId};
use crate::logging::LogTarget;
use crate::messages::{DealResponse, ResponseFormat, TransferVoucher, VoucherResult};
use crate::node::{NodeError, RetrievalProviderNode};
use crate::provider_deal::{paid_for, payment_owed, ProviderDealState};
use crate::state_machine::error::LifeCycleError;
use crate::state_machine::ProviderEvent;
use crate::state_machine::provider_handlers::{redeem_payment, Redemption};
use crate::status::DealStatus;
use log::*;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

#[derive(Clone, Debug, Error)]
pub enum RevalidationError {
    #[error("Expected a payment voucher, got a {0}")]
    UnexpectedVoucher(&'static str),
    #[error("The payment is for deal {actual}, but the channel carries deal {expected}")]
    DealMismatch { expected: DealId, actual: DealId },
    #[error("Deal {0} is not tracked by the provider")]
    UnknownDeal(ProviderDealIdentifier),
    #[error("The deal is not waiting for a payment (status: {0})")]
    NotAwaitingPayment(DealStatus),
    #[error("Could not redeem the payment voucher. {0}")]
    Voucher(#[from] NodeError),
    #[error(transparent)]
    LifeCycle(#[from] LifeCycleError),
}

/// What a hook tells the data-transfer layer to do with the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevalidationResult {
    pub pause: bool,
    pub response: Option<VoucherResult>,
}

impl RevalidationResult {
    pub fn proceed() -> Self {
        Self { pause: false, response: None }
    }

    pub fn resume_with(response: VoucherResult) -> Self {
        Self { pause: false, response: Some(response) }
    }

    pub fn pause_with(response: VoucherResult) -> Self {
        Self { pause: true, response: Some(response) }
    }
}

/// Hook result. `Ok(None)` means the channel does not belong to a retrieval deal and the hook did nothing.
pub type HookResult = Result<Option<RevalidationResult>, RevalidationError>;

/// Access to the provider's deals and its payment node.
pub trait RevalidatorEnvironment: Send + Sync + 'static {
    type Node: RetrievalProviderNode;

    fn node(&self) -> &Self::Node;

    fn get_deal(&self, deal: &ProviderDealIdentifier) -> impl Future<Output = Option<ProviderDealState>> + Send;

    /// Sends `event` to the deal's state machine and waits until it has been applied.
    fn send_event(
        &self,
        deal: ProviderDealIdentifier,
        event: ProviderEvent,
    ) -> impl Future<Output = Result<(), LifeCycleError>> + Send;
}

/// The revalidator's copy of a deal's accounting, refreshed from the deal record whenever it may be stale.
struct ChannelData {
    deal: ProviderDealIdentifier,
    status: DealStatus,
    total_sent: u64,
    funds_received: TokenAmount,
    interval: u64,
    price_per_byte: TokenAmount,
    unseal_price: TokenAmount,
    format: ResponseFormat,
    reload: bool,
}

impl ChannelData {
    fn new(deal: &ProviderDealState) -> Self {
        let mut data = ChannelData {
            deal: deal.identifier(),
            status: deal.status,
            total_sent: 0,
            funds_received: TokenAmount::zero(),
            interval: 0,
            price_per_byte: deal.price_per_byte().clone(),
            unseal_price: TokenAmount::zero(),
            format: ResponseFormat::for_legacy(deal.legacy_protocol),
            reload: false,
        };
        data.refresh(deal);
        // The deal may move on before the first hook fires
        data.reload = true;
        data
    }

    fn refresh(&mut self, deal: &ProviderDealState) {
        self.status = deal.status;
        self.total_sent = deal.total_sent;
        self.funds_received = deal.funds_received.clone();
        self.interval = deal.current_interval;
        self.unseal_price = deal.unseal_price.clone();
        self.reload = false;
    }

    fn unpaid_bytes(&self) -> u64 {
        let paid = paid_for(&self.funds_received, &self.unseal_price, &self.price_per_byte, self.total_sent);
        self.total_sent - paid.min(self.total_sent)
    }

    fn payment_owed(&self) -> TokenAmount {
        payment_owed(&self.funds_received, &self.unseal_price, &self.price_per_byte, self.total_sent)
    }

    fn response(&self, status: DealStatus) -> DealResponse {
        DealResponse::new(self.deal.deal_id, status)
    }
}

type ChannelMap = HashMap<TransferChannelId, Arc<Mutex<ChannelData>>>;

pub struct Revalidator<E> {
    env: Arc<E>,
    channels: Arc<RwLock<ChannelMap>>,
    log: LogTarget,
}

impl<E> Clone for Revalidator<E> {
    fn clone(&self) -> Self {
        Self { env: Arc::clone(&self.env), channels: Arc::clone(&self.channels), log: self.log.clone() }
    }
}

impl<E: RevalidatorEnvironment> Revalidator<E> {
    pub fn new(env: Arc<E>, log: LogTarget) -> Self {
        Self { env, channels: Arc::new(RwLock::new(HashMap::new())), log }
    }

    /// Starts watching `channel` on behalf of `deal`. Tracking a channel again replaces its data.
    pub async fn track_channel(&self, channel: TransferChannelId, deal: &ProviderDealState) {
        debug!(target: self.log.as_str(), "Tracking channel {channel} for deal {}", deal.identifier());
        let data = ChannelData::new(deal);
        self.channels.write().await.insert(channel, Arc::new(Mutex::new(data)));
    }

    pub async fn untrack_channel(&self, channel: &TransferChannelId) -> bool {
        let removed = self.channels.write().await.remove(channel).is_some();
        if removed {
            debug!(target: self.log.as_str(), "No longer tracking channel {channel}");
        }
        removed
    }

    pub async fn is_tracking(&self, channel: &TransferChannelId) -> bool {
        self.channels.read().await.contains_key(channel)
    }

    /// More data went out on the channel. Pauses the channel once the client owes a full interval. Bytes that were
    /// already in flight when the channel was paused only raise the amount owed; the channel stays paused.
    pub async fn on_pull_data_sent(&self, channel: &TransferChannelId, additional_bytes: u64) -> HookResult {
        let Some(data) = self.channel(channel).await else {
            return Ok(None);
        };
        let mut data = data.lock().await;
        self.reload_if_stale(&mut data).await?;
        data.total_sent += additional_bytes;
        let total = data.total_sent;
        let awaiting_payment = matches!(data.status, DealStatus::FundsNeeded | DealStatus::FundsNeededLastPayment);
        if !awaiting_payment && data.unpaid_bytes() < data.interval {
            self.send_event(&mut data, ProviderEvent::BlockSent(total)).await?;
            return Ok(Some(RevalidationResult::proceed()));
        }
        let status = match data.status {
            DealStatus::FundsNeededLastPayment => DealStatus::FundsNeededLastPayment,
            _ => DealStatus::FundsNeeded,
        };
        self.send_event(&mut data, ProviderEvent::PaymentRequested(total)).await?;
        let owed = data.payment_owed();
        trace!(target: self.log.as_str(), "Pausing channel {channel} at {total} bytes until {owed} is paid");
        let response = data.response(status).with_payment_owed(owed);
        Ok(Some(RevalidationResult::pause_with(data.format.encode(response))))
    }

    /// All data has been sent. Completes the deal if it is paid up, and otherwise holds the channel open for the last
    /// payment.
    pub async fn on_complete(&self, channel: &TransferChannelId) -> HookResult {
        let Some(data) = self.channel(channel).await else {
            return Ok(None);
        };
        let mut data = data.lock().await;
        self.reload_if_stale(&mut data).await?;
        let total = data.total_sent;
        self.send_event(&mut data, ProviderEvent::BlocksCompleted(total)).await?;
        self.reload_if_stale(&mut data).await?;
        let owed = data.payment_owed();
        if data.status == DealStatus::FundsNeededLastPayment {
            let response = data.response(DealStatus::FundsNeededLastPayment).with_payment_owed(owed);
            return Ok(Some(RevalidationResult::pause_with(data.format.encode(response))));
        }
        if owed.is_zero() {
            self.send_event(&mut data, ProviderEvent::NothingOwed).await?;
            let response = data.response(DealStatus::Completed);
            return Ok(Some(RevalidationResult::resume_with(data.format.encode(response))));
        }
        self.send_event(&mut data, ProviderEvent::PaymentRequested(total)).await?;
        debug!(target: self.log.as_str(), "Channel {channel} finished sending; waiting for the last {owed}");
        let response = data.response(DealStatus::FundsNeededLastPayment).with_payment_owed(owed);
        Ok(Some(RevalidationResult::pause_with(data.format.encode(response))))
    }

    /// The client sent a voucher on the channel. Redeems it, and resumes the channel if it covers what is owed.
    pub async fn revalidate(&self, channel: &TransferChannelId, voucher: &TransferVoucher) -> HookResult {
        let Some(data) = self.channel(channel).await else {
            return Ok(None);
        };
        let payment = match voucher {
            TransferVoucher::Payment(p) | TransferVoucher::LegacyPayment(p) => p,
            other => return Err(RevalidationError::UnexpectedVoucher(other.voucher_type())),
        };
        let mut data = data.lock().await;
        if payment.id != data.deal.deal_id {
            return Err(RevalidationError::DealMismatch { expected: data.deal.deal_id, actual: payment.id });
        }
        self.reload_if_stale(&mut data).await?;
        let status = data.status;
        if !status.is_funds_needed() {
            return Err(RevalidationError::NotAwaitingPayment(status));
        }
        let owed = data.payment_owed();
        let redemption = match redeem_payment(self.env.node(), payment, &owed).await {
            Ok(r) => r,
            Err(e) => {
                warn!(target: self.log.as_str(), "Could not save voucher on channel {channel}: {e}");
                self.send_event(&mut data, ProviderEvent::SaveVoucherFailed(e.to_string())).await?;
                return Err(e.into());
            }
        };
        match redemption {
            Redemption::Partial { received, shortfall } => {
                debug!(target: self.log.as_str(), "Channel {channel}: received {received}, still owed {shortfall}");
                self.send_event(&mut data, ProviderEvent::PartialPaymentReceived(received)).await?;
                let response =
                    data.response(status).with_message("not enough funds received").with_payment_owed(shortfall);
                Ok(Some(RevalidationResult::pause_with(data.format.encode(response))))
            }
            Redemption::Full { received } => {
                trace!(target: self.log.as_str(), "Channel {channel}: received {received}");
                self.send_event(&mut data, ProviderEvent::PaymentReceived(received)).await?;
                if status == DealStatus::FundsNeededLastPayment {
                    let response = data.response(DealStatus::Completed);
                    return Ok(Some(RevalidationResult::resume_with(data.format.encode(response))));
                }
                Ok(Some(RevalidationResult::proceed()))
            }
        }
    }

    /// The client closed the channel before the deal finished.
    pub async fn on_channel_cancelled(&self, channel: &TransferChannelId) -> Result<bool, RevalidationError> {
        let Some(data) = self.channels.write().await.remove(channel) else {
            return Ok(false);
        };
        let mut data = data.lock().await;
        info!(target: self.log.as_str(), "Client cancelled channel {channel} for deal {}", data.deal);
        self.send_event(&mut data, ProviderEvent::ClientCancelled).await?;
        Ok(true)
    }

    async fn channel(&self, channel: &TransferChannelId) -> Option<Arc<Mutex<ChannelData>>> {
        self.channels.read().await.get(channel).cloned()
    }

    async fn reload_if_stale(&self, data: &mut ChannelData) -> Result<(), RevalidationError> {
        if !data.reload {
            return Ok(());
        }
        let deal = self.env.get_deal(&data.deal).await.ok_or(RevalidationError::UnknownDeal(data.deal))?;
        data.refresh(&deal);
        Ok(())
    }

    async fn send_event(&self, data: &mut ChannelData, event: ProviderEvent) -> Result<(), RevalidationError> {
        data.reload = true;
        self.env.send_event(data.deal, event).await?;
        Ok(())
    }
}
