use crate::amount::TokenAmount;
use crate::logging::LogTarget;
use crate::messages::{Block, DealPayment, DealResponse};
use crate::node::{NodeError, PieceLookupError, ProviderDelegate, RetrievalProviderNode};
use crate::policy::DealPolicy;
use crate::provider_deal::{paid_for, payment_owed, DealTransport, ProviderDealState};
use crate::state_machine::deal_group::DealFsm;
use crate::state_machine::error::LifeCycleError;
use crate::state_machine::provider_events::ProviderEvent;
use crate::state_machine::provider_fsm::{apply_provider_event, provider_action_for, ProviderAction};
use crate::status::DealStatus;
use crate::stream::{DealStream, DealStreams};
use crate::transfer::DataTransfer;
use log::*;
use std::sync::Arc;

/// What provider deal handlers need from the outside world.
pub struct ProviderEnvironment<D, S, T> {
    pub delegate: D,
    pub transfer: Arc<T>,
    pub policy: DealPolicy,
    pub streams: DealStreams<S>,
    pub log: LogTarget,
}

impl<D: Clone, S, T> Clone for ProviderEnvironment<D, S, T> {
    fn clone(&self) -> Self {
        Self {
            delegate: self.delegate.clone(),
            transfer: Arc::clone(&self.transfer),
            policy: self.policy.clone(),
            streams: self.streams.clone(),
            log: self.log.clone(),
        }
    }
}

pub struct ProviderFsm<D, S, T> {
    env: ProviderEnvironment<D, S, T>,
}

impl<D, S, T> ProviderFsm<D, S, T>
where
    D: ProviderDelegate + 'static,
    S: DealStream,
    T: DataTransfer,
{
    pub fn new(env: ProviderEnvironment<D, S, T>) -> Self {
        Self { env }
    }

    pub fn env(&self) -> &ProviderEnvironment<D, S, T> {
        &self.env
    }
}

impl<D, S, T> DealFsm for ProviderFsm<D, S, T>
where
    D: ProviderDelegate + 'static,
    S: DealStream,
    T: DataTransfer,
{
    type State = ProviderDealState;
    type Event = ProviderEvent;

    fn apply(&self, state: &mut ProviderDealState, event: &ProviderEvent) -> Result<(), LifeCycleError> {
        apply_provider_event(state, event)
    }

    async fn on_enter(&self, state: &ProviderDealState) -> Option<ProviderEvent> {
        let action = provider_action_for(state)?;
        trace!(target: self.env.log.as_str(), "Deal {}: running {action:?}", state.identifier());
        Some(run_provider_action(action, &self.env, state).await)
    }
}

pub async fn run_provider_action<D, S, T>(
    action: ProviderAction,
    env: &ProviderEnvironment<D, S, T>,
    deal: &ProviderDealState,
) -> ProviderEvent
where
    D: ProviderDelegate,
    S: DealStream,
    T: DataTransfer,
{
    match action {
        ProviderAction::ReceiveDeal => receive_deal(env, deal).await,
        ProviderAction::SendBlocks => send_blocks(env, deal).await,
        ProviderAction::ResumeTransfer => resume_transfer(env, deal).await,
        ProviderAction::RequestLastPayment => request_last_payment(deal),
        ProviderAction::ProcessPayment => process_payment(env, deal).await,
        ProviderAction::Finalize => finalize(env, deal).await,
        ProviderAction::SendFailResponse => send_fail_response(env, deal).await,
    }
}

/// The outcome of redeeming a payment voucher against what the client owes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Redemption {
    Partial { received: TokenAmount, shortfall: TokenAmount },
    Full { received: TokenAmount },
}

/// Saves the voucher and compares the new value it carries with `owed`. A voucher that was already saved carries no
/// new value, so resubmitting it counts as a payment of zero.
pub(crate) async fn redeem_payment<N: RetrievalProviderNode>(
    node: &N,
    payment: &DealPayment,
    owed: &TokenAmount,
) -> Result<Redemption, NodeError> {
    let received = node.save_payment_voucher(&payment.payment_channel, &payment.payment_voucher, None, owed).await?;
    match owed.checked_sub(&received) {
        Some(shortfall) if !shortfall.is_zero() => Ok(Redemption::Partial { received, shortfall }),
        _ => Ok(Redemption::Full { received }),
    }
}

async fn write_response<S: DealStream>(
    streams: &DealStreams<S>,
    deal: &ProviderDealState,
    response: DealResponse,
) -> Result<(), String> {
    let stream = streams.get(&deal.identifier()).ok_or_else(|| "no deal stream for the deal".to_string())?;
    stream.write_deal_response(response).await.map_err(|e| e.to_string())
}

async fn receive_deal<D, S, T>(env: &ProviderEnvironment<D, S, T>, deal: &ProviderDealState) -> ProviderEvent
where
    D: ProviderDelegate,
    S: DealStream,
{
    let id = deal.id();
    let proposal = &deal.proposal;
    let piece_info = match env.delegate.get_piece_info(&proposal.payload_cid, proposal.params.piece_cid.as_ref()).await
    {
        Ok(info) => info,
        Err(PieceLookupError::NotFound) => {
            let message = PieceLookupError::NotFound.to_string();
            let response = DealResponse::new(id, DealStatus::DealNotFound).with_message(message.clone());
            if let Err(e) = write_response(&env.streams, deal, response).await {
                return ProviderEvent::WriteResponseFailed(e);
            }
            return ProviderEvent::DealNotFound(message);
        }
        Err(e) => return ProviderEvent::GetPieceSizeErrored(e.to_string()),
    };
    if let Err(reason) = env.policy.evaluate(deal).await {
        info!(target: env.log.as_str(), "Rejecting deal {}: {reason}", deal.identifier());
        let response = DealResponse::new(id, DealStatus::Rejected).with_message(reason.clone());
        if let Err(e) = write_response(&env.streams, deal, response).await {
            return ProviderEvent::WriteResponseFailed(e);
        }
        return ProviderEvent::DealRejected(reason);
    }
    let status = if deal.unseal_price.is_zero() { DealStatus::Accepted } else { DealStatus::FundsNeededUnseal };
    let response = DealResponse::new(id, status).with_payment_owed(deal.unseal_price.clone());
    if let Err(e) = write_response(&env.streams, deal, response).await {
        return ProviderEvent::WriteResponseFailed(e);
    }
    debug!(target: env.log.as_str(), "Accepted deal {} for piece {}", deal.identifier(), piece_info.piece_cid);
    ProviderEvent::DealAccepted(Some(piece_info))
}

/// Sends blocks until the client has a full interval's worth of unpaid data, or the payload runs out. Every response
/// carries at least one block; the last block of an interval may cross the interval boundary.
async fn send_blocks<D, S, T>(env: &ProviderEnvironment<D, S, T>, deal: &ProviderDealState) -> ProviderEvent
where
    D: ProviderDelegate,
    S: DealStream,
{
    let identifier = deal.identifier();
    let price = deal.price_per_byte();
    let mut total_sent = deal.total_sent;
    let mut blocks: Vec<Block> = Vec::new();
    let mut last = false;
    while blocks.is_empty()
        || total_sent - paid_for(&deal.funds_received, &deal.unseal_price, price, total_sent).min(total_sent)
            < deal.current_interval
    {
        match env.delegate.next_block(&identifier, &deal.proposal.payload_cid).await {
            Ok((block, is_last)) => {
                total_sent += block.len();
                blocks.push(block);
                if is_last {
                    last = true;
                    break;
                }
            }
            Err(e) => return ProviderEvent::BlockErrored(e.to_string()),
        }
    }
    let owed = payment_owed(&deal.funds_received, &deal.unseal_price, price, total_sent);
    let status = match (last, owed.is_zero()) {
        (true, true) => DealStatus::BlocksComplete,
        (true, false) => DealStatus::FundsNeededLastPayment,
        (false, _) => DealStatus::FundsNeeded,
    };
    trace!(target: env.log.as_str(), "Deal {identifier}: sending {} blocks, {total_sent} bytes in total", blocks.len());
    let response = DealResponse::new(deal.id(), status).with_payment_owed(owed).with_blocks(blocks);
    if let Err(e) = write_response(&env.streams, deal, response).await {
        return ProviderEvent::WriteResponseFailed(e);
    }
    if last {
        ProviderEvent::BlocksCompleted(total_sent)
    } else {
        ProviderEvent::PaymentRequested(total_sent)
    }
}

async fn resume_transfer<D, S, T: DataTransfer>(
    env: &ProviderEnvironment<D, S, T>,
    deal: &ProviderDealState,
) -> ProviderEvent {
    let Some(channel) = deal.channel_id else {
        return ProviderEvent::DataTransferError("the deal has no data-transfer channel".into());
    };
    match env.transfer.resume_channel(channel).await {
        Ok(()) => ProviderEvent::TransferResumed,
        Err(e) => ProviderEvent::DataTransferError(e.to_string()),
    }
}

fn request_last_payment(deal: &ProviderDealState) -> ProviderEvent {
    if deal.payment_owed().is_zero() {
        ProviderEvent::NothingOwed
    } else {
        ProviderEvent::PaymentRequested(deal.total_sent)
    }
}

async fn process_payment<D, S, T>(env: &ProviderEnvironment<D, S, T>, deal: &ProviderDealState) -> ProviderEvent
where
    D: ProviderDelegate,
    S: DealStream,
{
    let Some(stream) = env.streams.get(&deal.identifier()) else {
        return ProviderEvent::ReadPaymentFailed("no deal stream for the deal".into());
    };
    let payment = match stream.read_deal_payment().await {
        Ok(payment) => payment,
        Err(e) => return ProviderEvent::ReadPaymentFailed(e.to_string()),
    };
    if payment.id != deal.id() {
        return ProviderEvent::ReadPaymentFailed(format!("received payment for deal {}", payment.id));
    }
    let owed = deal.payment_owed();
    match redeem_payment(&env.delegate, &payment, &owed).await {
        Ok(Redemption::Full { received }) => {
            debug!(target: env.log.as_str(), "Deal {}: received {received}, owed {owed}", deal.identifier());
            ProviderEvent::PaymentReceived(received)
        }
        Ok(Redemption::Partial { received, shortfall }) => {
            debug!(target: env.log.as_str(), "Deal {}: received {received}, still owed {shortfall}", deal.identifier());
            let response = DealResponse::new(deal.id(), deal.status)
                .with_message("not enough funds received")
                .with_payment_owed(shortfall);
            match stream.write_deal_response(response).await {
                Ok(()) => ProviderEvent::PartialPaymentReceived(received),
                Err(e) => ProviderEvent::WriteResponseFailed(e.to_string()),
            }
        }
        Err(e) => ProviderEvent::SaveVoucherFailed(e.to_string()),
    }
}

async fn finalize<D, S: DealStream, T>(env: &ProviderEnvironment<D, S, T>, deal: &ProviderDealState) -> ProviderEvent {
    if deal.transport == DealTransport::Stream {
        let response = DealResponse::new(deal.id(), DealStatus::Completed);
        if let Err(e) = write_response(&env.streams, deal, response).await {
            return ProviderEvent::WriteResponseFailed(e);
        }
    }
    ProviderEvent::Complete
}

async fn send_fail_response<D, S: DealStream, T: DataTransfer>(
    env: &ProviderEnvironment<D, S, T>,
    deal: &ProviderDealState,
) -> ProviderEvent {
    match deal.transport {
        DealTransport::Stream => {
            let response = DealResponse::new(deal.id(), DealStatus::Failed).with_message(deal.message.clone());
            if let Err(e) = write_response(&env.streams, deal, response).await {
                return ProviderEvent::WriteResponseFailed(e);
            }
        }
        DealTransport::DataTransfer => {
            if let Some(channel) = deal.channel_id {
                if let Err(e) = env.transfer.close_channel(channel).await {
                    warn!(target: env.log.as_str(), "Could not close channel {channel} of failed deal: {e}");
                }
            }
        }
    }
    ProviderEvent::FailResponseSent
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::deal_id::DealId;
    use crate::helpers::raw_cid;
    use crate::helpers::test_helpers::random_peer;
    use crate::messages::{DealProposal, Params};
    use crate::node::{ChannelFunding, DummyPaymentNode, DummyProviderDelegate, RetrievalClientNode};
    use crate::payment::Address;
    use crate::policy::Ask;
    use crate::stream::MemoryDealStream;
    use crate::transfer::RecordingTransfer;

    type Env = ProviderEnvironment<DummyProviderDelegate, MemoryDealStream, RecordingTransfer>;

    struct Harness {
        env: Env,
        client_end: MemoryDealStream,
        payments: DummyPaymentNode,
    }

    fn ask() -> Ask {
        Ask {
            price_per_byte: 500.into(),
            unseal_price: 0.into(),
            payment_interval: 1000,
            payment_interval_increase: 500,
        }
    }

    fn harness(deal: &ProviderDealState) -> Harness {
        let payments = DummyPaymentNode::new();
        let provider = random_peer();
        let (provider_end, client_end) = MemoryDealStream::pair(provider, deal.receiver);
        let streams = DealStreams::new();
        streams.add(deal.identifier(), Arc::new(provider_end));
        let env = ProviderEnvironment {
            delegate: DummyProviderDelegate::new(payments.clone()),
            transfer: Arc::new(RecordingTransfer::new(provider)),
            policy: DealPolicy::new(ask()),
            streams,
            log: LogTarget::new("test::provider"),
        };
        Harness { env, client_end, payments }
    }

    fn stream_deal(payload: cid::Cid, price: u64) -> ProviderDealState {
        let params = Params::new(price.into(), 1000, 500, 0.into());
        let proposal = DealProposal { id: DealId::new(9), payload_cid: payload, params };
        ProviderDealState::new(proposal, random_peer(), DealTransport::Stream)
    }

    async fn step(env: &Env, deal: &mut ProviderDealState) -> ProviderEvent {
        let action = provider_action_for(deal).expect("an entry handler");
        let event = run_provider_action(action, env, deal).await;
        apply_provider_event(deal, &event).unwrap_or_else(|e| panic!("{event}: {e}"));
        event
    }

    #[tokio::test]
    async fn unknown_payloads_are_not_found() {
        env_logger::try_init().ok();
        let mut deal = stream_deal(raw_cid(b"nobody has this"), 500);
        let h = harness(&deal);
        step(&h.env, &mut deal).await;
        assert_eq!(deal.status, DealStatus::DealNotFound);
        assert_eq!(deal.message, "not found");
        let response = h.client_end.read_deal_response().await.unwrap();
        assert_eq!(response.status, DealStatus::DealNotFound);
    }

    #[tokio::test]
    async fn cheap_proposals_are_rejected() {
        let mut deal = stream_deal(raw_cid(b"x"), 100);
        let h = harness(&deal);
        deal.proposal.payload_cid = h.env.delegate.add_payload(&[1u8; 3000], 400);
        step(&h.env, &mut deal).await;
        assert_eq!(deal.status, DealStatus::Rejected);
        assert_eq!(deal.message, "Price per byte too low");
        let response = h.client_end.read_deal_response().await.unwrap();
        assert_eq!((response.status, response.message.as_str()), (DealStatus::Rejected, "Price per byte too low"));
    }

    #[tokio::test]
    async fn broken_piece_store_fails_with_a_response() {
        let mut deal = stream_deal(raw_cid(b"x"), 500);
        let h = harness(&deal);
        h.env.delegate.pieces.fail_with("index offline");
        step(&h.env, &mut deal).await;
        assert_eq!(deal.status, DealStatus::Failing);
        step(&h.env, &mut deal).await;
        assert_eq!(deal.status, DealStatus::Failed);
        let response = h.client_end.read_deal_response().await.unwrap();
        assert_eq!(response.status, DealStatus::Failed);
        assert!(response.message.contains("index offline"));
    }

    /// 3000 bytes in 400 byte blocks, paid every 1000 bytes (+500): the provider never gets more than an interval
    /// (rounded up to whole blocks) ahead of the client's payments.
    #[tokio::test]
    async fn blocks_are_sent_one_interval_at_a_time() {
        env_logger::try_init().ok();
        let mut deal = stream_deal(raw_cid(b"x"), 500);
        let h = harness(&deal);
        deal.proposal.payload_cid = h.env.delegate.add_payload(&[1u8; 3000], 400);
        let (client, miner) = (Address::new("t01"), Address::new("t02"));
        let wait_msg = match h.payments.get_or_create_payment_channel(&client, &miner, &0.into()).await {
            Ok(ChannelFunding::Creating { wait_msg }) => wait_msg,
            other => panic!("unexpected {other:?}"),
        };
        let pay_ch = h.payments.wait_for_payment_channel_creation(wait_msg).await.unwrap();

        assert!(matches!(step(&h.env, &mut deal).await, ProviderEvent::DealAccepted(Some(_))));
        assert_eq!(h.client_end.read_deal_response().await.unwrap().status, DealStatus::Accepted);
        let mut paid = TokenAmount::zero();
        loop {
            let event = step(&h.env, &mut deal).await;
            let response = h.client_end.read_deal_response().await.unwrap();
            let unpaid = deal.total_sent - deal.total_paid_for();
            let largest_block = 400;
            assert!(unpaid < deal.current_interval + largest_block, "{unpaid} unpaid bytes");
            if matches!(event, ProviderEvent::BlocksCompleted(_)) {
                assert_eq!(response.status, DealStatus::FundsNeededLastPayment);
                break;
            }
            assert_eq!(response.status, DealStatus::FundsNeeded);
            paid += &response.payment_owed;
            let voucher = h.payments.create_payment_voucher(&pay_ch, &paid, 0).await.unwrap();
            let payment = DealPayment { id: deal.id(), payment_channel: pay_ch.clone(), payment_voucher: voucher };
            h.client_end.write_deal_payment(payment).await.unwrap();
            assert!(matches!(step(&h.env, &mut deal).await, ProviderEvent::PaymentReceived(_)));
        }
        assert_eq!(deal.total_sent, 3000);
        // Last payment
        assert!(matches!(step(&h.env, &mut deal).await, ProviderEvent::PaymentRequested(3000)));
        let owed = deal.payment_owed();
        paid += &owed;
        let voucher = h.payments.create_payment_voucher(&pay_ch, &paid, 0).await.unwrap();
        let payment = DealPayment { id: deal.id(), payment_channel: pay_ch.clone(), payment_voucher: voucher };
        h.client_end.write_deal_payment(payment).await.unwrap();
        step(&h.env, &mut deal).await;
        assert_eq!(deal.status, DealStatus::Finalizing);
        step(&h.env, &mut deal).await;
        assert_eq!(deal.status, DealStatus::Completed);
        assert_eq!(h.client_end.read_deal_response().await.unwrap().status, DealStatus::Completed);
        assert_eq!(deal.funds_received, TokenAmount::from(3000 * 500));
        assert_eq!(h.payments.redeemed(&pay_ch), TokenAmount::from(3000 * 500));
    }

    #[tokio::test]
    async fn a_repeated_voucher_counts_as_nothing() {
        let mut deal = stream_deal(raw_cid(b"x"), 500);
        let h = harness(&deal);
        deal.status = DealStatus::FundsNeeded;
        deal.total_sent = 1200;
        let pay_ch = Address::new("t0100");
        let voucher = h.payments.create_payment_voucher(&pay_ch, &600_000.into(), 0).await.unwrap();
        let payment = DealPayment { id: deal.id(), payment_channel: pay_ch.clone(), payment_voucher: voucher };
        let owed = deal.payment_owed();
        assert_eq!(
            redeem_payment(&h.env.delegate, &payment, &owed).await.unwrap(),
            Redemption::Full { received: 600_000.into() }
        );
        deal.funds_received = 600_000.into();
        h.client_end.write_deal_payment(payment).await.unwrap();
        // 1200 bytes at 500 is 600000, which was already paid. Resubmitting the voucher pays nothing new.
        deal.total_sent = 2400;
        assert_eq!(step(&h.env, &mut deal).await, ProviderEvent::PartialPaymentReceived(TokenAmount::zero()));
        assert_eq!(deal.funds_received, TokenAmount::from(600_000));
        let response = h.client_end.read_deal_response().await.unwrap();
        assert_eq!(response.payment_owed, TokenAmount::from(600_000));
    }
}
