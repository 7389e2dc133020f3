use crate::client_deal::ClientDealState;
use crate::logging::LogTarget;
use crate::messages::{DealPayment, TransferVoucher};
use crate::node::{ChannelFunding, RetrievalClientNode};
use crate::state_machine::client_events::ClientEvent;
use crate::state_machine::client_fsm::{apply_client_event, client_action_for, ClientAction};
use crate::state_machine::deal_group::DealFsm;
use crate::state_machine::error::LifeCycleError;
use crate::transfer::DataTransfer;
use log::*;
use std::sync::Arc;

/// What client deal handlers need from the outside world.
pub struct ClientEnvironment<N, T> {
    pub node: Arc<N>,
    pub transfer: Arc<T>,
    pub log: LogTarget,
}

impl<N, T> Clone for ClientEnvironment<N, T> {
    fn clone(&self) -> Self {
        Self { node: Arc::clone(&self.node), transfer: Arc::clone(&self.transfer), log: self.log.clone() }
    }
}

/// The client deal state machine: [`apply_client_event`] for transitions and the handlers below for side effects.
pub struct ClientFsm<N, T> {
    env: ClientEnvironment<N, T>,
}

impl<N, T> ClientFsm<N, T>
where
    N: RetrievalClientNode,
    T: DataTransfer,
{
    pub fn new(env: ClientEnvironment<N, T>) -> Self {
        Self { env }
    }

    pub fn env(&self) -> &ClientEnvironment<N, T> {
        &self.env
    }
}

impl<N, T> DealFsm for ClientFsm<N, T>
where
    N: RetrievalClientNode,
    T: DataTransfer,
{
    type State = ClientDealState;
    type Event = ClientEvent;

    fn apply(&self, state: &mut ClientDealState, event: &ClientEvent) -> Result<(), LifeCycleError> {
        apply_client_event(state, event)
    }

    async fn on_enter(&self, state: &ClientDealState) -> Option<ClientEvent> {
        let action = client_action_for(state)?;
        trace!(target: self.env.log.as_str(), "Deal {}: running {action:?}", state.id());
        run_client_action(action, &self.env, state).await
    }
}

pub async fn run_client_action<N, T>(
    action: ClientAction,
    env: &ClientEnvironment<N, T>,
    deal: &ClientDealState,
) -> Option<ClientEvent>
where
    N: RetrievalClientNode,
    T: DataTransfer,
{
    match action {
        ClientAction::SetupPaymentChannelStart => Some(setup_payment_channel_start(env, deal).await),
        ClientAction::WaitForPaymentChannelCreate => Some(wait_for_payment_channel_create(env, deal).await),
        ClientAction::WaitForPaymentChannelAddFunds => Some(wait_for_payment_channel_add_funds(env, deal).await),
        ClientAction::ProposeDeal => Some(propose_deal(env, deal).await),
        ClientAction::Ongoing => ongoing(deal),
        ClientAction::ProcessPaymentRequested => process_payment_requested(deal),
        ClientAction::SendFunds => Some(send_funds(env, deal).await),
        ClientAction::CancelDeal => Some(cancel_deal(env, deal).await),
    }
}

async fn setup_payment_channel_start<N: RetrievalClientNode, T>(
    env: &ClientEnvironment<N, T>,
    deal: &ClientDealState,
) -> ClientEvent {
    match env.node.get_or_create_payment_channel(&deal.client_wallet, &deal.miner_wallet, &deal.total_funds).await {
        Ok(ChannelFunding::Creating { wait_msg }) => {
            debug!(target: env.log.as_str(), "Deal {}: creating payment channel, waiting on {wait_msg}", deal.id());
            ClientEvent::PaymentChannelCreateInitiated(wait_msg)
        }
        Ok(ChannelFunding::AddingFunds { pay_ch, wait_msg }) => {
            debug!(target: env.log.as_str(), "Deal {}: adding funds to {pay_ch}, waiting on {wait_msg}", deal.id());
            ClientEvent::PaymentChannelAddingFunds { wait_msg, pay_ch }
        }
        Err(e) => ClientEvent::PaymentChannelErrored(e.to_string()),
    }
}

async fn wait_for_payment_channel_create<N: RetrievalClientNode, T>(
    env: &ClientEnvironment<N, T>,
    deal: &ClientDealState,
) -> ClientEvent {
    let Some(wait_msg) = deal.wait_msg_cid else {
        return ClientEvent::PaymentChannelErrored("no channel creation message to wait for".into());
    };
    let pay_ch = match env.node.wait_for_payment_channel_creation(wait_msg).await {
        Ok(pay_ch) => pay_ch,
        Err(e) => return ClientEvent::PaymentChannelErrored(e.to_string()),
    };
    match env.node.allocate_lane(&pay_ch).await {
        Ok(lane) => ClientEvent::PaymentChannelReady { pay_ch, lane },
        Err(e) => ClientEvent::AllocateLaneErrored(e.to_string()),
    }
}

async fn wait_for_payment_channel_add_funds<N: RetrievalClientNode, T>(
    env: &ClientEnvironment<N, T>,
    deal: &ClientDealState,
) -> ClientEvent {
    let (Some(wait_msg), Some(info)) = (deal.wait_msg_cid, deal.payment_info.as_ref()) else {
        return ClientEvent::PaymentChannelAddFundsErrored("no add funds message to wait for".into());
    };
    if let Err(e) = env.node.wait_for_payment_channel_add_funds(wait_msg).await {
        return ClientEvent::PaymentChannelAddFundsErrored(e.to_string());
    }
    match env.node.allocate_lane(&info.pay_ch).await {
        Ok(lane) => ClientEvent::PaymentChannelReady { pay_ch: info.pay_ch.clone(), lane },
        Err(e) => ClientEvent::AllocateLaneErrored(e.to_string()),
    }
}

async fn propose_deal<N, T: DataTransfer>(env: &ClientEnvironment<N, T>, deal: &ClientDealState) -> ClientEvent {
    let voucher = if deal.legacy_protocol {
        TransferVoucher::LegacyProposal(deal.proposal.clone())
    } else {
        TransferVoucher::Proposal(deal.proposal.clone())
    };
    let selector = deal.proposal.params.selector.clone();
    match env.transfer.open_pull_channel(deal.sender, voucher, deal.proposal.payload_cid, selector).await {
        Ok(channel) => {
            info!(target: env.log.as_str(), "Deal {}: proposed to {} on channel {channel}", deal.id(), deal.sender);
            ClientEvent::DealProposed(channel)
        }
        Err(e) => ClientEvent::WriteDealProposalErrored(e.to_string()),
    }
}

fn ongoing(deal: &ClientDealState) -> Option<ClientEvent> {
    if deal.payment_requested.is_zero() {
        return None;
    }
    let amount = deal.payment_requested.clone();
    if deal.last_payment_requested {
        Some(ClientEvent::LastPaymentRequested(amount))
    } else {
        Some(ClientEvent::PaymentRequested(amount))
    }
}

/// Decides whether an outstanding payment request is due now. A request is paid straight away when it covers the
/// unseal price, is the last payment, or when all blocks are in; otherwise once a full interval's worth of bytes has
/// arrived.
fn process_payment_requested(deal: &ClientDealState) -> Option<ClientEvent> {
    if deal.payment_requested.is_zero() {
        return None;
    }
    let due = deal.last_payment_requested
        || deal.all_blocks_received
        || !deal.unseal_outstanding().is_zero()
        || deal.unpaid_bytes() >= deal.current_interval;
    due.then_some(ClientEvent::SendFunds)
}

async fn send_funds<N, T>(env: &ClientEnvironment<N, T>, deal: &ClientDealState) -> ClientEvent
where
    N: RetrievalClientNode,
    T: DataTransfer,
{
    let requested = &deal.payment_requested;
    let total = &deal.funds_spent + requested;
    if total > deal.total_funds {
        return ClientEvent::FundsExpended(format!(
            "not enough funds left: expected amt = {total}, actual = {}",
            deal.total_funds
        ));
    }
    let max_payable = deal.max_payable();
    if requested > &max_payable {
        return ClientEvent::BadPaymentRequested(format!(
            "too much money requested for bytes sent: requested {requested}, owed at most {max_payable}"
        ));
    }
    let Some(info) = deal.payment_info.as_ref() else {
        return ClientEvent::CreateVoucherFailed("the deal has no payment channel".into());
    };
    let voucher = match env.node.create_payment_voucher(&info.pay_ch, &total, info.lane).await {
        Ok(voucher) => voucher,
        Err(e) => return ClientEvent::CreateVoucherFailed(e.to_string()),
    };
    let Some(channel) = deal.channel_id else {
        return ClientEvent::WriteDealPaymentErrored("the deal has no data-transfer channel".into());
    };
    let payment = DealPayment { id: deal.id(), payment_channel: info.pay_ch.clone(), payment_voucher: voucher };
    let voucher = if deal.legacy_protocol {
        TransferVoucher::LegacyPayment(payment)
    } else {
        TransferVoucher::Payment(payment)
    };
    match env.transfer.send_voucher(channel, voucher).await {
        Ok(()) => {
            debug!(target: env.log.as_str(), "Deal {}: sent voucher for {total} on {}", deal.id(), info.pay_ch);
            ClientEvent::PaymentSent
        }
        Err(e) => ClientEvent::WriteDealPaymentErrored(e.to_string()),
    }
}

async fn cancel_deal<N, T: DataTransfer>(env: &ClientEnvironment<N, T>, deal: &ClientDealState) -> ClientEvent {
    if let Some(channel) = deal.channel_id {
        if let Err(e) = env.transfer.close_channel(channel).await {
            warn!(target: env.log.as_str(), "Deal {}: could not close channel {channel}: {e}", deal.id());
        }
    }
    ClientEvent::CancelComplete
}
