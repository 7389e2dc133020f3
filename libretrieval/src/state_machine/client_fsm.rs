//! Client deal transitions. Everything in here is pure: no I/O, no clocks. The handlers in
//! [`super::client_handlers`] do the talking to the outside world and report back with events.

use crate::client_deal::ClientDealState;
use crate::payment::PaymentInfo;
use crate::state_machine::client_events::ClientEvent;
use crate::state_machine::error::LifeCycleError;
use crate::status::DealStatus;
use std::cmp::min;

/// The handler to run when a client deal enters a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAction {
    SetupPaymentChannelStart,
    WaitForPaymentChannelCreate,
    WaitForPaymentChannelAddFunds,
    ProposeDeal,
    /// Re-raises a payment request that was recorded but not yet acted on, e.g. across a restart.
    Ongoing,
    ProcessPaymentRequested,
    SendFunds,
    CancelDeal,
}

pub fn client_action_for(state: &ClientDealState) -> Option<ClientAction> {
    use DealStatus::*;
    match state.status {
        New => Some(ClientAction::SetupPaymentChannelStart),
        PaymentChannelCreating => Some(ClientAction::WaitForPaymentChannelCreate),
        PaymentChannelAddingFunds => Some(ClientAction::WaitForPaymentChannelAddFunds),
        PaymentChannelReady => Some(ClientAction::ProposeDeal),
        Ongoing => Some(ClientAction::Ongoing),
        FundsNeeded | FundsNeededUnseal | FundsNeededLastPayment => Some(ClientAction::ProcessPaymentRequested),
        SendFunds | SendFundsLastPayment => Some(ClientAction::SendFunds),
        Cancelling => Some(ClientAction::CancelDeal),
        _ => None,
    }
}

/// Applies `event` to the deal. Events that are not allowed from the deal's current status are rejected and leave the
/// deal untouched.
pub fn apply_client_event(state: &mut ClientDealState, event: &ClientEvent) -> Result<(), LifeCycleError> {
    use DealStatus::*;
    let status = state.status;
    if status.is_terminal() {
        return Err(LifeCycleError::Terminal(status));
    }
    let invalid = || LifeCycleError::invalid_transition(status, event);
    match event {
        ClientEvent::Open => {
            if status != New {
                return Err(invalid());
            }
        }
        ClientEvent::PaymentChannelCreateInitiated(wait_msg) => {
            if status != New {
                return Err(invalid());
            }
            state.wait_msg_cid = Some(*wait_msg);
            state.status = PaymentChannelCreating;
        }
        ClientEvent::PaymentChannelAddingFunds { wait_msg, pay_ch } => {
            if status != New {
                return Err(invalid());
            }
            state.wait_msg_cid = Some(*wait_msg);
            // The lane is allocated once the funds have landed
            state.payment_info = Some(PaymentInfo { pay_ch: pay_ch.clone(), lane: 0 });
            state.status = PaymentChannelAddingFunds;
        }
        ClientEvent::PaymentChannelReady { pay_ch, lane } => {
            if !matches!(status, PaymentChannelCreating | PaymentChannelAddingFunds) {
                return Err(invalid());
            }
            state.payment_info = Some(PaymentInfo { pay_ch: pay_ch.clone(), lane: *lane });
            state.wait_msg_cid = None;
            state.status = PaymentChannelReady;
        }
        ClientEvent::PaymentChannelErrored(msg) => {
            if !matches!(status, New | PaymentChannelCreating | PaymentChannelAddingFunds) {
                return Err(invalid());
            }
            fail(state, Failed, format!("error initializing payment channel: {msg}"));
        }
        ClientEvent::PaymentChannelAddFundsErrored(msg) => {
            if status != PaymentChannelAddingFunds {
                return Err(invalid());
            }
            fail(state, Failed, format!("error adding funds to payment channel: {msg}"));
        }
        ClientEvent::AllocateLaneErrored(msg) => {
            if !matches!(status, PaymentChannelCreating | PaymentChannelAddingFunds) {
                return Err(invalid());
            }
            fail(state, Failed, format!("allocating payment lane: {msg}"));
        }
        ClientEvent::DealProposed(channel_id) => {
            if status != PaymentChannelReady {
                return Err(invalid());
            }
            state.channel_id = Some(*channel_id);
            state.status = WaitForAcceptance;
        }
        ClientEvent::WriteDealProposalErrored(msg) => {
            if status != PaymentChannelReady {
                return Err(invalid());
            }
            fail(state, Errored, format!("proposing deal: {msg}"));
        }
        ClientEvent::DealAccepted => {
            if status != WaitForAcceptance {
                return Err(invalid());
            }
            state.status = Accepted;
        }
        ClientEvent::DealRejected(msg) => {
            if status != WaitForAcceptance {
                return Err(invalid());
            }
            fail(state, Rejected, format!("deal rejected: {msg}"));
        }
        ClientEvent::DealNotFound(msg) => {
            if status != WaitForAcceptance {
                return Err(invalid());
            }
            fail(state, DealNotFound, msg.clone());
        }
        ClientEvent::BlocksReceived(total) => {
            if !matches!(
                status,
                WaitForAcceptance
                    | Accepted
                    | Ongoing
                    | FundsNeeded
                    | FundsNeededUnseal
                    | FundsNeededLastPayment
                    | BlocksComplete
                    | Finalizing
            ) {
                return Err(invalid());
            }
            state.total_received = state.total_received.max(*total);
            if status == Accepted {
                state.status = Ongoing;
            }
        }
        ClientEvent::AllBlocksReceived => {
            if !matches!(
                status,
                Accepted
                    | Ongoing
                    | FundsNeeded
                    | FundsNeededUnseal
                    | FundsNeededLastPayment
                    | BlocksComplete
                    | Finalizing
            ) {
                return Err(invalid());
            }
            state.all_blocks_received = true;
            if matches!(status, Accepted | Ongoing) {
                state.status = BlocksComplete;
            }
        }
        ClientEvent::PaymentRequested(amount) => {
            if !matches!(
                status,
                WaitForAcceptance | Accepted | Ongoing | FundsNeeded | FundsNeededUnseal | BlocksComplete
            ) {
                return Err(invalid());
            }
            state.payment_requested = amount.clone();
            state.status = if state.unseal_outstanding().is_zero() { FundsNeeded } else { FundsNeededUnseal };
        }
        ClientEvent::LastPaymentRequested(amount) => {
            if !matches!(
                status,
                WaitForAcceptance
                    | Accepted
                    | Ongoing
                    | FundsNeeded
                    | FundsNeededUnseal
                    | FundsNeededLastPayment
                    | BlocksComplete
            ) {
                return Err(invalid());
            }
            state.payment_requested = amount.clone();
            state.last_payment_requested = true;
            state.status = FundsNeededLastPayment;
        }
        ClientEvent::SendFunds => {
            state.status = match status {
                FundsNeeded | FundsNeededUnseal => SendFunds,
                FundsNeededLastPayment => SendFundsLastPayment,
                _ => return Err(invalid()),
            };
        }
        ClientEvent::PaymentSent => {
            let next = match status {
                SendFunds if state.all_blocks_received => BlocksComplete,
                SendFunds => Ongoing,
                SendFundsLastPayment => Finalizing,
                _ => return Err(invalid()),
            };
            record_payment(state);
            state.status = next;
        }
        ClientEvent::FundsExpended(msg)
        | ClientEvent::BadPaymentRequested(msg)
        | ClientEvent::CreateVoucherFailed(msg) => {
            if !matches!(status, SendFunds | SendFundsLastPayment) {
                return Err(invalid());
            }
            fail(state, Failed, msg.clone());
        }
        ClientEvent::WriteDealPaymentErrored(msg) => {
            if !matches!(status, SendFunds | SendFundsLastPayment) {
                return Err(invalid());
            }
            fail(state, Errored, format!("writing deal payment: {msg}"));
        }
        ClientEvent::Complete => {
            let finishing = matches!(status, Accepted | Ongoing | BlocksComplete | Finalizing);
            if !finishing || !state.payment_requested.is_zero() {
                return Err(invalid());
            }
            state.status = Completed;
        }
        ClientEvent::ProviderErrored(msg) => fail(state, Errored, format!("deal failed: {msg}")),
        ClientEvent::DataTransferError(msg) => fail(state, Errored, format!("error transferring data: {msg}")),
        ClientEvent::Cancel => {
            if status == Cancelling {
                return Err(invalid());
            }
            state.status = Cancelling;
        }
        ClientEvent::CancelComplete => {
            if status != Cancelling {
                return Err(invalid());
            }
            state.status = Cancelled;
        }
    }
    Ok(())
}

fn fail(state: &mut ClientDealState, status: DealStatus, message: String) {
    state.message = message;
    state.status = status;
}

/// Books the outstanding payment request as paid. The unseal price is paid off first; the rest buys bytes.
fn record_payment(state: &mut ClientDealState) {
    let requested = std::mem::take(&mut state.payment_requested);
    let unseal_part = min(requested.clone(), state.unseal_outstanding());
    let byte_part = requested.saturating_sub(&unseal_part);
    state.unseal_funds_paid += &unseal_part;
    state.funds_spent += &requested;
    match byte_part.bytes_at(state.price_per_byte()) {
        Some(bytes) => state.bytes_paid_for = state.bytes_paid_for.saturating_add(bytes),
        None => state.bytes_paid_for = state.total_received,
    }
    if !byte_part.is_zero() {
        state.current_interval += state.proposal.params.payment_interval_increase;
    }
}
