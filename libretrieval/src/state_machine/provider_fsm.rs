//! Provider deal transitions. Pure, like the client's; the side effects live in [`super::provider_handlers`].

use crate::provider_deal::{DealTransport, ProviderDealState};
use crate::state_machine::error::LifeCycleError;
use crate::state_machine::provider_events::ProviderEvent;
use crate::status::DealStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderAction {
    ReceiveDeal,
    SendBlocks,
    ResumeTransfer,
    RequestLastPayment,
    ProcessPayment,
    Finalize,
    SendFailResponse,
}

/// The handler to run on entering the deal's current status. Deals served over a data-transfer channel get most of
/// their events from the revalidator hooks, so they have fewer handlers than deals served over a deal stream.
pub fn provider_action_for(state: &ProviderDealState) -> Option<ProviderAction> {
    use DealStatus::*;
    match (state.status, state.transport) {
        (New, DealTransport::Stream) => Some(ProviderAction::ReceiveDeal),
        (Accepted | Ongoing, DealTransport::Stream) => Some(ProviderAction::SendBlocks),
        (Accepted, DealTransport::DataTransfer) => Some(ProviderAction::ResumeTransfer),
        (BlocksComplete, DealTransport::Stream) => Some(ProviderAction::RequestLastPayment),
        (FundsNeeded | FundsNeededUnseal | FundsNeededLastPayment, DealTransport::Stream) => {
            Some(ProviderAction::ProcessPayment)
        }
        (Finalizing, _) => Some(ProviderAction::Finalize),
        (Failing, _) => Some(ProviderAction::SendFailResponse),
        _ => None,
    }
}

pub fn apply_provider_event(state: &mut ProviderDealState, event: &ProviderEvent) -> Result<(), LifeCycleError> {
    use DealStatus::*;
    let status = state.status;
    if status.is_terminal() {
        return Err(LifeCycleError::Terminal(status));
    }
    let invalid = || LifeCycleError::invalid_transition(status, event);
    match event {
        ProviderEvent::Open | ProviderEvent::DealAccepted(_) => {
            if status != New {
                return Err(invalid());
            }
            if let ProviderEvent::DealAccepted(Some(info)) = event {
                state.piece_info = Some(info.clone());
            }
            state.current_interval = state.proposal.params.payment_interval;
            state.status = if state.unseal_price.is_zero() { Accepted } else { FundsNeededUnseal };
        }
        ProviderEvent::DealRejected(msg) => {
            if status != New {
                return Err(invalid());
            }
            fail(state, Rejected, msg.clone());
        }
        ProviderEvent::DealNotFound(msg) => {
            if status != New {
                return Err(invalid());
            }
            fail(state, DealNotFound, msg.clone());
        }
        ProviderEvent::GetPieceSizeErrored(msg) => {
            if status != New {
                return Err(invalid());
            }
            fail(state, Failing, format!("getting piece size: {msg}"));
        }
        ProviderEvent::WriteResponseFailed(msg) => fail(state, Errored, format!("writing deal response: {msg}")),
        ProviderEvent::TransferResumed => {
            if status != Accepted {
                return Err(invalid());
            }
            state.status = Ongoing;
        }
        ProviderEvent::BlockSent(total) => {
            if !matches!(status, Accepted | Ongoing) {
                return Err(invalid());
            }
            state.total_sent = *total;
            state.status = Ongoing;
        }
        ProviderEvent::BlocksCompleted(total) => {
            state.status = match status {
                Accepted | Ongoing => BlocksComplete,
                FundsNeeded => FundsNeededLastPayment,
                _ => return Err(invalid()),
            };
            state.total_sent = *total;
        }
        ProviderEvent::PaymentRequested(total) => {
            state.status = match status {
                Accepted | Ongoing | FundsNeeded => FundsNeeded,
                BlocksComplete | FundsNeededLastPayment => FundsNeededLastPayment,
                _ => return Err(invalid()),
            };
            state.total_sent = *total;
        }
        ProviderEvent::NothingOwed => {
            if status != BlocksComplete || !state.payment_owed().is_zero() {
                return Err(invalid());
            }
            state.status = Finalizing;
        }
        ProviderEvent::PartialPaymentReceived(amount) => {
            if !status.is_funds_needed() {
                return Err(invalid());
            }
            state.funds_received += amount;
        }
        ProviderEvent::PaymentReceived(amount) => {
            let next = match status {
                FundsNeededUnseal => Accepted,
                FundsNeeded => Ongoing,
                FundsNeededLastPayment => Finalizing,
                _ => return Err(invalid()),
            };
            state.funds_received += amount;
            if status == FundsNeeded {
                state.current_interval += state.proposal.params.payment_interval_increase;
            }
            state.status = next;
        }
        ProviderEvent::BlockErrored(msg) => {
            if !matches!(status, Accepted | Ongoing) {
                return Err(invalid());
            }
            fail(state, Failing, format!("reading block: {msg}"));
        }
        ProviderEvent::ReadPaymentFailed(msg) => {
            if !status.is_funds_needed() {
                return Err(invalid());
            }
            fail(state, Failing, format!("reading payment: {msg}"));
        }
        ProviderEvent::SaveVoucherFailed(msg) => {
            if !status.is_funds_needed() {
                return Err(invalid());
            }
            fail(state, Failing, format!("saving voucher: {msg}"));
        }
        ProviderEvent::FailResponseSent => {
            if status != Failing {
                return Err(invalid());
            }
            state.status = Failed;
        }
        ProviderEvent::DataTransferError(msg) => fail(state, Errored, format!("error transferring data: {msg}")),
        ProviderEvent::ClientCancelled => {
            state.message = "client cancelled retrieval".into();
            state.status = Cancelled;
        }
        ProviderEvent::Complete => {
            let done = status == Finalizing || (status == BlocksComplete && state.payment_owed().is_zero());
            if !done {
                return Err(invalid());
            }
            state.status = Completed;
        }
    }
    Ok(())
}

fn fail(state: &mut ProviderDealState, status: DealStatus, message: String) {
    state.message = message;
    state.status = status;
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::amount::TokenAmount;
    use crate::deal_id::DealId;
    use crate::helpers::raw_cid;
    use crate::helpers::test_helpers::random_peer;
    use crate::messages::{DealProposal, Params};
    use crate::node::PieceInfo;

    fn provider_deal(price: u64, unseal: u64, transport: DealTransport) -> ProviderDealState {
        let params = Params::new(price.into(), 1000, 500, unseal.into());
        let proposal = DealProposal { id: DealId::new(1), payload_cid: raw_cid(b"payload"), params };
        ProviderDealState::new(proposal, random_peer(), transport)
    }

    fn apply_all(state: &mut ProviderDealState, events: &[ProviderEvent]) {
        for event in events {
            apply_provider_event(state, event).unwrap_or_else(|e| panic!("{event} failed: {e}"));
        }
    }

    #[test]
    fn stream_deal_lifecycle() {
        let mut deal = provider_deal(10, 0, DealTransport::Stream);
        assert_eq!(provider_action_for(&deal), Some(ProviderAction::ReceiveDeal));
        let piece = PieceInfo { piece_cid: raw_cid(b"piece"), size: 2048 };
        apply_all(&mut deal, &[ProviderEvent::DealAccepted(Some(piece.clone()))]);
        assert_eq!((deal.status, deal.current_interval), (DealStatus::Accepted, 1000));
        assert_eq!(deal.piece_info, Some(piece));
        assert_eq!(provider_action_for(&deal), Some(ProviderAction::SendBlocks));
        apply_all(&mut deal, &[ProviderEvent::PaymentRequested(1000)]);
        assert_eq!(provider_action_for(&deal), Some(ProviderAction::ProcessPayment));
        apply_all(&mut deal, &[ProviderEvent::PaymentReceived(TokenAmount::from(10_000))]);
        assert_eq!((deal.status, deal.current_interval), (DealStatus::Ongoing, 1500));
        apply_all(&mut deal, &[ProviderEvent::BlocksCompleted(1200)]);
        assert_eq!(provider_action_for(&deal), Some(ProviderAction::RequestLastPayment));
        apply_all(&mut deal, &[ProviderEvent::PaymentRequested(1200)]);
        assert_eq!(deal.status, DealStatus::FundsNeededLastPayment);
        apply_all(&mut deal, &[ProviderEvent::PaymentReceived(TokenAmount::from(2_000))]);
        assert_eq!(deal.status, DealStatus::Finalizing);
        // The last payment does not bump the interval
        assert_eq!(deal.current_interval, 1500);
        apply_all(&mut deal, &[ProviderEvent::Complete]);
        assert_eq!(deal.status, DealStatus::Completed);
    }

    #[test]
    fn unseal_price_is_collected_first() {
        let mut deal = provider_deal(10, 700, DealTransport::DataTransfer);
        apply_all(&mut deal, &[ProviderEvent::Open]);
        assert_eq!(deal.status, DealStatus::FundsNeededUnseal);
        assert_eq!(provider_action_for(&deal), None);
        apply_all(&mut deal, &[ProviderEvent::PartialPaymentReceived(TokenAmount::from(300))]);
        assert_eq!(deal.status, DealStatus::FundsNeededUnseal);
        apply_all(&mut deal, &[ProviderEvent::PaymentReceived(TokenAmount::from(400))]);
        assert_eq!((deal.status, deal.current_interval), (DealStatus::Accepted, 1000));
        assert_eq!(provider_action_for(&deal), Some(ProviderAction::ResumeTransfer));
        apply_all(&mut deal, &[ProviderEvent::TransferResumed, ProviderEvent::BlockSent(400)]);
        assert_eq!(deal.status, DealStatus::Ongoing);
        assert_eq!(deal.total_paid_for(), 0);
    }

    #[test]
    fn interval_grows_by_the_increase_on_every_full_payment() {
        let mut deal = provider_deal(1, 0, DealTransport::DataTransfer);
        apply_all(&mut deal, &[ProviderEvent::Open, ProviderEvent::TransferResumed]);
        let mut sent = 0;
        for round in 1..=4u64 {
            sent += deal.current_interval;
            apply_all(&mut deal, &[ProviderEvent::PaymentRequested(sent)]);
            let owed = deal.payment_owed();
            apply_all(&mut deal, &[ProviderEvent::PaymentReceived(owed)]);
            assert_eq!(deal.current_interval, 1000 + round * 500);
        }
        assert_eq!(deal.total_paid_for(), sent);
    }

    #[test]
    fn failing_deals_send_a_response_before_failing() {
        let mut deal = provider_deal(10, 0, DealTransport::Stream);
        apply_all(&mut deal, &[ProviderEvent::DealAccepted(None), ProviderEvent::BlockErrored("disk".into())]);
        assert_eq!(deal.status, DealStatus::Failing);
        assert_eq!(provider_action_for(&deal), Some(ProviderAction::SendFailResponse));
        apply_all(&mut deal, &[ProviderEvent::FailResponseSent]);
        assert_eq!(deal.status, DealStatus::Failed);
        assert_eq!(deal.message, "reading block: disk");
    }

    #[test]
    fn rejected_moves_are_refused() {
        let mut deal = provider_deal(10, 0, DealTransport::Stream);
        let before = deal.clone();
        assert!(apply_provider_event(&mut deal, &ProviderEvent::TransferResumed).is_err());
        assert!(apply_provider_event(&mut deal, &ProviderEvent::PaymentReceived(TokenAmount::from(5))).is_err());
        assert!(apply_provider_event(&mut deal, &ProviderEvent::Complete).is_err());
        assert_eq!(deal, before);
        apply_all(&mut deal, &[ProviderEvent::DealAccepted(None), ProviderEvent::BlocksCompleted(100)]);
        // 1000 owed, so nothing to finalize yet
        assert!(apply_provider_event(&mut deal, &ProviderEvent::NothingOwed).is_err());
        assert!(apply_provider_event(&mut deal, &ProviderEvent::Complete).is_err());
        apply_all(&mut deal, &[ProviderEvent::ClientCancelled]);
        assert_eq!(
            apply_provider_event(&mut deal, &ProviderEvent::Open),
            Err(LifeCycleError::Terminal(DealStatus::Cancelled))
        );
    }

    #[test]
    fn not_found_keeps_the_message() {
        let mut deal = provider_deal(10, 0, DealTransport::Stream);
        apply_all(&mut deal, &[ProviderEvent::DealNotFound("not found".into())]);
        assert_eq!(deal.status, DealStatus::DealNotFound);
        assert_eq!(deal.message, "not found");
    }
}
