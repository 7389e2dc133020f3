//! Gatekeeper for data-transfer requests. A pull request is only turned into a deal once every check has passed;
//! a request that fails a check leaves no trace on the provider.

use crate::deal_id::{ProviderDealIdentifier, TransferChannelId};
use crate::logging::LogTarget;
use crate::messages::{DealResponse, ResponseFormat, Selector, TransferVoucher, VoucherResult};
use crate::node::{PieceLookupError, ProviderDelegate};
use crate::provider::ProviderDeals;
use crate::provider_deal::{DealTransport, ProviderDealState};
use crate::revalidator::{RevalidationResult, Revalidator};
use crate::state_machine::error::LifeCycleError;
use crate::state_machine::ProviderEvent;
use crate::status::DealStatus;
use crate::stream::DealStream;
use crate::transfer::DataTransfer;
use cid::Cid;
use libp2p::PeerId;
use log::*;
use std::sync::Arc;
use thiserror::Error;

#[derive(Clone, Debug, Error)]
pub enum ValidationError {
    #[error("Retrieval providers do not accept push requests")]
    PushNotSupported,
    #[error("Expected a deal proposal, got a {0}")]
    UnexpectedVoucher(&'static str),
    #[error("Proposal is for payload {proposal}, but the request is for {requested}")]
    PayloadMismatch { proposal: Cid, requested: Cid },
    #[error("The request selector does not match the proposal")]
    SelectorMismatch,
    #[error("Deal {0} already exists")]
    DuplicateDeal(ProviderDealIdentifier),
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    PieceLookup(String),
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    LifeCycle(#[from] LifeCycleError),
}

impl ValidationError {
    /// The deal status a rejected proposal is answered with.
    pub fn status(&self) -> DealStatus {
        match self {
            ValidationError::NotFound => DealStatus::DealNotFound,
            ValidationError::PieceLookup(_) | ValidationError::LifeCycle(_) => DealStatus::Errored,
            _ => DealStatus::Rejected,
        }
    }

    /// The response to send the client, when the rejected voucher was a proposal it can be addressed to.
    pub fn response(&self, voucher: &TransferVoucher) -> Option<VoucherResult> {
        let proposal = match voucher {
            TransferVoucher::Proposal(p) | TransferVoucher::LegacyProposal(p) => p,
            _ => return None,
        };
        let response = DealResponse::new(proposal.id, self.status()).with_message(self.to_string());
        Some(ResponseFormat::for_legacy(voucher.is_legacy()).encode(response))
    }
}

pub struct RequestValidator<D, S, T>
where
    D: ProviderDelegate + 'static,
    S: DealStream,
    T: DataTransfer,
{
    deals: Arc<ProviderDeals<D, S, T>>,
    revalidator: Revalidator<ProviderDeals<D, S, T>>,
    log: LogTarget,
}

impl<D, S, T> Clone for RequestValidator<D, S, T>
where
    D: ProviderDelegate + 'static,
    S: DealStream,
    T: DataTransfer,
{
    fn clone(&self) -> Self {
        Self { deals: Arc::clone(&self.deals), revalidator: self.revalidator.clone(), log: self.log.clone() }
    }
}

impl<D, S, T> RequestValidator<D, S, T>
where
    D: ProviderDelegate + 'static,
    S: DealStream,
    T: DataTransfer,
{
    pub fn new(
        deals: Arc<ProviderDeals<D, S, T>>,
        revalidator: Revalidator<ProviderDeals<D, S, T>>,
        log: LogTarget,
    ) -> Self {
        Self { deals, revalidator, log }
    }

    pub fn validate_push(
        &self,
        sender: PeerId,
        _voucher: &TransferVoucher,
    ) -> Result<RevalidationResult, ValidationError> {
        debug!(target: self.log.as_str(), "Refusing push request from {sender}");
        Err(ValidationError::PushNotSupported)
    }

    /// Checks a client's request to pull `base_cid` over `channel`. On success the deal is live, its channel is
    /// tracked, and the channel should stay paused until the deal's state machine resumes it.
    pub async fn validate_pull(
        &self,
        channel: TransferChannelId,
        receiver: PeerId,
        voucher: &TransferVoucher,
        base_cid: &Cid,
        selector: &Selector,
    ) -> Result<RevalidationResult, ValidationError> {
        let result = self.accept_pull(channel, receiver, voucher, base_cid, selector).await;
        if let Err(e) = &result {
            info!(target: self.log.as_str(), "Rejected pull request on {channel} from {receiver}: {e}");
        }
        result
    }

    async fn accept_pull(
        &self,
        channel: TransferChannelId,
        receiver: PeerId,
        voucher: &TransferVoucher,
        base_cid: &Cid,
        selector: &Selector,
    ) -> Result<RevalidationResult, ValidationError> {
        let proposal = match voucher {
            TransferVoucher::Proposal(p) | TransferVoucher::LegacyProposal(p) => p,
            other => return Err(ValidationError::UnexpectedVoucher(other.voucher_type())),
        };
        if &proposal.payload_cid != base_cid {
            return Err(ValidationError::PayloadMismatch { proposal: proposal.payload_cid, requested: *base_cid });
        }
        if &proposal.params.selector != selector {
            return Err(ValidationError::SelectorMismatch);
        }
        let identifier = ProviderDealIdentifier::new(receiver, proposal.id);
        let group = self.deals.group();
        if group.get(&identifier).await.is_some() {
            return Err(ValidationError::DuplicateDeal(identifier));
        }
        let delegate = &group.fsm().env().delegate;
        let piece = match delegate.get_piece_info(&proposal.payload_cid, proposal.params.piece_cid.as_ref()).await {
            Ok(piece) => piece,
            Err(PieceLookupError::NotFound) => return Err(ValidationError::NotFound),
            Err(e) => return Err(ValidationError::PieceLookup(e.to_string())),
        };
        let deal = ProviderDealState::new(proposal.clone(), receiver, DealTransport::DataTransfer)
            .with_channel(channel)
            .with_legacy_protocol(voucher.is_legacy())
            .with_piece_info(piece);
        group.fsm().env().policy.evaluate(&deal).await.map_err(ValidationError::Rejected)?;

        group.begin(deal.clone(), false).await.map_err(|e| match e {
            LifeCycleError::DuplicateDeal(_) => ValidationError::DuplicateDeal(identifier),
            e => ValidationError::LifeCycle(e),
        })?;
        self.revalidator.track_channel(channel, &deal).await;
        if let Err(e) = group.send_event(identifier, ProviderEvent::Open).await {
            self.revalidator.untrack_channel(&channel).await;
            if let Err(discard_err) = group.discard(&identifier).await {
                warn!(target: self.log.as_str(), "Could not discard unopened deal {identifier}: {discard_err}");
            }
            return Err(e.into());
        }
        debug!(target: self.log.as_str(), "Accepted deal {identifier} on channel {channel}");
        let status = if deal.unseal_price.is_zero() { DealStatus::Accepted } else { DealStatus::FundsNeededUnseal };
        let response = DealResponse::new(proposal.id, status).with_payment_owed(deal.unseal_price.clone());
        let format = ResponseFormat::for_legacy(deal.legacy_protocol);
        Ok(RevalidationResult::pause_with(format.encode(response)))
    }
}
