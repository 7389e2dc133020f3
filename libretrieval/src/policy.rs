//! Which deals a provider is prepared to serve.

use crate::amount::TokenAmount;
use crate::messages::Params;
use crate::provider_deal::ProviderDealState;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DEFAULT_PRICE_PER_BYTE: u64 = 2;
pub const DEFAULT_PAYMENT_INTERVAL: u64 = 1 << 20;
pub const DEFAULT_PAYMENT_INTERVAL_INCREASE: u64 = 1 << 20;

/// A provider's asking terms. Proposals must pay at least this much and must not let the client fall further behind
/// than this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ask {
    pub price_per_byte: TokenAmount,
    pub unseal_price: TokenAmount,
    pub payment_interval: u64,
    pub payment_interval_increase: u64,
}

impl Default for Ask {
    fn default() -> Self {
        Ask {
            price_per_byte: TokenAmount::from(DEFAULT_PRICE_PER_BYTE),
            unseal_price: TokenAmount::zero(),
            payment_interval: DEFAULT_PAYMENT_INTERVAL,
            payment_interval_increase: DEFAULT_PAYMENT_INTERVAL_INCREASE,
        }
    }
}

impl Ask {
    /// Returns the reason the proposed terms are unacceptable, if they are.
    pub fn check_params(&self, params: &Params) -> Result<(), String> {
        if params.price_per_byte < self.price_per_byte {
            return Err("Price per byte too low".into());
        }
        if params.payment_interval > self.payment_interval {
            return Err("Payment interval too large".into());
        }
        if params.payment_interval_increase > self.payment_interval_increase {
            return Err("Payment interval increase too large".into());
        }
        if params.unseal_price < self.unseal_price {
            return Err("Unseal price too small".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject(String),
}

/// Custom acceptance logic, run after a proposal has passed the ask checks.
#[async_trait]
pub trait DealDecider: Send + Sync {
    async fn decide(&self, deal: &ProviderDealState) -> Result<Decision, String>;
}

/// Adapts a plain function into a [`DealDecider`].
pub struct FnDecider<F>(pub F);

#[async_trait]
impl<F> DealDecider for FnDecider<F>
where
    F: Fn(&ProviderDealState) -> Result<Decision, String> + Send + Sync,
{
    async fn decide(&self, deal: &ProviderDealState) -> Result<Decision, String> {
        (self.0)(deal)
    }
}

/// The ask plus an optional decider. Clones share the same ask, so `set_ask` is seen by every holder.
#[derive(Clone, Default)]
pub struct DealPolicy {
    ask: Arc<RwLock<Ask>>,
    decider: Option<Arc<dyn DealDecider>>,
}

impl DealPolicy {
    pub fn new(ask: Ask) -> Self {
        Self { ask: Arc::new(RwLock::new(ask)), decider: None }
    }

    pub fn with_decider(mut self, decider: impl DealDecider + 'static) -> Self {
        self.decider = Some(Arc::new(decider));
        self
    }

    pub fn ask(&self) -> Ask {
        self.ask.read().clone()
    }

    pub fn set_ask(&self, ask: Ask) {
        *self.ask.write() = ask;
    }

    /// Returns the reason for rejecting `deal`, or `Ok` if it should be served.
    pub async fn evaluate(&self, deal: &ProviderDealState) -> Result<(), String> {
        let ask = self.ask();
        ask.check_params(&deal.proposal.params)?;
        let Some(decider) = &self.decider else {
            return Ok(());
        };
        match decider.decide(deal).await {
            Ok(Decision::Accept) => Ok(()),
            Ok(Decision::Reject(reason)) => Err(reason),
            Err(e) => Err(format!("deal decision failed: {e}")),
        }
    }
}
