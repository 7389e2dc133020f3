pub mod amount;
pub mod client;
pub mod client_deal;
pub mod deal_id;
pub mod error;
pub mod helpers;
pub mod logging;
pub mod messages;
pub mod node;
pub mod payment;
pub mod policy;
pub mod provider;
pub mod provider_deal;
pub mod request_validator;
pub mod revalidator;
pub mod state_machine;
pub mod status;
pub mod storage;
pub mod stream;
pub mod subscribers;
pub mod transfer;

#[cfg(test)]
mod tests;

pub use amount::TokenAmount;
pub use client::RetrievalClient;
pub use deal_id::{DealId, ProviderDealIdentifier, TransferChannelId};
pub use error::RetrievalError;
pub use provider::RetrievalProvider;
pub use status::DealStatus;
