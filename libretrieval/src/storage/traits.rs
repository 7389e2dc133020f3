use crate::client_deal::ClientDealState;
use crate::deal_id::{DealId, ProviderDealIdentifier};
use crate::provider_deal::ProviderDealState;
use crate::status::DealStatus;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use std::hash::Hash;

/// A persisted deal record, as tracked by a deal group.
pub trait DealRecord: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Key: Copy + Eq + Hash + Display + Send + Sync + 'static;

    fn key(&self) -> Self::Key;

    fn status(&self) -> DealStatus;

    /// The name the record is stored under. Must be unique per key and safe to use as a file name.
    fn store_name(&self) -> String;
}

pub trait DealStore<S: DealRecord>: Send + Sync + 'static {
    fn write_deal(&self, state: &S) -> Result<(), anyhow::Error>;
    fn load_deal(&self, name: &str) -> Result<S, anyhow::Error>;
    /// Every record in the store. Records that fail to load are skipped.
    fn load_all(&self) -> Result<Vec<S>, anyhow::Error>;
    /// Removes the record stored under `name`. Removing a record that is not there is not an error.
    fn delete_deal(&self, name: &str) -> Result<(), anyhow::Error>;
}

impl DealRecord for ClientDealState {
    type Key = DealId;

    fn key(&self) -> DealId {
        self.id()
    }

    fn status(&self) -> DealStatus {
        self.status
    }

    fn store_name(&self) -> String {
        format!("client-{}", self.id())
    }
}

impl DealRecord for ProviderDealState {
    type Key = ProviderDealIdentifier;

    fn key(&self) -> ProviderDealIdentifier {
        self.identifier()
    }

    fn status(&self) -> DealStatus {
        self.status
    }

    fn store_name(&self) -> String {
        format!("provider-{}-{}", self.receiver, self.id())
    }
}
