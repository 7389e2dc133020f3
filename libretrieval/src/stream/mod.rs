//! The deal stream: a bidirectional, message-oriented connection between a client and a provider, used by the legacy
//! retrieval flow. Framing and encoding belong to the transport.

#[cfg(feature = "dummy_node")]
mod memory;

#[cfg(feature = "dummy_node")]
pub use memory::MemoryDealStream;

use crate::deal_id::ProviderDealIdentifier;
use crate::messages::{DealPayment, DealProposal, DealResponse};
use libp2p::PeerId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

#[derive(Clone, Debug, Error)]
pub enum StreamError {
    #[error("The deal stream is closed")]
    Closed,
    #[error("Expected a {expected} message but received a {actual}")]
    UnexpectedMessage { expected: &'static str, actual: &'static str },
    #[error("Deal stream I/O error. {0}")]
    Io(String),
}

pub trait DealStream: Send + Sync + 'static {
    /// The peer at the other end of the stream.
    fn remote_peer(&self) -> PeerId;

    fn read_deal_proposal(&self) -> impl Future<Output = Result<DealProposal, StreamError>> + Send;

    fn write_deal_proposal(&self, proposal: DealProposal) -> impl Future<Output = Result<(), StreamError>> + Send;

    fn read_deal_response(&self) -> impl Future<Output = Result<DealResponse, StreamError>> + Send;

    fn write_deal_response(&self, response: DealResponse) -> impl Future<Output = Result<(), StreamError>> + Send;

    fn read_deal_payment(&self) -> impl Future<Output = Result<DealPayment, StreamError>> + Send;

    fn write_deal_payment(&self, payment: DealPayment) -> impl Future<Output = Result<(), StreamError>> + Send;

    fn close(&self) -> Result<(), StreamError>;
}

/// The open deal streams of a provider, by deal.
pub struct DealStreams<S> {
    streams: Arc<RwLock<HashMap<ProviderDealIdentifier, Arc<S>>>>,
}

impl<S> Default for DealStreams<S> {
    fn default() -> Self {
        Self { streams: Arc::new(RwLock::new(HashMap::new())) }
    }
}

impl<S> Clone for DealStreams<S> {
    fn clone(&self) -> Self {
        Self { streams: Arc::clone(&self.streams) }
    }
}

impl<S> DealStreams<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, deal: ProviderDealIdentifier, stream: Arc<S>) {
        self.streams.write().insert(deal, stream);
    }

    pub fn get(&self, deal: &ProviderDealIdentifier) -> Option<Arc<S>> {
        self.streams.read().get(deal).cloned()
    }

    pub fn remove(&self, deal: &ProviderDealIdentifier) -> Option<Arc<S>> {
        self.streams.write().remove(deal)
    }
}
