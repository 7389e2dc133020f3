//! The retrieval provider: serves payloads to clients and collects payment for them as the data goes out.

use crate::deal_id::ProviderDealIdentifier;
use crate::error::RetrievalError;
use crate::logging::LogTarget;
use crate::messages::{Query, QueryItemStatus, QueryResponse, QueryResponseStatus};
use crate::node::{PieceLookup, PieceLookupError, ProviderDelegate};
use crate::payment::Address;
use crate::policy::{Ask, DealPolicy};
use crate::provider_deal::{DealTransport, ProviderDealState};
use crate::request_validator::RequestValidator;
use crate::revalidator::{Revalidator, RevalidatorEnvironment};
use crate::state_machine::deal_group::DealGroup;
use crate::state_machine::error::LifeCycleError;
use crate::state_machine::ProviderEvent;
use crate::state_machine::provider_handlers::{ProviderEnvironment, ProviderFsm};
use crate::storage::DealStore;
use crate::stream::{DealStream, DealStreams};
use crate::subscribers::SubscriptionToken;
use crate::transfer::DataTransfer;
use log::*;
use std::sync::Arc;

/// The provider's deal group, seen from the data-transfer hooks.
pub struct ProviderDeals<D, S, T>
where
    D: ProviderDelegate + 'static,
    S: DealStream,
    T: DataTransfer,
{
    group: DealGroup<ProviderFsm<D, S, T>>,
}

impl<D, S, T> ProviderDeals<D, S, T>
where
    D: ProviderDelegate + 'static,
    S: DealStream,
    T: DataTransfer,
{
    pub fn new(group: DealGroup<ProviderFsm<D, S, T>>) -> Self {
        Self { group }
    }

    pub fn group(&self) -> &DealGroup<ProviderFsm<D, S, T>> {
        &self.group
    }
}

impl<D, S, T> RevalidatorEnvironment for ProviderDeals<D, S, T>
where
    D: ProviderDelegate + 'static,
    S: DealStream,
    T: DataTransfer,
{
    type Node = D;

    fn node(&self) -> &D {
        &self.group.fsm().env().delegate
    }

    async fn get_deal(&self, deal: &ProviderDealIdentifier) -> Option<ProviderDealState> {
        self.group.get(deal).await
    }

    async fn send_event(&self, deal: ProviderDealIdentifier, event: ProviderEvent) -> Result<(), LifeCycleError> {
        self.group.send_event(deal, event).await
    }
}

pub struct RetrievalProvider<D, S, T>
where
    D: ProviderDelegate + 'static,
    S: DealStream,
    T: DataTransfer,
{
    payment_address: Address,
    deals: Arc<ProviderDeals<D, S, T>>,
    store: Arc<dyn DealStore<ProviderDealState>>,
    revalidator: Revalidator<ProviderDeals<D, S, T>>,
    request_validator: RequestValidator<D, S, T>,
    log: LogTarget,
}

impl<D, S, T> RetrievalProvider<D, S, T>
where
    D: ProviderDelegate + 'static,
    S: DealStream,
    T: DataTransfer,
{
    /// Creates a provider that is paid at `payment_address`. Deals are recorded in `store`; call
    /// [`RetrievalProvider::restore`] to pick up deals from a previous run.
    pub fn new(
        delegate: D,
        transfer: Arc<T>,
        policy: DealPolicy,
        payment_address: Address,
        store: Arc<dyn DealStore<ProviderDealState>>,
        log: LogTarget,
    ) -> Self {
        let streams: DealStreams<S> = DealStreams::new();
        let env = ProviderEnvironment { delegate, transfer, policy, streams: streams.clone(), log: log.clone() };
        let group = DealGroup::new(ProviderFsm::new(env), Arc::clone(&store), log.child("deals"));
        let deals = Arc::new(ProviderDeals::new(group));
        let revalidator = Revalidator::new(Arc::clone(&deals), log.child("revalidator"));
        let request_validator =
            RequestValidator::new(Arc::clone(&deals), revalidator.clone(), log.child("request_validator"));

        let tracked = revalidator.clone();
        let cleanup_log = log.clone();
        deals.group().subscribe(move |_event: &ProviderEvent, deal: &ProviderDealState| {
            if !deal.status.is_terminal() {
                return;
            }
            if let Some(stream) = streams.remove(&deal.identifier()) {
                if let Err(e) = stream.close() {
                    debug!(target: cleanup_log.as_str(), "Closing stream of deal {}: {e}", deal.identifier());
                }
            }
            if let Some(channel) = deal.channel_id {
                let tracked = tracked.clone();
                tokio::spawn(async move { tracked.untrack_channel(&channel).await });
            }
        });
        Self { payment_address, deals, store, revalidator, request_validator, log }
    }

    /// Serves a deal proposed over a freshly opened deal stream. Returns once the deal is being tracked; the deal
    /// itself runs in the background.
    pub async fn handle_deal_stream(&self, stream: S) -> Result<ProviderDealIdentifier, RetrievalError> {
        let proposal = stream.read_deal_proposal().await?;
        let deal = ProviderDealState::new(proposal, stream.remote_peer(), DealTransport::Stream);
        let identifier = deal.identifier();
        let group = self.deals.group();
        if group.get(&identifier).await.is_some() {
            warn!(target: self.log.as_str(), "Ignoring a second proposal for deal {identifier}");
            let _ = stream.close();
            return Err(LifeCycleError::DuplicateDeal(identifier.to_string()).into());
        }
        let streams = &group.fsm().env().streams;
        streams.add(identifier, Arc::new(stream));
        if let Err(e) = group.begin(deal, true).await {
            if let Some(stream) = streams.remove(&identifier) {
                let _ = stream.close();
            }
            return Err(e.into());
        }
        info!(target: self.log.as_str(), "Received deal {identifier} over a deal stream");
        Ok(identifier)
    }

    /// Tells a prospective client whether the payload can be served, and on what terms.
    pub async fn handle_query(&self, query: &Query) -> QueryResponse {
        let delegate = &self.deals.group().fsm().env().delegate;
        answer_query(query, &self.get_ask(), &self.payment_address, delegate, &self.log).await
    }

    pub fn get_ask(&self) -> Ask {
        self.policy().ask()
    }

    pub fn set_ask(&self, ask: Ask) {
        info!(target: self.log.as_str(), "New ask: {} per byte, interval {}", ask.price_per_byte, ask.payment_interval);
        self.policy().set_ask(ask);
    }

    pub async fn get_deal(&self, deal: &ProviderDealIdentifier) -> Option<ProviderDealState> {
        self.deals.group().get(deal).await
    }

    pub async fn list_deals(&self) -> Vec<ProviderDealState> {
        self.deals.group().list().await
    }

    /// Calls `callback` after every transition of every deal, with the event and the deal's new state.
    pub fn subscribe_to_events<C>(&self, callback: C) -> SubscriptionToken
    where
        C: Fn(&ProviderEvent, &ProviderDealState) + Send + Sync + 'static,
    {
        self.deals.group().subscribe(callback)
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.deals.group().unsubscribe(token)
    }

    pub fn revalidator(&self) -> &Revalidator<ProviderDeals<D, S, T>> {
        &self.revalidator
    }

    pub fn request_validator(&self) -> &RequestValidator<D, S, T> {
        &self.request_validator
    }

    /// Reloads deals from the store. Unfinished data-transfer deals get their channels tracked again; deals that were
    /// served over a deal stream have lost it and fail when they next touch it.
    pub async fn restore(&self) -> Result<usize, RetrievalError> {
        let deals = self.store.load_all()?;
        let count = deals.len();
        for deal in &deals {
            if let (Some(channel), false) = (deal.channel_id, deal.status.is_terminal()) {
                self.revalidator.track_channel(channel, deal).await;
            }
        }
        self.deals.group().restore(deals).await?;
        info!(target: self.log.as_str(), "Restored {count} provider deals");
        Ok(count)
    }

    fn policy(&self) -> &DealPolicy {
        &self.deals.group().fsm().env().policy
    }
}

/// Builds the answer to `query` from the ask and the piece index. Lookup failures other than a missing payload are
/// reported with an `Error` status.
pub async fn answer_query<L: PieceLookup>(
    query: &Query,
    ask: &Ask,
    payment_address: &Address,
    pieces: &L,
    log: &LogTarget,
) -> QueryResponse {
    let mut response = QueryResponse {
        status: QueryResponseStatus::Available,
        piece_cid_found: QueryItemStatus::Unknown,
        size: 0,
        payment_address: payment_address.clone(),
        min_price_per_byte: ask.price_per_byte.clone(),
        max_payment_interval: ask.payment_interval,
        max_payment_interval_increase: ask.payment_interval_increase,
        unseal_price: ask.unseal_price.clone(),
        message: String::new(),
    };
    match pieces.get_piece_info(&query.payload_cid, query.piece_cid.as_ref()).await {
        Ok(info) => {
            response.size = info.size;
            if query.piece_cid.is_some() {
                response.piece_cid_found = QueryItemStatus::Available;
            }
        }
        Err(PieceLookupError::NotFound) => {
            response.status = QueryResponseStatus::Unavailable;
            response.message = PieceLookupError::NotFound.to_string();
            if query.piece_cid.is_some() {
                response.piece_cid_found = QueryItemStatus::Unavailable;
            }
        }
        Err(e) => {
            warn!(target: log.as_str(), "Query for {} failed: {e}", query.payload_cid);
            response.status = QueryResponseStatus::Error;
            response.message = e.to_string();
        }
    }
    response
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::amount::TokenAmount;
    use crate::deal_id::DealId;
    use crate::helpers::raw_cid;
    use crate::helpers::test_helpers::random_peer;
    use crate::messages::{DealProposal, Params};
    use crate::node::DummyProviderDelegate;
    use crate::status::DealStatus;
    use crate::storage::MemoryStore;
    use crate::stream::MemoryDealStream;
    use crate::transfer::RecordingTransfer;

    type TestProvider = RetrievalProvider<DummyProviderDelegate, MemoryDealStream, RecordingTransfer>;

    fn provider() -> (TestProvider, DummyProviderDelegate) {
        env_logger::try_init().ok();
        let delegate = DummyProviderDelegate::default();
        let ask = Ask {
            price_per_byte: 2.into(),
            unseal_price: 0.into(),
            payment_interval: 1000,
            payment_interval_increase: 500,
        };
        let provider = RetrievalProvider::new(
            delegate.clone(),
            Arc::new(RecordingTransfer::new(random_peer())),
            DealPolicy::new(ask),
            Address::new("t0999"),
            Arc::new(MemoryStore::new()),
            LogTarget::new("test::provider"),
        );
        (provider, delegate)
    }

    #[tokio::test]
    async fn queries_reflect_the_ask_and_the_piece_store() {
        let (provider, delegate) = provider();
        let payload = delegate.add_payload(&[5u8; 4096], 1024);
        let query = Query { payload_cid: payload, piece_cid: None };
        let response = provider.handle_query(&query).await;
        assert_eq!(response.status, QueryResponseStatus::Available);
        assert_eq!(response.piece_cid_found, QueryItemStatus::Unknown);
        assert_eq!(response.size, 4096);
        assert_eq!(response.min_price_per_byte, TokenAmount::from(2));
        assert_eq!(response.payment_address, Address::new("t0999"));
        assert_eq!(response.piece_retrieval_price(), TokenAmount::from(8192));

        let elsewhere = Query { payload_cid: payload, piece_cid: Some(raw_cid(b"another piece")) };
        let response = provider.handle_query(&elsewhere).await;
        assert_eq!(response.status, QueryResponseStatus::Unavailable);
        assert_eq!(response.piece_cid_found, QueryItemStatus::Unavailable);

        provider.set_ask(Ask { price_per_byte: 7.into(), ..provider.get_ask() });
        let response = provider.handle_query(&query).await;
        assert_eq!(response.min_price_per_byte, TokenAmount::from(7));

        delegate.pieces.fail_with("index offline");
        let response = provider.handle_query(&query).await;
        assert_eq!(response.status, QueryResponseStatus::Error);
    }

    /// A free retrieval over a deal stream: one response carries every block, then the deal completes.
    #[tokio::test]
    async fn deal_stream_retrieval() {
        let (provider, delegate) = provider();
        provider.set_ask(Ask { price_per_byte: 0.into(), ..provider.get_ask() });
        let payload = delegate.add_payload(&[9u8; 2500], 1000);
        let client = random_peer();
        let (client_end, provider_end) = MemoryDealStream::pair(client, random_peer());
        let params = Params::new(0.into(), 1000, 500, 0.into());
        let proposal = DealProposal { id: DealId::new(3), payload_cid: payload, params };
        client_end.write_deal_proposal(proposal).await.unwrap();
        let id = provider.handle_deal_stream(provider_end).await.unwrap();

        assert_eq!(client_end.read_deal_response().await.unwrap().status, DealStatus::Accepted);
        let blocks = client_end.read_deal_response().await.unwrap();
        assert_eq!(blocks.status, DealStatus::BlocksComplete);
        assert_eq!(blocks.blocks.iter().map(|b| b.len()).sum::<u64>(), 2500);
        assert_eq!(client_end.read_deal_response().await.unwrap().status, DealStatus::Completed);
        // The provider closes its end once the deal is over
        assert!(client_end.read_deal_response().await.is_err());
        let deal = provider.get_deal(&id).await.unwrap();
        assert_eq!((deal.status, deal.total_sent), (DealStatus::Completed, 2500));
    }
}
