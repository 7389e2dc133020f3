//! Serves the query protocol: answers every inbound [`RetrievalRequest::Query`] from a [`QueryHandler`].

use crate::{PeerConnectionEvent, RetrievalAPI, RetrievalRequest, RetrievalResponse};
use futures::{Stream, StreamExt};
use libretrieval::messages::{Query, QueryResponse};
use libretrieval::node::ProviderDelegate;
use libretrieval::stream::DealStream;
use libretrieval::transfer::DataTransfer;
use libretrieval::RetrievalProvider;
use log::*;
use std::future::Future;
use std::sync::Arc;

pub trait QueryHandler: Send + Sync + 'static {
    fn handle_query(&self, query: &Query) -> impl Future<Output = QueryResponse> + Send;
}

impl<D, S, T> QueryHandler for RetrievalProvider<D, S, T>
where
    D: ProviderDelegate + 'static,
    S: DealStream,
    T: DataTransfer,
{
    async fn handle_query(&self, query: &Query) -> QueryResponse {
        RetrievalProvider::handle_query(self, query).await
    }
}

/// Answers inbound requests until the event stream ends, which happens when the event loop stops. Each request is
/// handled on its own task.
pub async fn serve_queries<H, E>(api: RetrievalAPI, mut events: E, handler: Arc<H>)
where
    H: QueryHandler,
    E: Stream<Item = PeerConnectionEvent> + Unpin,
{
    while let Some(event) = events.next().await {
        match event {
            PeerConnectionEvent::InboundRequest { peer, request, response } => {
                let handler = Arc::clone(&handler);
                let mut api = api.clone();
                tokio::spawn(async move {
                    let res = match request {
                        RetrievalRequest::Query(query) => {
                            debug!("Query from {peer} for {}", query.payload_cid);
                            RetrievalResponse::Query(Ok(handler.handle_query(&query).await))
                        }
                    };
                    if let Err(e) = api.send_response_to_peer(res, response).await {
                        warn!("Could not answer {peer}: {e}");
                    }
                });
            }
        }
    }
    debug!("Query server stopped");
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::new_network;
    use libp2p::identity::Keypair;
    use libp2p::Multiaddr;
    use libretrieval::helpers::raw_cid;
    use libretrieval::messages::{QueryItemStatus, QueryResponseStatus};
    use libretrieval::payment::Address;
    use libretrieval::TokenAmount;

    struct FixedAsk;

    impl QueryHandler for FixedAsk {
        async fn handle_query(&self, query: &Query) -> QueryResponse {
            let known = query.payload_cid == raw_cid(b"known");
            QueryResponse {
                status: if known { QueryResponseStatus::Available } else { QueryResponseStatus::Unavailable },
                piece_cid_found: QueryItemStatus::Unknown,
                size: if known { 2048 } else { 0 },
                payment_address: Address::new("t0provider"),
                min_price_per_byte: TokenAmount::from(2),
                max_payment_interval: 1 << 20,
                max_payment_interval_increase: 1 << 20,
                unseal_price: TokenAmount::zero(),
                message: String::new(),
            }
        }
    }

    #[tokio::test]
    async fn providers_answer_queries_over_the_network() {
        env_logger::try_init().ok();
        let provider_key = Keypair::generate_ed25519();
        let provider_peer = provider_key.public().to_peer_id();
        let (mut provider_api, provider_events, provider_loop) = new_network(provider_key).unwrap();
        tokio::spawn(provider_loop.run());
        let any_port: Multiaddr = "/ip4/127.0.0.1/tcp/0".parse().unwrap();
        let bound = provider_api.start_listening(any_port).await.unwrap();
        tokio::spawn(serve_queries(provider_api.clone(), Box::pin(provider_events), Arc::new(FixedAsk)));

        let (mut client_api, _client_events, client_loop) = new_network(Keypair::generate_ed25519()).unwrap();
        tokio::spawn(client_loop.run());
        let dialled = client_api.dial(bound.with_p2p(provider_peer).unwrap()).await.unwrap();
        assert_eq!(dialled, provider_peer);
        assert_eq!(client_api.connected_peers().await.unwrap(), vec![provider_peer]);

        let query = Query { payload_cid: raw_cid(b"known"), piece_cid: None };
        let response = client_api.query(provider_peer, query).await.unwrap();
        assert_eq!((response.status, response.size), (QueryResponseStatus::Available, 2048));
        assert_eq!(response.piece_retrieval_price(), TokenAmount::from(4096));

        let query = Query { payload_cid: raw_cid(b"unknown"), piece_cid: None };
        let response = client_api.query(provider_peer, query).await.unwrap();
        assert_eq!(response.status, QueryResponseStatus::Unavailable);

        assert!(client_api.shutdown().await.unwrap());
        assert!(provider_api.shutdown().await.unwrap());
    }
}
