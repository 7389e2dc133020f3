use crate::piece_index::PieceIndex;
use crate::settings::LocalSettings;
use libretrieval::logging::LogTarget;
use libretrieval::messages::{Query, QueryResponse};
use libretrieval::payment::Address;
use libretrieval::policy::Ask;
use libretrieval::provider::answer_query;
use retrieval_p2p::QueryHandler;

/// Answers queries from the configured ask and piece index. Deals themselves are not served by this node.
pub struct QueryService {
    ask: Ask,
    payment_address: Address,
    pieces: PieceIndex,
    log: LogTarget,
}

impl QueryService {
    pub fn new(settings: &LocalSettings) -> Self {
        QueryService {
            ask: settings.ask.clone(),
            payment_address: settings.payment_address.clone(),
            pieces: settings.pieces.clone(),
            log: LogTarget::new("retrieval::query"),
        }
    }
}

impl QueryHandler for QueryService {
    async fn handle_query(&self, query: &Query) -> QueryResponse {
        answer_query(query, &self.ask, &self.payment_address, &self.pieces, &self.log).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use libretrieval::helpers::raw_cid;
    use libretrieval::messages::{QueryItemStatus, QueryResponseStatus};
    use libretrieval::node::PieceInfo;
    use libretrieval::TokenAmount;

    #[tokio::test]
    async fn answers_follow_the_settings() {
        let mut settings = LocalSettings::default();
        settings.ask.price_per_byte = TokenAmount::from(3);
        settings.ask.unseal_price = TokenAmount::from(100);
        settings.payment_address = Address::new("t0300");
        settings.pieces.insert(raw_cid(b"payload"), PieceInfo { piece_cid: raw_cid(b"piece"), size: 1000 });
        let service = QueryService::new(&settings);

        let query = Query { payload_cid: raw_cid(b"payload"), piece_cid: Some(raw_cid(b"piece")) };
        let response = service.handle_query(&query).await;
        assert_eq!(response.status, QueryResponseStatus::Available);
        assert_eq!(response.piece_cid_found, QueryItemStatus::Available);
        assert_eq!(response.size, 1000);
        assert_eq!(response.payment_address, Address::new("t0300"));
        assert_eq!(response.unseal_price, TokenAmount::from(100));
        assert_eq!(response.piece_retrieval_price(), TokenAmount::from(3100));

        let query = Query { payload_cid: raw_cid(b"elsewhere"), piece_cid: None };
        let response = service.handle_query(&query).await;
        assert_eq!(response.status, QueryResponseStatus::Unavailable);
        assert_eq!(response.piece_cid_found, QueryItemStatus::Unknown);
        assert_eq!(response.message, "not found");
    }
}
