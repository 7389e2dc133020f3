use super::loopback::{Loopback, TestClient, TestProvider};
use crate::amount::TokenAmount;
use crate::client_deal::ClientDealState;
use crate::deal_id::{DealId, ProviderDealIdentifier};
use crate::helpers::test_helpers::random_peer;
use crate::logging::LogTarget;
use crate::messages::Params;
use crate::node::{DummyPaymentNode, DummyProviderDelegate};
use crate::payment::Address;
use crate::policy::{Ask, DealPolicy};
use crate::provider_deal::ProviderDealState;
use crate::storage::MemoryStore;
use crate::{DealStatus, RetrievalClient, RetrievalProvider};
use cid::Cid;
use libp2p::PeerId;
use std::sync::Arc;
use std::time::Duration;

struct Network {
    client: Arc<TestClient>,
    provider: Arc<TestProvider>,
    delegate: DummyProviderDelegate,
    payments: DummyPaymentNode,
    transfer: Loopback,
    client_peer: PeerId,
    provider_peer: PeerId,
}

fn ask(unseal_price: u64) -> Ask {
    Ask {
        price_per_byte: TokenAmount::from(10),
        unseal_price: TokenAmount::from(unseal_price),
        payment_interval: 3000,
        payment_interval_increase: 1000,
    }
}

fn params_for(ask: &Ask) -> Params {
    Params::new(
        ask.price_per_byte.clone(),
        ask.payment_interval,
        ask.payment_interval_increase,
        ask.unseal_price.clone(),
    )
}

fn network(ask: Ask) -> Network {
    env_logger::try_init().ok();
    let (client_peer, provider_peer) = (random_peer(), random_peer());
    let payments = DummyPaymentNode::new();
    let delegate = DummyProviderDelegate::new(payments.clone());
    let transfer = Loopback::new(client_peer);
    let client = Arc::new(RetrievalClient::new(
        Arc::new(payments.clone()),
        Arc::new(transfer.clone()),
        Arc::new(MemoryStore::new()),
        LogTarget::new("e2e::client"),
    ));
    let provider = Arc::new(RetrievalProvider::new(
        delegate.clone(),
        Arc::new(transfer.provider_side()),
        DealPolicy::new(ask),
        Address::new("t0provider"),
        Arc::new(MemoryStore::new()),
        LogTarget::new("e2e::provider"),
    ));
    transfer.connect(Arc::clone(&client), Arc::clone(&provider));
    Network { client, provider, delegate, payments, transfer, client_peer, provider_peer }
}

impl Network {
    /// Publishes `len` bytes on the provider in 1000-byte blocks.
    fn publish(&self, len: usize) -> Cid {
        let data = (0..len).map(|_| rand::random::<u8>()).collect::<Vec<_>>();
        self.transfer.add_payload(&data, 1000);
        self.delegate.add_payload(&data, 1000)
    }

    async fn retrieve(&self, payload: Cid, params: Params, funds: u64) -> DealId {
        self.client
            .retrieve(
                payload,
                params,
                TokenAmount::from(funds),
                self.provider_peer,
                Address::new("t0client"),
                Address::new("t0provider"),
            )
            .await
            .unwrap()
    }

    /// Waits for the client's deal to finish, and for the provider's copy to finish too if there is one.
    async fn settle(&self, id: DealId) -> (ClientDealState, Option<ProviderDealState>) {
        let identifier = ProviderDealIdentifier::new(self.client_peer, id);
        for _ in 0..500 {
            let client = self.client.get_deal(id).await;
            let provider = self.provider.get_deal(&identifier).await;
            let client_done = client.as_ref().is_some_and(|d| d.status.is_terminal());
            let provider_done = provider.as_ref().map_or(true, |d| d.status.is_terminal());
            if client_done && provider_done {
                return (client.unwrap(), provider);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "deal {id} did not settle. client: {:?}, provider: {:?}",
            self.client.get_deal(id).await.map(|d| d.status),
            self.provider.get_deal(&identifier).await.map(|d| d.status)
        );
    }

    fn redeemed(&self, deal: &ClientDealState) -> TokenAmount {
        let pay_ch = &deal.payment_info.as_ref().unwrap().pay_ch;
        self.payments.redeemed(pay_ch)
    }
}

#[tokio::test]
async fn paid_retrieval_pays_every_interval() {
    let net = network(ask(0));
    let payload = net.publish(10_000);
    let id = net.retrieve(payload, params_for(&ask(0)), 1_000_000).await;
    let (client, provider) = net.settle(id).await;
    let provider = provider.unwrap();

    assert_eq!(client.status, DealStatus::Completed);
    assert_eq!(provider.status, DealStatus::Completed);
    assert_eq!((client.total_received, provider.total_sent), (10_000, 10_000));
    assert_eq!(client.funds_spent, TokenAmount::from(100_000));
    assert_eq!(provider.funds_received, TokenAmount::from(100_000));
    assert_eq!(net.redeemed(&client), TokenAmount::from(100_000));
    // Paid at 3000 bytes, at 7000 bytes with the interval grown by 1000, and once more at the end
    assert_eq!(net.payments.vouchers_created().len(), 3);
}

#[tokio::test]
async fn unseal_price_is_paid_before_any_data() {
    let net = network(ask(5_000));
    let payload = net.publish(10_000);
    let id = net.retrieve(payload, params_for(&ask(5_000)), 1_000_000).await;
    let (client, provider) = net.settle(id).await;
    let provider = provider.unwrap();

    assert_eq!((client.status, provider.status), (DealStatus::Completed, DealStatus::Completed));
    assert_eq!(client.unseal_funds_paid, TokenAmount::from(5_000));
    assert_eq!(client.funds_spent, TokenAmount::from(105_000));
    assert_eq!(provider.funds_received, TokenAmount::from(105_000));
    assert_eq!(net.redeemed(&client), TokenAmount::from(105_000));
    assert_eq!(net.payments.vouchers_created().len(), 4);
}

#[tokio::test]
async fn proposals_below_the_ask_leave_no_provider_deal() {
    let net = network(ask(0));
    let payload = net.publish(2_000);
    let cheap = Params::new(TokenAmount::from(5), 3000, 1000, TokenAmount::zero());
    let id = net.retrieve(payload, cheap, 1_000_000).await;
    let (client, provider) = net.settle(id).await;

    assert_eq!(client.status, DealStatus::Rejected);
    assert_eq!(client.message, "deal rejected: Price per byte too low");
    assert!(provider.is_none());
    assert!(net.provider.list_deals().await.is_empty());
}

#[tokio::test]
async fn unknown_payloads_are_not_found() {
    let net = network(ask(0));
    let missing = crate::helpers::raw_cid(b"nobody has this");
    let id = net.retrieve(missing, params_for(&ask(0)), 1_000_000).await;
    let (client, provider) = net.settle(id).await;

    assert_eq!((client.status, client.message.as_str()), (DealStatus::DealNotFound, "not found"));
    assert!(provider.is_none());
}

#[tokio::test]
async fn running_out_of_funds_fails_the_client() {
    let net = network(ask(0));
    let payload = net.publish(10_000);
    let id = net.retrieve(payload, params_for(&ask(0)), 20_000).await;
    let identifier = ProviderDealIdentifier::new(net.client_peer, id);

    let mut client = net.client.get_deal(id).await.unwrap();
    for _ in 0..500 {
        client = net.client.get_deal(id).await.unwrap();
        if client.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(client.status, DealStatus::Failed);
    assert!(client.message.starts_with("not enough funds left"), "{}", client.message);
    assert!(client.funds_spent.is_zero());
    // The provider stops at the first interval and waits to be paid
    let provider = net.provider.get_deal(&identifier).await.unwrap();
    assert_eq!((provider.status, provider.total_sent), (DealStatus::FundsNeeded, 3000));
}
