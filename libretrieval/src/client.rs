//! The retrieval client: fetches payloads from providers and pays for them as the data arrives.

use crate::amount::TokenAmount;
use crate::client_deal::ClientDealState;
use crate::deal_id::DealId;
use crate::error::RetrievalError;
use crate::logging::LogTarget;
use crate::messages::{DealProposal, Params, VoucherResult};
use crate::node::RetrievalClientNode;
use crate::payment::Address;
use crate::state_machine::ClientEvent;
use crate::state_machine::client_handlers::{ClientEnvironment, ClientFsm};
use crate::state_machine::deal_group::DealGroup;
use crate::status::DealStatus;
use crate::storage::DealStore;
use crate::subscribers::SubscriptionToken;
use crate::transfer::DataTransfer;
use cid::Cid;
use libp2p::PeerId;
use log::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub struct RetrievalClient<N, T>
where
    N: RetrievalClientNode,
    T: DataTransfer,
{
    group: DealGroup<ClientFsm<N, T>>,
    store: Arc<dyn DealStore<ClientDealState>>,
    next_id: AtomicU64,
    log: LogTarget,
}

impl<N, T> RetrievalClient<N, T>
where
    N: RetrievalClientNode,
    T: DataTransfer,
{
    pub fn new(node: Arc<N>, transfer: Arc<T>, store: Arc<dyn DealStore<ClientDealState>>, log: LogTarget) -> Self {
        let env = ClientEnvironment { node, transfer, log: log.clone() };
        let group = DealGroup::new(ClientFsm::new(env), Arc::clone(&store), log.child("deals"));
        Self { group, store, next_id: AtomicU64::new(1), log }
    }

    /// Starts retrieving `payload_cid` from `provider`, spending at most `total_funds`. The deal runs in the
    /// background; follow it with [`RetrievalClient::subscribe_to_events`] or [`RetrievalClient::get_deal`].
    pub async fn retrieve(
        &self,
        payload_cid: Cid,
        params: Params,
        total_funds: TokenAmount,
        provider: PeerId,
        client_wallet: Address,
        miner_wallet: Address,
    ) -> Result<DealId, RetrievalError> {
        let id = DealId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let proposal = DealProposal { id, payload_cid, params };
        let deal = ClientDealState::new(proposal, provider, total_funds, client_wallet, miner_wallet);
        self.group.begin(deal, false).await?;
        info!(target: self.log.as_str(), "Retrieving {payload_cid} from {provider} as deal {id}");
        self.group.send_event(id, ClientEvent::Open).await?;
        Ok(id)
    }

    pub async fn cancel_deal(&self, id: DealId) -> Result<(), RetrievalError> {
        info!(target: self.log.as_str(), "Cancelling deal {id}");
        self.group.send_event(id, ClientEvent::Cancel).await?;
        Ok(())
    }

    pub async fn get_deal(&self, id: DealId) -> Option<ClientDealState> {
        self.group.get(&id).await
    }

    pub async fn list_deals(&self) -> Vec<ClientDealState> {
        self.group.list().await
    }

    /// Calls `callback` after every transition of every deal, with the event and the deal's new state.
    pub fn subscribe_to_events<C>(&self, callback: C) -> SubscriptionToken
    where
        C: Fn(&ClientEvent, &ClientDealState) + Send + Sync + 'static,
    {
        self.group.subscribe(callback)
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.group.unsubscribe(token)
    }

    /// Reloads deals from the store and resumes the unfinished ones. New deals are numbered after the highest deal
    /// id found.
    pub async fn restore(&self) -> Result<usize, RetrievalError> {
        let deals = self.store.load_all()?;
        let count = deals.len();
        if let Some(max) = deals.iter().map(|d| d.id().value()).max() {
            self.next_id.fetch_max(max + 1, Ordering::SeqCst);
        }
        self.group.restore(deals).await?;
        info!(target: self.log.as_str(), "Restored {count} client deals");
        Ok(count)
    }

    //------------------------------------   Data-transfer callbacks   ------------------------------------------//

    /// The transfer layer has received `total_received` bytes for the deal so far.
    pub async fn on_data_received(&self, id: DealId, total_received: u64) -> Result<(), RetrievalError> {
        self.group.send_event(id, ClientEvent::BlocksReceived(total_received)).await?;
        Ok(())
    }

    /// The provider answered a voucher on the deal's channel.
    pub async fn on_voucher_result(&self, result: VoucherResult) -> Result<(), RetrievalError> {
        let response = result.into_response();
        let id = response.id;
        let event = match response.status {
            DealStatus::Accepted => ClientEvent::DealAccepted,
            DealStatus::FundsNeeded | DealStatus::FundsNeededUnseal => {
                ClientEvent::PaymentRequested(response.payment_owed)
            }
            DealStatus::FundsNeededLastPayment => ClientEvent::LastPaymentRequested(response.payment_owed),
            DealStatus::Rejected => ClientEvent::DealRejected(response.message),
            DealStatus::DealNotFound => ClientEvent::DealNotFound(response.message),
            DealStatus::Completed => ClientEvent::Complete,
            DealStatus::Failed | DealStatus::Errored => ClientEvent::ProviderErrored(response.message),
            status => {
                debug!(target: self.log.as_str(), "Deal {id}: ignoring a {status} response");
                return Ok(());
            }
        };
        self.group.send_event(id, event).await?;
        Ok(())
    }

    /// The provider has sent everything.
    pub async fn on_transfer_complete(&self, id: DealId) -> Result<(), RetrievalError> {
        self.group.send_event(id, ClientEvent::AllBlocksReceived).await?;
        Ok(())
    }

    pub async fn on_transfer_error(&self, id: DealId, error: impl ToString) -> Result<(), RetrievalError> {
        self.group.send_event(id, ClientEvent::DataTransferError(error.to_string())).await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::helpers::raw_cid;
    use crate::helpers::test_helpers::random_peer;
    use crate::messages::{DealResponse, TransferVoucher};
    use crate::node::DummyPaymentNode;
    use crate::state_machine::error::LifeCycleError;
    use crate::storage::MemoryStore;
    use crate::transfer::{RecordingTransfer, TransferCall};
    use std::time::Duration;

    struct Setup {
        client: RetrievalClient<DummyPaymentNode, RecordingTransfer>,
        transfer: Arc<RecordingTransfer>,
        store: Arc<MemoryStore>,
    }

    fn setup() -> Setup {
        env_logger::try_init().ok();
        let transfer = Arc::new(RecordingTransfer::new(random_peer()));
        let store = Arc::new(MemoryStore::new());
        let client = RetrievalClient::new(
            Arc::new(DummyPaymentNode::new()),
            Arc::clone(&transfer),
            store.clone(),
            LogTarget::new("test::client"),
        );
        Setup { client, transfer, store }
    }

    async fn wait_for(client: &RetrievalClient<DummyPaymentNode, RecordingTransfer>, id: DealId, status: DealStatus) {
        for _ in 0..200 {
            if client.get_deal(id).await.map(|d| d.status) == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("deal {id} never reached {status}: {:?}", client.get_deal(id).await);
    }

    async fn start(s: &Setup) -> DealId {
        let params = Params::new(500.into(), 1000, 500, 0.into());
        let (client_wallet, miner_wallet) = (Address::new("t01"), Address::new("t02"));
        let funds = TokenAmount::from(10_000_000);
        let payload = raw_cid(b"payload");
        let id = s.client.retrieve(payload, params, funds, random_peer(), client_wallet, miner_wallet).await.unwrap();
        wait_for(&s.client, id, DealStatus::WaitForAcceptance).await;
        id
    }

    fn respond(id: DealId, status: DealStatus, owed: u64) -> VoucherResult {
        VoucherResult::Response(DealResponse::new(id, status).with_payment_owed(owed.into()))
    }

    #[tokio::test]
    async fn pays_for_each_interval_as_data_arrives() {
        let s = setup();
        let id = start(&s).await;
        assert!(matches!(s.transfer.calls()[0], TransferCall::Open { voucher: TransferVoucher::Proposal(_), .. }));
        s.client.on_voucher_result(respond(id, DealStatus::Accepted, 0)).await.unwrap();
        s.client.on_data_received(id, 1000).await.unwrap();
        s.client.on_voucher_result(respond(id, DealStatus::FundsNeeded, 500_000)).await.unwrap();
        wait_for(&s.client, id, DealStatus::Ongoing).await;
        let deal = s.client.get_deal(id).await.unwrap();
        assert_eq!(deal.funds_spent, TokenAmount::from(500_000));
        assert_eq!((deal.bytes_paid_for, deal.current_interval), (1000, 1500));
        let paid = s.transfer.calls().into_iter().filter(|c| matches!(c, TransferCall::Voucher { .. })).count();
        assert_eq!(paid, 1);

        s.client.on_data_received(id, 1200).await.unwrap();
        s.client.on_transfer_complete(id).await.unwrap();
        s.client.on_voucher_result(respond(id, DealStatus::FundsNeededLastPayment, 100_000)).await.unwrap();
        wait_for(&s.client, id, DealStatus::Finalizing).await;
        s.client.on_voucher_result(respond(id, DealStatus::Completed, 0)).await.unwrap();
        let deal = s.client.get_deal(id).await.unwrap();
        assert_eq!((deal.status, deal.funds_spent), (DealStatus::Completed, TokenAmount::from(600_000)));
        // Late callbacks for a finished deal are refused
        let late = s.client.on_data_received(id, 1300).await;
        assert!(matches!(late, Err(RetrievalError::LifeCycle(LifeCycleError::Terminal(DealStatus::Completed)))));
    }

    #[tokio::test]
    async fn rejection_ends_the_deal() {
        let s = setup();
        let id = start(&s).await;
        let rejection = VoucherResult::Response(
            DealResponse::new(id, DealStatus::Rejected).with_message("Price per byte too low"),
        );
        s.client.on_voucher_result(rejection).await.unwrap();
        let deal = s.client.get_deal(id).await.unwrap();
        assert_eq!(deal.status, DealStatus::Rejected);
        assert_eq!(deal.message, "deal rejected: Price per byte too low");
    }

    #[tokio::test]
    async fn cancelling_closes_the_channel() {
        let s = setup();
        let id = start(&s).await;
        s.client.cancel_deal(id).await.unwrap();
        wait_for(&s.client, id, DealStatus::Cancelled).await;
        assert!(matches!(s.transfer.calls().last(), Some(TransferCall::Close(_))));
    }

    #[tokio::test]
    async fn deal_ids_continue_after_a_restart() {
        let s = setup();
        let first = start(&s).await;
        let second = start(&s).await;
        assert_eq!(second, first.next());

        let restarted = RetrievalClient::new(
            Arc::new(DummyPaymentNode::new()),
            Arc::new(RecordingTransfer::new(random_peer())),
            s.store.clone(),
            LogTarget::new("test::client::restarted"),
        );
        assert_eq!(restarted.restore().await.unwrap(), 2);
        assert_eq!(restarted.get_deal(second).await.unwrap().status, DealStatus::WaitForAcceptance);
        let params = Params::new(500.into(), 1000, 500, 0.into());
        let third = restarted
            .retrieve(raw_cid(b"more"), params, 1_000.into(), random_peer(), Address::new("t01"), Address::new("t02"))
            .await
            .unwrap();
        assert_eq!(third, second.next());
    }
}
