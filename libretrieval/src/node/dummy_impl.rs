//! In-memory collaborators. They keep just enough ledger state to behave like the real thing in tests and demos.

use crate::amount::TokenAmount;
use crate::deal_id::ProviderDealIdentifier;
use crate::helpers::raw_cid;
use crate::messages::Block;
use crate::node::{
    BlockError, BlockSource, ChannelFunding, NodeError, PieceInfo, PieceLookup, PieceLookupError, RetrievalClientNode,
    RetrievalProviderNode,
};
use crate::payment::{Address, Lane, SignedVoucher};
use cid::Cid;
use log::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

//------------------------------------------   Payment node   -------------------------------------------------//

#[derive(Default)]
struct Ledger {
    channels: HashMap<(Address, Address), Address>,
    pending: HashMap<Cid, Address>,
    lanes: HashMap<Address, Lane>,
    nonces: HashMap<(Address, Lane), u64>,
    /// Highest voucher amount saved per lane.
    redeemed: HashMap<(Address, Lane), TokenAmount>,
    vouchers_created: Vec<SignedVoucher>,
    fail_vouchers: bool,
    fail_channels: bool,
}

/// A payment node backed by an in-memory ledger. One instance can serve as both the client's and the provider's node,
/// which is how the end-to-end tests wire it.
#[derive(Clone, Default)]
pub struct DummyPaymentNode {
    ledger: Arc<Mutex<Ledger>>,
}

impl DummyPaymentNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent voucher creation fail.
    pub fn fail_voucher_creation(&self, fail: bool) {
        self.ledger.lock().fail_vouchers = fail;
    }

    pub fn fail_channel_creation(&self, fail: bool) {
        self.ledger.lock().fail_channels = fail;
    }

    pub fn vouchers_created(&self) -> Vec<SignedVoucher> {
        self.ledger.lock().vouchers_created.clone()
    }

    /// Total value saved across all lanes of `pay_ch`.
    pub fn redeemed(&self, pay_ch: &Address) -> TokenAmount {
        let ledger = self.ledger.lock();
        ledger
            .redeemed
            .iter()
            .filter(|((ch, _), _)| ch == pay_ch)
            .fold(TokenAmount::zero(), |acc, (_, amt)| acc + amt.clone())
    }
}

impl RetrievalClientNode for DummyPaymentNode {
    async fn get_or_create_payment_channel(
        &self,
        client: &Address,
        miner: &Address,
        funds: &TokenAmount,
    ) -> Result<ChannelFunding, NodeError> {
        let mut ledger = self.ledger.lock();
        if ledger.fail_channels {
            return Err(NodeError::payment_channel("channel creation disabled"));
        }
        let key = (client.clone(), miner.clone());
        let n = ledger.channels.len() + ledger.pending.len();
        let wait_msg = raw_cid(format!("paych-msg-{client}-{miner}-{funds}-{n}").as_bytes());
        let existing = ledger.channels.get(&key).cloned();
        match existing {
            Some(pay_ch) => {
                debug!("Adding {funds} to existing channel {pay_ch}");
                Ok(ChannelFunding::AddingFunds { pay_ch, wait_msg })
            }
            None => {
                let pay_ch = Address::new(format!("t0{}", 1000 + n));
                debug!("Creating channel {pay_ch} from {client} to {miner} with {funds}");
                ledger.pending.insert(wait_msg, pay_ch.clone());
                ledger.channels.insert(key, pay_ch);
                Ok(ChannelFunding::Creating { wait_msg })
            }
        }
    }

    async fn wait_for_payment_channel_creation(&self, wait_msg: Cid) -> Result<Address, NodeError> {
        self.ledger.lock().pending.remove(&wait_msg).ok_or_else(|| NodeError::WaitTimeout(wait_msg.to_string()))
    }

    async fn wait_for_payment_channel_add_funds(&self, _wait_msg: Cid) -> Result<(), NodeError> {
        Ok(())
    }

    async fn allocate_lane(&self, pay_ch: &Address) -> Result<Lane, NodeError> {
        let mut ledger = self.ledger.lock();
        let next = ledger.lanes.entry(pay_ch.clone()).or_insert(0);
        let lane = *next;
        *next += 1;
        Ok(lane)
    }

    async fn create_payment_voucher(
        &self,
        pay_ch: &Address,
        amount: &TokenAmount,
        lane: Lane,
    ) -> Result<SignedVoucher, NodeError> {
        let mut ledger = self.ledger.lock();
        if ledger.fail_vouchers {
            return Err(NodeError::voucher("voucher creation disabled"));
        }
        let nonce = ledger.nonces.entry((pay_ch.clone(), lane)).or_insert(0);
        *nonce += 1;
        let voucher = SignedVoucher {
            channel: pay_ch.clone(),
            lane,
            nonce: *nonce,
            amount: amount.clone(),
            signature: raw_cid(format!("{pay_ch}/{lane}/{nonce}/{amount}").as_bytes()).to_bytes(),
        };
        ledger.vouchers_created.push(voucher.clone());
        Ok(voucher)
    }
}

impl RetrievalProviderNode for DummyPaymentNode {
    async fn save_payment_voucher(
        &self,
        pay_ch: &Address,
        voucher: &SignedVoucher,
        _proof: Option<&[u8]>,
        expected: &TokenAmount,
    ) -> Result<TokenAmount, NodeError> {
        if &voucher.channel != pay_ch {
            return Err(NodeError::voucher(format!("voucher is for channel {}, not {pay_ch}", voucher.channel)));
        }
        let mut ledger = self.ledger.lock();
        let saved = ledger.redeemed.entry((pay_ch.clone(), voucher.lane)).or_default();
        let received = voucher.amount.saturating_sub(saved);
        if !received.is_zero() {
            *saved = voucher.amount.clone();
        }
        trace!("Saved voucher on {pay_ch} lane {}: received {received}, expected {expected}", voucher.lane);
        Ok(received)
    }
}

//------------------------------------------   Piece store   --------------------------------------------------//

#[derive(Clone, Default)]
pub struct DummyPieceStore {
    pieces: Arc<Mutex<HashMap<Cid, PieceInfo>>>,
    failure: Arc<Mutex<Option<String>>>,
}

impl DummyPieceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_piece(&self, payload: Cid, info: PieceInfo) {
        self.pieces.lock().insert(payload, info);
    }

    /// Make every lookup fail with `reason`, as if the underlying store were broken.
    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.lock() = Some(reason.into());
    }
}

impl PieceLookup for DummyPieceStore {
    async fn get_piece_info(&self, payload: &Cid, piece: Option<&Cid>) -> Result<PieceInfo, PieceLookupError> {
        if let Some(reason) = self.failure.lock().clone() {
            return Err(PieceLookupError::Other(reason));
        }
        let pieces = self.pieces.lock();
        match (pieces.get(payload), piece) {
            (Some(info), Some(wanted)) if &info.piece_cid != wanted => Err(PieceLookupError::NotFound),
            (Some(info), _) => Ok(info.clone()),
            (None, _) => Err(PieceLookupError::NotFound),
        }
    }
}

//------------------------------------------   Block source   -------------------------------------------------//

#[derive(Default)]
struct BlockStore {
    payloads: HashMap<Cid, Vec<Block>>,
    cursors: HashMap<ProviderDealIdentifier, usize>,
}

/// Serves payloads that were split into fixed-size blocks up front. Each deal reads through the blocks once.
#[derive(Clone, Default)]
pub struct MemoryBlockSource {
    store: Arc<Mutex<BlockStore>>,
}

impl MemoryBlockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Splits `data` into blocks of `block_size` bytes and returns the payload CID they are served under.
    pub fn add_payload(&self, data: &[u8], block_size: usize) -> Cid {
        let root = raw_cid(data);
        let blocks = data
            .chunks(block_size.max(1))
            .map(|chunk| Block { cid: raw_cid(chunk), data: chunk.to_vec() })
            .collect::<Vec<_>>();
        self.store.lock().payloads.insert(root, blocks);
        root
    }
}

impl BlockSource for MemoryBlockSource {
    async fn next_block(&self, deal: &ProviderDealIdentifier, payload: &Cid) -> Result<(Block, bool), BlockError> {
        let mut store = self.store.lock();
        let count = match store.payloads.get(payload) {
            Some(blocks) if !blocks.is_empty() => blocks.len(),
            _ => return Err(BlockError(format!("no blocks for payload {payload}"))),
        };
        let cursor = store.cursors.entry(*deal).or_insert(0);
        let index = *cursor;
        if index >= count {
            return Err(BlockError(format!("all blocks for {payload} were already read")));
        }
        *cursor += 1;
        let block = store.payloads.get(payload).and_then(|b| b.get(index)).cloned();
        block.map(|b| (b, index + 1 == count)).ok_or_else(|| BlockError::from("block disappeared"))
    }
}

//------------------------------------------   Provider delegate   --------------------------------------------//

/// Bundles the dummy collaborators into one [`crate::node::ProviderDelegate`]. Clones share state.
#[derive(Clone, Default)]
pub struct DummyProviderDelegate {
    pub payments: DummyPaymentNode,
    pub pieces: DummyPieceStore,
    pub blocks: MemoryBlockSource,
}

impl DummyProviderDelegate {
    pub fn new(payments: DummyPaymentNode) -> Self {
        Self { payments, pieces: DummyPieceStore::new(), blocks: MemoryBlockSource::new() }
    }

    /// Makes `data` retrievable: splits it into blocks and registers it in a piece of its own.
    pub fn add_payload(&self, data: &[u8], block_size: usize) -> Cid {
        let root = self.blocks.add_payload(data, block_size);
        let piece_cid = raw_cid(format!("piece-{root}").as_bytes());
        self.pieces.add_piece(root, PieceInfo { piece_cid, size: data.len() as u64 });
        root
    }
}

impl RetrievalProviderNode for DummyProviderDelegate {
    async fn save_payment_voucher(
        &self,
        pay_ch: &Address,
        voucher: &SignedVoucher,
        proof: Option<&[u8]>,
        expected: &TokenAmount,
    ) -> Result<TokenAmount, NodeError> {
        self.payments.save_payment_voucher(pay_ch, voucher, proof, expected).await
    }
}

impl PieceLookup for DummyProviderDelegate {
    async fn get_piece_info(&self, payload: &Cid, piece: Option<&Cid>) -> Result<PieceInfo, PieceLookupError> {
        self.pieces.get_piece_info(payload, piece).await
    }
}

impl BlockSource for DummyProviderDelegate {
    async fn next_block(&self, deal: &ProviderDealIdentifier, payload: &Cid) -> Result<(Block, bool), BlockError> {
        self.blocks.next_block(deal, payload).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::deal_id::DealId;
    use crate::helpers::test_helpers::random_peer;

    #[tokio::test]
    async fn saving_a_voucher_twice_yields_nothing_the_second_time() {
        let node = DummyPaymentNode::new();
        let (client, miner) = (Address::new("t01"), Address::new("t02"));
        let wait_msg = match node.get_or_create_payment_channel(&client, &miner, &100.into()).await.unwrap() {
            ChannelFunding::Creating { wait_msg } => wait_msg,
            other => panic!("expected a new channel, got {other:?}"),
        };
        let pay_ch = node.wait_for_payment_channel_creation(wait_msg).await.unwrap();
        let lane = node.allocate_lane(&pay_ch).await.unwrap();
        let voucher = node.create_payment_voucher(&pay_ch, &60.into(), lane).await.unwrap();
        let received = node.save_payment_voucher(&pay_ch, &voucher, None, &60.into()).await.unwrap();
        assert_eq!(received, TokenAmount::from(60));
        let received = node.save_payment_voucher(&pay_ch, &voucher, None, &60.into()).await.unwrap();
        assert!(received.is_zero());
        let voucher = node.create_payment_voucher(&pay_ch, &100.into(), lane).await.unwrap();
        let received = node.save_payment_voucher(&pay_ch, &voucher, None, &40.into()).await.unwrap();
        assert_eq!(received, TokenAmount::from(40));
        assert_eq!(node.redeemed(&pay_ch), TokenAmount::from(100));
        // A second request for the same pair tops up the existing channel
        let funding = node.get_or_create_payment_channel(&client, &miner, &100.into()).await.unwrap();
        assert!(matches!(funding, ChannelFunding::AddingFunds { pay_ch: ch, .. } if ch == pay_ch));
    }

    #[tokio::test]
    async fn block_source_walks_payload_once_per_deal() {
        let source = MemoryBlockSource::new();
        let payload = source.add_payload(&[7u8; 2500], 1000);
        let deal = ProviderDealIdentifier::new(random_peer(), DealId::new(1));
        let (b1, last) = source.next_block(&deal, &payload).await.unwrap();
        assert_eq!((b1.len(), last), (1000, false));
        let (_, last) = source.next_block(&deal, &payload).await.unwrap();
        assert!(!last);
        let (b3, last) = source.next_block(&deal, &payload).await.unwrap();
        assert_eq!((b3.len(), last), (500, true));
        assert!(source.next_block(&deal, &payload).await.is_err());
        let other = ProviderDealIdentifier::new(random_peer(), DealId::new(1));
        assert!(source.next_block(&other, &payload).await.is_ok());
    }

    #[tokio::test]
    async fn piece_lookup_distinguishes_not_found() {
        let store = DummyPieceStore::new();
        let payload = raw_cid(b"payload");
        let piece = raw_cid(b"piece");
        assert_eq!(store.get_piece_size(&payload).await, Err(PieceLookupError::NotFound));
        store.add_piece(payload, PieceInfo { piece_cid: piece, size: 2048 });
        assert_eq!(store.get_piece_size(&payload).await, Ok(2048));
        assert_eq!(store.get_piece_info(&payload, Some(&payload)).await, Err(PieceLookupError::NotFound));
        store.fail_with("disk on fire");
        assert!(matches!(store.get_piece_size(&payload).await, Err(PieceLookupError::Other(_))));
    }
}
