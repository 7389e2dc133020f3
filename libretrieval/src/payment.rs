use crate::amount::TokenAmount;
use crate::helpers::{from_hex, to_hex};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// A lane index within a payment channel.
pub type Lane = u64;

/// An on-chain address: a wallet or a payment channel actor. The engine treats addresses as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Address(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The payment channel and lane a client pays a deal through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub pay_ch: Address,
    pub lane: Lane,
}

/// A signed payment-channel voucher. The `amount` is cumulative for the lane: each voucher supersedes the previous one.
///
/// Signatures are produced and checked by the payment node; the deal engine never inspects them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedVoucher {
    pub channel: Address,
    pub lane: Lane,
    pub nonce: u64,
    pub amount: TokenAmount,
    #[serde(serialize_with = "to_hex", deserialize_with = "from_hex")]
    pub signature: Vec<u8>,
}
