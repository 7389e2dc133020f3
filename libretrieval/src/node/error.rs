use thiserror::Error;

#[derive(Clone, Debug, Error)]
pub enum NodeError {
    #[error("Payment channel error: {0}")]
    PaymentChannel(String),
    #[error("Could not allocate a lane on payment channel {0}")]
    LaneAllocation(String),
    #[error("Voucher error: {0}")]
    Voucher(String),
    #[error("Timed out waiting for message {0}")]
    WaitTimeout(String),
}

impl NodeError {
    pub fn voucher(msg: impl Into<String>) -> Self {
        NodeError::Voucher(msg.into())
    }

    pub fn payment_channel(msg: impl Into<String>) -> Self {
        NodeError::PaymentChannel(msg.into())
    }
}

/// Failures looking up which piece holds a payload. `NotFound` is a normal outcome and is reported to the client as
/// such; anything else is a fault on the provider.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PieceLookupError {
    #[error("not found")]
    NotFound,
    #[error("Piece lookup failed. {0}")]
    Other(String),
}

#[derive(Clone, Debug, Error)]
#[error("Block read error: {0}")]
pub struct BlockError(pub String);

impl From<&str> for BlockError {
    fn from(s: &str) -> Self {
        BlockError(s.to_string())
    }
}
