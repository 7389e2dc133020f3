#[cfg(feature = "dummy_node")]
pub mod dummy_impl;
mod error;
mod traits;

#[cfg(feature = "dummy_node")]
pub use dummy_impl::{DummyPaymentNode, DummyPieceStore, DummyProviderDelegate, MemoryBlockSource};
pub use error::{BlockError, NodeError, PieceLookupError};
pub use traits::{
    BlockSource, ChannelFunding, PieceInfo, PieceLookup, ProviderDelegate, RetrievalClientNode, RetrievalProviderNode,
};
