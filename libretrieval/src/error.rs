use crate::request_validator::ValidationError;
use crate::revalidator::RevalidationError;
use crate::state_machine::error::LifeCycleError;
use crate::stream::StreamError;
use crate::transfer::TransferError;
use thiserror::Error;

/// Errors returned by the client and provider front ends.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(transparent)]
    LifeCycle(#[from] LifeCycleError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Revalidation(#[from] RevalidationError),
    #[error("Deal store error. {0}")]
    Storage(#[from] anyhow::Error),
}
