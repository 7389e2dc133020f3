use crate::status::DealStatus;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LifeCycleError {
    #[error("Event {event} is not allowed while the deal is {status}")]
    InvalidStateTransition { status: DealStatus, event: String },
    #[error("The deal has already finished with status {0} and cannot transition again")]
    Terminal(DealStatus),
    #[error("The deal is not in the correct lifecycle state to call {0}")]
    InvalidState(String),
    #[error("No deal with id {0} is being tracked")]
    DealNotFound(String),
    #[error("A deal with id {0} is already being tracked")]
    DuplicateDeal(String),
    #[error("Could not persist the deal. {0}")]
    Storage(String),
    #[error("This is a bug. {0}")]
    InternalError(String),
}

impl LifeCycleError {
    pub fn invalid_transition(status: DealStatus, event: impl ToString) -> Self {
        LifeCycleError::InvalidStateTransition { status, event: event.to_string() }
    }

    pub fn invalid_state_for(func: &str) -> Self {
        LifeCycleError::InvalidState(func.into())
    }
}
