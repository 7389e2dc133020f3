// Deal state machines
mod client_events;
pub mod client_fsm;
pub mod client_handlers;
mod provider_events;
pub mod provider_fsm;
pub mod provider_handlers;

pub mod deal_group;
pub mod error;

pub use client_events::ClientEvent;
pub use client_fsm::{apply_client_event, client_action_for, ClientAction};
pub use client_handlers::{ClientEnvironment, ClientFsm};
pub use deal_group::{DealFsm, DealGroup};
pub use error::LifeCycleError;
pub use provider_events::ProviderEvent;
pub use provider_fsm::{apply_provider_event, provider_action_for, ProviderAction};
pub use provider_handlers::{ProviderEnvironment, ProviderFsm};
