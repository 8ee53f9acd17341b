pub mod action;
pub mod assets;
pub mod config;
pub mod dispatcher;
pub mod flow;
pub mod logger;
pub mod schema;
pub mod tenant;

pub use dispatcher::{ActionOutcome, DeliveryOutcome, DispatchError, DispatchOutcome, Dispatcher};
pub use flow::{FlowDefinition, FlowError, Variables};
