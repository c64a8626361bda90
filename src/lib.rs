pub mod api;
pub mod config;
pub mod contracts;
pub mod error;
pub mod indexer;
pub mod ledger;
pub mod math;
pub mod models;
pub mod parser;
pub mod planner;
pub mod prices;
pub mod reconciler;
pub mod registry;
pub mod rpc;
pub mod sources;
pub mod view;

pub use error::{ErrorCategory, FetchError, LedgerError, Result};
pub use models::{Flow, FlowKey, LedgerEvent, Snapshot, SuperToken};
pub use reconciler::Reconciler;
pub use registry::{HandleCache, TokenRegistry};
