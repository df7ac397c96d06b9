pub mod allocation;
pub mod catalog;
pub mod config;
mod conservation;
pub mod controller;
pub mod error;
pub mod ledger;
pub mod query;
pub mod reversal;
pub mod service;

pub use allocation::AllocationEngine;
pub use catalog::{NewResource, ResourceCatalog, ResourceUpdate};
pub use config::EngineConfig;
pub use controller::{ConcurrencyController, RetryPolicy};
pub use error::{BookingError, Result};
pub use ledger::LedgerView;
pub use query::{DateFilter, PageRequest, ResourceFilter};
pub use reversal::ReversalEngine;
pub use service::BookingService;
