//! Per-schema fetch execution.

mod fetch;

pub use fetch::FetchExecutor;
