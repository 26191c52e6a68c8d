//! Multi-schema fetch
//!
//! Runs one fixed query against every schema listed in a central meta
//! database and collects the rows into a single summary.
//!
//! This crate provides:
//! - Credential loading from the meta database
//! - A bounded worker pool with per-schema failure isolation
//! - Result aggregation and atomic JSON, CSV and stats reports
//! - Live progress snapshots

pub mod aggregator;
pub mod config;
pub mod error;
pub mod executor;
pub mod meta;
pub mod outcome;
pub mod progress;
pub mod report;
pub mod runner;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use aggregator::{ResultAggregator, Summary};
pub use config::{ConfigOverrides, FetchConfig, MetaDbConfig};
pub use error::{FetchError, RunResult};
pub use outcome::{FailureKind, FetchFailure, FetchOutcome, FetchStatus};
pub use runner::{Fetcher, RunReport};
pub use worker::FetchPool;
