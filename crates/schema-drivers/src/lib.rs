//! Schema Drivers
//!
//! Connection layer for per-schema fetches.
//!
//! This crate provides:
//! - Dynamic row values that survive a JSON round-trip
//! - Schema credentials with redacted debug output
//! - Driver registry that opens connections under a connect timeout
//! - Built-in drivers: mysql, postgres

pub mod credential;
pub mod drivers;
pub mod error;
pub mod registry;
pub mod value;

pub use credential::{DatabaseKind, SchemaCredential};
pub use error::DriverError;
pub use registry::{Driver, DriverRegistry, SchemaConnection};
pub use value::{Row, Value};
