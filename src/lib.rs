//! Meterstore - metering storage on a document store
//!
//! Storage adapter for a telemetry service: records metering samples and
//! alarm definitions in a MongoDB-compatible document database (IBM DB2's
//! JSON interface or MongoDB itself) and answers filtered queries over them.
//!
//! # Architecture
//!
//! - **Config**: YAML configuration with environment expansion
//! - **Storage**: connection pooling, schema setup, write and read paths
//! - **Document store**: pluggable backend behind the `DocumentStore` trait,
//!   with an in-memory implementation
//!
//! # Example
//!
//! ```rust
//! use meterstore::storage::db::MemoryDriver;
//! use meterstore::{Connection, SampleFilter};
//!
//! let driver = MemoryDriver::default();
//! let conn = Connection::open("memory://localhost/ceilometer", &driver)?;
//! let samples = conn.get_samples(&SampleFilter::new().with_meter("cpu"), Some(10))?;
//! assert_eq!(samples.count(), 0);
//! # Ok::<(), meterstore::StorageError>(())
//! ```

pub mod config;
pub mod storage;

pub use config::{AppConfig, ConfigError, DatabaseConfig};
pub use storage::{
    Alarm, AlarmFilter, Connection, ConnectionPool, Meter, MeterFilter, MeterMessage, Records,
    Resource, ResourceFilter, Sample, SampleFilter, StorageError,
};
