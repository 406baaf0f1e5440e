//! Storage Layer
//!
//! Metering storage on a MongoDB-compatible document store (DB2 JSON, MongoDB):
//! - **Write path**: per-sample upserts of user, project and resource records
//!   plus the raw sample
//! - **Read path**: filtered listings of users, projects, resources, meters,
//!   samples and alarms, returned as lazy [`Records`]
//!
//! # Components
//!
//! - [`Connection`]: adapter entry point (open, clear, write, read, alarms)
//! - [`ConnectionPool`]: one live client per connection URL
//! - [`query`]: filter-to-query translation
//! - [`db`]: the document-store boundary and the in-memory backend

mod alarms;
mod codec;
mod connection;
pub mod db;
mod error;
mod pool;
pub mod query;
mod reader;
mod records;
pub mod schema;
mod types;

pub use codec::{decode_matching_metadata, encode_matching_metadata};
pub use connection::{Connection, MINIMUM_VERSION, check_version};
pub use error::StorageError;
pub use pool::{ConnectionPool, PooledClient};
pub use query::{
    AlarmFilter, EndOp, MeterFilter, Pagination, ResourceFilter, SampleFilter, StartOp,
};
pub use reader::Records;
pub use types::{
    Alarm, AlarmChange, AlarmState, CounterType, Event, EventFilter, Meter, MeterMessage,
    Metadata, Resource, ResourceMeter, Sample, Statistics,
};
