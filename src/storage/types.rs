//! Core data types for the storage layer.
//!
//! This module defines the domain records exchanged with callers:
//!
//! - [`Sample`] / [`MeterMessage`]: One reported measurement and its write envelope
//! - [`Resource`] / [`ResourceMeter`]: Current view of a monitored entity
//! - [`Meter`]: A meter descriptor flattened with its owning resource
//! - [`Alarm`]: Alarm definition with its matching metadata
//! - [`Statistics`], [`Event`], [`AlarmChange`]: Records of unsupported operations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Free-form metadata map (resource metadata, alarm matching metadata).
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Counter type classification.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CounterType {
    /// Point-in-time value.
    Gauge,
    /// Change since the previous sample.
    Delta,
    /// Monotonically increasing total.
    Cumulative,
}

/// A single measurement reported for a meter of a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Collector or agent that reported the sample.
    pub source: String,
    /// Meter name (e.g., "cpu").
    pub counter_name: String,
    /// Meter type.
    pub counter_type: CounterType,
    /// Meter unit (e.g., "percent").
    pub counter_unit: String,
    /// Measured value.
    pub counter_volume: f64,
    /// Owning user.
    pub user_id: String,
    /// Owning project.
    pub project_id: String,
    /// Monitored resource.
    pub resource_id: String,
    /// Time of the measurement (UTC).
    pub timestamp: DateTime<Utc>,
    /// Resource metadata snapshot at measurement time.
    #[serde(default)]
    pub resource_metadata: Metadata,
    /// Message identifier assigned by the publisher.
    #[serde(default)]
    pub message_id: String,
    /// Message signature assigned by the publisher.
    #[serde(default)]
    pub message_signature: String,
}

/// Write envelope for a sample.
///
/// `id` is the storage identifier of the raw sample document. When `None`,
/// one is generated on insert.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterMessage {
    /// Optional caller-supplied storage identifier.
    pub id: Option<String>,
    /// The sample itself.
    pub sample: Sample,
}

impl MeterMessage {
    /// Wrap a sample for writing with a generated identifier.
    pub fn new(sample: Sample) -> Self {
        Self { id: None, sample }
    }

    /// Use a caller-chosen storage identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

impl From<Sample> for MeterMessage {
    fn from(sample: Sample) -> Self {
        Self::new(sample)
    }
}

/// A meter descriptor as recorded on a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceMeter {
    pub counter_name: String,
    pub counter_type: CounterType,
    pub counter_unit: String,
}

/// Current state of a monitored resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub resource_id: String,
    pub project_id: String,
    pub user_id: String,
    pub source: String,
    /// Metadata from the most recent sample.
    pub metadata: Metadata,
    /// Not tracked by this backend; always `None`.
    pub first_sample_timestamp: Option<DateTime<Utc>>,
    /// Not tracked by this backend; always `None`.
    pub last_sample_timestamp: Option<DateTime<Utc>>,
    /// Every distinct meter the resource has reported.
    pub meters: Vec<ResourceMeter>,
}

/// A meter descriptor together with its owning resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meter {
    pub name: String,
    pub meter_type: CounterType,
    pub unit: String,
    pub resource_id: String,
    pub project_id: String,
    pub user_id: String,
    pub source: String,
}

/// Alarm evaluation state.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum AlarmState {
    #[serde(rename = "ok")]
    #[strum(serialize = "ok")]
    Ok,
    #[serde(rename = "alarm")]
    #[strum(serialize = "alarm")]
    Alarm,
    #[default]
    #[serde(rename = "insufficient data")]
    #[strum(serialize = "insufficient data")]
    InsufficientData,
}

/// An alarm definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    /// Stable alarm identifier (upsert key).
    pub alarm_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub enabled: bool,
    pub user_id: String,
    pub project_id: String,
    /// Meter the alarm evaluates.
    pub counter_name: String,
    /// Comparison against `threshold` (e.g., "gt", "lt").
    pub comparison_operator: String,
    pub threshold: f64,
    /// Statistic to evaluate (e.g., "avg").
    pub statistic: String,
    pub evaluation_periods: u32,
    /// Evaluation period in seconds.
    pub period: u32,
    pub state: AlarmState,
    pub state_timestamp: DateTime<Utc>,
    /// Last definition change.
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub ok_actions: Vec<String>,
    #[serde(default)]
    pub alarm_actions: Vec<String>,
    #[serde(default)]
    pub insufficient_data_actions: Vec<String>,
    #[serde(default)]
    pub repeat_actions: bool,
    /// Resource metadata the alarm is restricted to.
    #[serde(default)]
    pub matching_metadata: Metadata,
}

/// Aggregated statistics for a meter over a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub unit: String,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub sum: f64,
    pub count: u64,
    /// Period length in seconds.
    pub period: u64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    /// Duration in seconds between the first and last sample.
    pub duration: f64,
    pub duration_start: DateTime<Utc>,
    pub duration_end: DateTime<Utc>,
    pub groupby: Option<Metadata>,
}

/// A recorded notification event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub message_id: String,
    pub event_type: String,
    pub generated: DateTime<Utc>,
    #[serde(default)]
    pub traits: Metadata,
}

/// Filter for event queries.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub event_type: Option<String>,
}

/// One entry of an alarm's change history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmChange {
    pub event_id: String,
    pub alarm_id: String,
    /// Kind of change (e.g., "creation", "state transition").
    pub change_type: String,
    /// JSON-encoded change detail.
    pub detail: String,
    pub user_id: String,
    pub project_id: String,
    pub on_behalf_of: String,
    pub timestamp: DateTime<Utc>,
}
