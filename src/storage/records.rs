//! Per-collection storage documents.
//!
//! Each collection has an explicit record type; conversions to and from the
//! domain types live here so the read and write paths never pass loose maps
//! around.
//!
//! Collections:
//! - `user` / `project`: [`OwnerDocument`]
//! - `resource`: [`ResourceDocument`] with its [`MeterDescriptor`] set
//! - `meter`: [`SampleDocument`], one per reported sample
//! - `alarm`: [`AlarmDocument`]

use bson::Bson;
use bson::serde_helpers::chrono_datetime_as_bson_datetime;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::StorageError;
use crate::storage::codec::{decode_matching_metadata, encode_matching_metadata};
use crate::storage::types::{
    Alarm, AlarmState, CounterType, Meter, Metadata, Resource, ResourceMeter, Sample,
};

/// Collection names.
pub(crate) const USER: &str = "user";
pub(crate) const PROJECT: &str = "project";
pub(crate) const RESOURCE: &str = "resource";
pub(crate) const METER: &str = "meter";
pub(crate) const ALARM: &str = "alarm";

// =============================================================================
// Users / Projects
// =============================================================================

/// `user` and `project` document: an id and every source that reported it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct OwnerDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub source: Vec<String>,
}

// =============================================================================
// Resources
// =============================================================================

/// One entry of a resource's meter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct MeterDescriptor {
    pub counter_name: String,
    pub counter_type: CounterType,
    /// Missing on records written before units were tracked.
    #[serde(default)]
    pub counter_unit: String,
}

impl MeterDescriptor {
    pub fn from_sample(sample: &Sample) -> Self {
        Self {
            counter_name: sample.counter_name.clone(),
            counter_type: sample.counter_type,
            counter_unit: sample.counter_unit.clone(),
        }
    }
}

/// `resource` document: latest ownership and metadata plus the meter set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ResourceDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub source: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, rename = "meter")]
    pub meters: Vec<MeterDescriptor>,
}

impl ResourceDocument {
    /// Flatten the meter set into per-meter records.
    pub fn into_meters(self) -> Vec<Meter> {
        let Self {
            id,
            project_id,
            user_id,
            source,
            meters,
            ..
        } = self;

        meters
            .into_iter()
            .map(|m| Meter {
                name: m.counter_name,
                meter_type: m.counter_type,
                unit: m.counter_unit,
                resource_id: id.clone(),
                project_id: project_id.clone(),
                user_id: user_id.clone(),
                source: source.clone(),
            })
            .collect()
    }
}

impl From<ResourceDocument> for Resource {
    fn from(doc: ResourceDocument) -> Self {
        Self {
            resource_id: doc.id,
            project_id: doc.project_id,
            user_id: doc.user_id,
            source: doc.source,
            metadata: doc.metadata,
            first_sample_timestamp: None,
            last_sample_timestamp: None,
            meters: doc
                .meters
                .into_iter()
                .map(|m| ResourceMeter {
                    counter_name: m.counter_name,
                    counter_type: m.counter_type,
                    counter_unit: m.counter_unit,
                })
                .collect(),
        }
    }
}

// =============================================================================
// Samples
// =============================================================================

/// `meter` document: one raw sample.
///
/// `_id` is written but never read back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SampleDocument {
    #[serde(rename = "_id", skip_deserializing)]
    pub id: String,
    pub source: String,
    pub counter_name: String,
    pub counter_type: CounterType,
    #[serde(default)]
    pub counter_unit: String,
    pub counter_volume: f64,
    pub user_id: String,
    pub project_id: String,
    pub resource_id: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub resource_metadata: Metadata,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub message_signature: String,
}

impl SampleDocument {
    pub fn new(id: String, sample: &Sample) -> Self {
        let sample = sample.clone();
        Self {
            id,
            source: sample.source,
            counter_name: sample.counter_name,
            counter_type: sample.counter_type,
            counter_unit: sample.counter_unit,
            counter_volume: sample.counter_volume,
            user_id: sample.user_id,
            project_id: sample.project_id,
            resource_id: sample.resource_id,
            timestamp: sample.timestamp,
            resource_metadata: sample.resource_metadata,
            message_id: sample.message_id,
            message_signature: sample.message_signature,
        }
    }
}

impl From<SampleDocument> for Sample {
    fn from(doc: SampleDocument) -> Self {
        Self {
            source: doc.source,
            counter_name: doc.counter_name,
            counter_type: doc.counter_type,
            counter_unit: doc.counter_unit,
            counter_volume: doc.counter_volume,
            user_id: doc.user_id,
            project_id: doc.project_id,
            resource_id: doc.resource_id,
            timestamp: doc.timestamp,
            resource_metadata: doc.resource_metadata,
            message_id: doc.message_id,
            message_signature: doc.message_signature,
        }
    }
}

// =============================================================================
// Alarms
// =============================================================================

/// `alarm` document. `matching_metadata` keeps its raw stored shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AlarmDocument {
    pub alarm_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub enabled: bool,
    pub user_id: String,
    pub project_id: String,
    pub counter_name: String,
    pub comparison_operator: String,
    pub threshold: f64,
    pub statistic: String,
    pub evaluation_periods: u32,
    pub period: u32,
    #[serde(default)]
    pub state: AlarmState,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub state_timestamp: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub ok_actions: Vec<String>,
    #[serde(default)]
    pub alarm_actions: Vec<String>,
    #[serde(default)]
    pub insufficient_data_actions: Vec<String>,
    #[serde(default)]
    pub repeat_actions: bool,
    #[serde(default)]
    pub matching_metadata: Bson,
}

impl AlarmDocument {
    /// Encode an alarm for storage.
    pub fn encode(alarm: &Alarm) -> Result<Self, StorageError> {
        let alarm = alarm.clone();
        Ok(Self {
            matching_metadata: encode_matching_metadata(&alarm.matching_metadata)?,
            alarm_id: alarm.alarm_id,
            name: alarm.name,
            description: alarm.description,
            enabled: alarm.enabled,
            user_id: alarm.user_id,
            project_id: alarm.project_id,
            counter_name: alarm.counter_name,
            comparison_operator: alarm.comparison_operator,
            threshold: alarm.threshold,
            statistic: alarm.statistic,
            evaluation_periods: alarm.evaluation_periods,
            period: alarm.period,
            state: alarm.state,
            state_timestamp: alarm.state_timestamp,
            timestamp: alarm.timestamp,
            ok_actions: alarm.ok_actions,
            alarm_actions: alarm.alarm_actions,
            insufficient_data_actions: alarm.insufficient_data_actions,
            repeat_actions: alarm.repeat_actions,
        })
    }

    /// Decode a stored alarm, accepting either metadata shape.
    pub fn decode(self) -> Result<Alarm, StorageError> {
        Ok(Alarm {
            matching_metadata: decode_matching_metadata(Some(&self.matching_metadata))?,
            alarm_id: self.alarm_id,
            name: self.name,
            description: self.description,
            enabled: self.enabled,
            user_id: self.user_id,
            project_id: self.project_id,
            counter_name: self.counter_name,
            comparison_operator: self.comparison_operator,
            threshold: self.threshold,
            statistic: self.statistic,
            evaluation_periods: self.evaluation_periods,
            period: self.period,
            state: self.state,
            state_timestamp: self.state_timestamp,
            timestamp: self.timestamp,
            ok_actions: self.ok_actions,
            alarm_actions: self.alarm_actions,
            insufficient_data_actions: self.insufficient_data_actions,
            repeat_actions: self.repeat_actions,
        })
    }
}
