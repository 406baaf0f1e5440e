//! Query building.
//!
//! Translates the optional-field filter types callers use into backend query
//! documents:
//! - [`make_timestamp_range`]: `(start, end, ops)` to a `$gte/$gt/$lt/$lte` fragment
//! - [`make_query_from_filter`]: [`SampleFilter`] to a meter-collection query
//! - [`make_resource_query`]: [`ResourceFilter`] to a resource-scoped query

use bson::{Bson, Document};
use chrono::{DateTime, Utc};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::storage::StorageError;
use crate::storage::types::Metadata;

/// Prefix callers use for metadata keys in a metaquery.
const METAQUERY_PREFIX: &str = "metadata.";

// =============================================================================
// Query Types
// =============================================================================

/// Lower-bound comparison for a time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StartOp {
    /// Exclusive (`>`).
    Gt,
    /// Inclusive (`>=`).
    #[default]
    Ge,
}

/// Upper-bound comparison for a time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum EndOp {
    /// Exclusive (`<`).
    #[default]
    Lt,
    /// Inclusive (`<=`).
    Le,
}

/// Filter for sample and statistics queries.
#[derive(Debug, Clone, Default)]
pub struct SampleFilter {
    pub user: Option<String>,
    pub project: Option<String>,
    pub meter: Option<String>,
    pub resource: Option<String>,
    pub source: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub start_timestamp_op: Option<StartOp>,
    pub end: Option<DateTime<Utc>>,
    pub end_timestamp_op: Option<EndOp>,
    /// Metadata equality constraints, keyed `metadata.<field>`.
    pub metaquery: Metadata,
}

impl SampleFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_meter(mut self, meter: impl Into<String>) -> Self {
        self.meter = Some(meter.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Lower time bound; `op` defaults to inclusive.
    pub fn with_start(mut self, start: DateTime<Utc>, op: Option<StartOp>) -> Self {
        self.start = Some(start);
        self.start_timestamp_op = op;
        self
    }

    /// Upper time bound; `op` defaults to exclusive.
    pub fn with_end(mut self, end: DateTime<Utc>, op: Option<EndOp>) -> Self {
        self.end = Some(end);
        self.end_timestamp_op = op;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metaquery.insert(key.into(), value.into());
        self
    }
}

/// Filter for resource listing.
#[derive(Debug, Clone, Default)]
pub struct ResourceFilter {
    pub user: Option<String>,
    pub project: Option<String>,
    pub source: Option<String>,
    pub resource: Option<String>,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub start_timestamp_op: Option<StartOp>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub end_timestamp_op: Option<EndOp>,
    pub metaquery: Metadata,
}

impl ResourceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_start(mut self, start: DateTime<Utc>, op: Option<StartOp>) -> Self {
        self.start_timestamp = Some(start);
        self.start_timestamp_op = op;
        self
    }

    pub fn with_end(mut self, end: DateTime<Utc>, op: Option<EndOp>) -> Self {
        self.end_timestamp = Some(end);
        self.end_timestamp_op = op;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metaquery.insert(key.into(), value.into());
        self
    }

    /// Whether either time bound is set.
    pub fn has_time_bounds(&self) -> bool {
        self.start_timestamp.is_some() || self.end_timestamp.is_some()
    }
}

/// Filter for meter listing.
#[derive(Debug, Clone, Default)]
pub struct MeterFilter {
    pub user: Option<String>,
    pub project: Option<String>,
    pub resource: Option<String>,
    pub source: Option<String>,
    pub metaquery: Metadata,
}

impl From<&MeterFilter> for ResourceFilter {
    fn from(filter: &MeterFilter) -> Self {
        Self {
            user: filter.user.clone(),
            project: filter.project.clone(),
            source: filter.source.clone(),
            resource: filter.resource.clone(),
            metaquery: filter.metaquery.clone(),
            ..Self::default()
        }
    }
}

/// Filter for alarm listing.
///
/// `enabled` defaults to `Some(true)`: only enabled alarms are listed unless
/// the caller clears it.
#[derive(Debug, Clone)]
pub struct AlarmFilter {
    pub name: Option<String>,
    pub user: Option<String>,
    pub project: Option<String>,
    pub enabled: Option<bool>,
    pub alarm_id: Option<String>,
}

impl Default for AlarmFilter {
    fn default() -> Self {
        Self {
            name: None,
            user: None,
            project: None,
            enabled: Some(true),
            alarm_id: None,
        }
    }
}

/// Paging request. Accepted for interface compatibility only.
#[derive(Debug, Clone, Default)]
pub struct Pagination {
    pub limit: Option<u32>,
    pub marker: Option<String>,
    pub sort_keys: Vec<String>,
}

// =============================================================================
// Translation
// =============================================================================

/// Collection a resource-scoped query runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTarget {
    /// Raw samples (`meter` collection).
    Samples,
    /// Current resource documents (`resource` collection).
    Resources,
}

impl QueryTarget {
    fn resource_id_field(self) -> &'static str {
        match self {
            Self::Samples => "resource_id",
            Self::Resources => "_id",
        }
    }

    fn metadata_field(self) -> &'static str {
        match self {
            Self::Samples => "resource_metadata",
            Self::Resources => "metadata",
        }
    }
}

/// Build a range fragment for two optional bounds.
///
/// The start bound is inclusive unless `start_op` is [`StartOp::Gt`]; the
/// end bound is exclusive unless `end_op` is [`EndOp::Le`]. Returns an empty
/// document when both bounds are absent.
pub fn make_timestamp_range(
    start: Option<Bson>,
    end: Option<Bson>,
    start_op: Option<StartOp>,
    end_op: Option<EndOp>,
) -> Document {
    let mut range = Document::new();

    if let Some(start) = start {
        let op = match start_op.unwrap_or_default() {
            StartOp::Gt => "$gt",
            StartOp::Ge => "$gte",
        };
        range.insert(op, start);
    }

    if let Some(end) = end {
        let op = match end_op.unwrap_or_default() {
            EndOp::Le => "$lte",
            EndOp::Lt => "$lt",
        };
        range.insert(op, end);
    }

    range
}

fn datetime_bound(value: Option<DateTime<Utc>>) -> Option<Bson> {
    value.map(|dt| Bson::DateTime(bson::DateTime::from_chrono(dt)))
}

fn timestamp_range(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    start_op: Option<StartOp>,
    end_op: Option<EndOp>,
) -> Document {
    make_timestamp_range(datetime_bound(start), datetime_bound(end), start_op, end_op)
}

/// Expand a metaquery into per-key equality constraints under `field`.
fn add_metaquery(query: &mut Document, metaquery: &Metadata, field: &str) -> Result<(), StorageError> {
    for (key, value) in metaquery {
        let key = key.strip_prefix(METAQUERY_PREFIX).unwrap_or(key);
        query.insert(format!("{field}.{key}"), bson::to_bson(value)?);
    }
    Ok(())
}

/// Build a meter-collection query from a sample filter.
///
/// # Errors
/// Returns `StorageError::MissingField` when `require_meter` is set and the
/// filter names no meter.
pub fn make_query_from_filter(
    filter: &SampleFilter,
    require_meter: bool,
) -> Result<Document, StorageError> {
    let mut query = Document::new();

    if let Some(user) = &filter.user {
        query.insert("user_id", user.as_str());
    }
    if let Some(project) = &filter.project {
        query.insert("project_id", project.as_str());
    }

    match &filter.meter {
        Some(meter) => {
            query.insert("counter_name", meter.as_str());
        }
        None if require_meter => return Err(StorageError::MissingField("meter")),
        None => {}
    }

    let range = timestamp_range(
        filter.start,
        filter.end,
        filter.start_timestamp_op,
        filter.end_timestamp_op,
    );
    if !range.is_empty() {
        query.insert("timestamp", range);
    }

    if let Some(resource) = &filter.resource {
        query.insert("resource_id", resource.as_str());
    }
    if let Some(source) = &filter.source {
        query.insert("source", source.as_str());
    }

    add_metaquery(&mut query, &filter.metaquery, QueryTarget::Samples.metadata_field())?;

    tracing::debug!(query = %query, "Built sample query");
    Ok(query)
}

/// Build a resource-scoped query for the given collection.
///
/// Time bounds only apply to [`QueryTarget::Samples`]; resource documents
/// carry no timestamp.
pub fn make_resource_query(
    filter: &ResourceFilter,
    target: QueryTarget,
) -> Result<Document, StorageError> {
    let mut query = Document::new();

    if let Some(user) = &filter.user {
        query.insert("user_id", user.as_str());
    }
    if let Some(project) = &filter.project {
        query.insert("project_id", project.as_str());
    }
    if let Some(source) = &filter.source {
        query.insert("source", source.as_str());
    }
    if let Some(resource) = &filter.resource {
        query.insert(target.resource_id_field(), resource.as_str());
    }

    add_metaquery(&mut query, &filter.metaquery, target.metadata_field())?;

    if target == QueryTarget::Samples {
        let range = timestamp_range(
            filter.start_timestamp,
            filter.end_timestamp,
            filter.start_timestamp_op,
            filter.end_timestamp_op,
        );
        if !range.is_empty() {
            query.insert("timestamp", range);
        }
    }

    tracing::debug!(query = %query, ?target, "Built resource query");
    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2013, 8, 1, hour, 0, 0).unwrap()
    }

    fn bdt(hour: u32) -> Bson {
        Bson::DateTime(bson::DateTime::from_chrono(ts(hour)))
    }

    // =========================================================================
    // Range builder tests
    // =========================================================================

    #[test]
    fn test_range_defaults() {
        let range = make_timestamp_range(Some(Bson::Int32(1)), Some(Bson::Int32(2)), None, None);
        assert_eq!(range, doc! { "$gte": 1, "$lt": 2 });
    }

    #[test]
    fn test_range_overrides() {
        let range = make_timestamp_range(
            Some(Bson::Int32(1)),
            Some(Bson::Int32(2)),
            Some(StartOp::Gt),
            Some(EndOp::Le),
        );
        assert_eq!(range, doc! { "$gt": 1, "$lte": 2 });
    }

    #[test]
    fn test_range_single_bounds() {
        assert_eq!(
            make_timestamp_range(Some(Bson::Int32(1)), None, Some(StartOp::Gt), None),
            doc! { "$gt": 1 }
        );
        assert_eq!(
            make_timestamp_range(None, Some(Bson::Int32(2)), None, Some(EndOp::Le)),
            doc! { "$lte": 2 }
        );
        // Operators without bounds contribute nothing.
        assert!(make_timestamp_range(None, None, Some(StartOp::Gt), Some(EndOp::Le)).is_empty());
    }

    #[test]
    fn test_op_from_str() {
        assert_eq!(StartOp::from_str("gt").unwrap(), StartOp::Gt);
        assert_eq!(StartOp::from_str("GE").unwrap(), StartOp::Ge);
        assert_eq!(EndOp::from_str("le").unwrap(), EndOp::Le);
        assert!(EndOp::from_str("ge").is_err());
    }

    // =========================================================================
    // Sample filter tests
    // =========================================================================

    #[test]
    fn test_query_requires_meter() {
        let filter = SampleFilter::new().with_user("u1");
        let err = make_query_from_filter(&filter, true).unwrap_err();
        assert!(err.is_usage_error());

        let query = make_query_from_filter(&filter, false).unwrap();
        assert_eq!(query, doc! { "user_id": "u1" });
    }

    #[test]
    fn test_query_all_fields() {
        let filter = SampleFilter::new()
            .with_user("u1")
            .with_project("p1")
            .with_meter("cpu")
            .with_resource("r1")
            .with_source("src1")
            .with_start(ts(1), None)
            .with_end(ts(2), Some(EndOp::Le))
            .with_metadata("metadata.host", "h1");

        let query = make_query_from_filter(&filter, true).unwrap();
        assert_eq!(
            query,
            doc! {
                "user_id": "u1",
                "project_id": "p1",
                "counter_name": "cpu",
                "timestamp": { "$gte": bdt(1), "$lte": bdt(2) },
                "resource_id": "r1",
                "source": "src1",
                "resource_metadata.host": "h1",
            }
        );
    }

    #[test]
    fn test_query_omits_empty_range() {
        let filter = SampleFilter::new().with_meter("cpu");
        let query = make_query_from_filter(&filter, true).unwrap();
        assert!(!query.contains_key("timestamp"));
    }

    #[test]
    fn test_metaquery_accepts_bare_keys() {
        let filter = SampleFilter::new()
            .with_metadata("zone", "a")
            .with_metadata("metadata.size", 2);
        let query = make_query_from_filter(&filter, false).unwrap();
        assert_eq!(query.get_str("resource_metadata.zone").unwrap(), "a");
        assert_eq!(query.get_i64("resource_metadata.size").unwrap(), 2);
    }

    // =========================================================================
    // Resource filter tests
    // =========================================================================

    #[test]
    fn test_resource_query_targets() {
        let filter = ResourceFilter::new()
            .with_user("u1")
            .with_resource("r1")
            .with_start(ts(1), Some(StartOp::Gt))
            .with_metadata("metadata.host", "h1");
        assert!(filter.has_time_bounds());

        let samples = make_resource_query(&filter, QueryTarget::Samples).unwrap();
        assert_eq!(
            samples,
            doc! {
                "user_id": "u1",
                "resource_id": "r1",
                "resource_metadata.host": "h1",
                "timestamp": { "$gt": bdt(1) },
            }
        );

        let resources = make_resource_query(&filter, QueryTarget::Resources).unwrap();
        assert_eq!(
            resources,
            doc! { "user_id": "u1", "_id": "r1", "metadata.host": "h1" }
        );
    }

    #[test]
    fn test_meter_filter_conversion() {
        let filter = MeterFilter {
            project: Some("p1".into()),
            source: Some("s".into()),
            ..MeterFilter::default()
        };
        let resource_filter = ResourceFilter::from(&filter);
        assert!(!resource_filter.has_time_bounds());
        let query = make_resource_query(&resource_filter, QueryTarget::Resources).unwrap();
        assert_eq!(query, doc! { "project_id": "p1", "source": "s" });
    }

    #[test]
    fn test_alarm_filter_default_enabled() {
        assert_eq!(AlarmFilter::default().enabled, Some(true));
    }
}
