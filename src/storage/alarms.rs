//! Alarm definitions and the unsupported event/history surfaces.

use bson::{Document, doc};

use crate::storage::StorageError;
use crate::storage::connection::Connection;
use crate::storage::db::FindOptions;
use crate::storage::query::{AlarmFilter, Pagination};
use crate::storage::reader::{Records, decode, reject_pagination};
use crate::storage::records::{ALARM, AlarmDocument};
use crate::storage::types::{Alarm, AlarmChange, Event, EventFilter};

fn alarm_query(filter: &AlarmFilter) -> Document {
    let mut query = Document::new();
    if let Some(name) = &filter.name {
        query.insert("name", name.as_str());
    }
    if let Some(user) = &filter.user {
        query.insert("user_id", user.as_str());
    }
    if let Some(project) = &filter.project {
        query.insert("project_id", project.as_str());
    }
    if let Some(enabled) = filter.enabled {
        query.insert("enabled", enabled);
    }
    if let Some(alarm_id) = &filter.alarm_id {
        query.insert("alarm_id", alarm_id.as_str());
    }
    query
}

impl Connection {
    /// Alarms matching `filter`. Stored metadata in either shape decodes to a
    /// flat map.
    pub fn get_alarms(
        &self,
        filter: &AlarmFilter,
        pagination: Option<&Pagination>,
    ) -> Result<Records<Alarm>, StorageError> {
        reject_pagination(pagination)?;

        let query = alarm_query(filter);
        tracing::debug!(query = %query, "Listing alarms");
        let cursor = self
            .db()
            .collection(ALARM)
            .find(query, FindOptions::default())?;
        Ok(Box::new(cursor.map(|doc| {
            decode::<AlarmDocument>(doc).and_then(AlarmDocument::decode)
        })))
    }

    /// Store a new alarm and return it as stored.
    pub fn create_alarm(&self, alarm: &Alarm) -> Result<Alarm, StorageError> {
        self.upsert_alarm(alarm)
    }

    /// Replace an alarm by `alarm_id` (inserting it when absent) and return it
    /// as stored.
    pub fn update_alarm(&self, alarm: &Alarm) -> Result<Alarm, StorageError> {
        self.upsert_alarm(alarm)
    }

    fn upsert_alarm(&self, alarm: &Alarm) -> Result<Alarm, StorageError> {
        let alarms = self.db().collection(ALARM);
        let stored = bson::to_document(&AlarmDocument::encode(alarm)?)?;

        alarms.upsert_one(
            doc! { "alarm_id": alarm.alarm_id.as_str() },
            doc! { "$set": stored },
        )?;
        tracing::debug!(alarm_id = %alarm.alarm_id, "Stored alarm");

        let doc = alarms
            .find_one(doc! { "alarm_id": alarm.alarm_id.as_str() })?
            .ok_or_else(|| {
                StorageError::Internal(format!("alarm '{}' missing after write", alarm.alarm_id))
            })?;
        bson::from_document::<AlarmDocument>(doc)?.decode()
    }

    /// Delete an alarm. Deleting an unknown id is not an error.
    pub fn delete_alarm(&self, alarm_id: &str) -> Result<(), StorageError> {
        let removed = self
            .db()
            .collection(ALARM)
            .delete_many(doc! { "alarm_id": alarm_id })?;
        tracing::debug!(alarm_id, removed, "Deleted alarm");
        Ok(())
    }

    // =========================================================================
    // Unsupported
    // =========================================================================

    /// Alarm change history. Not supported by this backend.
    pub fn get_alarm_changes(
        &self,
        _alarm_id: &str,
        _on_behalf_of: Option<&str>,
    ) -> Result<Records<AlarmChange>, StorageError> {
        Err(StorageError::NotImplemented("Alarm history"))
    }

    /// Record an alarm change. Not supported by this backend.
    pub fn record_alarm_change(&self, _change: &AlarmChange) -> Result<(), StorageError> {
        Err(StorageError::NotImplemented("Alarm history"))
    }

    /// Record events. Not supported by this backend.
    pub fn record_events(&self, _events: &[Event]) -> Result<(), StorageError> {
        Err(StorageError::NotImplemented("Events"))
    }

    /// Query events. Not supported by this backend.
    pub fn get_events(&self, _filter: &EventFilter) -> Result<Records<Event>, StorageError> {
        Err(StorageError::NotImplemented("Events"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::connection::MINIMUM_VERSION;
    use crate::storage::db::{ConnectionUrl, DocumentStore, MemoryDriver, Namespace};
    use crate::storage::pool::ConnectionPool;
    use crate::storage::types::{AlarmState, Metadata};
    use chrono::{TimeZone, Utc};

    fn open(driver: &MemoryDriver) -> Connection {
        let pool = ConnectionPool::new();
        let url = ConnectionUrl::parse("memory://local/ceilometer").unwrap();
        Connection::open_with(&pool, &url, driver, &MINIMUM_VERSION).unwrap()
    }

    fn alarm(id: &str) -> Alarm {
        let mut matching = Metadata::new();
        matching.insert("host".into(), "h1".into());
        let ts = Utc.with_ymd_and_hms(2013, 8, 1, 0, 0, 0).unwrap();
        Alarm {
            alarm_id: id.into(),
            name: format!("{id}-name"),
            description: String::new(),
            enabled: true,
            user_id: "u1".into(),
            project_id: "p1".into(),
            counter_name: "cpu".into(),
            comparison_operator: "gt".into(),
            threshold: 80.0,
            statistic: "avg".into(),
            evaluation_periods: 1,
            period: 60,
            state: AlarmState::InsufficientData,
            state_timestamp: ts,
            timestamp: ts,
            ok_actions: vec![],
            alarm_actions: vec!["http://notify".into()],
            insufficient_data_actions: vec![],
            repeat_actions: false,
            matching_metadata: matching,
        }
    }

    fn list(conn: &Connection, filter: &AlarmFilter) -> Vec<Alarm> {
        conn.get_alarms(filter, None)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_create_update_delete() {
        let driver = MemoryDriver::default();
        let conn = open(&driver);

        let created = conn.create_alarm(&alarm("a1")).unwrap();
        assert_eq!(created, alarm("a1"));

        let stored = driver
            .store()
            .find(
                &Namespace::new("ceilometer", ALARM),
                doc! { "alarm_id": "a1" },
                Default::default(),
            )
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(
            stored.get_array("matching_metadata").unwrap(),
            &vec![bson::Bson::Document(doc! { "key": "host", "value": "h1" })]
        );

        let mut changed = alarm("a1");
        changed.state = AlarmState::Alarm;
        changed.threshold = 90.0;
        let updated = conn.update_alarm(&changed).unwrap();
        assert_eq!(updated.state, AlarmState::Alarm);
        assert_eq!(list(&conn, &AlarmFilter::default()).len(), 1);

        conn.delete_alarm("a1").unwrap();
        assert!(list(&conn, &AlarmFilter::default()).is_empty());
        // Unknown ids are fine.
        conn.delete_alarm("a1").unwrap();
    }

    #[test]
    fn test_get_alarms_defaults_to_enabled() {
        let driver = MemoryDriver::default();
        let conn = open(&driver);
        conn.create_alarm(&alarm("a1")).unwrap();
        let mut disabled = alarm("a2");
        disabled.enabled = false;
        conn.create_alarm(&disabled).unwrap();

        let enabled = list(&conn, &AlarmFilter::default());
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].alarm_id, "a1");

        let all = AlarmFilter {
            enabled: None,
            ..Default::default()
        };
        assert_eq!(list(&conn, &all).len(), 2);

        let by_name = AlarmFilter {
            name: Some("a2-name".into()),
            enabled: None,
            ..Default::default()
        };
        assert_eq!(list(&conn, &by_name)[0].alarm_id, "a2");
    }

    #[test]
    fn test_get_alarms_reads_flat_metadata() {
        let driver = MemoryDriver::default();
        let conn = open(&driver);
        conn.create_alarm(&alarm("a1")).unwrap();

        driver
            .store()
            .update_one(
                &Namespace::new("ceilometer", ALARM),
                doc! { "alarm_id": "a1" },
                doc! { "$set": { "matching_metadata": { "host": "h1" } } },
                false,
            )
            .unwrap();

        let alarms = list(&conn, &AlarmFilter::default());
        assert_eq!(alarms[0].matching_metadata, alarm("a1").matching_metadata);
    }

    #[test]
    fn test_history_and_events_unsupported() {
        let driver = MemoryDriver::default();
        let conn = open(&driver);

        assert!(conn.get_alarm_changes("a1", None).err().unwrap().is_not_implemented());
        let change = AlarmChange {
            event_id: "e1".into(),
            alarm_id: "a1".into(),
            change_type: "creation".into(),
            detail: "{}".into(),
            user_id: "u1".into(),
            project_id: "p1".into(),
            on_behalf_of: "p1".into(),
            timestamp: Utc::now(),
        };
        assert!(conn.record_alarm_change(&change).unwrap_err().is_not_implemented());
        assert!(conn.record_events(&[]).unwrap_err().is_not_implemented());
        assert!(
            conn.get_events(&EventFilter::default())
                .err()
                .unwrap()
                .is_not_implemented()
        );
    }
}
