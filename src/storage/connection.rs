//! Storage connection and write path.
//!
//! A [`Connection`] is the adapter surface: it is opened against one backend
//! URL, checks the server version, ensures the schema, and then serves the
//! write path (here), the read path ([`reader`](super::reader)) and the alarm
//! store ([`alarms`](super::alarms)).

use std::sync::Arc;
use std::time::Duration;

use bson::doc;
use bson::oid::ObjectId;

use crate::config::{ConfigError, DatabaseConfig};
use crate::storage::StorageError;
use crate::storage::db::{ConnectionUrl, Database, Driver, ServerInfo};
use crate::storage::pool::{ConnectionPool, PooledClient};
use crate::storage::records::{METER, MeterDescriptor, PROJECT, RESOURCE, SampleDocument, USER};
use crate::storage::schema;
use crate::storage::types::MeterMessage;

/// Oldest server version with the query features this adapter needs.
pub const MINIMUM_VERSION: [i32; 2] = [2, 2];

/// Check a server's reported version against `minimum`.
///
/// Servers that do not report a version array (DB2) are accepted.
pub fn check_version(info: &ServerInfo, minimum: &[i32]) -> Result<(), StorageError> {
    match &info.version_array {
        Some(version) if version.as_slice() < minimum => Err(StorageError::BadVersion {
            found: info.version.clone(),
            required: minimum
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("."),
        }),
        _ => Ok(()),
    }
}

/// Storage connection for metering data and alarms.
pub struct Connection {
    client: Arc<PooledClient>,
    database: String,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.client.address())
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Open a connection through the process-wide pool.
    ///
    /// Connects (reusing a live client for the same URL), verifies the server
    /// version, and ensures the schema.
    pub fn open(url: &str, driver: &dyn Driver) -> Result<Self, StorageError> {
        let url = ConnectionUrl::parse(url)?;
        Self::open_with(ConnectionPool::global(), &url, driver, &MINIMUM_VERSION)
    }

    /// Open a connection from configuration through the process-wide pool.
    ///
    /// # Errors
    /// Returns `StorageError::Config` when the configuration does not validate.
    pub fn from_config(config: &DatabaseConfig, driver: &dyn Driver) -> Result<Self, StorageError> {
        Self::from_config_with(ConnectionPool::global(), config, driver)
    }

    /// Open a connection from configuration through a specific pool.
    pub fn from_config_with(
        pool: &ConnectionPool,
        config: &DatabaseConfig,
        driver: &dyn Driver,
    ) -> Result<Self, StorageError> {
        config.validate()?;
        let url = ConnectionUrl::parse(&config.connection)?;
        let minimum = config
            .minimum_version_array()
            .map_err(ConfigError::ValidationError)?;
        Self::open_with(pool, &url, driver, &minimum)
    }

    /// Open a connection through a specific pool.
    pub fn open_with(
        pool: &ConnectionPool,
        url: &ConnectionUrl,
        driver: &dyn Driver,
        minimum_version: &[i32],
    ) -> Result<Self, StorageError> {
        let client = pool.connect(url, driver)?;
        check_version(&client.server_info()?, minimum_version)?;

        let connection = Self {
            client,
            database: url.database().to_string(),
        };
        connection.upgrade()?;
        Ok(connection)
    }

    /// The underlying pooled client.
    pub fn client(&self) -> &Arc<PooledClient> {
        &self.client
    }

    pub(crate) fn db(&self) -> Database<'_> {
        Database::new(&**self.client, &self.database)
    }

    /// Ensure indexes exist. Returns `true` when anything was created.
    pub fn upgrade(&self) -> Result<bool, StorageError> {
        schema::upgrade(&self.db())
    }

    /// Remove all metering data.
    ///
    /// Drops the user, project, resource and meter collections, then asks the
    /// backend to drop the database (a no-op on DB2).
    pub fn clear(&self) -> Result<(), StorageError> {
        let db = self.db();
        for collection in [USER, PROJECT, RESOURCE, METER] {
            db.collection(collection).drop()?;
        }
        db.drop()?;
        tracing::info!(database = %self.database, "Cleared metering data");
        Ok(())
    }

    // =========================================================================
    // Write path
    // =========================================================================

    /// Record one sample.
    ///
    /// Upserts the user, project and resource, then inserts the raw sample.
    /// The four writes are independent; a failure leaves earlier ones applied.
    pub fn record_metering_data(&self, data: &MeterMessage) -> Result<(), StorageError> {
        let sample = &data.sample;
        let db = self.db();

        db.collection(USER).upsert_one(
            doc! { "_id": sample.user_id.as_str() },
            doc! { "$addToSet": { "source": sample.source.as_str() } },
        )?;
        db.collection(PROJECT).upsert_one(
            doc! { "_id": sample.project_id.as_str() },
            doc! { "$addToSet": { "source": sample.source.as_str() } },
        )?;
        tracing::debug!(
            user = %sample.user_id,
            project = %sample.project_id,
            source = %sample.source,
            "Recorded sample owners"
        );

        let metadata = bson::to_bson(&sample.resource_metadata)?;
        let descriptor = bson::to_bson(&MeterDescriptor::from_sample(sample))?;
        db.collection(RESOURCE).upsert_one(
            doc! { "_id": sample.resource_id.as_str() },
            doc! {
                "$set": {
                    "project_id": sample.project_id.as_str(),
                    "user_id": sample.user_id.as_str(),
                    "metadata": metadata,
                    "source": sample.source.as_str(),
                },
                "$addToSet": { "meter": descriptor },
            },
        )?;

        let id = data.id.clone().unwrap_or_else(|| ObjectId::new().to_hex());
        let record = SampleDocument::new(id, sample);
        db.collection(METER).insert_one(bson::to_document(&record)?)?;

        tracing::debug!(
            resource = %sample.resource_id,
            meter = %sample.counter_name,
            "Recorded sample"
        );
        Ok(())
    }

    /// Delete samples older than `ttl`. Not supported by this backend.
    pub fn clear_expired_metering_data(&self, _ttl: Duration) -> Result<(), StorageError> {
        Err(StorageError::NotImplemented("TTL"))
    }
}
