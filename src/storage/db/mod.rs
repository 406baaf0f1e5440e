//! Document store abstraction layer for multi-backend support.
//!
//! The adapter talks to its backend only through [`DocumentStore`], a minimal
//! blocking CRUD + query surface modelled on MongoDB-compatible servers (DB2
//! NoSQL, MongoDB). A [`Driver`] turns a [`ConnectionUrl`] into a live store.
//!
//! Currently ships [`MemoryStore`], an in-process backend used by tests and
//! embedded deployments.
//!
//! # Example
//!
//! ```ignore
//! let url = ConnectionUrl::parse("memory://localhost/ceilometer")?;
//! let store = MemoryDriver::default().connect(&url)?;
//! let db = Database::new(store.as_ref(), url.database());
//! db.collection("meter").insert_one(doc! { "counter_name": "cpu" })?;
//! ```

mod matcher;
mod memory;

pub use memory::{MEMORY_SCHEME, MemoryDriver, MemoryStore};

use bson::{Bson, Document};

use crate::storage::StorageError;

/// Single-pass cursor over query results.
pub type Cursor = Box<dyn Iterator<Item = Result<Document, StorageError>> + Send>;

// =============================================================================
// Types
// =============================================================================

/// Fully qualified collection name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Options for [`DocumentStore::find`].
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Fields to include (`{field: 1}`); `_id` is included unless set to 0.
    pub projection: Option<Document>,
    /// Sort specification (`{field: 1 | -1}`), applied in key order.
    pub sort: Option<Document>,
    /// Maximum number of documents to return.
    pub limit: Option<i64>,
}

impl FindOptions {
    pub fn projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A named secondary index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexModel {
    pub name: String,
    /// Key specification (`{field: 1 | -1}`), in index order.
    pub keys: Document,
}

impl IndexModel {
    pub fn new(name: impl Into<String>, keys: Document) -> Self {
        Self {
            name: name.into(),
            keys,
        }
    }
}

/// Name of the implicit primary-key index.
pub const PRIMARY_INDEX_NAME: &str = "_id_";

/// Server build information.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerInfo {
    /// Human-readable version string.
    pub version: String,
    /// Numeric version components. DB2 does not report this.
    pub version_array: Option<Vec<i32>>,
}

// =============================================================================
// Connection URL
// =============================================================================

/// Parsed backend connection URL.
///
/// The legacy `db2:` scheme is rewritten to `mongodb:` since DB2 speaks the
/// MongoDB wire protocol. The first path segment names the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUrl {
    url: url::Url,
    database: String,
}

impl ConnectionUrl {
    /// Parse and normalize a connection URL.
    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        let raw = raw.trim();
        let normalized = match raw.strip_prefix("db2:") {
            Some(rest) => format!("mongodb:{rest}"),
            None => raw.to_string(),
        };

        let url = url::Url::parse(&normalized)
            .map_err(|e| StorageError::InvalidUrl(format!("'{raw}': {e}")))?;

        let database = url
            .path_segments()
            .and_then(|mut segments| segments.next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .ok_or_else(|| StorageError::InvalidUrl(format!("'{raw}': missing database name")))?;

        Ok(Self { url, database })
    }

    /// Normalized URL string; used as the connection pool key.
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn database(&self) -> &str {
        &self.database
    }
}

impl std::fmt::Display for ConnectionUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Keep credentials out of logs.
        let mut redacted = self.url.clone();
        if redacted.password().is_some() {
            let _ = redacted.set_password(Some("***"));
        }
        f.write_str(redacted.as_str())
    }
}

// =============================================================================
// Traits
// =============================================================================

/// Blocking document store client.
///
/// Single-document writes are atomic; nothing else is.
pub trait DocumentStore: Send + Sync {
    /// Server build information.
    fn server_info(&self) -> Result<ServerInfo, StorageError>;

    /// Insert one document. Fails if its `_id` already exists.
    fn insert_one(&self, ns: &Namespace, doc: Document) -> Result<(), StorageError>;

    /// Apply `update` (`$set` / `$addToSet`) to the first match of `filter`,
    /// inserting a new document built from the filter's equality fields when
    /// nothing matches and `upsert` is set.
    fn update_one(
        &self,
        ns: &Namespace,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<(), StorageError>;

    /// Delete every document matching `filter`, returning the count removed.
    fn delete_many(&self, ns: &Namespace, filter: Document) -> Result<u64, StorageError>;

    /// Query documents.
    fn find(
        &self,
        ns: &Namespace,
        filter: Document,
        options: FindOptions,
    ) -> Result<Cursor, StorageError>;

    /// Distinct values of `field` among documents matching `filter`.
    fn distinct(
        &self,
        ns: &Namespace,
        field: &str,
        filter: Document,
    ) -> Result<Vec<Bson>, StorageError>;

    /// Indexes defined on the collection, including the primary index when
    /// the collection exists.
    fn list_indexes(&self, ns: &Namespace) -> Result<Vec<IndexModel>, StorageError>;

    /// Create an index. Creating an identical existing index is a no-op.
    fn create_index(&self, ns: &Namespace, index: IndexModel) -> Result<(), StorageError>;

    fn drop_collection(&self, ns: &Namespace) -> Result<(), StorageError>;

    /// Drop a whole database. Backends without support may no-op.
    fn drop_database(&self, database: &str) -> Result<(), StorageError>;
}

/// Establishes document store clients.
pub trait Driver: Send + Sync {
    /// Open a new client for `url`, performing any handshake.
    fn connect(&self, url: &ConnectionUrl) -> Result<Box<dyn DocumentStore>, StorageError>;
}

// =============================================================================
// Handles
// =============================================================================

/// A database on a client.
#[derive(Clone, Copy)]
pub struct Database<'a> {
    store: &'a dyn DocumentStore,
    name: &'a str,
}

impl<'a> Database<'a> {
    pub fn new(store: &'a dyn DocumentStore, name: &'a str) -> Self {
        Self { store, name }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn collection(&self, name: &str) -> Collection<'a> {
        Collection {
            store: self.store,
            ns: Namespace::new(self.name, name),
        }
    }

    pub fn drop(&self) -> Result<(), StorageError> {
        self.store.drop_database(self.name)
    }
}

/// A collection bound to its client.
pub struct Collection<'a> {
    store: &'a dyn DocumentStore,
    ns: Namespace,
}

impl Collection<'_> {
    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }

    pub fn insert_one(&self, doc: Document) -> Result<(), StorageError> {
        self.store.insert_one(&self.ns, doc)
    }

    pub fn upsert_one(&self, filter: Document, update: Document) -> Result<(), StorageError> {
        self.store.update_one(&self.ns, filter, update, true)
    }

    pub fn delete_many(&self, filter: Document) -> Result<u64, StorageError> {
        self.store.delete_many(&self.ns, filter)
    }

    pub fn find(&self, filter: Document, options: FindOptions) -> Result<Cursor, StorageError> {
        self.store.find(&self.ns, filter, options)
    }

    pub fn find_one(&self, filter: Document) -> Result<Option<Document>, StorageError> {
        self.find(filter, FindOptions::default().limit(1))?
            .next()
            .transpose()
    }

    pub fn distinct(&self, field: &str, filter: Document) -> Result<Vec<Bson>, StorageError> {
        self.store.distinct(&self.ns, field, filter)
    }

    pub fn list_indexes(&self) -> Result<Vec<IndexModel>, StorageError> {
        self.store.list_indexes(&self.ns)
    }

    pub fn create_index(&self, index: IndexModel) -> Result<(), StorageError> {
        self.store.create_index(&self.ns, index)
    }

    pub fn drop(&self) -> Result<(), StorageError> {
        self.store.drop_collection(&self.ns)
    }
}
