//! In-process document store backend.
//!
//! Keeps collections in memory behind a single lock. Every clone of a
//! [`MemoryStore`] shares the same data, the way separate clients of one
//! server do.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bson::oid::ObjectId;
use bson::{Bson, Document};

use super::matcher::{self, lookup, values_equal};
use super::{
    ConnectionUrl, Cursor, DocumentStore, Driver, FindOptions, IndexModel, Namespace,
    PRIMARY_INDEX_NAME, ServerInfo,
};
use crate::storage::StorageError;

/// Version reported by a default in-memory server.
const DEFAULT_VERSION: [i32; 4] = [2, 4, 0, 0];

#[derive(Debug, Default)]
struct CollectionData {
    docs: Vec<Document>,
    indexes: Vec<IndexModel>,
}

struct Inner {
    collections: Mutex<BTreeMap<Namespace, CollectionData>>,
    server: ServerInfo,
    strict_indexing: AtomicBool,
    queries: AtomicU64,
    index_builds: AtomicU64,
}

/// Shared in-memory document store.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("version", &self.inner.server.version)
            .finish_non_exhaustive()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store reporting version 2.4.
    pub fn new() -> Self {
        Self::with_server_info(ServerInfo {
            version: "2.4.0".to_string(),
            version_array: Some(DEFAULT_VERSION.to_vec()),
        })
    }

    /// Create an empty store reporting the given server information.
    pub fn with_server_info(server: ServerInfo) -> Self {
        Self {
            inner: Arc::new(Inner {
                collections: Mutex::new(BTreeMap::new()),
                server,
                strict_indexing: AtomicBool::new(false),
                queries: AtomicU64::new(0),
                index_builds: AtomicU64::new(0),
            }),
        }
    }

    /// Refuse to build indexes on empty collections, like DB2 does.
    pub fn set_strict_indexing(&self, strict: bool) {
        self.inner.strict_indexing.store(strict, Ordering::Relaxed);
    }

    /// Number of `find` and `distinct` calls served.
    pub fn query_count(&self) -> u64 {
        self.inner.queries.load(Ordering::Relaxed)
    }

    /// Number of indexes actually built.
    pub fn index_build_count(&self) -> u64 {
        self.inner.index_builds.load(Ordering::Relaxed)
    }

    /// Number of documents in a collection (0 when it does not exist).
    pub fn document_count(&self, ns: &Namespace) -> Result<usize, StorageError> {
        Ok(self.lock()?.get(ns).map_or(0, |c| c.docs.len()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<Namespace, CollectionData>>, StorageError> {
        self.inner
            .collections
            .lock()
            .map_err(|_| StorageError::Internal("memory store lock poisoned".to_string()))
    }
}

// =============================================================================
// Updates
// =============================================================================

/// Seed document for an upsert: the filter's plain equality fields.
fn upsert_seed(filter: &Document) -> Document {
    filter
        .iter()
        .filter(|(key, value)| {
            !key.contains('.')
                && !matches!(value, Bson::Document(d) if d.keys().any(|k| k.starts_with('$')))
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn apply_update(doc: &mut Document, update: &Document) -> Result<(), StorageError> {
    for (op, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(StorageError::Backend(format!(
                "update operator '{op}' needs a document"
            )));
        };
        match op.as_str() {
            "$set" => {
                for (key, value) in fields {
                    doc.insert(key.clone(), value.clone());
                }
            }
            "$addToSet" => {
                for (key, value) in fields {
                    match doc.get_mut(key) {
                        Some(Bson::Array(items)) => {
                            if !items.iter().any(|item| values_equal(item, value)) {
                                items.push(value.clone());
                            }
                        }
                        Some(other) => {
                            return Err(StorageError::Backend(format!(
                                "cannot $addToSet to non-array field '{key}' ({other})"
                            )));
                        }
                        None => {
                            doc.insert(key.clone(), Bson::Array(vec![value.clone()]));
                        }
                    }
                }
            }
            other => {
                return Err(StorageError::Backend(format!(
                    "unsupported update operator '{other}'"
                )));
            }
        }
    }
    Ok(())
}

fn ensure_id(doc: &mut Document) {
    if !doc.contains_key("_id") {
        doc.insert("_id", ObjectId::new());
    }
}

// =============================================================================
// DocumentStore
// =============================================================================

impl DocumentStore for MemoryStore {
    fn server_info(&self) -> Result<ServerInfo, StorageError> {
        Ok(self.inner.server.clone())
    }

    fn insert_one(&self, ns: &Namespace, mut doc: Document) -> Result<(), StorageError> {
        ensure_id(&mut doc);
        let mut collections = self.lock()?;
        let collection = collections.entry(ns.clone()).or_default();

        if let Some(id) = doc.get("_id") {
            if collection
                .docs
                .iter()
                .any(|d| d.get("_id").is_some_and(|existing| values_equal(existing, id)))
            {
                return Err(StorageError::Backend(format!(
                    "duplicate key on {ns}: _id {id}"
                )));
            }
        }

        collection.docs.push(doc);
        Ok(())
    }

    fn update_one(
        &self,
        ns: &Namespace,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<(), StorageError> {
        let mut collections = self.lock()?;
        let collection = collections.entry(ns.clone()).or_default();

        for doc in collection.docs.iter_mut() {
            if matcher::matches(doc, &filter)? {
                return apply_update(doc, &update);
            }
        }

        if upsert {
            let mut doc = upsert_seed(&filter);
            apply_update(&mut doc, &update)?;
            ensure_id(&mut doc);
            collection.docs.push(doc);
        }
        Ok(())
    }

    fn delete_many(&self, ns: &Namespace, filter: Document) -> Result<u64, StorageError> {
        let mut collections = self.lock()?;
        let Some(collection) = collections.get_mut(ns) else {
            return Ok(0);
        };

        let doomed = collection
            .docs
            .iter()
            .map(|doc| matcher::matches(doc, &filter))
            .collect::<Result<Vec<bool>, _>>()?;

        let mut flags = doomed.iter();
        collection
            .docs
            .retain(|_| !flags.next().copied().unwrap_or(false));

        Ok(doomed.into_iter().filter(|d| *d).count() as u64)
    }

    fn find(
        &self,
        ns: &Namespace,
        filter: Document,
        options: FindOptions,
    ) -> Result<Cursor, StorageError> {
        self.inner.queries.fetch_add(1, Ordering::Relaxed);
        let collections = self.lock()?;

        let mut found = Vec::new();
        if let Some(collection) = collections.get(ns) {
            for doc in &collection.docs {
                if matcher::matches(doc, &filter)? {
                    found.push(doc.clone());
                }
            }
        }
        drop(collections);

        if let Some(sort) = &options.sort {
            found.sort_by(|a, b| matcher::sort_order(a, b, sort));
        }
        if let Some(limit) = options.limit.filter(|l| *l != 0) {
            found.truncate(limit.unsigned_abs() as usize);
        }
        if let Some(projection) = &options.projection {
            found = found
                .into_iter()
                .map(|doc| matcher::project(doc, projection))
                .collect();
        }

        Ok(Box::new(found.into_iter().map(Ok)))
    }

    fn distinct(
        &self,
        ns: &Namespace,
        field: &str,
        filter: Document,
    ) -> Result<Vec<Bson>, StorageError> {
        self.inner.queries.fetch_add(1, Ordering::Relaxed);
        let collections = self.lock()?;
        let Some(collection) = collections.get(ns) else {
            return Ok(Vec::new());
        };

        let mut values: Vec<Bson> = Vec::new();
        let mut remember = |value: &Bson| {
            if !values.iter().any(|v| values_equal(v, value)) {
                values.push(value.clone());
            }
        };

        for doc in &collection.docs {
            if !matcher::matches(doc, &filter)? {
                continue;
            }
            match lookup(doc, field) {
                Some(Bson::Array(items)) => items.iter().for_each(&mut remember),
                Some(value) => remember(value),
                None => {}
            }
        }
        Ok(values)
    }

    fn list_indexes(&self, ns: &Namespace) -> Result<Vec<IndexModel>, StorageError> {
        let collections = self.lock()?;
        let Some(collection) = collections.get(ns) else {
            return Ok(Vec::new());
        };

        let mut indexes = vec![IndexModel::new(
            PRIMARY_INDEX_NAME,
            bson::doc! { "_id": 1 },
        )];
        indexes.extend(collection.indexes.iter().cloned());
        Ok(indexes)
    }

    fn create_index(&self, ns: &Namespace, index: IndexModel) -> Result<(), StorageError> {
        let strict = self.inner.strict_indexing.load(Ordering::Relaxed);
        let mut collections = self.lock()?;

        if strict && collections.get(ns).is_none_or(|c| c.docs.is_empty()) {
            return Err(StorageError::Backend(format!(
                "cannot create index '{}' on empty collection {ns}",
                index.name
            )));
        }

        let collection = collections.entry(ns.clone()).or_default();
        if let Some(existing) = collection.indexes.iter().find(|i| i.name == index.name) {
            if existing.keys == index.keys {
                return Ok(());
            }
            return Err(StorageError::Backend(format!(
                "index '{}' already exists on {ns} with different keys",
                index.name
            )));
        }

        tracing::debug!(namespace = %ns, index = %index.name, "Building index");
        collection.indexes.push(index);
        self.inner.index_builds.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn drop_collection(&self, ns: &Namespace) -> Result<(), StorageError> {
        self.lock()?.remove(ns);
        Ok(())
    }

    fn drop_database(&self, database: &str) -> Result<(), StorageError> {
        self.lock()?.retain(|ns, _| ns.database != database);
        Ok(())
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Driver handing out clients of one shared [`MemoryStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    store: MemoryStore,
    connects: Arc<AtomicU64>,
}

impl MemoryDriver {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            connects: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The backing store shared by every client.
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Number of clients opened so far.
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }
}

/// URL scheme served by [`MemoryDriver`].
pub const MEMORY_SCHEME: &str = "memory";

impl Driver for MemoryDriver {
    /// Open a client on the shared store. Only `memory://` URLs are accepted.
    fn connect(&self, url: &ConnectionUrl) -> Result<Box<dyn DocumentStore>, StorageError> {
        if url.scheme() != MEMORY_SCHEME {
            return Err(StorageError::InvalidUrl(format!(
                "'{url}': in-memory driver only serves {MEMORY_SCHEME}:// URLs"
            )));
        }
        self.connects.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(url = %url, "Opening in-memory client");
        Ok(Box::new(self.store.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn ns(collection: &str) -> Namespace {
        Namespace::new("test", collection)
    }

    fn all(store: &MemoryStore, collection: &str) -> Vec<Document> {
        store
            .find(&ns(collection), doc! {}, FindOptions::default())
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_insert_generates_id_and_rejects_duplicates() {
        let store = MemoryStore::new();
        store.insert_one(&ns("meter"), doc! { "a": 1 }).unwrap();
        let docs = all(&store, "meter");
        assert_eq!(docs.len(), 1);
        assert!(docs[0].get_object_id("_id").is_ok());

        store.insert_one(&ns("meter"), doc! { "_id": "x" }).unwrap();
        let err = store.insert_one(&ns("meter"), doc! { "_id": "x" }).unwrap_err();
        assert!(err.to_string().contains("duplicate key"));
    }

    #[test]
    fn test_upsert_set_and_add_to_set() {
        let store = MemoryStore::new();
        let update = doc! { "$set": { "name": "n" }, "$addToSet": { "source": "s1" } };
        store
            .update_one(&ns("user"), doc! { "_id": "u1" }, update.clone(), true)
            .unwrap();
        store
            .update_one(&ns("user"), doc! { "_id": "u1" }, update, true)
            .unwrap();
        store
            .update_one(
                &ns("user"),
                doc! { "_id": "u1" },
                doc! { "$addToSet": { "source": "s2" } },
                true,
            )
            .unwrap();

        let docs = all(&store, "user");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get_str("_id").unwrap(), "u1");
        assert_eq!(docs[0].get_str("name").unwrap(), "n");
        let sources = docs[0].get_array("source").unwrap();
        assert_eq!(sources, &vec![Bson::from("s1"), Bson::from("s2")]);
    }

    #[test]
    fn test_update_without_upsert_is_noop() {
        let store = MemoryStore::new();
        store
            .update_one(
                &ns("alarm"),
                doc! { "alarm_id": "a" },
                doc! { "$set": { "x": 1 } },
                false,
            )
            .unwrap();
        assert!(all(&store, "alarm").is_empty());
    }

    #[test]
    fn test_unsupported_update_operator() {
        let store = MemoryStore::new();
        let err = store
            .update_one(&ns("x"), doc! {}, doc! { "$inc": { "n": 1 } }, true)
            .unwrap_err();
        assert!(err.to_string().contains("$inc"));
    }

    #[test]
    fn test_find_sort_limit_projection() {
        let store = MemoryStore::new();
        for (id, ts) in [("a", 2), ("b", 3), ("c", 1)] {
            store
                .insert_one(&ns("meter"), doc! { "_id": id, "ts": ts, "other": true })
                .unwrap();
        }
        let docs: Vec<Document> = store
            .find(
                &ns("meter"),
                doc! {},
                FindOptions::default()
                    .sort(doc! { "ts": -1 })
                    .limit(2)
                    .projection(doc! { "ts": 1 }),
            )
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(docs, vec![doc! { "_id": "b", "ts": 3 }, doc! { "_id": "a", "ts": 2 }]);
        assert_eq!(store.query_count(), 1);
    }

    #[test]
    fn test_distinct_and_delete() {
        let store = MemoryStore::new();
        for (id, resource) in [("1", "r1"), ("2", "r2"), ("3", "r1")] {
            store
                .insert_one(&ns("meter"), doc! { "_id": id, "resource_id": resource })
                .unwrap();
        }
        let ids = store.distinct(&ns("meter"), "resource_id", doc! {}).unwrap();
        assert_eq!(ids, vec![Bson::from("r1"), Bson::from("r2")]);

        let removed = store
            .delete_many(&ns("meter"), doc! { "resource_id": "r1" })
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.document_count(&ns("meter")).unwrap(), 1);
        assert_eq!(
            store.delete_many(&ns("missing"), doc! {}).unwrap(),
            0
        );
    }

    #[test]
    fn test_indexes() {
        let store = MemoryStore::new();
        assert!(store.list_indexes(&ns("resource")).unwrap().is_empty());

        let index = IndexModel::new("resource_idx", doc! { "user_id": 1 });
        store.create_index(&ns("resource"), index.clone()).unwrap();
        store.create_index(&ns("resource"), index).unwrap();
        assert_eq!(store.index_build_count(), 1);

        let names: Vec<String> = store
            .list_indexes(&ns("resource"))
            .unwrap()
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["_id_".to_string(), "resource_idx".to_string()]);

        let conflicting = IndexModel::new("resource_idx", doc! { "project_id": 1 });
        assert!(store.create_index(&ns("resource"), conflicting).is_err());
    }

    #[test]
    fn test_strict_indexing_requires_documents() {
        let store = MemoryStore::new();
        store.set_strict_indexing(true);
        let index = IndexModel::new("meter_idx", doc! { "timestamp": -1 });
        assert!(store.create_index(&ns("meter"), index.clone()).is_err());

        store.insert_one(&ns("meter"), doc! { "_id": "s" }).unwrap();
        store.create_index(&ns("meter"), index).unwrap();
    }

    #[test]
    fn test_drop_database() {
        let store = MemoryStore::new();
        store.insert_one(&ns("a"), doc! {}).unwrap();
        store
            .insert_one(&Namespace::new("other", "a"), doc! {})
            .unwrap();
        store.drop_database("test").unwrap();
        assert_eq!(store.document_count(&ns("a")).unwrap(), 0);
        assert_eq!(
            store
                .document_count(&Namespace::new("other", "a"))
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_driver_shares_store() {
        let driver = MemoryDriver::default();
        let url = ConnectionUrl::parse("memory://local/test").unwrap();
        let first = driver.connect(&url).unwrap();
        let second = driver.connect(&url).unwrap();
        first.insert_one(&ns("user"), doc! { "_id": "u" }).unwrap();
        assert_eq!(
            second
                .find(&ns("user"), doc! {}, FindOptions::default())
                .unwrap()
                .count(),
            1
        );
        assert_eq!(driver.connect_count(), 2);
    }

    #[test]
    fn test_driver_rejects_other_schemes() {
        let driver = MemoryDriver::default();
        for raw in ["db2://localhost:27017/test", "mongodb://localhost/test"] {
            let url = ConnectionUrl::parse(raw).unwrap();
            let err = driver.connect(&url).err().unwrap();
            assert!(matches!(err, StorageError::InvalidUrl(_)), "{raw}: {err}");
        }
        assert_eq!(driver.connect_count(), 0);
    }
}
