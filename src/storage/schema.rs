//! Index definitions and schema setup.
//!
//! Runs on every connection open. Index creation only happens when the
//! `resource` collection has no secondary index yet, so repeat runs are
//! no-ops.

use bson::oid::ObjectId;
use bson::{Document, doc};

use crate::storage::StorageError;
use crate::storage::db::{Database, IndexModel, PRIMARY_INDEX_NAME};
use crate::storage::records::{METER, PROJECT, RESOURCE, USER};

/// Owner lookup on resources.
///
/// User and project filters rarely appear together, so a combined index is
/// only selected through its `user_id` prefix; project-scoped queries rely on
/// the `project_id` variant below.
pub const RESOURCE_INDEX: &str = "resource_idx";

/// Owner lookup on resources, project first.
pub const RESOURCE_PROJECT_INDEX: &str = "resource_project_idx";

/// Sample lookup by resource, owner, meter and time.
pub const METER_INDEX: &str = "meter_idx";

/// Most-recent-first sample scans.
pub const TIMESTAMP_INDEX: &str = "timestamp_idx";

/// Index definitions keyed by collection.
pub fn index_definitions() -> Vec<(&'static str, IndexModel)> {
    vec![
        (
            RESOURCE,
            IndexModel::new(
                RESOURCE_INDEX,
                doc! { "user_id": 1, "project_id": 1, "source": 1 },
            ),
        ),
        (
            RESOURCE,
            IndexModel::new(
                RESOURCE_PROJECT_INDEX,
                doc! { "project_id": 1, "user_id": 1, "source": 1 },
            ),
        ),
        (
            METER,
            IndexModel::new(
                METER_INDEX,
                doc! {
                    "resource_id": 1,
                    "user_id": 1,
                    "project_id": 1,
                    "counter_name": 1,
                    "timestamp": 1,
                    "source": 1,
                },
            ),
        ),
        (
            METER,
            IndexModel::new(TIMESTAMP_INDEX, doc! { "timestamp": -1 }),
        ),
    ]
}

/// Throwaway document inserted so backends that refuse to index empty
/// collections can build the index.
fn sentinel() -> (String, Document) {
    let id = ObjectId::new().to_hex();
    let doc = doc! { "_id": id.as_str(), "no_key": id.as_str() };
    (id, doc)
}

/// Whether the resource collection has been initialized already.
fn is_initialized(db: &Database<'_>) -> Result<bool, StorageError> {
    Ok(db
        .collection(RESOURCE)
        .list_indexes()?
        .iter()
        .any(|index| index.name != PRIMARY_INDEX_NAME))
}

/// Ensure every index exists.
///
/// Returns `true` when indexes were created, `false` when the schema was
/// already in place.
pub fn upgrade(db: &Database<'_>) -> Result<bool, StorageError> {
    if is_initialized(db)? {
        tracing::debug!(database = db.name(), "Schema already initialized");
        return Ok(false);
    }

    let definitions = index_definitions();

    for collection in [RESOURCE, METER] {
        let (id, doc) = sentinel();
        let handle = db.collection(collection);
        handle.insert_one(doc)?;

        for (_, index) in definitions.iter().filter(|(c, _)| *c == collection) {
            handle.create_index(index.clone())?;
            tracing::info!(collection, index = %index.name, "Created index");
        }

        handle.delete_many(doc! { "_id": id })?;
    }

    // Touch user and project so their keys are set up the same way.
    for collection in [USER, PROJECT] {
        let (id, doc) = sentinel();
        let handle = db.collection(collection);
        handle.insert_one(doc)?;
        handle.delete_many(doc! { "_id": id })?;
    }

    tracing::info!(database = db.name(), "Database schema initialized");
    Ok(true)
}
