//! Read path: users, projects, resources, meters and samples.
//!
//! Every listing returns [`Records`], a lazy iterator over decoded items.
//! Usage errors (unsupported pagination, bad filters) surface when the call
//! is made; decode errors surface per item while iterating.

use bson::{Document, doc};
use serde::de::DeserializeOwned;

use crate::storage::StorageError;
use crate::storage::connection::Connection;
use crate::storage::db::FindOptions;
use crate::storage::query::{
    MeterFilter, Pagination, QueryTarget, ResourceFilter, SampleFilter, make_query_from_filter,
    make_resource_query,
};
use crate::storage::records::{METER, OwnerDocument, PROJECT, RESOURCE, ResourceDocument, SampleDocument, USER};
use crate::storage::types::{Meter, Resource, Sample, Statistics};

/// Lazy sequence of decoded records.
pub type Records<T> = Box<dyn Iterator<Item = Result<T, StorageError>> + Send>;

pub(crate) fn decode<T: DeserializeOwned>(doc: Result<Document, StorageError>) -> Result<T, StorageError> {
    Ok(bson::from_document(doc?)?)
}

/// Paging is not supported by this backend.
pub(crate) fn reject_pagination(pagination: Option<&Pagination>) -> Result<(), StorageError> {
    match pagination {
        Some(_) => Err(StorageError::NotImplemented("Pagination")),
        None => Ok(()),
    }
}

impl Connection {
    /// Ids of every user, optionally restricted to one source.
    pub fn get_users(&self, source: Option<&str>) -> Result<Records<String>, StorageError> {
        self.owner_ids(USER, source)
    }

    /// Ids of every project, optionally restricted to one source.
    pub fn get_projects(&self, source: Option<&str>) -> Result<Records<String>, StorageError> {
        self.owner_ids(PROJECT, source)
    }

    fn owner_ids(&self, collection: &str, source: Option<&str>) -> Result<Records<String>, StorageError> {
        let mut filter = Document::new();
        if let Some(source) = source {
            filter.insert("source", source);
        }

        let options = FindOptions::default()
            .projection(doc! { "_id": 1 })
            .sort(doc! { "_id": 1 });
        let cursor = self.db().collection(collection).find(filter, options)?;
        Ok(Box::new(
            cursor.map(|doc| decode::<OwnerDocument>(doc).map(|owner| owner.id)),
        ))
    }

    /// Resources matching `filter`.
    ///
    /// With time bounds, the matching resource ids are collected from the
    /// raw samples first; otherwise resource documents are queried directly.
    /// First and last sample timestamps are not tracked and come back empty.
    pub fn get_resources(
        &self,
        filter: &ResourceFilter,
        pagination: Option<&Pagination>,
    ) -> Result<Records<Resource>, StorageError> {
        reject_pagination(pagination)?;
        let db = self.db();

        let query = if filter.has_time_bounds() {
            let samples = make_resource_query(filter, QueryTarget::Samples)?;
            let ids = db.collection(METER).distinct("resource_id", samples)?;
            tracing::debug!(count = ids.len(), "Resolved resources from samples");
            doc! { "_id": { "$in": ids } }
        } else {
            make_resource_query(filter, QueryTarget::Resources)?
        };

        let cursor = db.collection(RESOURCE).find(query, FindOptions::default())?;
        Ok(Box::new(
            cursor.map(|doc| decode::<ResourceDocument>(doc).map(Resource::from)),
        ))
    }

    /// Meters matching `filter`, one per (resource, meter descriptor) pair.
    pub fn get_meters(
        &self,
        filter: &MeterFilter,
        pagination: Option<&Pagination>,
    ) -> Result<Records<Meter>, StorageError> {
        reject_pagination(pagination)?;

        let query = make_resource_query(&ResourceFilter::from(filter), QueryTarget::Resources)?;
        let cursor = self
            .db()
            .collection(RESOURCE)
            .find(query, FindOptions::default())?;

        Ok(Box::new(cursor.flat_map(|doc| {
            match decode::<ResourceDocument>(doc) {
                Ok(resource) => resource.into_meters().into_iter().map(Ok).collect::<Vec<_>>(),
                Err(e) => vec![Err(e)],
            }
        })))
    }

    /// Samples matching `filter`, newest first.
    ///
    /// `Some(0)` yields nothing without touching the backend.
    pub fn get_samples(
        &self,
        filter: &SampleFilter,
        limit: Option<usize>,
    ) -> Result<Records<Sample>, StorageError> {
        if limit == Some(0) {
            return Ok(Box::new(std::iter::empty()));
        }

        let query = make_query_from_filter(filter, false)?;
        let mut options = FindOptions::default().sort(doc! { "timestamp": -1 });
        if let Some(limit) = limit {
            options = options.limit(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let cursor = self.db().collection(METER).find(query, options)?;
        Ok(Box::new(
            cursor.map(|doc| decode::<SampleDocument>(doc).map(Sample::from)),
        ))
    }

    /// Aggregated statistics. Not supported by this backend.
    pub fn get_meter_statistics(
        &self,
        _filter: &SampleFilter,
        _period: Option<u64>,
        _groupby: &[String],
    ) -> Result<Vec<Statistics>, StorageError> {
        Err(StorageError::NotImplemented("Statistics"))
    }
}
