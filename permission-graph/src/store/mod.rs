// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interfaces to the document store holding entity instances and to the store holding grant
//! records.
//!
//! Both are implemented by the hosting application. Errors returned by them are propagated to the
//! caller unmodified, no retries are attempted.
mod memory;

use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;

use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};

use crate::filter::{Expression, FieldPath, Filter};
use crate::schema::{Document, InstanceId};

pub use memory::{EntityMemoryStore, GrantMemoryStore};

/// Query against one collection of the document store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreQuery {
    pub filter: Filter,

    /// Link fields to include in returned documents, `None` returns all of them. Ids are always
    /// returned.
    pub projection: Option<Vec<String>>,
}

impl StoreQuery {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            projection: None,
        }
    }

    pub fn project(mut self, fields: Vec<String>) -> Self {
        self.projection = Some(fields);
        self
    }
}

/// Read access to entity instances.
pub trait EntityStore {
    type Error: Error + 'static;

    /// Load all documents of the collection with the given ids. Unknown ids are skipped.
    fn find_by_ids(
        &self,
        collection: &str,
        ids: &[InstanceId],
    ) -> impl Future<Output = Result<Vec<Document>, Self::Error>>;

    /// Load a single document.
    fn find_by_id(
        &self,
        collection: &str,
        id: &InstanceId,
    ) -> impl Future<Output = Result<Option<Document>, Self::Error>> {
        async move {
            let documents = self
                .find_by_ids(collection, std::slice::from_ref(id))
                .await?;
            Ok(documents.into_iter().next())
        }
    }

    /// Load all documents of the collection matching the query.
    fn find(
        &self,
        collection: &str,
        query: &StoreQuery,
    ) -> impl Future<Output = Result<Vec<Document>, Self::Error>>;
}

/// Stored decision of one subject instance about one resource instance.
///
/// The `access` map holds an explicit grant (`true`) or denial (`false`) per permission string,
/// permissions which are absent carry no opinion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRecord {
    pub subject_id: InstanceId,
    pub resource_id: InstanceId,
    pub subject_type: String,
    pub resource_type: String,
    #[serde(default)]
    pub access: BTreeMap<String, bool>,
}

impl GrantRecord {
    pub fn new(subject: &Document, resource: &Document) -> Self {
        Self {
            subject_id: subject.id.clone(),
            resource_id: resource.id.clone(),
            subject_type: subject.collection.clone(),
            resource_type: resource.collection.clone(),
            access: BTreeMap::new(),
        }
    }

    pub fn with_access(mut self, permission: impl Into<String>, allowed: bool) -> Self {
        self.access.insert(permission.into(), allowed);
        self
    }

    /// Decide access by scanning an ordered permission list, most specific permission first.
    ///
    /// An explicit grant returns immediately. An explicit denial is kept unless a more general
    /// permission later in the list is explicitly granted. Returns the deciding permission and
    /// the decision, or `None` if the record has no opinion on any of the permissions.
    pub fn evaluate<'a>(&self, permissions: &'a [String]) -> Option<(&'a str, bool)> {
        let mut denial = None;
        for permission in permissions {
            match self.access.get(permission) {
                Some(true) => return Some((permission.as_str(), true)),
                Some(false) if denial.is_none() => denial = Some((permission.as_str(), false)),
                _ => (),
            }
        }
        denial
    }
}

/// Selection of grant records relevant for one authorization query.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GrantQuery {
    pub subject_ids: BTreeSet<InstanceId>,
    pub resource_types: BTreeSet<String>,

    /// Records match if their access map mentions any of these permissions.
    pub permissions: BTreeSet<String>,
}

impl GrantQuery {
    pub fn matches(&self, record: &GrantRecord) -> bool {
        self.subject_ids.contains(&record.subject_id)
            && self.resource_types.contains(&record.resource_type)
            && record
                .access
                .keys()
                .any(|permission| self.permissions.contains(permission))
    }
}

/// Read and write access to grant records, unique per `(subject_id, resource_id)`.
pub trait GrantStore {
    type Error: Error + 'static;

    fn find_one(
        &self,
        subject_id: &InstanceId,
        resource_id: &InstanceId,
    ) -> impl Future<Output = Result<Option<GrantRecord>, Self::Error>>;

    fn find_all(
        &self,
        query: &GrantQuery,
    ) -> impl Future<Output = Result<Vec<GrantRecord>, Self::Error>>;

    /// Insert or replace the record for its `(subject_id, resource_id)` pair.
    ///
    /// Returns `true` if a new record was inserted.
    fn upsert(&self, record: GrantRecord) -> impl Future<Output = Result<bool, Self::Error>>;

    /// Returns `true` if a record was removed.
    fn remove(
        &self,
        subject_id: &InstanceId,
        resource_id: &InstanceId,
    ) -> impl Future<Output = Result<bool, Self::Error>>;

    /// Remove every record naming the given instance as subject or resource. Returns the number
    /// of removed records.
    fn remove_for(&self, id: &InstanceId) -> impl Future<Output = Result<usize, Self::Error>>;
}

/// Load documents by id, issuing one concurrent store read per batch.
pub(crate) async fn find_by_ids_batched<S: EntityStore>(
    store: &S,
    collection: &str,
    ids: &BTreeSet<InstanceId>,
    batch_size: usize,
) -> Result<Vec<Document>, S::Error> {
    let ids: Vec<InstanceId> = ids.iter().cloned().collect();
    let reads = ids
        .chunks(batch_size.max(1))
        .map(|batch| store.find_by_ids(collection, batch));
    let documents = try_join_all(reads).await?;
    Ok(documents.into_iter().flatten().collect())
}

/// Ids of all documents in `collection` whose link `field` references one of `ids`.
pub(crate) async fn find_linked_ids<S: EntityStore>(
    store: &S,
    collection: &str,
    field: &str,
    ids: &BTreeSet<InstanceId>,
    batch_size: usize,
) -> Result<BTreeSet<InstanceId>, S::Error> {
    let ids: Vec<InstanceId> = ids.iter().cloned().collect();
    let queries: Vec<StoreQuery> = ids
        .chunks(batch_size.max(1))
        .map(|batch| {
            StoreQuery::new(Filter::from(Expression::is_in(
                FieldPath::Link(field.to_string()),
                batch.iter().cloned(),
            )))
            .project(Vec::new())
        })
        .collect();
    let reads = queries.iter().map(|query| store.find(collection, query));
    let documents = try_join_all(reads).await?;
    Ok(documents
        .into_iter()
        .flatten()
        .map(|document| document.id)
        .collect())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use crate::schema::{Document, InstanceId};
    use crate::store::EntityMemoryStore;

    use super::{GrantQuery, GrantRecord, find_by_ids_batched, find_linked_ids};

    fn org_grant() -> GrantRecord {
        GrantRecord::new(
            &Document::new("user", "u1"),
            &Document::new("organization", "o1"),
        )
    }

    #[test]
    fn explicit_grant_short_circuits() {
        let permissions = vec!["view-post".to_string(), "edit-post".to_string()];

        let record = org_grant().with_access("view-post", true).with_access("edit-post", false);
        assert_eq!(record.evaluate(&permissions), Some(("view-post", true)));
    }

    #[test]
    fn ancestor_grant_overrides_denial() {
        let permissions = vec!["view-post".to_string(), "edit-post".to_string()];

        let record = org_grant().with_access("view-post", false).with_access("edit-post", true);
        assert_eq!(record.evaluate(&permissions), Some(("edit-post", true)));

        let record = org_grant().with_access("view-post", false);
        assert_eq!(record.evaluate(&permissions), Some(("view-post", false)));

        let record = org_grant().with_access("delete-post", true);
        assert_eq!(record.evaluate(&permissions), None);
    }

    #[test]
    fn query_matches_any_permission() {
        let query = GrantQuery {
            subject_ids: BTreeSet::from(["u1".into()]),
            resource_types: BTreeSet::from(["organization".to_string()]),
            permissions: BTreeSet::from(["view-post".to_string(), "edit-post".to_string()]),
        };

        assert!(query.matches(&org_grant().with_access("edit-post", false)));
        assert!(!query.matches(&org_grant().with_access("delete-post", true)));
        assert!(!query.matches(&org_grant()));
    }

    #[tokio::test]
    async fn batched_reads_join_all_batches() {
        let store = EntityMemoryStore::new();
        for (post, blog) in [("p1", "b1"), ("p2", "b1"), ("p3", "b2"), ("p4", "b3")] {
            store.insert(Document::new("post", post).link("blogId", [blog]));
        }
        let blogs: BTreeSet<InstanceId> = BTreeSet::from(["b1".into(), "b2".into(), "b3".into()]);

        for batch_size in [1, 2, 500] {
            let posts = find_linked_ids(&store, "post", "blogId", &blogs, batch_size)
                .await
                .unwrap();
            assert_eq!(posts.len(), 4);

            let documents = find_by_ids_batched(&store, "post", &posts, batch_size)
                .await
                .unwrap();
            assert_eq!(documents.len(), 4);
        }
    }
}
