// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::{Arc, PoisonError, RwLock};

use crate::schema::{Document, InstanceId};
use crate::store::{EntityStore, GrantQuery, GrantRecord, GrantStore, StoreQuery};

/// In-memory document store.
///
/// This does not persist data permanently, all changes are lost when the process ends. Use this
/// only in development, test or embedded contexts.
#[derive(Clone, Debug, Default)]
pub struct EntityMemoryStore {
    collections: Arc<RwLock<BTreeMap<String, BTreeMap<InstanceId, Document>>>>,
}

impl EntityMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document. Returns `true` if it was not known before.
    pub fn insert(&self, document: Document) -> bool {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        collections
            .entry(document.collection.clone())
            .or_default()
            .insert(document.id.clone(), document)
            .is_none()
    }

    pub fn len(&self, collection: &str) -> usize {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        collections.get(collection).map_or(0, BTreeMap::len)
    }
}

impl EntityStore for EntityMemoryStore {
    type Error = Infallible;

    async fn find_by_ids(
        &self,
        collection: &str,
        ids: &[InstanceId],
    ) -> Result<Vec<Document>, Self::Error> {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(documents) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| documents.get(id)).cloned().collect())
    }

    async fn find(
        &self,
        collection: &str,
        query: &StoreQuery,
    ) -> Result<Vec<Document>, Self::Error> {
        if query.filter.is_match_none() {
            return Ok(Vec::new());
        }

        let collections = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(documents) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        Ok(documents
            .values()
            .filter(|document| query.filter.matches(document))
            .map(|document| match &query.projection {
                Some(fields) => {
                    let mut projected = document.clone();
                    projected.links.retain(|field, _| fields.contains(field));
                    projected
                }
                None => document.clone(),
            })
            .collect())
    }
}

/// In-memory grant record store keyed by `(subject_id, resource_id)`.
#[derive(Clone, Debug, Default)]
pub struct GrantMemoryStore {
    records: Arc<RwLock<BTreeMap<(InstanceId, InstanceId), GrantRecord>>>,
}

impl GrantMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl GrantStore for GrantMemoryStore {
    type Error = Infallible;

    async fn find_one(
        &self,
        subject_id: &InstanceId,
        resource_id: &InstanceId,
    ) -> Result<Option<GrantRecord>, Self::Error> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .get(&(subject_id.clone(), resource_id.clone()))
            .cloned())
    }

    async fn find_all(&self, query: &GrantQuery) -> Result<Vec<GrantRecord>, Self::Error> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .values()
            .filter(|record| query.matches(record))
            .cloned()
            .collect())
    }

    async fn upsert(&self, record: GrantRecord) -> Result<bool, Self::Error> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let key = (record.subject_id.clone(), record.resource_id.clone());
        Ok(records.insert(key, record).is_none())
    }

    async fn remove(
        &self,
        subject_id: &InstanceId,
        resource_id: &InstanceId,
    ) -> Result<bool, Self::Error> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .remove(&(subject_id.clone(), resource_id.clone()))
            .is_some())
    }

    async fn remove_for(&self, id: &InstanceId) -> Result<usize, Self::Error> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let before = records.len();
        records.retain(|(subject_id, resource_id), _| subject_id != id && resource_id != id);
        Ok(before - records.len())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use crate::filter::{Expression, FieldPath, Filter};
    use crate::schema::Document;
    use crate::store::{EntityStore, GrantQuery, GrantRecord, GrantStore, StoreQuery};

    use super::{EntityMemoryStore, GrantMemoryStore};

    #[tokio::test]
    async fn find_documents() {
        let store = EntityMemoryStore::new();
        assert!(store.insert(Document::new("blog", "b1").link("organizationId", ["o1"])));
        assert!(store.insert(Document::new("blog", "b2").link("organizationId", ["o2"])));
        assert!(!store.insert(Document::new("blog", "b2").link("organizationId", ["o1"])));
        assert_eq!(store.len("blog"), 2);

        let found = store
            .find_by_ids("blog", &["b2".into(), "b3".into()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(store.find_by_id("post", &"b1".into()).await.unwrap(), None);

        let query = StoreQuery::new(Filter::from(Expression::is_in(
            FieldPath::Link("organizationId".into()),
            ["o1".into()],
        )))
        .project(Vec::new());
        let found = store.find("blog", &query).await.unwrap();
        assert_eq!(
            found,
            vec![Document::new("blog", "b1"), Document::new("blog", "b2")]
        );
    }

    #[tokio::test]
    async fn upsert_and_remove_grants() {
        let store = GrantMemoryStore::new();
        let user = Document::new("user", "u1");
        let blog = Document::new("blog", "b1");
        let post = Document::new("post", "p1");

        let grant = GrantRecord::new(&user, &blog).with_access("view-post", true);
        assert!(store.upsert(grant.clone()).await.unwrap());
        assert!(
            !store
                .upsert(grant.clone().with_access("edit-post", false))
                .await
                .unwrap()
        );
        store
            .upsert(GrantRecord::new(&user, &post).with_access("view-post", false))
            .await
            .unwrap();

        let record = store.find_one(&user.id, &blog.id).await.unwrap().unwrap();
        assert_eq!(record.access.len(), 2);

        let query = GrantQuery {
            subject_ids: BTreeSet::from([user.id.clone()]),
            resource_types: BTreeSet::from(["blog".to_string()]),
            permissions: BTreeSet::from(["view-post".to_string()]),
        };
        assert_eq!(store.find_all(&query).await.unwrap().len(), 1);

        assert!(store.remove(&user.id, &post.id).await.unwrap());
        assert!(!store.remove(&user.id, &post.id).await.unwrap());
        assert_eq!(store.remove_for(&user.id).await.unwrap(), 1);
        assert!(store.is_empty());
    }
}
