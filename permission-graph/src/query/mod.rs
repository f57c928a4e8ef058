// SPDX-License-Identifier: MIT OR Apache-2.0

//! Compilation of grant records into a filter over one collection.
//!
//! Grants are recorded on resource instances anywhere in the resource hierarchy of the queried
//! collection. Grants on the queried collection itself or on a collection it links to directly
//! restrict the matching field. Grants further up are projected down to the collection linked
//! from the queried one by walking the shortest link path and looking up which instances
//! reference the granted ones.
//!
//! Deeper, more specific resources take precedence: once an id has been classified as allowed or
//! denied by a grant on a deeper collection, grants on shallower collections can not change it.
mod access;
mod decision;
mod provenance;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use futures_util::future::try_join;
use thiserror::Error;
use tracing::{debug, trace};

use crate::filter::{Expression, FieldPath, Filter};
use crate::graph::GraphError;
use crate::hierarchy::ParentError;
use crate::index::AuthorizationIndex;
use crate::permissions::PermissionError;
use crate::schema::{Document, HierarchyKind, InstanceId};
use crate::store::{EntityStore, GrantQuery, GrantRecord, GrantStore, find_linked_ids};

pub use access::AccessError;
pub use decision::{Decision, Reason};
pub use provenance::{GrantSource, Provenance, ProvenanceEntry, SubjectNode};

#[derive(Debug, Error)]
pub enum QueryError<E, G> {
    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Parent(#[from] ParentError<E>),

    #[error("path {path:?} from {collection} does not start with a link held by {collection}")]
    MalformedPath {
        collection: String,
        path: Vec<String>,
    },

    #[error("entity store error: {0}")]
    EntityStore(E),

    #[error("grant store error: {0}")]
    GrantStore(G),
}

/// Grants on one resource collection.
#[derive(Debug)]
struct GrantGroup {
    collection: String,
    depth: usize,
    grants: Vec<GrantRecord>,
}

/// Allowed and denied ids per restricted field, in the order fields were first restricted.
#[derive(Debug, Default)]
struct Restrictions {
    fields: Vec<FieldPath>,
    allowed: HashMap<FieldPath, BTreeSet<InstanceId>>,
    denied: HashMap<FieldPath, BTreeSet<InstanceId>>,
}

impl Restrictions {
    fn is_classified(&self, field: &FieldPath, id: &InstanceId) -> bool {
        let contains = |ids: &HashMap<FieldPath, BTreeSet<InstanceId>>| {
            ids.get(field).is_some_and(|ids| ids.contains(id))
        };
        contains(&self.allowed) || contains(&self.denied)
    }

    /// Classify an id unless it already is. Returns `true` if the id was classified now.
    fn classify(&mut self, field: &FieldPath, id: &InstanceId, allowed: bool) -> bool {
        if self.is_classified(field, id) {
            return false;
        }

        if !self.fields.contains(field) {
            self.fields.push(field.clone());
        }

        let ids = if allowed {
            &mut self.allowed
        } else {
            &mut self.denied
        };
        ids.entry(field.clone()).or_default().insert(id.clone());
        true
    }

    /// A document matches if it is allowed under some field and not denied under any field
    /// which was restricted before that one.
    fn into_filter(self) -> Filter {
        let mut clauses = Vec::new();

        for (position, field) in self.fields.iter().enumerate() {
            let Some(allowed) = self.allowed.get(field).filter(|ids| !ids.is_empty()) else {
                continue;
            };

            let mut clause = vec![Expression::is_in(field.clone(), allowed.iter().cloned())];
            for preceding in &self.fields[..position] {
                if let Some(denied) = self.denied.get(preceding).filter(|ids| !ids.is_empty()) {
                    clause.push(Expression::not_in(preceding.clone(), denied.iter().cloned()));
                }
            }
            clauses.push(Expression::all(clause));
        }

        if clauses.is_empty() {
            Filter::MatchNone
        } else {
            Filter::Clause(Expression::any(clauses))
        }
    }
}

impl AuthorizationIndex {
    /// Filter restricting reads of `collection` to the documents the subject may access with the
    /// given permission.
    ///
    /// Returns [`Filter::MatchAll`] for collections outside the resource hierarchy or declared
    /// unsecured, and [`Filter::MatchNone`] if there is no subject or no relevant grant.
    pub async fn compile<S, G>(
        &self,
        entities: &S,
        grants: &G,
        subject: Option<&Document>,
        collection: &str,
        permission: &str,
    ) -> Result<Filter, QueryError<S::Error, G::Error>>
    where
        S: EntityStore,
        G: GrantStore,
    {
        let (filter, _) = self
            .compile_inner(entities, grants, subject, collection, permission, false)
            .await?;
        Ok(filter)
    }

    /// Like [`AuthorizationIndex::compile`], additionally recording which grant classified every
    /// id and the subject's ancestors.
    pub async fn compile_with_provenance<S, G>(
        &self,
        entities: &S,
        grants: &G,
        subject: Option<&Document>,
        collection: &str,
        permission: &str,
    ) -> Result<(Filter, Provenance), QueryError<S::Error, G::Error>>
    where
        S: EntityStore,
        G: GrantStore,
    {
        self.compile_inner(entities, grants, subject, collection, permission, true)
            .await
    }

    async fn compile_inner<S, G>(
        &self,
        entities: &S,
        grants: &G,
        subject: Option<&Document>,
        collection: &str,
        permission: &str,
        debug: bool,
    ) -> Result<(Filter, Provenance), QueryError<S::Error, G::Error>>
    where
        S: EntityStore,
        G: GrantStore,
    {
        let mut provenance = Provenance {
            collection: collection.to_string(),
            ..Default::default()
        };

        if !self.is_secured(collection) {
            trace!(%collection, "collection is not secured");
            return Ok((Filter::MatchAll, provenance));
        }

        let Some(subject) = subject else {
            return Ok((Filter::MatchNone, provenance));
        };

        let permission = self.validate_permission(permission, collection)?;
        let permissions = self.permissions().expand(&permission);
        provenance.permissions = permissions.clone();

        let ancestry = self.subject_hierarchy(subject, entities).await?;
        let distances: HashMap<InstanceId, usize> = ancestry
            .iter()
            .map(|ancestor| (ancestor.document.id.clone(), ancestor.distance))
            .collect();
        if debug {
            provenance.subjects = self.subject_graph(subject, entities).await?;
        }

        let query = GrantQuery {
            subject_ids: distances.keys().cloned().collect(),
            resource_types: self
                .hierarchy(HierarchyKind::Resource)
                .class_names(collection)
                .into_iter()
                .collect(),
            permissions: permissions.iter().cloned().collect(),
        };
        let records = grants
            .find_all(&query)
            .await
            .map_err(QueryError::GrantStore)?;

        debug!(
            %collection,
            %permission,
            subject = %subject.id,
            grants = records.len(),
            "compiling authorization filter"
        );

        if records.is_empty() {
            return Ok((Filter::MatchNone, provenance));
        }

        let mut restrictions = Restrictions::default();
        for group in self.group_grants(records, &distances) {
            trace!(
                group = %group.collection,
                depth = group.depth,
                grants = group.grants.len(),
                "applying grants"
            );

            if let Some(field) = self.direct_field(collection, &group.collection) {
                self.apply_direct(&group, &field, &permissions, &mut restrictions, &mut provenance);
            } else {
                self.apply_projected::<S, G>(
                    entities,
                    collection,
                    &group,
                    &permissions,
                    &mut restrictions,
                    &mut provenance,
                )
                .await?;
            }
        }

        Ok((restrictions.into_filter(), provenance))
    }

    /// Group grants by resource collection, deepest collections first.
    ///
    /// Grants within a group are ordered by the subject's distance, subject id and resource id,
    /// groups of equal depth by collection name.
    fn group_grants(
        &self,
        records: Vec<GrantRecord>,
        distances: &HashMap<InstanceId, usize>,
    ) -> Vec<GrantGroup> {
        let resources = self.hierarchy(HierarchyKind::Resource);

        let mut grouped: BTreeMap<String, Vec<GrantRecord>> = BTreeMap::new();
        for record in records {
            grouped
                .entry(record.resource_type.clone())
                .or_default()
                .push(record);
        }

        let mut groups: Vec<GrantGroup> = grouped
            .into_iter()
            .map(|(collection, mut grants)| {
                grants.sort_by(|a, b| {
                    let distance = |record: &GrantRecord| {
                        distances
                            .get(&record.subject_id)
                            .copied()
                            .unwrap_or(usize::MAX)
                    };
                    distance(a)
                        .cmp(&distance(b))
                        .then_with(|| a.subject_id.cmp(&b.subject_id))
                        .then_with(|| a.resource_id.cmp(&b.resource_id))
                });
                GrantGroup {
                    depth: resources.depth(&collection).unwrap_or_default(),
                    collection,
                    grants,
                }
            })
            .collect();

        // Stable sort keeps collection name order for equal depths.
        groups.sort_by(|a, b| b.depth.cmp(&a.depth));
        groups
    }

    /// Field of the queried collection holding ids of the grant collection, if it is the queried
    /// collection itself or directly linked from it.
    fn direct_field(&self, collection: &str, grant_collection: &str) -> Option<FieldPath> {
        if collection == grant_collection {
            return Some(FieldPath::Id);
        }

        self.catalog()
            .link_between(collection, grant_collection)
            .map(|link| FieldPath::Link(link.field.name))
    }

    fn apply_direct(
        &self,
        group: &GrantGroup,
        field: &FieldPath,
        permissions: &[String],
        restrictions: &mut Restrictions,
        provenance: &mut Provenance,
    ) {
        for grant in &group.grants {
            let Some((permission, allowed)) = grant.evaluate(permissions) else {
                continue;
            };

            if restrictions.classify(field, &grant.resource_id, allowed) {
                provenance.entries.push(ProvenanceEntry {
                    field: field.to_string(),
                    id: grant.resource_id.clone(),
                    allowed,
                    depth: group.depth,
                    path: Vec::new(),
                    grants: vec![GrantSource::new(grant, permission, allowed)],
                });
            }
        }
    }

    async fn apply_projected<S, G>(
        &self,
        entities: &S,
        collection: &str,
        group: &GrantGroup,
        permissions: &[String],
        restrictions: &mut Restrictions,
        provenance: &mut Provenance,
    ) -> Result<(), QueryError<S::Error, G::Error>>
    where
        S: EntityStore,
        G: GrantStore,
    {
        let path = self.graph().require_path(collection, &group.collection)?;
        let malformed = || QueryError::MalformedPath {
            collection: collection.to_string(),
            path: path.clone(),
        };

        if path.len() < 3 || !self.graph().is_linked(&path[0], &path[1]) {
            return Err(malformed());
        }
        let field = self
            .catalog()
            .link_between(&path[0], &path[1])
            .map(|link| FieldPath::Link(link.field.name))
            .ok_or_else(malformed)?;

        let mut seen = HashSet::new();
        let (mut allowed, mut denied) = (BTreeSet::new(), BTreeSet::new());
        let (mut allowed_by, mut denied_by) = (Vec::new(), Vec::new());
        for grant in &group.grants {
            let Some((permission, is_allowed)) = grant.evaluate(permissions) else {
                continue;
            };
            if !seen.insert(&grant.resource_id) {
                continue;
            }

            let source = GrantSource::new(grant, permission, is_allowed);
            if is_allowed {
                allowed.insert(grant.resource_id.clone());
                allowed_by.push(source);
            } else {
                denied.insert(grant.resource_id.clone());
                denied_by.push(source);
            }
        }

        let (allowed, denied) = try_join(
            self.walk_path(entities, &path, allowed),
            self.walk_path(entities, &path, denied),
        )
        .await
        .map_err(|error| match error {
            WalkError::Store(error) => QueryError::EntityStore(error),
            WalkError::MissingLink => malformed(),
        })?;

        debug!(
            path = ?path,
            allowed = allowed.len(),
            denied = denied.len(),
            "projected grants"
        );

        // Denials go first so they win over grants of the same collection.
        let projected = denied
            .into_iter()
            .map(|id| (id, false, &denied_by))
            .chain(allowed.into_iter().map(|id| (id, true, &allowed_by)));
        for (id, is_allowed, sources) in projected {
            if restrictions.classify(&field, &id, is_allowed) {
                provenance.entries.push(ProvenanceEntry {
                    field: field.to_string(),
                    id,
                    allowed: is_allowed,
                    depth: group.depth,
                    path: path.clone(),
                    grants: sources.clone(),
                });
            }
        }

        Ok(())
    }

    /// Translate ids of the last collection on the path into ids of the second one, one hop at a
    /// time.
    async fn walk_path<S: EntityStore>(
        &self,
        entities: &S,
        path: &[String],
        mut ids: BTreeSet<InstanceId>,
    ) -> Result<BTreeSet<InstanceId>, WalkError<S::Error>> {
        for hop in (1..path.len() - 1).rev() {
            if ids.is_empty() {
                break;
            }

            let (holder, target) = (&path[hop], &path[hop + 1]);
            let link = self
                .catalog()
                .link_between(holder, target)
                .ok_or(WalkError::MissingLink)?;

            ids = find_linked_ids(
                entities,
                holder,
                &link.field.name,
                &ids,
                self.config().id_batch_size,
            )
            .await
            .map_err(WalkError::Store)?;

            trace!(%holder, %target, ids = ids.len(), "walked link");
        }

        Ok(ids)
    }

    /// Ancestor adjacency of the subject, drained depth-first from a work stack.
    async fn subject_graph<S: EntityStore>(
        &self,
        subject: &Document,
        entities: &S,
    ) -> Result<BTreeMap<InstanceId, SubjectNode>, ParentError<S::Error>> {
        let subjects = self.hierarchy(HierarchyKind::Subject);
        let mut nodes = BTreeMap::new();
        let mut stack = vec![subject.clone()];

        while let Some(document) = stack.pop() {
            if nodes.contains_key(&document.id) {
                continue;
            }

            let parents = if subjects.contains(&document.collection) {
                self.parents(HierarchyKind::Subject, &document, entities)
                    .await?
            } else {
                Vec::new()
            };

            nodes.insert(
                document.id.clone(),
                SubjectNode {
                    collection: document.collection.clone(),
                    parents: parents.iter().map(|parent| parent.id.clone()).collect(),
                },
            );
            stack.extend(
                parents
                    .into_iter()
                    .filter(|parent| !nodes.contains_key(&parent.id)),
            );
        }

        Ok(nodes)
    }
}

#[derive(Debug)]
enum WalkError<E> {
    Store(E),
    MissingLink,
}

#[cfg(test)]
mod tests {
    use crate::filter::{Expression, FieldPath, Filter};

    use super::Restrictions;

    #[test]
    fn earlier_denials_shadow_later_grants() {
        let mut restrictions = Restrictions::default();
        let blog = FieldPath::Link("blogId".into());

        assert!(restrictions.classify(&FieldPath::Id, &"post1".into(), false));
        assert!(restrictions.classify(&blog, &"blog1".into(), true));
        assert!(restrictions.classify(&blog, &"blog2".into(), true));
        assert!(!restrictions.classify(&blog, &"blog1".into(), false));

        assert_eq!(
            restrictions.into_filter(),
            Filter::Clause(Expression::And(vec![
                Expression::is_in(blog, ["blog1".into(), "blog2".into()]),
                Expression::not_in(FieldPath::Id, ["post1".into()]),
            ]))
        );
    }

    #[test]
    fn multiple_allowed_fields() {
        let mut restrictions = Restrictions::default();
        let blog = FieldPath::Link("blogId".into());

        restrictions.classify(&FieldPath::Id, &"post1".into(), true);
        restrictions.classify(&blog, &"blog2".into(), true);

        assert_eq!(
            restrictions.into_filter().to_json(),
            serde_json::json!({
                "$or": [
                    { "_id": { "$in": ["post1"] } },
                    { "blogId": { "$in": ["blog2"] } },
                ]
            })
        );
    }

    #[test]
    fn only_denials_match_nothing() {
        let mut restrictions = Restrictions::default();
        restrictions.classify(&FieldPath::Id, &"post1".into(), false);
        assert_eq!(restrictions.into_filter(), Filter::MatchNone);
        assert_eq!(Restrictions::default().into_filter(), Filter::MatchNone);
    }
}
