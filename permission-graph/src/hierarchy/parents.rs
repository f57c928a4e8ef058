// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resolution of the parent instances of a document in its hierarchy.
use std::collections::{BTreeSet, HashSet};

use futures_util::future::try_join_all;
use thiserror::Error;
use tracing::{debug, trace};

use crate::catalog::{Direction, LinkCatalog, LinkRef};
use crate::graph::{GraphError, LinkGraph};
use crate::hierarchy::{Hierarchy, HierarchyNode};
use crate::schema::{Document, HierarchyKind, InstanceId};
use crate::store::{EntityStore, find_by_ids_batched};

#[derive(Debug, Error)]
pub enum ParentError<E> {
    #[error("collection {0} is not part of the {1} hierarchy")]
    NotInHierarchy(String, HierarchyKind),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("path {path:?} has no link from {from} to {to}")]
    MissingLink {
        path: Vec<String>,
        from: String,
        to: String,
    },

    #[error("entity store error: {0}")]
    Store(E),
}

/// A document of a hierarchy and its distance from the document the walk started at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ancestor {
    pub document: Document,
    pub distance: usize,
}

/// Boot-time state required to resolve parents in one hierarchy.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ParentContext<'a> {
    pub hierarchy: &'a Hierarchy,
    pub catalog: &'a LinkCatalog,
    pub graph: &'a LinkGraph,
    pub batch_size: usize,
}

/// Parent instances of the given document.
///
/// The immediate parent link is read first. If it is unset on this document, the remaining
/// ancestor entity types are tried from nearest to farthest, routing through the other links set
/// on the document and then the shortest link path towards the ancestor type. A document without
/// any resolvable parent is a root for this instance and yields an empty set.
pub(crate) async fn resolve_parents<S: EntityStore>(
    context: ParentContext<'_>,
    store: &S,
    document: &Document,
) -> Result<Vec<Document>, ParentError<S::Error>> {
    let node = context
        .hierarchy
        .node(&document.collection)
        .ok_or_else(|| {
            ParentError::NotInHierarchy(document.collection.clone(), context.hierarchy.kind())
        })?;

    let Some(parent) = &node.parent else {
        return Ok(Vec::new());
    };

    let ids: BTreeSet<InstanceId> = document.link_values(&parent.field).iter().cloned().collect();
    if !ids.is_empty() {
        return find_by_ids_batched(store, &parent.target, &ids, context.batch_size)
            .await
            .map_err(ParentError::Store);
    }

    // The immediate parent link is unset, route through the links which are set instead.
    for candidate in node.ancestors.iter().skip(1) {
        for link in fallback_links(context, node, document, candidate) {
            let ids: BTreeSet<InstanceId> = document
                .link_values(&link.field.name)
                .iter()
                .cloned()
                .collect();
            let linked = find_by_ids_batched(store, link.target(), &ids, context.batch_size)
                .await
                .map_err(ParentError::Store)?;

            let path = if link.target() == candidate.as_str() {
                vec![candidate.clone()]
            } else {
                context.graph.shortest_path(link.target(), candidate)?
            };

            if let Some(parents) = walk_to_ancestor(context, store, node, &path, linked).await? {
                debug!(
                    collection = %document.collection,
                    id = %document.id,
                    ancestor = %candidate,
                    field = %link.field.name,
                    "resolved parents through link path"
                );
                return Ok(parents);
            }
        }
    }

    trace!(collection = %document.collection, id = %document.id, "document has no parents");
    Ok(Vec::new())
}

/// Links set on the document from which the candidate ancestor type is reachable, shortest
/// route first.
fn fallback_links(
    context: ParentContext<'_>,
    node: &HierarchyNode,
    document: &Document,
    candidate: &str,
) -> Vec<LinkRef> {
    let mut links: Vec<(usize, LinkRef)> = context
        .catalog
        .links(&node.entity, Direction::Outgoing, None)
        .iter()
        .filter(|link| {
            !link.field.excluded && !document.link_values(&link.field.name).is_empty()
        })
        .filter_map(|link| {
            let remaining = if link.target() == candidate {
                0
            } else {
                context.graph.distance(link.target(), candidate)?
            };
            Some((remaining, link.clone()))
        })
        .collect();

    // Stable, equal distances keep the catalog order.
    links.sort_by_key(|(remaining, _)| *remaining);
    links.into_iter().map(|(_, link)| link).collect()
}

/// Follow the link path hop by hop, starting from documents of its first collection.
///
/// Returns `None` as soon as a hop references nothing.
async fn walk_to_ancestor<S: EntityStore>(
    context: ParentContext<'_>,
    store: &S,
    node: &HierarchyNode,
    path: &[String],
    mut current: Vec<Document>,
) -> Result<Option<Vec<Document>>, ParentError<S::Error>> {
    if current.is_empty() {
        return Ok(None);
    }

    for hop in path.windows(2) {
        let (from, to) = (&hop[0], &hop[1]);
        let link = context
            .catalog
            .link_between(from, to)
            .ok_or_else(|| ParentError::MissingLink {
                path: path.to_vec(),
                from: from.clone(),
                to: to.clone(),
            })?;

        let ids: BTreeSet<InstanceId> = current
            .iter()
            .flat_map(|document| document.link_values(&link.field.name))
            .cloned()
            .collect();
        if ids.is_empty() {
            trace!(entity = %node.entity, %from, %to, "link path interrupted");
            return Ok(None);
        }

        current = find_by_ids_batched(store, to, &ids, context.batch_size)
            .await
            .map_err(ParentError::Store)?;
        if current.is_empty() {
            return Ok(None);
        }
    }

    Ok(Some(current))
}

/// The document followed by all of its ancestor instances, breadth-first.
///
/// Parents of all documents on one level are resolved concurrently. Every instance is visited
/// once, even if it is reachable through multiple parents.
pub(crate) async fn ancestry<S: EntityStore>(
    context: ParentContext<'_>,
    store: &S,
    document: &Document,
) -> Result<Vec<Ancestor>, ParentError<S::Error>> {
    let mut visited = HashSet::from([document.id.clone()]);
    let mut ancestry = vec![Ancestor {
        document: document.clone(),
        distance: 0,
    }];
    let mut level = vec![document.clone()];
    let mut distance = 0;

    while !level.is_empty() {
        distance += 1;
        let parents = try_join_all(
            level
                .iter()
                .map(|document| resolve_parents(context, store, document)),
        )
        .await?;

        level = Vec::new();
        for parent in parents.into_iter().flatten() {
            if visited.insert(parent.id.clone()) {
                ancestry.push(Ancestor {
                    document: parent.clone(),
                    distance,
                });
                level.push(parent);
            }
        }
    }

    Ok(ancestry)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::catalog::LinkCatalog;
    use crate::graph::LinkGraph;
    use crate::hierarchy::Hierarchy;
    use crate::schema::{Document, EntityType, HierarchyKind, LinkField, Schema};
    use crate::store::EntityMemoryStore;

    use super::{ParentContext, ParentError, ancestry, resolve_parents};

    struct Fixture {
        hierarchy: Hierarchy,
        catalog: LinkCatalog,
        graph: LinkGraph,
    }

    impl Fixture {
        fn new() -> Self {
            let schema = Schema::new(vec![
                EntityType::new("organization").member_of(HierarchyKind::Resource),
                EntityType::new("blog").link(
                    LinkField::new("organizationId", "organization")
                        .parent_of(HierarchyKind::Resource),
                ),
                EntityType::new("post")
                    .link(LinkField::new("blogId", "blog").parent_of(HierarchyKind::Resource)),
                EntityType::new("comment")
                    .link(LinkField::new("postId", "post").parent_of(HierarchyKind::Resource))
                    .link(LinkField::new("threadId", "thread")),
                EntityType::new("thread").link(LinkField::new("blogId", "blog")),
            ])
            .unwrap();
            let catalog = LinkCatalog::new(&schema);
            let graph = LinkGraph::new(&catalog);
            let hierarchy = Hierarchy::classify(&schema, HierarchyKind::Resource).unwrap();
            Self {
                hierarchy,
                catalog,
                graph,
            }
        }

        fn context(&self) -> ParentContext<'_> {
            ParentContext {
                hierarchy: &self.hierarchy,
                catalog: &self.catalog,
                graph: &self.graph,
                batch_size: 2,
            }
        }
    }

    fn store() -> EntityMemoryStore {
        let store = EntityMemoryStore::new();
        store.insert(Document::new("organization", "o1"));
        store.insert(Document::new("blog", "b1").link("organizationId", ["o1"]));
        store.insert(Document::new("post", "p1").link("blogId", ["b1"]));
        store.insert(Document::new("thread", "t1").link("blogId", ["b1"]));
        store
    }

    #[tokio::test]
    async fn direct_parent_link() {
        let fixture = Fixture::new();
        let store = store();
        let comment = Document::new("comment", "c1").link("postId", ["p1"]);

        let parents = resolve_parents(fixture.context(), &store, &comment)
            .await
            .unwrap();
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].id, "p1".into());
    }

    #[tokio::test]
    async fn falls_back_to_link_path() {
        let fixture = Fixture::new();
        let store = store();

        // No post reference, but the thread leads to the blog in two hops.
        let comment = Document::new("comment", "c2").link("threadId", ["t1"]);
        let parents = resolve_parents(fixture.context(), &store, &comment)
            .await
            .unwrap();
        assert_eq!(parents, vec![Document::new("blog", "b1").link("organizationId", ["o1"])]);

        // Neither link is set, this comment is a root.
        let orphan = Document::new("comment", "c3");
        let parents = resolve_parents(fixture.context(), &store, &orphan)
            .await
            .unwrap();
        assert!(parents.is_empty());
    }

    #[tokio::test]
    async fn ancestry_breadth_first() {
        let fixture = Fixture::new();
        let store = store();
        let comment = Document::new("comment", "c1").link("postId", ["p1"]);

        let ancestors = ancestry(fixture.context(), &store, &comment).await.unwrap();
        let ids: Vec<_> = ancestors
            .iter()
            .map(|ancestor| (ancestor.document.id.to_string(), ancestor.distance))
            .collect();
        assert_eq!(
            ids,
            vec![
                ("c1".to_string(), 0),
                ("p1".to_string(), 1),
                ("b1".to_string(), 2),
                ("o1".to_string(), 3)
            ]
        );
    }

    #[tokio::test]
    async fn unknown_collection() {
        let fixture = Fixture::new();
        let store = store();
        let tag = Document::new("tag", "x1");

        assert_matches!(
            resolve_parents(fixture.context(), &store, &tag).await,
            Err(ParentError::NotInHierarchy(collection, HierarchyKind::Resource))
                if collection == "tag"
        );
    }
}
