// SPDX-License-Identifier: MIT OR Apache-2.0

//! Directed graph over all entity types with precomputed all-pairs shortest paths.
use std::collections::{BTreeSet, HashMap};

use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;
use tracing::debug;

use crate::catalog::{Direction, LinkCatalog};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("unknown collection {0} in link graph")]
    UnknownCollection(String),

    #[error("no path from {0} to {1} in link graph")]
    NoPath(String, String),

    #[error("path from {0} to {1} could not be reconstructed at {2}")]
    MalformedPath(String, String, String),
}

/// Link graph between entity types.
///
/// Every non-excluded link field adds a directed edge from the entity type holding it to the
/// entity type it references. Distances and first hops are computed once at construction and are
/// read-only afterwards.
#[derive(Debug)]
pub struct LinkGraph {
    graph: DiGraph<String, String>,
    indices: HashMap<String, NodeIndex>,
    dist: Vec<Vec<Option<usize>>>,
    next: Vec<Vec<Option<usize>>>,
}

impl LinkGraph {
    pub fn new(catalog: &LinkCatalog) -> Self {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();
        for name in catalog.collections() {
            let index = graph.add_node(name.clone());
            indices.insert(name.clone(), index);
        }

        for name in catalog.collections() {
            let source = indices[name];
            for link in catalog.links(name, Direction::Outgoing, None).iter() {
                if link.field.excluded {
                    continue;
                }
                let target = indices[link.target()];
                graph.add_edge(source, target, link.field.name.clone());
            }
        }

        let (dist, next) = shortest_paths(&graph);

        debug!(
            collections = graph.node_count(),
            links = graph.edge_count(),
            "built link graph"
        );

        Self {
            graph,
            indices,
            dist,
            next,
        }
    }

    /// Collections directly linked from the given collection.
    pub fn neighbors(&self, collection: &str) -> BTreeSet<&str> {
        self.indices
            .get(collection)
            .map(|index| {
                self.graph
                    .neighbors(*index)
                    .map(|neighbor| self.graph[neighbor].as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns `true` if `from` holds a link to `to`.
    pub fn is_linked(&self, from: &str, to: &str) -> bool {
        match (self.indices.get(from), self.indices.get(to)) {
            (Some(from), Some(to)) => self.graph.contains_edge(*from, *to),
            _ => false,
        }
    }

    /// Number of hops on the shortest path, `None` if `to` is unreachable.
    pub fn distance(&self, from: &str, to: &str) -> Option<usize> {
        let from = self.indices.get(from)?.index();
        let to = self.indices.get(to)?.index();
        self.dist[from][to]
    }

    /// Shortest path between two collections including both endpoints.
    ///
    /// Returns an empty path if `to` is unreachable from `from`.
    pub fn shortest_path(&self, from: &str, to: &str) -> Result<Vec<String>, GraphError> {
        let start = self.index_of(from)?;
        let end = self.index_of(to)?;

        if self.dist[start][end].is_none() {
            return Ok(Vec::new());
        }

        let mut path = vec![from.to_string()];
        let mut current = start;
        while current != end {
            current = self.next[current][end].ok_or_else(|| {
                GraphError::MalformedPath(
                    from.to_string(),
                    to.to_string(),
                    self.graph[NodeIndex::new(current)].clone(),
                )
            })?;
            path.push(self.graph[NodeIndex::new(current)].clone());

            if path.len() > self.graph.node_count() {
                return Err(GraphError::MalformedPath(
                    from.to_string(),
                    to.to_string(),
                    self.graph[NodeIndex::new(current)].clone(),
                ));
            }
        }

        Ok(path)
    }

    /// Shortest path which must exist, failing with [`GraphError::NoPath`] otherwise.
    pub fn require_path(&self, from: &str, to: &str) -> Result<Vec<String>, GraphError> {
        let path = self.shortest_path(from, to)?;
        if path.is_empty() {
            return Err(GraphError::NoPath(from.to_string(), to.to_string()));
        }
        Ok(path)
    }

    fn index_of(&self, collection: &str) -> Result<usize, GraphError> {
        self.indices
            .get(collection)
            .map(|index| index.index())
            .ok_or_else(|| GraphError::UnknownCollection(collection.to_string()))
    }
}

type Matrix = Vec<Vec<Option<usize>>>;

/// All-pairs shortest paths with first-hop reconstruction table.
fn shortest_paths(graph: &DiGraph<String, String>) -> (Matrix, Matrix) {
    let n = graph.node_count();
    let mut dist: Matrix = vec![vec![None; n]; n];
    let mut next: Matrix = vec![vec![None; n]; n];

    for a in 0..n {
        dist[a][a] = Some(0);
        next[a][a] = Some(a);
    }

    for edge in graph.raw_edges() {
        let (a, b) = (edge.source().index(), edge.target().index());
        if a != b {
            dist[a][b] = Some(1);
            next[a][b] = Some(b);
        }
    }

    for via in 0..n {
        for from in 0..n {
            let Some(first) = dist[from][via] else {
                continue;
            };
            for to in 0..n {
                let Some(second) = dist[via][to] else {
                    continue;
                };
                let through = first + second;
                if dist[from][to].is_none_or(|direct| through < direct) {
                    dist[from][to] = Some(through);
                    next[from][to] = next[from][via];
                }
            }
        }
    }

    (dist, next)
}

#[cfg(test)]
mod tests {
    use petgraph::algo::floyd_warshall;

    use crate::catalog::LinkCatalog;
    use crate::schema::{EntityType, HierarchyKind, LinkField, Schema};

    use super::{GraphError, LinkGraph};

    fn graph() -> LinkGraph {
        let schema = Schema::new(vec![
            EntityType::new("organization"),
            EntityType::new("blog").link(
                LinkField::new("organizationId", "organization").parent_of(HierarchyKind::Resource),
            ),
            EntityType::new("post")
                .link(LinkField::new("blogId", "blog").parent_of(HierarchyKind::Resource)),
            EntityType::new("comment")
                .link(LinkField::new("postId", "post").parent_of(HierarchyKind::Resource))
                .link(LinkField::new("replyToId", "comment"))
                .link(LinkField::new("organizationId", "organization").excluded()),
            EntityType::new("tag"),
        ])
        .unwrap();
        LinkGraph::new(&LinkCatalog::new(&schema))
    }

    #[test]
    fn reconstructs_shortest_paths() {
        let graph = graph();

        assert_eq!(
            graph.shortest_path("comment", "organization").unwrap(),
            vec!["comment", "post", "blog", "organization"]
        );
        assert_eq!(graph.distance("comment", "organization"), Some(3));
        assert_eq!(graph.shortest_path("post", "post").unwrap(), vec!["post"]);
    }

    #[test]
    fn unreachable_collections() {
        let graph = graph();

        assert!(graph.shortest_path("organization", "post").unwrap().is_empty());
        assert_eq!(graph.distance("tag", "post"), None);
        assert_eq!(
            graph.require_path("organization", "post"),
            Err(GraphError::NoPath("organization".into(), "post".into()))
        );
        assert_eq!(
            graph.shortest_path("unknown", "post"),
            Err(GraphError::UnknownCollection("unknown".into()))
        );
    }

    #[test]
    fn paths_follow_direct_edges() {
        let graph = graph();
        let names = ["organization", "blog", "post", "comment", "tag"];

        for from in names {
            for to in names {
                let Some(distance) = graph.distance(from, to) else {
                    continue;
                };
                let path = graph.shortest_path(from, to).unwrap();
                assert_eq!(path.len(), distance + 1);
                for hop in path.windows(2) {
                    assert!(graph.is_linked(&hop[0], &hop[1]));
                }
            }
        }
    }

    #[test]
    fn distances_agree_with_petgraph() {
        let graph = graph();
        let expected = floyd_warshall(&graph.graph, |_| 1usize).unwrap();

        for ((from, to), distance) in expected {
            if from == to {
                continue;
            }
            let from = &graph.graph[from];
            let to = &graph.graph[to];
            if distance == usize::MAX {
                assert_eq!(graph.distance(from, to), None);
            } else {
                assert_eq!(graph.distance(from, to), Some(distance));
            }
        }
    }

    #[test]
    fn excluded_links_are_not_edges() {
        let graph = graph();
        assert!(!graph.is_linked("comment", "organization"));
        assert!(graph.neighbors("comment").contains("post"));
        assert!(graph.neighbors("comment").contains("comment"));
    }
}
