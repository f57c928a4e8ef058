// SPDX-License-Identifier: MIT OR Apache-2.0

//! Record of how a compiled filter came about, for debugging authorization decisions.
use std::collections::{BTreeMap, HashMap};

use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::schema::InstanceId;
use crate::store::GrantRecord;

/// Grant record which decided the classification of an id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantSource {
    pub subject_id: InstanceId,
    pub subject_type: String,
    pub resource_id: InstanceId,
    pub resource_type: String,

    /// Permission string of the access entry which decided.
    pub permission: String,
    pub allowed: bool,
}

impl GrantSource {
    pub(crate) fn new(record: &GrantRecord, permission: &str, allowed: bool) -> Self {
        Self {
            subject_id: record.subject_id.clone(),
            subject_type: record.subject_type.clone(),
            resource_id: record.resource_id.clone(),
            resource_type: record.resource_type.clone(),
            permission: permission.to_string(),
            allowed,
        }
    }
}

/// Classification of one id under one restricted field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceEntry {
    /// Field of the queried collection the id is matched against.
    pub field: String,
    pub id: InstanceId,
    pub allowed: bool,

    /// Resource hierarchy depth of the grants' collection.
    pub depth: usize,

    /// Collections the grant was projected through, from the queried collection to the grant's
    /// collection. Empty for grants applied directly.
    pub path: Vec<String>,

    /// Grants of the deciding polarity. Projected ids are attributed to every grant of their
    /// collection with that polarity.
    pub grants: Vec<GrantSource>,
}

/// Subject instance and the instances it inherits grants from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectNode {
    pub collection: String,
    pub parents: Vec<InstanceId>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub collection: String,

    /// Evaluated permissions, the queried one first followed by its ancestors.
    pub permissions: Vec<String>,

    /// Entries in the order ids were classified.
    pub entries: Vec<ProvenanceEntry>,

    /// Ancestor adjacency of the subject.
    pub subjects: BTreeMap<InstanceId, SubjectNode>,
}

impl Provenance {
    /// Entries classifying the given id, in any restricted field.
    pub fn entries_for<'a>(
        &'a self,
        id: &'a InstanceId,
    ) -> impl Iterator<Item = &'a ProvenanceEntry> {
        self.entries.iter().filter(move |entry| &entry.id == id)
    }

    /// Render subjects, grants and classified ids as a Graphviz graph.
    pub fn display(&self) -> String {
        let mut graph: DiGraph<String, String> = DiGraph::new();
        let mut nodes: HashMap<String, NodeIndex> = HashMap::new();
        let mut node = |graph: &mut DiGraph<String, String>, label: String| {
            *nodes
                .entry(label.clone())
                .or_insert_with(|| graph.add_node(label))
        };

        for (id, subject) in &self.subjects {
            let child = node(&mut graph, format!("{} {}", subject.collection, id));
            for parent in &subject.parents {
                let collection = self
                    .subjects
                    .get(parent)
                    .map(|parent| parent.collection.as_str())
                    .unwrap_or_default();
                let parent = node(&mut graph, format!("{collection} {parent}"));
                graph.add_edge(child, parent, "parent".to_string());
            }
        }

        for entry in &self.entries {
            let classified = node(&mut graph, format!("{} = {}", entry.field, entry.id));
            for grant in &entry.grants {
                let subject = node(
                    &mut graph,
                    format!("{} {}", grant.subject_type, grant.subject_id),
                );
                let resource = node(
                    &mut graph,
                    format!("{} {}", grant.resource_type, grant.resource_id),
                );
                if graph.find_edge(subject, resource).is_none() {
                    graph.add_edge(subject, resource, grant.permission.clone());
                }
                let label = if entry.allowed { "allow" } else { "deny" };
                graph.add_edge(resource, classified, label.to_string());
            }
        }

        let dot = Dot::with_attr_getters(
            &graph,
            &[Config::NodeNoLabel, Config::EdgeNoLabel],
            &|_, edge| format!("label = \"{}\"", edge.weight()),
            &|_, (_, label)| format!("label = \"{}\"", label),
        );

        format!("{:?}", dot)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{GrantSource, Provenance, ProvenanceEntry, SubjectNode};

    fn provenance() -> Provenance {
        Provenance {
            collection: "post".into(),
            permissions: vec!["view-post".into(), "edit-post".into()],
            entries: vec![ProvenanceEntry {
                field: "blogId".into(),
                id: "blog1".into(),
                allowed: true,
                depth: 1,
                path: vec!["post".into(), "blog".into(), "organization".into()],
                grants: vec![GrantSource {
                    subject_id: "u1".into(),
                    subject_type: "user".into(),
                    resource_id: "org1".into(),
                    resource_type: "organization".into(),
                    permission: "view-post".into(),
                    allowed: true,
                }],
            }],
            subjects: BTreeMap::from([
                (
                    "u1".into(),
                    SubjectNode {
                        collection: "user".into(),
                        parents: vec!["team1".into()],
                    },
                ),
                (
                    "team1".into(),
                    SubjectNode {
                        collection: "team".into(),
                        parents: vec![],
                    },
                ),
            ]),
        }
    }

    #[test]
    fn render_dot() {
        let dot = provenance().display();
        assert!(dot.starts_with("digraph"));
        assert!(dot.contains("label = \"user u1\""));
        assert!(dot.contains("label = \"blogId = blog1\""));
        assert!(dot.contains("label = \"parent\""));
        assert!(dot.contains("label = \"allow\""));
        assert!(dot.contains("label = \"view-post\""));
    }

    #[test]
    fn serialize_provenance() {
        let provenance = provenance();
        let json = serde_json::to_value(&provenance).unwrap();
        assert_eq!(json["entries"][0]["grants"][0]["resource_id"], "org1");
        assert_eq!(json["subjects"]["u1"]["parents"][0], "team1");

        let decoded: Provenance = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, provenance);
        assert_eq!(decoded.entries_for(&"blog1".into()).count(), 1);
    }
}
