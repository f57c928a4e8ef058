// SPDX-License-Identifier: MIT OR Apache-2.0

//! Subject and resource hierarchies derived from tagged "owned-by" links.
//!
//! Every entity type may name at most one immediate parent per hierarchy by tagging one of its
//! link fields. The target of such a link joins the hierarchy as well, as do entity types which
//! are explicitly declared members (usually roots like an organisation).
mod parents;

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::schema::{HierarchyKind, Schema};

pub use parents::{Ancestor, ParentError};
pub(crate) use parents::{ParentContext, ancestry, resolve_parents};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HierarchyError {
    #[error("entity type {entity} declares multiple {kind} parents: {fields:?}")]
    MultipleParents {
        entity: String,
        kind: HierarchyKind,
        fields: Vec<String>,
    },

    #[error("{kind} hierarchy contains a cycle through {entity}")]
    Cycle { entity: String, kind: HierarchyKind },
}

/// Link field on an entity type pointing at its immediate parent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParentLink {
    pub field: String,
    pub target: String,
}

/// One entity type as a participant of the subject or resource hierarchy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HierarchyNode {
    pub entity: String,
    pub kind: HierarchyKind,
    pub parent: Option<ParentLink>,

    /// Ancestor entity types ordered from the immediate parent to the root.
    pub ancestors: Vec<String>,

    /// Length of the chain from the root down to and including this node, roots have depth 1.
    pub depth: usize,
}

impl HierarchyNode {
    /// This entity type followed by all of its ancestors.
    pub fn class_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.ancestors.len() + 1);
        names.push(self.entity.clone());
        names.extend(self.ancestors.iter().cloned());
        names
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Arena of hierarchy nodes of one kind, indexed by entity type name.
#[derive(Clone, Debug)]
pub struct Hierarchy {
    kind: HierarchyKind,
    nodes: Vec<HierarchyNode>,
    indices: HashMap<String, usize>,
}

impl Hierarchy {
    pub fn classify(schema: &Schema, kind: HierarchyKind) -> Result<Self, HierarchyError> {
        let mut parents: HashMap<&str, ParentLink> = HashMap::new();
        let mut members: Vec<&str> = Vec::new();

        for entity in schema.entities() {
            let tagged: Vec<_> = entity
                .links
                .iter()
                .filter(|link| link.is_tagged(kind))
                .collect();

            if tagged.len() > 1 {
                return Err(HierarchyError::MultipleParents {
                    entity: entity.name.clone(),
                    kind,
                    fields: tagged.iter().map(|link| link.name.clone()).collect(),
                });
            }

            if let Some(link) = tagged.first() {
                parents.insert(
                    entity.name.as_str(),
                    ParentLink {
                        field: link.name.clone(),
                        target: link.target.clone(),
                    },
                );
                members.push(entity.name.as_str());
                members.push(link.target.as_str());
            } else if entity.hierarchy.contains(&kind) {
                members.push(entity.name.as_str());
            }
        }

        // Keep schema declaration order for a deterministic arena layout.
        let mut nodes = Vec::new();
        let mut indices = HashMap::new();
        for entity in schema.entities() {
            if !members.contains(&entity.name.as_str()) {
                continue;
            }

            let parent = parents.get(entity.name.as_str()).cloned();
            let mut ancestors = Vec::new();
            let mut current = parent.as_ref();
            while let Some(link) = current {
                if link.target == entity.name || ancestors.contains(&link.target) {
                    return Err(HierarchyError::Cycle {
                        entity: entity.name.clone(),
                        kind,
                    });
                }
                ancestors.push(link.target.clone());
                current = parents.get(link.target.as_str());
            }

            indices.insert(entity.name.clone(), nodes.len());
            nodes.push(HierarchyNode {
                entity: entity.name.clone(),
                kind,
                parent,
                depth: ancestors.len() + 1,
                ancestors,
            });
        }

        debug!(%kind, nodes = nodes.len(), "classified hierarchy");

        Ok(Self {
            kind,
            nodes,
            indices,
        })
    }

    pub fn kind(&self) -> HierarchyKind {
        self.kind
    }

    pub fn node(&self, entity: &str) -> Option<&HierarchyNode> {
        self.indices.get(entity).map(|index| &self.nodes[*index])
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.indices.contains_key(entity)
    }

    pub fn depth(&self, entity: &str) -> Option<usize> {
        self.node(entity).map(|node| node.depth)
    }

    /// Entity type and all of its ancestors, empty if not part of this hierarchy.
    pub fn class_names(&self, entity: &str) -> Vec<String> {
        self.node(entity)
            .map(HierarchyNode::class_names)
            .unwrap_or_default()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &HierarchyNode> {
        self.nodes.iter()
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|node| node.entity.as_str())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::schema::{EntityType, HierarchyKind, LinkField, Schema};

    use super::{Hierarchy, HierarchyError, ParentLink};

    fn schema() -> Schema {
        Schema::new(vec![
            EntityType::new("organization")
                .member_of(HierarchyKind::Subject)
                .member_of(HierarchyKind::Resource),
            EntityType::new("team").link(
                LinkField::new("organizationId", "organization").parent_of(HierarchyKind::Subject),
            ),
            EntityType::new("user").link(
                LinkField::new("teamIds", "team")
                    .array()
                    .parent_of(HierarchyKind::Subject),
            ),
            EntityType::new("blog").link(
                LinkField::new("organizationId", "organization").parent_of(HierarchyKind::Resource),
            ),
            EntityType::new("post")
                .link(LinkField::new("blogId", "blog").parent_of(HierarchyKind::Resource))
                .link(LinkField::new("authorId", "user")),
            EntityType::new("tag"),
        ])
        .unwrap()
    }

    #[test]
    fn classify_subjects_and_resources() {
        let schema = schema();
        let subjects = Hierarchy::classify(&schema, HierarchyKind::Subject).unwrap();
        let resources = Hierarchy::classify(&schema, HierarchyKind::Resource).unwrap();

        assert_eq!(
            subjects.entity_names().collect::<Vec<_>>(),
            vec!["organization", "team", "user"]
        );
        assert_eq!(
            resources.entity_names().collect::<Vec<_>>(),
            vec!["organization", "blog", "post"]
        );
        assert!(!resources.contains("tag"));

        let post = resources.node("post").unwrap();
        assert_eq!(
            post.parent,
            Some(ParentLink {
                field: "blogId".into(),
                target: "blog".into()
            })
        );
        assert_eq!(post.ancestors, vec!["blog", "organization"]);
        assert_eq!(post.depth, 3);
        assert!(resources.node("organization").unwrap().is_root());
        assert_eq!(
            resources.class_names("blog"),
            vec!["blog".to_string(), "organization".to_string()]
        );
    }

    #[test]
    fn multiple_parents_are_rejected() {
        let schema = Schema::new(vec![
            EntityType::new("blog"),
            EntityType::new("organization"),
            EntityType::new("post")
                .link(LinkField::new("blogId", "blog").parent_of(HierarchyKind::Resource))
                .link(
                    LinkField::new("organizationId", "organization")
                        .parent_of(HierarchyKind::Resource),
                ),
        ])
        .unwrap();

        assert_matches!(
            Hierarchy::classify(&schema, HierarchyKind::Resource),
            Err(HierarchyError::MultipleParents { entity, .. }) if entity == "post"
        );

        // One parent per kind is fine.
        assert!(Hierarchy::classify(&schema, HierarchyKind::Subject).is_ok());
    }

    #[test]
    fn cycles_are_rejected() {
        let schema = Schema::new(vec![
            EntityType::new("a")
                .link(LinkField::new("bId", "b").parent_of(HierarchyKind::Resource)),
            EntityType::new("b")
                .link(LinkField::new("aId", "a").parent_of(HierarchyKind::Resource)),
        ])
        .unwrap();

        assert_matches!(
            Hierarchy::classify(&schema, HierarchyKind::Resource),
            Err(HierarchyError::Cycle { .. })
        );
    }
}
