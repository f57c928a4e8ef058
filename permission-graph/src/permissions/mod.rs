// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hierarchy of permission types.
//!
//! Permission types are declared once as a flat list and compiled into a directed acyclic graph.
//! There are three kinds of declared permission types:
//!
//! 1. Abstract permissions like `manageUsers` which are not tied to any resource collection.
//! 2. Collection permissions like `create-post` which are inherently scoped to one collection.
//! 3. Generic actions like `view` which are instantiated once per resource collection, resulting
//!    in permission strings like `view-post` or `view-blog`.
//!
//! A generic action may inherit from other actions (`view` from `edit`), the instantiated
//! permission then inherits from the parent action instantiated on the same collection
//! (`view-post` from `edit-post`). Parents can also be named with an explicit collection
//! (`edit-organization`), such nodes are synthesized during compilation.
mod allow_list;

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::prelude::DiGraphMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::cache::MemoCache;
use crate::hierarchy::Hierarchy;

pub use allow_list::AllowList;

/// Separator between action and collection in a permission string.
pub const SEPARATOR: char = '-';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PermissionError {
    #[error("permission type {0} is declared more than once")]
    Duplicate(String),

    #[error("permission type name {0:?} is invalid")]
    InvalidName(String),

    #[error("permission type {0} must declare whether it is abstract")]
    MissingAbstractFlag(String),

    #[error("permission type {0} can not be abstract and collection scoped at once")]
    ConflictingFlags(String),

    #[error("permission type {permission} names unknown parent {parent}")]
    UnknownParent { permission: String, parent: String },

    #[error("permission {permission} references {collection} which is not a resource collection")]
    UnknownCollection {
        permission: String,
        collection: String,
    },

    #[error("abstract permission {permission} may not inherit from generic action {parent}")]
    InvalidAbstractParent { permission: String, parent: String },

    #[error("permission hierarchy contains a cycle through {0}")]
    Cycle(String),

    #[error("collection {collection} declares unknown permission {permission} in its rules")]
    UnknownRule {
        collection: String,
        permission: String,
    },

    #[error("no permission type given")]
    Missing,

    #[error("unknown permission {0}")]
    Unknown(String),

    #[error("permission {permission} is not valid for collection {collection}")]
    InvalidForCollection {
        permission: String,
        collection: String,
    },

    #[error("permission {permission} is not allowed on collection {collection}")]
    NotAllowed {
        permission: String,
        collection: String,
    },
}

/// Declaration of a permission type, as loaded from configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionType {
    pub name: String,

    /// Must be set explicitly unless the permission is collection scoped.
    #[serde(rename = "abstract", default)]
    pub is_abstract: Option<bool>,

    #[serde(default)]
    pub collection: bool,

    #[serde(default)]
    pub parents: Vec<String>,

    /// Human readable description template with `{action}` and `{collection}` placeholders.
    #[serde(default)]
    pub format: Option<String>,
}

impl PermissionType {
    /// Generic action, instantiated once per resource collection.
    pub fn action(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_abstract: Some(false),
            collection: false,
            parents: Vec::new(),
            format: None,
        }
    }

    pub fn abstract_permission(name: impl Into<String>) -> Self {
        Self {
            is_abstract: Some(true),
            ..Self::action(name)
        }
    }

    /// Permission scoped to one collection, named `<action>-<collection>`.
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            is_abstract: None,
            collection: true,
            ..Self::action(name)
        }
    }

    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parents.push(parent.into());
        self
    }

    pub fn format(mut self, template: impl Into<String>) -> Self {
        self.format = Some(template.into());
        self
    }
}

/// Permission types used when none are configured: `edit`, `view` (inheriting from `edit`) and
/// `delete`.
pub fn default_permission_types() -> Vec<PermissionType> {
    vec![
        PermissionType::action("edit"),
        PermissionType::action("view").parent("edit"),
        PermissionType::action("delete"),
    ]
}

/// Permission string split into its action and optional collection.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Permission {
    pub action: String,
    pub collection: Option<String>,
}

impl Permission {
    pub fn new(action: impl Into<String>, collection: Option<String>) -> Self {
        Self {
            action: action.into(),
            collection,
        }
    }

    /// Split at the first separator, action names never contain one.
    pub fn parse(value: &str) -> Self {
        match value.split_once(SEPARATOR) {
            Some((action, collection)) => Self::new(action, Some(collection.to_string())),
            None => Self::new(value, None),
        }
    }
}

impl Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.collection {
            Some(collection) => write!(f, "{}{SEPARATOR}{}", self.action, collection),
            None => write!(f, "{}", self.action),
        }
    }
}

impl FromStr for Permission {
    type Err = PermissionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.is_empty() {
            return Err(PermissionError::Missing);
        }
        Ok(Self::parse(value))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    Abstract,
    Collection,
    Generic,

    /// `<action>-<collection>` node synthesized from a parent reference.
    Scoped,
}

/// Compiled node of the permission hierarchy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermissionNode {
    pub name: String,
    pub kind: PermissionKind,
    pub format: Option<String>,

    /// Declared parent names.
    pub parents: Vec<String>,
}

/// Compiled, immutable permission hierarchy with memoised parent and child lookups.
#[derive(Debug)]
pub struct PermissionHierarchy {
    nodes: Vec<PermissionNode>,
    indices: HashMap<String, usize>,
    resources: Vec<String>,
    all: Vec<String>,
    known: HashSet<String>,
    ancestors: MemoCache<Permission, [String]>,
    descendants: MemoCache<Permission, [String]>,
}

impl PermissionHierarchy {
    /// Validate, order and expand the declared permission types against the resource hierarchy.
    pub fn build(
        declared: &[PermissionType],
        resources: &Hierarchy,
    ) -> Result<Self, PermissionError> {
        let resource_names: Vec<String> = resources.entity_names().map(str::to_string).collect();

        let mut by_name: HashMap<&str, &PermissionType> = HashMap::new();
        for permission in declared {
            validate_declaration(permission, &resource_names)?;
            if by_name.insert(permission.name.as_str(), permission).is_some() {
                return Err(PermissionError::Duplicate(permission.name.clone()));
            }
        }

        // Edges point from a parent (or the action of a scoped parent) to its dependent.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for permission in declared {
            graph.add_node(permission.name.as_str());
        }
        for permission in declared {
            for parent in &permission.parents {
                let dependency = if by_name.contains_key(parent.as_str()) {
                    parent.as_str()
                } else {
                    let action = parent.split(SEPARATOR).next().unwrap_or(parent);
                    validate_scoped_parent(permission, parent, action, &by_name, &resource_names)?;
                    action
                };
                graph.add_edge(dependency, permission.name.as_str(), ());
            }
        }

        let sorted = toposort(&graph, None)
            .map_err(|cycle| PermissionError::Cycle(cycle.node_id().to_string()))?;

        let mut nodes: Vec<PermissionNode> = Vec::new();
        let mut indices: HashMap<String, usize> = HashMap::new();
        for name in sorted {
            let Some(permission) = by_name.get(name) else {
                continue;
            };

            for parent in &permission.parents {
                if by_name.contains_key(parent.as_str()) || indices.contains_key(parent) {
                    continue;
                }
                let action = Permission::parse(parent).action;
                indices.insert(parent.clone(), nodes.len());
                nodes.push(PermissionNode {
                    name: parent.clone(),
                    kind: PermissionKind::Scoped,
                    format: None,
                    parents: vec![action],
                });
            }

            let kind = if permission.collection {
                PermissionKind::Collection
            } else if permission.is_abstract == Some(true) {
                PermissionKind::Abstract
            } else {
                PermissionKind::Generic
            };

            if kind == PermissionKind::Abstract {
                for parent in &permission.parents {
                    let generic = by_name.get(parent.as_str()).is_some_and(|parent| {
                        parent.is_abstract == Some(false) && !parent.collection
                    });
                    if generic {
                        return Err(PermissionError::InvalidAbstractParent {
                            permission: permission.name.clone(),
                            parent: parent.clone(),
                        });
                    }
                }
            }

            indices.insert(permission.name.clone(), nodes.len());
            nodes.push(PermissionNode {
                name: permission.name.clone(),
                kind,
                format: permission.format.clone(),
                parents: permission.parents.clone(),
            });
        }

        let mut all = Vec::new();
        let mut known = HashSet::new();
        for node in &nodes {
            let names = match node.kind {
                PermissionKind::Generic => resource_names
                    .iter()
                    .map(|collection| format!("{}{SEPARATOR}{}", node.name, collection))
                    .collect(),
                _ => vec![node.name.clone()],
            };
            for name in names {
                if known.insert(name.clone()) {
                    all.push(name);
                }
            }
        }

        debug!(
            declared = declared.len(),
            nodes = nodes.len(),
            permissions = all.len(),
            "compiled permission hierarchy"
        );

        Ok(Self {
            nodes,
            indices,
            resources: resource_names,
            all,
            known,
            ancestors: MemoCache::default(),
            descendants: MemoCache::default(),
        })
    }

    /// Compiled nodes, every node is preceded by the nodes it depends on.
    pub fn nodes(&self) -> &[PermissionNode] {
        &self.nodes
    }

    pub fn node(&self, name: &str) -> Option<&PermissionNode> {
        self.indices.get(name).map(|index| &self.nodes[*index])
    }

    /// Every valid permission string.
    pub fn all_permission_types(&self) -> &[String] {
        &self.all
    }

    pub fn contains(&self, permission: &str) -> bool {
        self.known.contains(permission)
    }

    fn is_abstract(&self, action: &str) -> bool {
        self.node(action)
            .is_some_and(|node| node.kind == PermissionKind::Abstract)
    }

    fn is_generic(&self, action: &str) -> bool {
        self.node(action)
            .is_some_and(|node| node.kind == PermissionKind::Generic)
    }

    /// Inverse of parsing a permission string.
    pub fn format_permission_type(&self, action: &str, collection: &str) -> String {
        if self.is_abstract(action) {
            action.to_string()
        } else {
            Permission::new(action, Some(collection.to_string())).to_string()
        }
    }

    /// Canonical permission string for a query against the given collection.
    ///
    /// Bare generic actions are scoped to the collection. Fails if the result is not a known
    /// permission.
    pub fn normalize(&self, permission: &str, collection: &str) -> Result<String, PermissionError> {
        let parsed: Permission = permission.parse()?;

        let normalized = match parsed.collection {
            None if self.is_generic(&parsed.action) => {
                self.format_permission_type(&parsed.action, collection)
            }
            _ => permission.to_string(),
        };

        if self.contains(&normalized) {
            return Ok(normalized);
        }

        let parsed = Permission::parse(&normalized);
        match parsed.collection {
            Some(target)
                if self.is_generic(&parsed.action) && !self.resources.contains(&target) =>
            {
                Err(PermissionError::InvalidForCollection {
                    permission: normalized,
                    collection: collection.to_string(),
                })
            }
            _ => Err(PermissionError::Unknown(normalized)),
        }
    }

    /// Direct parents of a permission string.
    pub fn direct_parents(&self, permission: &str) -> Vec<String> {
        let parsed = Permission::parse(permission);

        let Some(node) = self.node(permission) else {
            return match parsed.collection {
                Some(collection) if self.is_generic(&parsed.action) => {
                    self.instantiated_parents(&parsed.action, &collection)
                }
                _ => Vec::new(),
            };
        };

        match (node.kind, parsed.collection) {
            (PermissionKind::Abstract, _) => node.parents.clone(),
            (PermissionKind::Collection, Some(collection)) => {
                let mut parents: Vec<String> = node
                    .parents
                    .iter()
                    .map(|parent| self.scope_parent(parent, &collection))
                    .collect();
                for parent in self.instantiated_parents(&parsed.action, &collection) {
                    if !parents.contains(&parent) {
                        parents.push(parent);
                    }
                }
                parents
            }
            (PermissionKind::Collection, None) => node.parents.clone(),
            (PermissionKind::Scoped, Some(collection)) if self.is_generic(&parsed.action) => {
                self.instantiated_parents(&parsed.action, &collection)
            }
            (PermissionKind::Scoped, _) => node.parents.clone(),
            (PermissionKind::Generic, _) => Vec::new(),
        }
    }

    fn instantiated_parents(&self, action: &str, collection: &str) -> Vec<String> {
        match self.node(action) {
            Some(node) if node.kind == PermissionKind::Generic => node
                .parents
                .iter()
                .map(|parent| self.scope_parent(parent, collection))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn scope_parent(&self, parent: &str, collection: &str) -> String {
        if self.is_generic(parent) {
            self.format_permission_type(parent, collection)
        } else {
            parent.to_string()
        }
    }

    /// All ancestors of a permission, nearest first, without the permission itself.
    pub fn parents(&self, permission: &str) -> Arc<[String]> {
        let key = Permission::parse(permission);
        self.ancestors.get_or_insert_with(key, || {
            let mut visited = HashSet::from([permission.to_string()]);
            let mut queue = VecDeque::from([permission.to_string()]);
            let mut ancestors = Vec::new();

            while let Some(current) = queue.pop_front() {
                for parent in self.direct_parents(&current) {
                    if visited.insert(parent.clone()) {
                        ancestors.push(parent.clone());
                        queue.push_back(parent);
                    }
                }
            }

            Arc::from(ancestors)
        })
    }

    /// All valid permissions which inherit from the given one.
    pub fn children(&self, permission: &str) -> Arc<[String]> {
        let key = Permission::parse(permission);
        self.descendants.get_or_insert_with(key, || {
            let children: Vec<String> = self
                .all
                .iter()
                .filter(|candidate| candidate.as_str() != permission)
                .filter(|candidate| {
                    self.parents(candidate)
                        .iter()
                        .any(|parent| parent == permission)
                })
                .cloned()
                .collect();
            Arc::from(children)
        })
    }

    /// The permission followed by all of its ancestors, the order in which grants are evaluated.
    pub fn expand(&self, permission: &str) -> Vec<String> {
        let mut expanded = vec![permission.to_string()];
        expanded.extend(self.parents(permission).iter().cloned());
        expanded
    }

    /// Human readable description from the permission's format template, or the permission
    /// string itself.
    pub fn describe(&self, permission: &str) -> String {
        let parsed = Permission::parse(permission);
        let template = self
            .node(permission)
            .or_else(|| self.node(&parsed.action))
            .and_then(|node| node.format.as_deref());

        match template {
            Some(template) => template
                .replace("{action}", &parsed.action)
                .replace("{collection}", parsed.collection.as_deref().unwrap_or_default()),
            None => permission.to_string(),
        }
    }
}

fn validate_declaration(
    permission: &PermissionType,
    resources: &[String],
) -> Result<(), PermissionError> {
    let name = &permission.name;
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(PermissionError::InvalidName(name.clone()));
    }

    if permission.collection {
        if permission.is_abstract == Some(true) {
            return Err(PermissionError::ConflictingFlags(name.clone()));
        }

        return match Permission::parse(name).collection {
            Some(collection) if resources.contains(&collection) => Ok(()),
            Some(collection) => Err(PermissionError::UnknownCollection {
                permission: name.clone(),
                collection,
            }),
            None => Err(PermissionError::InvalidName(name.clone())),
        };
    }

    if name.contains(SEPARATOR) {
        return Err(PermissionError::InvalidName(name.clone()));
    }

    if permission.is_abstract.is_none() {
        return Err(PermissionError::MissingAbstractFlag(name.clone()));
    }

    Ok(())
}

fn validate_scoped_parent(
    permission: &PermissionType,
    parent: &str,
    action: &str,
    declared: &HashMap<&str, &PermissionType>,
    resources: &[String],
) -> Result<(), PermissionError> {
    let unknown = || PermissionError::UnknownParent {
        permission: permission.name.clone(),
        parent: parent.to_string(),
    };

    let Some(collection) = Permission::parse(parent).collection else {
        return Err(unknown());
    };

    match declared.get(action) {
        Some(action) if !action.collection => (),
        _ => return Err(unknown()),
    }

    if !resources.contains(&collection) {
        return Err(PermissionError::UnknownCollection {
            permission: permission.name.clone(),
            collection,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::hierarchy::Hierarchy;
    use crate::schema::{EntityType, HierarchyKind, LinkField, Schema};

    use super::{
        Permission, PermissionError, PermissionHierarchy, PermissionKind, PermissionType,
        default_permission_types,
    };

    fn resources() -> Hierarchy {
        let schema = Schema::new(vec![
            EntityType::new("organization").member_of(HierarchyKind::Resource),
            EntityType::new("blog").link(
                LinkField::new("organizationId", "organization").parent_of(HierarchyKind::Resource),
            ),
            EntityType::new("post")
                .link(LinkField::new("blogId", "blog").parent_of(HierarchyKind::Resource)),
        ])
        .unwrap();
        Hierarchy::classify(&schema, HierarchyKind::Resource).unwrap()
    }

    #[test]
    fn parse_permission_strings() {
        assert_eq!(
            Permission::parse("view-post"),
            Permission::new("view", Some("post".into()))
        );
        assert_eq!(
            Permission::parse("create-blog-post"),
            Permission::new("create", Some("blog-post".into()))
        );
        assert_eq!(Permission::parse("manageUsers").to_string(), "manageUsers");
        assert_eq!("".parse::<Permission>(), Err(PermissionError::Missing));
    }

    #[test]
    fn expand_default_types() {
        let permissions =
            PermissionHierarchy::build(&default_permission_types(), &resources()).unwrap();

        let mut all = permissions.all_permission_types().to_vec();
        all.sort();
        assert_eq!(
            all,
            vec![
                "delete-blog",
                "delete-organization",
                "delete-post",
                "edit-blog",
                "edit-organization",
                "edit-post",
                "view-blog",
                "view-organization",
                "view-post",
            ]
        );

        // Parents precede their dependents.
        let position = |name: &str| {
            permissions
                .nodes()
                .iter()
                .position(|node| node.name == name)
                .unwrap()
        };
        assert!(position("edit") < position("view"));

        assert_eq!(&*permissions.parents("view-post"), &["edit-post".to_string()]);
        assert!(permissions.parents("edit-post").is_empty());
        assert_eq!(&*permissions.children("edit-blog"), &["view-blog".to_string()]);
        assert_eq!(
            permissions.expand("view-blog"),
            vec!["view-blog".to_string(), "edit-blog".to_string()]
        );
    }

    #[test]
    fn abstract_collection_and_scoped_parents() {
        let declared = vec![
            PermissionType::action("edit").parent("administrate-organization"),
            PermissionType::action("administrate"),
            PermissionType::action("view").parent("edit"),
            PermissionType::abstract_permission("manageUsers").parent("administrate-organization"),
            PermissionType::collection("publish-post")
                .parent("edit")
                .format("publish {collection}s"),
        ];
        let permissions = PermissionHierarchy::build(&declared, &resources()).unwrap();

        let scoped = permissions.node("administrate-organization").unwrap();
        assert_eq!(scoped.kind, PermissionKind::Scoped);
        assert_eq!(scoped.parents, vec!["administrate".to_string()]);

        assert_eq!(
            &*permissions.parents("view-post"),
            &[
                "edit-post".to_string(),
                "administrate-organization".to_string()
            ]
        );
        assert_eq!(
            &*permissions.parents("manageUsers"),
            &["administrate-organization".to_string()]
        );
        assert_eq!(
            &*permissions.parents("publish-post"),
            &[
                "edit-post".to_string(),
                "administrate-organization".to_string()
            ]
        );

        assert!(permissions.contains("manageUsers"));
        assert!(permissions.contains("publish-post"));
        assert!(!permissions.contains("publish-blog"));

        let children = permissions.children("administrate-organization");
        assert!(children.contains(&"manageUsers".to_string()));
        assert!(children.contains(&"view-blog".to_string()));
        assert!(!children.contains(&"administrate-organization".to_string()));

        assert_eq!(permissions.describe("publish-post"), "publish posts");
        assert_eq!(permissions.describe("view-post"), "view-post");
        assert_eq!(
            permissions.format_permission_type("manageUsers", "post"),
            "manageUsers"
        );
        assert_eq!(permissions.format_permission_type("view", "post"), "view-post");
    }

    #[test]
    fn normalize_query_permissions() {
        let declared = vec![
            PermissionType::action("view"),
            PermissionType::abstract_permission("manageUsers"),
        ];
        let permissions = PermissionHierarchy::build(&declared, &resources()).unwrap();

        assert_eq!(permissions.normalize("view", "post").unwrap(), "view-post");
        assert_eq!(permissions.normalize("view-blog", "post").unwrap(), "view-blog");
        assert_eq!(
            permissions.normalize("manageUsers", "post").unwrap(),
            "manageUsers"
        );
        assert_eq!(permissions.normalize("", "post"), Err(PermissionError::Missing));
        assert_matches!(
            permissions.normalize("view", "tag"),
            Err(PermissionError::InvalidForCollection { .. })
        );
        assert_matches!(
            permissions.normalize("destroy", "post"),
            Err(PermissionError::Unknown(name)) if name == "destroy"
        );
    }

    #[test]
    fn reject_invalid_declarations() {
        let resources = resources();

        let cycle = vec![
            PermissionType::action("edit").parent("view"),
            PermissionType::action("view").parent("edit"),
        ];
        assert_matches!(
            PermissionHierarchy::build(&cycle, &resources),
            Err(PermissionError::Cycle(_))
        );

        let duplicate = vec![PermissionType::action("edit"), PermissionType::action("edit")];
        assert_eq!(
            PermissionHierarchy::build(&duplicate, &resources).unwrap_err(),
            PermissionError::Duplicate("edit".into())
        );

        let mut implicit = PermissionType::action("edit");
        implicit.is_abstract = None;
        assert_eq!(
            PermissionHierarchy::build(&[implicit], &resources).unwrap_err(),
            PermissionError::MissingAbstractFlag("edit".into())
        );

        let unknown_parent = vec![PermissionType::action("view").parent("edit")];
        assert_matches!(
            PermissionHierarchy::build(&unknown_parent, &resources),
            Err(PermissionError::UnknownParent { parent, .. }) if parent == "edit"
        );

        let unknown_collection = vec![
            PermissionType::action("edit"),
            PermissionType::action("view").parent("edit-tag"),
        ];
        assert_matches!(
            PermissionHierarchy::build(&unknown_collection, &resources),
            Err(PermissionError::UnknownCollection { collection, .. }) if collection == "tag"
        );

        let generic_parent = vec![
            PermissionType::action("edit"),
            PermissionType::abstract_permission("manageUsers").parent("edit"),
        ];
        assert_matches!(
            PermissionHierarchy::build(&generic_parent, &resources),
            Err(PermissionError::InvalidAbstractParent { .. })
        );

        let hyphenated = vec![PermissionType::action("view-all")];
        assert_matches!(
            PermissionHierarchy::build(&hyphenated, &resources),
            Err(PermissionError::InvalidName(_))
        );
    }
}
