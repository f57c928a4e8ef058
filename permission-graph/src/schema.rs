// SPDX-License-Identifier: MIT OR Apache-2.0

//! Entity type declarations consumed from the hosting application's schema.
//!
//! An entity type ("collection") declares its fields and the typed links it holds to other
//! entity types. Links tagged with a [`HierarchyKind`] describe which entity type is the parent
//! of this one in the subject or resource hierarchy.
use std::collections::{BTreeMap, HashSet};
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the primary key field of every document.
pub const ID_FIELD: &str = "_id";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("entity type {0} is declared more than once")]
    DuplicateEntity(String),

    #[error("field {1} is declared more than once on entity type {0}")]
    DuplicateField(String, String),

    #[error("link {field} on entity type {entity} points at unknown entity type {target}")]
    UnknownLinkTarget {
        entity: String,
        field: String,
        target: String,
    },

    #[error("entity type name {0:?} is invalid")]
    InvalidEntityName(String),
}

/// Identifier of a single document.
///
/// Identifiers are assumed to be unique across all collections, as is the case for object ids.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for InstanceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Value type of an entity type's primary key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdKind {
    /// 24 character hexadecimal object id.
    ObjectId,

    /// Decimal integer.
    Integer,

    /// Any non-empty string.
    #[default]
    Text,
}

impl IdKind {
    /// Returns `true` if the given id is a well-formed value of this kind.
    pub fn accepts(&self, id: &InstanceId) -> bool {
        let id = id.as_str();
        match self {
            IdKind::ObjectId => id.len() == 24 && id.chars().all(|c| c.is_ascii_hexdigit()),
            IdKind::Integer => !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()),
            IdKind::Text => !id.is_empty(),
        }
    }
}

/// The two hierarchies an entity type can participate in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyKind {
    /// Entities which act and receive grants, for example users or teams.
    Subject,

    /// Entities which grants are recorded on, for example posts or blogs.
    Resource,
}

impl Display for HierarchyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HierarchyKind::Subject => "subject",
            HierarchyKind::Resource => "resource",
        };

        write!(f, "{}", s)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Plain reference.
    #[default]
    Associate,

    /// The source owns the target.
    Owns,

    /// The source is owned by the target.
    OwnedBy,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Multiplicity {
    #[default]
    Single,
    Array,
}

/// Typed reference from one entity type to another.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkField {
    /// Name of the field holding the referenced id(s), for example `blogId`.
    pub name: String,

    /// Name of the referenced entity type.
    pub target: String,

    #[serde(default)]
    pub relation: RelationKind,

    #[serde(default)]
    pub multiplicity: Multiplicity,

    /// Hierarchies for which the target is the immediate parent of the owning entity type.
    #[serde(default)]
    pub tags: Vec<HierarchyKind>,

    /// Excluded links are ignored when building the link graph.
    #[serde(default)]
    pub excluded: bool,
}

impl LinkField {
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            relation: RelationKind::Associate,
            multiplicity: Multiplicity::Single,
            tags: Vec::new(),
            excluded: false,
        }
    }

    pub fn relation(mut self, relation: RelationKind) -> Self {
        self.relation = relation;
        self
    }

    /// Mark this link as the "owned-by" parent link for the given hierarchy.
    pub fn parent_of(mut self, kind: HierarchyKind) -> Self {
        self.relation = RelationKind::OwnedBy;
        if !self.tags.contains(&kind) {
            self.tags.push(kind);
        }
        self
    }

    pub fn array(mut self) -> Self {
        self.multiplicity = Multiplicity::Array;
        self
    }

    pub fn excluded(mut self) -> Self {
        self.excluded = true;
        self
    }

    pub fn is_tagged(&self, kind: HierarchyKind) -> bool {
        self.tags.contains(&kind)
    }
}

/// Per-collection restriction of the permissions which may be used with it.
///
/// Absence of rules on an entity type means every permission is allowed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRules {
    /// Allow every permission scoped to these collections.
    #[serde(default)]
    pub include_collections: Option<Vec<String>>,

    /// Allow these permissions.
    #[serde(default)]
    pub include: Option<Vec<String>>,

    /// Disallow every permission scoped to these collections.
    #[serde(default)]
    pub exclude_collections: Option<Vec<String>>,

    /// Disallow these permissions.
    #[serde(default)]
    pub exclude: Option<Vec<String>>,

    /// Only allow permissions scoped to the declaring collection itself.
    #[serde(default)]
    pub this_collection_only: bool,
}

/// Declaration of a single entity type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityType {
    pub name: String,

    /// Ordered set of field names (link fields are listed in `links`).
    #[serde(default)]
    pub fields: Vec<String>,

    #[serde(default)]
    pub links: Vec<LinkField>,

    #[serde(default)]
    pub id_kind: IdKind,

    /// Explicit hierarchy membership for entity types without a tagged parent link, usually
    /// hierarchy roots.
    #[serde(default)]
    pub hierarchy: Vec<HierarchyKind>,

    /// Unsecured collections are never restricted by the query compiler.
    #[serde(default)]
    pub unsecured: bool,

    #[serde(default)]
    pub permissions: Option<PermissionRules>,
}

impl EntityType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            links: Vec::new(),
            id_kind: IdKind::default(),
            hierarchy: Vec::new(),
            unsecured: false,
            permissions: None,
        }
    }

    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(name.into());
        self
    }

    pub fn link(mut self, link: LinkField) -> Self {
        self.links.push(link);
        self
    }

    pub fn id_kind(mut self, id_kind: IdKind) -> Self {
        self.id_kind = id_kind;
        self
    }

    /// Declare membership in a hierarchy without a parent link.
    pub fn member_of(mut self, kind: HierarchyKind) -> Self {
        if !self.hierarchy.contains(&kind) {
            self.hierarchy.push(kind);
        }
        self
    }

    pub fn unsecured(mut self) -> Self {
        self.unsecured = true;
        self
    }

    pub fn permissions(mut self, rules: PermissionRules) -> Self {
        self.permissions = Some(rules);
        self
    }

}

/// Validated list of all entity types known to the hosting application.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<EntityType>", into = "Vec<EntityType>")]
pub struct Schema {
    entities: Vec<EntityType>,
}

impl Schema {
    pub fn new(entities: Vec<EntityType>) -> Result<Self, SchemaError> {
        let mut names = HashSet::new();
        for entity in &entities {
            if entity.name.is_empty() || entity.name.contains(char::is_whitespace) {
                return Err(SchemaError::InvalidEntityName(entity.name.clone()));
            }

            if !names.insert(entity.name.as_str()) {
                return Err(SchemaError::DuplicateEntity(entity.name.clone()));
            }
        }

        for entity in &entities {
            let mut fields = HashSet::new();
            let field_names = entity
                .fields
                .iter()
                .chain(entity.links.iter().map(|link| &link.name));
            for field in field_names {
                if !fields.insert(field.as_str()) {
                    return Err(SchemaError::DuplicateField(
                        entity.name.clone(),
                        field.clone(),
                    ));
                }
            }

            for link in &entity.links {
                if !names.contains(link.target.as_str()) {
                    return Err(SchemaError::UnknownLinkTarget {
                        entity: entity.name.clone(),
                        field: link.name.clone(),
                        target: link.target.clone(),
                    });
                }
            }
        }

        Ok(Self { entities })
    }

    pub fn entities(&self) -> &[EntityType] {
        &self.entities
    }

    pub fn entity(&self, name: &str) -> Option<&EntityType> {
        self.entities.iter().find(|entity| entity.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entity(name).is_some()
    }
}

impl TryFrom<Vec<EntityType>> for Schema {
    type Error = SchemaError;

    fn try_from(entities: Vec<EntityType>) -> Result<Self, Self::Error> {
        Schema::new(entities)
    }
}

impl From<Schema> for Vec<EntityType> {
    fn from(schema: Schema) -> Self {
        schema.entities
    }
}

/// A loaded document, reduced to what authorization needs: its identity and link values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub collection: String,
    pub id: InstanceId,

    /// Referenced ids per link field. Single links hold at most one id, missing or null links
    /// are absent or empty.
    #[serde(default)]
    pub links: BTreeMap<String, Vec<InstanceId>>,
}

impl Document {
    pub fn new(collection: impl Into<String>, id: impl Into<InstanceId>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            links: BTreeMap::new(),
        }
    }

    pub fn link<I, T>(mut self, field: impl Into<String>, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<InstanceId>,
    {
        self.links
            .insert(field.into(), ids.into_iter().map(Into::into).collect());
        self
    }

    /// Ids referenced by the given link field, empty if the field is unset on this document.
    pub fn link_values(&self, field: &str) -> &[InstanceId] {
        self.links.get(field).map(Vec::as_slice).unwrap_or(&[])
    }
}
