// SPDX-License-Identifier: MIT OR Apache-2.0

//! Filter expressions over a collection, as consumed by document stores.
//!
//! Filters serialize to the conventional query document format: `{}` matches everything,
//! `false` matches nothing and clauses use `$in`, `$nin`, `$exists`, `$or` and `$and`.
use std::collections::BTreeSet;
use std::fmt::Display;

use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};

use crate::schema::{Document, ID_FIELD, InstanceId};

/// Field of a document a clause applies to.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldPath {
    /// The document's own primary key.
    Id,

    /// A link field holding referenced ids.
    Link(String),
}

impl FieldPath {
    pub fn as_str(&self) -> &str {
        match self {
            FieldPath::Id => ID_FIELD,
            FieldPath::Link(name) => name,
        }
    }

    fn values<'a>(&self, document: &'a Document) -> &'a [InstanceId] {
        match self {
            FieldPath::Id => std::slice::from_ref(&document.id),
            FieldPath::Link(name) => document.link_values(name),
        }
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expression {
    In {
        field: FieldPath,
        ids: BTreeSet<InstanceId>,
    },
    NotIn {
        field: FieldPath,
        ids: BTreeSet<InstanceId>,
    },
    Exists {
        field: FieldPath,
        exists: bool,
    },
    Or(Vec<Expression>),
    And(Vec<Expression>),
}

impl Expression {
    pub fn is_in<I>(field: FieldPath, ids: I) -> Self
    where
        I: IntoIterator<Item = InstanceId>,
    {
        Expression::In {
            field,
            ids: ids.into_iter().collect(),
        }
    }

    pub fn not_in<I>(field: FieldPath, ids: I) -> Self
    where
        I: IntoIterator<Item = InstanceId>,
    {
        Expression::NotIn {
            field,
            ids: ids.into_iter().collect(),
        }
    }

    /// Conjunction which collapses to the single expression when there is only one.
    pub fn all(mut expressions: Vec<Expression>) -> Self {
        if expressions.len() == 1 {
            expressions.remove(0)
        } else {
            Expression::And(expressions)
        }
    }

    /// Disjunction which collapses to the single expression when there is only one.
    pub fn any(mut expressions: Vec<Expression>) -> Self {
        if expressions.len() == 1 {
            expressions.remove(0)
        } else {
            Expression::Or(expressions)
        }
    }

    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Expression::In { field, ids } => {
                field.values(document).iter().any(|id| ids.contains(id))
            }
            Expression::NotIn { field, ids } => {
                !field.values(document).iter().any(|id| ids.contains(id))
            }
            Expression::Exists { field, exists } => {
                field.values(document).is_empty() != *exists
            }
            Expression::Or(expressions) => expressions.iter().any(|e| e.matches(document)),
            Expression::And(expressions) => expressions.iter().all(|e| e.matches(document)),
        }
    }
}

struct Operator<'a, T: Serialize> {
    name: &'static str,
    value: &'a T,
}

impl<T: Serialize> Serialize for Operator<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.name, self.value)?;
        map.end()
    }
}

impl Serialize for Expression {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            Expression::In { field, ids } => map.serialize_entry(
                field.as_str(),
                &Operator {
                    name: "$in",
                    value: ids,
                },
            )?,
            Expression::NotIn { field, ids } => map.serialize_entry(
                field.as_str(),
                &Operator {
                    name: "$nin",
                    value: ids,
                },
            )?,
            Expression::Exists { field, exists } => map.serialize_entry(
                field.as_str(),
                &Operator {
                    name: "$exists",
                    value: exists,
                },
            )?,
            Expression::Or(expressions) => map.serialize_entry("$or", expressions)?,
            Expression::And(expressions) => map.serialize_entry("$and", expressions)?,
        }
        map.end()
    }
}

/// Result of compiling an authorization query for a collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Filter {
    /// No restriction, serialized as `{}`.
    MatchAll,

    /// Nothing may be returned, serialized as `false`.
    MatchNone,

    Clause(Expression),
}

impl Filter {
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Filter::MatchAll => true,
            Filter::MatchNone => false,
            Filter::Clause(expression) => expression.matches(document),
        }
    }

    pub fn is_match_none(&self) -> bool {
        matches!(self, Filter::MatchNone)
    }

    pub fn to_json(&self) -> serde_json::Value {
        // Serializing plain maps, sets and strings can not fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Bool(false))
    }
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Filter::MatchAll => serializer.serialize_struct("Filter", 0)?.end(),
            Filter::MatchNone => serializer.serialize_bool(false),
            Filter::Clause(expression) => expression.serialize(serializer),
        }
    }
}

impl From<Expression> for Filter {
    fn from(expression: Expression) -> Self {
        Filter::Clause(expression)
    }
}
