// SPDX-License-Identifier: MIT OR Apache-2.0

//! Authorization over hierarchies of linked entity types.
//!
//! Entity types declare typed links to each other. Links tagged as "owned-by" arrange them into
//! a subject hierarchy (users, teams, organisations) and a resource hierarchy (comments, posts,
//! blogs, organisations). Grant records store explicit decisions of one subject instance about
//! permissions on one resource instance.
//!
//! An [`AuthorizationIndex`] is built once from the schema and answers two questions:
//!
//! 1. May a subject perform a permission on one resource instance? See
//!    [`AuthorizationIndex::check`].
//! 2. Which documents of a collection may a subject access? See [`AuthorizationIndex::compile`],
//!    which returns a [`Filter`] to apply to a bulk read of that collection.
mod cache;
pub mod catalog;
mod config;
pub mod filter;
pub mod graph;
pub mod hierarchy;
mod index;
pub mod permissions;
pub mod query;
pub mod schema;
pub mod store;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use config::{Config, DEFAULT_ID_BATCH_SIZE};
pub use filter::{Expression, FieldPath, Filter};
pub use index::{AuthorizationIndex, ConfigError};
pub use permissions::{Permission, PermissionError, PermissionType};
pub use query::{AccessError, Decision, Provenance, QueryError, Reason};
pub use schema::{Document, EntityType, HierarchyKind, InstanceId, LinkField, Schema};
pub use store::{EntityMemoryStore, EntityStore, GrantMemoryStore, GrantRecord, GrantStore};
