// SPDX-License-Identifier: MIT OR Apache-2.0

//! Immutable state derived from the entity schema at boot.
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::catalog::LinkCatalog;
use crate::config::Config;
use crate::graph::LinkGraph;
use crate::hierarchy::{
    Ancestor, Hierarchy, HierarchyError, ParentContext, ParentError, ancestry, resolve_parents,
};
use crate::permissions::{AllowList, PermissionError, PermissionHierarchy};
use crate::schema::{Document, HierarchyKind, Schema};
use crate::store::EntityStore;

/// Fatal configuration errors, detected while building the index.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),

    #[error(transparent)]
    Permission(#[from] PermissionError),
}

/// Link graph, subject and resource hierarchies and compiled permissions of one schema.
///
/// Built exactly once with [`AuthorizationIndex::build`] and read-only afterwards, any change to
/// the schema or permission declarations requires building a new index. The index is `Send` and
/// `Sync` and is usually shared behind an `Arc` between all request handlers.
#[derive(Debug)]
pub struct AuthorizationIndex {
    schema: Schema,
    config: Config,
    catalog: LinkCatalog,
    graph: LinkGraph,
    subjects: Hierarchy,
    resources: Hierarchy,
    permissions: PermissionHierarchy,
    allow_list: AllowList,
}

impl AuthorizationIndex {
    pub fn build(schema: Schema, config: Config) -> Result<Self, ConfigError> {
        let catalog = LinkCatalog::new(&schema);
        let graph = LinkGraph::new(&catalog);
        let subjects = Hierarchy::classify(&schema, HierarchyKind::Subject)?;
        let resources = Hierarchy::classify(&schema, HierarchyKind::Resource)?;
        let permissions = PermissionHierarchy::build(&config.permission_types, &resources)?;
        let allow_list = AllowList::build(&schema, &permissions)?;

        debug!(
            collections = catalog.collections().len(),
            subjects = subjects.nodes().count(),
            resources = resources.nodes().count(),
            permissions = permissions.all_permission_types().len(),
            "built authorization index"
        );

        Ok(Self {
            schema,
            config,
            catalog,
            graph,
            subjects,
            resources,
            permissions,
            allow_list,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &LinkCatalog {
        &self.catalog
    }

    pub fn graph(&self) -> &LinkGraph {
        &self.graph
    }

    pub fn hierarchy(&self, kind: HierarchyKind) -> &Hierarchy {
        match kind {
            HierarchyKind::Subject => &self.subjects,
            HierarchyKind::Resource => &self.resources,
        }
    }

    pub fn permissions(&self) -> &PermissionHierarchy {
        &self.permissions
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    /// Returns `true` if reads of the collection are restricted by grants.
    pub fn is_secured(&self, collection: &str) -> bool {
        self.resources.contains(collection)
            && self
                .schema
                .entity(collection)
                .is_some_and(|entity| !entity.unsecured)
    }

    pub(crate) fn context(&self, kind: HierarchyKind) -> ParentContext<'_> {
        ParentContext {
            hierarchy: self.hierarchy(kind),
            catalog: &self.catalog,
            graph: &self.graph,
            batch_size: self.config.id_batch_size,
        }
    }

    /// Parent instances of a document in the given hierarchy.
    pub async fn parents<S: EntityStore>(
        &self,
        kind: HierarchyKind,
        document: &Document,
        store: &S,
    ) -> Result<Vec<Document>, ParentError<S::Error>> {
        resolve_parents(self.context(kind), store, document).await
    }

    /// The document and all its ancestor instances in the given hierarchy, nearest first.
    ///
    /// Documents of collections outside the hierarchy have no ancestors.
    pub async fn ancestry<S: EntityStore>(
        &self,
        kind: HierarchyKind,
        document: &Document,
        store: &S,
    ) -> Result<Vec<Ancestor>, ParentError<S::Error>> {
        if !self.hierarchy(kind).contains(&document.collection) {
            return Ok(vec![Ancestor {
                document: document.clone(),
                distance: 0,
            }]);
        }

        ancestry(self.context(kind), store, document).await
    }

    /// The subject and every subject instance it inherits grants from.
    pub async fn subject_hierarchy<S: EntityStore>(
        &self,
        subject: &Document,
        store: &S,
    ) -> Result<Vec<Ancestor>, ParentError<S::Error>> {
        self.ancestry(HierarchyKind::Subject, subject, store).await
    }

    /// Canonical permission string for the collection, checked against its allow-list.
    pub fn validate_permission(
        &self,
        permission: &str,
        collection: &str,
    ) -> Result<String, PermissionError> {
        let permission = self.permissions.normalize(permission, collection)?;
        self.allow_list.check(collection, &permission)?;
        Ok(permission)
    }

    pub fn all_permission_types(&self) -> &[String] {
        self.permissions.all_permission_types()
    }

    /// Permissions usable on the collection.
    pub fn allowed_permissions(&self, collection: &str) -> Vec<String> {
        match self.allow_list.allowed(collection) {
            Some(allowed) => self
                .all_permission_types()
                .iter()
                .filter(|permission| allowed.contains(*permission))
                .cloned()
                .collect(),
            None => self.all_permission_types().to_vec(),
        }
    }

    pub fn permission_parents(&self, permission: &str) -> Result<Arc<[String]>, PermissionError> {
        self.known(permission)?;
        Ok(self.permissions.parents(permission))
    }

    pub fn permission_children(&self, permission: &str) -> Result<Arc<[String]>, PermissionError> {
        self.known(permission)?;
        Ok(self.permissions.children(permission))
    }

    pub fn format_permission_type(&self, action: &str, collection: &str) -> String {
        self.permissions.format_permission_type(action, collection)
    }

    pub fn describe_permission(&self, permission: &str) -> Result<String, PermissionError> {
        self.known(permission)?;
        Ok(self.permissions.describe(permission))
    }

    fn known(&self, permission: &str) -> Result<(), PermissionError> {
        if permission.is_empty() {
            return Err(PermissionError::Missing);
        }
        if !self.permissions.contains(permission) {
            return Err(PermissionError::Unknown(permission.to_string()));
        }
        Ok(())
    }
}
