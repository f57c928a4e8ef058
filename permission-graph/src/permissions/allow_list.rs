// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::permissions::{Permission, PermissionError, PermissionHierarchy};
use crate::schema::{PermissionRules, Schema};

/// Permissions each collection may participate in.
///
/// Computed once from the [`PermissionRules`] declared on entity types. Collections without
/// rules allow every permission.
#[derive(Clone, Debug, Default)]
pub struct AllowList {
    collections: HashMap<String, BTreeSet<String>>,
}

impl AllowList {
    pub fn build(
        schema: &Schema,
        permissions: &PermissionHierarchy,
    ) -> Result<Self, PermissionError> {
        let mut collections = HashMap::new();

        for entity in schema.entities() {
            let Some(rules) = &entity.permissions else {
                continue;
            };

            validate_rules(&entity.name, rules, schema, permissions)?;

            let allowed: BTreeSet<String> = permissions
                .all_permission_types()
                .iter()
                .filter(|permission| is_allowed(&entity.name, rules, permission))
                .cloned()
                .collect();

            debug!(
                collection = %entity.name,
                allowed = allowed.len(),
                "registered allowed permissions"
            );
            collections.insert(entity.name.clone(), allowed);
        }

        Ok(Self { collections })
    }

    pub fn is_allowed(&self, collection: &str, permission: &str) -> bool {
        self.collections
            .get(collection)
            .is_none_or(|allowed| allowed.contains(permission))
    }

    /// Allowed permissions of the collection, `None` if it has no restrictions.
    pub fn allowed(&self, collection: &str) -> Option<&BTreeSet<String>> {
        self.collections.get(collection)
    }

    /// Fails with [`PermissionError::NotAllowed`] if the collection may not use the permission.
    pub fn check(&self, collection: &str, permission: &str) -> Result<(), PermissionError> {
        if self.is_allowed(collection, permission) {
            Ok(())
        } else {
            Err(PermissionError::NotAllowed {
                permission: permission.to_string(),
                collection: collection.to_string(),
            })
        }
    }
}

fn validate_rules(
    collection: &str,
    rules: &PermissionRules,
    schema: &Schema,
    permissions: &PermissionHierarchy,
) -> Result<(), PermissionError> {
    let named = rules.include.iter().chain(rules.exclude.iter()).flatten();
    for permission in named {
        if !permissions.contains(permission) {
            return Err(PermissionError::UnknownRule {
                collection: collection.to_string(),
                permission: permission.clone(),
            });
        }
    }

    let named = rules
        .include_collections
        .iter()
        .chain(rules.exclude_collections.iter())
        .flatten();
    for target in named {
        if !schema.contains(target) {
            return Err(PermissionError::UnknownCollection {
                permission: collection.to_string(),
                collection: target.clone(),
            });
        }
    }

    Ok(())
}

fn is_allowed(collection: &str, rules: &PermissionRules, permission: &str) -> bool {
    let scope = Permission::parse(permission).collection;
    let contains = |list: &Option<Vec<String>>, value: &str| {
        list.as_ref()
            .is_some_and(|list| list.iter().any(|item| item == value))
    };

    if contains(&rules.exclude, permission) {
        return false;
    }
    if scope
        .as_deref()
        .is_some_and(|scope| contains(&rules.exclude_collections, scope))
    {
        return false;
    }

    let restricted = rules.include.is_some()
        || rules.include_collections.is_some()
        || rules.this_collection_only;
    if !restricted {
        return true;
    }

    let in_collections = scope.as_deref().is_some_and(|scope| {
        contains(&rules.include_collections, scope)
            || (rules.this_collection_only && scope == collection)
    });

    contains(&rules.include, permission)
        || in_collections
        || (scope.is_none() && rules.include.is_none())
}
