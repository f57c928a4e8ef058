// SPDX-License-Identifier: MIT OR Apache-2.0

use thiserror::Error;
use tracing::debug;

use crate::index::AuthorizationIndex;
use crate::permissions::PermissionError;
use crate::schema::{Document, HierarchyKind, InstanceId};
use crate::store::{GrantRecord, GrantStore};

#[derive(Debug, Error)]
pub enum AccessError<G> {
    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error("collection {0} is not part of the {1} hierarchy")]
    NotInHierarchy(String, HierarchyKind),

    #[error("{id} is not a valid id of collection {collection}")]
    InvalidId { collection: String, id: InstanceId },

    #[error("grant store error: {0}")]
    GrantStore(G),
}

impl AuthorizationIndex {
    /// Record an explicit grant or denial of a permission from the subject to the resource.
    ///
    /// Returns the stored grant record.
    pub async fn set_access<G: GrantStore>(
        &self,
        grants: &G,
        subject: &Document,
        resource: &Document,
        permission: &str,
        allowed: bool,
    ) -> Result<GrantRecord, AccessError<G::Error>> {
        let permission = self.grantable::<G::Error>(subject, resource, permission)?;

        let record = grants
            .find_one(&subject.id, &resource.id)
            .await
            .map_err(AccessError::GrantStore)?
            .unwrap_or_else(|| GrantRecord::new(subject, resource))
            .with_access(permission.clone(), allowed);
        grants
            .upsert(record.clone())
            .await
            .map_err(AccessError::GrantStore)?;

        debug!(
            %permission,
            subject = %subject.id,
            resource = %resource.id,
            allowed,
            "set access"
        );

        Ok(record)
    }

    /// Remove the subject's explicit decision on a permission for the resource, leaving no
    /// opinion. Grant records without any remaining decision are deleted.
    ///
    /// Returns `true` if a decision was removed.
    pub async fn remove_access<G: GrantStore>(
        &self,
        grants: &G,
        subject: &Document,
        resource: &Document,
        permission: &str,
    ) -> Result<bool, AccessError<G::Error>> {
        let permission = self.grantable::<G::Error>(subject, resource, permission)?;

        let Some(mut record) = grants
            .find_one(&subject.id, &resource.id)
            .await
            .map_err(AccessError::GrantStore)?
        else {
            return Ok(false);
        };

        if record.access.remove(&permission).is_none() {
            return Ok(false);
        }

        if record.access.is_empty() {
            grants
                .remove(&subject.id, &resource.id)
                .await
                .map_err(AccessError::GrantStore)?;
        } else {
            grants
                .upsert(record)
                .await
                .map_err(AccessError::GrantStore)?;
        }

        debug!(%permission, subject = %subject.id, resource = %resource.id, "removed access");
        Ok(true)
    }

    fn grantable<E>(
        &self,
        subject: &Document,
        resource: &Document,
        permission: &str,
    ) -> Result<String, AccessError<E>> {
        for (document, kind) in [
            (subject, HierarchyKind::Subject),
            (resource, HierarchyKind::Resource),
        ] {
            if !self.hierarchy(kind).contains(&document.collection) {
                return Err(AccessError::NotInHierarchy(
                    document.collection.clone(),
                    kind,
                ));
            }

            let accepted = self
                .schema()
                .entity(&document.collection)
                .is_some_and(|entity| entity.id_kind.accepts(&document.id));
            if !accepted {
                return Err(AccessError::InvalidId {
                    collection: document.collection.clone(),
                    id: document.id.clone(),
                });
            }
        }

        Ok(self.validate_permission(permission, &resource.collection)?)
    }
}
