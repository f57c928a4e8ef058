// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt::Display;

use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::index::AuthorizationIndex;
use crate::query::{GrantSource, QueryError};
use crate::schema::{Document, HierarchyKind};
use crate::store::{EntityStore, GrantStore};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// The resource's collection is not restricted by grants.
    Unsecured,

    NoSubject,

    Granted(GrantSource),

    Denied(GrantSource),

    /// None of the subject's grants on the resource or its ancestors has an opinion.
    NoMatchingGrant,
}

impl Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reason::Unsecured => write!(f, "collection is not secured"),
            Reason::NoSubject => write!(f, "no subject given"),
            Reason::Granted(grant) | Reason::Denied(grant) => write!(
                f,
                "{} {} to {} {} on {} {}",
                grant.permission,
                if grant.allowed { "granted" } else { "denied" },
                grant.subject_type,
                grant.subject_id,
                grant.resource_type,
                grant.resource_id
            ),
            Reason::NoMatchingGrant => write!(f, "no matching grant"),
        }
    }
}

/// Outcome of a point decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Reason,
}

impl Decision {
    fn allow(reason: Reason) -> Self {
        Self {
            allowed: true,
            reason,
        }
    }

    fn deny(reason: Reason) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }
}

impl AuthorizationIndex {
    /// Returns `true` if the subject may perform the permission on the resource.
    pub async fn check<S, G>(
        &self,
        entities: &S,
        grants: &G,
        subject: Option<&Document>,
        resource: &Document,
        permission: &str,
    ) -> Result<bool, QueryError<S::Error, G::Error>>
    where
        S: EntityStore,
        G: GrantStore,
    {
        let decision = self
            .explain(entities, grants, subject, resource, permission)
            .await?;
        Ok(decision.allowed)
    }

    /// Decide whether the subject may perform the permission on the resource and why.
    ///
    /// The resource and its ancestors are visited nearest first, for each of them the subject and
    /// its ancestors nearest first. The first grant with an opinion decides.
    pub async fn explain<S, G>(
        &self,
        entities: &S,
        grants: &G,
        subject: Option<&Document>,
        resource: &Document,
        permission: &str,
    ) -> Result<Decision, QueryError<S::Error, G::Error>>
    where
        S: EntityStore,
        G: GrantStore,
    {
        if !self.is_secured(&resource.collection) {
            return Ok(Decision::allow(Reason::Unsecured));
        }

        let Some(subject) = subject else {
            return Ok(Decision::deny(Reason::NoSubject));
        };

        let permission = self.validate_permission(permission, &resource.collection)?;
        let permissions = self.permissions().expand(&permission);

        let subjects = self.subject_hierarchy(subject, entities).await?;
        let resources = self
            .ancestry(HierarchyKind::Resource, resource, entities)
            .await?;

        for level in &resources {
            let records = try_join_all(
                subjects
                    .iter()
                    .map(|subject| grants.find_one(&subject.document.id, &level.document.id)),
            )
            .await
            .map_err(QueryError::GrantStore)?;

            let decision = records.iter().flatten().find_map(|record| {
                record
                    .evaluate(&permissions)
                    .map(|(permission, allowed)| GrantSource::new(record, permission, allowed))
            });

            if let Some(grant) = decision {
                debug!(
                    %permission,
                    subject = %subject.id,
                    resource = %resource.id,
                    allowed = grant.allowed,
                    "decided access"
                );

                return Ok(if grant.allowed {
                    Decision::allow(Reason::Granted(grant))
                } else {
                    Decision::deny(Reason::Denied(grant))
                });
            }
        }

        Ok(Decision::deny(Reason::NoMatchingGrant))
    }
}
