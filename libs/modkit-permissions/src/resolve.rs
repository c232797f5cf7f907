//! Permission resolution.
//!
//! A user's effective level on a resource is the greater of the clamped
//! public grant and the clamped personal grant, or `NONE` when neither
//! exists. On equal levels the personal grant wins, so its grantor is the
//! one reported.

use std::sync::Arc;

use sea_orm::ConnectionTrait;
use tracing::instrument;

use crate::error::PermissionsError;
use crate::key::GrantKey;
use crate::level::Permission;
use crate::relation::PermissionsRelation;
use crate::store::{ApplicableGrant, Grant, GrantStore};

/// Resolved level of one resource in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionsResult<U, R> {
    pub resource_id: R,
    pub permissions: Permission,
    /// Grantor of the winning grant; `None` for a system grant or no grant.
    pub granted_by: Option<U>,
}

/// Grants, resolves and revokes permissions for one resource type.
///
/// Stateless apart from the immutable relation; cheap to clone and safe to
/// share across tasks. Every method takes the connection or transaction to
/// run on, so callers needing a consistent snapshot across several reads
/// pass the same transaction.
#[derive(Debug, Clone)]
pub struct ResourcePermissions<U, R> {
    store: GrantStore<U, R>,
}

impl<U: GrantKey, R: GrantKey> ResourcePermissions<U, R> {
    #[must_use]
    pub fn new(relation: PermissionsRelation<U, R>) -> Self {
        Self::from_shared(Arc::new(relation))
    }

    #[must_use]
    pub fn from_shared(relation: Arc<PermissionsRelation<U, R>>) -> Self {
        Self {
            store: GrantStore::new(relation),
        }
    }

    #[inline]
    #[must_use]
    pub fn relation(&self) -> &PermissionsRelation<U, R> {
        self.store.relation()
    }

    /// Underlying store, for schema management and raw reads.
    #[inline]
    #[must_use]
    pub fn store(&self) -> &GrantStore<U, R> {
        &self.store
    }

    /// Grant `permissions` on `resource_id` to `granted_to` (`None` = public),
    /// replacing any existing grant for the same pair.
    ///
    /// `granted_by == None` marks a system grant.
    ///
    /// # Errors
    ///
    /// - [`PermissionsError::PublicCeilingExceeded`] /
    ///   [`PermissionsError::UserGrantCeilingExceeded`] when the level is above
    ///   its ceiling; nothing is written
    /// - [`PermissionsError::Db`] if the write fails
    #[instrument(skip(self, conn), fields(table = %self.relation().table_name()))]
    pub async fn set_permissions(
        &self,
        conn: &impl ConnectionTrait,
        granted_to: Option<&U>,
        resource_id: &R,
        permissions: Permission,
        granted_by: Option<&U>,
    ) -> Result<(), PermissionsError> {
        let relation = self.relation();
        relation.check_grant(granted_to, permissions, granted_by)?;

        if relation.is_public(granted_to)
            && !relation.public_grants_enabled()
            && relation.public_grants().sentinel().is_none()
        {
            tracing::debug!("public grants are disabled; nothing to store");
            return Ok(());
        }

        self.store
            .upsert_grant(conn, granted_to, resource_id, permissions, granted_by)
            .await?;
        tracing::info!("permissions set");
        Ok(())
    }

    /// Revoke the grant of `granted_to` (`None` = public) on `resource_id`.
    ///
    /// Returns whether a grant existed.
    ///
    /// # Errors
    ///
    /// [`PermissionsError::Db`] if the delete fails.
    #[instrument(skip(self, conn), fields(table = %self.relation().table_name()))]
    pub async fn remove_permissions(
        &self,
        conn: &impl ConnectionTrait,
        granted_to: Option<&U>,
        resource_id: &R,
    ) -> Result<bool, PermissionsError> {
        let removed = self.store.delete_grant(conn, granted_to, resource_id).await?;
        tracing::info!(removed, "permissions removed");
        Ok(removed)
    }

    /// Effective level of `user` (`None` = anonymous) on one resource.
    ///
    /// # Errors
    ///
    /// [`PermissionsError::Db`] if the query fails.
    #[instrument(skip(self, conn), fields(table = %self.relation().table_name()))]
    pub async fn get_permissions(
        &self,
        conn: &impl ConnectionTrait,
        user: Option<&U>,
        resource_id: &R,
    ) -> Result<Permission, PermissionsError> {
        let ids = std::slice::from_ref(resource_id);
        let grants = self.store.query_grants(conn, user, ids).await?;
        let level = merge_resolve(self.relation(), ids, grants)
            .first()
            .map_or(Permission::NONE, |r| r.permissions);
        tracing::debug!(level = %level, "permissions resolved");
        Ok(level)
    }

    /// Effective levels of `user` (`None` = anonymous) on many resources, in
    /// one query.
    ///
    /// Returns one result per input ID, in input order. Resources without an
    /// applicable grant resolve to `NONE` with no grantor.
    ///
    /// # Errors
    ///
    /// [`PermissionsError::Db`] if the query fails.
    #[instrument(
        skip(self, conn, resource_ids),
        fields(table = %self.relation().table_name(), count = resource_ids.len())
    )]
    pub async fn get_permissions_batch(
        &self,
        conn: &impl ConnectionTrait,
        user: Option<&U>,
        resource_ids: &[R],
    ) -> Result<Vec<PermissionsResult<U, R>>, PermissionsError> {
        if resource_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut sorted = resource_ids.to_vec();
        sorted.sort();
        sorted.dedup();

        let grants = self.store.query_grants(conn, user, &sorted).await?;
        let results = merge_resolve(self.relation(), resource_ids, grants);
        tracing::debug!(resolved = results.len(), "batch permissions resolved");
        Ok(results)
    }

    /// Every grant on a resource with read-time clamping applied.
    ///
    /// # Errors
    ///
    /// [`PermissionsError::Db`] if the query fails.
    pub async fn list_grants(
        &self,
        conn: &impl ConnectionTrait,
        resource_id: &R,
    ) -> Result<Vec<Grant<U, R>>, PermissionsError> {
        let relation = self.relation();
        let mut grants = self.store.list_grants(conn, resource_id).await?;
        for grant in &mut grants {
            grant.permissions = relation.clamp_grant(
                grant.granted_to.is_none(),
                grant.permissions,
                grant.granted_by.is_some(),
            );
        }
        Ok(grants)
    }
}

/// Merge-join requested IDs against applicable grants.
///
/// `grants` must be ordered by `resource_id` with each resource's rows
/// adjacent (user row first), as returned by [`GrantStore::query_grants`].
/// Output follows the order of `resource_ids`; duplicate IDs share a result.
fn merge_resolve<U: GrantKey, R: GrantKey>(
    relation: &PermissionsRelation<U, R>,
    resource_ids: &[R],
    grants: Vec<ApplicableGrant<U, R>>,
) -> Vec<PermissionsResult<U, R>> {
    let mut order: Vec<usize> = (0..resource_ids.len()).collect();
    order.sort_by(|&a, &b| resource_ids[a].cmp(&resource_ids[b]));

    let mut results: Vec<Option<PermissionsResult<U, R>>> = vec![None; resource_ids.len()];
    let mut rows = grants.into_iter().peekable();
    let mut previous: Option<PermissionsResult<U, R>> = None;

    for idx in order {
        let id = &resource_ids[idx];
        if let Some(prev) = previous.as_ref().filter(|p| &p.resource_id == id) {
            results[idx] = Some(prev.clone());
            continue;
        }

        // Rows for IDs that were not requested cannot match anything later.
        while rows.next_if(|g| g.resource_id < *id).is_some() {}

        let mut best: Option<(Permission, Option<U>)> = None;
        while let Some(grant) = rows.next_if(|g| g.resource_id == *id) {
            let level =
                relation.clamp_grant(grant.public, grant.permissions, grant.granted_by.is_some());
            if best.as_ref().is_none_or(|(current, _)| level > *current) {
                best = Some((level, grant.granted_by));
            }
        }

        let (permissions, granted_by) = best.unwrap_or((Permission::NONE, None));
        let result = PermissionsResult {
            resource_id: id.clone(),
            permissions,
            granted_by,
        };
        results[idx] = Some(result.clone());
        previous = Some(result);
    }

    results.into_iter().flatten().collect()
}
