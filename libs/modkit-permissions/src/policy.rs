//! Ceiling enforcement.
//!
//! Writes above a ceiling are rejected before reaching the store; reads are
//! clamped so rows written by another path (data migration, a lowered
//! ceiling) can never surface above their ceiling.

use crate::error::PermissionsError;
use crate::key::GrantKey;
use crate::level::Permission;
use crate::relation::PermissionsRelation;

impl<U: GrantKey, R: GrantKey> PermissionsRelation<U, R> {
    /// Validate a grant before it is written.
    ///
    /// A system grant (`granted_by == None`) to a specific user is trusted and
    /// not bounded by the user-granted ceiling.
    ///
    /// # Errors
    ///
    /// - [`PermissionsError::PublicCeilingExceeded`] for a public grant above
    ///   the public ceiling
    /// - [`PermissionsError::UserGrantCeilingExceeded`] for a user-delegated
    ///   grant above the user-granted ceiling
    pub fn check_grant(
        &self,
        granted_to: Option<&U>,
        permissions: Permission,
        granted_by: Option<&U>,
    ) -> Result<(), PermissionsError> {
        if self.is_public(granted_to) && permissions > self.max_public_permissions() {
            return Err(PermissionsError::PublicCeilingExceeded {
                requested: permissions,
                ceiling: self.max_public_permissions(),
            });
        }
        if granted_by.is_some() && permissions > self.max_user_granted_permissions() {
            return Err(PermissionsError::UserGrantCeilingExceeded {
                requested: permissions,
                ceiling: self.max_user_granted_permissions(),
            });
        }
        Ok(())
    }

    /// Effective level of a stored row.
    #[must_use]
    pub fn clamp_grant(&self, public: bool, stored: Permission, delegated: bool) -> Permission {
        let mut level = stored;
        if public {
            level = level.min(self.max_public_permissions());
        }
        if delegated {
            level = level.min(self.max_user_granted_permissions());
        }
        if level < stored {
            tracing::warn!(
                table = %self.table_name(),
                stored = %stored,
                clamped = %level,
                public,
                "stored grant exceeds its ceiling; clamping"
            );
        }
        level
    }
}
