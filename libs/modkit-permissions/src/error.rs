use sea_orm::{DbBackend, DbErr};

use crate::level::Permission;

/// Errors raised by the permissions engine.
///
/// Policy failures (`InvalidCeilings`, `*CeilingExceeded`) are raised before
/// any statement is sent. Backing-store failures are passed through as
/// [`PermissionsError::Db`] so callers can tell infrastructure errors from
/// policy errors.
#[derive(Debug, thiserror::Error)]
pub enum PermissionsError {
    /// The configuration allows public grants above what a user may delegate.
    #[error(
        "invalid permissions configuration: max public permissions ({max_public}) exceed max user-granted permissions ({max_user_granted})"
    )]
    InvalidCeilings {
        max_public: Permission,
        max_user_granted: Permission,
    },

    /// A public grant above the public ceiling was requested.
    #[error("public grant of {requested} exceeds the public ceiling of {ceiling}")]
    PublicCeilingExceeded {
        requested: Permission,
        ceiling: Permission,
    },

    /// A user-delegated grant above the user-granted ceiling was requested.
    #[error("user-granted permissions of {requested} exceed the ceiling of {ceiling}")]
    UserGrantCeilingExceeded {
        requested: Permission,
        ceiling: Permission,
    },

    /// The public-grant uniqueness strategy cannot be expressed on this backend.
    #[error("public grant strategy `{strategy}` is not supported on {backend:?}")]
    UnsupportedBackend {
        strategy: &'static str,
        backend: DbBackend,
    },

    /// Error from the backing store, untranslated.
    #[error(transparent)]
    Db(#[from] DbErr),
}

impl PermissionsError {
    /// Returns `true` for errors caused by the policy rather than the store.
    #[must_use]
    pub fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            Self::PublicCeilingExceeded { .. } | Self::UserGrantCeilingExceeded { .. }
        )
    }
}

impl From<PermissionsError> for DbErr {
    fn from(err: PermissionsError) -> Self {
        match err {
            PermissionsError::Db(e) => e,
            other => DbErr::Migration(other.to_string()),
        }
    }
}
