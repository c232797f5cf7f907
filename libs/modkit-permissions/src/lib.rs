#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Per-resource permission grants for `SeaORM` modules.
//!
//! A [`PermissionsRelation`] links a grantee collection (users) to a resource
//! collection through a grant table. Each row grants one user, or the public,
//! an ordinal [`Permission`] level on one resource. [`ResourcePermissions`]
//! writes and revokes grants, resolves a user's effective level on one or
//! many resources, and restricts `SeaORM` selects to the resources a user may
//! access.
//!
//! Two ceilings bound what may be granted: the public ceiling for grants to
//! everyone, and the user-granted ceiling for grants delegated by another
//! user. Writes above a ceiling are rejected; reads are clamped.

// Configuration
pub mod error;
pub mod key;
pub mod level;
pub mod relation;

// Storage and resolution
mod policy;
pub mod resolve;
pub mod store;

// Query integration
pub mod guard;
pub mod migration;

pub use error::PermissionsError;
pub use key::GrantKey;
pub use level::Permission;
pub use relation::{
    Collection, PermissionsConfig, PermissionsRelation, PermissionsRelationBuilder, PublicGrants,
};

pub use resolve::{PermissionsResult, ResourcePermissions};
pub use store::{ApplicableGrant, Grant, GrantStore};

pub use guard::{GuardedEntity, RESOLVED_PERMISSIONS};
pub use migration::PermissionsMigration;
