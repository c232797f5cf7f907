//! Configuration model of one permissions relation.
//!
//! A [`PermissionsRelation`] describes which grantee and resource collections
//! a grant table links, the ceilings bounding public and user-delegated
//! grants, and how the single public grant per resource is kept unique.
//! It is validated once and then shared read-only (typically in an `Arc`).

use std::marker::PhantomData;

use serde::Deserialize;

use crate::error::PermissionsError;
use crate::key::GrantKey;
use crate::level::Permission;

const DEFAULT_OWNER_PERMISSIONS: Permission = Permission::new(8);
const DEFAULT_MAX_PUBLIC_PERMISSIONS: Permission = Permission::new(1);
const DEFAULT_MAX_USER_GRANTED_PERMISSIONS: Permission = Permission::new(2);

/// A table and its key column, referenced by the grant table's foreign keys.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Collection {
    table: String,
    #[serde(default = "default_key_column")]
    column: String,
}

fn default_key_column() -> String {
    "id".to_owned()
}

impl Collection {
    #[must_use]
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }

    #[inline]
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[inline]
    #[must_use]
    pub fn column(&self) -> &str {
        &self.column
    }
}

/// How "at most one public grant per resource" is enforced by the store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case", bound(deserialize = "U: Deserialize<'de>"))]
pub enum PublicGrants<U> {
    /// `UNIQUE (granted_to, resource_id) NULLS NOT DISTINCT` (PostgreSQL 15+).
    NullsNotDistinct,
    /// Plain unique index plus a partial unique index on `resource_id` for
    /// rows where `granted_to IS NULL` (PostgreSQL, SQLite).
    PartialIndex,
    /// The public grantee is stored as this reserved key (any backend).
    Sentinel(U),
}

impl<U> Default for PublicGrants<U> {
    fn default() -> Self {
        Self::PartialIndex
    }
}

impl<U> PublicGrants<U> {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::NullsNotDistinct => "nulls_not_distinct",
            Self::PartialIndex => "partial_index",
            Self::Sentinel(_) => "sentinel",
        }
    }

    /// The reserved key standing for the public grantee, if any.
    #[must_use]
    pub fn sentinel(&self) -> Option<&U> {
        match self {
            Self::Sentinel(key) => Some(key),
            Self::NullsNotDistinct | Self::PartialIndex => None,
        }
    }
}

/// Declarative form of a [`PermissionsRelation`], e.g. from module YAML.
///
/// ```yaml
/// grantees: { table: users }
/// resources: { table: glossaries }
/// max_public_permissions: 1
/// max_user_granted_permissions: 2
/// public_grants: partial_index
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, bound(deserialize = "U: Deserialize<'de>"))]
pub struct PermissionsConfig<U> {
    pub grantees: Collection,
    pub resources: Collection,
    #[serde(default = "default_owner_permissions")]
    pub owner_permissions: Permission,
    #[serde(default = "default_max_public_permissions")]
    pub max_public_permissions: Permission,
    #[serde(default = "default_max_user_granted_permissions")]
    pub max_user_granted_permissions: Permission,
    /// Overrides the derived `<resources>_permissions` table name.
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub public_grants: PublicGrants<U>,
}

fn default_owner_permissions() -> Permission {
    DEFAULT_OWNER_PERMISSIONS
}

fn default_max_public_permissions() -> Permission {
    DEFAULT_MAX_PUBLIC_PERMISSIONS
}

fn default_max_user_granted_permissions() -> Permission {
    DEFAULT_MAX_USER_GRANTED_PERMISSIONS
}

/// Validated, immutable description of one permissions relation.
///
/// `U` is the grantee key type, `R` the resource key type.
#[derive(Debug, Clone)]
pub struct PermissionsRelation<U, R> {
    grantees: Collection,
    resources: Collection,
    owner_permissions: Permission,
    max_public: Permission,
    max_user_granted: Permission,
    table_name: String,
    public_grants: PublicGrants<U>,
    _resource_key: PhantomData<fn() -> R>,
}

impl<U: GrantKey, R: GrantKey> PermissionsRelation<U, R> {
    /// Start building a relation between `grantees` and `resources`.
    #[must_use]
    pub fn builder(grantees: Collection, resources: Collection) -> PermissionsRelationBuilder<U, R> {
        PermissionsRelationBuilder {
            grantees,
            resources,
            owner_permissions: DEFAULT_OWNER_PERMISSIONS,
            max_public: DEFAULT_MAX_PUBLIC_PERMISSIONS,
            max_user_granted: DEFAULT_MAX_USER_GRANTED_PERMISSIONS,
            table_name: None,
            public_grants: PublicGrants::default(),
            _resource_key: PhantomData,
        }
    }

    /// Build a relation from its declarative configuration.
    ///
    /// # Errors
    ///
    /// [`PermissionsError::InvalidCeilings`] if the public ceiling exceeds
    /// the user-granted ceiling.
    pub fn from_config(config: PermissionsConfig<U>) -> Result<Self, PermissionsError> {
        let mut builder = Self::builder(config.grantees, config.resources)
            .owner_permissions(config.owner_permissions)
            .max_public_permissions(config.max_public_permissions)
            .max_user_granted_permissions(config.max_user_granted_permissions)
            .public_grants(config.public_grants);
        if let Some(name) = config.table_name {
            builder = builder.table_name(name);
        }
        builder.build()
    }

    #[inline]
    #[must_use]
    pub fn grantees(&self) -> &Collection {
        &self.grantees
    }

    #[inline]
    #[must_use]
    pub fn resources(&self) -> &Collection {
        &self.resources
    }

    /// Level an application reports for a resource's owner.
    ///
    /// Ownership lives outside the grant table; this is never returned by
    /// resolution on its own.
    #[inline]
    #[must_use]
    pub fn owner_permissions(&self) -> Permission {
        self.owner_permissions
    }

    #[inline]
    #[must_use]
    pub fn max_public_permissions(&self) -> Permission {
        self.max_public
    }

    #[inline]
    #[must_use]
    pub fn max_user_granted_permissions(&self) -> Permission {
        self.max_user_granted
    }

    /// Name of the grant table.
    #[inline]
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    #[inline]
    #[must_use]
    pub fn public_grants(&self) -> &PublicGrants<U> {
        &self.public_grants
    }

    /// Whether a public grant above `NONE` can ever be stored.
    #[must_use]
    pub fn public_grants_enabled(&self) -> bool {
        self.max_public > Permission::NONE
    }

    /// `granted_to` is nullable exactly when public grants are stored as `NULL`.
    #[must_use]
    pub fn granted_to_nullable(&self) -> bool {
        self.public_grants.sentinel().is_none() && self.public_grants_enabled()
    }

    /// Whether a stored `granted_to` value denotes the public grantee.
    pub(crate) fn is_public(&self, granted_to: Option<&U>) -> bool {
        match (granted_to, self.public_grants.sentinel()) {
            (None, _) => true,
            (Some(key), Some(sentinel)) => key == sentinel,
            (Some(_), None) => false,
        }
    }

    /// Maps the caller-facing grantee (`None` = public) to its stored form.
    pub(crate) fn stored_grantee<'a>(&'a self, granted_to: Option<&'a U>) -> Option<&'a U> {
        granted_to.or_else(|| self.public_grants.sentinel())
    }
}

/// Builder for [`PermissionsRelation`].
#[derive(Debug, Clone)]
pub struct PermissionsRelationBuilder<U, R> {
    grantees: Collection,
    resources: Collection,
    owner_permissions: Permission,
    max_public: Permission,
    max_user_granted: Permission,
    table_name: Option<String>,
    public_grants: PublicGrants<U>,
    _resource_key: PhantomData<fn() -> R>,
}

impl<U: GrantKey, R: GrantKey> PermissionsRelationBuilder<U, R> {
    #[must_use]
    pub fn owner_permissions(mut self, level: Permission) -> Self {
        self.owner_permissions = level;
        self
    }

    #[must_use]
    pub fn max_public_permissions(mut self, level: Permission) -> Self {
        self.max_public = level;
        self
    }

    #[must_use]
    pub fn max_user_granted_permissions(mut self, level: Permission) -> Self {
        self.max_user_granted = level;
        self
    }

    /// Override the derived `<resources>_permissions` table name.
    #[must_use]
    pub fn table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn public_grants(mut self, strategy: PublicGrants<U>) -> Self {
        self.public_grants = strategy;
        self
    }

    /// Validate and freeze the relation.
    ///
    /// # Errors
    ///
    /// [`PermissionsError::InvalidCeilings`] if the public ceiling exceeds
    /// the user-granted ceiling.
    pub fn build(self) -> Result<PermissionsRelation<U, R>, PermissionsError> {
        if self.max_public > self.max_user_granted {
            return Err(PermissionsError::InvalidCeilings {
                max_public: self.max_public,
                max_user_granted: self.max_user_granted,
            });
        }

        let table_name = self
            .table_name
            .unwrap_or_else(|| format!("{}_permissions", self.resources.table()));

        Ok(PermissionsRelation {
            grantees: self.grantees,
            resources: self.resources,
            owner_permissions: self.owner_permissions,
            max_public: self.max_public,
            max_user_granted: self.max_user_granted,
            table_name,
            public_grants: self.public_grants,
            _resource_key: PhantomData,
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn builder() -> PermissionsRelationBuilder<i64, i64> {
        PermissionsRelation::builder(
            Collection::new("users", "id"),
            Collection::new("glossaries", "id"),
        )
    }

    #[test]
    fn ceilings_are_validated_for_every_pair() {
        for public in 0..=10u16 {
            for user in 0..=10u16 {
                let result = builder()
                    .max_public_permissions(Permission::new(public))
                    .max_user_granted_permissions(Permission::new(user))
                    .build();
                if public > user {
                    assert!(
                        matches!(result, Err(PermissionsError::InvalidCeilings { .. })),
                        "public={public} user={user} must fail"
                    );
                } else {
                    assert!(result.is_ok(), "public={public} user={user} must succeed");
                }
            }
        }
    }

    #[test]
    fn table_name_defaults_to_resource_table() {
        let relation = builder().build().unwrap();
        assert_eq!(relation.table_name(), "glossaries_permissions");

        let relation = builder().table_name("glossary_acl").build().unwrap();
        assert_eq!(relation.table_name(), "glossary_acl");
    }

    #[test]
    fn granted_to_nullability_follows_public_ceiling() {
        let relation = builder().build().unwrap();
        assert!(relation.granted_to_nullable());

        let relation = builder()
            .max_public_permissions(Permission::NONE)
            .build()
            .unwrap();
        assert!(!relation.granted_to_nullable());

        let relation = builder()
            .public_grants(PublicGrants::Sentinel(0))
            .build()
            .unwrap();
        assert!(!relation.granted_to_nullable());
        assert!(relation.is_public(Some(&0)));
        assert!(relation.is_public(None));
        assert!(!relation.is_public(Some(&1)));
        assert_eq!(relation.stored_grantee(None), Some(&0));
    }

    #[test]
    fn config_defaults_are_applied() {
        let yaml = r"
grantees:
  table: users
resources:
  table: glossaries
";
        let cfg: PermissionsConfig<i64> = match serde_saphyr::from_str(yaml) {
            Ok(cfg) => cfg,
            Err(e) => panic!("failed to parse config: {e}"),
        };
        let relation = PermissionsRelation::<i64, i64>::from_config(cfg).unwrap();

        assert_eq!(relation.grantees().column(), "id");
        assert_eq!(relation.owner_permissions(), Permission::new(8));
        assert_eq!(relation.max_public_permissions(), Permission::new(1));
        assert_eq!(relation.max_user_granted_permissions(), Permission::new(2));
        assert_eq!(relation.public_grants(), &PublicGrants::PartialIndex);
        assert_eq!(relation.table_name(), "glossaries_permissions");
    }

    #[test]
    fn config_parses_sentinel_strategy() {
        let yaml = r"
grantees: { table: accounts, column: account_id }
resources: { table: terms, column: term_id }
max_public_permissions: 2
max_user_granted_permissions: 4
table_name: term_acl
public_grants:
  sentinel: 0
";
        let cfg: PermissionsConfig<i64> = match serde_saphyr::from_str(yaml) {
            Ok(cfg) => cfg,
            Err(e) => panic!("failed to parse config: {e}"),
        };
        let relation = PermissionsRelation::<i64, i64>::from_config(cfg).unwrap();

        assert_eq!(relation.public_grants(), &PublicGrants::Sentinel(0));
        assert_eq!(relation.resources().column(), "term_id");
        assert_eq!(relation.table_name(), "term_acl");
    }

    #[test]
    fn config_with_inverted_ceilings_fails() {
        let yaml = r"
grantees: { table: users }
resources: { table: glossaries }
max_public_permissions: 3
max_user_granted_permissions: 2
";
        let cfg: PermissionsConfig<i64> = serde_saphyr::from_str(yaml).unwrap();
        let result = PermissionsRelation::<i64, i64>::from_config(cfg);
        assert!(matches!(result, Err(PermissionsError::InvalidCeilings { .. })));
    }

    #[test]
    fn config_rejects_unknown_fields() {
        let yaml = r"
grantees: { table: users }
resources: { table: glossaries }
unexpected: true
";
        let parsed: Result<PermissionsConfig<i64>, _> = serde_saphyr::from_str(yaml);
        assert!(parsed.is_err());
    }
}
