//! `sea-orm-migration` adapter for a grant table.

use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::DbErr;
use sea_orm_migration::{MigrationName, MigrationTrait, SchemaManager};

use crate::key::GrantKey;
use crate::relation::PermissionsRelation;
use crate::store::GrantStore;

/// Migration creating (up) and dropping (down) the grant table of one
/// relation, for modules that manage their schema with a `Migrator`.
///
/// ```rust,ignore
/// fn migrations() -> Vec<Box<dyn MigrationTrait>> {
///     vec![
///         Box::new(m20250101_000001_create_glossaries::Migration),
///         Box::new(PermissionsMigration::new(
///             "m20250101_000002_create_glossaries_permissions",
///             relation.clone(),
///         )),
///     ]
/// }
/// ```
///
/// Must run after the migrations creating the grantee and resource tables.
#[derive(Debug, Clone)]
pub struct PermissionsMigration<U, R> {
    name: String,
    store: GrantStore<U, R>,
}

impl<U: GrantKey, R: GrantKey> PermissionsMigration<U, R> {
    #[must_use]
    pub fn new(name: impl Into<String>, relation: Arc<PermissionsRelation<U, R>>) -> Self {
        Self {
            name: name.into(),
            store: GrantStore::new(relation),
        }
    }
}

impl<U: GrantKey, R: GrantKey> MigrationName for PermissionsMigration<U, R> {
    fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl<U: GrantKey, R: GrantKey> MigrationTrait for PermissionsMigration<U, R> {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        self.store
            .create_schema(manager.get_connection())
            .await
            .map_err(DbErr::from)
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        self.store
            .drop_schema(manager.get_connection())
            .await
            .map_err(DbErr::from)
    }
}
