#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use modkit_permissions::{
    Collection, Permission, PermissionsRelation, PermissionsRelationBuilder, ResourcePermissions,
};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};

pub const READ: Permission = Permission::new(1);
pub const WRITE: Permission = Permission::new(2);
pub const OWNER: Permission = Permission::new(8);

pub const ALICE: i64 = 1;
pub const BOB: i64 = 2;
pub const CAROL: i64 = 3;

pub mod glossary {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "glossaries")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: i64,
        pub name: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}

    impl modkit_permissions::GuardedEntity for Entity {
        type Key = i64;

        fn key_column() -> Self::Column {
            Column::Id
        }
    }
}

/// In-memory `SQLite` with `users` (ids 0..=3) and `glossaries` (ids 1..=5).
///
/// A single connection keeps every statement on the same in-memory database.
pub async fn inmem_db() -> DatabaseConnection {
    let mut opts = ConnectOptions::new("sqlite::memory:");
    opts.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(opts)
        .await
        .expect("Failed to connect to in-memory database");

    for sql in [
        "PRAGMA foreign_keys = ON",
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
        "CREATE TABLE glossaries (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
        "INSERT INTO users (id, name) VALUES (0, 'public'), (1, 'alice'), (2, 'bob'), (3, 'carol')",
        "INSERT INTO glossaries (id, name) VALUES \
         (1, 'physics'), (2, 'biology'), (3, 'law'), (4, 'music'), (5, 'chess')",
    ] {
        db.execute_unprepared(sql).await.expect(sql);
    }
    db
}

pub fn builder() -> PermissionsRelationBuilder<i64, i64> {
    PermissionsRelation::builder(
        Collection::new("users", "id"),
        Collection::new("glossaries", "id"),
    )
    .owner_permissions(OWNER)
    .max_public_permissions(READ)
    .max_user_granted_permissions(WRITE)
}

/// Engine over `glossaries_permissions` with the schema already created.
pub async fn engine_from(
    db: &DatabaseConnection,
    builder: PermissionsRelationBuilder<i64, i64>,
) -> ResourcePermissions<i64, i64> {
    let relation = builder.build().expect("valid relation");
    let permissions = ResourcePermissions::from_shared(Arc::new(relation));
    permissions
        .store()
        .create_schema(db)
        .await
        .expect("Failed to create permissions table");
    permissions
}

pub async fn engine(db: &DatabaseConnection) -> ResourcePermissions<i64, i64> {
    engine_from(db, builder()).await
}

pub async fn count_rows(db: &DatabaseConnection, table: &str) -> i64 {
    let row = db
        .query_one(sea_orm::Statement::from_string(
            db.get_database_backend(),
            format!("SELECT COUNT(*) AS n FROM {table}"),
        ))
        .await
        .expect("count query")
        .expect("count row");
    row.try_get("", "n").expect("count value")
}
