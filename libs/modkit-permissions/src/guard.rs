//! Permission guards for `SeaORM` selects.
//!
//! A guarded select only returns resources on which the acting user
//! resolves to at least a required level. Resolution happens inside the
//! query: the grant table is left-joined twice (personal row, public row),
//! each side is clamped to its ceiling, and the greater value is compared
//! against the requirement. The result equals filtering the output of
//! [`ResourcePermissions::get_permissions_batch`] in process.
//!
//! The join is correlated on the key column declared by [`GuardedEntity`],
//! and a `Select<E>` always has `E` in its `FROM`, so an uncorrelatable
//! guard cannot be written.
//!
//! # Example
//!
//! ```rust,ignore
//! impl GuardedEntity for glossary::Entity {
//!     type Key = i64;
//!     fn key_column() -> Self::Column {
//!         glossary::Column::Id
//!     }
//! }
//!
//! let readable = permissions
//!     .guard(glossary::Entity::find(), Some(&user_id), READ)
//!     .all(&conn)
//!     .await?;
//! ```

use sea_orm::sea_query::{
    Alias, CaseStatement, Condition, Expr, Func, JoinType, SelectStatement, SimpleExpr,
};
use sea_orm::{EntityTrait, QueryTrait, Select};

use crate::key::GrantKey;
use crate::level::Permission;
use crate::resolve::ResourcePermissions;
use crate::store::{GrantColumn, bind};

/// Column alias under which [`ResourcePermissions::guard_with_permissions`]
/// projects the resolved level.
pub const RESOLVED_PERMISSIONS: &str = "resolved_permissions";

const USER_GRANT: &str = "user_grant";
const PUBLIC_GRANT: &str = "public_grant";

/// An entity whose rows are governed by a permissions relation.
///
/// Implement manually for each resource entity.
pub trait GuardedEntity: EntityTrait {
    /// Key type of the entity, matching the relation's resource key.
    type Key: GrantKey;

    /// Column holding the resource key referenced by the grant table.
    fn key_column() -> Self::Column;
}

impl<U: GrantKey, R: GrantKey> ResourcePermissions<U, R> {
    /// Restrict `select` to resources where `user` (`None` = anonymous)
    /// resolves to at least `required`.
    ///
    /// Adds the joins `user_grant` and `public_grant`; guarding the same
    /// select twice is not supported.
    #[must_use]
    pub fn guard<E>(&self, select: Select<E>, user: Option<&U>, required: Permission) -> Select<E>
    where
        E: GuardedEntity<Key = R>,
    {
        let mut select = select;
        let query = select.query();
        let level = self.join_grants::<E>(query, user);
        query.and_where(Expr::expr(level).gte(required.to_stored()));
        select
    }

    /// Same as [`Self::guard`], also projecting the resolved level as
    /// [`RESOLVED_PERMISSIONS`].
    #[must_use]
    pub fn guard_with_permissions<E>(
        &self,
        select: Select<E>,
        user: Option<&U>,
        required: Permission,
    ) -> Select<E>
    where
        E: GuardedEntity<Key = R>,
    {
        let mut select = select;
        let query = select.query();
        let level = self.join_grants::<E>(query, user);
        query
            .expr_as(level.clone(), Alias::new(RESOLVED_PERMISSIONS))
            .and_where(Expr::expr(level).gte(required.to_stored()));
        select
    }

    /// Join the applicable grant rows and return the resolved-level expression.
    fn join_grants<E>(&self, query: &mut SelectStatement, user: Option<&U>) -> SimpleExpr
    where
        E: GuardedEntity<Key = R>,
    {
        let store = self.store();
        let relation = self.relation();
        let table = store.table();

        let public = Alias::new(PUBLIC_GRANT);
        query.join_as(
            JoinType::LeftJoin,
            table.clone(),
            public.clone(),
            Condition::all()
                .add(
                    Expr::col((public.clone(), GrantColumn::ResourceId))
                        .equals((E::default(), E::key_column())),
                )
                .add(store.public_condition(&public)),
        );
        let public_level = clamped(&public, relation.max_public_permissions(), false);

        let Some(user) = user else {
            return public_level;
        };

        let personal = Alias::new(USER_GRANT);
        query.join_as(
            JoinType::LeftJoin,
            table,
            personal.clone(),
            Condition::all()
                .add(
                    Expr::col((personal.clone(), GrantColumn::ResourceId))
                        .equals((E::default(), E::key_column())),
                )
                .add(Expr::col((personal.clone(), GrantColumn::GrantedTo)).eq(bind(user.clone()))),
        );
        let user_level = clamped(&personal, relation.max_user_granted_permissions(), true);

        let greater = Expr::case(
            Expr::expr(user_level.clone()).gte(public_level.clone()),
            user_level,
        )
        .finally(public_level);
        SimpleExpr::Case(Box::new(greater))
    }
}

/// `COALESCE(CASE WHEN <negative> THEN 0 WHEN <over ceiling> THEN ceiling
/// WHEN <over u16::MAX> THEN u16::MAX ELSE level END, 0)`.
///
/// Mirrors the in-process read path: stored values saturate into the
/// `Permission` range, then the ceiling applies. With `delegated_only`, only
/// rows carrying a grantor are clamped to the ceiling.
fn clamped(alias: &Alias, ceiling: Permission, delegated_only: bool) -> SimpleExpr {
    let level = || Expr::col((alias.clone(), GrantColumn::Permissions));
    let mut over = level().gt(ceiling.to_stored());
    if delegated_only {
        over = Expr::col((alias.clone(), GrantColumn::GrantedBy))
            .is_not_null()
            .and(over);
    }
    let max = Permission::new(u16::MAX).to_stored();
    let case: CaseStatement = Expr::case(
        level().lt(Permission::NONE.to_stored()),
        bind(Permission::NONE.to_stored()),
    )
    .case(over, bind(ceiling.to_stored()))
    .case(level().gt(max), bind(max))
    .finally(level());
    Func::coalesce([
        SimpleExpr::Case(Box::new(case)),
        bind(Permission::NONE.to_stored()),
    ])
    .into()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::relation::{Collection, PermissionsRelation};
    use sea_orm::DbBackend;

    mod glossary {
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
        #[sea_orm(table_name = "glossaries")]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i64,
            pub name: String,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    impl GuardedEntity for glossary::Entity {
        type Key = i64;

        fn key_column() -> Self::Column {
            glossary::Column::Id
        }
    }

    fn permissions() -> ResourcePermissions<i64, i64> {
        ResourcePermissions::new(
            PermissionsRelation::builder(
                Collection::new("users", "id"),
                Collection::new("glossaries", "id"),
            )
            .max_public_permissions(Permission::new(1))
            .max_user_granted_permissions(Permission::new(2))
            .build()
            .unwrap(),
        )
    }

    #[test]
    fn guard_joins_both_grant_rows() {
        let sql = permissions()
            .guard(glossary::Entity::find(), Some(&7), Permission::new(1))
            .build(DbBackend::Sqlite)
            .to_string();

        for fragment in [
            r#"LEFT JOIN "glossaries_permissions" AS "public_grant""#,
            r#""public_grant"."resource_id" = "glossaries"."id""#,
            r#""public_grant"."granted_to" IS NULL"#,
            r#"LEFT JOIN "glossaries_permissions" AS "user_grant""#,
            r#""user_grant"."resource_id" = "glossaries"."id""#,
            r#""user_grant"."granted_to" = 7"#,
        ] {
            assert!(sql.contains(fragment), "missing {fragment} in {sql}");
        }
        assert!(sql.contains("WHERE"));
    }

    #[test]
    fn anonymous_guard_only_joins_public_row() {
        let sql = permissions()
            .guard(glossary::Entity::find(), None, Permission::new(1))
            .build(DbBackend::Postgres)
            .to_string();

        assert!(sql.contains(r#"AS "public_grant""#));
        assert!(!sql.contains("user_grant"));
    }

    #[test]
    fn projection_is_aliased() {
        let sql = permissions()
            .guard_with_permissions(glossary::Entity::find(), Some(&7), Permission::NONE)
            .build(DbBackend::Postgres)
            .to_string();

        assert!(sql.contains(&format!(r#"AS "{RESOLVED_PERMISSIONS}""#)));
    }

    #[test]
    fn negative_levels_are_floored_in_sql() {
        let sql = permissions()
            .guard(glossary::Entity::find(), None, Permission::NONE)
            .build(DbBackend::Sqlite)
            .to_string();

        assert!(sql.contains(r#""public_grant"."permissions" < 0"#), "{sql}");
    }
}
