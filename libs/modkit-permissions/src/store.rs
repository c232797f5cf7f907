//! Grant table persistence.
//!
//! [`GrantStore`] owns the schema of one permissions relation and the raw
//! reads and writes against it. It applies no policy: ceilings are checked
//! and clamped by the engine layered on top.
//!
//! Every statement is a single round trip. The upsert is one
//! `INSERT .. ON CONFLICT .. DO UPDATE`, so concurrent writers to the same
//! `(granted_to, resource_id)` key resolve to last-commit-wins inside the
//! database without a read-modify-write window.

use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use sea_orm::sea_query::{
    Alias, ColumnDef, Condition, Expr, ForeignKey, ForeignKeyAction, Index, OnConflict, Order,
    Query, SimpleExpr, Table, Value,
};
use sea_orm::{ConnectionTrait, DbBackend, DeriveIden, QueryResult, Statement};
use tracing::instrument;

use crate::error::PermissionsError;
use crate::key::GrantKey;
use crate::level::Permission;
use crate::relation::{PermissionsRelation, PublicGrants};

/// Upper bound of bind parameters in one `resource_id IN (..)` list.
const MAX_IDS_PER_QUERY: usize = 500;

#[derive(DeriveIden, Clone, Copy)]
pub(crate) enum GrantColumn {
    GrantedTo,
    ResourceId,
    Permissions,
    GrantedAt,
    GrantedBy,
}

impl GrantColumn {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::GrantedTo => "granted_to",
            Self::ResourceId => "resource_id",
            Self::Permissions => "permissions",
            Self::GrantedAt => "granted_at",
            Self::GrantedBy => "granted_by",
        }
    }
}

/// A stored grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant<U, R> {
    /// Grantee, or `None` for the public grant.
    pub granted_to: Option<U>,
    pub resource_id: R,
    pub permissions: Permission,
    pub granted_at: NaiveDateTime,
    /// Grantor, or `None` for a system grant.
    pub granted_by: Option<U>,
}

/// A grant row applicable to a resolution request: the caller's own row or
/// the public row of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicableGrant<U, R> {
    pub resource_id: R,
    /// `true` for the public row.
    pub public: bool,
    /// Level as stored, before clamping.
    pub permissions: Permission,
    pub granted_by: Option<U>,
}

pub(crate) fn bind(value: impl Into<Value>) -> SimpleExpr {
    SimpleExpr::Value(value.into())
}

fn quote(backend: DbBackend, ident: &str) -> String {
    match backend {
        DbBackend::MySql => format!("`{}`", ident.replace('`', "``")),
        _ => format!("\"{}\"", ident.replace('"', "\"\"")),
    }
}

/// Raw persistence for one [`PermissionsRelation`].
#[derive(Debug, Clone)]
pub struct GrantStore<U, R> {
    relation: Arc<PermissionsRelation<U, R>>,
}

impl<U: GrantKey, R: GrantKey> GrantStore<U, R> {
    #[must_use]
    pub fn new(relation: Arc<PermissionsRelation<U, R>>) -> Self {
        Self { relation }
    }

    #[inline]
    #[must_use]
    pub fn relation(&self) -> &PermissionsRelation<U, R> {
        &self.relation
    }

    pub(crate) fn table(&self) -> Alias {
        Alias::new(self.relation.table_name())
    }

    /// Condition selecting the public row, in the given table alias.
    pub(crate) fn public_condition(&self, table: &Alias) -> SimpleExpr {
        let col = Expr::col((table.clone(), GrantColumn::GrantedTo));
        match self.relation.public_grants().sentinel() {
            Some(sentinel) => col.eq(bind(sentinel.clone())),
            None => col.is_null(),
        }
    }

    fn grantee_condition(&self, table: &Alias, granted_to: Option<&U>) -> SimpleExpr {
        match granted_to {
            Some(key) => Expr::col((table.clone(), GrantColumn::GrantedTo)).eq(bind(key.clone())),
            None => self.public_condition(table),
        }
    }

    fn ensure_supported(&self, backend: DbBackend) -> Result<(), PermissionsError> {
        let supported = match self.relation.public_grants() {
            PublicGrants::NullsNotDistinct => backend == DbBackend::Postgres,
            PublicGrants::PartialIndex => {
                matches!(backend, DbBackend::Postgres | DbBackend::Sqlite)
            }
            PublicGrants::Sentinel(_) => true,
        };
        if supported {
            Ok(())
        } else {
            Err(PermissionsError::UnsupportedBackend {
                strategy: self.relation.public_grants().name(),
                backend,
            })
        }
    }

    // ── Schema ──────────────────────────────────────────────────────

    /// Create the grant table and its indexes if they do not exist.
    ///
    /// # Errors
    ///
    /// - [`PermissionsError::UnsupportedBackend`] if the public-grant strategy
    ///   cannot be expressed on the connection's backend
    /// - [`PermissionsError::Db`] if a statement fails
    #[instrument(skip_all, fields(table = %self.relation.table_name()))]
    pub async fn create_schema(&self, conn: &impl ConnectionTrait) -> Result<(), PermissionsError> {
        let backend = conn.get_database_backend();
        self.ensure_supported(backend)?;

        let rel = &self.relation;
        let table = self.table();
        let name = rel.table_name();

        let mut granted_to = ColumnDef::new_with_type(GrantColumn::GrantedTo, U::column_type());
        if rel.granted_to_nullable() {
            granted_to.null();
        } else {
            granted_to.not_null();
        }

        let mut create = Table::create();
        create
            .table(table.clone())
            .if_not_exists()
            .col(&mut granted_to)
            .col(ColumnDef::new_with_type(GrantColumn::ResourceId, R::column_type()).not_null())
            .col(ColumnDef::new(GrantColumn::Permissions).integer().not_null())
            .col(
                ColumnDef::new(GrantColumn::GrantedAt)
                    .date_time()
                    .not_null()
                    .default(Expr::current_timestamp()),
            )
            .col(ColumnDef::new_with_type(GrantColumn::GrantedBy, U::column_type()).null())
            .foreign_key(
                ForeignKey::create()
                    .name(format!("fk_{name}_granted_to"))
                    .from(table.clone(), GrantColumn::GrantedTo)
                    .to(
                        Alias::new(rel.grantees().table()),
                        Alias::new(rel.grantees().column()),
                    )
                    .on_delete(ForeignKeyAction::Cascade),
            )
            .foreign_key(
                ForeignKey::create()
                    .name(format!("fk_{name}_resource_id"))
                    .from(table.clone(), GrantColumn::ResourceId)
                    .to(
                        Alias::new(rel.resources().table()),
                        Alias::new(rel.resources().column()),
                    )
                    .on_delete(ForeignKeyAction::Cascade),
            )
            .foreign_key(
                ForeignKey::create()
                    .name(format!("fk_{name}_granted_by"))
                    .from(table.clone(), GrantColumn::GrantedBy)
                    .to(
                        Alias::new(rel.grantees().table()),
                        Alias::new(rel.grantees().column()),
                    )
                    .on_delete(ForeignKeyAction::Cascade),
            );

        // NULLS NOT DISTINCT has no portable builder form; that index is raw.
        if !matches!(rel.public_grants(), PublicGrants::NullsNotDistinct) {
            create.index(
                Index::create()
                    .name(format!("{name}_grantee_resource_key"))
                    .unique()
                    .col(GrantColumn::GrantedTo)
                    .col(GrantColumn::ResourceId),
            );
        }

        conn.execute(backend.build(&create)).await?;

        for stmt in self.index_statements(backend) {
            conn.execute(stmt).await?;
        }

        tracing::info!(
            strategy = rel.public_grants().name(),
            "permissions table ready"
        );
        Ok(())
    }

    fn index_statements(&self, backend: DbBackend) -> Vec<Statement> {
        let name = self.relation.table_name();
        let q = |ident: &str| quote(backend, ident);
        let mut stmts = Vec::new();

        match self.relation.public_grants() {
            PublicGrants::NullsNotDistinct => stmts.push(Statement::from_string(
                backend,
                format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({}, {}) NULLS NOT DISTINCT",
                    q(&format!("{name}_grantee_resource_key")),
                    q(name),
                    q(GrantColumn::GrantedTo.as_str()),
                    q(GrantColumn::ResourceId.as_str()),
                ),
            )),
            PublicGrants::PartialIndex => stmts.push(Statement::from_string(
                backend,
                format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({}) WHERE {} IS NULL",
                    q(&format!("{name}_public_key")),
                    q(name),
                    q(GrantColumn::ResourceId.as_str()),
                    q(GrantColumn::GrantedTo.as_str()),
                ),
            )),
            PublicGrants::Sentinel(_) => {}
        }

        // InnoDB already indexes foreign-key columns.
        if backend != DbBackend::MySql {
            let index = Index::create()
                .if_not_exists()
                .name(format!("{name}_resource_id_idx"))
                .table(self.table())
                .col(GrantColumn::ResourceId)
                .to_owned();
            stmts.push(backend.build(&index));
        }
        stmts
    }

    /// Drop the grant table. No-op if it does not exist.
    ///
    /// # Errors
    ///
    /// [`PermissionsError::Db`] if the statement fails.
    #[instrument(skip_all, fields(table = %self.relation.table_name()))]
    pub async fn drop_schema(&self, conn: &impl ConnectionTrait) -> Result<(), PermissionsError> {
        let backend = conn.get_database_backend();
        let drop = Table::drop().table(self.table()).if_exists().to_owned();
        conn.execute(backend.build(&drop)).await?;
        tracing::info!("permissions table dropped");
        Ok(())
    }

    // ── Writes ──────────────────────────────────────────────────────

    /// Insert or replace the grant keyed by `(granted_to, resource_id)`.
    ///
    /// `granted_to == None` addresses the public grant.
    ///
    /// # Errors
    ///
    /// [`PermissionsError::Db`] if the statement fails, including foreign-key
    /// violations for unknown grantees or resources.
    #[instrument(skip(self, conn), fields(table = %self.relation.table_name()))]
    pub async fn upsert_grant(
        &self,
        conn: &impl ConnectionTrait,
        granted_to: Option<&U>,
        resource_id: &R,
        permissions: Permission,
        granted_by: Option<&U>,
    ) -> Result<(), PermissionsError> {
        let backend = conn.get_database_backend();
        let stored_to = self.relation.stored_grantee(granted_to);

        let updated = [
            GrantColumn::Permissions,
            GrantColumn::GrantedAt,
            GrantColumn::GrantedBy,
        ];
        let on_conflict = match (self.relation.public_grants(), stored_to) {
            (PublicGrants::PartialIndex, None) => OnConflict::column(GrantColumn::ResourceId)
                .target_and_where(Expr::col(GrantColumn::GrantedTo).is_null())
                .update_columns(updated)
                .to_owned(),
            _ => OnConflict::columns([GrantColumn::GrantedTo, GrantColumn::ResourceId])
                .update_columns(updated)
                .to_owned(),
        };

        let mut insert = Query::insert();
        insert
            .into_table(self.table())
            .columns([
                GrantColumn::GrantedTo,
                GrantColumn::ResourceId,
                GrantColumn::Permissions,
                GrantColumn::GrantedAt,
                GrantColumn::GrantedBy,
            ])
            .values([
                bind(U::to_value(stored_to)),
                bind(resource_id.clone()),
                bind(permissions.to_stored()),
                bind(Utc::now().naive_utc()),
                bind(U::to_value(granted_by)),
            ])
            .map_err(|e| sea_orm::DbErr::Custom(e.to_string()))?
            .on_conflict(on_conflict);

        conn.execute(backend.build(&insert)).await?;
        tracing::debug!("grant stored");
        Ok(())
    }

    /// Delete the grant keyed by `(granted_to, resource_id)`.
    ///
    /// Returns whether a row was removed; deleting an absent grant is not an
    /// error.
    ///
    /// # Errors
    ///
    /// [`PermissionsError::Db`] if the statement fails.
    #[instrument(skip(self, conn), fields(table = %self.relation.table_name()))]
    pub async fn delete_grant(
        &self,
        conn: &impl ConnectionTrait,
        granted_to: Option<&U>,
        resource_id: &R,
    ) -> Result<bool, PermissionsError> {
        let backend = conn.get_database_backend();
        let table = self.table();
        let delete = Query::delete()
            .from_table(table.clone())
            .and_where(Expr::col(GrantColumn::ResourceId).eq(bind(resource_id.clone())))
            .and_where(self.grantee_condition(&table, granted_to))
            .to_owned();

        let res = conn.execute(backend.build(&delete)).await?;
        tracing::debug!(rows = res.rows_affected(), "grant deleted");
        Ok(res.rows_affected() > 0)
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Fetch the grants applicable to `user` on `resource_ids`: the user's
    /// own rows and the public rows. `user == None` fetches public rows only.
    ///
    /// The result is ordered by `resource_id` (per `R: Ord`), and within one
    /// resource the user's row precedes the public row, so each resource
    /// contributes zero, one or two adjacent rows.
    ///
    /// # Errors
    ///
    /// [`PermissionsError::Db`] if a query fails or a row cannot be decoded.
    #[instrument(
        skip(self, conn, resource_ids),
        fields(table = %self.relation.table_name(), count = resource_ids.len())
    )]
    pub async fn query_grants(
        &self,
        conn: &impl ConnectionTrait,
        user: Option<&U>,
        resource_ids: &[R],
    ) -> Result<Vec<ApplicableGrant<U, R>>, PermissionsError> {
        let backend = conn.get_database_backend();
        let table = self.table();
        let mut grants = Vec::new();

        for chunk in resource_ids.chunks(MAX_IDS_PER_QUERY) {
            let applicable = match user {
                Some(key) => Condition::any()
                    .add(self.grantee_condition(&table, Some(key)))
                    .add(self.public_condition(&table)),
                None => Condition::all().add(self.public_condition(&table)),
            };
            let filter = Condition::all()
                .add(
                    Expr::col(GrantColumn::ResourceId)
                        .is_in(chunk.iter().map(|id| bind(id.clone()))),
                )
                .add(applicable);

            let select = Query::select()
                .columns([
                    GrantColumn::GrantedTo,
                    GrantColumn::ResourceId,
                    GrantColumn::Permissions,
                    GrantColumn::GrantedBy,
                ])
                .from(table.clone())
                .cond_where(filter)
                .order_by(GrantColumn::ResourceId, Order::Asc)
                .order_by_expr(self.public_condition(&table), Order::Asc)
                .to_owned();

            for row in conn.query_all(backend.build(&select)).await? {
                grants.push(self.decode_applicable(&row)?);
            }
        }

        // Text collations in the database may disagree with `Ord`; the stable
        // sort keeps the user-before-public order inside each resource.
        grants.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));

        tracing::debug!(rows = grants.len(), "applicable grants fetched");
        Ok(grants)
    }

    /// List every grant on a resource, public grant first, then by grantee.
    ///
    /// Levels are returned as stored; use the engine for clamped values.
    ///
    /// # Errors
    ///
    /// [`PermissionsError::Db`] if the query fails or a row cannot be decoded.
    #[instrument(skip(self, conn), fields(table = %self.relation.table_name()))]
    pub async fn list_grants(
        &self,
        conn: &impl ConnectionTrait,
        resource_id: &R,
    ) -> Result<Vec<Grant<U, R>>, PermissionsError> {
        let backend = conn.get_database_backend();
        let table = self.table();
        let select = Query::select()
            .columns([
                GrantColumn::GrantedTo,
                GrantColumn::ResourceId,
                GrantColumn::Permissions,
                GrantColumn::GrantedAt,
                GrantColumn::GrantedBy,
            ])
            .from(table.clone())
            .and_where(Expr::col(GrantColumn::ResourceId).eq(bind(resource_id.clone())))
            .order_by_expr(self.public_condition(&table), Order::Desc)
            .order_by(GrantColumn::GrantedTo, Order::Asc)
            .to_owned();

        let rows = conn.query_all(backend.build(&select)).await?;
        let mut grants = Vec::with_capacity(rows.len());
        for row in rows {
            let granted_to: Option<U> = row.try_get("", GrantColumn::GrantedTo.as_str())?;
            let public = self.relation.is_public(granted_to.as_ref());
            grants.push(Grant {
                granted_to: if public { None } else { granted_to },
                resource_id: row.try_get("", GrantColumn::ResourceId.as_str())?,
                permissions: Permission::from_stored(
                    row.try_get("", GrantColumn::Permissions.as_str())?,
                ),
                granted_at: row.try_get("", GrantColumn::GrantedAt.as_str())?,
                granted_by: row.try_get("", GrantColumn::GrantedBy.as_str())?,
            });
        }
        Ok(grants)
    }

    fn decode_applicable(&self, row: &QueryResult) -> Result<ApplicableGrant<U, R>, PermissionsError> {
        let granted_to: Option<U> = row.try_get("", GrantColumn::GrantedTo.as_str())?;
        Ok(ApplicableGrant {
            public: self.relation.is_public(granted_to.as_ref()),
            resource_id: row.try_get("", GrantColumn::ResourceId.as_str())?,
            permissions: Permission::from_stored(
                row.try_get("", GrantColumn::Permissions.as_str())?,
            ),
            granted_by: row.try_get("", GrantColumn::GrantedBy.as_str())?,
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::relation::Collection;
    use sea_orm::Iden;

    fn store(strategy: PublicGrants<i64>) -> GrantStore<i64, i64> {
        let relation = PermissionsRelation::builder(
            Collection::new("users", "id"),
            Collection::new("glossaries", "id"),
        )
        .public_grants(strategy)
        .build()
        .unwrap();
        GrantStore::new(Arc::new(relation))
    }

    #[test]
    fn column_names_match_idens() {
        for col in [
            GrantColumn::GrantedTo,
            GrantColumn::ResourceId,
            GrantColumn::Permissions,
            GrantColumn::GrantedAt,
            GrantColumn::GrantedBy,
        ] {
            assert_eq!(col.to_string(), col.as_str());
        }
    }

    #[test]
    fn quoting_escapes_identifiers() {
        assert_eq!(quote(DbBackend::Postgres, "a\"b"), "\"a\"\"b\"");
        assert_eq!(quote(DbBackend::MySql, "t"), "`t`");
    }

    #[test]
    fn strategies_are_checked_against_backend() {
        let nnd = store(PublicGrants::NullsNotDistinct);
        assert!(nnd.ensure_supported(DbBackend::Postgres).is_ok());
        assert!(matches!(
            nnd.ensure_supported(DbBackend::Sqlite),
            Err(PermissionsError::UnsupportedBackend { strategy: "nulls_not_distinct", .. })
        ));

        let partial = store(PublicGrants::PartialIndex);
        assert!(partial.ensure_supported(DbBackend::Sqlite).is_ok());
        assert!(partial.ensure_supported(DbBackend::MySql).is_err());

        let sentinel = store(PublicGrants::Sentinel(0));
        assert!(sentinel.ensure_supported(DbBackend::MySql).is_ok());
    }

    #[test]
    fn nulls_not_distinct_index_is_rendered_for_postgres() {
        let stmts = store(PublicGrants::NullsNotDistinct).index_statements(DbBackend::Postgres);
        assert_eq!(
            stmts[0].sql,
            "CREATE UNIQUE INDEX IF NOT EXISTS \"glossaries_permissions_grantee_resource_key\" \
             ON \"glossaries_permissions\" (\"granted_to\", \"resource_id\") NULLS NOT DISTINCT"
        );
        assert_eq!(stmts.len(), 2);
    }

    #[test]
    fn partial_index_covers_public_rows() {
        let stmts = store(PublicGrants::PartialIndex).index_statements(DbBackend::Sqlite);
        assert!(stmts[0].sql.ends_with("(\"resource_id\") WHERE \"granted_to\" IS NULL"));
    }
}
