use sea_query::{ColumnDef, Cond, Expr as SeaExpr, Iden, Index, OnConflict, PostgresQueryBuilder, Query as SeaQuery, Table};
use sea_query_binder::{SqlxBinder, SqlxValues};
use sqlx::{Row, postgres::PgRow};

use crate::{
    DcrError, Result,
    graph::{EventKey, RelationKind, RelationTarget},
    store::{
        db::postgres::{DbInit, DbRow},
        map_db_err,
    },
};

/// Statement builders for the `dcr_relations` table.
pub struct RelationCollection;

#[derive(Iden)]
#[iden = "dcr_relations"]
enum CollectionIden {
    Table,

    WorkflowId,
    EventId,
    Kind,
    TargetWorkflowId,
    TargetEventId,
    TargetUri,
    TargetRoles,
}

const COLUMNS: [CollectionIden; 7] = [
    CollectionIden::WorkflowId,
    CollectionIden::EventId,
    CollectionIden::Kind,
    CollectionIden::TargetWorkflowId,
    CollectionIden::TargetEventId,
    CollectionIden::TargetUri,
    CollectionIden::TargetRoles,
];

/// A stored relation row.
pub struct RelationRow {
    pub kind: RelationKind,
    pub target: RelationTarget,
}

fn source_cond(key: &EventKey) -> Cond {
    Cond::all()
        .add(SeaExpr::col(CollectionIden::WorkflowId).eq(key.workflow_id.as_str()))
        .add(SeaExpr::col(CollectionIden::EventId).eq(key.event_id.as_str()))
}

impl RelationCollection {
    pub fn select_all(key: &EventKey) -> (String, SqlxValues) {
        SeaQuery::select()
            .columns(COLUMNS)
            .from(CollectionIden::Table)
            .cond_where(source_cond(key))
            .order_by(CollectionIden::TargetWorkflowId, sea_query::Order::Asc)
            .order_by(CollectionIden::TargetEventId, sea_query::Order::Asc)
            .build_sqlx(PostgresQueryBuilder)
    }

    pub fn select_kind(
        key: &EventKey,
        kind: RelationKind,
    ) -> (String, SqlxValues) {
        SeaQuery::select()
            .columns(COLUMNS)
            .from(CollectionIden::Table)
            .cond_where(source_cond(key).add(SeaExpr::col(CollectionIden::Kind).eq(kind.as_ref())))
            .build_sqlx(PostgresQueryBuilder)
    }

    /// Insert that affects no row when the target is already related with this kind.
    pub fn insert(
        key: &EventKey,
        kind: RelationKind,
        target: &RelationTarget,
    ) -> Result<(String, SqlxValues)> {
        let roles = serde_json::to_string(&target.roles)?;
        let (sql, values) = SeaQuery::insert()
            .into_table(CollectionIden::Table)
            .columns(COLUMNS)
            .values([
                key.workflow_id.clone().into(),
                key.event_id.clone().into(),
                kind.as_ref().into(),
                target.key.workflow_id.clone().into(),
                target.key.event_id.clone().into(),
                target.uri.clone().into(),
                roles.into(),
            ])
            .map_err(map_db_err)?
            .on_conflict(
                OnConflict::columns([
                    CollectionIden::WorkflowId,
                    CollectionIden::EventId,
                    CollectionIden::Kind,
                    CollectionIden::TargetWorkflowId,
                    CollectionIden::TargetEventId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .build_sqlx(PostgresQueryBuilder);
        Ok((sql, values))
    }

    pub fn delete(
        key: &EventKey,
        kind: RelationKind,
        target: &EventKey,
    ) -> (String, SqlxValues) {
        let cond = source_cond(key)
            .add(SeaExpr::col(CollectionIden::Kind).eq(kind.as_ref()))
            .add(SeaExpr::col(CollectionIden::TargetWorkflowId).eq(target.workflow_id.as_str()))
            .add(SeaExpr::col(CollectionIden::TargetEventId).eq(target.event_id.as_str()));
        SeaQuery::delete().from_table(CollectionIden::Table).cond_where(cond).build_sqlx(PostgresQueryBuilder)
    }

    pub fn delete_all(key: &EventKey) -> (String, SqlxValues) {
        SeaQuery::delete().from_table(CollectionIden::Table).cond_where(source_cond(key)).build_sqlx(PostgresQueryBuilder)
    }
}

impl DbRow for RelationRow {
    fn from_row(row: &PgRow) -> Result<Self> {
        let kind: String = row.try_get("kind").map_err(map_db_err)?;
        let roles: String = row.try_get("target_roles").map_err(map_db_err)?;
        Ok(Self {
            kind: kind.parse().map_err(|_| DcrError::Store(format!("unknown relation kind '{kind}'")))?,
            target: RelationTarget {
                key: EventKey::new(
                    row.try_get::<String, _>("target_workflow_id").map_err(map_db_err)?,
                    row.try_get::<String, _>("target_event_id").map_err(map_db_err)?,
                ),
                uri: row.try_get("target_uri").map_err(map_db_err)?,
                roles: serde_json::from_str(&roles)?,
            },
        })
    }
}

impl DbInit for RelationCollection {
    fn schema() -> Vec<String> {
        vec![
            Table::create()
                .table(CollectionIden::Table)
                .if_not_exists()
                .col(ColumnDef::new(CollectionIden::WorkflowId).string().not_null())
                .col(ColumnDef::new(CollectionIden::EventId).string().not_null())
                .col(ColumnDef::new(CollectionIden::Kind).string().not_null())
                .col(ColumnDef::new(CollectionIden::TargetWorkflowId).string().not_null())
                .col(ColumnDef::new(CollectionIden::TargetEventId).string().not_null())
                .col(ColumnDef::new(CollectionIden::TargetUri).string().not_null())
                .col(ColumnDef::new(CollectionIden::TargetRoles).text().not_null())
                .primary_key(
                    Index::create()
                        .col(CollectionIden::WorkflowId)
                        .col(CollectionIden::EventId)
                        .col(CollectionIden::Kind)
                        .col(CollectionIden::TargetWorkflowId)
                        .col(CollectionIden::TargetEventId),
                )
                .build(PostgresQueryBuilder),
            Index::create()
                .name("idx_dcr_relations_source")
                .if_not_exists()
                .table(CollectionIden::Table)
                .col(CollectionIden::WorkflowId)
                .col(CollectionIden::EventId)
                .build(PostgresQueryBuilder),
        ]
    }
}
