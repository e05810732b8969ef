use std::collections::BTreeSet;

use sea_query::{ColumnDef, Cond, Expr as SeaExpr, Iden, Index, OnConflict, PostgresQueryBuilder, Query as SeaQuery, SelectStatement, Table};
use sea_query_binder::{SqlxBinder, SqlxValues};
use sqlx::{Row, postgres::PgRow};

use crate::{
    Result,
    graph::{EventKey, EventState, Flag, LockRecord, Marking, Relations},
    store::{
        db::postgres::{DbInit, DbRow},
        map_db_err,
    },
};

/// Statement builders for the `dcr_events` table.
pub struct EventCollection;

#[derive(Iden)]
#[iden = "dcr_events"]
enum CollectionIden {
    Table,

    WorkflowId,
    EventId,
    Name,
    Uri,
    Roles,
    Executed,
    Included,
    Pending,
    InitialExecuted,
    InitialIncluded,
    InitialPending,
    LockOwner,
    LockedAt,
}

const COLUMNS: [CollectionIden; 13] = [
    CollectionIden::WorkflowId,
    CollectionIden::EventId,
    CollectionIden::Name,
    CollectionIden::Uri,
    CollectionIden::Roles,
    CollectionIden::Executed,
    CollectionIden::Included,
    CollectionIden::Pending,
    CollectionIden::InitialExecuted,
    CollectionIden::InitialIncluded,
    CollectionIden::InitialPending,
    CollectionIden::LockOwner,
    CollectionIden::LockedAt,
];

fn flag_column(flag: Flag) -> CollectionIden {
    match flag {
        Flag::Executed => CollectionIden::Executed,
        Flag::Included => CollectionIden::Included,
        Flag::Pending => CollectionIden::Pending,
    }
}

fn key_cond(key: &EventKey) -> Cond {
    Cond::all()
        .add(SeaExpr::col(CollectionIden::WorkflowId).eq(key.workflow_id.as_str()))
        .add(SeaExpr::col(CollectionIden::EventId).eq(key.event_id.as_str()))
}

impl EventCollection {
    pub fn select(key: &EventKey) -> (String, SqlxValues) {
        SeaQuery::select().columns(COLUMNS).from(CollectionIden::Table).cond_where(key_cond(key)).build_sqlx(PostgresQueryBuilder)
    }

    pub fn select_flag(
        key: &EventKey,
        flag: Flag,
    ) -> (String, SqlxValues) {
        Self::select_columns(key, [flag_column(flag)]).build_sqlx(PostgresQueryBuilder)
    }

    pub fn select_roles(key: &EventKey) -> (String, SqlxValues) {
        Self::select_columns(key, [CollectionIden::Roles]).build_sqlx(PostgresQueryBuilder)
    }

    pub fn select_lock(key: &EventKey) -> (String, SqlxValues) {
        Self::select_columns(key, [CollectionIden::LockOwner, CollectionIden::LockedAt]).build_sqlx(PostgresQueryBuilder)
    }

    fn select_columns<const N: usize>(
        key: &EventKey,
        columns: [CollectionIden; N],
    ) -> SelectStatement {
        SeaQuery::select().columns(columns).from(CollectionIden::Table).cond_where(key_cond(key)).to_owned()
    }

    /// Insert that affects no row when the key is already taken.
    pub fn insert(state: &EventState) -> Result<(String, SqlxValues)> {
        let roles = serde_json::to_string(&state.roles)?;
        let lock_owner = state.lock.as_ref().map(|l| l.owner.clone());
        let locked_at = state.lock.as_ref().map(|l| l.acquired_at);

        let (sql, values) = SeaQuery::insert()
            .into_table(CollectionIden::Table)
            .columns(COLUMNS)
            .values([
                state.key.workflow_id.clone().into(),
                state.key.event_id.clone().into(),
                state.name.clone().into(),
                state.uri.clone().into(),
                roles.into(),
                state.marking.executed.into(),
                state.marking.included.into(),
                state.marking.pending.into(),
                state.initial.executed.into(),
                state.initial.included.into(),
                state.initial.pending.into(),
                lock_owner.into(),
                locked_at.into(),
            ])
            .map_err(map_db_err)?
            .on_conflict(OnConflict::columns([CollectionIden::WorkflowId, CollectionIden::EventId]).do_nothing().to_owned())
            .build_sqlx(PostgresQueryBuilder);
        Ok((sql, values))
    }

    pub fn delete(key: &EventKey) -> (String, SqlxValues) {
        SeaQuery::delete().from_table(CollectionIden::Table).cond_where(key_cond(key)).build_sqlx(PostgresQueryBuilder)
    }

    pub fn update_flag(
        key: &EventKey,
        flag: Flag,
        value: bool,
    ) -> (String, SqlxValues) {
        SeaQuery::update().table(CollectionIden::Table).values([(flag_column(flag), value.into())]).cond_where(key_cond(key)).build_sqlx(PostgresQueryBuilder)
    }

    /// Flag update that only matches while the event is free or held by `caller`.
    pub fn push_flag(
        key: &EventKey,
        flag: Flag,
        value: bool,
        caller: &str,
    ) -> (String, SqlxValues) {
        let writable = Cond::any().add(SeaExpr::col(CollectionIden::LockOwner).is_null()).add(SeaExpr::col(CollectionIden::LockOwner).eq(caller));
        SeaQuery::update()
            .table(CollectionIden::Table)
            .values([(flag_column(flag), value.into())])
            .cond_where(key_cond(key).add(writable))
            .build_sqlx(PostgresQueryBuilder)
    }

    pub fn update_marking(
        key: &EventKey,
        marking: Marking,
    ) -> (String, SqlxValues) {
        SeaQuery::update()
            .table(CollectionIden::Table)
            .values([
                (CollectionIden::Executed, marking.executed.into()),
                (CollectionIden::Included, marking.included.into()),
                (CollectionIden::Pending, marking.pending.into()),
            ])
            .cond_where(key_cond(key))
            .build_sqlx(PostgresQueryBuilder)
    }

    pub fn update_roles(
        key: &EventKey,
        roles: &BTreeSet<String>,
    ) -> Result<(String, SqlxValues)> {
        let roles = serde_json::to_string(roles)?;
        Ok(SeaQuery::update()
            .table(CollectionIden::Table)
            .values([(CollectionIden::Roles, roles.into())])
            .cond_where(key_cond(key))
            .build_sqlx(PostgresQueryBuilder))
    }

    /// Compare-and-set: only matches a free event.
    pub fn acquire_lock(
        key: &EventKey,
        record: &LockRecord,
    ) -> (String, SqlxValues) {
        SeaQuery::update()
            .table(CollectionIden::Table)
            .values([
                (CollectionIden::LockOwner, record.owner.clone().into()),
                (CollectionIden::LockedAt, record.acquired_at.into()),
            ])
            .cond_where(key_cond(key).add(SeaExpr::col(CollectionIden::LockOwner).is_null()))
            .build_sqlx(PostgresQueryBuilder)
    }

    /// Only matches an event held by `owner`.
    pub fn release_lock(
        key: &EventKey,
        owner: &str,
    ) -> (String, SqlxValues) {
        SeaQuery::update()
            .table(CollectionIden::Table)
            .values([
                (CollectionIden::LockOwner, Option::<String>::None.into()),
                (CollectionIden::LockedAt, Option::<i64>::None.into()),
            ])
            .cond_where(key_cond(key).add(SeaExpr::col(CollectionIden::LockOwner).eq(owner)))
            .build_sqlx(PostgresQueryBuilder)
    }

    pub fn clear_lock(key: &EventKey) -> (String, SqlxValues) {
        SeaQuery::update()
            .table(CollectionIden::Table)
            .values([
                (CollectionIden::LockOwner, Option::<String>::None.into()),
                (CollectionIden::LockedAt, Option::<i64>::None.into()),
            ])
            .cond_where(key_cond(key))
            .build_sqlx(PostgresQueryBuilder)
    }

    pub fn lock_from_row(row: &PgRow) -> Result<Option<LockRecord>> {
        let owner: Option<String> = row.try_get("lock_owner").map_err(map_db_err)?;
        let acquired_at: Option<i64> = row.try_get("locked_at").map_err(map_db_err)?;
        Ok(owner.map(|owner| LockRecord {
            owner,
            acquired_at: acquired_at.unwrap_or_default(),
        }))
    }

    pub fn roles_from_row(row: &PgRow) -> Result<BTreeSet<String>> {
        let roles: String = row.try_get("roles").map_err(map_db_err)?;
        Ok(serde_json::from_str(&roles)?)
    }
}

/// Relations are loaded separately from `dcr_relations`.
impl DbRow for EventState {
    fn from_row(row: &PgRow) -> Result<Self> {
        Ok(Self {
            key: EventKey::new(
                row.try_get::<String, _>("workflow_id").map_err(map_db_err)?,
                row.try_get::<String, _>("event_id").map_err(map_db_err)?,
            ),
            name: row.try_get("name").map_err(map_db_err)?,
            uri: row.try_get("uri").map_err(map_db_err)?,
            roles: EventCollection::roles_from_row(row)?,
            marking: Marking::new(
                row.try_get("executed").map_err(map_db_err)?,
                row.try_get("included").map_err(map_db_err)?,
                row.try_get("pending").map_err(map_db_err)?,
            ),
            initial: Marking::new(
                row.try_get("initial_executed").map_err(map_db_err)?,
                row.try_get("initial_included").map_err(map_db_err)?,
                row.try_get("initial_pending").map_err(map_db_err)?,
            ),
            lock: EventCollection::lock_from_row(row)?,
            relations: Relations::default(),
        })
    }
}

impl DbInit for EventCollection {
    fn schema() -> Vec<String> {
        vec![
            Table::create()
                .table(CollectionIden::Table)
                .if_not_exists()
                .col(ColumnDef::new(CollectionIden::WorkflowId).string().not_null())
                .col(ColumnDef::new(CollectionIden::EventId).string().not_null())
                .col(ColumnDef::new(CollectionIden::Name).string().not_null())
                .col(ColumnDef::new(CollectionIden::Uri).string().not_null())
                .col(ColumnDef::new(CollectionIden::Roles).text().not_null())
                .col(ColumnDef::new(CollectionIden::Executed).boolean().not_null().default(false))
                .col(ColumnDef::new(CollectionIden::Included).boolean().not_null().default(false))
                .col(ColumnDef::new(CollectionIden::Pending).boolean().not_null().default(false))
                .col(ColumnDef::new(CollectionIden::InitialExecuted).boolean().not_null().default(false))
                .col(ColumnDef::new(CollectionIden::InitialIncluded).boolean().not_null().default(false))
                .col(ColumnDef::new(CollectionIden::InitialPending).boolean().not_null().default(false))
                .col(ColumnDef::new(CollectionIden::LockOwner).string())
                .col(ColumnDef::new(CollectionIden::LockedAt).big_integer())
                .primary_key(Index::create().col(CollectionIden::WorkflowId).col(CollectionIden::EventId))
                .build(PostgresQueryBuilder),
        ]
    }
}
