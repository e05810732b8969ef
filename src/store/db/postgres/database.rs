use std::{collections::BTreeSet, time::Duration};

use async_trait::async_trait;
use sea_query_binder::SqlxValues;
use sqlx::{
    PgPool, Row,
    postgres::{PgPoolOptions, PgQueryResult, PgRow},
};
use strum::IntoEnumIterator;
use tracing::{debug, trace};

use crate::{
    DcrError, Result,
    graph::{EventKey, EventState, Flag, LockRecord, Marking, RelationKind, RelationSet, RelationTarget},
    store::{EventStore, map_db_err, not_found},
    utils,
};

use super::{
    DbInit, DbRow,
    collection::{EventCollection, RelationCollection, relation::RelationRow},
};

/// PostgreSQL-backed event store.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connects to the database and creates the tables if they do not exist.
    pub async fn connect(
        db_url: &str,
        max_connections: u32,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new().acquire_timeout(Duration::from_secs(5)).max_connections(max_connections).connect(db_url).await.map_err(map_db_err)?;

        let store = Self {
            pool,
        };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;
        for sql in EventCollection::schema().into_iter().chain(RelationCollection::schema()) {
            sqlx::query(&sql).execute(&mut *tx).await.map_err(map_db_err)?;
        }
        tx.commit().await.map_err(map_db_err)?;
        debug!("postgres store initialised");
        Ok(())
    }

    async fn execute(
        &self,
        (sql, values): (String, SqlxValues),
    ) -> Result<PgQueryResult> {
        trace!("postgres::execute({sql})");
        sqlx::query_with(&sql, values).execute(&self.pool).await.map_err(map_db_err)
    }

    async fn fetch_optional(
        &self,
        (sql, values): (String, SqlxValues),
    ) -> Result<Option<PgRow>> {
        trace!("postgres::fetch({sql})");
        sqlx::query_with(&sql, values).fetch_optional(&self.pool).await.map_err(map_db_err)
    }

    async fn fetch_one(
        &self,
        key: &EventKey,
        query: (String, SqlxValues),
    ) -> Result<PgRow> {
        self.fetch_optional(query).await?.ok_or_else(|| not_found(key))
    }

    async fn fetch_all(
        &self,
        (sql, values): (String, SqlxValues),
    ) -> Result<Vec<PgRow>> {
        trace!("postgres::fetch_all({sql})");
        sqlx::query_with(&sql, values).fetch_all(&self.pool).await.map_err(map_db_err)
    }

    /// Runs an update on the events table and maps "no row matched" to `NotFound`.
    async fn update_event(
        &self,
        key: &EventKey,
        query: (String, SqlxValues),
    ) -> Result<()> {
        let result = self.execute(query).await?;
        if result.rows_affected() == 0 {
            return Err(not_found(key));
        }
        Ok(())
    }

    /// Explains why a lock-conditioned update matched no row.
    async fn lock_conflict(
        &self,
        key: &EventKey,
    ) -> DcrError {
        match self.lock_record(key).await {
            Ok(Some(held)) => DcrError::Locked {
                key: key.to_string(),
                owner: held.owner,
            },
            // freed between the update and this read
            Ok(None) => DcrError::Locked {
                key: key.to_string(),
                owner: String::new(),
            },
            Err(err) => err,
        }
    }
}

#[async_trait]
impl EventStore for PostgresStore {
    async fn exists(
        &self,
        key: &EventKey,
    ) -> Result<bool> {
        Ok(self.fetch_optional(EventCollection::select_lock(key)).await?.is_some())
    }

    async fn find(
        &self,
        key: &EventKey,
    ) -> Result<EventState> {
        let row = self.fetch_one(key, EventCollection::select(key)).await?;
        let mut state = EventState::from_row(&row)?;
        for row in self.fetch_all(RelationCollection::select_all(key)).await? {
            let relation = RelationRow::from_row(&row)?;
            state.relations.get_mut(relation.kind).insert(relation.target);
        }
        Ok(state)
    }

    async fn create(
        &self,
        state: &EventState,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let (sql, values) = EventCollection::insert(state)?;
        let result = sqlx::query_with(&sql, values).execute(&mut *tx).await.map_err(map_db_err)?;
        if result.rows_affected() == 0 {
            return Err(DcrError::Conflict(format!("event {} already exists", state.key)));
        }

        for kind in RelationKind::iter() {
            for target in state.relations.get(kind).iter() {
                let (sql, values) = RelationCollection::insert(&state.key, kind, target)?;
                sqlx::query_with(&sql, values).execute(&mut *tx).await.map_err(map_db_err)?;
            }
        }

        tx.commit().await.map_err(map_db_err)
    }

    async fn delete(
        &self,
        key: &EventKey,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let (sql, values) = RelationCollection::delete_all(key);
        sqlx::query_with(&sql, values).execute(&mut *tx).await.map_err(map_db_err)?;

        let (sql, values) = EventCollection::delete(key);
        let result = sqlx::query_with(&sql, values).execute(&mut *tx).await.map_err(map_db_err)?;
        if result.rows_affected() == 0 {
            return Err(not_found(key));
        }

        tx.commit().await.map_err(map_db_err)
    }

    async fn flag(
        &self,
        key: &EventKey,
        flag: Flag,
    ) -> Result<bool> {
        let row = self.fetch_one(key, EventCollection::select_flag(key, flag)).await?;
        row.try_get(flag.as_ref()).map_err(map_db_err)
    }

    async fn set_flag(
        &self,
        key: &EventKey,
        flag: Flag,
        value: bool,
    ) -> Result<()> {
        self.update_event(key, EventCollection::update_flag(key, flag, value)).await
    }

    async fn push_flag(
        &self,
        key: &EventKey,
        flag: Flag,
        value: bool,
        caller: &str,
    ) -> Result<()> {
        let result = self.execute(EventCollection::push_flag(key, flag, value, caller)).await?;
        if result.rows_affected() == 0 {
            return Err(self.lock_conflict(key).await);
        }
        Ok(())
    }

    async fn set_marking(
        &self,
        key: &EventKey,
        marking: Marking,
    ) -> Result<()> {
        self.update_event(key, EventCollection::update_marking(key, marking)).await
    }

    async fn roles(
        &self,
        key: &EventKey,
    ) -> Result<BTreeSet<String>> {
        let row = self.fetch_one(key, EventCollection::select_roles(key)).await?;
        EventCollection::roles_from_row(&row)
    }

    async fn set_roles(
        &self,
        key: &EventKey,
        roles: &BTreeSet<String>,
    ) -> Result<()> {
        self.update_event(key, EventCollection::update_roles(key, roles)?).await
    }

    async fn relations(
        &self,
        key: &EventKey,
        kind: RelationKind,
    ) -> Result<RelationSet> {
        if !self.exists(key).await? {
            return Err(not_found(key));
        }
        let rows = self.fetch_all(RelationCollection::select_kind(key, kind)).await?;
        rows.iter().map(|row| RelationRow::from_row(row).map(|r| r.target)).collect()
    }

    async fn insert_relation(
        &self,
        key: &EventKey,
        kind: RelationKind,
        target: &RelationTarget,
    ) -> Result<bool> {
        if !self.exists(key).await? {
            return Err(not_found(key));
        }
        let result = self.execute(RelationCollection::insert(key, kind, target)?).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_relation(
        &self,
        key: &EventKey,
        kind: RelationKind,
        target: &EventKey,
    ) -> Result<bool> {
        if !self.exists(key).await? {
            return Err(not_found(key));
        }
        let result = self.execute(RelationCollection::delete(key, kind, target)).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn lock_record(
        &self,
        key: &EventKey,
    ) -> Result<Option<LockRecord>> {
        let row = self.fetch_one(key, EventCollection::select_lock(key)).await?;
        EventCollection::lock_from_row(&row)
    }

    async fn acquire_lock(
        &self,
        key: &EventKey,
        owner: &str,
    ) -> Result<LockRecord> {
        let record = LockRecord {
            owner: owner.to_string(),
            acquired_at: utils::time::time_millis(),
        };
        let result = self.execute(EventCollection::acquire_lock(key, &record)).await?;
        if result.rows_affected() == 0 {
            return Err(self.lock_conflict(key).await);
        }
        Ok(record)
    }

    async fn release_lock(
        &self,
        key: &EventKey,
        owner: &str,
    ) -> Result<()> {
        let result = self.execute(EventCollection::release_lock(key, owner)).await?;
        if result.rows_affected() > 0 {
            return Ok(());
        }
        match self.lock_record(key).await? {
            None => Ok(()),
            Some(held) => Err(DcrError::Locked {
                key: key.to_string(),
                owner: held.owner,
            }),
        }
    }

    async fn clear_lock(
        &self,
        key: &EventKey,
    ) -> Result<()> {
        self.update_event(key, EventCollection::clear_lock(key)).await
    }
}
