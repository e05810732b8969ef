//! Storage layer for event node state.
//!
//! Provides an abstraction over different storage backends:
//! - `MemStore`: In-memory storage for testing and single-process clusters
//! - `PostgresStore`: PostgreSQL for production persistence
//!
//! Single operations are atomic with respect to each other. In particular
//! `acquire_lock` is a compare-and-set, and `push_flag` checks the lock owner
//! and writes the flag in one step.

mod db;

use std::{collections::BTreeSet, error::Error};

use async_trait::async_trait;

use crate::{
    DcrError, Result,
    graph::{EventKey, EventState, Flag, LockRecord, Marking, RelationKind, RelationSet, RelationTarget},
};

pub use db::{MemStore, PostgresStore};

/// Maps database errors to DcrError.
fn map_db_err(err: impl Error) -> DcrError {
    DcrError::Store(err.to_string())
}

fn not_found(key: &EventKey) -> DcrError {
    DcrError::NotFound(format!("event {key}"))
}

/// Persistence contract for event node state, keyed by `(workflow_id, event_id)`.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Checks if an event exists.
    async fn exists(
        &self,
        key: &EventKey,
    ) -> Result<bool>;

    /// Loads a full snapshot of an event.
    async fn find(
        &self,
        key: &EventKey,
    ) -> Result<EventState>;

    /// Creates a new event; fails with `Conflict` if the key is taken.
    async fn create(
        &self,
        state: &EventState,
    ) -> Result<()>;

    /// Deletes an event together with its relations.
    async fn delete(
        &self,
        key: &EventKey,
    ) -> Result<()>;

    /// Reads one marking flag.
    async fn flag(
        &self,
        key: &EventKey,
        flag: Flag,
    ) -> Result<bool>;

    /// Writes one marking flag, ignoring the lock.
    async fn set_flag(
        &self,
        key: &EventKey,
        flag: Flag,
        value: bool,
    ) -> Result<()>;

    /// Writes one marking flag unless the event is locked by someone other than `caller`.
    async fn push_flag(
        &self,
        key: &EventKey,
        flag: Flag,
        value: bool,
        caller: &str,
    ) -> Result<()>;

    /// Overwrites the whole marking.
    async fn set_marking(
        &self,
        key: &EventKey,
        marking: Marking,
    ) -> Result<()>;

    async fn roles(
        &self,
        key: &EventKey,
    ) -> Result<BTreeSet<String>>;

    async fn set_roles(
        &self,
        key: &EventKey,
        roles: &BTreeSet<String>,
    ) -> Result<()>;

    async fn relations(
        &self,
        key: &EventKey,
        kind: RelationKind,
    ) -> Result<RelationSet>;

    /// Adds a relation; returns `false` if the target identity is already in the set.
    async fn insert_relation(
        &self,
        key: &EventKey,
        kind: RelationKind,
        target: &RelationTarget,
    ) -> Result<bool>;

    /// Removes a relation; returns `false` if it was not present.
    async fn remove_relation(
        &self,
        key: &EventKey,
        kind: RelationKind,
        target: &EventKey,
    ) -> Result<bool>;

    /// Current lock holder, if any.
    async fn lock_record(
        &self,
        key: &EventKey,
    ) -> Result<Option<LockRecord>>;

    /// Atomically grants the lock to `owner`, or fails with `Locked` if it is held.
    async fn acquire_lock(
        &self,
        key: &EventKey,
        owner: &str,
    ) -> Result<LockRecord>;

    /// Releases a lock held by `owner`; a free event is released trivially.
    async fn release_lock(
        &self,
        key: &EventKey,
        owner: &str,
    ) -> Result<()>;

    /// Drops the lock regardless of owner.
    async fn clear_lock(
        &self,
        key: &EventKey,
    ) -> Result<()>;
}
