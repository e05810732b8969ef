//! Event node host - the entry point of dcrflow.
//!
//! An `EventNode` hosts the state of one or more events and exposes every
//! inbound operation peers and clients can invoke on them: state queries,
//! execute, lock/unlock, the propagation pushes, and administration.

use std::{collections::BTreeSet, sync::Arc};

use tracing::{debug, trace};

use crate::{
    Result,
    coordinator::{Coordinator, ExecutionReport},
    directory::Directory,
    gateway::PeerGateway,
    graph::{EventKey, Flag, LockRecord, Marking, RelationKind, RelationTarget},
    lifecycle::LifecycleManager,
    model::{EventDefinition, EventSnapshot},
    store::EventStore,
};

/// A node hosting event state.
///
/// # Example
///
/// ```rust,ignore
/// let node = NodeBuilder::new("http://10.0.0.5:13752").build().await?;
/// node.create_event(&EventDefinition::from_json(json_str)?).await?;
///
/// let key = EventKey::new("order", "approve");
/// let report = node.execute(&key, &["manager".to_string()]).await?;
/// ```
pub struct EventNode {
    /// Address at which peers reach this node.
    self_uri: String,
    store: Arc<dyn EventStore>,
    coordinator: Coordinator,
    lifecycle: LifecycleManager,
}

impl EventNode {
    pub fn new(
        self_uri: impl Into<String>,
        store: Arc<dyn EventStore>,
        gateway: Arc<dyn PeerGateway>,
        directory: Arc<dyn Directory>,
    ) -> Self {
        Self {
            self_uri: self_uri.into(),
            coordinator: Coordinator::new(store.clone(), gateway),
            lifecycle: LifecycleManager::new(store.clone(), directory),
            store,
        }
    }

    pub fn self_uri(&self) -> &str {
        &self.self_uri
    }

    pub fn store(&self) -> Arc<dyn EventStore> {
        self.store.clone()
    }

    /// Current marking, roles and lock holder of an event.
    pub async fn snapshot(
        &self,
        key: &EventKey,
    ) -> Result<EventSnapshot> {
        let state = self.store.find(key).await?;
        Ok(EventSnapshot::from(&state))
    }

    pub async fn is_executed(
        &self,
        key: &EventKey,
        caller: &str,
    ) -> Result<bool> {
        trace!(event = %key, caller, "executed query");
        self.store.flag(key, Flag::Executed).await
    }

    pub async fn is_included(
        &self,
        key: &EventKey,
        caller: &str,
    ) -> Result<bool> {
        trace!(event = %key, caller, "included query");
        self.store.flag(key, Flag::Included).await
    }

    /// Runs one execution attempt of a hosted event.
    pub async fn execute(
        &self,
        key: &EventKey,
        roles: &[String],
    ) -> Result<ExecutionReport> {
        self.coordinator.execute(key, roles).await
    }

    pub async fn lock(
        &self,
        key: &EventKey,
        owner: &str,
    ) -> Result<LockRecord> {
        let record = self.store.acquire_lock(key, owner).await?;
        debug!(event = %key, owner, "locked");
        Ok(record)
    }

    pub async fn unlock(
        &self,
        key: &EventKey,
        owner: &str,
    ) -> Result<()> {
        self.store.release_lock(key, owner).await?;
        debug!(event = %key, owner, "unlocked");
        Ok(())
    }

    pub async fn set_pending(
        &self,
        key: &EventKey,
        caller: &str,
    ) -> Result<()> {
        self.store.push_flag(key, Flag::Pending, true, caller).await
    }

    pub async fn set_included(
        &self,
        key: &EventKey,
        caller: &str,
    ) -> Result<()> {
        self.store.push_flag(key, Flag::Included, true, caller).await
    }

    pub async fn set_excluded(
        &self,
        key: &EventKey,
        caller: &str,
    ) -> Result<()> {
        self.store.push_flag(key, Flag::Included, false, caller).await
    }

    /// Creates an event hosted by this node.
    pub async fn create_event(
        &self,
        definition: &EventDefinition,
    ) -> Result<EventSnapshot> {
        let state = self.lifecycle.create_event(definition, &self.self_uri).await?;
        Ok(EventSnapshot::from(&state))
    }

    pub async fn delete_event(
        &self,
        key: &EventKey,
    ) -> Result<()> {
        self.lifecycle.delete_event(key).await
    }

    pub async fn reset_event(
        &self,
        key: &EventKey,
    ) -> Result<Marking> {
        self.lifecycle.reset_event(key).await
    }

    pub async fn update_roles(
        &self,
        key: &EventKey,
        roles: &BTreeSet<String>,
    ) -> Result<()> {
        self.lifecycle.update_roles(key, roles).await
    }

    pub async fn add_relation(
        &self,
        key: &EventKey,
        kind: RelationKind,
        target: &RelationTarget,
    ) -> Result<()> {
        self.lifecycle.add_relation(key, kind, target).await
    }

    pub async fn remove_relation(
        &self,
        key: &EventKey,
        kind: RelationKind,
        target: &EventKey,
    ) -> Result<()> {
        self.lifecycle.remove_relation(key, kind, target).await
    }
}
