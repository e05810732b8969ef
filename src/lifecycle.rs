//! Creation, deletion and administrative maintenance of event nodes.
//!
//! None of these operations take part in the lock protocol. `reset_event` in
//! particular clears a lock held by anyone, and is meant for recovery and tests.

use std::{collections::BTreeSet, sync::Arc};

use tracing::{info, warn};

use crate::{
    DcrError, Result,
    directory::{Directory, DirectoryEntry},
    graph::{EventKey, EventState, Marking, RelationKind, RelationTarget},
    model::EventDefinition,
    store::EventStore,
};

#[derive(Clone)]
pub struct LifecycleManager {
    store: Arc<dyn EventStore>,
    directory: Arc<dyn Directory>,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn EventStore>,
        directory: Arc<dyn Directory>,
    ) -> Self {
        Self {
            store,
            directory,
        }
    }

    /// Stores the initial state of `definition` hosted at `self_uri` and registers it with the directory.
    pub async fn create_event(
        &self,
        definition: &EventDefinition,
        self_uri: &str,
    ) -> Result<EventState> {
        let state = definition.to_state(self_uri)?;
        self.store.create(&state).await?;
        info!(event = %state.key, "event created");

        let entry = DirectoryEntry {
            workflow_id: state.key.workflow_id.clone(),
            event_id: state.key.event_id.clone(),
            name: state.name.clone(),
            uri: state.uri.clone(),
            roles: state.roles.iter().cloned().collect(),
        };
        if let Err(err) = self.directory.register(&entry).await {
            warn!(event = %state.key, "directory registration failed: {err}");
        }
        Ok(state)
    }

    /// Removes the event's state and unregisters it from the directory.
    pub async fn delete_event(
        &self,
        key: &EventKey,
    ) -> Result<()> {
        self.store.delete(key).await?;
        info!(event = %key, "event deleted");

        if let Err(err) = self.directory.unregister(key).await {
            warn!(event = %key, "directory unregistration failed: {err}");
        }
        Ok(())
    }

    /// Drops any lock and restores the marking configured at creation.
    pub async fn reset_event(
        &self,
        key: &EventKey,
    ) -> Result<Marking> {
        let state = self.store.find(key).await?;
        if let Some(held) = &state.lock {
            warn!(event = %key, owner = %held.owner, "reset clears a held lock");
        }
        self.store.clear_lock(key).await?;
        self.store.set_marking(key, state.initial).await?;
        info!(event = %key, "event reset");
        Ok(state.initial)
    }

    pub async fn update_roles(
        &self,
        key: &EventKey,
        roles: &BTreeSet<String>,
    ) -> Result<()> {
        self.store.set_roles(key, roles).await
    }

    /// Adds a relation; an already related target is a `Conflict`.
    pub async fn add_relation(
        &self,
        key: &EventKey,
        kind: RelationKind,
        target: &RelationTarget,
    ) -> Result<()> {
        if target.uri.trim().is_empty() {
            return Err(DcrError::Validation(format!("{} relation to {} has no uri", kind.as_ref(), target.key)));
        }
        if !self.store.insert_relation(key, kind, target).await? {
            return Err(DcrError::Conflict(format!("{} already has a {} relation to {}", key, kind.as_ref(), target.key)));
        }
        Ok(())
    }

    /// Removes a relation; a missing one is ignored.
    pub async fn remove_relation(
        &self,
        key: &EventKey,
        kind: RelationKind,
        target: &EventKey,
    ) -> Result<()> {
        self.store.remove_relation(key, kind, target).await.map(|_| ())
    }
}
