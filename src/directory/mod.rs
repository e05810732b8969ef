//! Workflow directory collaborator.
//!
//! The directory tracks which events belong to which workflow. Nodes notify it
//! on create and delete; execution never consults it.

mod http;

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{DcrError, Result, ShareLock, graph::EventKey};

pub use http::HttpDirectory;

/// Directory record of one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub workflow_id: String,
    pub event_id: String,
    pub name: String,
    pub uri: String,
    pub roles: Vec<String>,
}

#[async_trait]
pub trait Directory: Send + Sync {
    async fn register(
        &self,
        entry: &DirectoryEntry,
    ) -> Result<()>;

    async fn unregister(
        &self,
        key: &EventKey,
    ) -> Result<()>;
}

/// Directory that accepts and forgets every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDirectory;

#[async_trait]
impl Directory for NoopDirectory {
    async fn register(
        &self,
        _entry: &DirectoryEntry,
    ) -> Result<()> {
        Ok(())
    }

    async fn unregister(
        &self,
        _key: &EventKey,
    ) -> Result<()> {
        Ok(())
    }
}

/// In-process directory, grouped by workflow.
#[derive(Debug, Clone, Default)]
pub struct MemDirectory {
    workflows: ShareLock<HashMap<String, BTreeMap<String, DirectoryEntry>>>,
}

impl MemDirectory {
    pub fn new() -> Self {
        Self {
            workflows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Entries of a workflow ordered by event id.
    pub fn workflow(
        &self,
        workflow_id: &str,
    ) -> Vec<DirectoryEntry> {
        let workflows = match self.workflows.read() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        };
        workflows.get(workflow_id).map(|events| events.values().cloned().collect()).unwrap_or_default()
    }
}

#[async_trait]
impl Directory for MemDirectory {
    async fn register(
        &self,
        entry: &DirectoryEntry,
    ) -> Result<()> {
        let mut workflows = self.workflows.write().map_err(|_| DcrError::Directory("mem directory poisoned".to_string()))?;
        workflows.entry(entry.workflow_id.clone()).or_default().insert(entry.event_id.clone(), entry.clone());
        Ok(())
    }

    async fn unregister(
        &self,
        key: &EventKey,
    ) -> Result<()> {
        let mut workflows = self.workflows.write().map_err(|_| DcrError::Directory("mem directory poisoned".to_string()))?;
        let removed = workflows.get_mut(&key.workflow_id).and_then(|events| events.remove(&key.event_id));
        if workflows.get(&key.workflow_id).is_some_and(|events| events.is_empty()) {
            workflows.remove(&key.workflow_id);
        }
        removed.map(|_| ()).ok_or_else(|| DcrError::NotFound(format!("directory entry {key}")))
    }
}
