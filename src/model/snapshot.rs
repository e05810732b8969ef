use serde::{Deserialize, Serialize};

use crate::graph::EventState;

/// Current-state view of an event returned by the state query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSnapshot {
    pub workflow_id: String,
    pub event_id: String,
    pub name: String,
    pub executed: bool,
    pub included: bool,
    pub pending: bool,
    pub roles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<String>,
}

impl From<&EventState> for EventSnapshot {
    fn from(state: &EventState) -> Self {
        Self {
            workflow_id: state.key.workflow_id.clone(),
            event_id: state.key.event_id.clone(),
            name: state.name.clone(),
            executed: state.marking.executed,
            included: state.marking.included,
            pending: state.marking.pending,
            roles: state.roles.iter().cloned().collect(),
            locked_by: state.lock.as_ref().map(|l| l.owner.clone()),
        }
    }
}

/// Body of a lock request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockModel {
    pub lock_owner: String,
}
