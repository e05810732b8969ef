use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of an event: the workflow it belongs to plus its id inside that workflow.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey {
    pub workflow_id: String,
    pub event_id: String,
}

impl EventKey {
    pub fn new(
        workflow_id: impl Into<String>,
        event_id: impl Into<String>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            event_id: event_id.into(),
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}/{}", self.workflow_id, self.event_id)
    }
}
