use serde::{Deserialize, Serialize};

use crate::{
    DcrError,
    graph::{EventKey, RelationKind},
};

/// A neighbour that could not be updated after the local execution committed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PropagationFailure {
    pub target: EventKey,
    pub kind: RelationKind,
    pub error: DcrError,
}

/// A lock that could not be released at the end of an attempt.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UnlockFailure {
    pub target: EventKey,
    pub error: DcrError,
}

/// Outcome of a successful execution. The event executed locally in every case;
/// non-empty failure lists mean some neighbours were not updated or released.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub key: EventKey,
    /// Id tagging this attempt in the logs.
    pub attempt: String,
    /// Number of peers locked besides the event itself.
    pub peers_locked: usize,
    pub propagation_failures: Vec<PropagationFailure>,
    pub unlock_failures: Vec<UnlockFailure>,
}

impl ExecutionReport {
    /// True when every neighbour was updated and every lock released.
    pub fn is_complete(&self) -> bool {
        self.propagation_failures.is_empty() && self.unlock_failures.is_empty()
    }
}
