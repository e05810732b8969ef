use serde::{Deserialize, Serialize};

/// Stages of one execution attempt, in order. `Locking` and `Unlocking` span
/// every peer in the relation-to-lock set. An attempt ends in `Done` or `Failed`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExecutionPhase {
    #[default]
    Idle,
    Authorizing,
    CheckingExecutability,
    Locking,
    Mutating,
    Propagating,
    Unlocking,
    Done,
    Failed,
}

impl ExecutionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionPhase::Done | ExecutionPhase::Failed)
    }
}
