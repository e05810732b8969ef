//! Relation graph model for a single event node.
//!
//! Pure storage plus structural invariants: relation sets are deduplicated by
//! target identity and an event holds at most one lock. Cross-field rules
//! (executability, propagation) live in the coordinator.

mod key;
mod relation;
mod state;

pub use key::EventKey;
pub use relation::{RelationKind, RelationSet, RelationTarget, Relations};
pub use state::{EventState, Flag, LockRecord, Marking};
