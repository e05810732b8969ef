mod definition;
mod snapshot;

pub use definition::{EventDefinition, RelationModel};
pub use snapshot::{EventSnapshot, LockModel};
