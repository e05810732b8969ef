pub mod event;
pub mod relation;

pub use event::EventCollection;
pub use relation::RelationCollection;
