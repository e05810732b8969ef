//! # dcrflow
//!
//! dcrflow is a distributed execution engine for DCR (Dynamic Condition
//! Response) graphs. Every event of a workflow lives on an event node that
//! owns its marking and the relations to its neighbours; executing an event
//! coordinates with those neighbours over a lock-based peer protocol.
//!
//! ## Core Features
//!
//! - **Per-event nodes**: each event keeps its own `Executed`/`Included`/`Pending` flags
//! - **Lock protocol**: neighbours are locked in a global order before the local commit
//! - **Best-effort propagation**: responses, inclusions and exclusions are pushed after commit
//! - **Pluggable storage**: in-memory storage and PostgreSQL
//! - **Pluggable transport**: HTTP peers, or in-process routing for single-process clusters
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dcrflow::{EventDefinition, EventKey, NodeBuilder};
//!
//! let node = NodeBuilder::new("http://10.0.0.5:13752").build().await?;
//! node.create_event(&EventDefinition::from_json(json_str)?).await?;
//!
//! let report = node.execute(&EventKey::new("order", "approve"), &roles).await?;
//! assert!(report.is_complete());
//! ```

pub mod auth;
mod builder;
pub mod config;
pub mod coordinator;
pub mod directory;
mod error;
pub mod gateway;
pub mod graph;
pub mod lifecycle;
pub mod model;
mod node;
pub mod store;
mod utils;

use std::sync::{Arc, RwLock};

pub use builder::NodeBuilder;
pub use config::Config;
pub use coordinator::ExecutionReport;
pub use error::DcrError;
pub use graph::{EventKey, Flag, Marking, RelationKind, RelationTarget};
pub use model::*;
pub use node::EventNode;

/// Result type alias for dcrflow operations.
pub type Result<T> = std::result::Result<T, DcrError>;

/// Thread-safe shared lock wrapper using Arc<RwLock<T>>.
pub(crate) type ShareLock<T> = Arc<RwLock<T>>;
