//! Outbound calls from one event node to the events it is related to.
//!
//! Every call carries a timeout. Transport failures surface as
//! `DcrError::PeerUnreachable`; answers from a reachable peer surface as the
//! matching application error (`NotFound`, `Locked`, `Unauthorized`, ...), so
//! the coordinator can tell the two apart.

mod http;
mod local;

use async_trait::async_trait;

use crate::{Result, graph::RelationTarget};

pub use http::HttpGateway;
pub use local::LocalGateway;

/// Timeout applied to peer calls when none is configured.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Client side of the peer protocol. `caller` is the id of the calling event;
/// for `lock`/`unlock` it is the lock owner.
#[async_trait]
pub trait PeerGateway: Send + Sync {
    async fn is_executed(
        &self,
        peer: &RelationTarget,
        caller: &str,
    ) -> Result<bool>;

    async fn is_included(
        &self,
        peer: &RelationTarget,
        caller: &str,
    ) -> Result<bool>;

    /// Idempotent: marking an already pending peer is a no-op at the receiver.
    async fn send_pending(
        &self,
        peer: &RelationTarget,
        caller: &str,
    ) -> Result<()>;

    async fn send_included(
        &self,
        peer: &RelationTarget,
        caller: &str,
    ) -> Result<()>;

    async fn send_excluded(
        &self,
        peer: &RelationTarget,
        caller: &str,
    ) -> Result<()>;

    /// Fails with `Locked` if the peer is already held, `NotFound` if it does not exist.
    async fn lock(
        &self,
        peer: &RelationTarget,
        owner: &str,
    ) -> Result<()>;

    /// Succeeds on a peer that is not currently locked.
    async fn unlock(
        &self,
        peer: &RelationTarget,
        owner: &str,
    ) -> Result<()>;
}
