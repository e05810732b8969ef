use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, RwLock, Weak},
    time::Duration,
};

use async_trait::async_trait;
use tracing::trace;

use crate::{DcrError, EventNode, Result, ShareLock, graph::RelationTarget};

use super::{DEFAULT_TIMEOUT_MS, PeerGateway};

struct Route {
    node: Weak<EventNode>,
    reachable: bool,
    latency: Option<Duration>,
}

/// Peer gateway routing calls to `EventNode`s living in the same process,
/// looked up by their `self_uri`.
///
/// Calls honour the timeout like a network call would, and routes can be
/// marked unreachable or given artificial latency.
#[derive(Clone)]
pub struct LocalGateway {
    routes: ShareLock<HashMap<String, Route>>,
    timeout: Duration,
}

impl Default for LocalGateway {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_TIMEOUT_MS))
    }
}

impl LocalGateway {
    pub fn new(timeout: Duration) -> Self {
        Self {
            routes: Arc::new(RwLock::new(HashMap::new())),
            timeout,
        }
    }

    /// Routes calls addressed to `node.self_uri()` to `node`.
    pub fn register(
        &self,
        node: &Arc<EventNode>,
    ) {
        let mut routes = self.routes.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        routes.insert(
            node.self_uri().to_string(),
            Route {
                node: Arc::downgrade(node),
                reachable: true,
                latency: None,
            },
        );
    }

    pub fn set_reachable(
        &self,
        uri: &str,
        reachable: bool,
    ) {
        let mut routes = self.routes.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(route) = routes.get_mut(uri) {
            route.reachable = reachable;
        }
    }

    /// Delays every call to `uri` by `latency` before it reaches the node.
    pub fn set_latency(
        &self,
        uri: &str,
        latency: Option<Duration>,
    ) {
        let mut routes = self.routes.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(route) = routes.get_mut(uri) {
            route.latency = latency;
        }
    }

    fn resolve(
        &self,
        peer: &RelationTarget,
    ) -> Result<(Arc<EventNode>, Option<Duration>)> {
        let unreachable = |message: &str| DcrError::PeerUnreachable {
            uri: peer.uri.clone(),
            message: message.to_string(),
        };
        let routes = self.routes.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let route = routes.get(&peer.uri).ok_or_else(|| unreachable("no route to host"))?;
        if !route.reachable {
            return Err(unreachable("connection refused"));
        }
        let node = route.node.upgrade().ok_or_else(|| unreachable("node shut down"))?;
        Ok((node, route.latency))
    }

    async fn dispatch<T, F, Fut>(
        &self,
        peer: &RelationTarget,
        call: F,
    ) -> Result<T>
    where
        F: FnOnce(Arc<EventNode>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (node, latency) = self.resolve(peer)?;
        trace!(peer = %peer.key, uri = %peer.uri, "local dispatch");

        let call = async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            call(node).await
        };
        tokio::time::timeout(self.timeout, call).await.map_err(|_| DcrError::PeerUnreachable {
            uri: peer.uri.clone(),
            message: format!("timed out after {:?}", self.timeout),
        })?
    }
}

#[async_trait]
impl PeerGateway for LocalGateway {
    async fn is_executed(
        &self,
        peer: &RelationTarget,
        caller: &str,
    ) -> Result<bool> {
        self.dispatch(peer, |node| async move { node.is_executed(&peer.key, caller).await }).await
    }

    async fn is_included(
        &self,
        peer: &RelationTarget,
        caller: &str,
    ) -> Result<bool> {
        self.dispatch(peer, |node| async move { node.is_included(&peer.key, caller).await }).await
    }

    async fn send_pending(
        &self,
        peer: &RelationTarget,
        caller: &str,
    ) -> Result<()> {
        self.dispatch(peer, |node| async move { node.set_pending(&peer.key, caller).await }).await
    }

    async fn send_included(
        &self,
        peer: &RelationTarget,
        caller: &str,
    ) -> Result<()> {
        self.dispatch(peer, |node| async move { node.set_included(&peer.key, caller).await }).await
    }

    async fn send_excluded(
        &self,
        peer: &RelationTarget,
        caller: &str,
    ) -> Result<()> {
        self.dispatch(peer, |node| async move { node.set_excluded(&peer.key, caller).await }).await
    }

    async fn lock(
        &self,
        peer: &RelationTarget,
        owner: &str,
    ) -> Result<()> {
        self.dispatch(peer, |node| async move { node.lock(&peer.key, owner).await.map(|_| ()) }).await
    }

    async fn unlock(
        &self,
        peer: &RelationTarget,
        owner: &str,
    ) -> Result<()> {
        self.dispatch(peer, |node| async move { node.unlock(&peer.key, owner).await }).await
    }
}
