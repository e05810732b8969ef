use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, Response, StatusCode, Url};
use tracing::trace;

use crate::{DcrError, Result, graph::RelationTarget, model::LockModel};

use super::{DEFAULT_TIMEOUT_MS, PeerGateway};

/// Peer gateway speaking the HTTP protocol of the event API:
///
/// | call | route |
/// |---|---|
/// | `is_executed` | `GET events/{wf}/{ev}/executed/{caller}` |
/// | `is_included` | `GET events/{wf}/{ev}/included/{caller}` |
/// | `send_pending` | `PUT events/{wf}/{ev}/pending/{caller}` |
/// | `send_included` | `PUT events/{wf}/{ev}/included/{caller}` |
/// | `send_excluded` | `PUT events/{wf}/{ev}/excluded/{caller}` |
/// | `lock` | `POST events/{wf}/{ev}/lock` with a [`LockModel`] body |
/// | `unlock` | `DELETE events/{wf}/{ev}/lock/{owner}` |
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    // request timeout
    timeout: Duration,
}

impl Default for HttpGateway {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_TIMEOUT_MS))
    }
}

impl HttpGateway {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    /// Builds `{peer.uri}/events/{wf}/{ev}/{segments..}` with every segment percent-encoded.
    fn endpoint(
        peer: &RelationTarget,
        segments: &[&str],
    ) -> Result<Url> {
        let mut url = Url::parse(&peer.uri).map_err(|err| DcrError::Validation(format!("invalid peer uri '{}': {}", peer.uri, err)))?;
        url.path_segments_mut()
            .map_err(|_| DcrError::Validation(format!("peer uri '{}' cannot be a base", peer.uri)))?
            .pop_if_empty()
            .extend(["events", peer.key.workflow_id.as_str(), peer.key.event_id.as_str()])
            .extend(segments);
        Ok(url)
    }

    async fn send(
        &self,
        peer: &RelationTarget,
        method: Method,
        segments: &[&str],
        body: Option<&LockModel>,
    ) -> Result<Response> {
        let url = Self::endpoint(peer, segments)?;
        trace!("http::{} {}", method, url);

        let mut request = self.client.request(method, url).timeout(self.timeout);
        if let Some(body) = body {
            request = request.json(body);
        }

        let res = request.send().await.map_err(|err| DcrError::PeerUnreachable {
            uri: peer.uri.clone(),
            message: err.to_string(),
        })?;

        if res.status().is_success() {
            return Ok(res);
        }
        Err(Self::reject(peer, res).await)
    }

    /// Maps a non-success answer to the matching application error.
    async fn reject(
        peer: &RelationTarget,
        res: Response,
    ) -> DcrError {
        let status = res.status();
        let message = res.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => DcrError::NotFound(format!("event {} at {}", peer.key, peer.uri)),
            StatusCode::CONFLICT | StatusCode::LOCKED => DcrError::Locked {
                key: peer.key.to_string(),
                owner: message,
            },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DcrError::Unauthorized(format!("event {}: {}", peer.key, message)),
            _ => DcrError::PeerRejected {
                uri: peer.uri.clone(),
                status: status.as_u16(),
                message,
            },
        }
    }

    async fn query_bool(
        &self,
        peer: &RelationTarget,
        segments: &[&str],
    ) -> Result<bool> {
        let res = self.send(peer, Method::GET, segments, None).await?;
        res.json::<bool>().await.map_err(|err| {
            if err.is_timeout() {
                DcrError::PeerUnreachable {
                    uri: peer.uri.clone(),
                    message: err.to_string(),
                }
            } else {
                DcrError::Convert(format!("peer {}: {}", peer.uri, err))
            }
        })
    }
}

#[async_trait]
impl PeerGateway for HttpGateway {
    async fn is_executed(
        &self,
        peer: &RelationTarget,
        caller: &str,
    ) -> Result<bool> {
        self.query_bool(peer, &["executed", caller]).await
    }

    async fn is_included(
        &self,
        peer: &RelationTarget,
        caller: &str,
    ) -> Result<bool> {
        self.query_bool(peer, &["included", caller]).await
    }

    async fn send_pending(
        &self,
        peer: &RelationTarget,
        caller: &str,
    ) -> Result<()> {
        self.send(peer, Method::PUT, &["pending", caller], None).await.map(|_| ())
    }

    async fn send_included(
        &self,
        peer: &RelationTarget,
        caller: &str,
    ) -> Result<()> {
        self.send(peer, Method::PUT, &["included", caller], None).await.map(|_| ())
    }

    async fn send_excluded(
        &self,
        peer: &RelationTarget,
        caller: &str,
    ) -> Result<()> {
        self.send(peer, Method::PUT, &["excluded", caller], None).await.map(|_| ())
    }

    async fn lock(
        &self,
        peer: &RelationTarget,
        owner: &str,
    ) -> Result<()> {
        let body = LockModel {
            lock_owner: owner.to_string(),
        };
        self.send(peer, Method::POST, &["lock"], Some(&body)).await.map(|_| ())
    }

    async fn unlock(
        &self,
        peer: &RelationTarget,
        owner: &str,
    ) -> Result<()> {
        self.send(peer, Method::DELETE, &["lock", owner], None).await.map(|_| ())
    }
}
