use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};

use crate::{DcrError, Result, graph::EventKey};

use super::{Directory, DirectoryEntry};

/// Directory reached over HTTP: `POST {url}/workflows/{wf}` with the entry as
/// body on register, `DELETE {url}/workflows/{wf}/{ev}` on unregister.
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    url: Url,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpDirectory {
    pub fn new(
        url: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let url = Url::parse(url).map_err(|err| DcrError::Config(format!("invalid directory url '{url}': {err}")))?;
        if url.cannot_be_a_base() {
            return Err(DcrError::Config(format!("directory url '{url}' cannot be a base")));
        }
        Ok(Self {
            url,
            client: reqwest::Client::new(),
            timeout,
        })
    }

    fn endpoint(
        &self,
        segments: &[&str],
    ) -> Url {
        let mut url = self.url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("workflows").extend(segments);
        }
        url
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<()> {
        let res = request.timeout(self.timeout).send().await.map_err(|err| DcrError::Directory(err.to_string()))?;
        match res.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(DcrError::NotFound(format!("directory entry at {}", res.url()))),
            s => Err(DcrError::Directory(format!("directory answered {s}"))),
        }
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn register(
        &self,
        entry: &DirectoryEntry,
    ) -> Result<()> {
        let url = self.endpoint(&[entry.workflow_id.as_str()]);
        self.send(self.client.post(url).json(entry)).await
    }

    async fn unregister(
        &self,
        key: &EventKey,
    ) -> Result<()> {
        let url = self.endpoint(&[key.workflow_id.as_str(), key.event_id.as_str()]);
        self.send(self.client.delete(url)).await
    }
}
