use std::sync::Arc;

use crate::{
    Config, DcrError, EventNode, Result,
    config::{DirectoryType, GatewayType, StoreType},
    directory::{Directory, HttpDirectory, MemDirectory, NoopDirectory},
    gateway::{HttpGateway, LocalGateway, PeerGateway},
    store::{EventStore, MemStore, PostgresStore},
};

/// Builds an [`EventNode`] from a [`Config`], with optional overrides for
/// each collaborator.
pub struct NodeBuilder {
    config: Config,
    store: Option<Arc<dyn EventStore>>,
    gateway: Option<Arc<dyn PeerGateway>>,
    local: Option<LocalGateway>,
    directory: Option<Arc<dyn Directory>>,
}

impl NodeBuilder {
    pub fn new(self_uri: impl Into<String>) -> Self {
        Self::from_config(Config::new(self_uri))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config,
            store: None,
            gateway: None,
            local: None,
            directory: None,
        }
    }

    pub fn store(
        mut self,
        store: Arc<dyn EventStore>,
    ) -> Self {
        self.store = Some(store);
        self
    }

    pub fn gateway(
        mut self,
        gateway: Arc<dyn PeerGateway>,
    ) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Joins an in-process network: the built node talks to its peers through
    /// `gateway` and is registered with it under its `self_uri`.
    pub fn local_gateway(
        mut self,
        gateway: LocalGateway,
    ) -> Self {
        self.local = Some(gateway);
        self
    }

    pub fn directory(
        mut self,
        directory: Arc<dyn Directory>,
    ) -> Self {
        self.directory = Some(directory);
        self
    }

    pub async fn build(self) -> Result<Arc<EventNode>> {
        let store = match self.store {
            Some(store) => store,
            None => Self::create_store(&self.config).await?,
        };

        let local = match (&self.local, &self.config.gateway.gateway_type) {
            (Some(local), _) => Some(local.clone()),
            (None, GatewayType::Local) if self.gateway.is_none() => Some(LocalGateway::new(self.config.gateway.timeout())),
            _ => None,
        };
        let gateway: Arc<dyn PeerGateway> = match (self.gateway, &local) {
            (Some(gateway), _) => gateway,
            (None, Some(local)) => Arc::new(local.clone()),
            (None, None) => Arc::new(HttpGateway::new(self.config.gateway.timeout())),
        };

        let directory = match self.directory {
            Some(directory) => directory,
            None => Self::create_directory(&self.config)?,
        };

        let node = Arc::new(EventNode::new(self.config.self_uri.clone(), store, gateway, directory));
        if let Some(local) = local {
            local.register(&node);
        }
        Ok(node)
    }

    async fn create_store(config: &Config) -> Result<Arc<dyn EventStore>> {
        match config.store.store_type {
            StoreType::Mem => Ok(Arc::new(MemStore::new())),
            StoreType::Postgres => {
                let postgres = config
                    .store
                    .postgres
                    .as_ref()
                    .ok_or_else(|| DcrError::Config("store type postgres requires [store.postgres]".to_string()))?;
                let store = PostgresStore::connect(&postgres.database_url, postgres.max_connections).await?;
                Ok(Arc::new(store))
            }
        }
    }

    fn create_directory(config: &Config) -> Result<Arc<dyn Directory>> {
        match config.directory.directory_type {
            DirectoryType::None => Ok(Arc::new(NoopDirectory)),
            DirectoryType::Mem => Ok(Arc::new(MemDirectory::new())),
            DirectoryType::Http => {
                let url = config
                    .directory
                    .url
                    .as_deref()
                    .ok_or_else(|| DcrError::Config("directory type http requires a url".to_string()))?;
                Ok(Arc::new(HttpDirectory::new(url, config.gateway.timeout())?))
            }
        }
    }
}
