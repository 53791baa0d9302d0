use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};
use vaultdav_common::backend::OpenFuture;
use vaultdav_common::names::FILE_BACKUP_METADATA;
use vaultdav_common::{
    BackupSequence, BoxedReader, BoxedWriter, FilenameClassifier, MetadataOpener, RestoreSetToken,
    StorageDescriptor, StorageError, StoragePlugin,
};

use crate::client::{DavClient, HttpDavClient};
use crate::config::WebDavConfig;
use crate::discovery::{discover, Discovery};
use crate::paths::{resolve, RootLocation};
use crate::remote::{Remote, RemoteError};

/// Package name reported when the host does not supply its own.
pub const DEFAULT_PROVIDER_PACKAGE: &str = "com.stevesoltys.seedvault";

fn storage_error(context: String, err: RemoteError) -> StorageError {
    StorageError::new(context, err.into_io())
}

/// Storage plugin keeping backups in a WebDAV folder.
#[derive(Clone)]
pub struct WebDavStoragePlugin {
    remote: Remote,
    root: RootLocation,
    classifier: FilenameClassifier,
    package_name: String,
}

impl WebDavStoragePlugin {
    pub fn new(
        client: Arc<dyn DavClient>,
        root: RootLocation,
        classifier: FilenameClassifier,
    ) -> Self {
        Self {
            remote: Remote::new(client),
            root,
            classifier,
            package_name: DEFAULT_PROVIDER_PACKAGE.to_string(),
        }
    }

    /// Plugin talking HTTP to the server described by `config`.
    pub fn from_config(config: &WebDavConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let client = HttpDavClient::new(config)?;
        Ok(Self::new(
            Arc::new(client),
            config.root_location()?,
            config.classifier()?,
        ))
    }

    pub fn with_package_name(mut self, package_name: impl Into<String>) -> Self {
        self.package_name = package_name.into();
        self
    }

    pub fn root(&self) -> &RootLocation {
        &self.root
    }

    /// Run discovery and return the raw result, failures included.
    pub async fn discover(&self) -> Result<Discovery, RemoteError> {
        discover(&self.remote, &self.root, &self.classifier).await
    }

    /// Opens `root/<token>/.backup.metadata` each time it is called.
    pub fn metadata_opener(&self) -> MetadataOpener {
        let remote = self.remote.clone();
        let root = self.root.clone();
        Arc::new(move |token| -> OpenFuture {
            let remote = remote.clone();
            let url = resolve(&root, Some(token), Some(FILE_BACKUP_METADATA));
            Box::pin(async move {
                remote.open_read(&url).await.map_err(|e| {
                    storage_error(format!("getInputStream({token}, {FILE_BACKUP_METADATA})"), e)
                })
            })
        })
    }
}

#[async_trait]
impl StoragePlugin for WebDavStoragePlugin {
    async fn start_new_restore_set(&self, token: RestoreSetToken) -> Result<(), StorageError> {
        let url = resolve(&self.root, Some(token), None);
        self.remote
            .create_collection(&url)
            .await
            .map_err(|e| storage_error(format!("startNewRestoreSet({token})"), e))?;
        debug!(token = %token, "Started new restore set");
        Ok(())
    }

    async fn initialize_device(&self) -> Result<(), StorageError> {
        let url = resolve(&self.root, None, None);
        let context = || "initializeDevice()".to_string();
        if self
            .remote
            .exists(&url)
            .await
            .map_err(|e| storage_error(context(), e))?
        {
            debug!(url = %url, "Root exists");
            return Ok(());
        }
        self.remote
            .create_collection(&url)
            .await
            .map_err(|e| storage_error(context(), e))?;
        debug!(url = %url, "Created backup root");
        Ok(())
    }

    async fn has_data(&self, token: RestoreSetToken, name: &str) -> Result<bool, StorageError> {
        let url = resolve(&self.root, Some(token), Some(name));
        let present = self
            .remote
            .exists(&url)
            .await
            .map_err(|e| storage_error(format!("hasData({token}, {name})"), e))?;
        debug!(token = %token, name, present, "Checked for data");
        Ok(present)
    }

    async fn get_output_stream(
        &self,
        token: RestoreSetToken,
        name: &str,
    ) -> Result<BoxedWriter, StorageError> {
        let url = resolve(&self.root, Some(token), Some(name));
        self.remote
            .open_write(&url)
            .await
            .map_err(|e| storage_error(format!("getOutputStream({token}, {name})"), e))
    }

    async fn get_input_stream(
        &self,
        token: RestoreSetToken,
        name: &str,
    ) -> Result<BoxedReader, StorageError> {
        let url = resolve(&self.root, Some(token), Some(name));
        self.remote
            .open_read(&url)
            .await
            .map_err(|e| storage_error(format!("getInputStream({token}, {name})"), e))
    }

    async fn remove_data(&self, token: RestoreSetToken, name: &str) -> Result<(), StorageError> {
        let url = resolve(&self.root, Some(token), Some(name));
        self.remote
            .delete(&url)
            .await
            .map_err(|e| storage_error(format!("removeData({token}, {name})"), e))
    }

    // TODO: check the descriptor's root for restore sets once hosts stop
    // relying on this always being true during backend selection.
    async fn has_backup(&self, _storage: &StorageDescriptor) -> Result<bool, StorageError> {
        Ok(true)
    }

    async fn get_available_backups(&self) -> Option<BackupSequence> {
        match self.discover().await {
            Ok(discovery) => {
                debug!(count = discovery.tokens.len(), "Discovered restore sets");
                Some(discovery.into_sequence(self.metadata_opener()))
            }
            Err(e) => {
                error!(root = %self.root.url(), error = %e, "Error getting available backups");
                None
            }
        }
    }

    fn provider_package_name(&self) -> &str {
        &self.package_name
    }
}
