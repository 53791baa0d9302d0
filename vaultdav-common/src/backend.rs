use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::names::RestoreSetToken;

pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;
pub type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

pub type OpenFuture = Pin<Box<dyn Future<Output = Result<BoxedReader, StorageError>> + Send>>;

/// Opens a fresh read stream to a restore set's metadata resource.
pub type MetadataOpener = Arc<dyn Fn(RestoreSetToken) -> OpenFuture + Send + Sync>;

/// I/O failure of a storage plugin operation.
///
/// `context` names the operation and its arguments, e.g.
/// `getOutputStream(5, x)`; the source keeps the underlying cause.
#[derive(Debug, thiserror::Error)]
#[error("{context}: {source}")]
pub struct StorageError {
    context: String,
    source: io::Error,
}

impl StorageError {
    pub fn new(context: impl Into<String>, source: io::Error) -> Self {
        Self {
            context: context.into(),
            source,
        }
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn kind(&self) -> io::ErrorKind {
        self.source.kind()
    }
}

impl From<StorageError> for io::Error {
    fn from(err: StorageError) -> Self {
        io::Error::new(err.kind(), err)
    }
}

/// The host's settings for the storage location a backup lives on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDescriptor {
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub is_usb: bool,
    #[serde(default)]
    pub requires_network: bool,
}

/// A discovered restore set whose metadata has not been fetched yet.
pub struct EncryptedMetadata {
    pub token: RestoreSetToken,
    opener: MetadataOpener,
}

impl EncryptedMetadata {
    pub fn new(token: RestoreSetToken, opener: MetadataOpener) -> Self {
        Self { token, opener }
    }

    /// Open the metadata resource. Each call opens a new remote stream.
    pub async fn input_stream(&self) -> Result<BoxedReader, StorageError> {
        (self.opener)(self.token).await
    }
}

impl fmt::Debug for EncryptedMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedMetadata")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

/// Single-pass sequence of discovered restore sets, in discovery order.
///
/// Yielding an element opens nothing; the metadata stream is opened only
/// when [`EncryptedMetadata::input_stream`] is awaited. Consuming the
/// sequence again requires running discovery again.
pub struct BackupSequence {
    tokens: std::vec::IntoIter<RestoreSetToken>,
    opener: MetadataOpener,
}

impl BackupSequence {
    pub fn new(tokens: Vec<RestoreSetToken>, opener: MetadataOpener) -> Self {
        Self {
            tokens: tokens.into_iter(),
            opener,
        }
    }
}

impl Iterator for BackupSequence {
    type Item = EncryptedMetadata;

    fn next(&mut self) -> Option<Self::Item> {
        let token = self.tokens.next()?;
        Some(EncryptedMetadata::new(token, Arc::clone(&self.opener)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.tokens.size_hint()
    }
}

impl ExactSizeIterator for BackupSequence {}

impl fmt::Debug for BackupSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupSequence")
            .field("remaining", &self.tokens.len())
            .finish_non_exhaustive()
    }
}

/// Contract between the backup application and a storage backend.
///
/// Every backend (local folder, USB drive, WebDAV, ...) implements this
/// trait so the application can use them interchangeably. The backend only
/// moves bytes and reports which restore sets exist; encryption happens in
/// the caller before and after the returned streams are used.
#[async_trait::async_trait]
pub trait StoragePlugin: Send + Sync {
    /// Create the folder for a new restore set. Called once per token,
    /// before anything is written under it.
    async fn start_new_restore_set(&self, token: RestoreSetToken) -> Result<(), StorageError>;

    /// Make sure the backup root exists.
    async fn initialize_device(&self) -> Result<(), StorageError>;

    /// Whether `name` exists in the restore set.
    async fn has_data(&self, token: RestoreSetToken, name: &str) -> Result<bool, StorageError>;

    /// Open a stream writing `name` in the restore set. The write is
    /// complete once `shutdown()` on the stream returns `Ok`.
    async fn get_output_stream(
        &self,
        token: RestoreSetToken,
        name: &str,
    ) -> Result<BoxedWriter, StorageError>;

    /// Open a stream reading `name` from the restore set.
    async fn get_input_stream(
        &self,
        token: RestoreSetToken,
        name: &str,
    ) -> Result<BoxedReader, StorageError>;

    /// Delete `name` from the restore set.
    async fn remove_data(&self, token: RestoreSetToken, name: &str) -> Result<(), StorageError>;

    /// Whether the given storage holds a backup.
    async fn has_backup(&self, storage: &StorageDescriptor) -> Result<bool, StorageError>;

    /// Restore sets available on this backend, or `None` if discovery failed.
    ///
    /// Never fails: errors are logged and reported as `None` so callers can
    /// tell "no backups" apart from "could not look".
    async fn get_available_backups(&self) -> Option<BackupSequence>;

    /// Package name of the application providing this backend.
    fn provider_package_name(&self) -> &str;
}
