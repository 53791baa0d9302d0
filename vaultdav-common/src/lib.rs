//! Shared types for vaultdav storage backends.
//!
//! - `backend`: the storage plugin contract consumed by the backup application
//! - `names`: restore-set tokens and the remote naming rules used during discovery

pub mod backend;
pub mod names;

pub use backend::{
    BackupSequence, BoxedReader, BoxedWriter, EncryptedMetadata, MetadataOpener, StorageDescriptor,
    StorageError, StoragePlugin,
};
pub use names::{FilenameClassifier, InvalidToken, RestoreSetToken};
