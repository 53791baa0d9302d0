//! WebDAV storage backend for encrypted app backups.
//!
//! Layout on the server:
//!
//! ```text
//! {url}/.SeedVaultAndroidBackup/            backup root
//! {url}/.SeedVaultAndroidBackup/<token>/    one folder per restore set
//! {url}/.SeedVaultAndroidBackup/<token>/.backup.metadata
//! ```

pub mod client;
pub mod config;
pub mod discovery;
pub mod paths;
pub mod plugin;
pub mod remote;

pub use client::{DavClient, DavError, HttpDavClient, MemoryDavClient};
pub use config::{WebDavConfig, DIRECTORY_ROOT};
pub use discovery::Discovery;
pub use paths::RootLocation;
pub use plugin::WebDavStoragePlugin;
pub use remote::{Remote, RemoteError};
