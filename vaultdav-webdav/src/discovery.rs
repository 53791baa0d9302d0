//! Finds the restore sets stored under the backup root.
//!
//! A restore set counts as present when `root/<token>/.backup.metadata` is a
//! resource. Any other folder directly under the root that is not a known
//! kind of noise is reported as an anomaly. Plain files there are ignored.

use std::collections::HashSet;

use tracing::warn;
use vaultdav_common::names::FILE_BACKUP_METADATA;
use vaultdav_common::{BackupSequence, FilenameClassifier, MetadataOpener, RestoreSetToken};

use crate::client::PropName;
use crate::paths::RootLocation;
use crate::remote::{Remote, RemoteError};

/// Root, restore-set folders, and the resources inside them.
pub const DISCOVERY_DEPTH: u32 = 2;

pub const DISCOVERY_PROPS: &[PropName] = &[PropName::DisplayName, PropName::ResourceType];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    /// Restore sets in listing order.
    pub tokens: Vec<RestoreSetToken>,
    /// Unexpected folder names seen under the root, each once.
    pub anomalies: Vec<String>,
}

impl Discovery {
    pub fn into_sequence(self, opener: MetadataOpener) -> BackupSequence {
        BackupSequence::new(self.tokens, opener)
    }
}

pub async fn discover(
    remote: &Remote,
    root: &RootLocation,
    classifier: &FilenameClassifier,
) -> Result<Discovery, RemoteError> {
    let entries = remote.list_recursive(root, DISCOVERY_DEPTH, DISCOVERY_PROPS).await?;

    let mut discovery = Discovery::default();
    let mut warned = HashSet::new();
    let mut report = |name: &str, discovery: &mut Discovery| {
        if classifier.is_anomalous_name(name) && warned.insert(name.to_string()) {
            warn!(name = %name, "Found invalid backup set folder");
            discovery.anomalies.push(name.to_string());
        }
    };

    for entry in &entries {
        if entry.is_root() {
            continue;
        }
        match entry.segments.as_slice() {
            [folder] if entry.is_collection => {
                if classifier.classify_as_token(folder).is_none() {
                    report(folder, &mut discovery);
                }
            }
            [.., folder, name] if !entry.is_collection && name == FILE_BACKUP_METADATA => {
                match classifier.classify_as_token(folder) {
                    Some(token) => discovery.tokens.push(token),
                    None => report(folder, &mut discovery),
                }
            }
            _ => {}
        }
    }

    Ok(discovery)
}
