//! Bridge between the plugin and the WebDAV client.
//!
//! Every remote primitive either succeeds or fails with exactly one of two
//! outcomes: the remote reported the location absent, or something else went
//! wrong (transport, protocol, a stream that never completed). The latter
//! keeps its cause as an `io::Error`.

use std::io;
use std::sync::Arc;

use tracing::debug;
use url::Url;
use vaultdav_common::{BoxedReader, BoxedWriter};

use crate::client::{DavClient, DavError, DavResponse, HrefRelation, PropName};
use crate::paths::{as_collection, RootLocation};

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("{0} does not exist")]
    Absent(Url),
    #[error("{operation} {url} failed: {source}")]
    Transport {
        operation: &'static str,
        url: Url,
        #[source]
        source: io::Error,
    },
}

impl RemoteError {
    fn classify(operation: &'static str, url: &Url, err: DavError) -> Self {
        match err {
            DavError::NotFound(url) => RemoteError::Absent(url),
            other => Self::transport(operation, url, other),
        }
    }

    fn transport(operation: &'static str, url: &Url, err: DavError) -> Self {
        RemoteError::Transport {
            operation,
            url: url.clone(),
            source: err.into(),
        }
    }

    /// Flatten into an `io::Error`, with `NotFound` for an absent location.
    pub fn into_io(self) -> io::Error {
        match self {
            RemoteError::Absent(url) => {
                io::Error::new(io::ErrorKind::NotFound, format!("{url} does not exist"))
            }
            RemoteError::Transport { source, .. } => source,
        }
    }
}

/// One entry of a bounded listing.
#[derive(Debug, Clone)]
pub struct ListedEntry {
    pub relation: HrefRelation,
    pub is_collection: bool,
    /// Decoded path segments below the listing root; empty for the root.
    pub segments: Vec<String>,
    pub response: DavResponse,
}

impl ListedEntry {
    pub fn is_root(&self) -> bool {
        self.relation == HrefRelation::SelfEntry
    }

    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }
}

#[derive(Clone)]
pub struct Remote {
    client: Arc<dyn DavClient>,
}

impl Remote {
    pub fn new(client: Arc<dyn DavClient>) -> Self {
        Self { client }
    }

    pub async fn create_collection(&self, url: &Url) -> Result<(), RemoteError> {
        let status = self
            .client
            .mkcol(url)
            .await
            .map_err(|e| RemoteError::classify("MKCOL", url, e))?;
        debug!(url = %url, status = %status, "Created collection");
        Ok(())
    }

    pub async fn exists(&self, url: &Url) -> Result<bool, RemoteError> {
        match self.client.head(url).await {
            Ok(status) => {
                debug!(url = %url, status = %status, "Probed location");
                Ok(status.is_success())
            }
            Err(DavError::NotFound(_)) => Ok(false),
            Err(e) => Err(RemoteError::transport("HEAD", url, e)),
        }
    }

    /// Delete a resource or collection. An absent location is a transport
    /// failure here too; its `io::Error` keeps `ErrorKind::NotFound`.
    pub async fn delete(&self, url: &Url) -> Result<(), RemoteError> {
        let status = self
            .client
            .delete(url)
            .await
            .map_err(|e| RemoteError::transport("DELETE", url, e))?;
        debug!(url = %url, status = %status, "Deleted");
        Ok(())
    }

    pub async fn open_read(&self, url: &Url) -> Result<BoxedReader, RemoteError> {
        self.client
            .get(url)
            .await
            .map_err(|e| RemoteError::classify("GET", url, e))
    }

    pub async fn open_write(&self, url: &Url) -> Result<BoxedWriter, RemoteError> {
        self.client
            .put(url)
            .await
            .map_err(|e| RemoteError::classify("PUT", url, e))
    }

    /// List `root` down to `depth` levels below it, in listing order.
    ///
    /// Entries outside `root` or deeper than `depth` are dropped, whatever
    /// the server returned.
    pub async fn list_recursive(
        &self,
        root: &RootLocation,
        depth: u32,
        props: &[PropName],
    ) -> Result<Vec<ListedEntry>, RemoteError> {
        let url = as_collection(root.url());
        let base = root.segments();
        let max_depth = depth as usize;

        let mut entries = Vec::new();
        let mut on_response = |response: DavResponse, relation: HrefRelation| {
            if response.href.origin() != url.origin() {
                return;
            }
            let segments = response.path_segments();
            if !segments.starts_with(&base) || segments.len() - base.len() > max_depth {
                return;
            }
            entries.push(ListedEntry {
                relation,
                is_collection: response.is_collection,
                segments: segments[base.len()..].to_vec(),
                response,
            });
        };

        self.client
            .propfind(&url, depth, props, &mut on_response)
            .await
            .map_err(|e| RemoteError::classify("PROPFIND", &url, e))?;
        debug!(url = %url, depth, entries = entries.len(), "Listed collection");
        Ok(entries)
    }
}
