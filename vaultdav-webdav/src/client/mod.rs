//! WebDAV client capability used by the storage plugin.
//!
//! The plugin only needs six primitives: MKCOL, HEAD, DELETE, PROPFIND and
//! streamed GET/PUT. `HttpDavClient` speaks them over HTTP;
//! `MemoryDavClient` keeps an in-memory namespace with the same status
//! semantics.

pub mod http;
pub mod memory;

use std::io;

use async_trait::async_trait;
use reqwest::StatusCode;
use url::Url;
use vaultdav_common::{BoxedReader, BoxedWriter};

pub use http::HttpDavClient;
pub use memory::MemoryDavClient;

#[derive(Debug, thiserror::Error)]
pub enum DavError {
    #[error("not found: {0}")]
    NotFound(Url),
    #[error("{method} {url} failed: HTTP {status}")]
    Status {
        method: &'static str,
        url: Url,
        status: StatusCode,
    },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed multistatus response: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("{0} ended without reporting completion")]
    Cancelled(String),
}

impl From<DavError> for io::Error {
    fn from(err: DavError) -> Self {
        let kind = match &err {
            DavError::NotFound(_) => io::ErrorKind::NotFound,
            DavError::Cancelled(_) => io::ErrorKind::Interrupted,
            DavError::Http(e) if e.is_timeout() => io::ErrorKind::TimedOut,
            _ => io::ErrorKind::Other,
        };
        match err {
            DavError::Io(e) => e,
            other => io::Error::new(kind, other),
        }
    }
}

/// WebDAV properties the plugin asks for when listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropName {
    DisplayName,
    ResourceType,
}

impl PropName {
    pub fn local_name(self) -> &'static str {
        match self {
            PropName::DisplayName => "displayname",
            PropName::ResourceType => "resourcetype",
        }
    }
}

/// Position of a listed entry relative to the listed URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HrefRelation {
    /// The listed URL itself.
    SelfEntry,
    /// A direct child of the listed URL.
    Member,
    /// Anything deeper, or outside the listed URL.
    Other,
}

/// One `<response>` of a PROPFIND multistatus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavResponse {
    pub href: Url,
    pub is_collection: bool,
    pub display_name: Option<String>,
}

impl DavResponse {
    /// Decoded, non-empty path segments of the href.
    pub fn path_segments(&self) -> Vec<String> {
        decoded_segments(&self.href)
    }

    /// Last path segment, or an empty string for the server root.
    pub fn name(&self) -> String {
        self.path_segments().pop().unwrap_or_default()
    }
}

/// Remote WebDAV service.
///
/// Errors for a missing resource must be reported as
/// [`DavError::NotFound`]; the bridge relies on it to tell absence apart
/// from transport failures.
#[async_trait]
pub trait DavClient: Send + Sync {
    /// Create a collection.
    async fn mkcol(&self, url: &Url) -> Result<StatusCode, DavError>;

    /// Probe a location.
    async fn head(&self, url: &Url) -> Result<StatusCode, DavError>;

    /// Delete a resource, or a collection with everything in it.
    async fn delete(&self, url: &Url) -> Result<StatusCode, DavError>;

    /// List `url` down to `depth` levels, calling `on_response` once per
    /// entry in the order the server reports them.
    async fn propfind(
        &self,
        url: &Url,
        depth: u32,
        props: &[PropName],
        on_response: &mut (dyn FnMut(DavResponse, HrefRelation) + Send),
    ) -> Result<(), DavError>;

    /// Open a stream reading the resource.
    async fn get(&self, url: &Url) -> Result<BoxedReader, DavError>;

    /// Open a stream writing the resource. The upload is complete once
    /// `shutdown()` returns `Ok`.
    async fn put(&self, url: &Url) -> Result<BoxedWriter, DavError>;
}

/// Classify `href` relative to the listed URL `request`.
pub fn relation_of(request: &Url, href: &Url) -> HrefRelation {
    if request.origin() != href.origin() {
        return HrefRelation::Other;
    }
    let base = decoded_segments(request);
    let entry = decoded_segments(href);
    if !entry.starts_with(&base) {
        return HrefRelation::Other;
    }
    match entry.len() - base.len() {
        0 => HrefRelation::SelfEntry,
        1 => HrefRelation::Member,
        _ => HrefRelation::Other,
    }
}

pub(crate) fn decoded_segments(url: &Url) -> Vec<String> {
    url.path_segments()
        .map(|segments| {
            segments
                .filter(|s| !s.is_empty())
                .map(|s| {
                    urlencoding::decode(s)
                        .map(|decoded| decoded.into_owned())
                        .unwrap_or_else(|_| s.to_string())
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_relation_of() {
        let root = url("https://h/dav/backup/");
        assert_eq!(relation_of(&root, &url("https://h/dav/backup/")), HrefRelation::SelfEntry);
        assert_eq!(relation_of(&root, &url("https://h/dav/backup")), HrefRelation::SelfEntry);
        assert_eq!(relation_of(&root, &url("https://h/dav/backup/5/")), HrefRelation::Member);
        assert_eq!(
            relation_of(&root, &url("https://h/dav/backup/5/.backup.metadata")),
            HrefRelation::Other
        );
        assert_eq!(relation_of(&root, &url("https://h/dav/other/")), HrefRelation::Other);
        assert_eq!(relation_of(&root, &url("https://other/dav/backup/5/")), HrefRelation::Other);
    }

    #[test]
    fn test_response_segments_are_decoded() {
        let response = DavResponse {
            href: url("https://h/dav/my%20backup/5/.backup.metadata"),
            is_collection: false,
            display_name: None,
        };
        assert_eq!(response.path_segments(), vec!["dav", "my backup", "5", ".backup.metadata"]);
        assert_eq!(response.name(), ".backup.metadata");

        let root = DavResponse {
            href: url("https://h/"),
            is_collection: true,
            display_name: None,
        };
        assert_eq!(root.name(), "");
    }

    #[test]
    fn test_not_found_maps_to_io_kind() {
        let err: io::Error = DavError::NotFound(url("https://h/x")).into();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        let err: io::Error = DavError::Cancelled("PUT https://h/x".into()).into();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    }
}
