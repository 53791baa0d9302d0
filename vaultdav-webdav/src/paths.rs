//! Remote locations of backup data.
//!
//! Scheme: `{root}/{token}/{name}`. Segments are appended as given; the
//! naming rules in `vaultdav_common::names` keep them legal.

use url::Url;
use vaultdav_common::RestoreSetToken;

use crate::client::decoded_segments;

#[derive(Debug, thiserror::Error)]
pub enum InvalidRoot {
    #[error("invalid root URL: {0}")]
    Parse(#[from] url::ParseError),
    #[error("unsupported scheme for root URL: {0}")]
    Scheme(String),
}

/// Base URL under which all backup data for one account lives.
///
/// Always an `http`/`https` URL, so appending path segments cannot fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootLocation(Url);

impl RootLocation {
    pub fn new(url: Url) -> Result<Self, InvalidRoot> {
        match url.scheme() {
            "http" | "https" if !url.cannot_be_a_base() => Ok(Self(url)),
            scheme => Err(InvalidRoot::Scheme(scheme.to_string())),
        }
    }

    pub fn parse(url: &str) -> Result<Self, InvalidRoot> {
        Self::new(Url::parse(url)?)
    }

    /// The root one directory further down, e.g. the backup folder inside
    /// the account's WebDAV home.
    pub fn child(&self, dir: &str) -> Self {
        Self(append(self.0.clone(), &[dir]))
    }

    pub fn url(&self) -> &Url {
        &self.0
    }

    /// Decoded path segments of the root, without empty segments. Comparable
    /// with [`DavResponse::path_segments`](crate::client::DavResponse::path_segments).
    pub fn segments(&self) -> Vec<String> {
        decoded_segments(&self.0)
    }
}

/// Location of a restore-set folder or of a resource inside it.
pub fn resolve(root: &RootLocation, token: Option<RestoreSetToken>, name: Option<&str>) -> Url {
    let token = token.map(|t| t.to_string());
    let segments: Vec<&str> = token.as_deref().into_iter().chain(name).collect();
    append(root.0.clone(), &segments)
}

/// Same location with a trailing slash, as WebDAV expects for collections.
pub fn as_collection(url: &Url) -> Url {
    if url.path().ends_with('/') {
        return url.clone();
    }
    let mut url = url.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.push("");
    }
    url
}

fn append(mut url: Url, segments: &[&str]) -> Url {
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty();
        path.extend(segments);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(value: u64) -> RestoreSetToken {
        RestoreSetToken::new(value).unwrap()
    }

    #[test]
    fn test_resolve() {
        let root =
            RootLocation::parse("https://dav.example.com/remote.php/webdav/.SeedVaultAndroidBackup")
                .unwrap();
        assert_eq!(
            resolve(&root, None, None).as_str(),
            "https://dav.example.com/remote.php/webdav/.SeedVaultAndroidBackup"
        );
        assert_eq!(
            resolve(&root, Some(token(1700000000000)), None).as_str(),
            "https://dav.example.com/remote.php/webdav/.SeedVaultAndroidBackup/1700000000000"
        );
        assert_eq!(
            resolve(&root, Some(token(5)), Some(".backup.metadata")).as_str(),
            "https://dav.example.com/remote.php/webdav/.SeedVaultAndroidBackup/5/.backup.metadata"
        );
    }

    #[test]
    fn test_trailing_slash_on_root_is_ignored() {
        let with_slash = RootLocation::parse("https://dav.example.com/backup/").unwrap();
        let without = RootLocation::parse("https://dav.example.com/backup").unwrap();
        assert_eq!(
            resolve(&with_slash, Some(token(7)), Some("ab")),
            resolve(&without, Some(token(7)), Some("ab"))
        );
    }

    #[test]
    fn test_child_and_segments() {
        let root = RootLocation::parse("http://localhost:8080/dav/")
            .unwrap()
            .child(".SeedVaultAndroidBackup");
        assert_eq!(root.url().as_str(), "http://localhost:8080/dav/.SeedVaultAndroidBackup");
        assert_eq!(root.segments(), vec!["dav", ".SeedVaultAndroidBackup"]);
    }

    #[test]
    fn test_segments_are_decoded() {
        let root = RootLocation::parse("https://cloud.example.com/files/john%40example.com/")
            .unwrap()
            .child("my backups");
        assert_eq!(root.url().path(), "/files/john%40example.com/my%20backups");
        assert_eq!(root.segments(), vec!["files", "john@example.com", "my backups"]);
    }

    #[test]
    fn test_as_collection() {
        let url = Url::parse("https://h/dav/5").unwrap();
        assert_eq!(as_collection(&url).as_str(), "https://h/dav/5/");
        let url = Url::parse("https://h/dav/5/").unwrap();
        assert_eq!(as_collection(&url).as_str(), "https://h/dav/5/");
    }

    #[test]
    fn test_rejects_non_http_roots() {
        assert!(matches!(RootLocation::parse("ftp://h/dav"), Err(InvalidRoot::Scheme(_))));
        assert!(matches!(
            RootLocation::parse("mailto:me@example.com"),
            Err(InvalidRoot::Scheme(_))
        ));
        assert!(matches!(RootLocation::parse("not a url"), Err(InvalidRoot::Parse(_))));
    }
}
