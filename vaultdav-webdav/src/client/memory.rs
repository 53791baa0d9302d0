//! In-memory WebDAV namespace.
//!
//! Mirrors the status semantics of a real server closely enough to run the
//! storage plugin offline: MKCOL on an existing collection is 405 and on a
//! missing parent 409, PUT into a missing collection is 409, DELETE of a
//! collection is recursive, and HEAD/GET/DELETE/PROPFIND of a missing
//! location report not found. Writes become visible on `shutdown()`.
//!
//! Transport failures can be injected per operation, and requests are
//! counted so tests can check how often the remote was contacted.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use tokio::io::AsyncWrite;
use url::Url;
use vaultdav_common::{BoxedReader, BoxedWriter};

use super::{
    decoded_segments, relation_of, DavClient, DavError, DavResponse, HrefRelation, PropName,
};

/// Remote primitives, for failure injection and request counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DavOperation {
    Mkcol,
    Head,
    Delete,
    Propfind,
    Get,
    Put,
}

#[derive(Debug, Clone)]
enum Node {
    Collection,
    Resource(Bytes),
}

type Key = Vec<String>;

#[derive(Default)]
struct Namespace {
    nodes: BTreeMap<Key, Node>,
    failing: HashSet<DavOperation>,
    requests: HashMap<DavOperation, usize>,
    ignore_depth: bool,
}

impl Namespace {
    fn is_collection(&self, key: &[String]) -> bool {
        key.is_empty() || matches!(self.nodes.get(key), Some(Node::Collection))
    }

    fn exists(&self, key: &[String]) -> bool {
        key.is_empty() || self.nodes.contains_key(key)
    }

    fn parent_is_collection(&self, key: &[String]) -> bool {
        key.split_last()
            .map(|(_, parent)| self.is_collection(parent))
            .unwrap_or(true)
    }

    /// Count the request and fail it if failures are injected for `op`.
    fn begin(&mut self, op: DavOperation, url: &Url) -> Result<(), DavError> {
        *self.requests.entry(op).or_default() += 1;
        if self.failing.contains(&op) {
            return Err(DavError::Io(io::Error::new(
                io::ErrorKind::ConnectionReset,
                format!("injected {op:?} failure for {url}"),
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryDavClient {
    namespace: Arc<Mutex<Namespace>>,
}

impl MemoryDavClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Namespace> {
        self.namespace.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every subsequent `op` fail with a transport error.
    pub fn fail(&self, op: DavOperation) {
        self.lock().failing.insert(op);
    }

    pub fn recover(&self, op: DavOperation) {
        self.lock().failing.remove(&op);
    }

    /// Answer PROPFIND as if the depth were `infinity`, as some servers do
    /// for depths other than 0 and 1.
    pub fn set_ignore_depth(&self, ignore: bool) {
        self.lock().ignore_depth = ignore;
    }

    pub fn request_count(&self, op: DavOperation) -> usize {
        self.lock().requests.get(&op).copied().unwrap_or(0)
    }

    /// All stored paths, collections with a trailing slash, in namespace order.
    pub fn paths(&self) -> Vec<String> {
        self.lock()
            .nodes
            .iter()
            .map(|(key, node)| match node {
                Node::Collection => format!("/{}/", key.join("/")),
                Node::Resource(_) => format!("/{}", key.join("/")),
            })
            .collect()
    }

    /// Contents of a stored resource.
    pub fn contents(&self, path: &str) -> Option<Bytes> {
        let key: Key = path.split('/').filter(|s| !s.is_empty()).map(str::to_string).collect();
        match self.lock().nodes.get(&key) {
            Some(Node::Resource(data)) => Some(data.clone()),
            _ => None,
        }
    }
}

fn status(method: &'static str, url: &Url, status: StatusCode) -> DavError {
    DavError::Status {
        method,
        url: url.clone(),
        status,
    }
}

fn href_for(base: &Url, key: &[String], is_collection: bool) -> Url {
    let mut href = base.clone();
    if let Ok(mut segments) = href.path_segments_mut() {
        segments.clear();
        segments.extend(key);
        if is_collection && !key.is_empty() {
            segments.push("");
        }
    }
    href
}

#[async_trait]
impl DavClient for MemoryDavClient {
    async fn mkcol(&self, url: &Url) -> Result<StatusCode, DavError> {
        let mut ns = self.lock();
        ns.begin(DavOperation::Mkcol, url)?;
        let key = decoded_segments(url);
        if ns.exists(&key) {
            return Err(status("MKCOL", url, StatusCode::METHOD_NOT_ALLOWED));
        }
        if !ns.parent_is_collection(&key) {
            return Err(status("MKCOL", url, StatusCode::CONFLICT));
        }
        ns.nodes.insert(key, Node::Collection);
        Ok(StatusCode::CREATED)
    }

    async fn head(&self, url: &Url) -> Result<StatusCode, DavError> {
        let mut ns = self.lock();
        ns.begin(DavOperation::Head, url)?;
        if ns.exists(&decoded_segments(url)) {
            Ok(StatusCode::OK)
        } else {
            Err(DavError::NotFound(url.clone()))
        }
    }

    async fn delete(&self, url: &Url) -> Result<StatusCode, DavError> {
        let mut ns = self.lock();
        ns.begin(DavOperation::Delete, url)?;
        let key = decoded_segments(url);
        if key.is_empty() {
            return Err(status("DELETE", url, StatusCode::FORBIDDEN));
        }
        if ns.nodes.remove(&key).is_none() {
            return Err(DavError::NotFound(url.clone()));
        }
        ns.nodes.retain(|k, _| !k.starts_with(&key));
        Ok(StatusCode::NO_CONTENT)
    }

    async fn propfind(
        &self,
        url: &Url,
        depth: u32,
        _props: &[PropName],
        on_response: &mut (dyn FnMut(DavResponse, HrefRelation) + Send),
    ) -> Result<(), DavError> {
        let responses = {
            let mut ns = self.lock();
            ns.begin(DavOperation::Propfind, url)?;
            let base = decoded_segments(url);
            if !ns.exists(&base) {
                return Err(DavError::NotFound(url.clone()));
            }
            let max_depth = if ns.ignore_depth { usize::MAX } else { depth as usize };

            let mut responses = vec![DavResponse {
                href: href_for(url, &base, ns.is_collection(&base)),
                is_collection: ns.is_collection(&base),
                display_name: base.last().cloned(),
            }];
            for (key, node) in ns.nodes.range(base.clone()..) {
                if !key.starts_with(&base) {
                    break;
                }
                let below = key.len() - base.len();
                if below == 0 || below > max_depth {
                    continue;
                }
                let is_collection = matches!(node, Node::Collection);
                responses.push(DavResponse {
                    href: href_for(url, key, is_collection),
                    is_collection,
                    display_name: key.last().cloned(),
                });
            }
            responses
        };

        for response in responses {
            let relation = relation_of(url, &response.href);
            on_response(response, relation);
        }
        Ok(())
    }

    async fn get(&self, url: &Url) -> Result<BoxedReader, DavError> {
        let mut ns = self.lock();
        ns.begin(DavOperation::Get, url)?;
        match ns.nodes.get(&decoded_segments(url)) {
            Some(Node::Resource(data)) => Ok(Box::pin(io::Cursor::new(data.clone()))),
            Some(Node::Collection) => Err(status("GET", url, StatusCode::METHOD_NOT_ALLOWED)),
            None => Err(DavError::NotFound(url.clone())),
        }
    }

    async fn put(&self, url: &Url) -> Result<BoxedWriter, DavError> {
        let mut ns = self.lock();
        ns.begin(DavOperation::Put, url)?;
        let key = decoded_segments(url);
        if key.is_empty() || ns.is_collection(&key) {
            return Err(status("PUT", url, StatusCode::METHOD_NOT_ALLOWED));
        }
        if !ns.parent_is_collection(&key) {
            return Err(status("PUT", url, StatusCode::CONFLICT));
        }
        Ok(Box::pin(MemoryWriter {
            key,
            buffer: Vec::new(),
            namespace: Arc::clone(&self.namespace),
            committed: false,
        }))
    }
}

/// Buffers a PUT body and stores it on shutdown.
struct MemoryWriter {
    key: Key,
    buffer: Vec<u8>,
    namespace: Arc<Mutex<Namespace>>,
    committed: bool,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.committed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write after shutdown",
            )));
        }
        self.buffer.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.committed {
            return Poll::Ready(Ok(()));
        }
        let data = Bytes::from(std::mem::take(&mut self.buffer));
        let key = self.key.clone();
        let mut ns = self.namespace.lock().unwrap_or_else(PoisonError::into_inner);
        // The parent may have been deleted while the upload was open.
        if !ns.parent_is_collection(&key) {
            return Poll::Ready(Err(io::Error::other(format!(
                "PUT /{} failed: HTTP 409 Conflict",
                key.join("/")
            ))));
        }
        ns.nodes.insert(key, Node::Resource(data));
        drop(ns);
        self.committed = true;
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn url(path: &str) -> Url {
        Url::parse("http://memory.invalid/").unwrap().join(path).unwrap()
    }

    async fn write(client: &MemoryDavClient, path: &str, data: &[u8]) {
        let mut writer = client.put(&url(path)).await.unwrap();
        writer.write_all(data).await.unwrap();
        writer.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_mkcol_semantics() {
        let client = MemoryDavClient::new();
        assert_eq!(client.mkcol(&url("/dav")).await.unwrap(), StatusCode::CREATED);
        assert!(matches!(
            client.mkcol(&url("/dav")).await,
            Err(DavError::Status { status, .. }) if status == StatusCode::METHOD_NOT_ALLOWED
        ));
        assert!(matches!(
            client.mkcol(&url("/missing/child")).await,
            Err(DavError::Status { status, .. }) if status == StatusCode::CONFLICT
        ));
        assert_eq!(client.paths(), vec!["/dav/"]);
    }

    #[tokio::test]
    async fn test_write_is_visible_after_shutdown() {
        let client = MemoryDavClient::new();
        client.mkcol(&url("/dav")).await.unwrap();

        let mut writer = client.put(&url("/dav/file")).await.unwrap();
        writer.write_all(b"hello").await.unwrap();
        assert!(matches!(client.head(&url("/dav/file")).await, Err(DavError::NotFound(_))));
        writer.shutdown().await.unwrap();
        assert_eq!(client.head(&url("/dav/file")).await.unwrap(), StatusCode::OK);

        let mut contents = Vec::new();
        client.get(&url("/dav/file")).await.unwrap().read_to_end(&mut contents).await.unwrap();
        assert_eq!(contents, b"hello");
        assert_eq!(client.contents("/dav/file").as_deref(), Some(&b"hello"[..]));
    }

    #[tokio::test]
    async fn test_put_into_missing_collection_conflicts() {
        let client = MemoryDavClient::new();
        let result = client.put(&url("/nowhere/file")).await;
        assert!(matches!(
            result,
            Err(DavError::Status { status, .. }) if status == StatusCode::CONFLICT
        ));
    }

    #[tokio::test]
    async fn test_delete_is_recursive() {
        let client = MemoryDavClient::new();
        client.mkcol(&url("/dav")).await.unwrap();
        client.mkcol(&url("/dav/5")).await.unwrap();
        write(&client, "/dav/5/a", b"a").await;
        write(&client, "/dav/other", b"b").await;

        client.delete(&url("/dav/5")).await.unwrap();
        assert_eq!(client.paths(), vec!["/dav/", "/dav/other"]);
        assert!(matches!(client.delete(&url("/dav/5")).await, Err(DavError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_propfind_respects_depth() {
        let client = MemoryDavClient::new();
        client.mkcol(&url("/dav")).await.unwrap();
        client.mkcol(&url("/dav/5")).await.unwrap();
        client.mkcol(&url("/dav/5/ab")).await.unwrap();
        write(&client, "/dav/5/ab/deep", b"x").await;

        let mut seen = Vec::new();
        client
            .propfind(&url("/dav/"), 1, &[], &mut |response, relation| {
                seen.push((response.href.path().to_string(), relation));
            })
            .await
            .unwrap();
        assert_eq!(
            seen,
            vec![
                ("/dav/".to_string(), HrefRelation::SelfEntry),
                ("/dav/5/".to_string(), HrefRelation::Member),
            ]
        );

        client.set_ignore_depth(true);
        let mut count = 0;
        client.propfind(&url("/dav/"), 1, &[], &mut |_, _| count += 1).await.unwrap();
        assert_eq!(count, 4);
    }

    #[tokio::test]
    async fn test_injected_failures_are_counted() {
        let client = MemoryDavClient::new();
        client.fail(DavOperation::Head);
        assert!(matches!(client.head(&url("/")).await, Err(DavError::Io(_))));
        client.recover(DavOperation::Head);
        assert_eq!(client.head(&url("/")).await.unwrap(), StatusCode::OK);
        assert_eq!(client.request_count(DavOperation::Head), 2);
        assert_eq!(client.request_count(DavOperation::Get), 0);
    }
}
