//! WebDAV client over HTTP.
//!
//! Uses reqwest for transport. Downloads are exposed as a byte stream read
//! straight from the response body; uploads stream a pipe into the request
//! body, with the request itself running on a spawned task.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{future, stream, StreamExt, TryStreamExt};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Body, Client, Method, RequestBuilder, StatusCode};
use tokio::io::{AsyncWrite, DuplexStream};
use tokio::sync::oneshot;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, warn};
use url::Url;
use vaultdav_common::{BoxedReader, BoxedWriter};

use super::{relation_of, DavClient, DavError, DavResponse, HrefRelation, PropName};
use crate::config::WebDavConfig;

const UPLOAD_PIPE_CAPACITY: usize = 64 * 1024;
const DAV_NAMESPACE: &str = "DAV:";

pub struct HttpDavClient {
    client: Client,
    username: Option<String>,
    password: Option<String>,
}

impl HttpDavClient {
    pub fn new(config: &WebDavConfig) -> Result<Self, DavError> {
        let mut builder = Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            client: builder.build()?,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn request(&self, method: Method, url: &Url) -> RequestBuilder {
        let req = self.client.request(method, url.clone());
        match &self.username {
            Some(user) => req.basic_auth(user, self.password.as_ref()),
            None => req,
        }
    }

    async fn send_simple(&self, method: &'static str, url: &Url) -> Result<StatusCode, DavError> {
        let resp = self.request(dav_method(method)?, url).send().await?;
        let status = check_status(method, url, resp.status())?;
        debug!(method, url = %url, status = %status, "WebDAV request complete");
        Ok(status)
    }
}

#[async_trait]
impl DavClient for HttpDavClient {
    async fn mkcol(&self, url: &Url) -> Result<StatusCode, DavError> {
        self.send_simple("MKCOL", url).await
    }

    async fn head(&self, url: &Url) -> Result<StatusCode, DavError> {
        self.send_simple("HEAD", url).await
    }

    async fn delete(&self, url: &Url) -> Result<StatusCode, DavError> {
        self.send_simple("DELETE", url).await
    }

    async fn propfind(
        &self,
        url: &Url,
        depth: u32,
        props: &[PropName],
        on_response: &mut (dyn FnMut(DavResponse, HrefRelation) + Send),
    ) -> Result<(), DavError> {
        let resp = self
            .request(dav_method("PROPFIND")?, url)
            .header("Depth", depth.to_string())
            .header(CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(propfind_body(props))
            .send()
            .await?;

        let status = check_status("PROPFIND", url, resp.status())?;
        if status != StatusCode::MULTI_STATUS {
            return Err(DavError::Status {
                method: "PROPFIND",
                url: url.clone(),
                status,
            });
        }

        let body = resp.text().await?;
        for response in parse_multistatus(url, &body)? {
            let relation = relation_of(url, &response.href);
            on_response(response, relation);
        }
        Ok(())
    }

    async fn get(&self, url: &Url) -> Result<BoxedReader, DavError> {
        let resp = self.request(Method::GET, url).send().await?;
        check_status("GET", url, resp.status())?;
        let body = resp.bytes_stream().map_err(io::Error::other);
        Ok(Box::pin(StreamReader::new(body)))
    }

    async fn put(&self, url: &Url) -> Result<BoxedWriter, DavError> {
        let (pipe, body) = tokio::io::duplex(UPLOAD_PIPE_CAPACITY);
        let (commit, committed) = oneshot::channel::<()>();
        // Once the pipe is drained, end the body only if the writer was shut
        // down. Otherwise fail it so the server never sees a complete request.
        let tail = stream::once(async move {
            match committed.await {
                Ok(()) => None,
                Err(_) => Some(Err::<Bytes, io::Error>(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "upload dropped before shutdown",
                ))),
            }
        })
        .filter_map(future::ready);
        let request = self
            .request(Method::PUT, url)
            .body(Body::wrap_stream(ReaderStream::new(body).chain(tail)));

        let (completion, done) = oneshot::channel();
        let target = url.clone();
        tokio::spawn(async move {
            let result = match request.send().await {
                Ok(resp) => check_status("PUT", &target, resp.status()).map(|status| {
                    debug!(url = %target, status = %status, "Upload complete");
                }),
                Err(e) => {
                    debug!(url = %target, error = %e, "Upload aborted");
                    Err(DavError::Http(e))
                }
            };
            // The writer may already be gone; nobody is left to tell.
            let _ = completion.send(result);
        });

        Ok(Box::pin(UploadWriter {
            pipe,
            commit: Some(commit),
            done: Some(done),
            url: url.clone(),
        }))
    }
}

/// Write half of a streaming PUT.
///
/// `poll_shutdown` marks the body as complete, closes it and then waits for
/// the request task to report its result through the one-shot channel. The
/// sender is consumed by `send`, so the result can arrive at most once; a
/// task that ends without sending (panic, runtime shutdown) is an error.
///
/// Dropping the writer before `shutdown()` drops `commit`, which makes the
/// request body fail instead of ending, so a partial upload is never stored.
struct UploadWriter {
    pipe: DuplexStream,
    commit: Option<oneshot::Sender<()>>,
    done: Option<oneshot::Receiver<Result<(), DavError>>>,
    url: Url,
}

impl AsyncWrite for UploadWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.pipe).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.pipe).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if let Some(commit) = self.commit.take() {
            // The request task may have failed already; `done` reports it.
            let _ = commit.send(());
        }
        ready!(Pin::new(&mut self.pipe).poll_shutdown(cx))?;
        let Some(done) = self.done.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let result = ready!(Pin::new(done).poll(cx));
        self.done = None;
        Poll::Ready(match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(DavError::Cancelled(format!("PUT {}", self.url)).into()),
        })
    }
}

fn dav_method(name: &'static str) -> Result<Method, DavError> {
    Method::from_bytes(name.as_bytes())
        .map_err(|e| DavError::Io(io::Error::new(io::ErrorKind::InvalidInput, e)))
}

fn check_status(
    method: &'static str,
    url: &Url,
    status: StatusCode,
) -> Result<StatusCode, DavError> {
    if status.is_success() {
        Ok(status)
    } else if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        Err(DavError::NotFound(url.clone()))
    } else {
        Err(DavError::Status {
            method,
            url: url.clone(),
            status,
        })
    }
}

fn propfind_body(props: &[PropName]) -> String {
    let mut body = String::from(r#"<?xml version="1.0" encoding="utf-8"?>"#);
    body.push_str(r#"<d:propfind xmlns:d="DAV:">"#);
    if props.is_empty() {
        body.push_str("<d:allprop/>");
    } else {
        body.push_str("<d:prop>");
        for prop in props {
            body.push_str(&format!("<d:{}/>", prop.local_name()));
        }
        body.push_str("</d:prop>");
    }
    body.push_str("</d:propfind>");
    body
}

/// Parse a PROPFIND multistatus body. Hrefs are resolved against `base`,
/// which should be the listed collection URL.
pub fn parse_multistatus(base: &Url, xml: &str) -> Result<Vec<DavResponse>, DavError> {
    let doc = roxmltree::Document::parse(xml)?;
    let mut responses = Vec::new();

    for node in doc.descendants().filter(|n| is_dav(n, "response")) {
        let Some(raw_href) = node
            .children()
            .find(|n| is_dav(n, "href"))
            .and_then(|n| n.text())
        else {
            debug!("Skipping multistatus response without href");
            continue;
        };
        let href = match base.join(raw_href.trim()) {
            Ok(href) => href,
            Err(e) => {
                warn!(href = %raw_href, error = %e, "Skipping unparseable href");
                continue;
            }
        };

        let is_collection = node
            .descendants()
            .filter(|n| is_dav(n, "resourcetype"))
            .any(|rt| rt.children().any(|c| is_dav(&c, "collection")));
        let display_name = node
            .descendants()
            .find(|n| is_dav(n, "displayname"))
            .and_then(|n| n.text())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        responses.push(DavResponse {
            href,
            is_collection,
            display_name,
        });
    }

    Ok(responses)
}

fn is_dav(node: &roxmltree::Node<'_, '_>, local: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == local
        && node.tag_name().namespace() == Some(DAV_NAMESPACE)
}
