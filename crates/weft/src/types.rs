use std::fmt;
use std::io::Cursor;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri, Version};
use tokio::io::AsyncRead;

use crate::pipe::Body;

/// A streaming request body. The transport reads it chunk by chunk and
/// copies it onto the stream as DATA frames; only the first
/// [`Request::content_length`] bytes are sent.
pub type RequestBody = Box<dyn AsyncRead + Send + Unpin + 'static>;

/// An HTTP request
pub struct Request {
    pub method: Method,

    /// Requested entity. Supplies the `:path` and `:scheme`
    /// pseudo-headers and, absent [`Request::authority`], `:authority`.
    pub uri: Uri,

    /// Overrides the `:authority` pseudo-header. When `None`, the URI's
    /// authority is used.
    pub authority: Option<String>,

    /// Request headers. Names are emitted lowercased; a header literally
    /// named `host` is dropped (the target is conveyed by `:authority`).
    pub headers: HeaderMap,

    /// Announced body length. A body is only streamed when this is
    /// non-zero (or the method is CONNECT, where the stream stays open
    /// for the tunnel instead).
    pub content_length: u64,

    /// Body bytes to stream after the header block.
    pub body: Option<RequestBody>,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            authority: None,
            headers: HeaderMap::new(),
            content_length: 0,
            body: None,
        }
    }

    pub fn get(uri: Uri) -> Self {
        Self::new(Method::GET, uri)
    }

    /// Attach a fixed body, setting `content_length` to its size.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.content_length = body.len() as u64;
        self.body = Some(Box::new(Cursor::new(body)));
        self
    }
}

impl fmt::Debug for Request {
    // the body is an opaque reader, show the addressable parts
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("authority", &self.authority)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// An HTTP response, delivered once the header block completes. The
/// body streams in afterwards through [`Response::body`].
#[derive(Debug)]
pub struct Response {
    /// Always [`Version::HTTP_2`] on this transport
    pub version: Version,

    /// Status code carried by the `:status` pseudo-header
    pub status: StatusCode,

    /// Response headers
    pub headers: HeaderMap,

    /// Response body; reaches EOF when the peer ends the stream
    pub body: Body,
}

impl Response {
    /// The announced `content-length`, if the peer sent one that parses.
    pub fn content_len(&self) -> Option<u64> {
        let value = self.headers.get(http::header::CONTENT_LENGTH)?;
        value.to_str().ok()?.parse().ok()
    }
}
