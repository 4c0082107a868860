//! A pooled, multiplexing HTTP/2 client transport.
//!
//! [`Transport`] keeps one pool of HTTP/2 sessions keyed by
//! `host:port`. Concurrent requests to the same origin multiplex over a
//! shared connection; each connection runs a single reader task that
//! routes incoming frames back to the request that owns the stream.
//! CONNECT requests yield a [`Tunnel`], a raw byte channel over one
//! stream.
//!
//! ```no_run
//! # async fn run() -> Result<(), weft::Error> {
//! let transport = weft::Transport::default();
//! let mut req = weft::Request::get("https://example.com/".parse().unwrap());
//! let res = transport.round_trip(&mut req).await?;
//! println!("{} {:?}", res.status, res.content_len());
//! let body = res.body.collect().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Frame parsing and serialization live in the `weft-h2` crate; HPACK
//! is `loona-hpack`.

pub mod conn;
mod error;
mod framing;
mod hpack;
mod pipe;
mod transport;
mod tunnel;
mod types;

pub use error::{Error, ProtoError};
pub use pipe::Body;
pub use transport::{Fallback, ProxyFn, Transport, TransportConfig};
pub use tunnel::Tunnel;
pub use types::{Request, RequestBody, Response};

/// re-exported so consumers can name frame types and error codes
pub use weft_h2;

pub use http;
