//! CONNECT tunnels: one stream treated as a bidirectional byte channel.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::debug;

use crate::conn::{Conn, Stream};
use crate::error::Error;
use crate::types::Response;

/// A bidirectional byte channel layered on a single HTTP/2 stream,
/// produced by a CONNECT request.
///
/// Reads consume the stream's response body; writes go out as unflagged
/// DATA frames, flushed immediately. Closing resets the stream
/// (`RST_STREAM` with `STREAM_CLOSED`) and detaches it from the
/// connection.
pub struct Tunnel {
    conn: Arc<Conn>,
    stream: Arc<Stream>,
    res: Response,
    closed: bool,
}

impl Tunnel {
    pub(crate) fn new(conn: Arc<Conn>, stream: Arc<Stream>, res: Response) -> Self {
        Self {
            conn,
            stream,
            res,
            closed: false,
        }
    }

    /// Status and headers the peer answered the CONNECT request with.
    pub fn response(&self) -> &Response {
        &self.res
    }

    /// Read bytes the peer sent through the tunnel. Returns 0 at EOF or
    /// after [`Tunnel::close`].
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.res.body.read(buf).await
    }

    /// Send bytes through the tunnel.
    pub async fn write(&mut self, payload: &[u8]) -> Result<usize, Error> {
        self.conn
            .write_tunnel_data(self.stream.id, payload)
            .await?;
        Ok(payload.len())
    }

    /// Tear the tunnel down: reset the stream and release it. Further
    /// reads return EOF.
    pub async fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!(stream_id = %self.stream.id, "closing tunnel");
        self.res.body.shutdown();
        self.conn.reset_stream(self.stream.id).await
    }

    /// Local address of the connection carrying the tunnel.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.conn.local_addr()
    }

    /// Peer address of the connection carrying the tunnel.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.conn.peer_addr()
    }

    /// Deadlines are accepted for interface parity but not enforced in
    /// this revision.
    pub fn set_read_deadline(&mut self, _deadline: std::time::Instant) {}

    /// See [`Tunnel::set_read_deadline`].
    pub fn set_write_deadline(&mut self, _deadline: std::time::Instant) {}
}
