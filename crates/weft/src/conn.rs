//! One HTTP/2 session: establishment, request execution, and the reader
//! task that demultiplexes incoming frames back onto their streams.
//!
//! Every touch of the buffered writer — header blocks, DATA, RST_STREAM,
//! the handshake — happens under the connection mutex. The mutex is held
//! across a whole header block, which is what guarantees that no other
//! stream's frames interleave between a HEADERS frame and its final
//! CONTINUATION. DATA frames take the lock per frame, so bodies from
//! concurrent requests may interleave (they are allowed to).

use std::borrow::Cow;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tracing::{debug, trace};

use weft_h2::{
    FrameType, GoAway, KnownErrorCode, RstStream, Setting, StreamId,
    DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE,
};

use crate::error::{Error, ProtoError};
use crate::framing::{FrameReader, FrameWriter};
use crate::hpack::{HeaderBlockDecoder, HeaderEncoder};
use crate::pipe::{body_pipe, Body, BodyWriter};
use crate::transport::PoolInner;
use crate::tunnel::Tunnel;
use crate::types::{Request, RequestBody, Response};

/// What we assume until the peer says otherwise. The protocol leaves
/// this unlimited; 1000 is plenty for one TCP connection.
const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 1000;

/// Connection-level flow-control window opened right after the preface.
/// This revision never replenishes it.
const CONNECTION_WINDOW_INCREMENT: u32 = 1 << 30;

/// What the reader hands back through a stream's result slot.
type StreamResult = Result<(Response, Arc<Stream>), Error>;

/// One in-flight request on a connection.
pub(crate) struct Stream {
    pub(crate) id: StreamId,
    res_tx: parking_lot::Mutex<Option<oneshot::Sender<StreamResult>>>,
}

impl Stream {
    fn take_result_tx(&self) -> Option<oneshot::Sender<StreamResult>> {
        self.res_tx.lock().take()
    }
}

/// Everything guarded by the connection mutex: the buffered writer (and
/// with it the sticky write error), the HPACK encoder scratch, the
/// stream registry, the id allocator, and the peer's settings.
struct ConnState {
    closed: bool,
    goaway: Option<GoAway>,
    streams: HashMap<u32, Arc<Stream>>,
    next_stream_id: u32,
    framer: FrameWriter,
    henc: HeaderEncoder,
    // settings from peer
    max_frame_size: u32,
    max_concurrent_streams: u32,
    initial_window_size: u32,
}

impl ConnState {
    fn new_stream(&mut self) -> (Arc<Stream>, oneshot::Receiver<StreamResult>) {
        let (tx, rx) = oneshot::channel();
        let stream = Arc::new(Stream {
            id: StreamId(self.next_stream_id),
            res_tx: parking_lot::Mutex::new(Some(tx)),
        });
        self.next_stream_id += 2;
        self.streams.insert(stream.id.0, stream.clone());
        (stream, rx)
    }

    /// Encode the request's header block into the connection's scratch
    /// buffer. Pseudo-header order is fixed; regular headers go out
    /// lowercased with `host` dropped and multi-value order preserved.
    fn encode_headers(&mut self, req: &Request) -> std::io::Result<Vec<u8>> {
        let authority = match &req.authority {
            Some(authority) => authority.clone(),
            None => req
                .uri
                .authority()
                .map(|a| a.as_str().to_string())
                .unwrap_or_default(),
        };
        let path = req
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let scheme = req.uri.scheme_str().unwrap_or("");

        self.henc.write_field(b":authority", authority.as_bytes())?;
        self.henc.write_field(b":method", req.method.as_str().as_bytes())?;
        self.henc.write_field(b":path", path.as_bytes())?;
        self.henc.write_field(b":scheme", scheme.as_bytes())?;

        for (name, value) in req.headers.iter() {
            // conveyed by :authority instead
            if name == http::header::HOST {
                continue;
            }
            self.henc
                .write_field(name.as_str().as_bytes(), value.as_bytes())?;
        }
        Ok(self.henc.take_block())
    }
}

/// An established HTTP/2 client session.
///
/// Cheap to share: the transport pool, the reader task, body copiers and
/// tunnels all hold `Arc<Conn>` handles. The session dies when its
/// reader task exits, at which point it removes itself from the pool.
pub struct Conn {
    pool: Weak<PoolInner>,
    conn_keys: Vec<String>,
    state: Mutex<ConnState>,
    /// Set by the reader task right before it fails the pending streams.
    reader_err: parking_lot::Mutex<Option<Error>>,
    /// Kicks the reader out of its socket read when the connection is
    /// closed locally.
    close_notify: Notify,
    /// Streams torn down locally (tunnel close). The reader task owns
    /// their body writers and drops its end when told.
    reset_tx: mpsc::UnboundedSender<StreamId>,
    addrs: Option<(SocketAddr, SocketAddr)>,
}

/// Establish an HTTP/2 client session over an already-connected,
/// already-secured transport: write the connection preface, exchange
/// SETTINGS, open the connection-level flow-control window, and spawn
/// the reader task.
///
/// The pool dials TLS and calls this internally; it is public so a
/// session can be driven over any byte stream (tests run it over an
/// in-memory duplex).
pub async fn handshake(
    io: impl AsyncRead + AsyncWrite + Send + 'static,
) -> Result<Arc<Conn>, Error> {
    handshake_inner(io, Weak::new(), Vec::new(), None).await
}

pub(crate) async fn handshake_inner(
    io: impl AsyncRead + AsyncWrite + Send + 'static,
    pool: Weak<PoolInner>,
    conn_keys: Vec<String>,
    addrs: Option<(SocketAddr, SocketAddr)>,
) -> Result<Arc<Conn>, Error> {
    let (r, w) = tokio::io::split(io);
    let mut reader = FrameReader::new(Box::new(r));
    let mut framer = FrameWriter::new(Box::new(w));

    framer.write_preface().await?;
    framer.write_settings().await?;
    framer
        .write_window_update(StreamId::CONNECTION, CONNECTION_WINDOW_INCREMENT)
        .await?;
    framer.flush().await?;

    // the peer must lead with its SETTINGS frame
    let (frame, payload) = match reader.read_frame().await? {
        Some(fp) => fp,
        None => return Err(Error::read(std::io::ErrorKind::UnexpectedEof.into())),
    };
    let mut max_frame_size = DEFAULT_MAX_FRAME_SIZE;
    let mut max_concurrent_streams = DEFAULT_MAX_CONCURRENT_STREAMS;
    let mut initial_window_size = DEFAULT_INITIAL_WINDOW_SIZE;
    match frame.frame_type {
        FrameType::Settings(_) => {
            weft_h2::settings_pairs(&payload, |id, value| match Setting::from_repr(id) {
                Some(Setting::MaxFrameSize) => max_frame_size = value,
                Some(Setting::MaxConcurrentStreams) => max_concurrent_streams = value,
                Some(Setting::InitialWindowSize) => initial_window_size = value,
                other => debug!(?other, %id, %value, "ignoring setting"),
            })
            .map_err(|_| ProtoError::SettingsInvalidLength {
                len: payload.len(),
            })?;
        }
        _ => {
            return Err(Error::BadHandshake {
                frame: frame.frame_type,
            })
        }
    }
    framer.write_settings_ack().await?;
    framer.flush().await?;

    debug!(
        max_frame_size,
        max_concurrent_streams, initial_window_size, "http2 session established"
    );

    let (reset_tx, reset_rx) = mpsc::unbounded_channel();
    let conn = Arc::new(Conn {
        pool,
        conn_keys,
        state: Mutex::new(ConnState {
            closed: false,
            goaway: None,
            streams: HashMap::new(),
            next_stream_id: 1,
            framer,
            henc: HeaderEncoder::new(),
            max_frame_size,
            max_concurrent_streams,
            initial_window_size,
        }),
        reader_err: parking_lot::Mutex::new(None),
        close_notify: Notify::new(),
        reset_tx,
        addrs,
    });

    tokio::spawn(
        ReadLoop {
            conn: conn.clone(),
            reader,
            resets: reset_rx,
            hdec: HeaderBlockDecoder::new(),
            next_res: None,
            active_res: HashMap::new(),
            continue_stream_id: 0,
        }
        .run(),
    );

    Ok(conn)
}

impl Conn {
    /// Execute a request and return the response.
    pub async fn round_trip(self: &Arc<Self>, req: &mut Request) -> Result<Response, Error> {
        let (res, _stream) = self.execute(req).await?;
        Ok(res)
    }

    /// Execute a CONNECT-style request and wrap the stream as a
    /// bidirectional byte channel.
    pub async fn connect(self: &Arc<Self>, req: &mut Request) -> Result<Tunnel, Error> {
        let (res, stream) = self.execute(req).await?;
        Ok(Tunnel::new(self.clone(), stream, res))
    }

    /// Send the request and wait for the reader to deliver its response.
    async fn execute(
        self: &Arc<Self>,
        req: &mut Request,
    ) -> Result<(Response, Arc<Stream>), Error> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(Error::ConnClosed);
        }

        let (stream, res_rx) = state.new_stream();
        let has_body = req.content_length > 0 || req.method == Method::CONNECT;

        // HEADERS then CONTINUATIONs, nothing else in between: the lock
        // is held until the whole block (and the flush) is out
        let block = state.encode_headers(req).map_err(Error::write)?;
        let max_frame_size = state.max_frame_size as usize;
        let mut rest = &block[..];
        let mut first = true;
        while !rest.is_empty() {
            let (chunk, tail) = rest.split_at(rest.len().min(max_frame_size));
            rest = tail;
            let end_headers = rest.is_empty();
            if first {
                state
                    .framer
                    .write_headers(stream.id, chunk, !has_body, end_headers)
                    .await?;
                first = false;
            } else {
                state
                    .framer
                    .write_continuation(stream.id, end_headers, chunk)
                    .await?;
            }
        }
        let write_err = state.framer.flush().await.err();
        drop(state);

        if has_body {
            if let Some(body) = req.body.take() {
                let writer = DataWriter {
                    conn: self.clone(),
                    stream_id: stream.id,
                    remaining: req.content_length,
                };
                tokio::spawn(copy_request_body(body, writer, max_frame_size));
            }
        }

        if let Some(err) = write_err {
            return Err(err);
        }

        match res_rx.await {
            Ok(result) => result,
            Err(_) => Err(self.reader_error()),
        }
    }

    /// True if the pool may place a new request here: no GOAWAY seen,
    /// not closed, stream ids not exhausted, and room under the peer's
    /// concurrency limit.
    pub async fn can_take_new_request(&self) -> bool {
        let state = self.state.lock().await;
        !state.closed
            && state.goaway.is_none()
            && (state.streams.len() as u64 + 1) < u64::from(state.max_concurrent_streams)
            && state.next_stream_id < StreamId::MAX.0
    }

    /// Close the connection if it has no streams in flight. The reader
    /// task observes the close and unwinds, removing the connection
    /// from its pool.
    pub async fn close_if_idle(&self) {
        let mut state = self.state.lock().await;
        if !state.streams.is_empty() {
            return;
        }
        state.closed = true;
        state.framer.shutdown().await;
        drop(state);
        self.close_notify.notify_one();
    }

    /// Local address of the underlying socket, when there is one.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.addrs.map(|(local, _)| local)
    }

    /// Peer address of the underlying socket, when there is one.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.addrs.map(|(_, peer)| peer)
    }

    async fn set_goaway(&self, goaway: GoAway) {
        self.state.lock().await.goaway = Some(goaway);
    }

    async fn stream_by_id(&self, id: StreamId, and_remove: bool) -> Option<Arc<Stream>> {
        let mut state = self.state.lock().await;
        if and_remove {
            state.streams.remove(&id.0)
        } else {
            state.streams.get(&id.0).cloned()
        }
    }

    pub(crate) async fn remove_stream(&self, id: StreamId) {
        self.state.lock().await.streams.remove(&id.0);
    }

    /// DATA on an open tunnel: one unflagged frame, flushed immediately.
    pub(crate) async fn write_tunnel_data(&self, id: StreamId, payload: &[u8]) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        state.framer.write_data(id, false, payload).await?;
        state.framer.flush().await
    }

    /// Tear down a tunnel's stream: RST_STREAM, registry removal, and a
    /// note to the reader task to close the stream's body writer.
    pub(crate) async fn reset_stream(&self, id: StreamId) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        state.streams.remove(&id.0);
        let _ = self.reset_tx.send(id);
        state
            .framer
            .write_rst_stream(id, KnownErrorCode::StreamClosed.into())
            .await?;
        state.framer.flush().await
    }

    fn reader_error(&self) -> Error {
        self.reader_err
            .lock()
            .clone()
            .unwrap_or(Error::ClosedBeforeResponse)
    }

    /// Mark closed and fail every stream still waiting on a response.
    /// Runs once, from the reader task's teardown.
    async fn fail_pending_streams(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        for (_, stream) in state.streams.drain() {
            drop(stream.take_result_tx());
        }
    }

    async fn remove_from_pool(self: &Arc<Self>) {
        if let Some(pool) = self.pool.upgrade() {
            pool.remove_conn(self).await;
        }
    }

    pub(crate) fn pool_keys(&self) -> &[String] {
        &self.conn_keys
    }
}

/// Byte sink for one stream's request body. Each chunk becomes one DATA
/// frame; the chunk that exhausts the announced length carries
/// END_STREAM and triggers a flush.
struct DataWriter {
    conn: Arc<Conn>,
    stream_id: StreamId,
    remaining: u64,
}

impl DataWriter {
    async fn write(&mut self, chunk: &[u8]) -> Result<(), Error> {
        let end_stream = chunk.len() as u64 >= self.remaining;
        {
            let mut state = self.conn.state.lock().await;
            state
                .framer
                .write_data(self.stream_id, end_stream, chunk)
                .await?;
            if end_stream {
                state.framer.flush().await?;
            }
        }
        self.remaining = self.remaining.saturating_sub(chunk.len() as u64);
        Ok(())
    }
}

/// Detached task copying the request body onto the stream. Reads are
/// capped at the peer's max frame size so every chunk fits in one DATA
/// frame no matter how the producer buffers. Failures latch the sticky
/// write error; there is no caller to report them to.
async fn copy_request_body(mut body: RequestBody, mut writer: DataWriter, max_frame_size: usize) {
    let mut buf = vec![0u8; max_frame_size.min(32 * 1024)];
    loop {
        match body.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(err) = writer.write(&buf[..n]).await {
                    debug!(%err, stream_id = %writer.stream_id, "request body write failed");
                    break;
                }
            }
            Err(err) => {
                debug!(%err, stream_id = %writer.stream_id, "request body read failed");
                break;
            }
        }
    }
}

/// A response being assembled between a HEADERS frame and END_HEADERS.
/// At most one exists per connection at a time; the contiguity rule is
/// what makes that sound.
struct PendingResponse {
    status: Option<StatusCode>,
    headers: HeaderMap,
    malformed: Option<ProtoError>,
    end_stream: bool,
    body_tx: Option<BodyWriter>,
    body_rx: Option<Body>,
}

/// HPACK field callback: route one decoded field into the pending
/// response. `:status` sets the code, other pseudo-headers are dropped,
/// everything else accumulates in received order.
fn on_header_field(res: &mut PendingResponse, name: &[u8], value: &[u8]) {
    if res.malformed.is_some() {
        return;
    }
    trace!(
        name = %String::from_utf8_lossy(name),
        value = %String::from_utf8_lossy(value),
        "received header field"
    );

    if name == b":status" {
        let code = std::str::from_utf8(value)
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .and_then(|v| StatusCode::from_u16(v).ok());
        match code {
            Some(status) => res.status = Some(status),
            None => res.malformed = Some(ProtoError::BadStatus),
        }
    } else if name.starts_with(b":") {
        trace!("dropping unknown pseudo-header");
    } else {
        match (HeaderName::from_bytes(name), HeaderValue::from_bytes(value)) {
            (Ok(name), Ok(value)) => {
                res.headers.append(name, value);
            }
            _ => debug!("dropping malformed header field"),
        }
    }
}

/// The connection's reader task: demultiplexes frames to streams,
/// enforces HEADERS/CONTINUATION contiguity, assembles responses, pipes
/// DATA into bodies, and unwinds the connection when the peer (or a
/// local close) ends it.
struct ReadLoop {
    conn: Arc<Conn>,
    reader: FrameReader,
    /// Streams torn down locally; their body writers get dropped here.
    resets: mpsc::UnboundedReceiver<StreamId>,
    hdec: HeaderBlockDecoder,
    next_res: Option<PendingResponse>,
    active_res: HashMap<u32, BodyWriter>,
    /// 0 when no header block is in progress; otherwise the stream whose
    /// CONTINUATION frames are the only thing we will accept.
    continue_stream_id: u32,
}

impl ReadLoop {
    async fn run(mut self) {
        let err = match self.work().await {
            // a clean hang-up mid-stream still kills in-flight bodies
            Ok(()) => Error::read(std::io::ErrorKind::UnexpectedEof.into()),
            Err(err) => err,
        };
        debug!(%err, "reader task unwinding");

        for (_, mut writer) in self.active_res.drain() {
            writer.close_with_error(err.clone());
        }
        if let Some(mut pending) = self.next_res.take() {
            if let Some(mut writer) = pending.body_tx.take() {
                writer.close_with_error(err.clone());
            }
        }
        *self.conn.reader_err.lock() = Some(err);
        self.conn.fail_pending_streams().await;
        self.conn.remove_from_pool().await;
    }

    async fn work(&mut self) -> Result<(), Error> {
        loop {
            tokio::select! {
                res = self.reader.read_frame() => match res? {
                    Some((frame, payload)) => self.process_frame(frame, payload).await?,
                    None => return Ok(()),
                },
                id = self.resets.recv() => {
                    if let Some(id) = id {
                        if let Some(mut writer) = self.active_res.remove(&id.0) {
                            writer.close();
                        }
                    }
                }
                _ = self.conn.close_notify.notified() => return Err(Error::ConnClosed),
            }
        }
    }

    async fn process_frame(
        &mut self,
        frame: weft_h2::Frame,
        payload: Bytes,
    ) -> Result<(), Error> {
        let stream_id = frame.stream_id;

        // between a HEADERS frame without END_HEADERS and its final
        // CONTINUATION, nothing else may appear on the connection
        let is_continuation = matches!(frame.frame_type, FrameType::Continuation(_));
        if is_continuation {
            if stream_id.0 != self.continue_stream_id {
                return Err(ProtoError::ContinuationForWrongStream {
                    expected: self.continue_stream_id,
                    got: stream_id.0,
                }
                .into());
            }
        } else if self.continue_stream_id != 0 {
            return Err(ProtoError::ExpectedContinuation {
                expected: self.continue_stream_id,
                frame: frame.frame_type,
            }
            .into());
        }

        // connection control frames live on stream 0
        if stream_id == StreamId::CONNECTION {
            if let FrameType::GoAway = frame.frame_type {
                let (_, goaway) =
                    GoAway::parse(&payload).map_err(|_| ProtoError::BadGoAway)?;
                if goaway.error_code != KnownErrorCode::NoError.into() {
                    debug!(error_code = ?goaway.error_code, "received GOAWAY with error");
                }
                // stop being selectable, keep servicing in-flight streams
                self.conn.remove_from_pool().await;
                self.conn.set_goaway(goaway).await;
            } else {
                debug!(?frame, "dropping connection-level frame");
            }
            return Ok(());
        }

        // server push would arrive on even ids; we drop it
        if stream_id.is_server_initiated() {
            debug!(?frame, "dropping frame for server-initiated stream");
            return Ok(());
        }

        let stream_ended = frame.is_end_stream();
        let headers_ended = frame.headers_ended();

        // Whether this frame retires the stream. END_STREAM only takes
        // effect once its header block is complete: a HEADERS frame
        // carrying END_STREAM but not END_HEADERS stays registered (and
        // keeps its result slot reachable) until the CONTINUATION that
        // finishes the block; that CONTINUATION inherits the flag from
        // the response under construction.
        let ends_stream = if is_continuation {
            self.next_res
                .as_ref()
                .is_some_and(|pending| pending.end_stream)
        } else {
            stream_ended
        };
        let remove = ends_stream && headers_ended != Some(false);

        let Some(stream) = self.conn.stream_by_id(stream_id, remove).await else {
            debug!(?frame, "dropping frame for untracked stream");
            return Ok(());
        };

        match frame.frame_type {
            FrameType::Headers(_) => {
                let (body_tx, body_rx) = body_pipe();
                self.next_res = Some(PendingResponse {
                    status: None,
                    headers: HeaderMap::new(),
                    malformed: None,
                    end_stream: stream_ended,
                    body_tx: Some(body_tx),
                    body_rx: Some(body_rx),
                });
                self.hdec.push(&payload);
            }
            FrameType::Continuation(_) => {
                self.hdec.push(&payload);
            }
            FrameType::Data(_) => {
                if let Some(writer) = self.active_res.get_mut(&stream_id.0) {
                    writer.write(payload).await;
                } else {
                    debug!(%stream_id, "data for a stream with no response body");
                }
            }
            FrameType::RstStream => {
                let code = RstStream::parse(&payload)
                    .map(|(_, rst)| rst.error_code)
                    .unwrap_or(KnownErrorCode::ProtocolError.into());
                debug!(%stream_id, ?code, "stream reset by peer");
                self.conn.remove_stream(stream_id).await;
                if let Some(mut writer) = self.active_res.remove(&stream_id.0) {
                    writer.close_with_error(ProtoError::StreamReset(stream_id.0).into());
                }
                if let Some(res_tx) = stream.take_result_tx() {
                    let _ = res_tx.send(Err(ProtoError::StreamReset(stream_id.0).into()));
                }
            }
            _ => {
                debug!(?frame, "dropping unhandled frame");
            }
        }

        if let Some(ended) = headers_ended {
            self.continue_stream_id = if ended { 0 } else { stream_id.0 };
        }

        if remove {
            if let Some(mut writer) = self.active_res.remove(&stream_id.0) {
                writer.close();
            }
        }

        if headers_ended == Some(true) {
            self.deliver_response(stream_id, stream).await?;
        }

        Ok(())
    }

    /// END_HEADERS: decode the accumulated block into the pending
    /// response and hand it to whoever is waiting on the stream.
    async fn deliver_response(
        &mut self,
        stream_id: StreamId,
        stream: Arc<Stream>,
    ) -> Result<(), Error> {
        let mut pending = self
            .next_res
            .take()
            .ok_or(ProtoError::HeaderBlockWithoutResponse(stream_id.0))?;

        {
            let pending = &mut pending;
            self.hdec
                .finish(|name: Cow<[u8]>, value: Cow<[u8]>| {
                    on_header_field(pending, &name, &value)
                })
                .map_err(ProtoError::Hpack)?;
        }
        if let Some(err) = pending.malformed.take() {
            return Err(err.into());
        }

        let status = pending.status.ok_or(ProtoError::MissingStatus)?;
        let (Some(mut body_tx), Some(body_rx)) = (pending.body_tx.take(), pending.body_rx.take())
        else {
            return Err(ProtoError::HeaderBlockWithoutResponse(stream_id.0).into());
        };

        let res = Response {
            version: Version::HTTP_2,
            status,
            headers: pending.headers,
            body: body_rx,
        };

        match stream.take_result_tx() {
            Some(res_tx) => {
                if pending.end_stream {
                    // no body follows, the pipe is born finished
                    body_tx.close();
                } else {
                    self.active_res.insert(stream_id.0, body_tx);
                }
                if res_tx.send(Ok((res, stream.clone()))).is_err() {
                    debug!(%stream_id, "response receiver went away");
                    self.active_res.remove(&stream_id.0);
                }
            }
            None => debug!(%stream_id, "response with nobody waiting"),
        }
        Ok(())
    }
}
