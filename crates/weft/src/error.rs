use std::sync::Arc;

use loona_hpack::decoder::DecoderError;
use weft_h2::FrameType;

/// Any error a round trip, tunnel, or connection can surface.
///
/// Cloneable so a single terminal connection error can be fanned out to
/// every in-flight stream's body pipe and result slot; latched I/O
/// errors are shared behind an [`Arc`].
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Request scheme is not `https` and no fallback transport is
    /// configured
    #[error("unsupported scheme {scheme:?} and no fallback transport")]
    UnsupportedScheme { scheme: String },

    /// The request URI carries no host to dial or to use as `:authority`
    #[error("request uri has no host")]
    MissingHost,

    /// TCP dial or TLS handshake failed
    #[error("connection failed: {0}")]
    Connect(Arc<std::io::Error>),

    /// The host name is not a valid TLS server name
    #[error("invalid tls server name {0:?}")]
    InvalidServerName(String),

    /// ALPN did not mutually agree on the HTTP/2 identifier
    #[error("bad ALPN protocol negotiated: {0:?}")]
    AlpnMismatch(Option<String>),

    /// The first frame from the peer was not SETTINGS
    #[error("expected SETTINGS from peer, got {frame:?}")]
    BadHandshake { frame: FrameType },

    /// The connection was observed closed before the request could be
    /// placed. The transport retries these with a fresh connection.
    #[error("connection is closed")]
    ConnClosed,

    /// Every attempt hit a just-closed connection
    #[error("request retries exhausted ({attempts} attempts)")]
    RetriesExhausted { attempts: usize },

    /// The reader task terminated before delivering this stream's
    /// response, without recording a more specific error
    #[error("connection closed before the response arrived")]
    ClosedBeforeResponse,

    /// A write on the connection failed. Once set, every later write on
    /// the same connection reports the same latched error.
    #[error("write error: {0}")]
    Write(Arc<std::io::Error>),

    /// Reading from the connection failed
    #[error("read error: {0}")]
    Read(Arc<std::io::Error>),

    /// The peer violated the framing protocol; the connection is dead
    #[error("http2 protocol error: {0}")]
    Protocol(#[from] ProtoError),

    /// Error produced by an embedder-supplied proxy resolver or
    /// fallback transport
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn write(e: std::io::Error) -> Self {
        Error::Write(Arc::new(e))
    }

    pub(crate) fn read(e: std::io::Error) -> Self {
        Error::Read(Arc::new(e))
    }
}

/// A protocol violation observed by the reader task. All of these tear
/// the connection down — in-flight streams see the error through their
/// body pipes and result slots — except [`ProtoError::StreamReset`],
/// which only fails the stream the peer reset.
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtoError {
    #[error("expected CONTINUATION for stream {expected}, got one for stream {got}")]
    ContinuationForWrongStream { expected: u32, got: u32 },

    #[error("expected CONTINUATION for stream {expected}, got {frame:?}")]
    ExpectedContinuation { expected: u32, frame: FrameType },

    #[error("{frame_type:?} frame of {frame_size} bytes exceeds max frame size {max_frame_size}")]
    FrameTooLarge {
        frame_type: FrameType,
        frame_size: u32,
        max_frame_size: u32,
    },

    #[error("{frame_type:?} frame has Padded flag but padding exceeds the payload")]
    BadPadding { frame_type: FrameType },

    #[error("frame header could not be parsed")]
    BadFrameHeader,

    #[error("GOAWAY payload could not be parsed")]
    BadGoAway,

    #[error("SETTINGS payload length {len} is not a multiple of 6")]
    SettingsInvalidLength { len: usize },

    #[error("hpack decoding error: {0}")]
    Hpack(#[from] DecoderError),

    #[error("malformed :status pseudo-header")]
    BadStatus,

    #[error("response is missing the :status pseudo-header")]
    MissingStatus,

    #[error("header block ended on stream {0} with no response under construction")]
    HeaderBlockWithoutResponse(u32),

    #[error("stream {0} was reset by the peer")]
    StreamReset(u32),
}
