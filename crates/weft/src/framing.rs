//! Framer adapter: read-one-frame and write-typed-frame over the
//! connection's buffered socket halves.
//!
//! The write side latches its first I/O error (the sticky write error):
//! after any failure, every later operation reports the same error
//! without touching the socket, so a dead connection fails fast and
//! deterministically.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};
use tracing::{debug, trace};

use weft_h2::{
    ContinuationFlags, DataFlags, ErrorCode, Frame, FrameType, HeadersFlags, RstStream,
    SettingPairs, SettingsFlags, StreamId, WindowUpdate, BitFlags, FRAME_HEADER_LEN, PREFACE,
};

use crate::error::{Error, ProtoError};

pub(crate) type ReadHalf = Box<dyn AsyncRead + Send + Unpin + 'static>;
pub(crate) type WriteHalf = Box<dyn AsyncWrite + Send + Unpin + 'static>;

/// Reads frames off the connection. Sole property of the reader task
/// (after connection establishment reads the first SETTINGS).
pub(crate) struct FrameReader {
    r: BufReader<ReadHalf>,
    /// Ceiling for incoming payloads. We never advertise a larger frame
    /// size, so anything bigger is a peer violation.
    max_frame_size: u32,
}

impl FrameReader {
    pub(crate) fn new(r: ReadHalf) -> Self {
        Self {
            r: BufReader::new(r),
            max_frame_size: weft_h2::DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Read one frame and its payload, already stripped of padding and
    /// of the HEADERS priority field. Returns `None` on a clean EOF at
    /// a frame boundary.
    pub(crate) async fn read_frame(&mut self) -> Result<Option<(Frame, Bytes)>, Error> {
        let mut head = [0u8; FRAME_HEADER_LEN];

        // a clean hang-up happens between frames, not inside one
        let n = self.r.read(&mut head).await.map_err(Error::read)?;
        if n == 0 {
            trace!("peer hung up");
            return Ok(None);
        }
        self.r
            .read_exact(&mut head[n..])
            .await
            .map_err(Error::read)?;

        let (_, frame) = Frame::parse(&head)
            .map_err(|_| Error::Protocol(ProtoError::BadFrameHeader))?;
        debug!(?frame, "<");

        if frame.len > self.max_frame_size {
            return Err(ProtoError::FrameTooLarge {
                frame_type: frame.frame_type,
                frame_size: frame.len,
                max_frame_size: self.max_frame_size,
            }
            .into());
        }

        let mut payload = vec![0u8; frame.len as usize];
        self.r
            .read_exact(&mut payload)
            .await
            .map_err(Error::read)?;
        let mut payload = Bytes::from(payload);

        // strip Pad Length + priority field + trailing padding,
        // leaving only the useful payload
        let prio_len = if frame.has_priority() { 5 } else { 0 };
        if frame.is_padded() {
            if payload.is_empty() {
                return Err(ProtoError::BadPadding {
                    frame_type: frame.frame_type,
                }
                .into());
            }
            let padding = payload.split_to(1)[0] as usize;
            if payload.len() < padding + prio_len {
                return Err(ProtoError::BadPadding {
                    frame_type: frame.frame_type,
                }
                .into());
            }
            payload.truncate(payload.len() - padding);
        }
        if prio_len > 0 {
            if payload.len() < prio_len {
                return Err(ProtoError::BadPadding {
                    frame_type: frame.frame_type,
                }
                .into());
            }
            let _ = payload.split_to(prio_len);
        }

        Ok(Some((frame, payload)))
    }
}

/// Writes typed frames into the connection's buffered writer. Shared by
/// the executor, body copiers, and tunnels; always accessed under the
/// connection mutex.
pub(crate) struct FrameWriter {
    w: BufWriter<WriteHalf>,
    scratch: Vec<u8>,
    err: Option<Arc<std::io::Error>>,
}

impl FrameWriter {
    pub(crate) fn new(w: WriteHalf) -> Self {
        Self {
            w: BufWriter::new(w),
            scratch: Vec::with_capacity(FRAME_HEADER_LEN),
            err: None,
        }
    }

    /// The latched write error, if any write has failed.
    pub(crate) fn sticky_err(&self) -> Option<Error> {
        self.err.as_ref().map(|e| Error::Write(e.clone()))
    }

    pub(crate) async fn write_preface(&mut self) -> Result<(), Error> {
        self.write_all(PREFACE).await
    }

    /// This revision announces no settings of its own.
    pub(crate) async fn write_settings(&mut self) -> Result<(), Error> {
        let frame = Frame::new(
            FrameType::Settings(BitFlags::default()),
            StreamId::CONNECTION,
        );
        self.scratch.clear();
        SettingPairs(&[])
            .write_into(&mut self.scratch)
            .map_err(Error::write)?;
        self.write_frame(frame).await
    }

    pub(crate) async fn write_settings_ack(&mut self) -> Result<(), Error> {
        let frame = Frame::new(
            FrameType::Settings(SettingsFlags::Ack.into()),
            StreamId::CONNECTION,
        );
        self.scratch.clear();
        self.write_frame(frame).await
    }

    pub(crate) async fn write_window_update(
        &mut self,
        stream_id: StreamId,
        increment: u32,
    ) -> Result<(), Error> {
        let frame = Frame::new(FrameType::WindowUpdate, stream_id);
        self.scratch.clear();
        WindowUpdate {
            reserved: 0,
            increment,
        }
        .write_into(&mut self.scratch)
        .map_err(Error::write)?;
        self.write_frame(frame).await
    }

    pub(crate) async fn write_headers(
        &mut self,
        stream_id: StreamId,
        fragment: &[u8],
        end_stream: bool,
        end_headers: bool,
    ) -> Result<(), Error> {
        let mut flags = BitFlags::<HeadersFlags>::default();
        if end_stream {
            flags |= HeadersFlags::EndStream;
        }
        if end_headers {
            flags |= HeadersFlags::EndHeaders;
        }
        let frame = Frame::new(FrameType::Headers(flags), stream_id)
            .with_len(fragment.len() as u32);
        self.write_frame_header(frame).await?;
        self.write_all(fragment).await
    }

    pub(crate) async fn write_continuation(
        &mut self,
        stream_id: StreamId,
        end_headers: bool,
        fragment: &[u8],
    ) -> Result<(), Error> {
        let mut flags = BitFlags::<ContinuationFlags>::default();
        if end_headers {
            flags |= ContinuationFlags::EndHeaders;
        }
        let frame = Frame::new(FrameType::Continuation(flags), stream_id)
            .with_len(fragment.len() as u32);
        self.write_frame_header(frame).await?;
        self.write_all(fragment).await
    }

    pub(crate) async fn write_data(
        &mut self,
        stream_id: StreamId,
        end_stream: bool,
        payload: &[u8],
    ) -> Result<(), Error> {
        let mut flags = BitFlags::<DataFlags>::default();
        if end_stream {
            flags |= DataFlags::EndStream;
        }
        let frame =
            Frame::new(FrameType::Data(flags), stream_id).with_len(payload.len() as u32);
        self.write_frame_header(frame).await?;
        self.write_all(payload).await
    }

    pub(crate) async fn write_rst_stream(
        &mut self,
        stream_id: StreamId,
        error_code: ErrorCode,
    ) -> Result<(), Error> {
        let frame = Frame::new(FrameType::RstStream, stream_id);
        self.scratch.clear();
        RstStream { error_code }
            .write_into(&mut self.scratch)
            .map_err(Error::write)?;
        self.write_frame(frame).await
    }

    pub(crate) async fn flush(&mut self) -> Result<(), Error> {
        if let Some(err) = self.sticky_err() {
            return Err(err);
        }
        match self.w.flush().await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.latch(e)),
        }
    }

    pub(crate) async fn shutdown(&mut self) {
        let _ = self.w.shutdown().await;
    }

    /// Write a frame whose payload was staged in `self.scratch`.
    async fn write_frame(&mut self, frame: Frame) -> Result<(), Error> {
        let frame = frame.with_len(self.scratch.len() as u32);
        let payload = std::mem::take(&mut self.scratch);
        let res = self.write_frame_header(frame).await;
        let res = match res {
            Ok(()) => self.write_all(&payload).await,
            err => err,
        };
        self.scratch = payload;
        res
    }

    async fn write_frame_header(&mut self, frame: Frame) -> Result<(), Error> {
        debug!(?frame, ">");
        let mut head = [0u8; FRAME_HEADER_LEN];
        frame
            .write_into(&mut head[..])
            .map_err(Error::write)?;
        self.write_all(&head).await
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<(), Error> {
        if let Some(err) = self.sticky_err() {
            return Err(err);
        }
        match self.w.write_all(buf).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.latch(e)),
        }
    }

    fn latch(&mut self, e: std::io::Error) -> Error {
        let first = self.err.get_or_insert(Arc::new(e));
        Error::Write(first.clone())
    }
}
