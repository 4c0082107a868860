//! In-memory byte pipe between the reader task and a response body.
//!
//! The reader task holds the write end and feeds it from DATA frames;
//! the [`Body`] end is handed to the caller inside a `Response`. The
//! capacity-1 channel makes the pipe a rendezvous: a connection's reader
//! task waits while the body consumer lags, the same way a synchronous
//! pipe would.

use std::sync::Arc;

use parking_lot::Mutex;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::Error;

pub(crate) fn body_pipe() -> (BodyWriter, Body) {
    let (tx, rx) = mpsc::channel(1);
    let err = Arc::new(Mutex::new(None));
    (
        BodyWriter {
            tx: Some(tx),
            err: err.clone(),
        },
        Body {
            rx,
            err,
            leftover: Bytes::new(),
            done: false,
        },
    )
}

/// Write end of a response body pipe, owned by the reader task.
pub(crate) struct BodyWriter {
    tx: Option<mpsc::Sender<Bytes>>,
    err: Arc<Mutex<Option<Error>>>,
}

impl BodyWriter {
    /// Feed a DATA payload to the body. Waits for the consumer if the
    /// pipe is full; a dropped consumer just swallows the chunk.
    pub(crate) async fn write(&mut self, chunk: Bytes) {
        if let Some(tx) = &self.tx {
            if tx.send(chunk).await.is_err() {
                trace!("body consumer is gone, dropping data");
                self.tx = None;
            }
        }
    }

    /// Close the pipe; the body reads EOF after draining.
    pub(crate) fn close(&mut self) {
        self.tx = None;
    }

    /// Close the pipe with an error; the body surfaces it after draining.
    pub(crate) fn close_with_error(&mut self, err: Error) {
        *self.err.lock() = Some(err);
        self.tx = None;
    }
}

/// A streaming response body.
///
/// Chunks arrive in DATA-frame order. When the stream ends cleanly the
/// body reports EOF; when the connection dies first, the terminal
/// connection error is surfaced instead.
#[derive(Debug)]
pub struct Body {
    rx: mpsc::Receiver<Bytes>,
    err: Arc<Mutex<Option<Error>>>,
    leftover: Bytes,
    done: bool,
}

impl Body {
    /// Next chunk of the body, `None` at EOF.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, Error> {
        if !self.leftover.is_empty() {
            return Ok(Some(std::mem::take(&mut self.leftover)));
        }
        if self.done {
            return self.eof_result();
        }
        match self.rx.recv().await {
            Some(chunk) => Ok(Some(chunk)),
            None => {
                self.done = true;
                self.eof_result()
            }
        }
    }

    /// Read into `buf`, returning 0 at EOF.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        match self.next_chunk().await? {
            None => Ok(0),
            Some(mut chunk) => {
                let n = buf.len().min(chunk.len());
                buf[..n].copy_from_slice(&chunk.split_to(n));
                self.leftover = chunk;
                Ok(n)
            }
        }
    }

    /// Drain the body to EOF and return everything read.
    pub async fn collect(mut self) -> Result<Bytes, Error> {
        let mut out = bytes::BytesMut::new();
        while let Some(chunk) = self.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }

    /// Stop consuming. Later DATA for this stream is discarded.
    pub(crate) fn shutdown(&mut self) {
        self.rx.close();
        self.done = true;
        self.leftover = Bytes::new();
        // EOF, not error: tunnel close reads EOF afterwards
        *self.err.lock() = None;
    }

    fn eof_result(&self) -> Result<Option<Bytes>, Error> {
        match self.err.lock().clone() {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chunks_then_eof() {
        let (mut w, mut body) = body_pipe();
        let feeder = tokio::spawn(async move {
            w.write(Bytes::from_static(b"hel")).await;
            w.write(Bytes::from_static(b"lo")).await;
            w.close();
        });

        let mut buf = [0u8; 2];
        assert_eq!(body.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf, b"he");
        assert_eq!(body.read(&mut buf).await.unwrap(), 1);
        assert_eq!(&buf[..1], b"l");
        assert_eq!(body.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf, b"lo");
        assert_eq!(body.read(&mut buf).await.unwrap(), 0);
        assert_eq!(body.read(&mut buf).await.unwrap(), 0);
        feeder.await.unwrap();
    }

    #[tokio::test]
    async fn error_surfaces_after_buffered_data() {
        let (mut w, mut body) = body_pipe();
        w.write(Bytes::from_static(b"partial")).await;
        w.close_with_error(Error::ClosedBeforeResponse);

        assert_eq!(
            body.next_chunk().await.unwrap().as_deref(),
            Some(&b"partial"[..])
        );
        assert!(matches!(
            body.next_chunk().await,
            Err(Error::ClosedBeforeResponse)
        ));
        // the error is sticky
        assert!(matches!(
            body.next_chunk().await,
            Err(Error::ClosedBeforeResponse)
        ));
    }

    #[tokio::test]
    async fn shutdown_reads_eof() {
        let (mut w, mut body) = body_pipe();
        w.write(Bytes::from_static(b"x")).await;
        body.shutdown();
        assert_eq!(body.next_chunk().await.unwrap(), None);
        // writes after shutdown are swallowed
        w.write(Bytes::from_static(b"y")).await;
        assert_eq!(body.next_chunk().await.unwrap(), None);
    }
}
