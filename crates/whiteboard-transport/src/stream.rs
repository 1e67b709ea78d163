//! Line framing over any tokio byte stream.
//!
//! [`LineFramedReader`] and [`LineFramedWriter`] turn an `AsyncRead` /
//! `AsyncWrite` pair into the [`LineReader`] / [`LineWriter`] halves the
//! command channel expects. The serial and TCP transports are thin wrappers
//! around these two types.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use whiteboard_core::error::{Error, Result};
use whiteboard_core::transport::{LineReader, LineWriter};

/// Upper bound on a single received line. Bytes past it are dropped up to
/// the next newline; the kept prefix is still delivered so a long reply
/// resolves its request.
const MAX_LINE: usize = 4096;

/// Reads `\n`-terminated lines from a byte stream.
///
/// A trailing `\r` is stripped so controllers that answer with `\r\n` still
/// classify correctly. Invalid UTF-8 is replaced rather than rejected.
pub struct LineFramedReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
    label: String,
}

impl<R: AsyncRead + Unpin + Send> LineFramedReader<R> {
    pub fn new(inner: R, label: impl Into<String>) -> Self {
        Self {
            inner: BufReader::new(inner),
            buf: Vec::with_capacity(128),
            label: label.into(),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> LineReader for LineFramedReader<R> {
    async fn read_line(&mut self) -> Result<Option<String>> {
        self.buf.clear();
        let mut dropped = 0usize;

        loop {
            let available = self.inner.fill_buf().await.map_err(|e| {
                tracing::debug!(link = %self.label, error = %e, "line read failed");
                map_io_error(e)
            })?;

            if available.is_empty() {
                if self.buf.is_empty() && dropped == 0 {
                    tracing::debug!(link = %self.label, "end of stream");
                    return Ok(None);
                }
                break;
            }

            let newline = available.iter().position(|&b| b == b'\n');
            let content = &available[..newline.unwrap_or(available.len())];
            let room = MAX_LINE - self.buf.len();
            let kept = content.len().min(room);
            self.buf.extend_from_slice(&content[..kept]);
            dropped += content.len() - kept;

            let used = newline.map_or(available.len(), |i| i + 1);
            self.inner.consume(used);
            if newline.is_some() {
                break;
            }
        }

        if dropped > 0 {
            tracing::warn!(link = %self.label, dropped, "oversized line truncated");
        }
        if self.buf.last() == Some(&b'\r') {
            self.buf.pop();
        }

        let line = String::from_utf8_lossy(&self.buf).into_owned();
        tracing::trace!(link = %self.label, line = %line, "line received");
        Ok(Some(line))
    }
}

/// Writes lines to a byte stream with a bare `\n` terminator.
pub struct LineFramedWriter<W> {
    inner: Option<W>,
    label: String,
}

impl<W: AsyncWrite + Unpin + Send> LineFramedWriter<W> {
    pub fn new(inner: W, label: impl Into<String>) -> Self {
        Self {
            inner: Some(inner),
            label: label.into(),
        }
    }

    /// Name used in log output.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Write one framed line and flush.
    pub async fn write_framed(&mut self, line: &str) -> Result<()> {
        let inner = self.inner.as_mut().ok_or(Error::NotConnected)?;

        let mut frame = Vec::with_capacity(line.len() + 1);
        frame.extend_from_slice(line.as_bytes());
        frame.push(b'\n');

        tracing::trace!(link = %self.label, line = %line, "sending line");

        inner.write_all(&frame).await.map_err(|e| {
            tracing::error!(link = %self.label, error = %e, "failed to send line");
            map_io_error(e)
        })?;
        inner.flush().await.map_err(|e| {
            tracing::error!(link = %self.label, error = %e, "failed to flush line");
            map_io_error(e)
        })?;

        Ok(())
    }

    /// Flush and shut down the stream. Subsequent writes return
    /// [`Error::NotConnected`].
    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(mut inner) = self.inner.take() {
            if let Err(e) = inner.flush().await {
                tracing::warn!(
                    link = %self.label,
                    error = %e,
                    "failed to flush before closing (continuing anyway)"
                );
            }
            if let Err(e) = inner.shutdown().await {
                tracing::warn!(
                    link = %self.label,
                    error = %e,
                    "failed to shut down stream (continuing anyway)"
                );
            }
            tracing::debug!(link = %self.label, "stream closed");
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> LineWriter for LineFramedWriter<W> {
    async fn write_line(&mut self, line: &str) -> Result<()> {
        self.write_framed(line).await
    }

    async fn set_control_signal(&mut self, _asserted: bool) -> Result<()> {
        Err(Error::Unsupported(format!(
            "{} has no control signal",
            self.label
        )))
    }

    async fn close(&mut self) -> Result<()> {
        self.shutdown().await
    }
}

/// Map a data-path I/O error to the appropriate [`Error`] variant.
pub(crate) fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::UnexpectedEof => Error::ConnectionLost,
        _ => Error::Io(e),
    }
}
