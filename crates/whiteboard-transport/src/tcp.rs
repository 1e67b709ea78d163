//! TCP transport for controllers reached through a serial-to-network bridge
//! (ser2net, ESP-Link and similar).
//!
//! The bridge forwards bytes only, so there is no way to pulse the reset
//! line; [`LineWriter::set_control_signal`] returns [`Error::Unsupported`].

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use whiteboard_core::error::{Error, Result};
use whiteboard_core::transport::{LineReader, LineWriter, Transport};

use crate::stream::{LineFramedReader, LineFramedWriter};

/// Default connection timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP transport to a networked controller bridge.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    addr: String,
}

impl TcpTransport {
    /// Connect to `host:port` using the default timeout.
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::connect_with_timeout(addr, DEFAULT_CONNECT_TIMEOUT).await
    }

    /// Connect to `host:port`, giving up after `timeout`.
    pub async fn connect_with_timeout(addr: &str, timeout: Duration) -> Result<Self> {
        tracing::debug!(
            addr = %addr,
            timeout_ms = timeout.as_millis(),
            "Connecting to TCP endpoint"
        );

        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                tracing::error!(addr = %addr, "TCP connection timed out");
                Error::Timeout
            })?
            .map_err(|e| {
                tracing::error!(addr = %addr, error = %e, "TCP connection failed");
                map_connect_error(e, addr)
            })?;

        // Commands are a few bytes each and every one waits for an ack.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(
                addr = %addr,
                error = %e,
                "Failed to set TCP_NODELAY (continuing anyway)"
            );
        }

        tracing::info!(addr = %addr, "TCP connection established");

        Ok(Self {
            stream,
            addr: addr.to_string(),
        })
    }
}

impl Transport for TcpTransport {
    fn name(&self) -> &str {
        &self.addr
    }

    fn split(self: Box<Self>) -> (Box<dyn LineReader>, Box<dyn LineWriter>) {
        let TcpTransport { stream, addr } = *self;
        let (read_half, write_half) = stream.into_split();
        let reader: LineFramedReader<OwnedReadHalf> = LineFramedReader::new(read_half, addr.clone());
        let writer: LineFramedWriter<OwnedWriteHalf> = LineFramedWriter::new(write_half, addr);
        (Box::new(reader), Box::new(writer))
    }
}

/// Map a connection-time I/O error to the appropriate [`Error`] variant.
fn map_connect_error(e: std::io::Error, addr: &str) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            Error::Transport(format!("connection refused: {}", addr))
        }
        _ => Error::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    async fn test_listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    #[tokio::test]
    async fn line_exchange_over_loopback() {
        let (listener, addr) = test_listener().await;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let cmd = lines.next_line().await.unwrap().unwrap();
            assert_eq!(cmd, "G1 X10");
            write_half.write_all(b"// moving\r\nok\r\n").await.unwrap();
            write_half.flush().await.unwrap();
        });

        let transport = Box::new(TcpTransport::connect(&addr).await.unwrap());
        assert_eq!(transport.name(), addr);
        let (mut reader, mut writer) = transport.split();

        writer.write_line("G1 X10").await.unwrap();
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("// moving"));
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("ok"));

        server.await.unwrap();
        assert!(reader.read_line().await.unwrap().is_none());
        writer.close().await.unwrap();
    }

    #[tokio::test]
    async fn connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = TcpTransport::connect(&addr).await.unwrap_err();
        match &err {
            Error::Transport(msg) => assert!(
                msg.contains("connection refused"),
                "expected 'connection refused' in message, got: {}",
                msg
            ),
            other => panic!("expected Transport error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn reset_line_is_unsupported() {
        let (listener, addr) = test_listener().await;
        let server = tokio::spawn(async move {
            let _ = listener.accept().await.unwrap();
        });

        let transport = Box::new(TcpTransport::connect(&addr).await.unwrap());
        let (_reader, mut writer) = transport.split();
        let result = writer.set_control_signal(true).await;
        assert!(matches!(result, Err(Error::Unsupported(_))));
        server.await.unwrap();
    }
}
