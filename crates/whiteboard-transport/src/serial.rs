//! Serial port transport for the plotter controller.
//!
//! This module provides [`SerialTransport`], which implements the
//! [`Transport`] trait for USB virtual COM ports and physical RS-232 links.
//! The whiteboard controller talks 9600 baud, 8 data bits, 1 stop bit, no
//! parity; those are the [`SerialConfig`] defaults.
//!
//! The controller's reset input is wired to DTR. Both halves of a split
//! [`SerialTransport`] share the port through a lock that is only held for
//! the duration of a single poll, so the writer can toggle DTR while the
//! reader task is parked waiting for the next line.
//!
//! # Example
//!
//! ```no_run
//! use whiteboard_transport::SerialTransport;
//!
//! # async fn example() -> whiteboard_core::Result<()> {
//! let transport = SerialTransport::open("/dev/ttyUSB0", 9600).await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::io;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_serial::{
    DataBits, FlowControl, Parity, SerialPort, SerialPortBuilderExt, SerialStream, StopBits,
};

use whiteboard_core::error::{Error, Result};
use whiteboard_core::transport::{LineReader, LineWriter, Transport};

use crate::stream::{LineFramedReader, LineFramedWriter};

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Baud rate (the whiteboard firmware uses 9600)
    pub baud_rate: u32,
    pub framing: Framing,
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            framing: Framing::default(),
            flow_control: FlowControl::None,
        }
    }
}

/// Character framing in the conventional `8N1` notation: data bits, parity
/// letter (`N`, `E` or `O`), stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framing {
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl Default for Framing {
    fn default() -> Self {
        Self {
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

impl FromStr for Framing {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::Unsupported(format!("serial framing {s:?} (expected e.g. 8N1)"));
        let &[bits, parity, stop] = s.as_bytes() else {
            return Err(invalid());
        };

        let data_bits = match bits {
            b'5' => DataBits::Five,
            b'6' => DataBits::Six,
            b'7' => DataBits::Seven,
            b'8' => DataBits::Eight,
            _ => return Err(invalid()),
        };
        let parity = match parity.to_ascii_uppercase() {
            b'N' => Parity::None,
            b'E' => Parity::Even,
            b'O' => Parity::Odd,
            _ => return Err(invalid()),
        };
        let stop_bits = match stop {
            b'1' => StopBits::One,
            b'2' => StopBits::Two,
            _ => return Err(invalid()),
        };

        Ok(Self {
            data_bits,
            parity,
            stop_bits,
        })
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bits = match self.data_bits {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        };
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        };
        let stop = match self.stop_bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        };
        write!(f, "{bits}{parity}{stop}")
    }
}

/// Parse a flow control name: `none`, `software` (`xonxoff`) or `hardware`
/// (`rtscts`).
pub fn parse_flow_control(s: &str) -> Result<FlowControl> {
    match s.to_ascii_lowercase().as_str() {
        "none" => Ok(FlowControl::None),
        "software" | "xonxoff" => Ok(FlowControl::Software),
        "hardware" | "rtscts" => Ok(FlowControl::Hardware),
        _ => Err(Error::Unsupported(format!("flow control {s:?}"))),
    }
}

/// List the names of serial ports present on this machine.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| Error::Transport(format!("failed to enumerate serial ports: {}", e)))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// Serial port transport for the plotter controller.
pub struct SerialTransport {
    /// The async stream carrying command and reply bytes.
    stream: SerialStream,
    /// Port name for logging/debugging
    port_name: String,
}

impl SerialTransport {
    /// Open a serial port with the given baud rate and default settings
    /// (8N1, no flow control).
    pub async fn open(port: &str, baud_rate: u32) -> Result<Self> {
        let config = SerialConfig {
            baud_rate,
            ..Default::default()
        };
        Self::open_with_config(port, config).await
    }

    /// Open a serial port with full configuration control.
    pub async fn open_with_config(port: &str, config: SerialConfig) -> Result<Self> {
        tracing::debug!(
            port = %port,
            baud_rate = config.baud_rate,
            framing = %config.framing,
            flow_control = ?config.flow_control,
            "Opening serial port"
        );

        let mut stream = tokio_serial::new(port, config.baud_rate)
            .data_bits(config.framing.data_bits)
            .stop_bits(config.framing.stop_bits)
            .parity(config.framing.parity)
            .flow_control(config.flow_control)
            .open_native_async()
            .map_err(|e| {
                tracing::error!(port = %port, error = %e, "Failed to open serial port");
                Error::Transport(format!("Failed to open serial port {}: {}", port, e))
            })?;

        // DTR drives the controller's reset line; leave it released until a
        // reset is requested.
        if let Err(e) = stream.write_data_terminal_ready(false) {
            tracing::warn!(port = %port, error = %e, "Failed to de-assert DTR");
        }
        if let Err(e) = stream.write_request_to_send(false) {
            tracing::warn!(port = %port, error = %e, "Failed to de-assert RTS");
        }

        tracing::info!(port = %port, baud_rate = config.baud_rate, "Serial port opened successfully");

        Ok(Self {
            stream,
            port_name: port.to_string(),
        })
    }

    /// Get the name of the serial port.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl Transport for SerialTransport {
    fn name(&self) -> &str {
        &self.port_name
    }

    fn split(self: Box<Self>) -> (Box<dyn LineReader>, Box<dyn LineWriter>) {
        let SerialTransport { stream, port_name } = *self;
        let shared = SharedPort(Arc::new(Mutex::new(stream)));
        let reader = LineFramedReader::new(shared.clone(), port_name.clone());
        let writer = SerialWriter {
            lines: LineFramedWriter::new(shared.clone(), port_name),
            control: Some(shared),
        };
        (Box::new(reader), Box::new(writer))
    }
}

/// A serial stream shared between the reader and writer halves.
///
/// The lock is taken inside each poll and released before returning, never
/// across an await point.
#[derive(Clone)]
struct SharedPort(Arc<Mutex<SerialStream>>);

impl AsyncRead for SharedPort {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut stream = self.0.lock();
        Pin::new(&mut *stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for SharedPort {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut stream = self.0.lock();
        Pin::new(&mut *stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut stream = self.0.lock();
        Pin::new(&mut *stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut stream = self.0.lock();
        Pin::new(&mut *stream).poll_shutdown(cx)
    }
}

/// Write half of a split [`SerialTransport`].
struct SerialWriter {
    lines: LineFramedWriter<SharedPort>,
    control: Option<SharedPort>,
}

#[async_trait]
impl LineWriter for SerialWriter {
    async fn write_line(&mut self, line: &str) -> Result<()> {
        self.lines.write_framed(line).await
    }

    async fn set_control_signal(&mut self, asserted: bool) -> Result<()> {
        let control = self.control.as_ref().ok_or(Error::NotConnected)?;
        control.0.lock().write_data_terminal_ready(asserted).map_err(|e| {
            tracing::error!(
                port = %self.lines.label(),
                error = %e,
                asserted,
                "Failed to set DTR"
            );
            Error::Transport(format!("failed to set DTR: {}", e))
        })?;
        tracing::trace!(port = %self.lines.label(), asserted, "DTR updated");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        // The device closes once the reader half is dropped as well.
        self.control = None;
        self.lines.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_config_default_matches_controller() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.framing.to_string(), "8N1");
        assert_eq!(config.flow_control, FlowControl::None);
    }

    #[test]
    fn framing_parses_common_settings() {
        let framing: Framing = "7e2".parse().unwrap();
        assert_eq!(framing.data_bits, DataBits::Seven);
        assert_eq!(framing.parity, Parity::Even);
        assert_eq!(framing.stop_bits, StopBits::Two);
        assert_eq!(framing.to_string(), "7E2");

        assert_eq!("8N1".parse::<Framing>().unwrap(), Framing::default());
    }

    #[test]
    fn framing_rejects_nonsense() {
        for bad in ["", "8N", "9N1", "8X1", "8N3", "8N1 "] {
            assert!(
                matches!(bad.parse::<Framing>(), Err(Error::Unsupported(_))),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn flow_control_names() {
        assert_eq!(parse_flow_control("none").unwrap(), FlowControl::None);
        assert_eq!(parse_flow_control("RTSCTS").unwrap(), FlowControl::Hardware);
        assert_eq!(parse_flow_control("xonxoff").unwrap(), FlowControl::Software);
        assert!(parse_flow_control("dtrdsr").is_err());
    }

    #[tokio::test]
    async fn open_missing_port_is_transport_error() {
        let result = SerialTransport::open("/dev/whiteboard-does-not-exist", 9600).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
