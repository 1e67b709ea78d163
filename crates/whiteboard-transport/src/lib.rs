//! Transport implementations for the whiteboard command channel.
//!
//! Concrete [`Transport`](whiteboard_core::Transport) implementations:
//!
//! - [`SerialTransport`]: USB virtual COM ports and RS-232, with DTR wired to
//!   the controller's reset input
//! - [`TcpTransport`]: serial-over-network bridges
//!
//! Both are built on [`LineFramedReader`] / [`LineFramedWriter`], which can
//! also wrap any other tokio byte stream.
//!
//! # Example
//!
//! ```no_run
//! use whiteboard_core::Transport;
//! use whiteboard_transport::SerialTransport;
//!
//! # async fn example() -> whiteboard_core::Result<()> {
//! let transport = Box::new(SerialTransport::open("/dev/ttyUSB0", 9600).await?);
//! let (mut reader, mut writer) = transport.split();
//! writer.write_line("M118").await?;
//! let reply = reader.read_line().await?;
//! # Ok(())
//! # }
//! ```

pub mod serial;
pub mod stream;
pub mod tcp;

pub use serial::{Framing, SerialConfig, SerialTransport, list_ports, parse_flow_control};
pub use tokio_serial::{DataBits, FlowControl, Parity, StopBits};
pub use stream::{LineFramedReader, LineFramedWriter};
pub use tcp::TcpTransport;
