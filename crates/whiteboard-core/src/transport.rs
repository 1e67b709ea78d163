//! Transport traits for talking to the plotter controller.
//!
//! A [`Transport`] is an opened, line-framed duplex connection. Before use it
//! is [split](Transport::split) into a [`LineReader`], owned exclusively by the
//! channel's reader task, and a [`LineWriter`], used by callers under the
//! channel's exchange lock. Implementations exist for serial ports and TCP
//! bridges in `whiteboard-transport`, and for tests in
//! `whiteboard-test-harness`.

use async_trait::async_trait;

use crate::error::Result;

/// The receive half of a line-framed transport.
#[async_trait]
pub trait LineReader: Send {
    /// Read the next line, without its `\n` (or `\r\n`) terminator.
    ///
    /// Returns `Ok(None)` once the stream has ended. Any error is treated by
    /// the caller as the end of the connection.
    async fn read_line(&mut self) -> Result<Option<String>>;
}

/// The transmit half of a line-framed transport.
#[async_trait]
pub trait LineWriter: Send {
    /// Write `line` followed by a single `\n` and flush it.
    ///
    /// The controller firmware is sensitive to line terminators, so
    /// implementations must never emit `\r\n`.
    async fn write_line(&mut self, line: &str) -> Result<()>;

    /// Assert or de-assert the hardware control signal (DTR on serial ports)
    /// wired to the controller's reset input.
    async fn set_control_signal(&mut self, asserted: bool) -> Result<()>;

    /// Close the connection. Calling `close` more than once is harmless.
    async fn close(&mut self) -> Result<()>;
}

/// An opened connection to a plotter controller.
pub trait Transport: Send {
    /// Human-readable name of the connection (port path or address).
    fn name(&self) -> &str;

    /// Consume the transport and return its independent read and write halves.
    fn split(self: Box<Self>) -> (Box<dyn LineReader>, Box<dyn LineWriter>);
}
