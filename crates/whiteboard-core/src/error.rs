//! Error types for the whiteboard command channel.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport failures, lost connections and
//! undecodable controller replies are all captured here.

/// The error type for all whiteboard operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (serial port could not be opened, write failed).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (unexpected traffic, scripted mock mismatch).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for the controller to reply.
    ///
    /// Only produced when a command timeout has been configured; by default
    /// the channel waits for a reply until the connection goes away.
    #[error("timeout waiting for response")]
    Timeout,

    /// The transport does not support the requested operation (for example
    /// toggling a control line on a TCP bridge).
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// No transport has been connected to the channel.
    #[error("not connected")]
    NotConnected,

    /// The connection died while a request was outstanding, or a previous
    /// exchange already observed the stream ending.
    #[error("connection lost")]
    ConnectionLost,

    /// A position reply arrived but could not be decoded.
    #[error("malformed telemetry: {0}")]
    MalformedTelemetry(String),

    /// The controller kept answering `rs` past the configured resend limit.
    #[error("command {command:?} still refused after {attempts} attempts")]
    ResendLimit {
        /// The sanitized command that kept being refused.
        command: String,
        /// Total transmissions made, including the first.
        attempts: u32,
    },

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
