//! Traffic sinks: observers of every line exchanged with the controller.
//!
//! The channel appends `">>> "`-prefixed lines for commands it transmits and
//! `"<<< "`-prefixed lines for replies it reads, in wire order. Lines that
//! belong to a silent exchange (the background position poll) never reach
//! the sink.

use tokio::sync::mpsc;

/// Prefix for lines written to the controller.
pub const OUTBOUND_PREFIX: &str = ">>> ";

/// Prefix for lines read from the controller.
pub const INBOUND_PREFIX: &str = "<<< ";

/// Receiver of human-readable traffic lines.
///
/// `append` is called from the reader task and from caller tasks, so it must
/// be cheap and must not block on the channel itself.
pub trait TrafficSink: Send + Sync + 'static {
    fn append(&self, line: &str);
}

/// Format a transmitted command for the traffic log.
pub fn outbound(command: &str) -> String {
    format!("{OUTBOUND_PREFIX}{command}")
}

/// Format a received line for the traffic log.
pub fn inbound(line: &str) -> String {
    format!("{INBOUND_PREFIX}{line}")
}

/// Sink that discards everything.
pub struct NullSink;

impl TrafficSink for NullSink {
    fn append(&self, _line: &str) {}
}

/// Sink that forwards traffic to `tracing` at info level under the
/// `whiteboard::traffic` target.
pub struct TracingSink;

impl TrafficSink for TracingSink {
    fn append(&self, line: &str) {
        tracing::info!(target: "whiteboard::traffic", "{line}");
    }
}

/// Forward traffic to an unbounded channel, e.g. for a UI or console printer.
///
/// Lines are dropped once the receiver is gone.
impl TrafficSink for mpsc::UnboundedSender<String> {
    fn append(&self, line: &str) {
        let _ = self.send(line.to_string());
    }
}
