//! The command channel: the single entry point for talking to the controller.
//!
//! [`CommandChannel`] owns the connected transport, runs the reader task, and
//! serializes every exchange behind one async lock. A caller holding the lock
//! registers its request, writes the command, and waits for the reader task
//! to hand back the matching reply. Exactly one exchange is in flight at a
//! time, so interactive commands, file playback and the position poll never
//! interleave on the wire.
//!
//! # Example
//!
//! ```no_run
//! use whiteboard_link::ChannelBuilder;
//! use whiteboard_transport::SerialTransport;
//!
//! # async fn example() -> whiteboard_core::Result<()> {
//! let channel = ChannelBuilder::new().build();
//! channel
//!     .connect(Box::new(SerialTransport::open("/dev/ttyUSB0", 9600).await?))
//!     .await;
//!
//! channel.send("G1 X10 Y10 F1500").await?;
//! let position = channel.query_position().await?;
//! println!("{position}");
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use whiteboard_core::error::{Error, Result};
use whiteboard_core::traffic::{self, NullSink, TrafficSink};
use whiteboard_core::transport::{LineWriter, Transport};
use whiteboard_core::types::Position;

use crate::protocol::{POSITION_QUERY, ReplyKind, classify, decode_position, sanitize};
use crate::reader::reader_loop;
use crate::registry::PendingRegistry;

/// Tunables for a [`CommandChannel`].
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// How long to wait for a reply before giving up with
    /// [`Error::Timeout`]. A timeout drops the connection; later calls fail
    /// with [`Error::ConnectionLost`] until the next `connect`. `None` waits
    /// until the connection ends.
    pub command_timeout: Option<Duration>,
    /// How many times a command may be retransmitted after `rs` before
    /// [`Error::ResendLimit`] is returned. `None` retransmits indefinitely.
    pub max_resends: Option<u32>,
    /// How long the reset line is held asserted.
    pub reset_pulse: Duration,
    /// Command sent by [`CommandChannel::query_position`].
    pub position_query: String,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            command_timeout: None,
            max_resends: None,
            reset_pulse: Duration::from_millis(30),
            position_query: POSITION_QUERY.to_string(),
        }
    }
}

/// Fluent builder for [`CommandChannel`].
pub struct ChannelBuilder {
    options: ChannelOptions,
    sink: Arc<dyn TrafficSink>,
}

impl ChannelBuilder {
    /// Start from the default options with traffic discarded.
    pub fn new() -> Self {
        Self {
            options: ChannelOptions::default(),
            sink: Arc::new(NullSink),
        }
    }

    /// Give up on a reply after `timeout` (default: wait forever).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.options.command_timeout = Some(timeout);
        self
    }

    /// Cap the number of retransmissions per command (default: unbounded).
    pub fn max_resends(mut self, n: u32) -> Self {
        self.options.max_resends = Some(n);
        self
    }

    /// Set how long the reset line is held (default: 30ms).
    pub fn reset_pulse(mut self, pulse: Duration) -> Self {
        self.options.reset_pulse = pulse;
        self
    }

    /// Override the position query command (default: `M118`).
    pub fn position_query(mut self, command: &str) -> Self {
        self.options.position_query = command.to_string();
        self
    }

    /// Receive every line of non-silent traffic.
    pub fn sink(mut self, sink: impl TrafficSink) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Share an existing sink.
    pub fn shared_sink(mut self, sink: Arc<dyn TrafficSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn options(mut self, options: ChannelOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> CommandChannel {
        CommandChannel::new(self.options, self.sink)
    }
}

impl Default for ChannelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A connected transport and its reader task.
struct Link {
    name: String,
    writer: Box<dyn LineWriter>,
    registry: Arc<PendingRegistry>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    /// Set while the reset line may still be asserted.
    reset_asserted: bool,
}

impl Link {
    /// Stop the reader, fail whatever is still pending, then close the
    /// transport. The order matters: no request may outlive its transport.
    async fn teardown(mut self) {
        self.cancel.cancel();
        if let Err(e) = (&mut self.task).await {
            warn!(transport = %self.name, error = %e, "reader task ended abnormally");
        }
        self.registry.fail_all();
        self.release_reset_line().await;
        if let Err(e) = self.writer.close().await {
            warn!(transport = %self.name, error = %e, "error closing transport");
        }
        info!(transport = %self.name, "disconnected");
    }

    /// De-assert the reset line if an earlier pulse did not finish.
    async fn release_reset_line(&mut self) {
        if !self.reset_asserted {
            return;
        }
        match self.writer.set_control_signal(false).await {
            Ok(()) => {
                debug!(transport = %self.name, "reset line released");
                self.reset_asserted = false;
            }
            Err(e) => warn!(transport = %self.name, error = %e, "could not release reset line"),
        }
    }
}

/// What can be inspected about the current link without the exchange lock.
struct LinkStatus {
    name: String,
    cancel: CancellationToken,
    registry: Arc<PendingRegistry>,
}

/// Serialized command/reply access to one controller.
///
/// All methods take `&self`; share the channel between tasks with an `Arc`.
pub struct CommandChannel {
    options: ChannelOptions,
    sink: Arc<dyn TrafficSink>,
    /// Exchange lock. Held across the whole write-and-wait of an exchange.
    link: tokio::sync::Mutex<Option<Link>>,
    status: parking_lot::Mutex<Option<LinkStatus>>,
}

impl CommandChannel {
    pub fn new(options: ChannelOptions, sink: Arc<dyn TrafficSink>) -> Self {
        Self {
            options,
            sink,
            link: tokio::sync::Mutex::new(None),
            status: parking_lot::Mutex::new(None),
        }
    }

    pub fn builder() -> ChannelBuilder {
        ChannelBuilder::new()
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    /// Take ownership of `transport` and start reading from it.
    ///
    /// Any previous connection is torn down first: its reader is stopped,
    /// its pending requests fail with [`Error::ConnectionLost`], and its
    /// transport is closed.
    pub async fn connect(&self, transport: Box<dyn Transport>) {
        self.interrupt();
        let mut guard = self.link.lock().await;
        if let Some(old) = guard.take() {
            old.teardown().await;
        }

        let name = transport.name().to_string();
        let (reader, writer) = transport.split();
        let registry = Arc::new(PendingRegistry::new());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(reader_loop(
            reader,
            Arc::clone(&registry),
            Arc::clone(&self.sink),
            cancel.clone(),
        ));

        *self.status.lock() = Some(LinkStatus {
            name: name.clone(),
            cancel: cancel.clone(),
            registry: Arc::clone(&registry),
        });
        info!(transport = %name, "connected");
        *guard = Some(Link {
            name,
            writer,
            registry,
            cancel,
            task,
            reset_asserted: false,
        });
    }

    /// Tear down the current connection, if any.
    pub async fn disconnect(&self) {
        self.interrupt();
        let mut guard = self.link.lock().await;
        if let Some(link) = guard.take() {
            link.teardown().await;
        }
        *self.status.lock() = None;
    }

    /// `true` while a transport is attached and its stream has not ended.
    pub fn is_connected(&self) -> bool {
        self.status
            .lock()
            .as_ref()
            .is_some_and(|s| !s.registry.is_closed() && !s.cancel.is_cancelled())
    }

    /// Name of the attached transport (port or address).
    pub fn transport_name(&self) -> Option<String> {
        self.status.lock().as_ref().map(|s| s.name.clone())
    }

    /// Sanitize `raw` and send it, waiting for the controller's reply.
    ///
    /// Returns `Ok(None)` without touching the transport when nothing is left
    /// after sanitizing, otherwise the terminal reply line. `rs` replies are
    /// answered by retransmitting the same command.
    pub async fn send(&self, raw: &str) -> Result<Option<String>> {
        let command = sanitize(raw);
        if command.is_empty() {
            debug!(raw, "nothing to send after sanitizing");
            return Ok(None);
        }

        let mut guard = self.link.lock().await;
        let link = guard.as_mut().ok_or(Error::NotConnected)?;
        let reply = self.transact(link, &command, false).await?;
        Ok(Some(reply))
    }

    /// Ask the controller for its position.
    ///
    /// The exchange is silent: neither the query nor its reply reach the
    /// traffic sink.
    pub async fn query_position(&self) -> Result<Position> {
        let mut guard = self.link.lock().await;
        let link = guard.as_mut().ok_or(Error::NotConnected)?;
        let reply = self
            .transact(link, &self.options.position_query, true)
            .await?;
        drop(guard);

        decode_position(&reply).inspect_err(|e| {
            warn!(reply = %reply, error = %e, "malformed position reply");
        })
    }

    /// Pulse the controller's reset line.
    ///
    /// If the pulse is cut short, because this future is dropped or the line
    /// cannot be de-asserted, the line is released by the next exchange or
    /// by teardown.
    pub async fn reset(&self) -> Result<()> {
        let mut guard = self.link.lock().await;
        let link = guard.as_mut().ok_or(Error::NotConnected)?;

        link.reset_asserted = true;
        if let Err(e) = link.writer.set_control_signal(true).await {
            link.reset_asserted = false;
            return Err(e);
        }
        tokio::time::sleep(self.options.reset_pulse).await;
        link.writer.set_control_signal(false).await?;
        link.reset_asserted = false;

        info!(
            transport = %link.name,
            pulse_ms = self.options.reset_pulse.as_millis(),
            "controller reset"
        );
        Ok(())
    }

    /// One command, including any retransmissions the controller asks for.
    async fn transact(&self, link: &mut Link, command: &str, silent: bool) -> Result<String> {
        // A dropped link stays attached until the next connect; refuse it
        // before anything reaches the wire or the traffic log.
        if link.cancel.is_cancelled() {
            return Err(Error::ConnectionLost);
        }
        link.release_reset_line().await;
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            if !silent {
                self.sink.append(&traffic::outbound(command));
            }

            let reply = self.exchange(link, command, silent).await?;
            if classify(&reply) != ReplyKind::Resend {
                return Ok(reply);
            }

            if let Some(max) = self.options.max_resends {
                if attempts > max {
                    warn!(command, attempts, "controller keeps requesting resend");
                    return Err(Error::ResendLimit {
                        command: command.to_string(),
                        attempts,
                    });
                }
            }
            debug!(command, attempts, "resend requested");
        }
    }

    /// Register, write, and wait for one reply line.
    async fn exchange(&self, link: &mut Link, command: &str, silent: bool) -> Result<String> {
        let reply = link.registry.enqueue(silent)?;

        if let Err(e) = link.writer.write_line(command).await {
            // The request just queued would swallow the next reply meant for
            // someone else; the link cannot be trusted anymore.
            warn!(transport = %link.name, error = %e, "write failed, dropping connection");
            link.cancel.cancel();
            return Err(e);
        }

        let reply = match self.options.command_timeout {
            Some(limit) => match tokio::time::timeout(limit, reply).await {
                Ok(reply) => reply,
                Err(_) => {
                    // Whether the reply is late or lost is unknowable, so the
                    // queue can no longer be matched against the stream.
                    warn!(
                        transport = %link.name,
                        command,
                        timeout_ms = limit.as_millis(),
                        "no reply from controller, dropping connection"
                    );
                    link.cancel.cancel();
                    return Err(Error::Timeout);
                }
            },
            None => reply.await,
        };

        match reply {
            Ok(Some(line)) => Ok(line),
            Ok(None) | Err(_) => Err(Error::ConnectionLost),
        }
    }

    /// Stop the current reader so a caller blocked on a reply is released
    /// before the exchange lock is needed.
    fn interrupt(&self) {
        if let Some(status) = self.status.lock().as_ref() {
            status.cancel.cancel();
        }
    }
}

impl Drop for CommandChannel {
    fn drop(&mut self) {
        self.interrupt();
    }
}
