//! whiteboard-link: the serial command channel for the CNC whiteboard.
//!
//! The controller speaks a half-duplex, line-oriented protocol: one G-code
//! line out, debug chatter and a single `ok` (or `rs`) back. This crate turns
//! that into an async request/response API that several tasks can share
//! without ever interleaving on the wire.
//!
//! - [`protocol`]: sanitizing outgoing lines, classifying incoming ones,
//!   decoding the position reply
//! - [`registry`]: the FIFO of requests waiting for a reply
//! - [`reader`]: the task that owns the read half and resolves requests
//! - [`channel`]: [`CommandChannel`], the facade callers use
//! - [`playback`]: streaming a G-code file through the channel
//! - [`poller`]: periodic silent position queries

pub mod channel;
pub mod playback;
pub mod poller;
pub mod protocol;
pub mod reader;
pub mod registry;

pub use channel::{ChannelBuilder, ChannelOptions, CommandChannel};
pub use playback::{PlaybackSummary, play};
pub use poller::PositionPoller;
pub use protocol::{ReplyKind, classify, decode_position, sanitize};
