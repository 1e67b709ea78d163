//! whiteboard-core: Core traits, types, and error definitions for the CNC
//! whiteboard command channel.
//!
//! This crate defines the abstractions shared by the transports, the command
//! channel and the test harness, without pulling in any serial or network
//! dependency.
//!
//! # Key types
//!
//! - [`Transport`] / [`LineReader`] / [`LineWriter`] -- line-framed link to the controller
//! - [`TrafficSink`] -- observer of every line on the wire
//! - [`Position`] -- decoded machine position
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod traffic;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use traffic::{NullSink, TracingSink, TrafficSink};
pub use transport::{LineReader, LineWriter, Transport};
pub use types::Position;
