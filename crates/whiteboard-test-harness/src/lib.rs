//! whiteboard-test-harness: test utilities for the whiteboard command
//! channel.
//!
//! - [`MockTransport`] / [`MockController`]: an in-memory transport whose far
//!   end is driven by the test, either line by line or from scripted
//!   request/reply expectations
//! - [`RecordingSink`]: a traffic sink that keeps every line for assertions
//! - [`SimulatedPlotter`]: a tiny controller emulation answering on a
//!   [`MockController`], used by hardware-free runs of the CLI

pub mod mock_transport;
pub mod simulator;
pub mod sink;

pub use mock_transport::{MockController, MockTransport};
pub use simulator::SimulatedPlotter;
pub use sink::RecordingSink;
