//! In-memory transport for deterministic tests of the command channel.
//!
//! [`MockTransport::new`] returns the transport together with a
//! [`MockController`], the far end of the link. The controller pushes lines
//! for the channel to read, observes every line the channel writes, and can
//! break the link the way a real port fails.
//!
//! Two styles of test are supported:
//!
//! - **Manual**: the test awaits [`MockController::next_command`] and answers
//!   with [`MockController::reply`].
//! - **Scripted**: [`MockController::expect`] pre-loads request/reply pairs.
//!   Each write is matched against the next expectation and its replies are
//!   queued for the reader immediately. A write that does not match is
//!   rejected with [`Error::Protocol`].
//!
//! # Example
//!
//! ```
//! use whiteboard_test_harness::MockTransport;
//!
//! let (transport, controller) = MockTransport::new();
//! controller.expect("M118", &["ok X:0.000 Y:0.000 Z:0.000"]);
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use whiteboard_core::error::{Error, Result};
use whiteboard_core::transport::{LineReader, LineWriter, Transport};

/// One event delivered to the reading half.
#[derive(Debug)]
enum MockRead {
    Line(String),
    Error(String),
    Eof,
}

#[derive(Debug)]
struct Expectation {
    request: String,
    replies: Vec<String>,
}

#[derive(Debug, Default)]
struct MockState {
    expectations: VecDeque<Expectation>,
    sent_log: Vec<String>,
    control_signals: Vec<bool>,
    fail_writes: bool,
    fail_control_signals: bool,
    closed: bool,
    close_count: usize,
}

/// A mock [`Transport`] driven by a [`MockController`].
pub struct MockTransport {
    name: String,
    state: Arc<Mutex<MockState>>,
    reads_tx: mpsc::UnboundedSender<MockRead>,
    reads_rx: mpsc::UnboundedReceiver<MockRead>,
    written_tx: mpsc::UnboundedSender<String>,
}

/// The far end of a [`MockTransport`].
pub struct MockController {
    state: Arc<Mutex<MockState>>,
    reads_tx: mpsc::UnboundedSender<MockRead>,
    written_rx: mpsc::UnboundedReceiver<String>,
}

impl MockTransport {
    /// Create a connected transport/controller pair named `"mock"`.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (MockTransport, MockController) {
        Self::named("mock")
    }

    /// Create a pair whose transport reports `name`.
    pub fn named(name: impl Into<String>) -> (MockTransport, MockController) {
        let state = Arc::new(Mutex::new(MockState::default()));
        let (reads_tx, reads_rx) = mpsc::unbounded_channel();
        let (written_tx, written_rx) = mpsc::unbounded_channel();

        let transport = MockTransport {
            name: name.into(),
            state: Arc::clone(&state),
            reads_tx: reads_tx.clone(),
            reads_rx,
            written_tx,
        };
        let controller = MockController {
            state,
            reads_tx,
            written_rx,
        };
        (transport, controller)
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn split(self: Box<Self>) -> (Box<dyn LineReader>, Box<dyn LineWriter>) {
        let MockTransport {
            name,
            state,
            reads_tx,
            reads_rx,
            written_tx,
        } = *self;
        let reader = MockReader { rx: reads_rx };
        let writer = MockWriter {
            name,
            state,
            reads_tx: Some(reads_tx),
            written_tx,
        };
        (Box::new(reader), Box::new(writer))
    }
}

struct MockReader {
    rx: mpsc::UnboundedReceiver<MockRead>,
}

#[async_trait]
impl LineReader for MockReader {
    async fn read_line(&mut self) -> Result<Option<String>> {
        match self.rx.recv().await {
            Some(MockRead::Line(line)) => Ok(Some(line)),
            Some(MockRead::Error(message)) => Err(Error::Transport(message)),
            Some(MockRead::Eof) | None => Ok(None),
        }
    }
}

struct MockWriter {
    name: String,
    state: Arc<Mutex<MockState>>,
    reads_tx: Option<mpsc::UnboundedSender<MockRead>>,
    written_tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl LineWriter for MockWriter {
    async fn write_line(&mut self, line: &str) -> Result<()> {
        let replies = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::NotConnected);
            }
            if state.fail_writes {
                return Err(Error::ConnectionLost);
            }
            state.sent_log.push(line.to_string());

            match state.expectations.pop_front() {
                Some(expectation) if expectation.request != line => {
                    return Err(Error::Protocol(format!(
                        "unexpected command: expected {:?}, got {:?}",
                        expectation.request, line
                    )));
                }
                Some(expectation) => expectation.replies,
                None => Vec::new(),
            }
        };

        tracing::trace!(link = %self.name, line = %line, "mock write");
        let _ = self.written_tx.send(line.to_string());

        if let Some(tx) = &self.reads_tx {
            for reply in replies {
                let _ = tx.send(MockRead::Line(reply));
            }
        }
        Ok(())
    }

    async fn set_control_signal(&mut self, asserted: bool) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::NotConnected);
        }
        if state.fail_control_signals {
            return Err(Error::Transport("control signal rejected".into()));
        }
        state.control_signals.push(asserted);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.close_count += 1;
        }
        tracing::debug!(link = %self.name, "mock transport closed");
        if let Some(tx) = self.reads_tx.take() {
            let _ = tx.send(MockRead::Eof);
        }
        Ok(())
    }
}

impl MockController {
    /// Queue a line for the channel to read.
    pub fn reply(&self, line: impl Into<String>) {
        let _ = self.reads_tx.send(MockRead::Line(line.into()));
    }

    /// Make the next read fail with [`Error::Transport`].
    pub fn fail(&self, message: impl Into<String>) {
        let _ = self.reads_tx.send(MockRead::Error(message.into()));
    }

    /// End the read stream, as if the device was unplugged.
    pub fn hang_up(&self) {
        let _ = self.reads_tx.send(MockRead::Eof);
    }

    /// Make every subsequent write fail with [`Error::ConnectionLost`].
    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Make control-signal changes fail without being recorded.
    pub fn fail_control_signals(&self, fail: bool) {
        self.state.lock().fail_control_signals = fail;
    }

    /// Pre-load a request and the lines to answer it with.
    pub fn expect(&self, request: &str, replies: &[&str]) {
        self.state.lock().expectations.push_back(Expectation {
            request: request.to_string(),
            replies: replies.iter().map(|r| r.to_string()).collect(),
        });
    }

    /// Wait for the next line the channel writes. Returns `None` once the
    /// transport has been dropped.
    pub async fn next_command(&mut self) -> Option<String> {
        self.written_rx.recv().await
    }

    /// Every line written so far, in order.
    pub fn sent(&self) -> Vec<String> {
        self.state.lock().sent_log.clone()
    }

    /// Control-signal levels in the order they were set.
    pub fn control_signals(&self) -> Vec<bool> {
        self.state.lock().control_signals.clone()
    }

    pub fn remaining_expectations(&self) -> usize {
        self.state.lock().expectations.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// How many times the writer was closed. Repeated closes count once.
    pub fn close_count(&self) -> usize {
        self.state.lock().close_count
    }
}
