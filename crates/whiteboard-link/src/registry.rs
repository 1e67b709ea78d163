//! FIFO registry of requests waiting for a controller reply.
//!
//! The controller answers commands strictly in order, so replies are matched
//! to requests by position alone: the oldest outstanding request receives the
//! next resolving line. A request is registered *before* its bytes are
//! written, so a fast reply can never arrive ahead of its entry.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use whiteboard_core::error::{Error, Result};

/// Receives the reply line, or `None` if the connection ended first.
pub type ReplyReceiver = oneshot::Receiver<Option<String>>;

#[derive(Debug)]
struct PendingRequest {
    silent: bool,
    reply: oneshot::Sender<Option<String>>,
}

#[derive(Debug, Default)]
struct Inner {
    queue: VecDeque<PendingRequest>,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct PendingRegistry {
    inner: Mutex<Inner>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request at the tail of the queue.
    ///
    /// Fails with [`Error::ConnectionLost`] once the registry has been
    /// drained by [`fail_all`](Self::fail_all).
    pub fn enqueue(&self, silent: bool) -> Result<ReplyReceiver> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::ConnectionLost);
        }
        inner.queue.push_back(PendingRequest { silent, reply: tx });
        Ok(rx)
    }

    /// Whether the oldest outstanding request is silent. `false` when the
    /// queue is empty.
    pub fn head_is_silent(&self) -> bool {
        self.inner.lock().queue.front().is_some_and(|r| r.silent)
    }

    /// Complete the oldest request with `line`. Returns `false` when nothing
    /// was outstanding.
    ///
    /// A caller that stopped waiting still owns its slot; its reply is
    /// consumed here and discarded so later replies stay aligned.
    pub fn resolve_head(&self, line: &str) -> bool {
        let Some(request) = self.inner.lock().queue.pop_front() else {
            return false;
        };
        let _ = request.reply.send(Some(line.to_string()));
        true
    }

    /// Complete every outstanding request with `None`, oldest first, and
    /// refuse new ones. Returns how many requests were failed.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.queue.drain(..).collect()
        };
        let count = drained.len();
        for request in drained {
            let _ = request.reply.send(None);
        }
        count
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
