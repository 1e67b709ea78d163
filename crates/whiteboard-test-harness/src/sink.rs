use std::sync::Arc;

use parking_lot::Mutex;

use whiteboard_core::traffic::TrafficSink;

/// A [`TrafficSink`] that stores every line it is given.
///
/// Clones share the same log, so a test can hand one clone to the channel
/// and keep another for assertions.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every line appended so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl TrafficSink for RecordingSink {
    fn append(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_log() {
        let sink = RecordingSink::new();
        let handle = sink.clone();
        sink.append(">>> G1 X1");
        sink.append("<<< ok");
        assert_eq!(handle.lines(), vec![">>> G1 X1", "<<< ok"]);

        handle.clear();
        assert!(sink.lines().is_empty());
    }
}
