//! The reader task: sole consumer of a connection's read half.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use whiteboard_core::traffic::{self, TrafficSink};
use whiteboard_core::transport::LineReader;

use crate::protocol::{ReplyKind, classify};
use crate::registry::PendingRegistry;

/// Read lines until the stream ends, fails, or `cancel` fires, then fail
/// every request still waiting.
///
/// Each line is echoed to `sink` unless the request at the head of the queue
/// is silent. The echo happens before the request is resolved, so a caller
/// that observes its reply also finds the reply in the traffic log.
pub async fn reader_loop(
    mut reader: Box<dyn LineReader>,
    registry: Arc<PendingRegistry>,
    sink: Arc<dyn TrafficSink>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("reader task cancelled");
                break;
            }

            next = reader.read_line() => next,
        };

        match next {
            Ok(Some(line)) => handle_line(&line, &registry, sink.as_ref()),
            Ok(None) => {
                info!("controller closed the connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "read failed, stopping reader");
                break;
            }
        }
    }

    let failed = registry.fail_all();
    if failed > 0 {
        debug!(failed, "pending requests failed at end of stream");
    }
}

fn handle_line(line: &str, registry: &PendingRegistry, sink: &dyn TrafficSink) {
    if !registry.head_is_silent() {
        sink.append(&traffic::inbound(line));
    }

    let kind = classify(line);
    match kind {
        ReplyKind::Debug => trace!(line, "controller debug output"),
        ReplyKind::Other => debug!(line, "unrecognized controller line"),
        ReplyKind::Terminal | ReplyKind::Resend => {
            if !registry.resolve_head(line) {
                debug!(line, ?kind, "reply with no outstanding request");
            }
        }
    }
}
