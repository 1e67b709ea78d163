//! Stream a G-code program through a [`CommandChannel`].

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use whiteboard_core::error::Result;

use crate::channel::CommandChannel;

/// Counters for one playback run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackSummary {
    /// Lines read from the source.
    pub lines_read: usize,
    /// Lines that produced a command and were acknowledged.
    pub commands_sent: usize,
    /// Lines that sanitized to nothing (blank, comment-only, no-op).
    pub lines_skipped: usize,
}

/// Send every line of `source`, one exchange per line.
///
/// The channel is locked per line, not for the whole program, so a position
/// poll can run between two moves. Lines are read lazily. Playback stops at
/// the first error, or returns early with the counts so far when `cancel`
/// fires.
pub async fn play<R>(
    channel: &CommandChannel,
    source: R,
    cancel: &CancellationToken,
) -> Result<PlaybackSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = PlaybackSummary::default();
    let mut lines = source.lines();

    loop {
        let line = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                info!(?summary, "playback cancelled");
                return Ok(summary);
            }

            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        summary.lines_read += 1;

        let sent = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                info!(?summary, "playback cancelled");
                return Ok(summary);
            }

            sent = channel.send(&line) => sent?,
        };
        match sent {
            Some(_) => summary.commands_sent += 1,
            None => {
                debug!(line_no = summary.lines_read, "line skipped");
                summary.lines_skipped += 1;
            }
        }
    }

    info!(
        lines_read = summary.lines_read,
        commands_sent = summary.commands_sent,
        lines_skipped = summary.lines_skipped,
        "playback finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelBuilder;
    use whiteboard_core::error::Error;
    use whiteboard_test_harness::MockTransport;

    #[tokio::test]
    async fn plays_program_and_counts() {
        let channel = ChannelBuilder::new().build();
        let (transport, controller) = MockTransport::new();
        controller.expect("G28", &["ok"]);
        controller.expect("G1 X10 Y5", &["// moving", "ok"]);
        controller.expect("G0 Z1", &["ok"]);
        channel.connect(Box::new(transport)).await;

        let program = "%\n(drawing)\nG21\nG28\n\nG1 X10 Y5 F1200 ; first stroke\nM3\nG0 Z1\n";
        let cancel = CancellationToken::new();
        let summary = play(&channel, program.as_bytes(), &cancel).await.unwrap();

        assert_eq!(
            summary,
            PlaybackSummary {
                lines_read: 8,
                commands_sent: 3,
                lines_skipped: 5,
            }
        );
        assert_eq!(controller.sent(), vec!["G28", "G1 X10 Y5", "G0 Z1"]);
    }

    #[tokio::test]
    async fn stops_at_first_error() {
        let channel = ChannelBuilder::new().build();
        let (transport, controller) = MockTransport::new();
        controller.expect("G1 X1", &["ok"]);
        controller.expect("G1 X9", &["ok"]);
        channel.connect(Box::new(transport)).await;

        let program = "G1 X1\nG1 X2\nG1 X3\n";
        let cancel = CancellationToken::new();
        let result = play(&channel, program.as_bytes(), &cancel).await;

        // The second line does not match the script.
        assert!(matches!(result, Err(Error::Protocol(_))));
        assert_eq!(controller.sent(), vec!["G1 X1", "G1 X2"]);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let channel = ChannelBuilder::new().build();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = play(&channel, "G1 X1\n".as_bytes(), &cancel).await.unwrap();
        assert_eq!(summary, PlaybackSummary::default());
    }
}
