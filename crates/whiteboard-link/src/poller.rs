//! Background position polling.
//!
//! [`PositionPoller`] periodically runs a silent position query on a shared
//! [`CommandChannel`] and publishes the result on a `watch` channel, so a
//! display can always show the latest known position without sending
//! anything itself. Each poll takes the exchange lock like any other caller,
//! so polls slot in between playback lines instead of interleaving with them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use whiteboard_core::error::Error;
use whiteboard_core::types::Position;

use crate::channel::CommandChannel;

/// Handle to a running poll task.
///
/// The published value is `None` until the first successful poll and again
/// whenever the connection is gone. A malformed reply leaves the previous
/// value in place.
pub struct PositionPoller {
    rx: watch::Receiver<Option<Position>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PositionPoller {
    /// Start polling `channel` every `interval`. The first poll runs
    /// immediately.
    pub fn spawn(channel: Arc<CommandChannel>, interval: Duration) -> Self {
        let (tx, rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(channel, interval, tx, cancel.clone()));
        Self { rx, cancel, task }
    }

    /// A receiver that is notified on every published position.
    pub fn subscribe(&self) -> watch::Receiver<Option<Position>> {
        self.rx.clone()
    }

    pub fn latest(&self) -> Option<Position> {
        *self.rx.borrow()
    }

    /// Cancel the poll task and wait for it to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "position poller ended abnormally");
        }
    }
}

async fn poll_loop(
    channel: Arc<CommandChannel>,
    interval: Duration,
    tx: watch::Sender<Option<Position>>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = channel.query_position() => result,
        };

        match result {
            Ok(position) => {
                tx.send_replace(Some(position));
            }
            Err(Error::MalformedTelemetry(_)) => {
                // Already logged by the channel; keep showing the last value.
            }
            Err(Error::ConnectionLost | Error::NotConnected) => {
                tx.send_if_modified(|current| current.take().is_some());
            }
            Err(e) => warn!(error = %e, "position poll failed"),
        }
    }

    debug!("position poller stopped");
}
