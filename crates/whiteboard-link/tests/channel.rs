use std::sync::Arc;
use std::time::Duration;

use whiteboard_core::Error;
use whiteboard_link::{ChannelBuilder, CommandChannel};
use whiteboard_test_harness::{MockController, MockTransport, RecordingSink};

async fn connected(builder: ChannelBuilder) -> (Arc<CommandChannel>, MockController) {
    let channel = Arc::new(builder.build());
    let (transport, controller) = MockTransport::new();
    channel.connect(Box::new(transport)).await;
    (channel, controller)
}

fn spawn_send(
    channel: &Arc<CommandChannel>,
    raw: &str,
) -> tokio::task::JoinHandle<whiteboard_core::Result<Option<String>>> {
    let channel = Arc::clone(channel);
    let raw = raw.to_string();
    tokio::spawn(async move { channel.send(&raw).await })
}

#[tokio::test]
async fn send_waits_past_debug_lines() {
    let sink = RecordingSink::new();
    let (channel, mut controller) = connected(ChannelBuilder::new().sink(sink.clone())).await;

    let pending = spawn_send(&channel, "G1 X10");
    assert_eq!(controller.next_command().await.as_deref(), Some("G1 X10"));
    controller.reply("// planning");
    controller.reply("ok");

    assert_eq!(pending.await.unwrap().unwrap().as_deref(), Some("ok"));
    assert_eq!(
        sink.lines(),
        vec![">>> G1 X10", "<<< // planning", "<<< ok"]
    );
}

#[tokio::test]
async fn command_is_sanitized_before_sending() {
    let (channel, controller) = connected(ChannelBuilder::new()).await;
    controller.expect("G1 X10", &["ok"]);

    let reply = channel.send("G1 X10 F500 ; comment").await.unwrap();
    assert_eq!(reply.as_deref(), Some("ok"));
    assert_eq!(controller.sent(), vec!["G1 X10"]);
}

#[tokio::test]
async fn no_op_lines_never_reach_the_wire() {
    let sink = RecordingSink::new();
    let (channel, controller) = connected(ChannelBuilder::new().sink(sink.clone())).await;

    for raw in ["", "   ", "(only a comment)", "; note", "%", "G21", "M3 F1000"] {
        assert_eq!(channel.send(raw).await.unwrap(), None, "{raw:?}");
    }
    assert!(controller.sent().is_empty());
    assert!(sink.lines().is_empty());
}

#[tokio::test]
async fn resend_retransmits_same_command() {
    let sink = RecordingSink::new();
    let (channel, controller) = connected(ChannelBuilder::new().sink(sink.clone())).await;
    controller.expect("G1 X1", &["rs"]);
    controller.expect("G1 X1", &["// again", "ok"]);

    let reply = channel.send("G1 X1 F300").await.unwrap();
    assert_eq!(reply.as_deref(), Some("ok"));
    assert_eq!(controller.sent(), vec!["G1 X1", "G1 X1"]);
    assert_eq!(
        sink.lines(),
        vec![">>> G1 X1", "<<< rs", ">>> G1 X1", "<<< // again", "<<< ok"]
    );
}

#[tokio::test]
async fn resend_limit_is_enforced_when_configured() {
    let (channel, controller) = connected(ChannelBuilder::new().max_resends(1)).await;
    controller.expect("G1 X1", &["rs"]);
    controller.expect("G1 X1", &["rs"]);

    match channel.send("G1 X1").await {
        Err(Error::ResendLimit { command, attempts }) => {
            assert_eq!(command, "G1 X1");
            assert_eq!(attempts, 2);
        }
        other => panic!("expected ResendLimit, got {other:?}"),
    }
    assert_eq!(controller.sent().len(), 2);
}

#[tokio::test]
async fn position_query_is_silent() {
    let sink = RecordingSink::new();
    let (channel, controller) = connected(ChannelBuilder::new().sink(sink.clone())).await;
    controller.expect("G0 X1", &["ok"]);
    controller.expect("M118", &["// pos", "ok X:1.5 Y:-2.000 Z:nan"]);
    controller.expect("G0 X2", &["ok"]);

    channel.send("G0 X1").await.unwrap();
    let position = channel.query_position().await.unwrap();
    channel.send("G0 X2").await.unwrap();

    assert_eq!(position.x, 1.5);
    assert_eq!(position.y, -2.0);
    assert!(position.z.is_nan());
    assert_eq!(
        sink.lines(),
        vec![">>> G0 X1", "<<< ok", ">>> G0 X2", "<<< ok"]
    );
}

#[tokio::test]
async fn position_query_resends_too() {
    let (channel, controller) = connected(ChannelBuilder::new()).await;
    controller.expect("M118", &["rs"]);
    controller.expect("M118", &["ok X:0 Y:0 Z:0"]);

    let position = channel.query_position().await.unwrap();
    assert!(position.is_known());
    assert_eq!(controller.sent(), vec!["M118", "M118"]);
}

#[tokio::test]
async fn malformed_position_leaves_channel_usable() {
    let (channel, controller) = connected(ChannelBuilder::new()).await;
    controller.expect("M118", &["ok X:abc Y:0 Z:0"]);
    controller.expect("G1 X1", &["ok"]);

    assert!(matches!(
        channel.query_position().await,
        Err(Error::MalformedTelemetry(_))
    ));
    assert_eq!(channel.send("G1 X1").await.unwrap().as_deref(), Some("ok"));
}

#[tokio::test]
async fn concurrent_callers_never_interleave() {
    let (channel, mut controller) = connected(ChannelBuilder::new()).await;

    let a = spawn_send(&channel, "G1 X1");
    let b = spawn_send(&channel, "G1 X2");

    let first = controller.next_command().await.unwrap();
    // The second command must wait for the first reply.
    let early = tokio::time::timeout(Duration::from_millis(50), controller.next_command()).await;
    assert!(early.is_err(), "second command sent before first reply");

    controller.reply(format!("ok {first}"));
    let second = controller.next_command().await.unwrap();
    assert_ne!(first, second);
    controller.reply(format!("ok {second}"));

    let a = a.await.unwrap().unwrap().unwrap();
    let b = b.await.unwrap().unwrap().unwrap();
    assert_eq!(a, "ok G1 X1");
    assert_eq!(b, "ok G1 X2");
}

#[tokio::test]
async fn hang_up_mid_exchange_is_connection_lost() {
    let (channel, mut controller) = connected(ChannelBuilder::new()).await;

    let pending = spawn_send(&channel, "G1 X1");
    controller.next_command().await.unwrap();
    controller.hang_up();

    assert!(matches!(pending.await.unwrap(), Err(Error::ConnectionLost)));
    assert!(!channel.is_connected());
    assert!(matches!(channel.send("G1 X2").await, Err(Error::ConnectionLost)));
    assert!(matches!(
        channel.query_position().await,
        Err(Error::ConnectionLost)
    ));
}

#[tokio::test]
async fn read_error_is_connection_lost() {
    let (channel, mut controller) = connected(ChannelBuilder::new()).await;

    let pending = spawn_send(&channel, "G1 X1");
    controller.next_command().await.unwrap();
    controller.fail("device reports framing error");

    assert!(matches!(pending.await.unwrap(), Err(Error::ConnectionLost)));
}

#[tokio::test]
async fn disconnect_releases_blocked_caller_then_closes() {
    let (channel, mut controller) = connected(ChannelBuilder::new()).await;

    let pending = spawn_send(&channel, "G1 X1");
    controller.next_command().await.unwrap();

    channel.disconnect().await;
    assert!(matches!(pending.await.unwrap(), Err(Error::ConnectionLost)));
    assert!(controller.is_closed());
    assert_eq!(controller.close_count(), 1);
    assert!(!channel.is_connected());
    assert!(matches!(channel.send("G1 X1").await, Err(Error::NotConnected)));

    channel.disconnect().await;
    assert_eq!(controller.close_count(), 1);
}

#[tokio::test]
async fn reconnect_tears_down_previous_transport() {
    let channel = Arc::new(ChannelBuilder::new().build());
    let (first, mut first_ctl) = MockTransport::named("first");
    channel.connect(Box::new(first)).await;

    let pending = spawn_send(&channel, "G1 X1");
    first_ctl.next_command().await.unwrap();

    let (second, second_ctl) = MockTransport::named("second");
    second_ctl.expect("G1 X2", &["ok"]);
    channel.connect(Box::new(second)).await;

    assert!(matches!(pending.await.unwrap(), Err(Error::ConnectionLost)));
    assert_eq!(first_ctl.close_count(), 1);
    assert!(!second_ctl.is_closed());
    assert_eq!(channel.transport_name().as_deref(), Some("second"));

    assert_eq!(channel.send("G1 X2").await.unwrap().as_deref(), Some("ok"));
    assert_eq!(first_ctl.sent(), vec!["G1 X1"]);
    assert_eq!(second_ctl.sent(), vec!["G1 X2"]);
}

#[tokio::test]
async fn reset_pulses_control_signal() {
    let (channel, controller) =
        connected(ChannelBuilder::new().reset_pulse(Duration::from_millis(1))).await;

    channel.reset().await.unwrap();
    assert_eq!(controller.control_signals(), vec![true, false]);
    assert!(controller.sent().is_empty());
}

#[tokio::test]
async fn abandoned_reset_is_released_by_next_command() {
    let (channel, controller) =
        connected(ChannelBuilder::new().reset_pulse(Duration::from_secs(10))).await;
    controller.expect("G1 X1", &["ok"]);

    let cut_short = tokio::time::timeout(Duration::from_millis(20), channel.reset()).await;
    assert!(cut_short.is_err());
    assert_eq!(controller.control_signals(), vec![true]);

    assert_eq!(channel.send("G1 X1").await.unwrap().as_deref(), Some("ok"));
    assert_eq!(controller.control_signals(), vec![true, false]);
}

#[tokio::test]
async fn failed_reset_release_is_retried_on_disconnect() {
    let (channel, controller) =
        connected(ChannelBuilder::new().reset_pulse(Duration::from_millis(200))).await;

    let pulse = {
        let channel = Arc::clone(&channel);
        tokio::spawn(async move { channel.reset().await })
    };
    while controller.control_signals().is_empty() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    controller.fail_control_signals(true);
    assert!(matches!(pulse.await.unwrap(), Err(Error::Transport(_))));
    assert_eq!(controller.control_signals(), vec![true]);

    controller.fail_control_signals(false);
    channel.disconnect().await;
    assert_eq!(controller.control_signals(), vec![true, false]);
    assert!(controller.is_closed());
}

#[tokio::test]
async fn lost_reply_times_out_and_drops_connection() {
    let (channel, mut controller) =
        connected(ChannelBuilder::new().command_timeout(Duration::from_millis(100))).await;

    assert!(matches!(channel.send("G1 X1").await, Err(Error::Timeout)));
    assert_eq!(controller.next_command().await.as_deref(), Some("G1 X1"));
    assert!(!channel.is_connected());

    // Replies that arrive now must not be matched against a stale queue.
    controller.reply("ok");
    assert!(matches!(channel.send("G1 X2").await, Err(Error::ConnectionLost)));
    assert!(matches!(
        channel.query_position().await,
        Err(Error::ConnectionLost)
    ));
    assert_eq!(controller.sent(), vec!["G1 X1"]);

    let (fresh, fresh_ctl) = MockTransport::named("fresh");
    for n in 2..=4 {
        let command = format!("G1 X{n}");
        fresh_ctl.expect(&command, &["ok"]);
    }
    channel.connect(Box::new(fresh)).await;
    assert!(controller.is_closed());

    for n in 2..=4 {
        let reply = channel.send(&format!("G1 X{n}")).await.unwrap();
        assert_eq!(reply.as_deref(), Some("ok"));
    }
    assert!(channel.is_connected());
}

#[tokio::test]
async fn timed_out_position_query_does_not_hide_later_traffic() {
    let sink = RecordingSink::new();
    let (channel, _controller) = connected(
        ChannelBuilder::new()
            .command_timeout(Duration::from_millis(100))
            .sink(sink.clone()),
    )
    .await;

    assert!(matches!(channel.query_position().await, Err(Error::Timeout)));

    let (fresh, fresh_ctl) = MockTransport::named("fresh");
    fresh_ctl.expect("G1 X1", &["ok"]);
    channel.connect(Box::new(fresh)).await;

    assert_eq!(channel.send("G1 X1").await.unwrap().as_deref(), Some("ok"));
    assert_eq!(sink.lines(), vec![">>> G1 X1", "<<< ok"]);
}

#[tokio::test]
async fn write_failure_drops_connection() {
    let (channel, controller) = connected(ChannelBuilder::new()).await;
    controller.fail_writes(true);

    assert!(matches!(channel.send("G1 X1").await, Err(Error::ConnectionLost)));
    assert!(!channel.is_connected());
}
