// whiteboard -- command-line driver for the CNC whiteboard plotter.
//
// Usage:
//   whiteboard ports
//   whiteboard --port /dev/ttyUSB0 send "G28" "G1 X10 Y10"
//   whiteboard --port /dev/ttyUSB0 position
//   whiteboard --port /dev/ttyUSB0 reset
//   whiteboard --port /dev/ttyUSB0 play duck.gcode --poll-ms 1000
//   whiteboard --tcp 192.168.1.50:2000 repl
//   whiteboard --mock repl
//
// Traffic lines (">>> " / "<<< ") go to stdout; logs go to stderr and are
// filtered with RUST_LOG.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use whiteboard_core::{Error, NullSink, Position, TracingSink, TrafficSink, Transport};
use whiteboard_link::{ChannelBuilder, CommandChannel, PositionPoller};
use whiteboard_test_harness::{MockTransport, SimulatedPlotter};
use whiteboard_transport::{
    FlowControl, Framing, SerialConfig, SerialTransport, TcpTransport, parse_flow_control,
};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Drive a CNC whiteboard plotter over a serial line.
#[derive(Parser)]
#[command(name = "whiteboard", version, about)]
struct Cli {
    /// Serial port path (e.g. /dev/ttyUSB0, COM4).
    #[arg(long, global = true, conflicts_with_all = ["tcp", "mock"])]
    port: Option<String>,

    /// Serial baud rate.
    #[arg(long, global = true, default_value_t = 9600)]
    baud: u32,

    /// Serial character framing: data bits, parity (N/E/O), stop bits.
    #[arg(long, global = true, default_value = "8N1")]
    framing: Framing,

    /// Serial flow control: none, software or hardware.
    #[arg(long, global = true, default_value = "none", value_parser = parse_flow_control)]
    flow: FlowControl,

    /// Connect to a serial-over-TCP bridge at host:port instead.
    #[arg(long, global = true, conflicts_with = "mock")]
    tcp: Option<String>,

    /// Talk to a simulated plotter instead of real hardware.
    #[arg(long, global = true)]
    mock: bool,

    /// Give up on a reply after this many milliseconds (default: wait forever).
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Stop retransmitting a command after this many `rs` replies.
    #[arg(long, global = true)]
    max_resends: Option<u32>,

    /// Do not print command/reply traffic.
    #[arg(long, global = true, conflicts_with = "log_traffic")]
    quiet: bool,

    /// Send traffic to the log instead of stdout.
    #[arg(long, global = true)]
    log_traffic: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports on this machine.
    Ports,

    /// Send one or more commands, waiting for each reply.
    Send {
        /// G-code lines; each is sanitized before sending.
        #[arg(required = true)]
        commands: Vec<String>,
    },

    /// Print the current machine position.
    Position,

    /// Pulse the controller's reset line.
    Reset,

    /// Stream a G-code file to the plotter.
    Play {
        /// G-code file to draw.
        file: PathBuf,

        /// Poll and print the position every N milliseconds while drawing.
        #[arg(long)]
        poll_ms: Option<u64>,
    },

    /// Interactive prompt: send a line, then show the new position.
    Repl {
        /// Also poll the position in the background every N milliseconds.
        #[arg(long)]
        poll_ms: Option<u64>,
    },
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Build the traffic sink. When traffic is printed, the returned task drains
/// the channel to stdout and finishes once the channel is dropped.
fn traffic_sink(cli: &Cli) -> (Arc<dyn TrafficSink>, Option<JoinHandle<()>>) {
    if cli.quiet {
        return (Arc::new(NullSink), None);
    }
    if cli.log_traffic {
        return (Arc::new(TracingSink), None);
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let printer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            println!("{line}");
        }
    });
    (Arc::new(tx), Some(printer))
}

async fn open_transport(cli: &Cli) -> Result<Box<dyn Transport>> {
    if cli.mock {
        let (transport, controller) = MockTransport::named("simulator");
        tokio::spawn(SimulatedPlotter::new(controller).run());
        return Ok(Box::new(transport));
    }

    if let Some(addr) = cli.tcp.as_deref() {
        let transport = TcpTransport::connect(addr)
            .await
            .with_context(|| format!("failed to connect to {addr}"))?;
        return Ok(Box::new(transport));
    }

    let port = cli
        .port
        .as_deref()
        .context("one of --port, --tcp or --mock is required")?;
    let config = SerialConfig {
        baud_rate: cli.baud,
        framing: cli.framing,
        flow_control: cli.flow,
    };
    let transport = SerialTransport::open_with_config(port, config)
        .await
        .with_context(|| format!("error connecting to {port}"))?;
    Ok(Box::new(transport))
}

fn build_channel(cli: &Cli, sink: Arc<dyn TrafficSink>) -> CommandChannel {
    let mut builder = ChannelBuilder::new().shared_sink(sink);
    if let Some(ms) = cli.timeout_ms {
        builder = builder.command_timeout(Duration::from_millis(ms));
    }
    if let Some(n) = cli.max_resends {
        builder = builder.max_resends(n);
    }
    builder.build()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn print_position(position: Option<Position>) {
    match position {
        Some(p) => println!("Current Position: {p}"),
        None => println!("Current Position: N/A"),
    }
}

/// Print every position the poller publishes until the poller stops.
fn spawn_position_printer(poller: &PositionPoller) -> JoinHandle<()> {
    let mut rx = poller.subscribe();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let latest = *rx.borrow_and_update();
            if let Some(p) = latest {
                println!("Pos - {p}");
            }
        }
    })
}

/// Send one line and refresh the position, as the interactive prompt does.
async fn submit(channel: &CommandChannel, line: &str) -> Result<()> {
    channel.send(line).await?;
    match channel.query_position().await {
        Ok(p) => print_position(Some(p)),
        // Reported by the channel's log; keep the prompt going.
        Err(Error::MalformedTelemetry(_)) => {}
        Err(e) => {
            print_position(None);
            return Err(e.into());
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_ports() -> Result<()> {
    let ports = whiteboard_transport::list_ports().context("failed to list serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found.");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

async fn cmd_send(channel: &CommandChannel, commands: &[String]) -> Result<()> {
    for command in commands {
        if channel
            .send(command)
            .await
            .with_context(|| format!("failed to send {command:?}"))?
            .is_none()
        {
            tracing::info!(command = %command, "nothing to send after sanitizing");
        }
    }
    Ok(())
}

async fn cmd_position(channel: &CommandChannel) -> Result<()> {
    match channel.query_position().await {
        Ok(p) => {
            print_position(Some(p));
            Ok(())
        }
        Err(Error::ConnectionLost) => {
            print_position(None);
            bail!("lost connection unexpectedly")
        }
        Err(e) => Err(e).context("failed to read position"),
    }
}

async fn cmd_reset(channel: &CommandChannel) -> Result<()> {
    channel.reset().await.context("failed to reset controller")?;
    println!("Controller reset.");
    Ok(())
}

async fn cmd_play(channel: Arc<CommandChannel>, file: &Path, poll_ms: Option<u64>) -> Result<()> {
    let source = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("failed to open {}", file.display()))?;

    let cancel = CancellationToken::new();
    let ctrl_c = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted, stopping after the current line.");
                cancel.cancel();
            }
        }
    });

    let poller = poll_ms.map(|ms| PositionPoller::spawn(Arc::clone(&channel), Duration::from_millis(ms)));
    let printer = poller.as_ref().map(spawn_position_printer);

    let result = whiteboard_link::play(&channel, BufReader::new(source), &cancel).await;

    ctrl_c.abort();
    if let Some(poller) = poller {
        poller.stop().await;
    }
    if let Some(printer) = printer {
        printer.await.ok();
    }

    let summary = result.with_context(|| format!("drawing {} failed", file.display()))?;
    println!(
        "Done: {} lines read, {} commands sent, {} skipped{}",
        summary.lines_read,
        summary.commands_sent,
        summary.lines_skipped,
        if cancel.is_cancelled() { " (cancelled)" } else { "" }
    );
    Ok(())
}

async fn cmd_repl(channel: Arc<CommandChannel>, poll_ms: Option<u64>) -> Result<()> {
    let poller = poll_ms.map(|ms| PositionPoller::spawn(Arc::clone(&channel), Duration::from_millis(ms)));
    let printer = poller.as_ref().map(spawn_position_printer);

    println!("Type G-code to send. :pos shows the position, :reset pulses reset, :quit exits.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = lines.next_line().await.context("failed to read stdin")? else {
            break;
        };
        let line = line.trim();

        let result = match line {
            "" => continue,
            ":quit" | ":q" => break,
            ":pos" => cmd_position(&channel).await,
            ":reset" => cmd_reset(&channel).await,
            _ => submit(&channel, line).await,
        };

        if let Err(e) = result {
            eprintln!("Error: {e:#}");
            if !channel.is_connected() {
                eprintln!("Lost connection unexpectedly!");
                break;
            }
        }
    }

    if let Some(poller) = poller {
        poller.stop().await;
    }
    if let Some(printer) = printer {
        printer.await.ok();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    // Listing ports does not need a connection.
    if matches!(cli.command, Command::Ports) {
        return cmd_ports();
    }

    let (sink, printer) = traffic_sink(&cli);
    let channel = Arc::new(build_channel(&cli, sink));
    let transport = open_transport(&cli).await?;
    channel.connect(transport).await;

    let result = match &cli.command {
        Command::Send { commands } => cmd_send(&channel, commands).await,
        Command::Position => cmd_position(&channel).await,
        Command::Reset => cmd_reset(&channel).await,
        Command::Play { file, poll_ms } => cmd_play(Arc::clone(&channel), file, *poll_ms).await,
        Command::Repl { poll_ms } => cmd_repl(Arc::clone(&channel), *poll_ms).await,
        Command::Ports => unreachable!("ports handled above"),
    };

    channel.disconnect().await;
    // Dropping the channel releases the last sender so the printer drains.
    drop(channel);
    if let Some(printer) = printer {
        printer.await.ok();
    }

    result
}
