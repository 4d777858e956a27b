// mountlink test application -- CLI tool for checking a HomeBrew mount
// controller over TCP or serial, and for running the mock controller.
//
// Usage:
//   mountlink-test-app serve --bind 127.0.0.1:2000
//   mountlink-test-app --host 192.168.4.1 run
//   mountlink-test-app --host 127.0.0.1 run --module telescope --module relay
//   mountlink-test-app --serial-port COM3 run --module communication --probe-baud
//   mountlink-test-app --config bench.json run --json report.json
//   mountlink-test-app ports
//   mountlink-test-app --serial-port /dev/ttyUSB0 probe --candidate 9600 --candidate 38400
//   mountlink-test-app --host 192.168.4.1 send GV
//   mountlink-test-app --serial-port COM3 send USBRELAY ON

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;

use mountlink_core::{Endpoint, ModuleResult, RunEvent, TestStatus};
use mountlink_protocol::protocol::parse_angle;
use mountlink_protocol::{Command as DeviceCommand, ProtocolClient, Reply};
use mountlink_runner::{
    probe_serial, resolve_job, BaudPolicy, ModuleKind, RunConfig, RunReport, TestRunner,
    STANDARD_BAUD_CANDIDATES,
};
use mountlink_test_harness::{MockDeviceServer, ServerConfig};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// mountlink test application -- checks a mount controller from the command line.
#[derive(Parser)]
#[command(name = "mountlink-test-app", version, about)]
struct Cli {
    /// JSON run configuration. Flags given on the command line override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Controller host for TCP modules.
    #[arg(long, global = true)]
    host: Option<String>,

    /// Controller TCP port (default 2000).
    #[arg(long, global = true)]
    tcp_port: Option<u16>,

    /// Serial port (e.g. /dev/ttyUSB0, COM3). Used by the communication
    /// module and by `probe` and `send`.
    #[arg(long, global = true)]
    serial_port: Option<String>,

    /// Serial baud rate (default 9600).
    #[arg(long, global = true)]
    baud: Option<u32>,

    /// Per-command response timeout in milliseconds.
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Connection timeout in milliseconds.
    #[arg(long, global = true)]
    connect_timeout_ms: Option<u64>,

    /// Extra attempts after a timeout or transport error.
    #[arg(long, global = true)]
    retries: Option<u32>,

    /// Increase log output (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the mock controller until interrupted.
    Serve {
        /// Address to listen on.
        #[arg(long, default_value = "127.0.0.1:2000")]
        bind: String,

        /// Delay before every reply, in milliseconds.
        #[arg(long, default_value_t = 0)]
        latency_ms: u64,

        /// Seed for simulated jitter.
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Run diagnostic modules and print a summary.
    Run {
        /// Module to run (network, communication, telescope, wireless,
        /// relay, device). Repeat for several; default is all.
        #[arg(long = "module", value_parser = parse_module)]
        modules: Vec<ModuleKind>,

        /// Try the standard baud rates on the serial port before running.
        #[arg(long)]
        probe_baud: bool,

        /// Write the module results as JSON to this file (`-` for stdout).
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// List serial ports and flag likely controllers.
    Ports,

    /// Find the baud rate the controller on --serial-port answers at.
    Probe {
        /// Candidate baud rate. Repeat for several; default is the
        /// standard list.
        #[arg(long = "candidate")]
        bauds: Vec<u32>,
    },

    /// Send one command line and print the decoded reply.
    Send {
        /// The command, e.g. `GV` or `USBRELAY ON`.
        #[arg(required = true, num_args = 1..)]
        words: Vec<String>,
    },
}

fn parse_module(s: &str) -> std::result::Result<ModuleKind, String> {
    s.parse().map_err(|e: mountlink_core::Error| e.to_string())
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "mountlink=debug,info",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Build the run configuration from the optional file plus flags.
fn load_config(cli: &Cli) -> Result<RunConfig> {
    let mut config = match &cli.config {
        Some(path) => RunConfig::from_json_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => RunConfig::default(),
    };

    if let Some(host) = &cli.host {
        config = config.with_host(host.clone());
    }
    if let Some(port) = cli.tcp_port {
        config = config.with_tcp_port(port);
    }
    if let Some(port) = &cli.serial_port {
        config = config.with_serial_port(port.clone());
    }
    if let Some(baud) = cli.baud {
        config = config.with_baud_rate(baud);
    }
    if let Some(ms) = cli.timeout_ms {
        config = config.with_command_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = cli.connect_timeout_ms {
        config = config.with_connect_timeout(Duration::from_millis(ms));
    }
    if let Some(retries) = cli.retries {
        config = config.with_retries(retries);
    }
    Ok(config)
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_serve(bind: &str, latency_ms: u64, seed: Option<u64>) -> Result<()> {
    let mut config = ServerConfig::default().with_latency(Duration::from_millis(latency_ms));
    if let Some(seed) = seed {
        config = config.with_seed(seed);
    }

    let server = MockDeviceServer::bind(bind, config)
        .await
        .with_context(|| format!("failed to bind mock controller on {bind}"))?;
    println!("Mock controller listening on {}", server.local_addr());
    println!("Press Ctrl-C to stop.");

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for Ctrl-C")?;

    println!("Shutting down ({} active sessions)...", server.active_sessions());
    server.shutdown().await;
    println!("Stopped.");
    Ok(())
}

async fn cmd_run(
    config: RunConfig,
    modules: &[ModuleKind],
    probe_baud: bool,
    json: Option<&Path>,
) -> Result<()> {
    let config = if probe_baud {
        if config.serial_port.is_none() {
            bail!("--probe-baud needs --serial-port");
        }
        config.with_baud_policy(BaudPolicy::standard_candidates())
    } else {
        config
    };
    let kinds = if modules.is_empty() {
        ModuleKind::all().to_vec()
    } else {
        modules.to_vec()
    };

    let mut jobs = Vec::with_capacity(kinds.len());
    for kind in &kinds {
        jobs.push(resolve_job(*kind, &config).await);
    }

    let (tx, rx) = broadcast::channel(256);
    let progress = tokio::spawn(follow_progress(rx, print_progress));

    let runner = TestRunner::new()
        .with_retry_backoff(config.retry_backoff())
        .with_events(tx);
    let report = runner.run_report(jobs).await;
    // Dropping the last sender ends the progress task.
    drop(runner);
    progress.await.ok();

    print_summary(&report.modules);
    println!("Finished in {:.1}s", report.duration().as_secs_f64());

    if let Some(path) = json {
        write_json(&report, path)?;
    }

    if report.failed() {
        bail!("one or more modules failed");
    }
    Ok(())
}

/// Feed every event to `print` until the runner goes away. Falling behind
/// loses some lines of progress, never the rest of it.
async fn follow_progress(
    mut rx: broadcast::Receiver<RunEvent>,
    mut print: impl FnMut(&RunEvent),
) {
    loop {
        match rx.recv().await {
            Ok(event) => print(&event),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Progress output fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_progress(event: &RunEvent) {
    match event {
        RunEvent::AttemptFinished {
            module,
            test,
            attempt,
            status,
            detail,
        } if *status != TestStatus::Pass => {
            println!("  [{module}] {test}: attempt {attempt} {status} ({detail})");
        }
        RunEvent::TestFinished { module, result } => {
            println!("  [{module}] {}: {}", result.name(), result.status());
        }
        RunEvent::ModuleFinished { module, status } => {
            println!("[{module}] finished: {status}");
        }
        _ => {}
    }
}

fn print_summary(results: &[ModuleResult]) {
    println!();
    println!("Summary");
    for result in results {
        println!(
            "  {:<14} {:<8} {}/{} passed",
            result.module(),
            result.overall_status(),
            result.passed(),
            result.results().len()
        );
        for test in result.results().iter().filter(|t| !t.passed()) {
            println!("      {:<20} {:<8} {}", test.name(), test.status(), test.detail());
        }
        for hint in result.recommendations() {
            println!("      -> {hint}");
        }
    }
}

fn write_json(report: &RunReport, path: &Path) -> Result<()> {
    let text = serde_json::to_string_pretty(report).context("failed to serialize results")?;
    if path == Path::new("-") {
        println!("{text}");
    } else {
        std::fs::write(path, text)
            .with_context(|| format!("failed to write results to {}", path.display()))?;
        println!("Results written to {}", path.display());
    }
    Ok(())
}

fn cmd_ports() -> Result<()> {
    let ports = mountlink_transport::list_ports();
    if ports.is_empty() {
        println!("No serial ports found.");
        return Ok(());
    }

    println!("{:<20} {:<10} {:<10} DESCRIPTION", "PORT", "KIND", "DEVICE");
    println!("{}", "-".repeat(64));
    for port in &ports {
        println!(
            "{:<20} {:<10} {:<10} {}",
            port.name,
            format!("{:?}", port.kind),
            port.likely_device.unwrap_or("-"),
            port.description
        );
    }

    match mountlink_transport::detect_device_port() {
        Some(port) => println!("\nLikely controller: {}", port.name),
        None => println!("\nNo port looks like a HomeBrew controller."),
    }
    Ok(())
}

async fn cmd_probe(config: &RunConfig, bauds: &[u32]) -> Result<()> {
    let Some(Endpoint::Serial { port_name, params }) = config.serial_endpoint()? else {
        bail!("probe needs --serial-port");
    };
    let candidates = if bauds.is_empty() {
        STANDARD_BAUD_CANDIDATES.to_vec()
    } else {
        bauds.to_vec()
    };

    println!("Probing {port_name} at {candidates:?}...");
    let report = probe_serial(&port_name, &params, &candidates, config.command_timeout()).await;
    for attempt in &report.attempts {
        let mark = if attempt.responded { "ok" } else { "--" };
        println!("  {:>6} baud  {mark}  {}", attempt.baud, attempt.detail);
    }

    if let Some(e) = report.port_error {
        return Err(e).with_context(|| format!("cannot use {port_name}"));
    }
    match report.selected {
        Some(baud) => {
            println!("Controller answers at {baud} baud.");
            Ok(())
        }
        None => bail!("no response at any candidate baud rate"),
    }
}

async fn cmd_send(config: &RunConfig, words: &[String]) -> Result<()> {
    let command: DeviceCommand = words.join(" ").parse()?;
    let endpoint = config
        .serial_endpoint()?
        .unwrap_or_else(|| config.network_endpoint());

    let mut session = mountlink_transport::connect(&endpoint, config.connect_timeout())
        .await
        .with_context(|| format!("failed to connect to {endpoint}"))?;
    let reply = ProtocolClient::new()
        .query(&mut session, &command, config.command_timeout())
        .await;
    session.close().await.ok();
    let line = reply.with_context(|| format!("no reply to {command}"))?;

    println!("> {command}");
    println!("< {line}");
    for row in describe_reply(&command, &line) {
        println!("  {row}");
    }
    Ok(())
}

fn describe_reply(command: &DeviceCommand, line: &str) -> Vec<String> {
    let reply = Reply::parse(line);
    let mut rows = match &reply {
        Reply::Mount(body) => match command {
            DeviceCommand::GetAltitude | DeviceCommand::GetAzimuth => match parse_angle(line) {
                Ok(degrees) => vec![format!("angle: {degrees:.4} deg")],
                Err(e) => vec![format!("mount reply: {body} ({e})")],
            },
            _ => vec![format!("mount reply: {body}")],
        },
        Reply::Json(map) => map.iter().map(|(key, value)| format!("{key}: {value}")).collect(),
        Reply::Unknown => vec!["the controller does not know this command".to_string()],
        Reply::Text(text) => vec![format!("text: {text}")],
    };
    if command.expects_json() && !matches!(reply, Reply::Json(_) | Reply::Unknown) {
        rows.push(format!("warning: {command} normally answers with a JSON object"));
    }
    rows
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Command::Serve {
            bind,
            latency_ms,
            seed,
        } => cmd_serve(bind, *latency_ms, *seed).await,
        Command::Ports => cmd_ports(),
        Command::Run {
            modules,
            probe_baud,
            json,
        } => cmd_run(load_config(&cli)?, modules, *probe_baud, json.as_deref()).await,
        Command::Probe { bauds } => cmd_probe(&load_config(&cli)?, bauds).await,
        Command::Send { words } => cmd_send(&load_config(&cli)?, words).await,
    }
}
