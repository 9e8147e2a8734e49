use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use airbnk_lib::message::{OutboundRequest, Transport};
use airbnk_lib::{DeviceConfig, LockError, LockSession, LockStatus};

/// Console bridge for one Airbnk lock behind a Tasmota BLE gateway.
///
/// Reads gateway reports (`tele/<topic>/BLE <json>` or bare JSON, one per line) and
/// prints the MQTT commands the session issues.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Lock configuration file (JSON).
    #[arg(short, long)]
    config: PathBuf,
    /// File with gateway reports; stdin when omitted.
    #[arg(short, long)]
    input: Option<PathBuf>,
    /// Lock after attaching.
    #[arg(long, conflicts_with = "unlock")]
    lock: bool,
    /// Unlock after attaching.
    #[arg(long)]
    unlock: bool,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

/// Publishes requests as `<topic> <payload>` lines on stdout.
struct ConsoleTransport {
    topic: String,
}

impl ConsoleTransport {
    fn command_topic(&self, request: &OutboundRequest) -> String {
        let command = match request {
            OutboundRequest::RequestDetails { .. } => "BLEDetails2",
            OutboundRequest::ScanAll => "BLEDetails3",
            OutboundRequest::Write { .. } | OutboundRequest::Read { .. } => "BLEOp",
        };
        format!("cmnd/{}/{command}", self.topic)
    }
}

impl Transport for ConsoleTransport {
    fn send(&mut self, request: OutboundRequest) -> Result<(), LockError> {
        println!("{} {}", self.command_topic(&request), request.payload());
        Ok(())
    }
}

fn setup_logging(verbosity: &Verbosity<InfoLevel>) {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry().with(filter).with(console_layer).init();
}

/// Strip the `tele/<topic>/BLE` prefix if the line carries one.
fn report_body<'a>(line: &'a str, telemetry_topic: &str) -> Option<&'a str> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match line.split_once(char::is_whitespace) {
        Some((topic, body)) if topic.starts_with("tele/") => (topic == telemetry_topic).then_some(body.trim()),
        _ => Some(line),
    }
}

/// Release the held `--lock`/`--unlock` direction once the lock has advertised.
fn due_direction(pending: &mut Option<u8>, advertised: bool) -> Option<u8> {
    if advertised { pending.take() } else { None }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.verbose);

    tokio::select! {
        res = run(cli) => {
            if let Err(e) = res {
                error!("Bridge failed: {:?}", e);
                std::process::exit(1);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Ctrl+C received, shutting down gracefully.");
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = DeviceConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load lock configuration from {:?}", cli.config))?;
    let telemetry_topic = format!("tele/{}/BLE", config.mqtt_topic);
    let transport = ConsoleTransport {
        topic: config.mqtt_topic.clone(),
    };

    let mut session = LockSession::attach(config, transport).context("Failed to attach lock")?;
    let identity = session.identity();
    info!(
        serial = %identity.serial_number,
        model = %identity.model,
        name = ?identity.name,
        "Lock ready"
    );

    session.register_observer(Box::new(|status: &LockStatus| {
        info!(
            state = %status.lock_state,
            battery = ?status.battery,
            counter = status.event_counter,
            available = status.is_available,
            "Lock status"
        );
    }));

    // Commands are signed with the advertised event counter, so wait for the first record
    let mut pending_direction = match (cli.lock, cli.unlock) {
        (true, _) => Some(2),
        (_, true) => Some(1),
        _ => None,
    };
    if pending_direction.is_some() {
        info!("Waiting for the lock to advertise before operating it");
    }

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &cli.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open input file {path:?}"))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };
    let mut lines = reader.lines();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read gateway report")? else {
                    debug!("Input closed");
                    break;
                };
                let Some(body) = report_body(&line, &telemetry_topic) else {
                    continue;
                };
                if let Err(e) = session.on_message(body) {
                    warn!(%e, report = body, "Ignoring unreadable gateway report");
                }
                if let Some(direction) = due_direction(&mut pending_direction, session.record().is_some()) {
                    session
                        .request_operation(direction)
                        .context("Failed to start lock operation")?;
                }
            }
            _ = ticker.tick() => {
                session.check_timeout(Utc::now());
            }
        }
    }

    if pending_direction.is_some() {
        warn!("Input ended before the lock advertised; operation not sent");
    }
    info!(state = %session.lock_state(), "Input exhausted");
    Ok(())
}
