//! rtl433-mqtt-relay entry point
//!
//! Reads decoder records as JSON lines from stdin and publishes them to MQTT
//! until end of input, SIGINT or SIGTERM.

use clap::Parser;
use rtl433_mqtt_relay::config::{local_hostname, MqttSection, RelayConfig, RelaySettings};
use rtl433_mqtt_relay::observability::{init_default_logging, metrics};
use rtl433_mqtt_relay::transport::mqtt::{
    ConnectionSupervisor, MqttTransport, DEFAULT_QUEUE_CAPACITY,
};
use rtl433_mqtt_relay::transport::MqttError;
use rtl433_mqtt_relay::{Publisher, RelayResult};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info, warn};

/// Publish rtl_433 JSON events to MQTT
#[derive(Parser)]
#[command(name = "rtl433-mqtt-relay")]
#[command(about = "Publish rtl_433 JSON events read from stdin to MQTT")]
#[command(version)]
struct Cli {
    /// MQTT output: mqtt[://host[:port]][,user=..][,pass=..][,retain][,lwt[=topic]][,devices[=topic]][,events[=topic]][,states[=topic]]
    #[arg(value_name = "OUTPUT")]
    output: Option<String>,

    /// TOML configuration file with an [mqtt] section
    #[arg(short, long, value_name = "FILE", env = "RTL433_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Host name for topics and the client id (default: system host name)
    #[arg(long, env = "RTL433_RELAY_HOSTNAME")]
    hostname: Option<String>,

    /// Device discriminator mixed into the client id
    #[arg(long, value_name = "HINT")]
    device_hint: Option<String>,

    /// Seconds to wait for the broker to accept the first session
    #[arg(long, default_value_t = 30)]
    connect_timeout: u64,

    /// Records buffered for the connection task before dropping
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting rtl433-mqtt-relay v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(cli).await {
        error!("{}", e);
        process::exit(1);
    }

    info!("Shutdown complete");
}

fn load_settings(cli: &Cli) -> RelayResult<RelaySettings> {
    let file_section = match &cli.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            RelayConfig::load_from_file(path)?.mqtt
        }
        None => MqttSection::default(),
    };
    let section = match &cli.output {
        Some(spec) => file_section.merged_with(MqttSection::from_output_spec(spec)?),
        None => file_section,
    };

    let hostname = cli.hostname.clone().unwrap_or_else(local_hostname);
    Ok(section.resolve(&hostname, cli.device_hint.as_deref())?)
}

async fn run(cli: Cli) -> RelayResult<()> {
    let settings = load_settings(&cli)?;
    settings.log_summary();

    let transport = MqttTransport::new(&settings.session);
    let mut supervisor =
        ConnectionSupervisor::spawn(transport, settings.publish.clone(), cli.queue_capacity);
    supervisor
        .wait_until_connected(Duration::from_secs(cli.connect_timeout))
        .await?;

    let publisher = Publisher::new(settings.router, supervisor.queue());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    info!("Relaying records from stdin");

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
                break;
            }
            stopped = supervisor.join() => {
                stopped?;
                return Err(MqttError::SupervisorStopped.into());
            }
            line = lines.next_line() => match line? {
                Some(line) => ingest(&publisher, &line)?,
                None => {
                    info!("End of input");
                    break;
                }
            },
        }
    }

    supervisor.shutdown().await?;
    info!(metrics = ?metrics().snapshot(), "Relay stopped");
    Ok(())
}

/// Publish one input line; bad records are skipped, only fatal errors return
fn ingest(publisher: &Publisher, line: &str) -> RelayResult<()> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(());
    }
    match publisher.publish_json_line(line) {
        Ok(count) => {
            debug!(count, "Record routed");
            Ok(())
        }
        Err(e) if !e.is_fatal() => {
            warn!(error = %e, "Skipping input line");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
