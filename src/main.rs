//! Device Client - market sensor telemetry for the edge
//!
//! This binary samples temperature, humidity, crowd and commodity prices on
//! a fixed interval and delivers each sample to the platform over HTTP or
//! MQTT. Samples that cannot be delivered are kept in a durable local queue
//! and retried until they go through.
//!
//! ## Configuration
//!
//! Configuration is loaded from `DEVICE_CLIENT_*` environment variables
//! (see `Config::from_env`) and can be overridden on the command line.
//! `RUST_LOG` sets the logging filter (default: info).

use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use device_client::config::{normalize_server, Config, SensorMode, TransportKind};
use device_client::DeviceClient;

#[derive(Debug, Parser)]
#[command(name = "device-client", version, about = "Smart market device client")]
struct Cli {
    /// Platform server, e.g. `localhost` or `https://platform.example`
    #[arg(long)]
    server: Option<String>,

    /// Port used with `--server` when the server has none
    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    device_id: Option<String>,

    #[arg(long)]
    market_id: Option<String>,

    /// Delivery mode: http or mqtt
    #[arg(long, value_parser = parse_mode)]
    mode: Option<TransportKind>,

    /// Use mock sensors
    #[arg(long)]
    mock: Option<bool>,

    /// Sampling interval in seconds
    #[arg(long)]
    interval: Option<f64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sample and deliver until Ctrl+C (default)
    Run,
    /// Register this device once and print the response
    Register,
}

fn parse_mode(value: &str) -> Result<TransportKind, String> {
    TransportKind::parse(value).ok_or_else(|| format!("'{}' is not http or mqtt", value))
}

impl Cli {
    /// Apply command-line overrides on top of the environment config.
    fn apply(&self, config: &mut Config) -> Result<(), String> {
        if let Some(server) = &self.server {
            config.api_url = normalize_server(server, self.port)
                .ok_or_else(|| "--server must not be empty".to_string())?;
        }
        if let Some(device_id) = &self.device_id {
            config.device_id = device_id.clone();
        }
        if let Some(market_id) = &self.market_id {
            config.market_id = market_id.clone();
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(mock) = self.mock {
            config.sensor_mode = if mock {
                SensorMode::Mock
            } else {
                SensorMode::Hardware
            };
        }
        if let Some(interval) = self.interval {
            if !interval.is_finite() || interval <= 0.0 {
                return Err(format!("--interval must be positive, got {}", interval));
            }
            config.interval = Duration::from_secs_f64(interval);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };
    if let Err(e) = cli.apply(&mut config) {
        error!(error = %e, "Invalid command-line option");
        std::process::exit(2);
    }

    info!(
        api_url = %config.api_url,
        mode = %config.mode,
        device_id = %config.device_id,
        market_id = %config.market_id,
        interval_ms = config.interval.as_millis() as u64,
        "Configuration loaded"
    );

    let client = match DeviceClient::new(config).await {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Failed to initialize device client");
            std::process::exit(1);
        }
    };

    match cli.command.unwrap_or(Command::Run) {
        Command::Register => {
            let result = client.register().await;
            client.transport().close().await;
            match result {
                Ok(response) => match serde_json::to_string_pretty(&response) {
                    Ok(json) => println!("{}", json),
                    Err(e) => error!(error = %e, "Failed to print registration response"),
                },
                Err(e) => {
                    error!(error = %e, "Registration failed");
                    std::process::exit(1);
                }
            }
        }
        Command::Run => {
            info!("Device client running. Press Ctrl+C to stop.");
            let stats = client
                .run_until(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!(error = %e, "Failed to listen for shutdown signal");
                    }
                })
                .await;
            info!(
                sampled = stats.sampled,
                delivered = stats.delivered,
                queued = stats.queued,
                flushed = stats.flushed,
                backlog = client.queue().len(),
                "Final delivery stats"
            );
        }
    }
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}
