//! hygrologd - Environmental Sensor Logging Daemon Binary
//!
//! Polls DHT22 sensors, appends readings to a SQLite log, and publishes a
//! Prometheus-textfile snapshot each round.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use hygrolog::{
    PolledSensor, Poller, PollerConfig, SampleOutcome, SensorDriver, SensorKind, SimulatedSensor,
    SqliteStore, TextfileExporter, DEFAULT_INTER_SAMPLE_DELAY_SECS, DEFAULT_MAX_RETRIES,
    DEFAULT_ROUND_INTERVAL_SECS, DEFAULT_SAMPLES_PER_READING, DEFAULT_SAMPLE_TIMEOUT_SECS,
};
use tokio::sync::watch;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "hygrologd")]
#[command(about = "🌡️ hygrolog - Environmental Sensor Logging Daemon")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "Austin Couch")]
#[command(long_about = "Logs DHT22 sensor readings to SQLite and a Prometheus textfile")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// SQLite database file for the reading log
    #[arg(long, default_value = "sensor_log.db")]
    db_path: PathBuf,

    /// Prometheus textfile written each round
    #[arg(long, default_value = "metrics.prom")]
    metrics_path: PathBuf,

    /// Sleep between polling rounds in seconds
    #[arg(long, default_value_t = DEFAULT_ROUND_INTERVAL_SECS)]
    round_interval: u64,

    /// Pause between sampling distinct sensors in seconds
    #[arg(long, default_value_t = DEFAULT_INTER_SAMPLE_DELAY_SECS)]
    inter_sample_delay: u64,

    /// Hardware samples averaged per reading
    #[arg(long, default_value_t = DEFAULT_SAMPLES_PER_READING)]
    samples: u32,

    /// Transient read failures tolerated per sample call
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    max_retries: u32,

    /// Deadline for one sample call in seconds
    #[arg(long, default_value_t = DEFAULT_SAMPLE_TIMEOUT_SECS)]
    sample_timeout: u64,

    /// Sensor to poll as NAME:KIND[:PIN]; repeatable
    #[arg(long = "sensor", value_name = "NAME:KIND[:PIN]")]
    sensors: Vec<SensorSpec>,

    /// Use simulated drivers instead of hardware (useful for non-Pi systems)
    #[arg(long)]
    simulate: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the polling daemon (default)
    Run,

    /// Perform a single polling round, print the outcomes, and exit
    Once(OnceArgs),
}

#[derive(Args)]
struct OnceArgs {
    /// Output format: json or pretty
    #[arg(short, long, default_value = "pretty")]
    format: String,
}

/// One `--sensor` argument: name, kind, and optional GPIO pin.
#[derive(Debug, Clone, PartialEq)]
struct SensorSpec {
    name: String,
    kind: SensorKind,
    pin: Option<u8>,
}

impl FromStr for SensorSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let name = parts
            .next()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| format!("missing sensor name in '{s}'"))?
            .to_string();
        let kind = parts
            .next()
            .ok_or_else(|| format!("missing sensor kind in '{s}'"))?
            .parse::<SensorKind>()?;
        let pin = parts
            .next()
            .map(|p| {
                p.parse::<u8>()
                    .map_err(|_| format!("invalid GPIO pin '{p}' in '{s}'"))
            })
            .transpose()?;
        Ok(Self { name, kind, pin })
    }
}

/// The sensors polled when no `--sensor` arguments are given.
fn default_sensors() -> Vec<SensorSpec> {
    vec![
        SensorSpec {
            name: "inside".to_string(),
            kind: SensorKind::Dht22,
            pin: Some(4),
        },
        SensorSpec {
            name: "outside".to_string(),
            kind: SensorKind::Dht22,
            pin: Some(17),
        },
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging
    init_logging(&cli)?;

    // Print banner
    print_banner();

    // Setup failures are fatal: nothing to poll means nothing to run.
    let store = SqliteStore::connect(&cli.db_path)
        .await
        .with_context(|| format!("failed to open database at {}", cli.db_path.display()))?;
    store
        .ensure_schema()
        .await
        .context("failed to create database schema")?;

    let specs = if cli.sensors.is_empty() {
        default_sensors()
    } else {
        cli.sensors.clone()
    };

    let mut sensors = Vec::with_capacity(specs.len());
    for spec in &specs {
        let id = store
            .register_sensor(&spec.name, spec.kind, spec.pin)
            .await
            .with_context(|| format!("failed to register sensor '{}'", spec.name))?;
        info!(sensor = %spec.name, id, kind = %spec.kind, pin = ?spec.pin, "sensor registered");
        sensors.push(PolledSensor {
            id,
            name: spec.name.clone(),
            driver: build_driver(spec, cli.simulate)?,
        });
    }

    let exporter = TextfileExporter::new(&cli.metrics_path);
    let config = PollerConfig {
        round_interval: Duration::from_secs(cli.round_interval),
        inter_sample_delay: Duration::from_secs(cli.inter_sample_delay),
        samples_per_reading: cli.samples,
        max_retries: cli.max_retries,
        sample_timeout: Duration::from_secs(cli.sample_timeout),
    };
    let mut poller = Poller::new(store, exporter, sensors, config)?;

    match &cli.command {
        Some(Commands::Once(args)) => {
            let outcomes = poller.run_once().await?;
            print_outcomes(&specs, &outcomes, &args.format)?;
            Ok(())
        }
        _ => {
            info!(
                "polling every {}s, logging to {}, metrics at {}",
                cli.round_interval,
                cli.db_path.display(),
                cli.metrics_path.display()
            );

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                shutdown_signal().await;
                info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
            });

            poller.run(shutdown_rx).await?;

            // Interrupted runs exit with a code distinct from a clean exit.
            std::process::exit(1);
        }
    }
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

fn print_banner() {
    println!("🌡️ hygrolog - Environmental Sensor Logging Daemon");
    println!("   Version: {}", env!("CARGO_PKG_VERSION"));
    println!();
}

fn build_driver(spec: &SensorSpec, simulate: bool) -> anyhow::Result<Box<dyn SensorDriver>> {
    if simulate {
        return Ok(Box::new(SimulatedSensor::new(spec.pin)));
    }

    #[cfg(feature = "gpio")]
    {
        match spec.kind {
            SensorKind::Dht22 => {
                let pin = spec.pin.ok_or_else(|| {
                    anyhow::anyhow!("sensor '{}' requires a GPIO pin", spec.name)
                })?;
                Ok(Box::new(hygrolog::Dht22Sensor::new(pin)?))
            }
        }
    }

    #[cfg(not(feature = "gpio"))]
    {
        tracing::warn!(
            sensor = %spec.name,
            "GPIO support not compiled, using simulated driver"
        );
        Ok(Box::new(SimulatedSensor::new(spec.pin)))
    }
}

fn print_outcomes(
    specs: &[SensorSpec],
    outcomes: &[SampleOutcome],
    format: &str,
) -> anyhow::Result<()> {
    match format {
        "json" => {
            #[derive(serde::Serialize)]
            struct Entry<'a> {
                sensor: &'a str,
                outcome: &'a SampleOutcome,
            }
            let entries: Vec<Entry> = specs
                .iter()
                .zip(outcomes)
                .map(|(spec, outcome)| Entry {
                    sensor: &spec.name,
                    outcome,
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        "pretty" => {
            for (spec, outcome) in specs.iter().zip(outcomes) {
                match outcome {
                    SampleOutcome::Success(m) => {
                        println!(
                            "  {}: {:.1} °C, {:.1} %RH",
                            spec.name, m.temperature_c, m.humidity
                        );
                    }
                    SampleOutcome::Failure { reason } => {
                        println!("  {}: sample failed ({reason})", spec.name);
                    }
                }
            }
        }
        other => {
            anyhow::bail!("unsupported format: {other}. Use 'json' or 'pretty'");
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install SIGINT handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => tracing::error!(error = %err, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        use clap::Parser;

        let cli = Cli::try_parse_from(["hygrologd", "--round-interval", "30"]).unwrap();
        assert_eq!(cli.round_interval, 30);
    }

    #[test]
    fn test_default_values() {
        use clap::Parser;

        let cli = Cli::try_parse_from(["hygrologd"]).unwrap();
        assert_eq!(cli.round_interval, DEFAULT_ROUND_INTERVAL_SECS);
        assert_eq!(cli.inter_sample_delay, DEFAULT_INTER_SAMPLE_DELAY_SECS);
        assert_eq!(cli.samples, DEFAULT_SAMPLES_PER_READING);
        assert_eq!(cli.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(cli.sample_timeout, DEFAULT_SAMPLE_TIMEOUT_SECS);
        assert_eq!(cli.db_path, PathBuf::from("sensor_log.db"));
        assert!(cli.sensors.is_empty());
    }

    #[test]
    fn test_sensor_spec_parsing() {
        let spec: SensorSpec = "inside:dht22:4".parse().unwrap();
        assert_eq!(spec.name, "inside");
        assert_eq!(spec.kind, SensorKind::Dht22);
        assert_eq!(spec.pin, Some(4));

        let spec: SensorSpec = "attic:DHT22".parse().unwrap();
        assert_eq!(spec.pin, None);

        assert!("".parse::<SensorSpec>().is_err());
        assert!("inside".parse::<SensorSpec>().is_err());
        assert!("inside:bme280".parse::<SensorSpec>().is_err());
        assert!("inside:dht22:pin4".parse::<SensorSpec>().is_err());
    }

    #[test]
    fn test_sensor_args_parse_via_clap() {
        use clap::Parser;

        let cli = Cli::try_parse_from([
            "hygrologd",
            "--sensor",
            "inside:dht22:4",
            "--sensor",
            "outside:dht22:17",
        ])
        .unwrap();
        assert_eq!(cli.sensors.len(), 2);
        assert_eq!(cli.sensors[0].name, "inside");
        assert_eq!(cli.sensors[1].pin, Some(17));
    }

    #[test]
    fn test_default_sensor_list() {
        let specs = default_sensors();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "inside");
        assert_eq!(specs[0].pin, Some(4));
        assert_eq!(specs[1].name, "outside");
        assert_eq!(specs[1].pin, Some(17));
    }
}
