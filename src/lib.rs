//! # hygrolog - Environmental Sensor Logging Daemon
//!
//! A long-running data-acquisition daemon for Raspberry Pi: it periodically
//! samples DHT22 temperature/humidity sensors, appends every reading to a
//! SQLite log, and rewrites a Prometheus-textfile snapshot each round for an
//! external scraper such as node_exporter's textfile collector.
//!
//! ## Features
//!
//! - **Fault-tolerant polling**: a slow or failing sensor degrades to a
//!   zero-filled reading for that sensor only; the loop never stops
//! - **Dual sinks**: durable append-only log plus an ephemeral metrics file,
//!   kept consistent per round and decoupled in their failure domains
//! - **Atomic metrics publish**: the scraper never observes a torn file
//! - **Cross-compilation**: the GPIO driver is feature-gated; a simulated
//!   driver runs anywhere
//! - **Library + Binary**: use as a crate or as the `hygrologd` daemon
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hygrolog::{
//!     PolledSensor, Poller, PollerConfig, SensorKind, SimulatedSensor, SqliteStore,
//!     TextfileExporter,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = SqliteStore::connect("sensor_log.db").await?;
//!     store.ensure_schema().await?;
//!     let id = store.register_sensor("inside", SensorKind::Dht22, Some(4)).await?;
//!
//!     let sensors = vec![PolledSensor {
//!         id,
//!         name: "inside".to_string(),
//!         driver: Box::new(SimulatedSensor::new(Some(4))),
//!     }];
//!     let exporter = TextfileExporter::new("metrics.prom");
//!     let mut poller = Poller::new(store, exporter, sensors, PollerConfig::default())?;
//!
//!     poller.run_once().await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod exporter;
pub mod sampling;
pub mod store;

// Re-export public API
pub use error::{HygrologError, Result};
pub use exporter::TextfileExporter;
pub use sampling::{
    data::{Measurement, Reading, RoundStamp, SampleOutcome, Sensor, SensorId, SensorKind},
    driver::{SensorDriver, SimulatedSensor},
    poller::{PolledSensor, Poller, PollerConfig},
};
pub use store::SqliteStore;

#[cfg(feature = "gpio")]
pub use sampling::driver::Dht22Sensor;

/// The default sleep between polling rounds, in seconds
pub const DEFAULT_ROUND_INTERVAL_SECS: u64 = 120;

/// The default pause between sampling distinct sensors within one round, in
/// seconds
pub const DEFAULT_INTER_SAMPLE_DELAY_SECS: u64 = 2;

/// The default number of hardware samples averaged per reading
pub const DEFAULT_SAMPLES_PER_READING: u32 = 5;

/// The default number of transient read failures tolerated per sample call
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// The default deadline for one sample call, in seconds
pub const DEFAULT_SAMPLE_TIMEOUT_SECS: u64 = 5;
