//! The polling scheduler: the daemon's core control loop.
//!
//! One round samples every registered sensor in registration order, persists
//! one reading per sensor (zero-filled on failure), publishes the round's
//! snapshot to the metrics file, then sleeps. Sensors are polled one at a
//! time: concurrent reads on a shared single-wire bus raise the transient
//! failure rate, so sequential access is a hardware constraint, not a
//! simplification.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::error::{HygrologError, Result};
use crate::exporter::TextfileExporter;
use crate::sampling::data::{RoundStamp, SampleOutcome, SensorId};
use crate::sampling::driver::SensorDriver;
use crate::store::SqliteStore;
use crate::{
    DEFAULT_INTER_SAMPLE_DELAY_SECS, DEFAULT_MAX_RETRIES, DEFAULT_ROUND_INTERVAL_SECS,
    DEFAULT_SAMPLES_PER_READING, DEFAULT_SAMPLE_TIMEOUT_SECS,
};

/// Timing and retry parameters for the polling loop.
///
/// Tests inject short intervals here; the daemon fills it from the CLI.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Sleep between rounds
    pub round_interval: Duration,
    /// Pause between sampling distinct sensors within one round
    pub inter_sample_delay: Duration,
    /// Hardware samples averaged per reading
    pub samples_per_reading: u32,
    /// Transient read failures tolerated per sample call
    pub max_retries: u32,
    /// Deadline for one whole sample call
    pub sample_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            round_interval: Duration::from_secs(DEFAULT_ROUND_INTERVAL_SECS),
            inter_sample_delay: Duration::from_secs(DEFAULT_INTER_SAMPLE_DELAY_SECS),
            samples_per_reading: DEFAULT_SAMPLES_PER_READING,
            max_retries: DEFAULT_MAX_RETRIES,
            sample_timeout: Duration::from_secs(DEFAULT_SAMPLE_TIMEOUT_SECS),
        }
    }
}

/// A registered sensor wired to its driver.
pub struct PolledSensor {
    /// Persistent id from the registry
    pub id: SensorId,
    /// Registered name, for operator logs
    pub name: String,
    /// The capability performing the actual sample
    pub driver: Box<dyn SensorDriver>,
}

enum RoundOutcome {
    Completed(Vec<SampleOutcome>),
    Cancelled,
}

/// Drives the sense/persist/publish cycle until cancelled.
pub struct Poller {
    store: SqliteStore,
    exporter: TextfileExporter,
    sensors: Vec<PolledSensor>,
    config: PollerConfig,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("sensors", &self.sensors.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Poller {
    /// Build a poller over the given sensors.
    ///
    /// An empty sensor list is a setup error: the loop would have nothing to
    /// poll.
    pub fn new(
        store: SqliteStore,
        exporter: TextfileExporter,
        sensors: Vec<PolledSensor>,
        config: PollerConfig,
    ) -> Result<Self> {
        if sensors.is_empty() {
            return Err(HygrologError::config("no sensors registered"));
        }
        Ok(Self {
            store,
            exporter,
            sensors,
            config,
        })
    }

    /// Run the polling loop until `shutdown` signals.
    ///
    /// Cancellation interrupts any wait (sample deadline, inter-sample delay,
    /// round sleep), stops before the next sample, and closes the store.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(sensors = self.sensors.len(), "starting polling loop");
        loop {
            match self.run_round(&mut shutdown).await {
                RoundOutcome::Cancelled => break,
                RoundOutcome::Completed(outcomes) => {
                    if let Err(err) = self.exporter.publish(&outcomes) {
                        error!(error = %err, path = %self.exporter.path().display(),
                            "failed to publish metrics snapshot");
                    }
                }
            }

            tokio::select! {
                _ = time::sleep(self.config.round_interval) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!("shutdown requested, closing store");
        self.store.close().await;
        Ok(())
    }

    /// Perform exactly one round, including the metrics publish.
    ///
    /// Used by the `once` subcommand and the test suites.
    pub async fn run_once(&mut self) -> Result<Vec<SampleOutcome>> {
        // Holding the sender open means cancellation can never be observed.
        let (_hold, mut shutdown) = watch::channel(false);
        match self.run_round(&mut shutdown).await {
            RoundOutcome::Completed(outcomes) => {
                self.exporter.publish(&outcomes)?;
                Ok(outcomes)
            }
            RoundOutcome::Cancelled => unreachable!("shutdown channel is held open"),
        }
    }

    async fn run_round(&mut self, shutdown: &mut watch::Receiver<bool>) -> RoundOutcome {
        let stamp = RoundStamp::now();
        let mut outcomes = Vec::with_capacity(self.sensors.len());

        for i in 0..self.sensors.len() {
            if i > 0 {
                tokio::select! {
                    _ = time::sleep(self.config.inter_sample_delay) => {}
                    _ = shutdown.changed() => return RoundOutcome::Cancelled,
                }
            }

            let sensor = &mut self.sensors[i];
            let sensor_id = sensor.id;
            let name = sensor.name.clone();
            let sample = sensor
                .driver
                .sample(self.config.samples_per_reading, self.config.max_retries);
            let outcome = tokio::select! {
                sampled = time::timeout(self.config.sample_timeout, sample) => {
                    match sampled {
                        Ok(Ok(measurement)) => {
                            debug!(sensor = %name,
                                temperature = measurement.temperature_c,
                                humidity = measurement.humidity, "sample ok");
                            SampleOutcome::Success(measurement)
                        }
                        Ok(Err(err)) => {
                            warn!(sensor = %name, error = %err, "sample failed");
                            SampleOutcome::failure(err.to_string())
                        }
                        Err(_) => {
                            warn!(sensor = %name, "sample timed out");
                            SampleOutcome::failure(HygrologError::SampleTimeout.to_string())
                        }
                    }
                }
                _ = shutdown.changed() => return RoundOutcome::Cancelled,
            };

            // Written immediately rather than at end of round: a crash
            // mid-round loses at most the unwritten remainder.
            let reading = outcome.to_reading(sensor_id, &stamp);
            if let Err(err) = self.store.insert_reading(&reading).await {
                error!(sensor = %name, date = %stamp.date, time = %stamp.time,
                    error = %err, "failed to persist reading");
            }
            outcomes.push(outcome);
        }

        RoundOutcome::Completed(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = PollerConfig::default();
        assert_eq!(config.round_interval, Duration::from_secs(120));
        assert_eq!(config.inter_sample_delay, Duration::from_secs(2));
        assert_eq!(config.samples_per_reading, 5);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.sample_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_empty_sensor_list_is_a_setup_error() {
        let store = SqliteStore::connect_in_memory().await.unwrap();
        store.ensure_schema().await.unwrap();
        let exporter = TextfileExporter::new("metrics.prom");

        let err = Poller::new(store, exporter, Vec::new(), PollerConfig::default()).unwrap_err();
        assert!(matches!(err, HygrologError::Config(_)));
    }
}
