//! End-to-end polling round tests against an on-disk SQLite log and a real
//! metrics file, with scripted sensor drivers standing in for hardware.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hygrolog::{
    HygrologError, Measurement, PolledSensor, Poller, PollerConfig, SensorDriver, SensorKind,
    SqliteStore, TextfileExporter,
};
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::time::Instant;

/// What a scripted driver does on each successive sample call. The last step
/// repeats once the script is exhausted.
#[derive(Clone, Copy)]
enum Step {
    Read(f64, f64),
    Fail(&'static str),
    Hang,
}

struct ScriptedSensor {
    steps: Vec<Step>,
    cursor: usize,
    sampled_at: Arc<Mutex<Vec<Instant>>>,
}

impl ScriptedSensor {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            cursor: 0,
            sampled_at: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn sampled_at(&self) -> Arc<Mutex<Vec<Instant>>> {
        Arc::clone(&self.sampled_at)
    }
}

#[async_trait]
impl SensorDriver for ScriptedSensor {
    async fn sample(&mut self, _samples: u32, _max_retries: u32) -> hygrolog::Result<Measurement> {
        self.sampled_at.lock().unwrap().push(Instant::now());
        let index = self.cursor.min(self.steps.len() - 1);
        self.cursor += 1;
        match self.steps[index] {
            Step::Read(temperature_c, humidity) => Ok(Measurement {
                temperature_c,
                humidity,
            }),
            Step::Fail(reason) => Err(HygrologError::sensor(reason)),
            Step::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

struct Fixture {
    _dir: TempDir,
    db_path: PathBuf,
    metrics_path: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("sensor_log.db");
        let metrics_path = dir.path().join("metrics.prom");
        Self {
            _dir: dir,
            db_path,
            metrics_path,
        }
    }

    async fn store(&self) -> SqliteStore {
        SqliteStore::connect(&self.db_path).await.unwrap()
    }

    fn metrics(&self) -> String {
        std::fs::read_to_string(&self.metrics_path).unwrap()
    }
}

/// Short virtual-time intervals so paused-clock tests stay fast to reason
/// about while exercising the same waits as production defaults.
fn test_config() -> PollerConfig {
    PollerConfig {
        round_interval: Duration::from_secs(120),
        inter_sample_delay: Duration::from_secs(2),
        samples_per_reading: 5,
        max_retries: 5,
        sample_timeout: Duration::from_secs(5),
    }
}

async fn build_poller(
    fixture: &Fixture,
    sensors: Vec<(&str, Option<u8>, ScriptedSensor)>,
    config: PollerConfig,
) -> (Poller, Vec<i64>) {
    let store = fixture.store().await;
    store.ensure_schema().await.unwrap();

    let mut polled = Vec::new();
    let mut ids = Vec::new();
    for (name, pin, driver) in sensors {
        let id = store
            .register_sensor(name, SensorKind::Dht22, pin)
            .await
            .unwrap();
        ids.push(id);
        polled.push(PolledSensor {
            id,
            name: name.to_string(),
            driver: Box::new(driver),
        });
    }

    let exporter = TextfileExporter::new(&fixture.metrics_path);
    let poller = Poller::new(store, exporter, polled, config).unwrap();
    (poller, ids)
}

#[tokio::test(start_paused = true)]
async fn test_round_with_one_timed_out_sensor() {
    let fixture = Fixture::new();
    let inside = ScriptedSensor::new(vec![Step::Read(21.5, 40.2)]);
    let outside = ScriptedSensor::new(vec![Step::Hang]);

    let (mut poller, ids) = build_poller(
        &fixture,
        vec![("inside", Some(4), inside), ("outside", Some(17), outside)],
        test_config(),
    )
    .await;

    let outcomes = poller.run_once().await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].is_success());
    assert!(!outcomes[1].is_success());

    // Exactly one log row per registered sensor, sharing the round stamp.
    let inspect = fixture.store().await;
    let inside_rows = inspect.readings(ids[0]).await.unwrap();
    let outside_rows = inspect.readings(ids[1]).await.unwrap();
    assert_eq!(inside_rows.len(), 1);
    assert_eq!(outside_rows.len(), 1);
    assert_eq!(inside_rows[0].temperature, 21.5);
    assert_eq!(inside_rows[0].humidity, 40.2);
    assert_eq!(inside_rows[0].pressure, None);
    assert_eq!(outside_rows[0].temperature, 0.0);
    assert_eq!(outside_rows[0].humidity, 0.0);
    assert_eq!(outside_rows[0].pressure, None);
    assert_eq!(inside_rows[0].date, outside_rows[0].date);
    assert_eq!(inside_rows[0].time, outside_rows[0].time);

    let metrics = fixture.metrics();
    assert!(metrics.contains("temperature0 21.5"));
    assert!(metrics.contains("humidity0 40.2"));
    assert!(metrics.contains("temperature1 0"));
    assert!(metrics.contains("humidity1 0"));
    assert!(metrics.contains("pressure0 0"));
    assert!(metrics.contains("pressure1 0"));
}

#[tokio::test(start_paused = true)]
async fn test_one_row_per_sensor_per_round_despite_failures() {
    let fixture = Fixture::new();
    let steady = ScriptedSensor::new(vec![Step::Read(19.0, 50.0)]);
    let flaky = ScriptedSensor::new(vec![Step::Fail("checksum mismatch")]);
    let stuck = ScriptedSensor::new(vec![Step::Hang]);

    let (mut poller, ids) = build_poller(
        &fixture,
        vec![
            ("steady", Some(4), steady),
            ("flaky", Some(17), flaky),
            ("stuck", Some(22), stuck),
        ],
        test_config(),
    )
    .await;

    poller.run_once().await.unwrap();
    poller.run_once().await.unwrap();

    let inspect = fixture.store().await;
    for id in &ids {
        assert_eq!(inspect.reading_count(*id).await.unwrap(), 2);
    }
}

#[tokio::test(start_paused = true)]
async fn test_storage_failure_does_not_stop_the_round() {
    let fixture = Fixture::new();
    let inside = ScriptedSensor::new(vec![Step::Read(21.5, 40.2)]);
    let outside = ScriptedSensor::new(vec![Step::Read(12.0, 70.0)]);
    let outside_calls = outside.sampled_at();

    let (mut poller, _ids) = build_poller(
        &fixture,
        vec![("inside", Some(4), inside), ("outside", Some(17), outside)],
        test_config(),
    )
    .await;

    // Break the log table out from under the poller.
    let saboteur = fixture.store().await;
    sqlx::query("DROP TABLE log")
        .execute(saboteur.pool())
        .await
        .unwrap();

    let outcomes = poller.run_once().await.unwrap();

    // Both sensors were still sampled and the snapshot still published.
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outside_calls.lock().unwrap().len(), 1);
    let metrics = fixture.metrics();
    assert!(metrics.contains("temperature0 21.5"));
    assert!(metrics.contains("temperature1 12"));
}

#[tokio::test(start_paused = true)]
async fn test_rounds_are_spaced_by_at_least_the_round_interval() {
    let fixture = Fixture::new();
    let sensor = ScriptedSensor::new(vec![Step::Read(20.0, 45.0)]);
    let sampled_at = sensor.sampled_at();

    let (poller, _ids) =
        build_poller(&fixture, vec![("inside", Some(4), sensor)], test_config()).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(poller.run(shutdown_rx));

    while sampled_at.lock().unwrap().len() < 3 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    let at = sampled_at.lock().unwrap();
    for pair in at.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(120));
    }
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_round_sleep_starts_no_new_round() {
    let fixture = Fixture::new();
    let sensor = ScriptedSensor::new(vec![Step::Read(20.0, 45.0)]);
    let sampled_at = sensor.sampled_at();

    let config = PollerConfig {
        round_interval: Duration::from_secs(300),
        ..test_config()
    };
    let (poller, ids) = build_poller(&fixture, vec![("inside", Some(4), sensor)], config).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(poller.run(shutdown_rx));

    while sampled_at.lock().unwrap().len() < 1 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown_tx.send(true).unwrap();

    // The loop must exit within a bounded grace period, well before the
    // round interval would elapse.
    tokio::time::timeout(Duration::from_secs(30), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(sampled_at.lock().unwrap().len(), 1);
    let inspect = fixture.store().await;
    assert_eq!(inspect.reading_count(ids[0]).await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sensor_recovers_after_a_timed_out_round() {
    let fixture = Fixture::new();
    // Round one overruns the sample deadline, which drops the in-flight
    // sample future; the sensor must still be polled and succeed next round.
    let sensor = ScriptedSensor::new(vec![Step::Hang, Step::Read(20.5, 48.0)]);
    let sampled_at = sensor.sampled_at();

    let (mut poller, ids) =
        build_poller(&fixture, vec![("inside", Some(4), sensor)], test_config()).await;

    let first = poller.run_once().await.unwrap();
    assert!(!first[0].is_success());

    let second = poller.run_once().await.unwrap();
    assert!(second[0].is_success());
    assert_eq!(sampled_at.lock().unwrap().len(), 2);

    let inspect = fixture.store().await;
    let rows = inspect.readings(ids[0]).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].temperature, 0.0);
    assert_eq!(rows[1].temperature, 20.5);
    assert_eq!(rows[1].humidity, 48.0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_then_recovered_sensor_across_rounds() {
    let fixture = Fixture::new();
    let sensor = ScriptedSensor::new(vec![Step::Fail("no level transition"), Step::Read(18.5, 61.0)]);

    let (mut poller, ids) =
        build_poller(&fixture, vec![("inside", Some(4), sensor)], test_config()).await;

    poller.run_once().await.unwrap();
    poller.run_once().await.unwrap();

    let inspect = fixture.store().await;
    let rows = inspect.readings(ids[0]).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].temperature, 0.0);
    assert_eq!(rows[1].temperature, 18.5);
    assert_eq!(rows[1].humidity, 61.0);

    // The metrics file reflects only the latest round.
    let metrics = fixture.metrics();
    assert!(metrics.contains("temperature0 18.5"));
    assert!(!metrics.contains("temperature1"));
}
