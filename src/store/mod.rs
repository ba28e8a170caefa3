//! Durable storage for sensors and readings.
//!
//! One SQLite database holds the sensor registry and the append-only reading
//! log. The daemon is the only writer, so the pool is capped at a single
//! connection owned by the polling scheduler for the life of the process.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::error::{HygrologError, Result};
use crate::sampling::data::{Reading, Sensor, SensorId, SensorKind};

const CREATE_SENSORS: &str = "CREATE TABLE IF NOT EXISTS sensors (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    sensor_type TEXT,
    pin INTEGER
)";

const CREATE_LOG: &str = "CREATE TABLE IF NOT EXISTS log (
    id INTEGER PRIMARY KEY,
    sensor_id INTEGER REFERENCES sensors (id),
    temperature REAL,
    humidity REAL,
    pressure REAL,
    date TEXT,
    time TEXT
)";

#[derive(sqlx::FromRow)]
struct SensorRow {
    id: i64,
    name: String,
    sensor_type: String,
    pin: Option<i64>,
}

/// SQLite-backed sensor registry and reading log.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open the database at `path`, creating the file if absent.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        Self::connect_with(options).await
    }

    /// Open an in-memory database; used by the test suites.
    pub async fn connect_in_memory() -> Result<Self> {
        Self::connect_with(SqliteConnectOptions::new().in_memory(true)).await
    }

    async fn connect_with(options: SqliteConnectOptions) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the `sensors` and `log` tables if they do not exist.
    ///
    /// Safe to call on every startup.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(CREATE_SENSORS).execute(&self.pool).await?;
        sqlx::query(CREATE_LOG).execute(&self.pool).await?;
        Ok(())
    }

    /// Register a sensor, returning its persistent id.
    ///
    /// Idempotent upsert keyed by the unique `name`: re-registering an
    /// existing name returns the original id without touching the row.
    pub async fn register_sensor(
        &self,
        name: &str,
        kind: SensorKind,
        pin: Option<u8>,
    ) -> Result<SensorId> {
        if name.is_empty() {
            return Err(HygrologError::config("sensor name must not be empty"));
        }
        if kind.requires_pin() && pin.is_none() {
            return Err(HygrologError::config(format!(
                "sensor '{name}' of kind {kind} requires a GPIO pin"
            )));
        }

        let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM sensors WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(id) = existing {
            return Ok(id);
        }

        let result = sqlx::query("INSERT INTO sensors (name, sensor_type, pin) VALUES (?, ?, ?)")
            .bind(name)
            .bind(kind.as_str())
            .bind(pin.map(i64::from))
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    /// All registered sensors in registration (id) order.
    pub async fn list_sensors(&self) -> Result<Vec<Sensor>> {
        let rows: Vec<SensorRow> =
            sqlx::query_as("SELECT id, name, sensor_type, pin FROM sensors ORDER BY id")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|row| {
                let kind = row
                    .sensor_type
                    .parse::<SensorKind>()
                    .map_err(|e| HygrologError::config(e))?;
                Ok(Sensor {
                    id: row.id,
                    name: row.name,
                    kind,
                    pin: row.pin.map(|p| p as u8),
                })
            })
            .collect()
    }

    /// Append one reading to the log. Never mutates or deletes prior rows.
    pub async fn insert_reading(&self, reading: &Reading) -> Result<()> {
        sqlx::query(
            "INSERT INTO log (sensor_id, temperature, humidity, pressure, date, time) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(reading.sensor_id)
        .bind(reading.temperature)
        .bind(reading.humidity)
        .bind(reading.pressure)
        .bind(&reading.date)
        .bind(&reading.time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All logged readings for one sensor, oldest first.
    pub async fn readings(&self, sensor_id: SensorId) -> Result<Vec<Reading>> {
        let readings = sqlx::query_as(
            "SELECT sensor_id, temperature, humidity, pressure, date, time \
             FROM log WHERE sensor_id = ? ORDER BY id",
        )
        .bind(sensor_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(readings)
    }

    /// Number of logged readings for one sensor.
    pub async fn reading_count(&self, sensor_id: SensorId) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM log WHERE sensor_id = ?")
            .bind(sensor_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Close the database connection; called during orderly shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
