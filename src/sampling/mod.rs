//! Sensor sampling: the data model, the drivers, and the polling scheduler.

pub mod data;
pub mod driver;
pub mod poller;

// Re-export commonly used items
pub use data::{Measurement, Reading, RoundStamp, SampleOutcome, Sensor, SensorId, SensorKind};
pub use driver::{SensorDriver, SimulatedSensor};
pub use poller::{PolledSensor, Poller, PollerConfig};

#[cfg(feature = "gpio")]
pub use driver::Dht22Sensor;
