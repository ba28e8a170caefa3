//! Sensor drivers.
//!
//! A driver performs one blocking "sample" operation per call against a
//! physical or simulated sensor. The hardware DHT22 driver is feature-gated
//! so the daemon compiles and runs on non-Raspberry Pi systems.

use crate::error::Result;
use crate::sampling::data::Measurement;
use async_trait::async_trait;

/// One sensor capability, pin-bound at construction.
///
/// `sample` takes `samples` raw reads, averages them, and retries transient
/// read failures up to `max_retries` times before giving up. The polling
/// scheduler bounds the whole call with its own deadline, so implementations
/// do not need to enforce one themselves.
#[async_trait]
pub trait SensorDriver: Send {
    /// Take one averaged measurement from the sensor.
    async fn sample(&mut self, samples: u32, max_retries: u32) -> Result<Measurement>;
}

#[cfg(feature = "gpio")]
mod dht22 {
    use super::*;
    use crate::error::HygrologError;
    use rppal::gpio::{Gpio, IoPin, Level, Mode};
    use std::thread;
    use std::time::{Duration, Instant};

    // Host start signal: hold the bus low for at least 1 ms.
    const START_LOW: Duration = Duration::from_millis(3);
    // A data bit's high phase is ~26 us for 0 and ~70 us for 1.
    const BIT_THRESHOLD: Duration = Duration::from_micros(50);
    // Upper bound on any single level transition during the transfer.
    const PULSE_LIMIT: Duration = Duration::from_micros(150);
    // Pause between raw reads of the same sensor.
    const READ_SETTLE: Duration = Duration::from_millis(100);

    /// DHT22 driver bit-banging the single-wire protocol via rppal.
    pub struct Dht22Sensor {
        pin: Option<IoPin>,
        pin_number: u8,
    }

    impl Dht22Sensor {
        /// Claim the given BCM GPIO pin for a DHT22 sensor.
        pub fn new(pin_number: u8) -> Result<Self> {
            let pin = Self::claim(pin_number)?;
            Ok(Self {
                pin: Some(pin),
                pin_number,
            })
        }

        fn claim(pin_number: u8) -> Result<IoPin> {
            let gpio = Gpio::new()
                .map_err(|e| HygrologError::sensor(format!("failed to initialize GPIO: {e}")))?;
            Ok(gpio
                .get(pin_number)
                .map_err(|e| {
                    HygrologError::sensor(format!("failed to claim GPIO pin {pin_number}: {e}"))
                })?
                .into_io(Mode::Output))
        }
    }

    #[async_trait]
    impl SensorDriver for Dht22Sensor {
        async fn sample(&mut self, samples: u32, max_retries: u32) -> Result<Measurement> {
            // The scheduler can drop this future at its deadline or on
            // shutdown while the blocking task still holds the pin; in that
            // case the pin is re-claimed once the orphaned task releases it.
            let mut pin = match self.pin.take() {
                Some(pin) => pin,
                None => Self::claim(self.pin_number)?,
            };

            // The wire protocol needs microsecond timing, so it runs on a
            // blocking thread; the pin travels into the closure and back.
            let (pin, result) = tokio::task::spawn_blocking(move || {
                let result = sample_averaged(&mut pin, samples, max_retries);
                (pin, result)
            })
            .await
            .map_err(|e| HygrologError::sensor(format!("sampling task failed: {e}")))?;

            self.pin = Some(pin);
            result
        }
    }

    fn sample_averaged(pin: &mut IoPin, samples: u32, max_retries: u32) -> Result<Measurement> {
        let samples = samples.max(1);
        let mut collected = Vec::with_capacity(samples as usize);
        let mut failures = 0u32;

        while (collected.len() as u32) < samples {
            if !collected.is_empty() || failures > 0 {
                thread::sleep(READ_SETTLE);
            }
            match read_raw(pin) {
                Ok(measurement) => collected.push(measurement),
                Err(err) => {
                    failures += 1;
                    if failures > max_retries {
                        return Err(err);
                    }
                }
            }
        }

        let n = collected.len() as f64;
        Ok(Measurement {
            temperature_c: collected.iter().map(|m| m.temperature_c).sum::<f64>() / n,
            humidity: collected.iter().map(|m| m.humidity).sum::<f64>() / n,
        })
    }

    /// One raw transfer: start signal, sensor ack, 40 data bits, checksum.
    fn read_raw(pin: &mut IoPin) -> Result<Measurement> {
        pin.set_mode(Mode::Output);
        pin.set_low();
        thread::sleep(START_LOW);
        pin.set_high();
        pin.set_mode(Mode::Input);

        // Sensor ack: ~80 us low, ~80 us high, then the first bit's low phase.
        wait_for(pin, Level::Low)?;
        wait_for(pin, Level::High)?;
        wait_for(pin, Level::Low)?;

        let mut bytes = [0u8; 5];
        for bit in 0..40 {
            wait_for(pin, Level::High)?;
            let high = wait_for(pin, Level::Low)?;
            if high > BIT_THRESHOLD {
                bytes[bit / 8] |= 1 << (7 - (bit % 8));
            }
        }

        let sum = bytes[..4].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        if sum != bytes[4] {
            return Err(HygrologError::sensor("checksum mismatch"));
        }

        let humidity = f64::from(u16::from_be_bytes([bytes[0], bytes[1]])) / 10.0;
        let raw_temp = u16::from_be_bytes([bytes[2], bytes[3]]);
        let mut temperature_c = f64::from(raw_temp & 0x7fff) / 10.0;
        if raw_temp & 0x8000 != 0 {
            temperature_c = -temperature_c;
        }

        Ok(Measurement {
            temperature_c,
            humidity,
        })
    }

    /// Spin until the bus reaches `level`, returning the elapsed time.
    fn wait_for(pin: &IoPin, level: Level) -> Result<Duration> {
        let start = Instant::now();
        while pin.read() != level {
            if start.elapsed() > PULSE_LIMIT {
                return Err(HygrologError::sensor("no level transition on the bus"));
            }
            std::hint::spin_loop();
        }
        Ok(start.elapsed())
    }
}

mod simulated {
    use super::*;
    use std::f64::consts::TAU;

    /// Deterministic driver for systems without sensor hardware.
    ///
    /// Produces a slow sine wave around plausible indoor values, offset per
    /// pin so distinct sensors report distinct readings.
    pub struct SimulatedSensor {
        pin: Option<u8>,
        rounds: u32,
    }

    impl SimulatedSensor {
        pub fn new(pin: Option<u8>) -> Self {
            Self { pin, rounds: 0 }
        }
    }

    #[async_trait]
    impl SensorDriver for SimulatedSensor {
        async fn sample(&mut self, _samples: u32, _max_retries: u32) -> Result<Measurement> {
            let phase = f64::from(self.rounds % 16) / 16.0 * TAU;
            let offset = f64::from(self.pin.unwrap_or(0) % 8);
            self.rounds = self.rounds.wrapping_add(1);

            // One-decimal resolution, matching the real sensor.
            let round1 = |v: f64| (v * 10.0).round() / 10.0;
            Ok(Measurement {
                temperature_c: round1(21.0 + offset * 0.5 + 2.0 * phase.sin()),
                humidity: round1(45.0 + offset + 5.0 * phase.cos()),
            })
        }
    }
}

#[cfg(feature = "gpio")]
pub use dht22::Dht22Sensor;

pub use simulated::SimulatedSensor;
