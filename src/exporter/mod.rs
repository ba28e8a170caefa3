//! Prometheus textfile metrics sink.
//!
//! Each round overwrites one well-known file with the latest reading per
//! sensor, in the gauge format consumed by node_exporter's textfile
//! collector. The scraper polls the file on its own schedule, so the rewrite
//! must be atomic from the reader's point of view: the snapshot is written to
//! a temporary file in the same directory and renamed over the target.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::Result;
use crate::sampling::data::SampleOutcome;

/// Writes the per-round metrics snapshot to a textfile-collector file.
pub struct TextfileExporter {
    path: PathBuf,
}

impl TextfileExporter {
    /// Create an exporter targeting `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The target file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically replace the metrics file with this round's snapshot.
    ///
    /// One gauge block triple per sensor index: temperature, pressure
    /// (constant 0, reserved for future hardware), humidity. Failed samples
    /// publish their zero-filled values, consistent with the reading log.
    pub fn publish(&self, outcomes: &[SampleOutcome]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(render(outcomes).as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

fn render(outcomes: &[SampleOutcome]) -> String {
    let mut out = String::new();
    for (i, outcome) in outcomes.iter().enumerate() {
        // writeln! to a String cannot fail
        let _ = writeln!(out, "# HELP temperature{i} Temperature in Centigrade");
        let _ = writeln!(out, "# TYPE temperature{i} gauge");
        let _ = writeln!(out, "temperature{i} {}", outcome.temperature());
        let _ = writeln!(out, "# HELP pressure{i} Pressure in hPa");
        let _ = writeln!(out, "# TYPE pressure{i} gauge");
        let _ = writeln!(out, "pressure{i} 0");
        let _ = writeln!(out, "# HELP humidity{i} Humidity in %RH");
        let _ = writeln!(out, "# TYPE humidity{i} gauge");
        let _ = writeln!(out, "humidity{i} {}", outcome.humidity());
    }
    out
}
