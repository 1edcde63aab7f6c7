//! Simulator instance model.

use std::path::{Path, PathBuf};

use serde::Serialize;

/// One simulated flight-controller process.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Instance {
    /// Stable fleet index; drives port, directory, and result ordering.
    pub index: usize,
    /// OS process id, once known from spawn or discovery.
    pub process_id: Option<u32>,
    /// UDP port the telemetry channel binds for this instance.
    pub telemetry_port: u16,
    /// Instance-private scratch directory.
    pub working_dir: PathBuf,
}

impl Instance {
    /// Construct an instance whose process id is not yet known.
    #[must_use]
    pub fn new(index: usize, telemetry_port: u16, fleet_dir: &Path) -> Self {
        Self {
            index,
            process_id: None,
            telemetry_port,
            working_dir: Self::dir_for(fleet_dir, index),
        }
    }

    /// `<fleet_dir>/instance/instance_<index>`.
    #[must_use]
    pub fn dir_for(fleet_dir: &Path, index: usize) -> PathBuf {
        fleet_dir.join("instance").join(format!("instance_{index}"))
    }
}
