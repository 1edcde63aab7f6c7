//! Global configuration parsing, validation, and parameter-name loading.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// Directory layout shared by the fleet, checkpoint, and trial components.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PathsConfig {
    /// Experiment root; relative paths in this section resolve against it.
    pub root_dir: PathBuf,
    /// Live simulator working tree (instance dirs, logs, criu images).
    pub working_dir: PathBuf,
    /// Simulator build directory containing `bin/px4` and `etc/`.
    pub build_dir: PathBuf,
    /// Saved fleet-image location (copy of the working tree).
    pub images_dir: PathBuf,
    /// JSON object of parameter name to default value.
    pub param_file: PathBuf,
}

/// Simulator launch settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct SimulationConfig {
    /// Simulation speed multiplier (`PX4_SIM_SPEED_FACTOR`).
    #[serde(default = "default_speed")]
    pub speed: f64,
    /// Default fleet size for commands that do not take a parameter batch.
    #[serde(default = "default_instance_count")]
    pub instance_count: usize,
    /// Run simulators without an interactive shell, logging to files.
    #[serde(default = "default_true")]
    pub daemon: bool,
    /// Telemetry port of instance 0; instance `i` uses `base_port + i`.
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    /// Airframe autostart id (`PX4_SYS_AUTOSTART`).
    #[serde(default = "default_autostart_id")]
    pub autostart_id: u32,
    /// Simulator backend name (`PX4_SIMULATOR`).
    #[serde(default = "default_simulator")]
    pub simulator: String,
}

/// Worker pool sizing.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PoolConfig {
    /// Maximum concurrent per-instance tasks; 0 means available parallelism.
    #[serde(default)]
    pub max_concurrency: usize,
}

/// Telemetry read and protocol exchange timeouts (milliseconds).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TelemetryConfig {
    /// Per-message read timeout while scoring.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Maximum wait for the first heartbeat of a booting instance.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// Maximum duration of the whole mission upload exchange.
    #[serde(default = "default_mission_ack_timeout_ms")]
    pub mission_ack_timeout_ms: u64,
    /// Delay between consecutive `PARAM_SET` messages.
    #[serde(default = "default_param_send_interval_ms")]
    pub param_send_interval_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: default_read_timeout_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            mission_ack_timeout_ms: default_mission_ack_timeout_ms(),
            param_send_interval_ms: default_param_send_interval_ms(),
        }
    }
}

/// Stabilization delays between trial steps (milliseconds).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SettleConfig {
    /// Wait after mission start before parameters are injected.
    #[serde(default = "default_mission_ms")]
    pub mission_ms: u64,
    /// Wait after parameter injection before scoring.
    #[serde(default = "default_params_ms")]
    pub params_ms: u64,
    /// Upper bound on waiting for restored processes to become discoverable.
    #[serde(default = "default_restore_ms")]
    pub restore_ms: u64,
    /// Grace period between SIGTERM and SIGKILL at teardown.
    #[serde(default = "default_terminate_grace_ms")]
    pub terminate_grace_ms: u64,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            mission_ms: default_mission_ms(),
            params_ms: default_params_ms(),
            restore_ms: default_restore_ms(),
            terminate_grace_ms: default_terminate_grace_ms(),
        }
    }
}

/// Checkpoint/restore facility invocation.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CheckpointConfig {
    /// `criu` executable.
    #[serde(default = "default_criu_binary")]
    pub criu_binary: String,
    /// Prefix every criu invocation with `sudo`.
    #[serde(default = "default_true")]
    pub use_sudo: bool,
    /// Keep dumped processes running (`criu dump -R`).
    #[serde(default)]
    pub leave_running: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            criu_binary: default_criu_binary(),
            use_sudo: true,
            leave_running: false,
        }
    }
}

/// One global waypoint of the fixed mission.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct WaypointConfig {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Altitude relative to home in metres.
    pub alt: f32,
}

/// Fixed mission flown by every instance.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct MissionConfig {
    /// Ordered waypoints.
    #[serde(default = "default_waypoints")]
    pub waypoints: Vec<WaypointConfig>,
    /// Waypoint acceptance radius in metres.
    #[serde(default = "default_accept_radius")]
    pub accept_radius: f32,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            waypoints: default_waypoints(),
            accept_radius: default_accept_radius(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_speed() -> f64 {
    1.0
}

fn default_instance_count() -> usize {
    1
}

fn default_base_port() -> u16 {
    60000
}

fn default_autostart_id() -> u32 {
    10040
}

fn default_simulator() -> String {
    "sihsim".into()
}

fn default_read_timeout_ms() -> u64 {
    500
}

fn default_heartbeat_timeout_ms() -> u64 {
    30_000
}

fn default_mission_ack_timeout_ms() -> u64 {
    10_000
}

fn default_param_send_interval_ms() -> u64 {
    100
}

fn default_mission_ms() -> u64 {
    15_000
}

fn default_params_ms() -> u64 {
    5_000
}

fn default_restore_ms() -> u64 {
    5_000
}

fn default_terminate_grace_ms() -> u64 {
    5_000
}

fn default_criu_binary() -> String {
    "criu".into()
}

fn default_waypoints() -> Vec<WaypointConfig> {
    vec![
        WaypointConfig {
            lat: 45.467_117_2,
            lon: -73.757_837_2,
            alt: 6.096,
        },
        WaypointConfig {
            lat: 45.483_829_38,
            lon: -73.735_463_48,
            alt: 6.096,
        },
    ]
}

fn default_accept_radius() -> f32 {
    5.0
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory layout.
    pub paths: PathsConfig,
    /// Simulator launch settings.
    pub simulation: SimulationConfig,
    /// Worker pool sizing.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Telemetry timeouts.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Stabilization delays.
    #[serde(default)]
    pub settle: SettleConfig,
    /// Checkpoint facility invocation.
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    /// Fixed mission.
    #[serde(default)]
    pub mission: MissionConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and resolve relative paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Path of the simulator executable; discovery matches on it.
    #[must_use]
    pub fn simulator_binary(&self) -> PathBuf {
        self.paths.build_dir.join("bin").join("px4")
    }

    /// Telemetry port for an instance index.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the port would exceed `u16::MAX`.
    pub fn telemetry_port(&self, index: usize) -> Result<u16> {
        u16::try_from(index)
            .ok()
            .and_then(|offset| self.simulation.base_port.checked_add(offset))
            .ok_or_else(|| {
                AppError::Config(format!(
                    "instance {index} has no valid port above base {}",
                    self.simulation.base_port
                ))
            })
    }

    /// Scoring window: one simulated second of wall-clock time.
    #[must_use]
    pub fn score_window(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.simulation.speed)
    }

    /// Per-message telemetry read timeout.
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.telemetry.read_timeout_ms)
    }

    /// Maximum wait for a booting instance's first heartbeat.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.telemetry.heartbeat_timeout_ms)
    }

    /// Load the ordered parameter names from the configured parameter file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file is unreadable or not a JSON
    /// object of numbers.
    pub fn load_param_defaults(&self) -> Result<ParamDefaults> {
        ParamDefaults::load_from_path(&self.paths.param_file)
    }

    fn validate(&mut self) -> Result<()> {
        if !(self.simulation.speed.is_finite() && self.simulation.speed > 0.0) {
            return Err(AppError::Config(
                "simulation.speed must be a positive number".into(),
            ));
        }

        if self.simulation.instance_count == 0 {
            return Err(AppError::Config(
                "simulation.instance_count must be greater than zero".into(),
            ));
        }

        if self.simulation.instance_count > 1 {
            self.telemetry_port(self.simulation.instance_count - 1)?;
        }

        if self.mission.waypoints.is_empty() {
            return Err(AppError::Config(
                "mission.waypoints must not be empty".into(),
            ));
        }

        if self.telemetry.read_timeout_ms == 0 {
            return Err(AppError::Config(
                "telemetry.read_timeout_ms must be greater than zero".into(),
            ));
        }

        let root = self.paths.root_dir.clone();
        for path in [
            &mut self.paths.working_dir,
            &mut self.paths.build_dir,
            &mut self.paths.images_dir,
            &mut self.paths.param_file,
        ] {
            if path.is_relative() {
                *path = root.join(&*path);
            }
        }

        if self.paths.working_dir == self.paths.images_dir {
            return Err(AppError::Config(
                "paths.images_dir must differ from paths.working_dir".into(),
            ));
        }

        if !self.simulator_binary().exists() {
            warn!(
                binary = %self.simulator_binary().display(),
                "simulator binary not found; launch will fail"
            );
        }

        Ok(())
    }
}

/// Ordered parameter names with their default values.
///
/// Key order in the JSON file defines the order of every parameter vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDefaults {
    entries: Vec<(String, f32)>,
}

impl ParamDefaults {
    /// Read a parameter file from disk.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` on read or parse failure.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref()).map_err(|err| {
            AppError::Config(format!(
                "failed to read param file {}: {err}",
                path.as_ref().display()
            ))
        })?;
        Self::from_json_str(&raw)
    }

    /// Parse a JSON object of `name: default` pairs, preserving key order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the document is not an object of
    /// numbers or a name exceeds the 16-byte MAVLink parameter id.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(raw)?;
        let mut entries = Vec::with_capacity(map.len());

        for (name, value) in map {
            if name.is_empty() || name.len() > crate::mavlink::messages::PARAM_ID_LEN {
                return Err(AppError::Config(format!(
                    "parameter name {name:?} must be 1-16 bytes"
                )));
            }
            let default = value.as_f64().ok_or_else(|| {
                AppError::Config(format!("parameter {name} default is not a number"))
            })?;
            #[allow(clippy::cast_possible_truncation)]
            entries.push((name, default as f32));
        }

        Ok(Self { entries })
    }

    /// Parameter names in vector order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Default value vector in name order.
    #[must_use]
    pub fn default_vector(&self) -> Vec<f32> {
        self.entries.iter().map(|(_, value)| *value).collect()
    }

    /// Number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the file declared no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pair each name with the matching vector element.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Param` if the vector is longer than the name
    /// list; a shorter vector leaves the trailing parameters untouched.
    pub fn zip_values<'a>(&'a self, values: &'a [f32]) -> Result<Vec<(&'a str, f32)>> {
        if values.len() > self.entries.len() {
            return Err(AppError::Param(format!(
                "vector has {} values but only {} parameter names are known",
                values.len(),
                self.entries.len()
            )));
        }
        Ok(self.names().zip(values.iter().copied()).collect())
    }
}
