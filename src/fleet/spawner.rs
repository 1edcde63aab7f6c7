//! Simulator process spawner.
//!
//! Each instance is one simulator child process started from the build
//! directory with `kill_on_drop(true)`, its own working directory, and the
//! simulator environment variables. In daemon mode output goes to
//! `<working_dir>/log/<index>.log`.

use std::fs::{self, File};
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::info;

use crate::config::GlobalConfig;
use crate::models::Instance;
use crate::{AppError, Result};

/// Log file of a daemon-mode instance.
#[must_use]
pub fn log_path(config: &GlobalConfig, index: usize) -> PathBuf {
    config
        .paths
        .working_dir
        .join("log")
        .join(format!("{index}.log"))
}

/// Build the launch command for instance `index` without spawning it.
#[must_use]
pub fn simulator_command(
    config: &GlobalConfig,
    instance: &Instance,
    speed: f64,
    daemon: bool,
) -> Command {
    let build = &config.paths.build_dir;
    let mut cmd = Command::new(config.simulator_binary());
    cmd.arg("-i").arg(instance.index.to_string());
    if daemon {
        cmd.arg("-d");
    }
    cmd.arg(build.join("etc"))
        .arg("-w")
        .arg(&instance.working_dir)
        .arg("-s")
        .arg(build.join("etc").join("init.d-posix").join("rcS"))
        .env("PX4_SIMULATOR", &config.simulation.simulator)
        .env(
            "PX4_SYS_AUTOSTART",
            config.simulation.autostart_id.to_string(),
        )
        .env("PX4_SIM_SPEED_FACTOR", speed.to_string())
        .current_dir(&instance.working_dir)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    cmd
}

/// Create the instance directory and start its simulator.
///
/// # Errors
///
/// Returns `AppError::Fleet` if the directory, log file, or process cannot
/// be created.
pub fn spawn_simulator(
    config: &GlobalConfig,
    index: usize,
    speed: f64,
    daemon: bool,
) -> Result<(Instance, Child)> {
    let mut instance = Instance::new(
        index,
        config.telemetry_port(index)?,
        &config.paths.working_dir,
    );
    fs::create_dir_all(&instance.working_dir).map_err(|err| {
        AppError::Fleet(format!(
            "failed to create {}: {err}",
            instance.working_dir.display()
        ))
    })?;

    let mut cmd = simulator_command(config, &instance, speed, daemon);
    if daemon {
        let log = log_path(config, index);
        let stdout = File::create(&log).map_err(|err| {
            AppError::Fleet(format!("failed to create {}: {err}", log.display()))
        })?;
        let stderr = stdout
            .try_clone()
            .map_err(|err| AppError::Fleet(format!("failed to clone log handle: {err}")))?;
        cmd.stdout(Stdio::from(stdout)).stderr(Stdio::from(stderr));
    }

    let child = cmd.spawn().map_err(|err| {
        AppError::Fleet(format!(
            "failed to spawn {}: {err}",
            config.simulator_binary().display()
        ))
    })?;

    instance.process_id = child.id();
    info!(
        index,
        pid = instance.process_id.unwrap_or(0),
        port = instance.telemetry_port,
        "simulator spawned"
    );
    Ok((instance, child))
}
