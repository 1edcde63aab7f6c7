//! Fleet lifecycle: launch, discovery, and teardown of simulator processes.

pub mod discovery;
pub mod signal;
pub mod spawner;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::models::Instance;
use crate::{AppError, Result};

pub use discovery::{ProcFs, ProcessEntry, ProcessTable, SimulatorMatcher};
use signal::StopSignal;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct Tracked {
    instance: Instance,
    child: Option<Child>,
}

/// Owns the set of simulator processes of the current fleet.
pub struct FleetManager {
    config: Arc<GlobalConfig>,
    table: Arc<dyn ProcessTable>,
    matcher: SimulatorMatcher,
    tracked: Mutex<BTreeMap<usize, Tracked>>,
}

impl FleetManager {
    /// Fleet manager reading the host `/proc` table.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Fleet` if the simulator matcher cannot be built.
    pub fn new(config: Arc<GlobalConfig>) -> Result<Self> {
        Self::with_process_table(config, Arc::new(ProcFs::new()))
    }

    /// Fleet manager over an explicit process table.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Fleet` if the simulator matcher cannot be built.
    pub fn with_process_table(
        config: Arc<GlobalConfig>,
        table: Arc<dyn ProcessTable>,
    ) -> Result<Self> {
        let matcher = SimulatorMatcher::new(config.simulator_binary().to_string_lossy())?;
        Ok(Self {
            config,
            table,
            matcher,
            tracked: Mutex::new(BTreeMap::new()),
        })
    }

    /// Start `count` simulators on a freshly reset working tree.
    ///
    /// Every pre-existing simulator on the host is stopped first. A spawn
    /// failure stops the instances already started and aborts the launch.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Fleet` if the working tree cannot be reset or any
    /// simulator fails to spawn.
    pub async fn launch_all(&self, count: usize, speed: f64, daemon: bool) -> Result<Vec<Instance>> {
        let span = info_span!("launch_all", count, speed, daemon);
        self.launch_fleet(count, speed, daemon)
            .instrument(span)
            .await
    }

    async fn launch_fleet(&self, count: usize, speed: f64, daemon: bool) -> Result<Vec<Instance>> {
        self.terminate_all().await;
        self.kill_stray_simulators().await;
        self.reset_working_tree().await?;

        let mut launched = Vec::with_capacity(count);
        for index in 0..count {
            match spawner::spawn_simulator(&self.config, index, speed, daemon) {
                Ok((instance, child)) => {
                    launched.push(instance.clone());
                    self.tracked.lock().await.insert(
                        index,
                        Tracked {
                            instance,
                            child: Some(child),
                        },
                    );
                }
                Err(err) => {
                    warn!(index, %err, "launch aborted");
                    self.terminate_all().await;
                    return Err(err);
                }
            }
        }

        info!(count, "fleet launched");
        Ok(launched)
    }

    /// Map fleet index to process id by scanning the process table.
    ///
    /// Never fails: an unreadable table or an empty result is logged and an
    /// empty map is returned. Discovered ids are adopted into the tracked set.
    pub async fn discover_process_ids(&self) -> BTreeMap<usize, u32> {
        let entries = match self.table.list() {
            Ok(entries) => entries,
            Err(err) => {
                warn!(%err, "process discovery failed");
                return BTreeMap::new();
            }
        };

        let found = self.matcher.match_simulators(&entries, std::process::id());
        if found.is_empty() {
            info!("no simulator processes found");
            return found;
        }

        let mut tracked = self.tracked.lock().await;
        for (&index, &pid) in &found {
            match tracked.get_mut(&index) {
                Some(entry) => entry.instance.process_id = Some(pid),
                None => match self.config.telemetry_port(index) {
                    Ok(port) => {
                        let mut instance =
                            Instance::new(index, port, &self.config.paths.working_dir);
                        instance.process_id = Some(pid);
                        tracked.insert(
                            index,
                            Tracked {
                                instance,
                                child: None,
                            },
                        );
                    }
                    Err(err) => warn!(index, %err, "ignoring discovered simulator"),
                },
            }
        }

        info!(count = found.len(), "simulator processes discovered");
        found
    }

    /// Stop every tracked simulator: SIGTERM, grace period, then SIGKILL.
    ///
    /// Failures are logged per instance; the tracked set is emptied.
    pub async fn terminate_all(&self) {
        let drained: Vec<Tracked> = {
            let mut tracked = self.tracked.lock().await;
            std::mem::take(&mut *tracked).into_values().collect()
        };
        if drained.is_empty() {
            return;
        }

        let span = info_span!("terminate_all", count = drained.len());
        async {
            let grace = Duration::from_millis(self.config.settle.terminate_grace_ms);
            let deadline = Instant::now() + grace;

            for entry in &drained {
                if let Some(pid) = entry.instance.process_id {
                    if let Err(err) = signal::send(pid, StopSignal::Terminate) {
                        warn!(index = entry.instance.index, pid, %err, "failed to send SIGTERM");
                    }
                }
            }

            let mut orphans = Vec::new();
            for entry in drained {
                let index = entry.instance.index;
                match (entry.child, entry.instance.process_id) {
                    (Some(mut child), _) => stop_child(index, &mut child, deadline).await,
                    (None, Some(pid)) => orphans.push(pid),
                    (None, None) => {}
                }
            }
            reap_pids(&orphans, deadline).await;

            info!("fleet terminated");
        }
        .instrument(span)
        .await;
    }

    /// Stop simulators on the host that this manager does not track.
    pub async fn kill_stray_simulators(&self) {
        let entries = match self.table.list() {
            Ok(entries) => entries,
            Err(err) => {
                warn!(%err, "cannot list processes; stray simulators left running");
                return;
            }
        };
        let pids = self.matcher.simulator_pids(&entries, std::process::id());
        if pids.is_empty() {
            return;
        }

        info!(count = pids.len(), "stopping stray simulators");
        for &pid in &pids {
            if let Err(err) = signal::send(pid, StopSignal::Terminate) {
                warn!(pid, %err, "failed to send SIGTERM");
            }
        }
        let grace = Duration::from_millis(self.config.settle.terminate_grace_ms);
        reap_pids(&pids, Instant::now() + grace).await;
    }

    /// Snapshot of the tracked instances in index order.
    pub async fn instances(&self) -> Vec<Instance> {
        self.tracked
            .lock()
            .await
            .values()
            .map(|entry| entry.instance.clone())
            .collect()
    }

    /// Shared configuration.
    #[must_use]
    pub fn config(&self) -> &Arc<GlobalConfig> {
        &self.config
    }

    async fn reset_working_tree(&self) -> Result<()> {
        let root = self.config.paths.working_dir.clone();
        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(AppError::Fleet(format!(
                    "failed to clear {}: {err}",
                    root.display()
                )))
            }
        }
        for sub in ["instance", "log"] {
            let dir = root.join(sub);
            tokio::fs::create_dir_all(&dir).await.map_err(|err| {
                AppError::Fleet(format!("failed to create {}: {err}", dir.display()))
            })?;
        }
        Ok(())
    }
}

async fn stop_child(index: usize, child: &mut Child, deadline: Instant) {
    match tokio::time::timeout_at(deadline, child.wait()).await {
        Ok(Ok(exit)) => info!(index, ?exit, "simulator exited"),
        Ok(Err(err)) => warn!(index, %err, "error waiting for simulator"),
        Err(_) => {
            warn!(index, "simulator did not exit within grace period, forcing kill");
            if let Err(err) = child.kill().await {
                warn!(index, %err, "failed to force-kill simulator");
            }
        }
    }
}

async fn reap_pids(pids: &[u32], deadline: Instant) {
    let mut remaining: Vec<u32> = pids.to_vec();
    while !remaining.is_empty() && Instant::now() < deadline {
        remaining.retain(|&pid| signal::is_alive(pid));
        if !remaining.is_empty() {
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }
    remaining.retain(|&pid| signal::is_alive(pid));
    for pid in remaining {
        warn!(pid, "process did not exit within grace period, forcing kill");
        if let Err(err) = signal::send(pid, StopSignal::Kill) {
            warn!(pid, %err, "failed to force-kill process");
        }
    }
}
