//! Trial orchestration: one parameter batch in, one score array out.
//!
//! A trial brings up a fleet sized to the batch (cold launch or restore from
//! the saved fleet image), waits for every autopilot heartbeat, uploads and
//! starts the mission, injects each instance's parameter vector, scores the
//! fleet, and finally tears the fleet down or snapshots it for reuse. Steps
//! run strictly in sequence; the cancellation token is checked between them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::checkpoint::CheckpointManager;
use crate::config::{GlobalConfig, ParamDefaults};
use crate::fleet::FleetManager;
use crate::mavlink::ChannelFactory;
use crate::mission::{self, MissionPlan};
use crate::models::TrialReport;
use crate::pool::WorkerPool;
use crate::scoring::FitnessScorer;
use crate::{AppError, Result};

/// How the fleet for a trial is brought up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FleetSource {
    /// Launch fresh simulators and fly the mission from the start.
    Cold,
    /// Recover the saved fleet image and restore its snapshots.
    Restore,
}

/// What happens to the fleet after scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// Stop every simulator.
    Terminate,
    /// Dump every simulator and save the fleet image, then stop them.
    Snapshot,
}

/// Sequences trials over a shared fleet, pool, and telemetry factory.
pub struct TrialOrchestrator {
    config: Arc<GlobalConfig>,
    fleet: Arc<FleetManager>,
    checkpoints: CheckpointManager,
    scorer: FitnessScorer,
    channels: Arc<dyn ChannelFactory>,
    pool: WorkerPool,
    params: Arc<ParamDefaults>,
    plan: Arc<MissionPlan>,
    cancel: CancellationToken,
}

impl TrialOrchestrator {
    /// Wire an orchestrator from shared components.
    #[must_use]
    pub fn new(
        config: Arc<GlobalConfig>,
        fleet: Arc<FleetManager>,
        channels: Arc<dyn ChannelFactory>,
        params: ParamDefaults,
        cancel: CancellationToken,
    ) -> Self {
        let pool = WorkerPool::from_config(&config);
        Self {
            checkpoints: CheckpointManager::new(Arc::clone(&config), pool.clone()),
            scorer: FitnessScorer::from_config(&config),
            plan: Arc::new(MissionPlan::from_config(&config.mission)),
            config,
            fleet,
            channels,
            pool,
            params: Arc::new(params),
            cancel,
        }
    }

    /// Replace the scorer, e.g. to shorten the window.
    #[must_use]
    pub fn with_scorer(mut self, scorer: FitnessScorer) -> Self {
        self.scorer = scorer;
        self
    }

    /// Fleet manager driven by this orchestrator.
    #[must_use]
    pub fn fleet(&self) -> &Arc<FleetManager> {
        &self.fleet
    }

    /// Checkpoint manager driven by this orchestrator.
    #[must_use]
    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// Parameter names and defaults.
    #[must_use]
    pub fn params(&self) -> &ParamDefaults {
        &self.params
    }

    /// Run one trial; `report.scores()` is index-aligned with `param_group`.
    ///
    /// Per-instance failures score the sentinel and never abort the trial.
    /// On any trial-level error the fleet is terminated before returning.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an empty or ragged batch,
    /// `AppError::Param` if a vector is longer than the parameter list, the
    /// launch or image recovery error, or `AppError::Cancelled` on shutdown.
    pub async fn run_trial(
        &self,
        param_group: &[Vec<f32>],
        source: FleetSource,
        teardown: Teardown,
    ) -> Result<TrialReport> {
        self.validate_group(param_group)?;
        let span = info_span!("run_trial", count = param_group.len(), ?source, ?teardown);
        let result = self
            .trial_steps(param_group, source, teardown)
            .instrument(span)
            .await;
        if result.is_err() {
            self.fleet.terminate_all().await;
        }
        result
    }

    async fn trial_steps(
        &self,
        param_group: &[Vec<f32>],
        source: FleetSource,
        teardown: Teardown,
    ) -> Result<TrialReport> {
        let started_at = Utc::now();
        let count = param_group.len();
        let indices: Vec<usize> = (0..count).collect();

        self.ensure_active("fleet start")?;
        match source {
            FleetSource::Cold => {
                self.fleet
                    .launch_all(
                        count,
                        self.config.simulation.speed,
                        self.config.simulation.daemon,
                    )
                    .await?;
            }
            FleetSource::Restore => {
                self.checkpoints.recover_fleet_image().await?;
                self.checkpoints.restore_all(&indices, &self.fleet).await;
            }
        }

        self.ensure_active("readiness")?;
        let ready = self.await_readiness(&indices).await;

        if source == FleetSource::Cold {
            self.ensure_active("mission upload")?;
            self.start_missions(&ready).await;
            self.settle("mission", self.config.settle.mission_ms).await?;
        }

        self.ensure_active("parameter injection")?;
        let targets: Vec<(usize, Vec<f32>)> = ready
            .iter()
            .map(|&index| (index, param_group[index].clone()))
            .collect();
        self.apply_params(targets).await;
        self.settle("parameters", self.config.settle.params_ms).await?;

        self.ensure_active("scoring")?;
        let records = self
            .scorer
            .score_fleet(&self.pool, Arc::clone(&self.channels), &indices)
            .await;

        match teardown {
            Teardown::Terminate => self.fleet.terminate_all().await,
            Teardown::Snapshot => {
                self.snapshot_fleet().await?;
                self.fleet.terminate_all().await;
            }
        }

        let report = TrialReport::new(started_at, records);
        info!(
            trial_id = %report.trial_id,
            failed = report.failed_indices.len(),
            "trial finished"
        );
        Ok(report)
    }

    /// Build the fleet image that restored trials start from.
    ///
    /// Cold-launches `count` simulators, starts the mission, lets it settle,
    /// dumps every simulator, and saves the fleet image. Returns the indices
    /// dumped successfully.
    ///
    /// # Errors
    ///
    /// Returns the launch error, `AppError::Checkpoint` if no instance could
    /// be dumped or the image cannot be saved, or `AppError::Cancelled`.
    pub async fn prepare_snapshot(&self, count: usize) -> Result<Vec<usize>> {
        let span = info_span!("prepare_snapshot", count);
        let result = async {
            if count == 0 {
                return Err(AppError::Config("snapshot fleet size must be positive".into()));
            }
            let indices: Vec<usize> = (0..count).collect();
            self.fleet
                .launch_all(
                    count,
                    self.config.simulation.speed,
                    self.config.simulation.daemon,
                )
                .await?;

            self.ensure_active("readiness")?;
            let ready = self.await_readiness(&indices).await;
            self.ensure_active("mission upload")?;
            self.start_missions(&ready).await;
            self.settle("mission", self.config.settle.mission_ms).await?;

            self.ensure_active("snapshot")?;
            let dumped = self.snapshot_fleet().await?;
            self.fleet.terminate_all().await;
            Ok(dumped)
        }
        .instrument(span)
        .await;

        if result.is_err() {
            self.fleet.terminate_all().await;
        }
        result
    }

    /// Score `count` already running simulators once.
    pub async fn score_running_fleet(&self, count: usize) -> TrialReport {
        let started_at = Utc::now();
        let indices: Vec<usize> = (0..count).collect();
        let records = self
            .scorer
            .score_fleet(&self.pool, Arc::clone(&self.channels), &indices)
            .await;
        TrialReport::new(started_at, records)
    }

    fn validate_group(&self, param_group: &[Vec<f32>]) -> Result<()> {
        let Some(first) = param_group.first() else {
            return Err(AppError::Config("parameter batch is empty".into()));
        };
        if let Some(pos) = param_group.iter().position(|v| v.len() != first.len()) {
            return Err(AppError::Config(format!(
                "parameter vector {pos} has {} values, expected {}",
                param_group[pos].len(),
                first.len()
            )));
        }
        self.params.zip_values(first)?;
        Ok(())
    }

    fn ensure_active(&self, step: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            warn!(step, "trial cancelled");
            return Err(AppError::Cancelled(format!("stopped before {step}")));
        }
        Ok(())
    }

    async fn settle(&self, step: &str, millis: u64) -> Result<()> {
        info!(step, millis, "settling");
        tokio::select! {
            () = self.cancel.cancelled() => {
                Err(AppError::Cancelled(format!("interrupted during {step} settle")))
            }
            () = tokio::time::sleep(Duration::from_millis(millis)) => Ok(()),
        }
    }

    async fn await_readiness(&self, indices: &[usize]) -> Vec<usize> {
        let channels = Arc::clone(&self.channels);
        let timeout = self.config.heartbeat_timeout();
        let outcomes = self
            .pool
            .run_indexed(indices.to_vec(), move |index| {
                let channels = Arc::clone(&channels);
                async move {
                    let mut channel = channels.open(index).await?;
                    mission::wait_heartbeat(channel.as_mut(), timeout).await
                }
            })
            .instrument(info_span!("await_readiness", count = indices.len()))
            .await;

        let ready: Vec<usize> = indices
            .iter()
            .zip(outcomes)
            .filter_map(|(&index, outcome)| match outcome {
                Ok(_) => Some(index),
                Err(err) => {
                    warn!(index, %err, "instance not ready");
                    None
                }
            })
            .collect();
        info!(ready = ready.len(), total = indices.len(), "fleet readiness");
        ready
    }

    async fn start_missions(&self, indices: &[usize]) {
        let channels = Arc::clone(&self.channels);
        let plan = Arc::clone(&self.plan);
        let heartbeat = self.config.heartbeat_timeout();
        let exchange = Duration::from_millis(self.config.telemetry.mission_ack_timeout_ms);
        let outcomes = self
            .pool
            .run_indexed(indices.to_vec(), move |index| {
                let channels = Arc::clone(&channels);
                let plan = Arc::clone(&plan);
                async move {
                    let mut channel = channels.open(index).await?;
                    let target = mission::wait_heartbeat(channel.as_mut(), heartbeat).await?;
                    mission::upload_and_start(channel.as_mut(), target, &plan, exchange).await
                }
            })
            .instrument(info_span!("start_missions", count = indices.len()))
            .await;

        log_failures("mission start", indices, &outcomes);
    }

    async fn apply_params(&self, targets: Vec<(usize, Vec<f32>)>) {
        let indices: Vec<usize> = targets.iter().map(|(index, _)| *index).collect();
        let channels = Arc::clone(&self.channels);
        let params = Arc::clone(&self.params);
        let heartbeat = self.config.heartbeat_timeout();
        let interval = Duration::from_millis(self.config.telemetry.param_send_interval_ms);
        let outcomes = self
            .pool
            .run_indexed(targets, move |(index, values)| {
                let channels = Arc::clone(&channels);
                let params = Arc::clone(&params);
                async move {
                    let pairs = params.zip_values(&values)?;
                    let mut channel = channels.open(index).await?;
                    let target = mission::wait_heartbeat(channel.as_mut(), heartbeat).await?;
                    mission::apply_params(channel.as_mut(), target, &pairs, interval).await
                }
            })
            .instrument(info_span!("apply_params", count = indices.len()))
            .await;

        log_failures("parameter injection", &indices, &outcomes);
    }

    async fn snapshot_fleet(&self) -> Result<Vec<usize>> {
        let discovered: BTreeMap<usize, u32> = self.fleet.discover_process_ids().await;
        let targets: Vec<(usize, u32)> = discovered.into_iter().collect();
        let outcomes = self.checkpoints.dump_all(&targets).await;
        let dumped: Vec<usize> = outcomes
            .into_iter()
            .filter_map(|(index, outcome)| outcome.ok().map(|()| index))
            .collect();
        if dumped.is_empty() {
            return Err(AppError::Checkpoint("no simulator could be dumped".into()));
        }
        self.checkpoints.save_fleet_image().await?;
        Ok(dumped)
    }
}

fn log_failures<T>(step: &str, indices: &[usize], outcomes: &[Result<T>]) {
    let mut failed = 0usize;
    for (index, outcome) in indices.iter().zip(outcomes) {
        if let Err(err) = outcome {
            failed += 1;
            warn!(index, step, %err, "instance step failed");
        }
    }
    info!(step, failed, total = indices.len(), "fleet step finished");
}
