//! Checkpoint/restore of simulator processes and fleet images.
//!
//! Per-instance snapshots live under `<working_dir>/criu_img_dir/px4_<index>_img`
//! and are produced and consumed by `criu`. A fleet image is a copy of the
//! whole working tree kept in `images_dir`, so a fleet can be restored after
//! the live tree has been overwritten by later runs.

pub mod criu;
pub mod image;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::fleet::FleetManager;
use crate::pool::WorkerPool;
use crate::{AppError, Result};

pub use criu::{CheckpointJob, JobKind};
pub use image::{DivergenceEntry, DivergenceKind};

const DISCOVERY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Drives `criu` across the fleet and manages saved fleet images.
#[derive(Clone)]
pub struct CheckpointManager {
    config: Arc<GlobalConfig>,
    pool: WorkerPool,
}

impl CheckpointManager {
    /// Create a manager sharing `pool` for dump and restore fan-out.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>, pool: WorkerPool) -> Self {
        Self { config, pool }
    }

    /// Directory holding every per-instance snapshot.
    #[must_use]
    pub fn image_root(&self) -> PathBuf {
        self.config.paths.working_dir.join("criu_img_dir")
    }

    /// Snapshot directory of instance `index`.
    #[must_use]
    pub fn image_dir(&self, index: usize) -> PathBuf {
        self.image_root().join(format!("px4_{index}_img"))
    }

    /// Start dumping process `pid` as instance `index`.
    ///
    /// Any previous snapshot of `index` is removed first. Returns once criu
    /// has been spawned; await the job for the outcome.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Checkpoint` if the directory cannot be prepared or
    /// criu cannot be spawned.
    pub async fn dump_one(&self, index: usize, pid: u32) -> Result<CheckpointJob> {
        let dir = self.image_dir(index);
        let prepared = dir.clone();
        tokio::task::spawn_blocking(move || {
            image::remove_tree(&prepared)?;
            std::fs::create_dir_all(&prepared)
        })
        .await
        .map_err(|err| AppError::Checkpoint(format!("image dir task failed: {err}")))?
        .map_err(|err| {
            AppError::Checkpoint(format!("failed to prepare {}: {err}", dir.display()))
        })?;

        let argv = criu::dump_argv(&self.config.checkpoint, &dir, pid);
        let job = CheckpointJob::spawn(index, JobKind::Dump, &argv, dir.join(criu::DUMP_LOG))?;
        info!(index, pid, "criu dump started");
        Ok(job)
    }

    /// Dump every `(index, pid)` on the worker pool and wait for completion.
    ///
    /// Outcomes are returned in input order; failures are logged, not retried.
    pub async fn dump_all(&self, targets: &[(usize, u32)]) -> Vec<(usize, Result<()>)> {
        let span = info_span!("dump_all", count = targets.len());
        let manager = self.clone();
        let outcomes = self
            .pool
            .run_indexed(targets.to_vec(), move |(index, pid)| {
                let manager = manager.clone();
                async move { manager.dump_one(index, pid).await?.wait().await }
            })
            .instrument(span)
            .await;

        report(JobKind::Dump, targets.iter().map(|&(index, _)| index), outcomes)
    }

    /// Start restoring instance `index` from its snapshot.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no snapshot exists for `index`, or
    /// `AppError::Checkpoint` if criu cannot be spawned.
    pub fn restore_one(&self, index: usize) -> Result<CheckpointJob> {
        let dir = self.image_dir(index);
        if !dir.is_dir() {
            return Err(AppError::NotFound(format!(
                "no snapshot for instance {index} at {}",
                dir.display()
            )));
        }
        let argv = criu::restore_argv(&self.config.checkpoint, &dir);
        let job = CheckpointJob::spawn(index, JobKind::Restore, &argv, dir.join(criu::RESTORE_LOG))?;
        info!(index, "criu restore started");
        Ok(job)
    }

    /// Restore every index in parallel, then discover the restored processes.
    ///
    /// Discovery is polled until every requested index is visible or the
    /// restore settle time elapses. Returns the discovered mapping limited to
    /// `indices`; missing indices are logged.
    pub async fn restore_all(&self, indices: &[usize], fleet: &FleetManager) -> BTreeMap<usize, u32> {
        let span = info_span!("restore_all", count = indices.len());
        let manager = self.clone();
        let outcomes = self
            .pool
            .run_indexed(indices.to_vec(), move |index| {
                let manager = manager.clone();
                async move { manager.restore_one(index)?.wait().await }
            })
            .instrument(span)
            .await;
        report(JobKind::Restore, indices.iter().copied(), outcomes);

        let settle = Duration::from_millis(self.config.settle.restore_ms);
        let deadline = Instant::now() + settle;
        let mut found = loop {
            let found = fleet.discover_process_ids().await;
            let complete = indices.iter().all(|index| found.contains_key(index));
            if complete || Instant::now() >= deadline {
                break found;
            }
            tokio::time::sleep(DISCOVERY_POLL_INTERVAL).await;
        };
        found.retain(|index, _| indices.contains(index));

        for index in indices.iter().filter(|index| !found.contains_key(*index)) {
            warn!(index, "restored instance not discovered");
        }
        info!(restored = found.len(), "fleet restore finished");
        found
    }

    /// Replace the saved fleet image with a copy of the live working tree.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Checkpoint` if the copy fails.
    pub async fn save_fleet_image(&self) -> Result<u64> {
        let live = self.config.paths.working_dir.clone();
        let saved = self.config.paths.images_dir.clone();
        let copied = replace_tree(live, saved).await?;
        info!(files = copied, "fleet image saved");
        Ok(copied)
    }

    /// Replace the live working tree with the saved fleet image.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no image was saved, or
    /// `AppError::Checkpoint` if the copy fails.
    pub async fn recover_fleet_image(&self) -> Result<u64> {
        let saved = self.config.paths.images_dir.clone();
        if !saved.is_dir() {
            return Err(AppError::NotFound(format!(
                "no fleet image at {}",
                saved.display()
            )));
        }
        let live = self.config.paths.working_dir.clone();
        let copied = replace_tree(saved, live).await?;
        info!(files = copied, "fleet image recovered");
        Ok(copied)
    }

    /// Compare the saved fleet image with the live working tree.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Checkpoint` if either tree cannot be read.
    pub async fn verify_fleet_image(&self) -> Result<Vec<DivergenceEntry>> {
        let saved = self.config.paths.images_dir.clone();
        let live = self.config.paths.working_dir.clone();
        let divergences = tokio::task::spawn_blocking(move || {
            let image_hashes = image::hash_tree(&saved)?;
            let live_hashes = image::hash_tree(&live)?;
            Ok::<_, AppError>(image::find_divergences(&image_hashes, &live_hashes))
        })
        .await
        .map_err(|err| AppError::Checkpoint(format!("verify task failed: {err}")))??;

        if divergences.is_empty() {
            info!("fleet image matches working tree");
        } else {
            warn!(
                diverged_count = divergences.len(),
                "fleet image diverges from working tree"
            );
        }
        Ok(divergences)
    }
}

async fn replace_tree(src: PathBuf, dst: PathBuf) -> Result<u64> {
    tokio::task::spawn_blocking(move || {
        image::remove_tree(&dst)?;
        image::copy_tree(&src, &dst)
    })
    .await
    .map_err(|err| AppError::Checkpoint(format!("copy task failed: {err}")))?
    .map_err(|err| AppError::Checkpoint(format!("tree copy failed: {err}")))
}

fn report(
    kind: JobKind,
    indices: impl Iterator<Item = usize>,
    outcomes: Vec<Result<()>>,
) -> Vec<(usize, Result<()>)> {
    let results: Vec<(usize, Result<()>)> = indices.zip(outcomes).collect();
    let failed = results.iter().filter(|(_, outcome)| outcome.is_err()).count();
    for (index, outcome) in &results {
        if let Err(err) = outcome {
            warn!(index, %kind, %err, "checkpoint job failed");
        }
    }
    info!(%kind, total = results.len(), failed, "checkpoint jobs finished");
    results
}
