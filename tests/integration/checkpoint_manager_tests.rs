//! Integration tests for the checkpoint manager: fleet images on disk and
//! criu job handling with stand-in binaries.

use std::sync::Arc;

use serial_test::serial;
use sitl_fleet::checkpoint::{CheckpointManager, DivergenceKind};
use sitl_fleet::fleet::{FleetManager, ProcessEntry, ProcessTable};
use sitl_fleet::pool::WorkerPool;
use sitl_fleet::{AppError, GlobalConfig, Result};

use super::test_helpers::test_config;

fn manager(config: &Arc<GlobalConfig>) -> CheckpointManager {
    CheckpointManager::new(Arc::clone(config), WorkerPool::new(2))
}

/// Process table that always reports the same simulator processes.
struct FixedTable(Vec<ProcessEntry>);

impl ProcessTable for FixedTable {
    fn list(&self) -> Result<Vec<ProcessEntry>> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn fleet_image_save_verify_recover() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = Arc::new(test_config(tmp.path(), 2, "true"));
    let checkpoints = manager(&config);
    let live = config.paths.working_dir.clone();

    std::fs::create_dir_all(live.join("instance/instance_0")).expect("mkdir");
    std::fs::write(live.join("instance/instance_0/parameters.bson"), "p0").expect("write");
    std::fs::write(live.join("log.txt"), "boot").expect("write");

    let saved = checkpoints.save_fleet_image().await.expect("save");
    assert_eq!(saved, 2);
    assert!(checkpoints.verify_fleet_image().await.expect("verify").is_empty());

    std::fs::write(live.join("log.txt"), "changed").expect("modify");
    std::fs::remove_file(live.join("instance/instance_0/parameters.bson")).expect("delete");
    std::fs::write(live.join("extra.txt"), "new").expect("add");

    let mut divergences = checkpoints.verify_fleet_image().await.expect("verify");
    divergences.sort_by(|a, b| a.file_path.cmp(&b.file_path));
    let kinds: Vec<(&str, DivergenceKind)> = divergences
        .iter()
        .map(|d| (d.file_path.as_str(), d.kind))
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("extra.txt", DivergenceKind::Added),
            ("instance/instance_0/parameters.bson", DivergenceKind::Deleted),
            ("log.txt", DivergenceKind::Modified),
        ]
    );

    checkpoints.recover_fleet_image().await.expect("recover");
    assert!(!live.join("extra.txt").exists());
    assert_eq!(
        std::fs::read_to_string(live.join("log.txt")).expect("read"),
        "boot"
    );
    assert!(checkpoints.verify_fleet_image().await.expect("verify").is_empty());
}

#[tokio::test]
async fn recover_without_image_is_not_found() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = Arc::new(test_config(tmp.path(), 1, "true"));

    let err = manager(&config)
        .recover_fleet_image()
        .await
        .expect_err("no image");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn restore_without_snapshot_is_not_found() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = Arc::new(test_config(tmp.path(), 1, "true"));

    let err = manager(&config).restore_one(4).expect_err("no snapshot");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
#[serial]
async fn dump_all_prepares_fresh_image_dirs() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = Arc::new(test_config(tmp.path(), 2, "true"));
    let checkpoints = manager(&config);

    let stale = checkpoints.image_dir(0).join("core-1.img");
    std::fs::create_dir_all(checkpoints.image_dir(0)).expect("mkdir");
    std::fs::write(&stale, "old").expect("write");

    let outcomes = checkpoints.dump_all(&[(0, 4001), (1, 4002)]).await;
    let indices: Vec<usize> = outcomes.iter().map(|(index, _)| *index).collect();
    assert_eq!(indices, vec![0, 1]);
    assert!(outcomes.iter().all(|(_, outcome)| outcome.is_ok()));
    assert!(checkpoints.image_dir(0).is_dir());
    assert!(checkpoints.image_dir(1).is_dir());
    assert!(!stale.exists());
}

#[tokio::test]
#[serial]
async fn failing_criu_reports_per_instance_errors() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = Arc::new(test_config(tmp.path(), 2, "false"));
    let checkpoints = manager(&config);

    let outcomes = checkpoints.dump_all(&[(0, 4001), (1, 4002)]).await;
    assert_eq!(outcomes.len(), 2);
    for (_, outcome) in &outcomes {
        assert!(matches!(outcome, Err(AppError::Checkpoint(msg)) if msg.contains("dump.log")));
    }
}

#[tokio::test]
#[serial]
async fn restore_all_maps_discovered_processes() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = Arc::new(test_config(tmp.path(), 3, "true"));
    let checkpoints = manager(&config);
    for index in 0..2 {
        std::fs::create_dir_all(checkpoints.image_dir(index)).expect("mkdir");
    }

    let binary = config.simulator_binary().display().to_string();
    let table = FixedTable(vec![
        ProcessEntry {
            pid: 7100,
            command_line: format!("{binary} -i 0 -d etc"),
        },
        ProcessEntry {
            pid: 7101,
            command_line: format!("{binary} -i 1 -d etc"),
        },
        ProcessEntry {
            pid: 7102,
            command_line: format!("{binary} -i 2 -d etc"),
        },
    ]);
    let fleet = FleetManager::with_process_table(Arc::clone(&config), Arc::new(table))
        .expect("fleet manager");

    let restored = checkpoints.restore_all(&[0, 1], &fleet).await;
    assert_eq!(restored.len(), 2);
    assert_eq!(restored.get(&0), Some(&7100));
    assert_eq!(restored.get(&1), Some(&7101));
    assert!(!restored.contains_key(&2));
}

#[tokio::test]
#[serial]
async fn restore_all_gives_up_after_settle_window() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = Arc::new(test_config(tmp.path(), 1, "true"));
    let checkpoints = manager(&config);
    std::fs::create_dir_all(checkpoints.image_dir(0)).expect("mkdir");

    let fleet = FleetManager::with_process_table(
        Arc::clone(&config),
        Arc::new(FixedTable(Vec::new())),
    )
    .expect("fleet manager");

    let started = std::time::Instant::now();
    let restored = checkpoints.restore_all(&[0], &fleet).await;
    assert!(restored.is_empty());
    assert!(started.elapsed() >= std::time::Duration::from_millis(100));
}
