//! `criu` invocation and job handles.

use std::ffi::OsString;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::config::CheckpointConfig;
use crate::{AppError, Result};

/// Log file criu writes inside the image directory on dump.
pub const DUMP_LOG: &str = "dump.log";
/// Log file criu writes inside the image directory on restore.
pub const RESTORE_LOG: &str = "restore.log";

/// Which criu action a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// `criu dump`
    Dump,
    /// `criu restore`
    Restore,
}

impl Display for JobKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dump => f.write_str("dump"),
            Self::Restore => f.write_str("restore"),
        }
    }
}

/// Full argument vector, program first, for dumping `pid` into `image_dir`.
#[must_use]
pub fn dump_argv(config: &CheckpointConfig, image_dir: &Path, pid: u32) -> Vec<OsString> {
    let mut argv = prefix(config);
    argv.extend(["dump", "-D"].map(OsString::from));
    argv.push(image_dir.as_os_str().to_owned());
    argv.extend(["-j", "--tcp-established", "--file-locks", "-t"].map(OsString::from));
    argv.push(pid.to_string().into());
    argv.push("-o".into());
    argv.push(DUMP_LOG.into());
    if config.leave_running {
        argv.push("-R".into());
    }
    argv
}

/// Full argument vector, program first, for restoring from `image_dir`.
///
/// `-d` detaches the restored tree so criu's own exit marks completion.
#[must_use]
pub fn restore_argv(config: &CheckpointConfig, image_dir: &Path) -> Vec<OsString> {
    let mut argv = prefix(config);
    argv.extend(["restore", "-D"].map(OsString::from));
    argv.push(image_dir.as_os_str().to_owned());
    argv.extend(["-j", "--tcp-established", "-d", "-o", RESTORE_LOG].map(OsString::from));
    argv
}

fn prefix(config: &CheckpointConfig) -> Vec<OsString> {
    let mut argv = Vec::new();
    if config.use_sudo {
        argv.push("sudo".into());
    }
    argv.push(config.criu_binary.clone().into());
    argv
}

/// A running criu process for one instance.
#[derive(Debug)]
pub struct CheckpointJob {
    index: usize,
    kind: JobKind,
    log: PathBuf,
    child: Child,
}

impl CheckpointJob {
    /// Spawn `argv` as a criu job.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Checkpoint` if `argv` is empty or the process
    /// cannot be spawned.
    pub fn spawn(index: usize, kind: JobKind, argv: &[OsString], log: PathBuf) -> Result<Self> {
        let Some((program, args)) = argv.split_first() else {
            return Err(AppError::Checkpoint("empty criu command".into()));
        };
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| {
                AppError::Checkpoint(format!(
                    "failed to spawn criu {kind} for instance {index}: {err}"
                ))
            })?;
        Ok(Self {
            index,
            kind,
            log,
            child,
        })
    }

    /// Fleet index this job operates on.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Dump or restore.
    #[must_use]
    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Wait for criu to exit.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Checkpoint` if waiting fails or criu exits
    /// unsuccessfully.
    pub async fn wait(mut self) -> Result<()> {
        let status = self.child.wait().await.map_err(|err| {
            AppError::Checkpoint(format!(
                "failed to wait for criu {} of instance {}: {err}",
                self.kind, self.index
            ))
        })?;
        if status.success() {
            Ok(())
        } else {
            Err(AppError::Checkpoint(format!(
                "criu {} of instance {} exited with {status}; see {}",
                self.kind,
                self.index,
                self.log.display()
            )))
        }
    }
}
