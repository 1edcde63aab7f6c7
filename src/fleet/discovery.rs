//! Simulator process discovery from the OS process table.
//!
//! Simulators are recognised by the simulator binary path in their command
//! line; the fleet index is recovered from the `-i <index>` launch argument.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use regex::Regex;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// One row of the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    /// OS process id.
    pub pid: u32,
    /// Space-joined argument vector.
    pub command_line: String,
}

/// Source of the OS process list.
pub trait ProcessTable: Send + Sync {
    /// List all visible processes.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Fleet`] if the process table cannot be read.
    fn list(&self) -> Result<Vec<ProcessEntry>>;
}

/// Process table read from a `/proc` file system.
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl ProcFs {
    /// Read from `/proc`.
    #[must_use]
    pub fn new() -> Self {
        Self::at("/proc")
    }

    /// Read from an alternative mount point.
    #[must_use]
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for ProcFs {
    fn list(&self) -> Result<Vec<ProcessEntry>> {
        let dir = fs::read_dir(&self.root).map_err(|err| {
            AppError::Fleet(format!(
                "failed to read process table at {}: {err}",
                self.root.display()
            ))
        })?;

        let mut entries = Vec::new();
        for entry in dir.flatten() {
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u32>().ok())
            else {
                continue;
            };
            // Processes may exit between listing and reading.
            let Ok(raw) = fs::read(entry.path().join("cmdline")) else {
                continue;
            };
            let command_line = raw
                .split(|&b| b == 0)
                .filter(|arg| !arg.is_empty())
                .map(String::from_utf8_lossy)
                .collect::<Vec<_>>()
                .join(" ");
            if !command_line.is_empty() {
                entries.push(ProcessEntry { pid, command_line });
            }
        }
        Ok(entries)
    }
}

/// Matches simulator command lines and extracts their fleet index.
#[derive(Debug, Clone)]
pub struct SimulatorMatcher {
    binary: String,
    index_arg: Regex,
}

impl SimulatorMatcher {
    /// Matcher for processes started from `binary`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Fleet`] if the index pattern fails to compile.
    pub fn new(binary: impl Into<String>) -> Result<Self> {
        let index_arg = Regex::new(r"-i\s+(\d+)")
            .map_err(|err| AppError::Fleet(format!("invalid index pattern: {err}")))?;
        Ok(Self {
            binary: binary.into(),
            index_arg,
        })
    }

    /// Whether `command_line` belongs to a simulator process.
    #[must_use]
    pub fn is_simulator(&self, command_line: &str) -> bool {
        command_line.contains(&self.binary)
    }

    /// Fleet index of a simulator command line.
    #[must_use]
    pub fn index_of(&self, command_line: &str) -> Option<usize> {
        if !self.is_simulator(command_line) {
            return None;
        }
        self.index_arg
            .captures(command_line)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    /// Process ids of every simulator, except `own_pid`.
    #[must_use]
    pub fn simulator_pids(&self, entries: &[ProcessEntry], own_pid: u32) -> Vec<u32> {
        entries
            .iter()
            .filter(|entry| entry.pid != own_pid && self.is_simulator(&entry.command_line))
            .map(|entry| entry.pid)
            .collect()
    }

    /// Map fleet index to process id; on duplicate indices the last entry wins.
    #[must_use]
    pub fn match_simulators(&self, entries: &[ProcessEntry], own_pid: u32) -> BTreeMap<usize, u32> {
        let mut found = BTreeMap::new();
        for entry in entries.iter().filter(|entry| entry.pid != own_pid) {
            let Some(index) = self.index_of(&entry.command_line) else {
                continue;
            };
            debug!(index, pid = entry.pid, "simulator process found");
            if let Some(previous) = found.insert(index, entry.pid) {
                warn!(
                    index,
                    previous,
                    pid = entry.pid,
                    "duplicate simulator index, keeping the later process"
                );
            }
        }
        found
    }
}
