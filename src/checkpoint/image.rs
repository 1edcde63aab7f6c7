//! Fleet image trees: recursive copy and content-hash comparison.
//!
//! A fleet image is a full copy of the simulator working tree (instance
//! directories, logs, and per-instance checkpoint images). Comparison
//! hashes every regular file with SHA-256 and reports divergences by
//! relative path.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::{AppError, Result};

/// A file that differs between a saved image and the live tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DivergenceEntry {
    /// Path relative to the tree root, `/`-separated.
    pub file_path: String,
    /// Kind of divergence.
    pub kind: DivergenceKind,
}

/// The type of file divergence, relative to the saved image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergenceKind {
    /// File content has changed.
    Modified,
    /// File exists in the image but not in the live tree.
    Deleted,
    /// File exists in the live tree but not in the image.
    Added,
}

/// Remove `path` recursively; a missing path is not an error.
///
/// # Errors
///
/// Returns the underlying I/O error for any other failure.
pub fn remove_tree(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Copy directory `src` to `dst` recursively, recreating symlinks.
///
/// Returns the number of regular files copied.
///
/// # Errors
///
/// Returns the first I/O error encountered.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<u64> {
    fs::create_dir_all(dst)?;
    let mut copied = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copied += copy_tree(&from, &to)?;
        } else if file_type.is_symlink() {
            copy_symlink(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    let target = fs::read_link(from)?;
    std::os::unix::fs::symlink(target, to)
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    fs::copy(from, to).map(|_| ())
}

/// Compute SHA-256 hashes for all regular files under `root`, recursively.
///
/// Keys are `/`-separated paths relative to `root`; symlinks are not followed.
///
/// # Errors
///
/// Returns `AppError::Checkpoint` if `root` or a subdirectory cannot be read.
pub fn hash_tree(root: &Path) -> Result<HashMap<String, String>> {
    let mut hashes = HashMap::new();
    hash_dir(root, root, &mut hashes)?;
    Ok(hashes)
}

fn hash_dir(root: &Path, dir: &Path, hashes: &mut HashMap<String, String>) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|err| {
        AppError::Checkpoint(format!("cannot read directory {}: {err}", dir.display()))
    })?;

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            hash_dir(root, &path, hashes)?;
        } else if file_type.is_file() {
            if let Ok(digest) = sha256_file(&path) {
                let rel = path
                    .strip_prefix(root)
                    .unwrap_or(&path)
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                hashes.insert(rel, digest);
            }
        }
    }
    Ok(())
}

/// Compare image hashes against live-tree hashes, sorted by path.
#[must_use]
pub fn find_divergences(
    image_hashes: &HashMap<String, String>,
    live_hashes: &HashMap<String, String>,
) -> Vec<DivergenceEntry> {
    let mut diverged = Vec::new();

    for (file, old_hash) in image_hashes {
        match live_hashes.get(file) {
            Some(new_hash) if new_hash != old_hash => diverged.push(DivergenceEntry {
                file_path: file.clone(),
                kind: DivergenceKind::Modified,
            }),
            None => diverged.push(DivergenceEntry {
                file_path: file.clone(),
                kind: DivergenceKind::Deleted,
            }),
            _ => {}
        }
    }

    for file in live_hashes.keys() {
        if !image_hashes.contains_key(file) {
            diverged.push(DivergenceEntry {
                file_path: file.clone(),
                kind: DivergenceKind::Added,
            });
        }
    }

    diverged.sort_by(|a, b| a.file_path.cmp(&b.file_path));
    diverged
}

/// Hex SHA-256 of the file at `path`, read in chunks.
///
/// # Errors
///
/// Returns the I/O error from opening or reading the file.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}
