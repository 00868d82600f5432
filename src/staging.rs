//! Session-scoped staging directory for downloaded candidates.
//!
//! Each run gets `staging_dir/{batch_id}/{run_id}`; the whole run directory is
//! removed when the area is dropped, whatever the batch outcome.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::image_pipeline::write_bytes_atomic;
use crate::protocol::{Candidate, StagedImage};

/// Resolves a request for a staged file, refusing anything that is not a plain file name.
pub fn resolve_staged_file(run_dir: &Path, file_name: &str) -> Option<PathBuf> {
    let is_plain = !file_name.is_empty()
        && file_name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'))
        && !file_name.starts_with('.')
        && !file_name.contains("..");
    if !is_plain {
        return None;
    }
    let path = run_dir.join(file_name);
    path.is_file().then_some(path)
}

pub struct StagingArea {
    run_dir: PathBuf,
}

impl StagingArea {
    pub fn create(staging_root: &Path, batch_id: &str) -> io::Result<Self> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let run_dir = staging_root.join(batch_id).join(run_id);
        fs::create_dir_all(&run_dir)?;
        debug!("Staging: created {}", run_dir.display());
        Ok(Self { run_dir })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn staged_path(&self, entity_id: i64, rank: usize, extension: &str) -> PathBuf {
        self.run_dir.join(format!("{entity_id}_{rank}.{extension}"))
    }

    pub fn stage(
        &self,
        entity_id: i64,
        rank: usize,
        candidate: Candidate,
        bytes: &[u8],
        extension: &'static str,
        validation_note: String,
    ) -> io::Result<StagedImage> {
        let path = self.staged_path(entity_id, rank, extension);
        write_bytes_atomic(&path, bytes)?;
        Ok(StagedImage {
            rank,
            candidate,
            path,
            extension,
            validation_note,
            downloaded_at: chrono::Utc::now(),
        })
    }

    /// Removes every staged file belonging to `entity_id`.
    pub fn cleanup_entity(&self, entity_id: i64) -> usize {
        let prefix = format!("{entity_id}_");
        let Ok(entries) = fs::read_dir(&self.run_dir) else {
            return 0;
        };
        let mut removed = 0;
        for path in entries.filter_map(Result::ok).map(|entry| entry.path()) {
            let matches = path
                .file_name()
                .map(|name| name.to_string_lossy().starts_with(&prefix))
                .unwrap_or(false);
            if !matches {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(err) => warn!("Staging: failed to remove {}: {}", path.display(), err),
            }
        }
        removed
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_dir_all(&self.run_dir) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(
                    "Staging: failed to remove run directory {}: {}",
                    self.run_dir.display(),
                    err
                );
            }
        }
        if let Some(batch_dir) = self.run_dir.parent() {
            // Only succeeds once no other run of this batch is active.
            let _ = fs::remove_dir(batch_dir);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagingCleanupReport {
    pub removed_dirs: Vec<PathBuf>,
    pub bytes: u64,
}

fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(path) else {
        return 0;
    };
    entries
        .filter_map(Result::ok)
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                dir_size(&path)
            } else {
                entry.metadata().map(|meta| meta.len()).unwrap_or(0)
            }
        })
        .sum()
}

/// Removes leftover batch directories from crashed runs.
/// Callers must ensure no review session is running against `staging_root`.
pub fn clean_staging_root(staging_root: &Path, dry_run: bool) -> io::Result<StagingCleanupReport> {
    let mut report = StagingCleanupReport::default();
    if !staging_root.exists() {
        return Ok(report);
    }

    let mut batch_dirs: Vec<PathBuf> = fs::read_dir(staging_root)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    batch_dirs.sort();

    for batch_dir in batch_dirs {
        report.bytes += dir_size(&batch_dir);
        if !dry_run {
            fs::remove_dir_all(&batch_dir)?;
        }
        report.removed_dirs.push(batch_dir);
    }
    info!(
        "Staging: {} {} directories ({} bytes) under {}",
        if dry_run { "would remove" } else { "removed" },
        report.removed_dirs.len(),
        report.bytes,
        staging_root.display()
    );
    Ok(report)
}
