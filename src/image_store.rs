//! Permanent image store keyed by entity id, category, and normalized name.
//!
//! Primary picks land at `{id}_{category}_{name}.{ext}`, secondary picks at
//! `{id}_{category}_{name}_alt{N}.{ext}`, each with a same-stem `.json` sidecar.
//! Concurrent batches writing the same entity race on the final rename; the
//! last writer wins.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use log::{info, warn};

use crate::image_pipeline::{is_supported_extension, write_bytes_atomic};
use crate::protocol::{Entity, StagedImage};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read staged image {path}: {source}")]
    ReadStaged { path: PathBuf, source: io::Error },
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to encode sidecar metadata: {0}")]
    Sidecar(#[from] serde_json::Error),
}

/// Provenance written next to every committed image.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SidecarMetadata {
    pub character_name: String,
    pub character_id: i64,
    pub category: String,
    pub first_names: Option<String>,
    pub biography: Option<String>,
    pub birth_date: Option<String>,
    pub death_date: Option<String>,
    pub wikimedia_title: String,
    pub wikimedia_url: String,
    pub width: u32,
    pub height: u32,
    pub aspect_ratio: f64,
    pub score: f64,
    /// Rank of the candidate as presented to the operator.
    pub rank: usize,
    /// 0 for the primary pick, N for `_altN`.
    pub slot: usize,
    pub selected_option: usize,
    pub download_timestamp: String,
    pub selection_timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedImage {
    pub image_path: PathBuf,
    pub sidecar_path: PathBuf,
    pub slot: usize,
}

/// Filesystem-safe form of a display name.
pub fn normalized_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|ch| match ch {
            ' ' | '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect()
}

fn rfc3339(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub struct ImageStore {
    output_dir: PathBuf,
}

impl ImageStore {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
        }
    }

    pub fn file_stem(entity: &Entity, slot: usize) -> String {
        let base = format!(
            "{}_{}_{}",
            entity.id,
            entity.category.code(),
            normalized_name(&entity.name)
        );
        if slot == 0 {
            base
        } else {
            format!("{base}_alt{slot}")
        }
    }

    /// Removes images for the same stem saved earlier under a different extension.
    fn remove_stale_variants(&self, stem: &str, keep_extension: &str) {
        let Ok(entries) = fs::read_dir(&self.output_dir) else {
            return;
        };
        for path in entries.filter_map(Result::ok).map(|entry| entry.path()) {
            let same_stem = path.file_stem().and_then(|value| value.to_str()) == Some(stem);
            let extension = path
                .extension()
                .and_then(|value| value.to_str())
                .unwrap_or_default();
            if same_stem && is_supported_extension(extension) && extension != keep_extension {
                if let Err(err) = fs::remove_file(&path) {
                    warn!("Store: failed to remove stale {}: {}", path.display(), err);
                }
            }
        }
    }

    /// Removes `_altN` images and sidecars beyond the first `keep` alternates,
    /// left behind by an earlier commit with more alternates.
    fn remove_extra_alternates(&self, entity: &Entity, keep: usize) {
        let prefix = format!("{}_alt", Self::file_stem(entity, 0));
        let Ok(entries) = fs::read_dir(&self.output_dir) else {
            return;
        };
        for path in entries.filter_map(Result::ok).map(|entry| entry.path()) {
            let Some(slot) = path
                .file_stem()
                .and_then(|value| value.to_str())
                .and_then(|stem| stem.strip_prefix(&prefix))
                .and_then(|slot| slot.parse::<usize>().ok())
            else {
                continue;
            };
            let extension = path
                .extension()
                .and_then(|value| value.to_str())
                .unwrap_or_default();
            if slot > keep && (extension == "json" || is_supported_extension(extension)) {
                if let Err(err) = fs::remove_file(&path) {
                    warn!("Store: failed to remove stale {}: {}", path.display(), err);
                }
            }
        }
    }

    pub fn commit(
        &self,
        entity: &Entity,
        staged: &StagedImage,
        slot: usize,
        selected_at: DateTime<Utc>,
    ) -> Result<CommittedImage, StoreError> {
        let bytes = fs::read(&staged.path).map_err(|source| StoreError::ReadStaged {
            path: staged.path.clone(),
            source,
        })?;
        let stem = Self::file_stem(entity, slot);
        let image_path = self.output_dir.join(format!("{stem}.{}", staged.extension));
        let sidecar_path = self.output_dir.join(format!("{stem}.json"));

        write_bytes_atomic(&image_path, &bytes).map_err(|source| StoreError::Write {
            path: image_path.clone(),
            source,
        })?;
        self.remove_stale_variants(&stem, staged.extension);

        let metadata = SidecarMetadata {
            character_name: entity.name.clone(),
            character_id: entity.id,
            category: entity.category.code().to_string(),
            first_names: entity.alternate_name.clone(),
            biography: entity.biography.clone(),
            birth_date: entity.birth_date.clone(),
            death_date: entity.death_date.clone(),
            wikimedia_title: staged.candidate.title.clone(),
            wikimedia_url: staged.candidate.url.clone(),
            width: staged.candidate.width,
            height: staged.candidate.height,
            aspect_ratio: staged.candidate.aspect_ratio,
            score: staged.candidate.score,
            rank: staged.rank,
            slot,
            selected_option: staged.rank,
            download_timestamp: rfc3339(staged.downloaded_at),
            selection_timestamp: rfc3339(selected_at),
        };
        let sidecar = serde_json::to_vec_pretty(&metadata)?;
        write_bytes_atomic(&sidecar_path, &sidecar).map_err(|source| StoreError::Write {
            path: sidecar_path.clone(),
            source,
        })?;

        Ok(CommittedImage {
            image_path,
            sidecar_path,
            slot,
        })
    }

    /// Commits the primary pick and any alternates as `_alt1`, `_alt2`, ... in the given order.
    pub fn commit_selection(
        &self,
        entity: &Entity,
        primary: &StagedImage,
        alternates: &[&StagedImage],
    ) -> Result<Vec<CommittedImage>, StoreError> {
        let selected_at = Utc::now();
        let mut committed = vec![self.commit(entity, primary, 0, selected_at)?];
        for (index, alternate) in alternates.iter().enumerate() {
            committed.push(self.commit(entity, alternate, index + 1, selected_at)?);
        }
        self.remove_extra_alternates(entity, alternates.len());
        info!(
            "Store[{}]: committed {} image(s) to {}",
            entity.label(),
            committed.len(),
            self.output_dir.display()
        );
        Ok(committed)
    }
}

/// Ids of entities that have a committed primary image in `output_dir`.
pub fn committed_entity_ids(output_dir: &Path) -> io::Result<BTreeSet<i64>> {
    let mut ids = BTreeSet::new();
    if !output_dir.exists() {
        return Ok(ids);
    }
    for entry in fs::read_dir(output_dir)? {
        let path = entry?.path();
        let Some(extension) = path.extension().and_then(|value| value.to_str()) else {
            continue;
        };
        if !is_supported_extension(extension) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|value| value.to_str()) else {
            continue;
        };
        let is_alternate = stem
            .rsplit_once("_alt")
            .is_some_and(|(_, index)| index.parse::<usize>().is_ok());
        if is_alternate {
            continue;
        }
        if let Some(id) = stem.split('_').next().and_then(|id| id.parse::<i64>().ok()) {
            ids.insert(id);
        }
    }
    Ok(ids)
}
