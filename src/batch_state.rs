//! Durable per-batch review progress.
//!
//! State lives at `review_dir/{batch_id}/state.json` and is rewritten
//! atomically after every entity reaches a terminal state. Resuming a batch
//! skips entities that already have an outcome.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::image_pipeline::write_bytes_atomic;
use crate::protocol::{Category, EntityOutcome};

#[derive(Debug, thiserror::Error)]
pub enum BatchStateError {
    #[error("failed to access batch state {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("failed to encode batch state: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("entity {0} is not part of this batch")]
    UnknownEntity(i64),
}

/// `{CATEGORY|ALL}_batch{N}` for category slices.
pub fn batch_id_for_category(category: Option<Category>, start: usize, batch_size: usize) -> String {
    let label = category
        .map(|category| category.code().to_string())
        .unwrap_or_else(|| "ALL".to_string());
    format!("{label}_batch{}", start / batch_size.max(1) + 1)
}

/// `ids_{first three sorted ids}` with `_plus{K}` for the rest.
pub fn batch_id_for_ids(ids: &[i64]) -> String {
    let mut sorted = ids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let head: Vec<String> = sorted.iter().take(3).map(i64::to_string).collect();
    let mut batch_id = format!("ids_{}", head.join("_"));
    if sorted.len() > 3 {
        batch_id.push_str(&format!("_plus{}", sorted.len() - 3));
    }
    batch_id
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct BatchState {
    pub batch_id: String,
    pub entity_ids: Vec<i64>,
    /// Index of the next entity to review; never decreases within a batch order.
    pub cursor: usize,
    /// Entity id -> chosen rank, 0 meaning skip.
    #[serde(default)]
    pub choices: BTreeMap<i64, usize>,
    #[serde(default)]
    pub outcomes: BTreeMap<i64, EntityOutcome>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    path: PathBuf,
}

impl BatchState {
    pub fn state_path(review_dir: &Path, batch_id: &str) -> PathBuf {
        review_dir.join(batch_id).join("state.json")
    }

    fn fresh(batch_id: &str, entity_ids: &[i64], path: PathBuf) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            entity_ids: entity_ids.to_vec(),
            cursor: 0,
            choices: BTreeMap::new(),
            outcomes: BTreeMap::new(),
            updated_at: Utc::now(),
            path,
        }
    }

    /// Loads saved progress for `batch_id`, or starts fresh.
    ///
    /// A saved state with a different entity order keeps the outcomes of
    /// entities still in the batch and re-derives the cursor.
    pub fn load_or_new(
        review_dir: &Path,
        batch_id: &str,
        entity_ids: &[i64],
    ) -> Result<Self, BatchStateError> {
        let path = Self::state_path(review_dir, batch_id);
        if !path.exists() {
            return Ok(Self::fresh(batch_id, entity_ids, path));
        }

        let text = std::fs::read_to_string(&path).map_err(|source| BatchStateError::Io {
            path: path.clone(),
            source,
        })?;
        let mut state = match serde_json::from_str::<BatchState>(&text) {
            Ok(state) => state,
            Err(err) => {
                warn!(
                    "BatchState[{}]: unreadable state at {}, starting over: {}",
                    batch_id,
                    path.display(),
                    err
                );
                return Ok(Self::fresh(batch_id, entity_ids, path));
            }
        };
        state.path = path;

        if state.entity_ids != entity_ids {
            warn!(
                "BatchState[{}]: entity list changed, keeping outcomes for entities still present",
                batch_id
            );
            state.outcomes.retain(|id, _| entity_ids.contains(id));
            state.choices.retain(|id, _| entity_ids.contains(id));
            state.entity_ids = entity_ids.to_vec();
            state.cursor = state.first_unresolved_index();
        }

        info!(
            "BatchState[{}]: resuming with {}/{} entities resolved",
            batch_id,
            state.resolved_count(),
            state.entity_ids.len()
        );
        Ok(state)
    }

    fn first_unresolved_index(&self) -> usize {
        self.entity_ids
            .iter()
            .position(|id| !self.outcomes.contains_key(id))
            .unwrap_or(self.entity_ids.len())
    }

    pub fn is_resolved(&self, entity_id: i64) -> bool {
        self.outcomes.contains_key(&entity_id)
    }

    pub fn outcome(&self, entity_id: i64) -> Option<&EntityOutcome> {
        self.outcomes.get(&entity_id)
    }

    pub fn resolved_count(&self) -> usize {
        self.entity_ids
            .iter()
            .filter(|id| self.outcomes.contains_key(id))
            .count()
    }

    pub fn is_complete(&self) -> bool {
        self.resolved_count() == self.entity_ids.len()
    }

    /// Records a terminal outcome and persists the state before returning.
    pub fn record(
        &mut self,
        entity_id: i64,
        outcome: EntityOutcome,
    ) -> Result<(), BatchStateError> {
        let index = self
            .entity_ids
            .iter()
            .position(|id| *id == entity_id)
            .ok_or(BatchStateError::UnknownEntity(entity_id))?;

        self.choices.insert(entity_id, outcome.chosen_rank());
        self.outcomes.insert(entity_id, outcome);
        self.cursor = self.cursor.max(index + 1);
        self.updated_at = Utc::now();
        self.save()
    }

    pub fn save(&self) -> Result<(), BatchStateError> {
        let encoded = serde_json::to_vec_pretty(self)?;
        write_bytes_atomic(&self.path, &encoded).map_err(|source| BatchStateError::Io {
            path: self.path.clone(),
            source,
        })
    }
}
