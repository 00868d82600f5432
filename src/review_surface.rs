//! Operator-facing review surfaces and the choice grammar they share.

use std::io;

use crate::batch_state::BatchStateError;
use crate::protocol::{Choice, Entity, EntityOutcome, StagedImage};

#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("review io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    State(#[from] BatchStateError),
    #[error("review surface failed: {0}")]
    Surface(String),
}

/// Everything a surface needs to show one entity's candidates.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityReview {
    pub batch_id: String,
    pub entity: Entity,
    /// 1-based position within the batch.
    pub position: usize,
    pub total: usize,
    pub candidates: Vec<StagedImage>,
    /// Similarity validation rejected everything; candidates are shown unfiltered.
    pub unfiltered: bool,
}

impl EntityReview {
    pub fn candidate(&self, rank: usize) -> Option<&StagedImage> {
        self.candidates.iter().find(|staged| staged.rank == rank)
    }

    pub fn max_rank(&self) -> usize {
        self.candidates
            .iter()
            .map(|staged| staged.rank)
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Pending,
    Selected { rank: usize },
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub entity_id: i64,
    pub name: String,
    pub status: EntryStatus,
}

/// Per-batch progress shown on index and submission pages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub batch_id: String,
    pub entries: Vec<BatchEntry>,
}

impl BatchSummary {
    pub fn new(batch_id: &str, entities: &[Entity]) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            entries: entities
                .iter()
                .map(|entity| BatchEntry {
                    entity_id: entity.id,
                    name: entity.name.trim().to_string(),
                    status: EntryStatus::Pending,
                })
                .collect(),
        }
    }

    pub fn apply(&mut self, entity_id: i64, outcome: &EntityOutcome) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.entity_id == entity_id)
        {
            entry.status = match outcome {
                EntityOutcome::Selected { rank, .. } => EntryStatus::Selected { rank: *rank },
                EntityOutcome::Skipped { .. } => EntryStatus::Skipped,
            };
        }
    }

    pub fn resolved(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.status != EntryStatus::Pending)
            .count()
    }

    /// `NAME: N` lines for resolved entities, 0 meaning skip.
    pub fn choice_lines(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter_map(|entry| match entry.status {
                EntryStatus::Pending => None,
                EntryStatus::Selected { rank } => Some(format!("{}: {}", entry.name, rank)),
                EntryStatus::Skipped => Some(format!("{}: 0", entry.name)),
            })
            .collect()
    }
}

/// Source of operator decisions.
pub trait ChoiceProvider {
    /// Batch progress changed; surfaces with an index view refresh it.
    fn progress(&mut self, _summary: &BatchSummary) {}

    /// Blocks until the operator resolves `review`.
    fn present(&mut self, review: &EntityReview) -> Result<Choice, ReviewError>;

    fn finish(&mut self, summary: &BatchSummary);
}

/// Parses `0` (skip), `3` (select rank 3), or `3,5` (rank 3 plus alternate 5).
pub fn parse_choice(input: &str, max_rank: usize) -> Result<Choice, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("enter a number, or 0 to skip".to_string());
    }
    if trimmed == "0" {
        return Ok(Choice::Skip);
    }

    let mut ranks: Vec<usize> = Vec::new();
    for token in trimmed
        .split(|ch: char| ch == ',' || ch.is_whitespace())
        .filter(|token| !token.is_empty())
    {
        let rank: usize = token
            .parse()
            .map_err(|_| format!("'{token}' is not a candidate number"))?;
        if rank == 0 || rank > max_rank {
            return Err(format!("{rank} is out of range 1-{max_rank}"));
        }
        if !ranks.contains(&rank) {
            ranks.push(rank);
        }
    }

    let Some((&primary, alternates)) = ranks.split_first() else {
        return Err("enter a number, or 0 to skip".to_string());
    };
    Ok(Choice::Select {
        primary,
        alternates: alternates.to_vec(),
    })
}
