//! Shared data model and message payloads exchanged between pipeline components.
//!
//! Entities come from the character store, candidates from the search client,
//! staged images from the staging area, and choices from whichever review
//! surface is driving the session.

use std::fmt;
use std::path::PathBuf;

/// Card category code as stored in the character table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(into = "String", try_from = "String")]
pub enum Category {
    Royalty,
    Statesman,
    Philosopher,
    Innovator,
    MathematicalScientist,
    NaturalScientist,
    Artist,
    BuilderEngineer,
    Composer,
    Dramatist,
    TownCity,
    /// Code not known to this build; kept so filenames stay stable.
    Other(char),
}

impl Category {
    /// All known categories in card sort order.
    pub const ALL: [Category; 11] = [
        Category::Royalty,
        Category::Statesman,
        Category::Philosopher,
        Category::Innovator,
        Category::MathematicalScientist,
        Category::NaturalScientist,
        Category::Artist,
        Category::BuilderEngineer,
        Category::Composer,
        Category::Dramatist,
        Category::TownCity,
    ];

    pub fn from_code(code: &str) -> Self {
        let Some(first) = code.trim().chars().next() else {
            return Category::Other('?');
        };
        match first.to_ascii_uppercase() {
            'R' => Category::Royalty,
            'S' => Category::Statesman,
            'P' => Category::Philosopher,
            'I' => Category::Innovator,
            'M' => Category::MathematicalScientist,
            'N' => Category::NaturalScientist,
            'A' => Category::Artist,
            'B' => Category::BuilderEngineer,
            'C' => Category::Composer,
            'D' => Category::Dramatist,
            'T' => Category::TownCity,
            other => Category::Other(other),
        }
    }

    pub fn code(self) -> char {
        match self {
            Category::Royalty => 'R',
            Category::Statesman => 'S',
            Category::Philosopher => 'P',
            Category::Innovator => 'I',
            Category::MathematicalScientist => 'M',
            Category::NaturalScientist => 'N',
            Category::Artist => 'A',
            Category::BuilderEngineer => 'B',
            Category::Composer => 'C',
            Category::Dramatist => 'D',
            Category::TownCity => 'T',
            Category::Other(code) => code,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Category::Royalty => "ROYALTY",
            Category::Statesman => "STATESMAN",
            Category::Philosopher => "PHILOSOPHER",
            Category::Innovator => "INNOVATOR",
            Category::MathematicalScientist => "MATHEMATICAL SCIENTIST",
            Category::NaturalScientist => "NATURAL SCIENTIST",
            Category::Artist => "ARTIST",
            Category::BuilderEngineer => "BUILDERS AND ENGINEERS",
            Category::Composer => "COMPOSER",
            Category::Dramatist => "DRAMATIST",
            Category::TownCity => "TOWNS AND CITIES",
            Category::Other(_) => "UNKNOWN",
        }
    }

    /// Places and structures: photographed wider than tall, searched as architecture.
    pub fn is_structural(self) -> bool {
        matches!(self, Category::TownCity | Category::BuilderEngineer)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        category.code().to_string()
    }
}

impl TryFrom<String> for Category {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim().is_empty() {
            return Err("empty category code".to_string());
        }
        Ok(Category::from_code(&value))
    }
}

/// Subject being illustrated. Read-only to this crate.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Entity {
    pub id: i64,
    pub name: String,
    /// Alternate or first names; may carry an epithet in parentheses.
    pub alternate_name: Option<String>,
    pub biography: Option<String>,
    pub category: Category,
    pub birth_date: Option<String>,
    pub death_date: Option<String>,
}

impl Entity {
    /// Short label used as a log prefix.
    pub fn label(&self) -> String {
        format!("{} {}", self.id, self.name.trim())
    }
}

/// One media-search result considered as an illustration.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Candidate {
    pub url: String,
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Height divided by width.
    pub aspect_ratio: f64,
    pub score: f64,
}

/// A downloaded candidate persisted to the session staging directory.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedImage {
    /// 1-based rank as presented to the operator.
    pub rank: usize,
    pub candidate: Candidate,
    pub path: PathBuf,
    pub extension: &'static str,
    /// Similarity verdict recorded when the image was staged.
    pub validation_note: String,
    pub downloaded_at: chrono::DateTime<chrono::Utc>,
}

impl StagedImage {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Operator decision for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choice {
    /// 1-based ranks; `primary` becomes the card image, `alternates` are saved as `_altN`.
    Select {
        primary: usize,
        alternates: Vec<usize>,
    },
    Skip,
    /// Stop the batch; the current entity stays unresolved.
    Abort,
}

/// Why an entity ended without a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoQueries,
    NoCandidates,
    NoDownloads,
    Operator,
}

impl SkipReason {
    pub fn describe(self) -> &'static str {
        match self {
            SkipReason::NoQueries => "no usable name to search for",
            SkipReason::NoCandidates => "search returned no valid candidates",
            SkipReason::NoDownloads => "no candidate could be downloaded",
            SkipReason::Operator => "skipped by operator",
        }
    }
}

/// Terminal state recorded per entity in the batch state file.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EntityOutcome {
    Selected {
        rank: usize,
        #[serde(default)]
        alternates: Vec<usize>,
        file_name: String,
    },
    Skipped {
        reason: SkipReason,
    },
}

impl EntityOutcome {
    /// Rank recorded in the choices map (0 means skip).
    pub fn chosen_rank(&self) -> usize {
        match self {
            EntityOutcome::Selected { rank, .. } => *rank,
            EntityOutcome::Skipped { .. } => 0,
        }
    }
}

/// Decisions forwarded from the web surface thread to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewMessage {
    Decision { entity_id: i64, choice: Choice },
    AbortBatch,
}

#[cfg(test)]
mod tests {
    use super::{Category, EntityOutcome, SkipReason};

    #[test]
    fn test_category_round_trips_known_and_unknown_codes() {
        for category in Category::ALL {
            assert_eq!(Category::from_code(&category.code().to_string()), category);
        }
        assert_eq!(Category::from_code("x"), Category::Other('X'));
        assert_eq!(Category::from_code("  "), Category::Other('?'));
    }

    #[test]
    fn test_structural_categories_are_towns_and_builders() {
        assert!(Category::TownCity.is_structural());
        assert!(Category::BuilderEngineer.is_structural());
        assert!(!Category::Royalty.is_structural());
        assert!(!Category::Innovator.is_structural());
    }

    #[test]
    fn test_outcome_serializes_with_state_tag() {
        let outcome = EntityOutcome::Skipped {
            reason: SkipReason::NoCandidates,
        };
        let json = serde_json::to_string(&outcome).expect("serialize outcome");
        assert_eq!(json, r#"{"state":"skipped","reason":"no_candidates"}"#);
        assert_eq!(outcome.chosen_rank(), 0);
    }
}
