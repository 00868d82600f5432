//! Candidate validity and quality scoring from pixel dimensions.

use crate::config::ScoringConfig;
use crate::protocol::{Candidate, Category};

/// Result of scoring one candidate. Invalid outcomes carry zero ratio and score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreOutcome {
    pub is_valid: bool,
    /// Height divided by width.
    pub aspect_ratio: f64,
    pub score: f64,
}

impl ScoreOutcome {
    const INVALID: ScoreOutcome = ScoreOutcome {
        is_valid: false,
        aspect_ratio: 0.0,
        score: 0.0,
    };
}

#[derive(Debug, Clone)]
pub struct ImageScorer {
    config: ScoringConfig,
}

impl ImageScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    fn accepts_landscape(&self, category: Category) -> bool {
        self.config.place_accepts_landscape && category.is_structural()
    }

    fn ratio_score(&self, aspect_ratio: f64, category: Category) -> f64 {
        let target = self.config.target_aspect_ratio;
        let portrait = 1.0 / (1.0 + (aspect_ratio - target).abs());
        if !self.accepts_landscape(category) {
            return portrait;
        }
        let landscape = 1.0 / (1.0 + (aspect_ratio - 1.0 / target).abs());
        portrait.max(landscape)
    }

    fn resolution_score(&self, height: u32) -> f64 {
        (f64::from(height) / f64::from(self.config.optimal_height.max(1))).min(1.0)
    }

    pub fn is_valid(&self, width: u32, height: u32, category: Category) -> bool {
        if width == 0 || height == 0 {
            return false;
        }
        if height < self.config.min_height {
            return false;
        }
        height >= width || self.accepts_landscape(category)
    }

    pub fn score(&self, width: u32, height: u32, category: Category) -> ScoreOutcome {
        if !self.is_valid(width, height, category) {
            return ScoreOutcome::INVALID;
        }

        let aspect_ratio = f64::from(height) / f64::from(width);
        let score = self.config.ratio_weight * self.ratio_score(aspect_ratio, category)
            + self.config.resolution_weight * self.resolution_score(height);
        ScoreOutcome {
            is_valid: true,
            aspect_ratio,
            score,
        }
    }

    /// Builds a scored candidate, or `None` when the dimensions fail validity rules.
    pub fn candidate(
        &self,
        url: &str,
        title: &str,
        width: u32,
        height: u32,
        category: Category,
    ) -> Option<Candidate> {
        let outcome = self.score(width, height, category);
        if !outcome.is_valid {
            return None;
        }
        Some(Candidate {
            url: url.to_string(),
            title: title.to_string(),
            width,
            height,
            aspect_ratio: outcome.aspect_ratio,
            score: outcome.score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::ImageScorer;
    use crate::config::ScoringConfig;
    use crate::protocol::Category;

    fn scorer() -> ImageScorer {
        ImageScorer::new(ScoringConfig::default())
    }

    #[test]
    fn test_heights_below_minimum_are_invalid_for_any_ratio() {
        let scorer = scorer();
        for width in [1, 300, 999, 2000, 5000] {
            for height in [1, 500, 999] {
                assert!(!scorer.score(width, height, Category::Royalty).is_valid);
                assert!(!scorer.score(width, height, Category::TownCity).is_valid);
            }
        }
    }

    #[test]
    fn test_zero_dimensions_are_invalid() {
        let scorer = scorer();
        assert!(!scorer.score(0, 2000, Category::Artist).is_valid);
        assert!(!scorer.score(1500, 0, Category::TownCity).is_valid);
    }

    #[test]
    fn test_landscape_only_valid_for_places() {
        let scorer = scorer();
        assert!(!scorer.score(1600, 1200, Category::Royalty).is_valid);
        assert!(!scorer.score(1600, 1200, Category::Innovator).is_valid);
        assert!(scorer.score(1600, 1200, Category::TownCity).is_valid);
        assert!(scorer.score(1200, 1600, Category::TownCity).is_valid);
        assert!(scorer.score(1600, 1200, Category::BuilderEngineer).is_valid);
    }

    #[test]
    fn test_place_landscape_exception_can_be_disabled() {
        let scorer = ImageScorer::new(ScoringConfig {
            place_accepts_landscape: false,
            ..ScoringConfig::default()
        });
        assert!(!scorer.score(1600, 1200, Category::TownCity).is_valid);
    }

    #[test]
    fn test_place_ratio_uses_closer_of_target_and_reciprocal() {
        let scorer = scorer();
        let target = ScoringConfig::default().target_aspect_ratio;
        let height = 2_000_u32;
        let width = (f64::from(height) * target).round() as u32;
        let landscape = scorer.score(width, height, Category::TownCity);
        assert!(landscape.is_valid);
        assert!(landscape.aspect_ratio < 1.0);

        let expected = 0.7 + 0.3 * (f64::from(height) / 3_508.0);
        assert!((landscape.score - expected).abs() < 1e-3);
    }

    #[test]
    fn test_score_is_monotonic_in_height_for_fixed_ratio() {
        let scorer = scorer();
        let mut previous = 0.0;
        for height in (1_000..=4_000).step_by(250) {
            let width = height * 3 / 4;
            let outcome = scorer.score(width, height, Category::Philosopher);
            assert!(outcome.is_valid);
            assert!(outcome.score >= previous);
            previous = outcome.score;
        }
    }

    #[test]
    fn test_score_is_maximal_at_target_ratio_and_optimal_height() {
        let config = ScoringConfig {
            target_aspect_ratio: 1.5,
            optimal_height: 3_000,
            ..ScoringConfig::default()
        };
        let max_score = config.ratio_weight + config.resolution_weight;
        let scorer = ImageScorer::new(config);

        let best = scorer.score(2_000, 3_000, Category::Dramatist);
        assert!(best.is_valid);
        assert!((best.aspect_ratio - 1.5).abs() < 1e-12);
        assert!((best.score - max_score).abs() < 1e-12);
        assert!(scorer.score(4_000, 6_000, Category::Dramatist).score <= max_score + 1e-12);
        assert!(scorer.score(2_000, 2_600, Category::Dramatist).score < best.score);
    }

    #[test]
    fn test_candidate_is_none_for_invalid_dimensions() {
        let scorer = scorer();
        assert!(scorer
            .candidate("https://example.org/a.jpg", "File:A.jpg", 400, 300, Category::Royalty)
            .is_none());
        let candidate = scorer
            .candidate("https://example.org/b.jpg", "File:B.jpg", 1200, 1600, Category::Royalty)
            .expect("valid candidate");
        assert_eq!(candidate.width, 1200);
        assert!(candidate.score > 0.0);
    }
}
