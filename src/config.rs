//! Persistent configuration model and defaults.

use std::path::PathBuf;

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Media-search service access and throttling.
    pub search: SearchConfig,
    #[serde(default)]
    /// Candidate validity and quality scoring.
    pub scoring: ScoringConfig,
    #[serde(default)]
    /// Query synthesis limits and override table location.
    pub queries: QueryConfig,
    #[serde(default)]
    /// Perceptual-hash similarity check.
    pub similarity: SimilarityConfig,
    #[serde(default)]
    /// Review workflow, staging, and port range.
    pub review: ReviewConfig,
    #[serde(default)]
    /// Local character database export.
    pub store: StoreConfig,
}

/// External media-search service settings.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SearchConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Pause after every query, in milliseconds.
    #[serde(default = "default_query_delay_ms")]
    pub query_delay_ms: u64,
    /// Pause after every metadata lookup, in milliseconds.
    #[serde(default = "default_metadata_delay_ms")]
    pub metadata_delay_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    /// Result titles requested per query.
    #[serde(default = "default_results_per_query")]
    pub results_per_query: usize,
    /// Maximum titles requested per search page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_accepted_mime_types")]
    pub accepted_mime_types: Vec<String>,
    /// Stop issuing further queries once this many unique candidates exist.
    #[serde(default = "default_stop_after_candidates")]
    pub stop_after_candidates: usize,
}

/// Candidate scoring constants.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ScoringConfig {
    /// Desired height/width ratio of the printed card image area.
    #[serde(default = "default_target_aspect_ratio")]
    pub target_aspect_ratio: f64,
    #[serde(default = "default_min_height")]
    pub min_height: u32,
    #[serde(default = "default_optimal_height")]
    pub optimal_height: u32,
    #[serde(default = "default_ratio_weight")]
    pub ratio_weight: f64,
    #[serde(default = "default_resolution_weight")]
    pub resolution_weight: f64,
    /// Accept landscape images for place/structure categories.
    #[serde(default = "default_true")]
    pub place_accepts_landscape: bool,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct QueryConfig {
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,
    /// Extra override table merged over the built-in one.
    #[serde(default)]
    pub overrides_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SimilarityConfig {
    /// Largest accepted Hamming distance between 64-bit average hashes.
    #[serde(default = "default_max_distance")]
    pub max_distance: u32,
    /// Directory holding previously accepted reference images.
    #[serde(default = "default_reference_dir")]
    pub reference_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ReviewConfig {
    /// Successful downloads kept per entity.
    #[serde(default = "default_max_downloads")]
    pub max_downloads: usize,
    /// Candidates shown per page.
    #[serde(default = "default_review_page_size")]
    pub page_size: usize,
    #[serde(default = "default_port_range_start")]
    pub port_range_start: u16,
    #[serde(default = "default_port_range_end")]
    pub port_range_end: u16,
    #[serde(default = "default_true")]
    pub open_browser: bool,
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    #[serde(default = "default_review_dir")]
    pub review_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            user_agent: default_user_agent(),
            query_delay_ms: default_query_delay_ms(),
            metadata_delay_ms: default_metadata_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            download_timeout_secs: default_download_timeout_secs(),
            results_per_query: default_results_per_query(),
            page_size: default_page_size(),
            accepted_mime_types: default_accepted_mime_types(),
            stop_after_candidates: default_stop_after_candidates(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            target_aspect_ratio: default_target_aspect_ratio(),
            min_height: default_min_height(),
            optimal_height: default_optimal_height(),
            ratio_weight: default_ratio_weight(),
            resolution_weight: default_resolution_weight(),
            place_accepts_landscape: true,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_queries: default_max_queries(),
            overrides_file: None,
        }
    }
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            max_distance: default_max_distance(),
            reference_dir: default_reference_dir(),
        }
    }
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            max_downloads: default_max_downloads(),
            page_size: default_review_page_size(),
            port_range_start: default_port_range_start(),
            port_range_end: default_port_range_end(),
            open_browser: true,
            staging_dir: default_staging_dir(),
            review_dir: default_review_dir(),
            output_dir: default_output_dir(),
            registry_path: default_registry_path(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Clamps values that would stall or break the pipeline.
pub fn sanitize_config(mut config: Config) -> Config {
    config.queries.max_queries = config.queries.max_queries.max(1);
    config.search.results_per_query = config.search.results_per_query.max(1);
    config.search.page_size = config.search.page_size.clamp(1, 500);
    config.search.stop_after_candidates = config.search.stop_after_candidates.max(1);
    config.search.request_timeout_secs = config.search.request_timeout_secs.max(1);
    config.search.download_timeout_secs = config.search.download_timeout_secs.max(1);
    config.review.max_downloads = config.review.max_downloads.max(1);
    config.review.page_size = config.review.page_size.max(1);
    if config.review.port_range_start > config.review.port_range_end {
        std::mem::swap(
            &mut config.review.port_range_start,
            &mut config.review.port_range_end,
        );
    }
    if !config.scoring.target_aspect_ratio.is_finite() || config.scoring.target_aspect_ratio <= 0.0
    {
        config.scoring.target_aspect_ratio = default_target_aspect_ratio();
    }
    config.scoring.optimal_height = config.scoring.optimal_height.max(1);
    config.scoring.ratio_weight = config.scoring.ratio_weight.max(0.0);
    config.scoring.resolution_weight = config.scoring.resolution_weight.max(0.0);
    config
}

fn default_true() -> bool {
    true
}

fn default_api_url() -> String {
    "https://commons.wikimedia.org/w/api.php".to_string()
}

fn default_user_agent() -> String {
    "card-image-review/0.1.0 (educational card game image sourcing)".to_string()
}

fn default_query_delay_ms() -> u64 {
    1_000
}

fn default_metadata_delay_ms() -> u64 {
    200
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_download_timeout_secs() -> u64 {
    60
}

fn default_results_per_query() -> usize {
    15
}

fn default_page_size() -> usize {
    50
}

fn default_accepted_mime_types() -> Vec<String> {
    vec!["image/jpeg".to_string(), "image/png".to_string()]
}

fn default_stop_after_candidates() -> usize {
    9
}

fn default_target_aspect_ratio() -> f64 {
    1.298
}

fn default_min_height() -> u32 {
    1_000
}

fn default_optimal_height() -> u32 {
    3_508
}

fn default_ratio_weight() -> f64 {
    0.7
}

fn default_resolution_weight() -> f64 {
    0.3
}

fn default_max_queries() -> usize {
    10
}

fn default_max_distance() -> u32 {
    40
}

fn default_reference_dir() -> PathBuf {
    PathBuf::from("image_cache")
}

fn default_max_downloads() -> usize {
    15
}

fn default_review_page_size() -> usize {
    3
}

fn default_port_range_start() -> u16 {
    8_000
}

fn default_port_range_end() -> u16 {
    8_020
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("sourced_images/temp_candidates")
}

fn default_review_dir() -> PathBuf {
    PathBuf::from("sourced_images/review")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("sourced_images/wikimedia/by_character_id")
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("sourced_images/review/ports.db")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("characters.db")
}

#[cfg(test)]
mod tests {
    use super::{sanitize_config, Config};

    #[test]
    fn test_default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.search.query_delay_ms, 1_000);
        assert_eq!(config.search.metadata_delay_ms, 200);
        assert_eq!(config.search.results_per_query, 15);
        assert_eq!(config.search.stop_after_candidates, 9);
        assert_eq!(
            config.search.accepted_mime_types,
            vec!["image/jpeg".to_string(), "image/png".to_string()]
        );
        assert!((config.scoring.target_aspect_ratio - 1.298).abs() < f64::EPSILON);
        assert_eq!(config.scoring.min_height, 1_000);
        assert_eq!(config.scoring.optimal_height, 3_508);
        assert!((config.scoring.ratio_weight - 0.7).abs() < f64::EPSILON);
        assert!((config.scoring.resolution_weight - 0.3).abs() < f64::EPSILON);
        assert!(config.scoring.place_accepts_landscape);
        assert_eq!(config.queries.max_queries, 10);
        assert!(config.queries.overrides_file.is_none());
        assert_eq!(config.similarity.max_distance, 40);
        assert_eq!(config.review.max_downloads, 15);
        assert_eq!(config.review.page_size, 3);
        assert_eq!(config.review.port_range_start, 8_000);
        assert_eq!(config.review.port_range_end, 8_020);
        assert!(config.review.open_browser);
    }

    #[test]
    fn test_partial_toml_fills_missing_fields_with_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [search]
            query_delay_ms = 2500

            [review]
            port_range_start = 9100
            port_range_end = 9105
            "#,
        )
        .expect("partial config should parse");
        assert_eq!(parsed.search.query_delay_ms, 2_500);
        assert_eq!(parsed.search.metadata_delay_ms, 200);
        assert_eq!(parsed.review.port_range_start, 9_100);
        assert_eq!(parsed.review.max_downloads, 15);
        assert_eq!(parsed.scoring, Config::default().scoring);
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string(&config).expect("serialize config");
        let parsed: Config = toml::from_str(&text).expect("parse serialized config");
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_sanitize_config_clamps_invalid_values() {
        let mut config = Config::default();
        config.queries.max_queries = 0;
        config.review.port_range_start = 9_000;
        config.review.port_range_end = 8_990;
        config.scoring.target_aspect_ratio = -1.0;
        config.scoring.ratio_weight = -0.5;
        config.review.page_size = 0;

        let sanitized = sanitize_config(config);
        assert_eq!(sanitized.queries.max_queries, 1);
        assert_eq!(sanitized.review.port_range_start, 8_990);
        assert_eq!(sanitized.review.port_range_end, 9_000);
        assert!((sanitized.scoring.target_aspect_ratio - 1.298).abs() < f64::EPSILON);
        assert_eq!(sanitized.scoring.ratio_weight, 0.0);
        assert_eq!(sanitized.review.page_size, 1);
    }
}
