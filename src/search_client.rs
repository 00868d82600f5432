//! Throttled, sequential candidate search over a media-search backend.
//!
//! Every metadata lookup is followed by the metadata delay and every query by
//! the query delay. The upstream rate policy requires both, so they are never
//! skipped, even after failures.

use std::collections::HashSet;
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::SearchConfig;
use crate::image_scorer::ImageScorer;
use crate::protocol::{Candidate, Category};

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("service returned HTTP {0}")]
    Status(u16),
    #[error("failed to read response: {0}")]
    Decode(String),
    #[error("unexpected response shape: {0}")]
    Malformed(String),
}

/// One page of title hits for a text query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TitlePage {
    pub titles: Vec<String>,
    /// Offset of the next page, if the service reports more results.
    pub next_offset: Option<usize>,
}

/// Binary metadata resolved for one title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaMetadata {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub mime: String,
}

/// External media-search service.
pub trait MediaSearchBackend {
    fn search_titles(&self, query: &str, offset: usize, limit: usize)
        -> Result<TitlePage, SearchError>;
    /// `Ok(None)` when the title exists but carries no image info.
    fn image_metadata(&self, title: &str) -> Result<Option<MediaMetadata>, SearchError>;
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, SearchError>;
}

/// Blocks between upstream requests.
pub trait Pacer {
    fn pause(&self, duration: Duration);
}

pub struct SleepPacer;

impl Pacer for SleepPacer {
    fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Score descending, then height descending; equal keys keep discovery order.
pub fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then_with(|| right.height.cmp(&left.height))
    });
}

pub struct SearchClient {
    backend: Box<dyn MediaSearchBackend>,
    pacer: Box<dyn Pacer>,
    scorer: ImageScorer,
    config: SearchConfig,
}

impl SearchClient {
    pub fn new(
        backend: Box<dyn MediaSearchBackend>,
        pacer: Box<dyn Pacer>,
        scorer: ImageScorer,
        config: SearchConfig,
    ) -> Self {
        Self {
            backend,
            pacer,
            scorer,
            config,
        }
    }

    pub fn backend(&self) -> &dyn MediaSearchBackend {
        self.backend.as_ref()
    }

    fn metadata_delay(&self) -> Duration {
        Duration::from_millis(self.config.metadata_delay_ms)
    }

    fn query_delay(&self) -> Duration {
        Duration::from_millis(self.config.query_delay_ms)
    }

    fn accepts_mime(&self, mime: &str) -> bool {
        self.config
            .accepted_mime_types
            .iter()
            .any(|accepted| accepted.eq_ignore_ascii_case(mime.trim()))
    }

    fn collect_titles(&self, query: &str, limit: usize) -> Result<Vec<String>, SearchError> {
        let mut titles = Vec::new();
        let mut offset = 0;
        while titles.len() < limit {
            let page_limit = (limit - titles.len()).min(self.config.page_size.max(1));
            let page = self.backend.search_titles(query, offset, page_limit)?;
            let received = page.titles.len();
            titles.extend(page.titles.into_iter().take(limit - titles.len()));
            match page.next_offset {
                Some(next) if received > 0 && next > offset => offset = next,
                _ => break,
            }
        }
        Ok(titles)
    }

    fn resolve_candidate(&self, query: &str, title: &str, category: Category) -> Option<Candidate> {
        let metadata = match self.backend.image_metadata(title) {
            Ok(Some(metadata)) => metadata,
            Ok(None) => {
                debug!("Search[{:?}]: no image info for '{}'", query, title);
                return None;
            }
            Err(err) => {
                warn!(
                    "Search[{:?}]: metadata lookup failed for '{}': {}",
                    query, title, err
                );
                return None;
            }
        };

        if !self.accepts_mime(&metadata.mime) {
            debug!(
                "Search[{:?}]: skipping '{}' with mime {}",
                query, title, metadata.mime
            );
            return None;
        }

        self.scorer.candidate(
            &metadata.url,
            title,
            metadata.width,
            metadata.height,
            category,
        )
    }

    /// Runs one query and returns its valid candidates, best first.
    pub fn search(
        &self,
        query: &str,
        limit: usize,
        category: Category,
    ) -> Result<Vec<Candidate>, SearchError> {
        let titles = self.collect_titles(query, limit)?;
        let mut candidates = Vec::new();
        for title in &titles {
            if let Some(candidate) = self.resolve_candidate(query, title, category) {
                candidates.push(candidate);
            }
            self.pacer.pause(self.metadata_delay());
        }
        sort_candidates(&mut candidates);
        debug!(
            "Search[{:?}]: {} titles, {} valid candidates",
            query,
            titles.len(),
            candidates.len()
        );
        Ok(candidates)
    }

    /// Runs queries in order, merging unique-by-URL candidates until `max_total` is reached.
    /// A failing query counts as zero results.
    pub fn search_many(
        &self,
        queries: &[String],
        max_total: usize,
        category: Category,
    ) -> Vec<Candidate> {
        let mut seen_urls = HashSet::new();
        let mut merged = Vec::new();

        for query in queries {
            match self.search(query, self.config.results_per_query, category) {
                Ok(candidates) => {
                    for candidate in candidates {
                        if seen_urls.insert(candidate.url.clone()) {
                            merged.push(candidate);
                        }
                    }
                }
                Err(err) => warn!("Search[{:?}]: query failed, treating as empty: {}", query, err),
            }

            self.pacer.pause(self.query_delay());

            if max_total > 0 && merged.len() >= max_total {
                debug!(
                    "Search: stopping after {} candidates (threshold {})",
                    merged.len(),
                    max_total
                );
                break;
            }
        }

        sort_candidates(&mut merged);
        info!(
            "Search: {} unique candidates from {} queries",
            merged.len(),
            queries.len()
        );
        merged
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{SearchClient, SearchError};
    use crate::config::{ScoringConfig, SearchConfig};
    use crate::image_scorer::ImageScorer;
    use crate::protocol::Category;
    use crate::test_support::{FakeBackend, RecordingPacer};

    fn client(backend: FakeBackend, pacer: RecordingPacer) -> SearchClient {
        SearchClient::new(
            Box::new(backend),
            Box::new(pacer),
            ImageScorer::new(ScoringConfig::default()),
            SearchConfig::default(),
        )
    }

    #[test]
    fn test_landscape_rejected_and_higher_resolution_first() {
        let backend = FakeBackend::default()
            .with_image("q", "File:Small.jpg", 800, 1000)
            .with_image("q", "File:Large.jpg", 1200, 1600)
            .with_image("q", "File:Wide.jpg", 1600, 1200);
        let client = client(backend, RecordingPacer::default());

        let candidates = client.search("q", 15, Category::Royalty).expect("search");
        let titles: Vec<&str> = candidates.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["File:Large.jpg", "File:Small.jpg"]);
        assert!(candidates[0].score > candidates[1].score);

        let places = client.search("q", 15, Category::TownCity).expect("search");
        assert!(places.iter().any(|c| c.title == "File:Wide.jpg"));
    }

    #[test]
    fn test_equal_ratio_orders_by_height() {
        let backend = FakeBackend::default()
            .with_image("q", "File:Short.jpg", 1500, 2000)
            .with_image("q", "File:Tall.jpg", 3000, 4000);
        let client = client(backend, RecordingPacer::default());

        let candidates = client.search("q", 15, Category::Artist).expect("search");
        assert_eq!(candidates[0].title, "File:Tall.jpg");
        assert_eq!(candidates[1].title, "File:Short.jpg");
    }

    #[test]
    fn test_delays_follow_every_metadata_lookup_and_query() {
        let pacer = RecordingPacer::default();
        let backend = FakeBackend::default()
            .with_image("a", "File:A1.jpg", 1000, 1300)
            .with_missing_metadata("a", "File:A2.jpg")
            .with_image("b", "File:B1.jpg", 1000, 1300);
        let client = client(backend, pacer.clone());

        client.search_many(&["a".to_string(), "b".to_string()], 50, Category::Royalty);
        let metadata = Duration::from_millis(200);
        let query = Duration::from_millis(1_000);
        assert_eq!(
            pacer.pauses(),
            vec![metadata, metadata, query, metadata, query]
        );
    }

    #[test]
    fn test_failing_query_is_swallowed_and_urls_are_deduplicated() {
        let backend = FakeBackend::default()
            .with_failing_query("broken")
            .with_image("first", "File:Shared.jpg", 1000, 1300)
            .with_image("second", "File:Shared.jpg", 1000, 1300)
            .with_image("second", "File:Other.png", 2000, 2600);
        let client = client(backend, RecordingPacer::default());

        let queries = ["broken", "first", "second"].map(str::to_string);
        let candidates = client.search_many(&queries, 50, Category::Composer);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].title, "File:Other.png");
    }

    #[test]
    fn test_search_reports_failure_for_single_query() {
        let backend = FakeBackend::default().with_failing_query("broken");
        let client = client(backend, RecordingPacer::default());
        assert!(matches!(
            client.search("broken", 15, Category::Royalty),
            Err(SearchError::Transport(_))
        ));
    }

    #[test]
    fn test_search_many_stops_at_threshold() {
        let pacer = RecordingPacer::default();
        let backend = FakeBackend::default()
            .with_image("a", "File:A1.jpg", 1000, 1300)
            .with_image("a", "File:A2.jpg", 1100, 1400)
            .with_image("b", "File:B1.jpg", 1000, 1300);
        let client = client(backend.clone(), pacer);

        let candidates =
            client.search_many(&["a".to_string(), "b".to_string()], 2, Category::Royalty);
        assert_eq!(candidates.len(), 2);
        assert_eq!(backend.searched_queries(), vec!["a".to_string()]);
    }

    #[test]
    fn test_non_raster_mime_is_excluded() {
        let backend = FakeBackend::default()
            .with_image("q", "File:Ok.jpg", 1000, 1300)
            .with_mime("q", "File:Scan.pdf", 2000, 2600, "application/pdf")
            .with_mime("q", "File:Logo.svg", 2000, 2600, "image/svg+xml");
        let client = client(backend, RecordingPacer::default());

        let candidates = client.search("q", 15, Category::Royalty).expect("search");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].title, "File:Ok.jpg");
    }

    #[test]
    fn test_pagination_follows_next_offset_up_to_limit() {
        let mut backend = FakeBackend::default();
        for index in 0..7 {
            backend = backend.with_image("q", &format!("File:P{index}.jpg"), 1000, 1300);
        }
        let client = SearchClient::new(
            Box::new(backend.clone()),
            Box::new(RecordingPacer::default()),
            ImageScorer::new(ScoringConfig::default()),
            SearchConfig {
                page_size: 3,
                ..SearchConfig::default()
            },
        );

        let candidates = client.search("q", 5, Category::Royalty).expect("search");
        assert_eq!(candidates.len(), 5);
        assert_eq!(backend.page_offsets("q"), vec![0, 3]);
    }
}
