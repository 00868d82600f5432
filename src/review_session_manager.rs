//! Batch review orchestration.
//!
//! Entities are processed strictly in batch order. Each one moves through
//! query synthesis, search, download, similarity validation and staging before
//! the operator resolves it; the terminal outcome is persisted before the next
//! entity starts. An aborted entity stays pending for a later run.

use std::io;

use log::{debug, info, warn};

use crate::batch_state::BatchState;
use crate::config::{ReviewConfig, SearchConfig};
use crate::image_pipeline::detect_image_extension;
use crate::image_similarity::SimilarityValidator;
use crate::image_store::ImageStore;
use crate::port_manager::PortManager;
use crate::protocol::{Candidate, Choice, Entity, EntityOutcome, SkipReason, StagedImage};
use crate::query_builder::QueryBuilder;
use crate::review_surface::{BatchSummary, ChoiceProvider, EntityReview, ReviewError};
use crate::search_client::SearchClient;
use crate::staging::StagingArea;
use crate::terminal_prompt::TerminalPrompt;
use crate::web_review::WebReviewSurface;

/// What happened to the entity under review.
#[derive(Debug, Clone, PartialEq)]
enum EntityResult {
    Resolved(EntityOutcome),
    Aborted,
    /// Left pending; a later run retries it.
    Failed(String),
}

/// Passes a browser run's report through. A broken surface yields `None` so the
/// caller resumes the batch on the terminal; recorded outcomes carry over.
fn finished_or_headless(
    batch_id: &str,
    result: Result<BatchReport, ReviewError>,
) -> Result<Option<BatchReport>, ReviewError> {
    match result {
        Ok(report) => Ok(Some(report)),
        Err(ReviewError::Surface(reason)) => {
            warn!(
                "Review[{}]: review surface failed, continuing headless: {}",
                batch_id, reason
            );
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// A downloaded, signature-checked candidate awaiting validation.
struct Download {
    candidate: Candidate,
    bytes: Vec<u8>,
    extension: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub batch_id: String,
    pub selected: usize,
    pub skipped: usize,
    pub pending: usize,
    pub aborted: bool,
    /// Entities left pending by an error, with the reason.
    pub failures: Vec<(i64, String)>,
    pub choice_lines: Vec<String>,
}

pub struct ReviewSessionManager {
    query_builder: QueryBuilder,
    search: SearchClient,
    similarity: SimilarityValidator,
    store: ImageStore,
    review: ReviewConfig,
    stop_after_candidates: usize,
}

impl ReviewSessionManager {
    pub fn new(
        query_builder: QueryBuilder,
        search: SearchClient,
        similarity: SimilarityValidator,
        review: ReviewConfig,
        search_config: &SearchConfig,
    ) -> Self {
        Self {
            query_builder,
            search,
            similarity,
            store: ImageStore::new(&review.output_dir),
            review,
            stop_after_candidates: search_config.stop_after_candidates,
        }
    }

    /// Reviews `entities` as batch `batch_id`, in the browser when a port can
    /// be leased and on the terminal otherwise.
    pub fn review_batch(
        &self,
        batch_id: &str,
        entities: &[Entity],
        ports: Option<&PortManager>,
        open_browser: bool,
    ) -> Result<BatchReport, ReviewError> {
        let staging = StagingArea::create(&self.review.staging_dir, batch_id)?;

        if let Some(ports) = ports {
            match ports.acquire(batch_id) {
                Ok(mut lease) => {
                    let surface = lease.take_listener().map(|listener| {
                        WebReviewSurface::start(
                            listener,
                            BatchSummary::new(batch_id, entities),
                            staging.run_dir().to_path_buf(),
                            self.review.page_size,
                            open_browser,
                        )
                    });
                    match surface {
                        Some(Ok(mut surface)) => {
                            info!(
                                "Review[{}]: open {} to review (port {})",
                                batch_id,
                                surface.base_url(),
                                lease.port()
                            );
                            let result = self.run_batch(batch_id, entities, &staging, &mut surface);
                            drop(surface);
                            if let Err(err) = ports.release(lease) {
                                warn!("Review[{}]: failed to release port lease: {}", batch_id, err);
                            }
                            if let Some(report) = finished_or_headless(batch_id, result)? {
                                return Ok(report);
                            }
                        }
                        Some(Err(err)) => warn!(
                            "Review[{}]: review server failed to start, continuing headless: {}",
                            batch_id, err
                        ),
                        None => warn!(
                            "Review[{}]: lease on port {} carried no listener, continuing headless",
                            batch_id,
                            lease.port()
                        ),
                    }
                }
                Err(err) => warn!(
                    "Review[{}]: {}; continuing headless",
                    batch_id, err
                ),
            }
        }

        let stdin = io::stdin();
        let mut prompt = TerminalPrompt::new(stdin.lock(), io::stdout(), self.review.page_size);
        self.run_batch(batch_id, entities, &staging, &mut prompt)
    }

    /// Drives every unresolved entity of the batch through `surface`.
    pub fn run_batch(
        &self,
        batch_id: &str,
        entities: &[Entity],
        staging: &StagingArea,
        surface: &mut dyn ChoiceProvider,
    ) -> Result<BatchReport, ReviewError> {
        let ids: Vec<i64> = entities.iter().map(|entity| entity.id).collect();
        let mut state = BatchState::load_or_new(&self.review.review_dir, batch_id, &ids)?;

        let mut summary = BatchSummary::new(batch_id, entities);
        for entity in entities {
            if let Some(outcome) = state.outcome(entity.id) {
                summary.apply(entity.id, outcome);
            }
        }
        surface.progress(&summary);

        let mut report = BatchReport {
            batch_id: batch_id.to_string(),
            ..BatchReport::default()
        };
        let total = entities.len();

        for (index, entity) in entities.iter().enumerate() {
            if state.is_resolved(entity.id) {
                debug!("Review[{}/{}]: already resolved", batch_id, entity.label());
                continue;
            }

            let result = self.process_entity(batch_id, entity, index + 1, total, staging, surface);
            let removed = staging.cleanup_entity(entity.id);
            debug!(
                "Review[{}/{}]: removed {} staged files",
                batch_id,
                entity.label(),
                removed
            );

            match result? {
                EntityResult::Resolved(outcome) => {
                    summary.apply(entity.id, &outcome);
                    state.record(entity.id, outcome)?;
                    surface.progress(&summary);
                }
                EntityResult::Aborted => {
                    info!(
                        "Review[{}/{}]: batch aborted, entity left pending",
                        batch_id,
                        entity.label()
                    );
                    report.aborted = true;
                    break;
                }
                EntityResult::Failed(reason) => {
                    warn!(
                        "Review[{}/{}]: left pending: {}",
                        batch_id,
                        entity.label(),
                        reason
                    );
                    report.failures.push((entity.id, reason));
                }
            }
        }

        for entity in entities {
            match state.outcome(entity.id) {
                Some(EntityOutcome::Selected { .. }) => report.selected += 1,
                Some(EntityOutcome::Skipped { .. }) => report.skipped += 1,
                None => report.pending += 1,
            }
        }
        report.choice_lines = summary.choice_lines();
        if state.is_complete() {
            info!("Review[{}]: every entity is resolved", batch_id);
        }
        surface.finish(&summary);
        info!(
            "Review[{}]: {} selected, {} skipped, {} pending",
            batch_id, report.selected, report.skipped, report.pending
        );
        Ok(report)
    }

    fn skipped(batch_id: &str, entity: &Entity, reason: SkipReason) -> EntityResult {
        info!(
            "Review[{}/{}]: skipped, {}",
            batch_id,
            entity.label(),
            reason.describe()
        );
        EntityResult::Resolved(EntityOutcome::Skipped { reason })
    }

    fn process_entity(
        &self,
        batch_id: &str,
        entity: &Entity,
        position: usize,
        total: usize,
        staging: &StagingArea,
        surface: &mut dyn ChoiceProvider,
    ) -> Result<EntityResult, ReviewError> {
        let label = entity.label();

        let queries = match self.query_builder.build_queries(entity) {
            Ok(queries) => queries,
            Err(err) => {
                warn!("Review[{}/{}]: {}", batch_id, label, err);
                return Ok(Self::skipped(batch_id, entity, SkipReason::NoQueries));
            }
        };
        debug!(
            "Review[{}/{}]: {} queries: {:?}",
            batch_id,
            label,
            queries.len(),
            queries
        );

        let candidates =
            self.search
                .search_many(&queries, self.stop_after_candidates, entity.category);
        if candidates.is_empty() {
            return Ok(Self::skipped(batch_id, entity, SkipReason::NoCandidates));
        }

        let downloads = self.download_candidates(batch_id, entity, &candidates);
        if downloads.is_empty() {
            return Ok(Self::skipped(batch_id, entity, SkipReason::NoDownloads));
        }

        let (validated, unfiltered) = self.validate_downloads(batch_id, entity, downloads);
        let staged = Self::stage_downloads(batch_id, entity, staging, validated);
        if staged.is_empty() {
            return Ok(Self::skipped(batch_id, entity, SkipReason::NoDownloads));
        }

        let review = EntityReview {
            batch_id: batch_id.to_string(),
            entity: entity.clone(),
            position,
            total,
            candidates: staged,
            unfiltered,
        };
        info!(
            "Review[{}/{}]: presenting {} candidates{}",
            batch_id,
            label,
            review.candidates.len(),
            if unfiltered { " (unfiltered)" } else { "" }
        );

        match surface.present(&review)? {
            Choice::Skip => Ok(Self::skipped(batch_id, entity, SkipReason::Operator)),
            Choice::Abort => Ok(EntityResult::Aborted),
            Choice::Select {
                primary,
                alternates,
            } => Ok(self.commit_choice(batch_id, &review, primary, &alternates)),
        }
    }

    /// Downloads candidates best-first until `max_downloads` payloads pass the
    /// signature check. Failed or unrecognized downloads fall through to the next candidate.
    fn download_candidates(
        &self,
        batch_id: &str,
        entity: &Entity,
        candidates: &[Candidate],
    ) -> Vec<Download> {
        let mut downloads = Vec::new();
        for candidate in candidates {
            if downloads.len() >= self.review.max_downloads {
                break;
            }
            let bytes = match self.search.backend().fetch_bytes(&candidate.url) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(
                        "Review[{}/{}]: download failed for {}: {}",
                        batch_id,
                        entity.label(),
                        candidate.url,
                        err
                    );
                    continue;
                }
            };
            let Some(extension) = detect_image_extension(&bytes) else {
                warn!(
                    "Review[{}/{}]: discarding {}: not a recognized image payload",
                    batch_id,
                    entity.label(),
                    candidate.url
                );
                continue;
            };
            downloads.push(Download {
                candidate: candidate.clone(),
                bytes,
                extension,
            });
        }
        debug!(
            "Review[{}/{}]: {} of {} candidates downloaded",
            batch_id,
            entity.label(),
            downloads.len(),
            candidates.len()
        );
        downloads
    }

    /// Splits downloads by similarity verdict. When nothing passes, every
    /// download comes back with its rejection note and `true`.
    fn validate_downloads(
        &self,
        batch_id: &str,
        entity: &Entity,
        downloads: Vec<Download>,
    ) -> (Vec<(Download, String)>, bool) {
        let reference = self.similarity.locate_reference(entity);
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for download in downloads {
            let verdict = self
                .similarity
                .is_acceptable(&download.bytes, reference.as_deref());
            if verdict.accept {
                accepted.push((download, verdict.reason));
            } else {
                debug!(
                    "Review[{}/{}]: {} rejected: {}",
                    batch_id,
                    entity.label(),
                    download.candidate.title,
                    verdict.reason
                );
                rejected.push((download, verdict.reason));
            }
        }

        if accepted.is_empty() {
            warn!(
                "Review[{}/{}]: similarity check rejected all {} downloads, presenting them unfiltered",
                batch_id,
                entity.label(),
                rejected.len()
            );
            return (rejected, true);
        }
        (accepted, false)
    }

    fn stage_downloads(
        batch_id: &str,
        entity: &Entity,
        staging: &StagingArea,
        downloads: Vec<(Download, String)>,
    ) -> Vec<StagedImage> {
        let mut staged = Vec::new();
        for (download, note) in downloads {
            let rank = staged.len() + 1;
            match staging.stage(
                entity.id,
                rank,
                download.candidate,
                &download.bytes,
                download.extension,
                note,
            ) {
                Ok(image) => staged.push(image),
                Err(err) => warn!(
                    "Review[{}/{}]: failed to stage candidate {}: {}",
                    batch_id,
                    entity.label(),
                    rank,
                    err
                ),
            }
        }
        staged
    }

    fn commit_choice(
        &self,
        batch_id: &str,
        review: &EntityReview,
        primary: usize,
        alternates: &[usize],
    ) -> EntityResult {
        let entity = &review.entity;
        let Some(primary_image) = review.candidate(primary) else {
            return EntityResult::Failed(format!("candidate {primary} was not staged"));
        };
        let alternate_images: Vec<&StagedImage> = alternates
            .iter()
            .filter(|rank| **rank != primary)
            .filter_map(|rank| review.candidate(*rank))
            .collect();
        let kept_alternates: Vec<usize> = alternate_images.iter().map(|image| image.rank).collect();

        match self
            .store
            .commit_selection(entity, primary_image, &alternate_images)
        {
            Ok(committed) => {
                for image in &committed {
                    debug!(
                        "Review[{}/{}]: slot {} -> {} (+ {})",
                        batch_id,
                        entity.label(),
                        image.slot,
                        image.image_path.display(),
                        image.sidecar_path.display()
                    );
                }
                let file_name = committed
                    .first()
                    .and_then(|image| image.image_path.file_name())
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                info!(
                    "Review[{}/{}]: selected candidate {} -> {}",
                    batch_id,
                    entity.label(),
                    primary,
                    file_name
                );
                EntityResult::Resolved(EntityOutcome::Selected {
                    rank: primary,
                    alternates: kept_alternates,
                    file_name,
                })
            }
            Err(err) => EntityResult::Failed(format!("failed to commit selection: {err}")),
        }
    }
}
