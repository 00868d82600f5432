//! Browser review surface served from the leased port.
//!
//! A server thread answers HTTP requests against a shared view of the batch and
//! forwards operator decisions over an unbounded channel; the session thread
//! blocks on that channel while an entity is presented.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::image_pipeline::content_type_for_extension;
use crate::protocol::{Choice, ReviewMessage};
use crate::review_pages::{
    render_entity_page, render_index, render_message_page, render_submit_page,
};
use crate::review_surface::{parse_choice, BatchSummary, ChoiceProvider, EntityReview, ReviewError};
use crate::staging::resolve_staged_file;

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const MAX_FORM_BYTES: u64 = 16 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Index,
    Next,
    Entity { id: i64, page: usize },
    Staged(String),
    Choose,
    Abort,
    Submit,
    NotFound,
}

fn parse_route(is_post: bool, url: &str) -> Route {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    match (is_post, path) {
        (false, "/") => Route::Index,
        (false, "/next") => Route::Next,
        (false, "/submit") => Route::Submit,
        (true, "/choose") => Route::Choose,
        (true, "/abort") => Route::Abort,
        (false, _) => {
            if let Some(id) = path.strip_prefix("/entity/") {
                let Ok(id) = id.parse::<i64>() else {
                    return Route::NotFound;
                };
                let page = parse_form(query)
                    .get("page")
                    .and_then(|page| page.parse().ok())
                    .unwrap_or(1);
                return Route::Entity { id, page };
            }
            if let Some(file_name) = path.strip_prefix("/staged/") {
                return urlencoding::decode(file_name)
                    .map(|name| Route::Staged(name.into_owned()))
                    .unwrap_or(Route::NotFound);
            }
            Route::NotFound
        }
        (true, _) => Route::NotFound,
    }
}

/// Decodes `application/x-www-form-urlencoded` pairs; undecodable pairs are dropped.
fn parse_form(body: &str) -> HashMap<String, String> {
    body.split('&')
        .filter_map(|pair| pair.split_once('='))
        .filter_map(|(key, value)| {
            let key = urlencoding::decode(&key.replace('+', " ")).ok()?.into_owned();
            let value = urlencoding::decode(&value.replace('+', " ")).ok()?.into_owned();
            Some((key, value))
        })
        .collect()
}

struct SharedView {
    summary: BatchSummary,
    current: Option<EntityReview>,
    page_size: usize,
    run_dir: PathBuf,
}

fn lock_view(shared: &Mutex<SharedView>) -> MutexGuard<'_, SharedView> {
    match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn html_response(status: u16, html: String) -> tiny_http::Response<Cursor<Vec<u8>>> {
    let response = tiny_http::Response::from_string(html).with_status_code(status);
    match tiny_http::Header::from_bytes("Content-Type", "text/html; charset=utf-8") {
        Ok(header) => response.with_header(header),
        Err(()) => response,
    }
}

fn redirect_response(target: &str) -> tiny_http::Response<std::io::Empty> {
    let response = tiny_http::Response::empty(303);
    match tiny_http::Header::from_bytes("Location", target) {
        Ok(header) => response.with_header(header),
        Err(()) => response,
    }
}

fn respond<R: Read>(request: tiny_http::Request, response: tiny_http::Response<R>) {
    if let Err(err) = request.respond(response) {
        debug!("Review: failed to send response: {}", err);
    }
}

fn handle_choose(
    body: &str,
    shared: &Mutex<SharedView>,
    sender: &UnboundedSender<ReviewMessage>,
) -> (u16, String) {
    let form = parse_form(body);
    let Some(entity_id) = form
        .get("entity_id")
        .and_then(|value| value.trim().parse::<i64>().ok())
    else {
        return (
            400,
            render_message_page("Bad request", "The form did not name an entity.", None),
        );
    };
    let input = form.get("choice").map(String::as_str).unwrap_or_default();

    let mut view = lock_view(shared);
    let Some(current) = view.current.as_ref().filter(|review| review.entity.id == entity_id)
    else {
        return (
            409,
            render_message_page(
                "Not under review",
                "That entity is no longer awaiting a choice.",
                Some("/next"),
            ),
        );
    };

    match parse_choice(input, current.max_rank()) {
        Ok(choice) => {
            let message = match &choice {
                Choice::Skip => "Skipped.".to_string(),
                Choice::Select { primary, .. } => format!("Selected #{primary}."),
                Choice::Abort => "Stopped.".to_string(),
            };
            if sender
                .send(ReviewMessage::Decision { entity_id, choice })
                .is_err()
            {
                return (
                    503,
                    render_message_page("Session ended", "The review session has stopped.", None),
                );
            }
            view.current = None;
            (
                200,
                render_message_page("Recorded", &message, Some("/next")),
            )
        }
        Err(reason) => {
            let back = format!("/entity/{entity_id}");
            (
                400,
                render_message_page("Invalid choice", &reason, Some(&back)),
            )
        }
    }
}

fn handle_request(
    mut request: tiny_http::Request,
    shared: &Mutex<SharedView>,
    sender: &UnboundedSender<ReviewMessage>,
) {
    let is_post = *request.method() == tiny_http::Method::Post;
    let route = parse_route(is_post, request.url());
    debug!("Review: {} {} -> {:?}", request.method(), request.url(), route);

    match route {
        Route::Index => {
            let view = lock_view(shared);
            let html = render_index(&view.summary, view.current.as_ref());
            drop(view);
            respond(request, html_response(200, html));
        }
        Route::Next => {
            let current_id = lock_view(shared)
                .current
                .as_ref()
                .map(|review| review.entity.id);
            match current_id {
                Some(id) => respond(request, redirect_response(&format!("/entity/{id}"))),
                None => respond(
                    request,
                    html_response(
                        200,
                        render_message_page(
                            "Preparing",
                            "Waiting for the next entity.",
                            Some("/next"),
                        ),
                    ),
                ),
            }
        }
        Route::Entity { id, page } => {
            let view = lock_view(shared);
            let page_html = view
                .current
                .as_ref()
                .filter(|review| review.entity.id == id)
                .map(|review| render_entity_page(review, page, view.page_size));
            drop(view);
            match page_html {
                Some(html) => respond(request, html_response(200, html)),
                None => respond(
                    request,
                    html_response(
                        404,
                        render_message_page(
                            "Not under review",
                            "That entity is not awaiting a choice.",
                            Some("/next"),
                        ),
                    ),
                ),
            }
        }
        Route::Staged(file_name) => {
            let run_dir = lock_view(shared).run_dir.clone();
            let file = resolve_staged_file(&run_dir, &file_name)
                .and_then(|path| File::open(&path).ok().map(|file| (path, file)));
            match file {
                Some((path, file)) => {
                    let extension = path
                        .extension()
                        .map(|ext| ext.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    let mut response = tiny_http::Response::from_file(file);
                    if let Ok(header) = tiny_http::Header::from_bytes(
                        "Content-Type",
                        content_type_for_extension(&extension),
                    ) {
                        response = response.with_header(header);
                    }
                    respond(request, response);
                }
                None => respond(request, tiny_http::Response::empty(404)),
            }
        }
        Route::Choose => {
            let mut body = String::new();
            if let Err(err) = Read::take(request.as_reader(), MAX_FORM_BYTES).read_to_string(&mut body) {
                warn!("Review: failed to read form body: {}", err);
                respond(request, tiny_http::Response::empty(400));
                return;
            }
            let (status, html) = handle_choose(&body, shared, sender);
            respond(request, html_response(status, html));
        }
        Route::Abort => {
            let sent = sender.send(ReviewMessage::AbortBatch).is_ok();
            lock_view(shared).current = None;
            let message = if sent {
                "The batch was stopped. Unresolved entities stay pending for the next run."
            } else {
                "The review session has already stopped."
            };
            respond(
                request,
                html_response(200, render_message_page("Stopped", message, None)),
            );
        }
        Route::Submit => {
            let html = render_submit_page(&lock_view(shared).summary);
            respond(request, html_response(200, html));
        }
        Route::NotFound => respond(request, tiny_http::Response::empty(404)),
    }
}

fn serve(
    server: tiny_http::Server,
    shared: Arc<Mutex<SharedView>>,
    sender: UnboundedSender<ReviewMessage>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        match server.recv_timeout(POLL_INTERVAL) {
            Ok(Some(request)) => handle_request(request, &shared, &sender),
            Ok(None) => continue,
            Err(err) => {
                warn!("Review: server stopped receiving requests: {}", err);
                break;
            }
        }
    }
}

pub struct WebReviewSurface {
    shared: Arc<Mutex<SharedView>>,
    decisions: UnboundedReceiver<ReviewMessage>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    base_url: String,
    open_browser: bool,
    browser_opened: bool,
}

impl WebReviewSurface {
    /// Starts serving on an already-bound listener.
    pub fn start(
        listener: TcpListener,
        summary: BatchSummary,
        run_dir: PathBuf,
        page_size: usize,
        open_browser: bool,
    ) -> Result<Self, ReviewError> {
        let address = listener.local_addr()?;
        let server = tiny_http::Server::from_listener(listener, None)
            .map_err(|err| ReviewError::Surface(format!("failed to start server: {err}")))?;
        let base_url = format!("http://{address}");

        let shared = Arc::new(Mutex::new(SharedView {
            summary,
            current: None,
            page_size: page_size.max(1),
            run_dir,
        }));
        let (sender, decisions) = unbounded_channel();
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = {
            let shared = Arc::clone(&shared);
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name("review-http".to_string())
                .spawn(move || serve(server, shared, sender, shutdown))?
        };
        info!("Review: serving batch at {}", base_url);

        Ok(Self {
            shared,
            decisions,
            shutdown,
            worker: Some(worker),
            base_url,
            open_browser,
            browser_opened: false,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn clear_current(&self) {
        lock_view(&self.shared).current = None;
    }
}

impl ChoiceProvider for WebReviewSurface {
    fn progress(&mut self, summary: &BatchSummary) {
        lock_view(&self.shared).summary = summary.clone();
    }

    fn present(&mut self, review: &EntityReview) -> Result<Choice, ReviewError> {
        let entity_id = review.entity.id;
        lock_view(&self.shared).current = Some(review.clone());

        let url = format!("{}/entity/{}", self.base_url, entity_id);
        info!(
            "Review[{}]: awaiting choice for {} ({}/{}) at {}",
            review.batch_id,
            review.entity.label(),
            review.position,
            review.total,
            url
        );
        if self.open_browser && !self.browser_opened {
            self.browser_opened = true;
            if let Err(err) = webbrowser::open(&url) {
                warn!("Review: failed to open browser, visit {} manually: {}", url, err);
            }
        }

        loop {
            match self.decisions.blocking_recv() {
                Some(ReviewMessage::Decision {
                    entity_id: decided,
                    choice,
                }) if decided == entity_id => {
                    self.clear_current();
                    return Ok(choice);
                }
                Some(ReviewMessage::Decision {
                    entity_id: stale, ..
                }) => {
                    debug!("Review: ignoring decision for entity {} not under review", stale);
                }
                Some(ReviewMessage::AbortBatch) => {
                    self.clear_current();
                    return Ok(Choice::Abort);
                }
                None => {
                    return Err(ReviewError::Surface(
                        "review server stopped before a choice was made".to_string(),
                    ))
                }
            }
        }
    }

    fn finish(&mut self, summary: &BatchSummary) {
        let mut view = lock_view(&self.shared);
        view.summary = summary.clone();
        view.current = None;
        drop(view);
        info!(
            "Review[{}]: batch finished, {}/{} resolved",
            summary.batch_id,
            summary.resolved(),
            summary.entries.len()
        );
    }
}

impl Drop for WebReviewSurface {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Review: server thread panicked");
            }
        }
    }
}
