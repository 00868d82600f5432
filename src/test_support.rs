//! In-memory collaborators shared by unit tests.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{ImageBuffer, ImageFormat, Rgb, RgbImage};

use crate::search_client::{MediaMetadata, MediaSearchBackend, Pacer, SearchError, TitlePage};

#[derive(Default)]
struct FakeBackendState {
    titles_by_query: HashMap<String, Vec<String>>,
    metadata_by_title: HashMap<String, MediaMetadata>,
    bytes_by_url: HashMap<String, Vec<u8>>,
    failing_queries: HashSet<String>,
    search_calls: Vec<(String, usize)>,
    fetched_urls: Vec<String>,
}

/// Scripted media-search service. Clones share state so tests can inspect calls.
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeBackendState>>,
}

pub fn fake_url(title: &str) -> String {
    format!("https://upload.example.org/{}", title.replace(' ', "_"))
}

impl FakeBackend {
    fn push_title(&self, query: &str, title: &str) {
        let mut state = self.state.lock().expect("fake backend lock");
        state
            .titles_by_query
            .entry(query.to_string())
            .or_default()
            .push(title.to_string());
    }

    pub fn with_mime(self, query: &str, title: &str, width: u32, height: u32, mime: &str) -> Self {
        self.push_title(query, title);
        self.state.lock().expect("fake backend lock").metadata_by_title.insert(
            title.to_string(),
            MediaMetadata {
                url: fake_url(title),
                width,
                height,
                mime: mime.to_string(),
            },
        );
        self
    }

    pub fn with_image(self, query: &str, title: &str, width: u32, height: u32) -> Self {
        let mime = if title.to_ascii_lowercase().ends_with(".png") {
            "image/png"
        } else {
            "image/jpeg"
        };
        self.with_mime(query, title, width, height, mime)
    }

    pub fn with_missing_metadata(self, query: &str, title: &str) -> Self {
        self.push_title(query, title);
        self
    }

    pub fn with_failing_query(self, query: &str) -> Self {
        self.state
            .lock()
            .expect("fake backend lock")
            .failing_queries
            .insert(query.to_string());
        self
    }

    pub fn with_bytes(self, title: &str, bytes: Vec<u8>) -> Self {
        self.state
            .lock()
            .expect("fake backend lock")
            .bytes_by_url
            .insert(fake_url(title), bytes);
        self
    }

    pub fn searched_queries(&self) -> Vec<String> {
        let state = self.state.lock().expect("fake backend lock");
        let mut queries: Vec<String> = Vec::new();
        for (query, _) in &state.search_calls {
            if !queries.contains(query) {
                queries.push(query.clone());
            }
        }
        queries
    }

    pub fn page_offsets(&self, query: &str) -> Vec<usize> {
        let state = self.state.lock().expect("fake backend lock");
        state
            .search_calls
            .iter()
            .filter(|(called, _)| called == query)
            .map(|(_, offset)| *offset)
            .collect()
    }

    pub fn fetched_urls(&self) -> Vec<String> {
        self.state.lock().expect("fake backend lock").fetched_urls.clone()
    }
}

impl MediaSearchBackend for FakeBackend {
    fn search_titles(
        &self,
        query: &str,
        offset: usize,
        limit: usize,
    ) -> Result<TitlePage, SearchError> {
        let mut state = self.state.lock().expect("fake backend lock");
        state.search_calls.push((query.to_string(), offset));
        if state.failing_queries.contains(query) {
            return Err(SearchError::Transport("connection reset".to_string()));
        }
        let all = state.titles_by_query.get(query).cloned().unwrap_or_default();
        let titles: Vec<String> = all.iter().skip(offset).take(limit).cloned().collect();
        let end = offset + titles.len();
        Ok(TitlePage {
            titles,
            next_offset: (end < all.len()).then_some(end),
        })
    }

    fn image_metadata(&self, title: &str) -> Result<Option<MediaMetadata>, SearchError> {
        let state = self.state.lock().expect("fake backend lock");
        Ok(state.metadata_by_title.get(title).cloned())
    }

    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, SearchError> {
        let mut state = self.state.lock().expect("fake backend lock");
        state.fetched_urls.push(url.to_string());
        state
            .bytes_by_url
            .get(url)
            .cloned()
            .ok_or(SearchError::Status(404))
    }
}

/// Records requested pauses instead of sleeping.
#[derive(Clone, Default)]
pub struct RecordingPacer {
    pauses: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingPacer {
    pub fn pauses(&self) -> Vec<Duration> {
        self.pauses.lock().expect("pacer lock").clone()
    }
}

impl Pacer for RecordingPacer {
    fn pause(&self, duration: Duration) {
        self.pauses.lock().expect("pacer lock").push(duration);
    }
}

/// Left half dark, right half light; mirrored when `flipped`.
pub fn split_image(width: u32, height: u32, flipped: bool) -> RgbImage {
    ImageBuffer::from_fn(width, height, |x, _| {
        let left = x < width / 2;
        if left != flipped {
            Rgb([20, 20, 20])
        } else {
            Rgb([235, 235, 235])
        }
    })
}

pub fn encode_png(image: &RgbImage) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageFormat::Png)
        .expect("encode png");
    bytes.into_inner()
}

pub fn encode_jpeg(image: &RgbImage) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageFormat::Jpeg)
        .expect("encode jpeg");
    bytes.into_inner()
}
