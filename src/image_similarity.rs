//! Perceptual-hash check of downloaded candidates against an accepted reference image.

use std::fs;
use std::path::{Path, PathBuf};

use image::{imageops::FilterType, DynamicImage};
use log::{debug, warn};

use crate::config::SimilarityConfig;
use crate::image_pipeline::{
    decode_image_from_memory_with_fallback, decode_image_from_path_with_fallback,
    is_supported_extension,
};
use crate::protocol::Entity;

const HASH_EDGE: u32 = 8;
const REFERENCE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "JPG", "JPEG", "PNG"];

/// 64-bit average-luminance hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AverageHash(u64);

impl AverageHash {
    pub fn of_image(image: &DynamicImage) -> Self {
        let small = image
            .grayscale()
            .resize_exact(HASH_EDGE, HASH_EDGE, FilterType::Lanczos3)
            .to_luma8();
        let pixels: Vec<u32> = small.pixels().map(|pixel| u32::from(pixel.0[0])).collect();
        let total: u32 = pixels.iter().sum();
        let count = pixels.len().max(1) as f64;
        let mean = f64::from(total) / count;

        let bits = pixels
            .iter()
            .enumerate()
            .filter(|(_, value)| f64::from(**value) > mean)
            .fold(0u64, |bits, (index, _)| bits | (1u64 << index));
        Self(bits)
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        decode_image_from_memory_with_fallback(bytes).map(|image| Self::of_image(&image))
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        decode_image_from_path_with_fallback(path).map(|image| Self::of_image(&image))
    }

    /// Hamming distance, 0..=64.
    pub fn distance(self, other: AverageHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimilarityVerdict {
    pub accept: bool,
    /// `None` when no comparison was made.
    pub distance: Option<u32>,
    pub reason: String,
}

pub const NO_REFERENCE_REASON: &str = "no reference image to compare";

fn title_case_words(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            let Some(first) = chars.next() else {
                return String::new();
            };
            let mut out: String = first.to_uppercase().collect();
            out.push_str(&chars.as_str().to_lowercase());
            out
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn reference_name_variants(name: &str) -> Vec<String> {
    let trimmed = name.trim();
    let spaced = trimmed.replace('_', " ");
    let mut variants = Vec::new();
    for candidate in [
        trimmed.to_string(),
        title_case_words(trimmed),
        spaced.clone(),
        title_case_words(&spaced),
    ] {
        if !candidate.is_empty() && !variants.contains(&candidate) {
            variants.push(candidate);
        }
    }
    variants
}

/// First image file in `dir` whose name starts with `prefix`, in name order.
fn first_prefixed_image(dir: &Path, prefix: &str) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let mut matches: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let supported = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(is_supported_extension);
            file_name.starts_with(prefix) && supported
        })
        .collect();
    matches.sort();
    matches.into_iter().next()
}

pub struct SimilarityValidator {
    max_distance: u32,
    reference_dir: PathBuf,
}

impl SimilarityValidator {
    pub fn new(config: &SimilarityConfig) -> Self {
        Self {
            max_distance: config.max_distance.min(64),
            reference_dir: config.reference_dir.clone(),
        }
    }

    /// Looks for a previously accepted image: exact name, then id-prefixed, then the cropped cache.
    pub fn locate_reference(&self, entity: &Entity) -> Option<PathBuf> {
        if !self.reference_dir.is_dir() {
            return None;
        }

        for variant in reference_name_variants(&entity.name) {
            for extension in REFERENCE_EXTENSIONS {
                let path = self.reference_dir.join(format!("{variant}.{extension}"));
                if path.is_file() {
                    return Some(path);
                }
            }
        }

        let prefix = format!("{}_{}_", entity.id, entity.category.code());
        first_prefixed_image(&self.reference_dir, &prefix)
            .or_else(|| first_prefixed_image(&self.reference_dir.join("cropped"), &prefix))
    }

    pub fn is_acceptable(&self, candidate_bytes: &[u8], reference: Option<&Path>) -> SimilarityVerdict {
        let Some(reference) = reference else {
            return SimilarityVerdict {
                accept: true,
                distance: None,
                reason: NO_REFERENCE_REASON.to_string(),
            };
        };
        let reference_name = reference
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let (Some(candidate_hash), Some(reference_hash)) = (
            AverageHash::from_bytes(candidate_bytes),
            AverageHash::from_path(reference),
        ) else {
            warn!(
                "Similarity: could not hash candidate or reference {}, accepting",
                reference.display()
            );
            return SimilarityVerdict {
                accept: true,
                distance: None,
                reason: format!("could not compare with {reference_name}"),
            };
        };

        let distance = candidate_hash.distance(reference_hash);
        if distance <= self.max_distance {
            SimilarityVerdict {
                accept: true,
                distance: Some(distance),
                reason: format!("similar to {reference_name} (diff: {distance})"),
            }
        } else {
            SimilarityVerdict {
                accept: false,
                distance: Some(distance),
                reason: format!(
                    "too different from {reference_name} (diff: {distance}, threshold: {})",
                    self.max_distance
                ),
            }
        }
    }

    pub fn validate(&self, candidate_bytes: &[u8], entity: &Entity) -> SimilarityVerdict {
        let reference = self.locate_reference(entity);
        let verdict = self.is_acceptable(candidate_bytes, reference.as_deref());
        debug!(
            "Similarity[{}]: accept={} {}",
            entity.label(),
            verdict.accept,
            verdict.reason
        );
        verdict
    }
}
