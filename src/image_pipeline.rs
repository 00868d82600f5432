//! Image byte helpers: format sniffing, tolerant decoding, and atomic writes.

use std::fs;
use std::io;
use std::path::Path;

use image::DynamicImage;
use zune_core::{colorspace::ColorSpace, options::DecoderOptions};
use zune_jpeg::JpegDecoder;

/// File extension for a recognized raster signature.
pub fn detect_image_extension(bytes: &[u8]) -> Option<&'static str> {
    if bytes.len() >= 8 && bytes[0..8] == [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A] {
        return Some("png");
    }
    if bytes.len() >= 3 && bytes[0] == 0xFF && bytes[1] == 0xD8 && bytes[2] == 0xFF {
        return Some("jpg");
    }
    if bytes.len() >= 12 && bytes[0..4] == *b"RIFF" && bytes[8..12] == *b"WEBP" {
        return Some("webp");
    }
    if bytes.len() >= 6 && (&bytes[0..6] == b"GIF87a" || &bytes[0..6] == b"GIF89a") {
        return Some("gif");
    }
    if bytes.len() >= 2 && bytes[0] == b'B' && bytes[1] == b'M' {
        return Some("bmp");
    }
    None
}

pub fn is_supported_extension(extension: &str) -> bool {
    matches!(
        extension.to_ascii_lowercase().as_str(),
        "png" | "jpg" | "jpeg" | "webp" | "gif" | "bmp"
    )
}

pub fn content_type_for_extension(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}

pub fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            fs::create_dir_all(parent)
        }
        _ => Ok(()),
    }
}

/// Writes through a sibling temp file and renames into place.
pub fn write_bytes_atomic(target_path: &Path, bytes: &[u8]) -> io::Result<()> {
    ensure_parent_dir(target_path)?;
    let mut temp_name = target_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    temp_name.push(".tmp");
    let temp_path = target_path.with_file_name(temp_name);
    if temp_path.exists() {
        let _ = fs::remove_file(&temp_path);
    }
    fs::write(&temp_path, bytes)?;
    fs::rename(&temp_path, target_path).inspect_err(|_| {
        let _ = fs::remove_file(&temp_path);
    })
}

fn looks_like_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0xff && bytes[1] == 0xd8
}

fn decode_jpeg_non_strict(bytes: &[u8]) -> Option<DynamicImage> {
    if !looks_like_jpeg(bytes) {
        return None;
    }

    let options = DecoderOptions::new_cmd()
        .set_strict_mode(false)
        .jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(bytes, options);
    let pixels = decoder.decode().ok()?;
    let (width, height) = decoder.dimensions()?;
    let image = image::RgbaImage::from_raw(width as u32, height as u32, pixels)?;
    Some(DynamicImage::ImageRgba8(image))
}

pub fn decode_image_from_memory_with_fallback(bytes: &[u8]) -> Option<DynamicImage> {
    // Commons hosts plenty of JPEGs with trailing garbage the strict decoder refuses.
    image::load_from_memory(bytes)
        .ok()
        .or_else(|| decode_jpeg_non_strict(bytes))
}

pub fn decode_image_from_path_with_fallback(path: &Path) -> Option<DynamicImage> {
    image::open(path).ok().or_else(|| {
        let bytes = fs::read(path).ok()?;
        decode_image_from_memory_with_fallback(&bytes)
    })
}

#[cfg(test)]
mod tests {
    use super::{
        content_type_for_extension, decode_image_from_memory_with_fallback,
        decode_image_from_path_with_fallback, detect_image_extension, write_bytes_atomic,
    };
    use crate::test_support::{encode_png, split_image};
    use image::{codecs::jpeg::JpegEncoder, DynamicImage, GenericImageView, Rgb, RgbImage};

    #[test]
    fn test_detect_image_extension_recognizes_signatures() {
        let png = encode_png(&split_image(4, 4, false));
        assert_eq!(detect_image_extension(&png), Some("png"));
        assert_eq!(detect_image_extension(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("jpg"));
        assert_eq!(detect_image_extension(b"RIFF\0\0\0\0WEBPVP8 "), Some("webp"));
        assert_eq!(detect_image_extension(b"GIF89a...."), Some("gif"));
        assert_eq!(detect_image_extension(b"BM\0\0"), Some("bmp"));
        assert_eq!(detect_image_extension(b"<!DOCTYPE html>"), None);
        assert_eq!(detect_image_extension(&[]), None);
    }

    #[test]
    fn test_content_type_for_extension() {
        assert_eq!(content_type_for_extension("JPG"), "image/jpeg");
        assert_eq!(content_type_for_extension("png"), "image/png");
        assert_eq!(content_type_for_extension("txt"), "application/octet-stream");
    }

    #[test]
    fn test_decode_image_from_memory_with_fallback_decodes_jpeg_with_trailing_bytes() {
        let rgb = RgbImage::from_pixel(12, 9, Rgb([90, 140, 210]));
        let mut encoded = Vec::new();
        {
            let mut encoder = JpegEncoder::new_with_quality(&mut encoded, 85);
            encoder
                .encode_image(&DynamicImage::ImageRgb8(rgb))
                .expect("jpeg encoding should succeed");
        }
        encoded.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);

        let decoded = decode_image_from_memory_with_fallback(&encoded)
            .expect("fallback decoder should decode jpeg bytes");
        assert_eq!(decoded.dimensions(), (12, 9));
    }

    #[test]
    fn test_decode_image_from_memory_with_fallback_rejects_non_image_bytes() {
        assert!(decode_image_from_memory_with_fallback(b"definitely-not-an-image").is_none());
    }

    #[test]
    fn test_write_bytes_atomic_creates_parent_and_replaces_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("a").join("b").join("42_R_NAME.png");
        let png = encode_png(&split_image(6, 8, false));

        write_bytes_atomic(&target, b"old").expect("first write");
        write_bytes_atomic(&target, &png).expect("second write");
        assert_eq!(
            decode_image_from_path_with_fallback(&target).map(|decoded| decoded.dimensions()),
            Some((6, 8))
        );
        assert!(!target.with_file_name("42_R_NAME.png.tmp").exists());
    }
}
