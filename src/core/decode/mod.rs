//! # Decode Module
//!
//! The stateless decode function and its parameter types.
//!
//! The engine itself implements no codecs: decoding is delegated to a
//! [`DecodeFn`] closure so consumers can plug in their own decoders.
//! A default implementation backed by the `image` crate is provided,
//! with memory-mapped reads for large files and SIMD-accelerated
//! resizing. Panics inside a decode function are caught and reported
//! as error outcomes, never propagated as a crash.

use crate::error::DecodeError;
use fast_image_resize::{images::Image, PixelType, ResizeOptions, Resizer};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Minimum file size to use memory-mapped I/O (1MB)
const MMAP_THRESHOLD: u64 = 1024 * 1024;

/// What kind of buffer a decode should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeMode {
    /// Raw RGBA pixels for on-screen presentation.
    Pixels,
    /// Encoded (PNG) thumbnail bytes ready for database persistence.
    ThumbnailBytes,
}

/// How full-size decode requests pick their target dimensions.
///
/// A closed tagged variant rather than an open hierarchy: there are
/// exactly two strategies and they can be swapped without a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodingStrategy {
    /// Decode down-scaled to fit within the given bounds.
    Fast { max_w: u32, max_h: u32 },
    /// Decode at the image's native resolution.
    Full,
}

impl DecodingStrategy {
    /// The target dimensions this strategy requests, if any.
    pub fn target_size(&self) -> (Option<u32>, Option<u32>) {
        match self {
            DecodingStrategy::Fast { max_w, max_h } => (Some(*max_w), Some(*max_h)),
            DecodingStrategy::Full => (None, None),
        }
    }
}

/// Parameters for one decode call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecodeJob {
    pub path: PathBuf,
    pub target_w: Option<u32>,
    pub target_h: Option<u32>,
    pub mode: DecodeMode,
}

/// The buffer a successful decode produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedBuffer {
    /// Raw RGBA pixels at the buffer's own dimensions.
    Pixels { rgba: Vec<u8>, width: u32, height: u32 },
    /// Encoded thumbnail bytes; `width`/`height` are the *source*
    /// image's dimensions, kept for metadata rows.
    Encoded { bytes: Vec<u8>, width: u32, height: u32 },
}

impl DecodedBuffer {
    /// Source dimensions carried by this buffer.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            DecodedBuffer::Pixels { width, height, .. } => (*width, *height),
            DecodedBuffer::Encoded { width, height, .. } => (*width, *height),
        }
    }
}

/// Result of one decode call: `(path, buffer | None, error | None)`.
#[derive(Debug, Clone)]
pub struct DecodeOutcome {
    pub path: PathBuf,
    pub buffer: Option<DecodedBuffer>,
    pub error: Option<String>,
}

/// A stateless decode function shared across worker threads.
pub type DecodeFn = Arc<dyn Fn(&DecodeJob) -> DecodeOutcome + Send + Sync>;

/// The default decode function.
///
/// Wraps [`decode_image`] in `catch_unwind` so a codec fault inside one
/// request surfaces as an error outcome for that request only.
pub fn default_decoder() -> DecodeFn {
    Arc::new(|job: &DecodeJob| {
        let result = catch_unwind(AssertUnwindSafe(|| decode_image(job)));
        match result {
            Ok(Ok(buffer)) => DecodeOutcome {
                path: job.path.clone(),
                buffer: Some(buffer),
                error: None,
            },
            Ok(Err(e)) => DecodeOutcome {
                path: job.path.clone(),
                buffer: None,
                error: Some(e.to_string()),
            },
            Err(_) => DecodeOutcome {
                path: job.path.clone(),
                buffer: None,
                error: Some("decoder panicked".to_string()),
            },
        }
    })
}

/// Decode a single image per the job's parameters.
pub fn decode_image(job: &DecodeJob) -> Result<DecodedBuffer, DecodeError> {
    let bytes = read_file_bytes(&job.path)?;

    if !validate_image_header(&bytes) {
        return Err(DecodeError::UnsupportedFormat {
            path: job.path.clone(),
        });
    }

    let decoded = image::load_from_memory(&bytes).map_err(|e| DecodeError::DecodeFailed {
        path: job.path.clone(),
        reason: e.to_string(),
    })?;

    let rgba = decoded.to_rgba8();
    let (src_w, src_h) = rgba.dimensions();
    if src_w == 0 || src_h == 0 {
        return Err(DecodeError::EmptyImage {
            path: job.path.clone(),
        });
    }

    let (out_w, out_h) = fit_within(src_w, src_h, job.target_w, job.target_h);

    let pixels = if (out_w, out_h) == (src_w, src_h) {
        rgba.into_raw()
    } else {
        resize_rgba(&job.path, rgba.into_raw(), src_w, src_h, out_w, out_h)?
    };

    match job.mode {
        DecodeMode::Pixels => Ok(DecodedBuffer::Pixels {
            rgba: pixels,
            width: out_w,
            height: out_h,
        }),
        DecodeMode::ThumbnailBytes => {
            let bytes = encode_png(&job.path, pixels, out_w, out_h)?;
            Ok(DecodedBuffer::Encoded {
                bytes,
                width: src_w,
                height: src_h,
            })
        }
    }
}

/// Fit `(w, h)` within the optional bounds, preserving aspect ratio.
/// Never upscales.
pub fn fit_within(w: u32, h: u32, max_w: Option<u32>, max_h: Option<u32>) -> (u32, u32) {
    let mut scale = 1.0f64;
    if let Some(mw) = max_w {
        if mw > 0 {
            scale = scale.min(mw as f64 / w as f64);
        }
    }
    if let Some(mh) = max_h {
        if mh > 0 {
            scale = scale.min(mh as f64 / h as f64);
        }
    }
    if scale >= 1.0 {
        return (w, h);
    }
    let out_w = ((w as f64 * scale).round() as u32).max(1);
    let out_h = ((h as f64 * scale).round() as u32).max(1);
    (out_w, out_h)
}

/// SIMD resize of an RGBA buffer, bilinear filter.
fn resize_rgba(
    path: &Path,
    rgba: Vec<u8>,
    src_w: u32,
    src_h: u32,
    dst_w: u32,
    dst_h: u32,
) -> Result<Vec<u8>, DecodeError> {
    let src = Image::from_vec_u8(src_w, src_h, rgba, PixelType::U8x4).map_err(|e| {
        DecodeError::DecodeFailed {
            path: path.to_path_buf(),
            reason: format!("Failed to create source image: {}", e),
        }
    })?;

    let mut dst = Image::new(dst_w, dst_h, PixelType::U8x4);

    let options = ResizeOptions::new().resize_alg(fast_image_resize::ResizeAlg::Convolution(
        fast_image_resize::FilterType::Bilinear,
    ));

    let mut resizer = Resizer::new();
    resizer
        .resize(&src, &mut dst, &options)
        .map_err(|e| DecodeError::DecodeFailed {
            path: path.to_path_buf(),
            reason: format!("Resize failed: {}", e),
        })?;

    Ok(dst.into_vec())
}

fn encode_png(path: &Path, rgba: Vec<u8>, w: u32, h: u32) -> Result<Vec<u8>, DecodeError> {
    let buffer =
        image::RgbaImage::from_raw(w, h, rgba).ok_or_else(|| DecodeError::EncodeFailed {
            path: path.to_path_buf(),
            reason: "pixel buffer does not match dimensions".to_string(),
        })?;

    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(buffer)
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .map_err(|e| DecodeError::EncodeFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    Ok(bytes)
}

/// Read file bytes using memory-mapped I/O for large files.
///
/// For files >= 1MB, memory mapping avoids copying data from kernel to
/// user space. For smaller files, standard `fs::read()` is faster due
/// to lower overhead.
pub fn read_file_bytes(path: &Path) -> Result<FileBytes, DecodeError> {
    let metadata = std::fs::metadata(path).map_err(|e| DecodeError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    if metadata.len() >= MMAP_THRESHOLD {
        let file = File::open(path).map_err(|e| DecodeError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        // SAFETY: read-only mapping; the file handle lives as long as
        // the mmap.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| DecodeError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(FileBytes::Mmap(mmap))
    } else {
        let bytes = std::fs::read(path).map_err(|e| DecodeError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(FileBytes::Vec(bytes))
    }
}

/// File bytes that may be either owned or memory-mapped.
pub enum FileBytes {
    /// Standard heap-allocated bytes
    Vec(Vec<u8>),
    /// Memory-mapped bytes (zero-copy from disk)
    Mmap(Mmap),
}

impl std::ops::Deref for FileBytes {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        match self {
            FileBytes::Vec(v) => v,
            FileBytes::Mmap(m) => m,
        }
    }
}

/// Validate image header bytes to quickly reject non-images.
///
/// Much faster than attempting a full decode on arbitrary files.
pub fn validate_image_header(bytes: &[u8]) -> bool {
    if bytes.len() < 8 {
        return false;
    }

    // JPEG: FF D8 FF
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return true;
    }

    // PNG: 89 50 4E 47 0D 0A 1A 0A
    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return true;
    }

    // GIF: 47 49 46 38
    if bytes.starts_with(&[0x47, 0x49, 0x46, 0x38]) {
        return true;
    }

    // WebP: RIFF....WEBP
    if bytes.len() >= 12 && bytes.starts_with(&[0x52, 0x49, 0x46, 0x46]) && &bytes[8..12] == b"WEBP"
    {
        return true;
    }

    // BMP: 42 4D
    if bytes.starts_with(&[0x42, 0x4D]) {
        return true;
    }

    // TIFF: little or big endian
    if bytes.starts_with(&[0x49, 0x49, 0x2A, 0x00]) || bytes.starts_with(&[0x4D, 0x4D, 0x00, 0x2A])
    {
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_test_png(dir: &TempDir, name: &str, w: u32, h: u32) -> PathBuf {
        let path = dir.path().join(name);
        let img = image::RgbaImage::from_fn(w, h, |x, y| {
            image::Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
        });
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn strategy_target_size() {
        let fast = DecodingStrategy::Fast {
            max_w: 1920,
            max_h: 1080,
        };
        assert_eq!(fast.target_size(), (Some(1920), Some(1080)));
        assert_eq!(DecodingStrategy::Full.target_size(), (None, None));
    }

    #[test]
    fn fit_within_preserves_aspect_and_never_upscales() {
        assert_eq!(fit_within(400, 200, Some(200), Some(200)), (200, 100));
        assert_eq!(fit_within(100, 100, Some(200), Some(200)), (100, 100));
        assert_eq!(fit_within(100, 400, Some(200), Some(200)), (50, 200));
        assert_eq!(fit_within(400, 200, None, None), (400, 200));
    }

    #[test]
    fn decode_produces_pixels_at_target() {
        let dir = TempDir::new().unwrap();
        let path = write_test_png(&dir, "a.png", 64, 32);

        let job = DecodeJob {
            path,
            target_w: Some(32),
            target_h: Some(32),
            mode: DecodeMode::Pixels,
        };
        let buffer = decode_image(&job).unwrap();

        match buffer {
            DecodedBuffer::Pixels { rgba, width, height } => {
                assert_eq!((width, height), (32, 16));
                assert_eq!(rgba.len(), 32 * 16 * 4);
            }
            _ => panic!("expected pixels"),
        }
    }

    #[test]
    fn decode_thumbnail_bytes_keeps_source_dimensions() {
        let dir = TempDir::new().unwrap();
        let path = write_test_png(&dir, "b.png", 64, 48);

        let job = DecodeJob {
            path,
            target_w: Some(16),
            target_h: Some(16),
            mode: DecodeMode::ThumbnailBytes,
        };
        let buffer = decode_image(&job).unwrap();

        match buffer {
            DecodedBuffer::Encoded { bytes, width, height } => {
                assert_eq!((width, height), (64, 48));
                assert!(validate_image_header(&bytes));
            }
            _ => panic!("expected encoded bytes"),
        }
    }

    #[test]
    fn default_decoder_reports_corrupt_files_as_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corrupt.jpg");
        std::fs::write(&path, b"this is not a valid image file").unwrap();

        let decode = default_decoder();
        let outcome = decode(&DecodeJob {
            path,
            target_w: None,
            target_h: None,
            mode: DecodeMode::Pixels,
        });

        assert!(outcome.buffer.is_none());
        assert!(outcome.error.is_some());
    }

    #[test]
    fn default_decoder_reports_missing_files_as_errors() {
        let decode = default_decoder();
        let outcome = decode(&DecodeJob {
            path: PathBuf::from("/nonexistent/path/x.jpg"),
            target_w: None,
            target_h: None,
            mode: DecodeMode::Pixels,
        });

        assert!(outcome.buffer.is_none());
        assert!(outcome.error.is_some());
    }

    #[test]
    fn validate_headers() {
        assert!(validate_image_header(&[
            0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46
        ]));
        assert!(validate_image_header(&[
            0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A
        ]));
        assert!(!validate_image_header(b"not an image"));
        assert!(!validate_image_header(&[0xFF, 0xD8]));
    }
}
