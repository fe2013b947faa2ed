use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use std::io::Cursor;
use std::path::Path;

/// Photos above this size are recompressed before upload or queueing
pub const COMPRESS_THRESHOLD_BYTES: usize = 1024 * 1024;
/// Longest edge after recompression
pub const MAX_DIMENSION: u32 = 1920;
const JPEG_QUALITY: u8 = 80;

/// A captured photo ready for upload or queueing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedPhoto {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime_type: String,
}

/// Guesses a MIME type from the file extension (some cameras report none)
pub fn guess_mime_from_name(file_name: &str) -> &'static str {
    match Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        Some("heif") => "image/heif",
        _ => "image/jpeg",
    }
}

/// Fits `width`x`height` into a square of `max` while keeping the aspect ratio
pub fn calculate_resize_dimensions(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width, height);
    }
    if width >= height {
        let h = (u64::from(height) * u64::from(max) / u64::from(width)).max(1) as u32;
        (max, h)
    } else {
        let w = (u64::from(width) * u64::from(max) / u64::from(height)).max(1) as u32;
        (w, max)
    }
}

/// Normalizes the MIME type and recompresses large photos.
///
/// Images that cannot be decoded are passed through untouched.
pub fn prepare_photo(bytes: Vec<u8>, file_name: &str, mime_type: Option<&str>) -> PreparedPhoto {
    let mime_type = match mime_type {
        Some(m) if !m.trim().is_empty() => m.to_string(),
        _ => guess_mime_from_name(file_name).to_string(),
    };

    if bytes.len() <= COMPRESS_THRESHOLD_BYTES {
        return PreparedPhoto {
            bytes,
            file_name: file_name.to_string(),
            mime_type,
        };
    }

    match recompress(&bytes) {
        Ok(compressed) if compressed.len() < bytes.len() => {
            log::info!(
                "Compressed photo {}: {} -> {} bytes",
                file_name,
                bytes.len(),
                compressed.len()
            );
            PreparedPhoto {
                bytes: compressed,
                file_name: jpeg_file_name(file_name),
                mime_type: "image/jpeg".to_string(),
            }
        }
        Ok(_) => PreparedPhoto {
            bytes,
            file_name: file_name.to_string(),
            mime_type,
        },
        Err(e) => {
            log::warn!("Keeping original photo {}: {}", file_name, e);
            PreparedPhoto {
                bytes,
                file_name: file_name.to_string(),
                mime_type,
            }
        }
    }
}

fn recompress(bytes: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    let (w, h) = calculate_resize_dimensions(img.width(), img.height(), MAX_DIMENSION);
    let resized = if (w, h) == (img.width(), img.height()) {
        img
    } else {
        img.resize(w, h, FilterType::Lanczos3)
    };

    let mut buffer = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY);
    resized.to_rgb8().write_with_encoder(encoder)?;
    Ok(buffer.into_inner())
}

fn jpeg_file_name(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("photo");
    format!("{}.jpg", stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_dimensions() {
        let (w, h) = calculate_resize_dimensions(4000, 3000, 1920);
        assert_eq!((w, h), (1920, 1440));

        let (w, h) = calculate_resize_dimensions(3000, 4000, 1920);
        assert_eq!((w, h), (1440, 1920));

        let (w, h) = calculate_resize_dimensions(800, 600, 1920);
        assert_eq!((w, h), (800, 600));
    }

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime_from_name("a.JPG"), "image/jpeg");
        assert_eq!(guess_mime_from_name("a.webp"), "image/webp");
        assert_eq!(guess_mime_from_name("a.heic"), "image/heic");
        assert_eq!(guess_mime_from_name("noext"), "image/jpeg");
    }

    #[test]
    fn test_small_photo_passes_through() {
        let prepared = prepare_photo(vec![1, 2, 3], "shot.png", Some(""));
        assert_eq!(prepared.bytes, vec![1, 2, 3]);
        assert_eq!(prepared.mime_type, "image/png");
        assert_eq!(prepared.file_name, "shot.png");
    }

    #[test]
    fn test_undecodable_large_photo_is_kept() {
        let bytes = vec![7u8; COMPRESS_THRESHOLD_BYTES + 10];
        let prepared = prepare_photo(bytes.clone(), "raw.heic", None);
        assert_eq!(prepared.bytes, bytes);
        assert_eq!(prepared.mime_type, "image/heic");
    }

    #[test]
    fn test_large_jpeg_is_recompressed() {
        // Pixel noise keeps the high-quality source well above the threshold
        let mut state: u32 = 0x9E37_79B9;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        };
        let img = image::RgbImage::from_fn(2400, 1800, |_, _| {
            let v = next().to_le_bytes();
            image::Rgb([v[0], v[1], v[2]])
        });
        let mut source = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut source, 100);
        img.write_with_encoder(encoder).unwrap();
        let source = source.into_inner();
        assert!(
            source.len() > COMPRESS_THRESHOLD_BYTES,
            "fixture is only {} bytes",
            source.len()
        );

        let prepared = prepare_photo(source.clone(), "site.jpeg", Some("image/jpeg"));
        assert!(prepared.bytes.len() < source.len());
        assert_eq!(prepared.file_name, "site.jpg");
        let decoded = image::load_from_memory(&prepared.bytes).unwrap();
        assert_eq!(decoded.width(), 1920);
        assert_eq!(decoded.height(), 1440);
    }
}
