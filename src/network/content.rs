// Image content classification
// Author: kelexine (https://github.com/kelexine)

/// Image formats the cache recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    WebP,
    Gif,
    Avif,
    Bmp,
    Ico,
    Tiff,
    Svg,
    Heic,
}

impl ImageFormat {
    /// Get MIME type for this format
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::WebP => "image/webp",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Avif => "image/avif",
            ImageFormat::Bmp => "image/bmp",
            ImageFormat::Ico => "image/x-icon",
            ImageFormat::Tiff => "image/tiff",
            ImageFormat::Svg => "image/svg+xml",
            ImageFormat::Heic => "image/heic",
        }
    }

    /// Try to detect format from a MIME type. Parameters (`; charset=...`) are ignored.
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or_default().trim().to_lowercase();
        match essence.as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(ImageFormat::Jpeg),
            "image/png" | "image/apng" => Some(ImageFormat::Png),
            "image/webp" => Some(ImageFormat::WebP),
            "image/gif" => Some(ImageFormat::Gif),
            "image/avif" => Some(ImageFormat::Avif),
            "image/bmp" | "image/x-ms-bmp" => Some(ImageFormat::Bmp),
            "image/x-icon" | "image/vnd.microsoft.icon" => Some(ImageFormat::Ico),
            "image/tiff" => Some(ImageFormat::Tiff),
            "image/svg+xml" => Some(ImageFormat::Svg),
            "image/heic" | "image/heif" => Some(ImageFormat::Heic),
            _ => None,
        }
    }

    /// Detect the format from magic bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let guessed = image::guess_format(bytes).ok()?;
        match guessed {
            image::ImageFormat::Jpeg => Some(ImageFormat::Jpeg),
            image::ImageFormat::Png => Some(ImageFormat::Png),
            image::ImageFormat::WebP => Some(ImageFormat::WebP),
            image::ImageFormat::Gif => Some(ImageFormat::Gif),
            image::ImageFormat::Avif => Some(ImageFormat::Avif),
            image::ImageFormat::Bmp => Some(ImageFormat::Bmp),
            image::ImageFormat::Ico => Some(ImageFormat::Ico),
            image::ImageFormat::Tiff => Some(ImageFormat::Tiff),
            _ => None,
        }
    }
}

/// Content types origins use when they do not know better.
fn is_generic(mime: &str) -> bool {
    let essence = mime.split(';').next().unwrap_or_default().trim().to_lowercase();
    essence.is_empty() || essence == "application/octet-stream" || essence == "binary/octet-stream"
}

/// Decide whether a fetched body is an image.
///
/// Returns the content type to record with the entry, or `None` when the
/// resource must be rejected. Declared `image/*` types are trusted; generic or
/// missing types fall back to sniffing the payload.
pub fn classify(content_type: Option<&str>, bytes: &[u8]) -> Option<String> {
    match content_type {
        Some(declared) if !is_generic(declared) => {
            if let Some(format) = ImageFormat::from_mime_type(declared) {
                return Some(format.mime_type().to_string());
            }
            let essence = declared.split(';').next().unwrap_or_default().trim().to_lowercase();
            essence.starts_with("image/").then_some(essence)
        }
        _ => ImageFormat::from_bytes(bytes).map(|format| format.mime_type().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    #[test]
    fn test_declared_image_types_accepted() {
        assert_eq!(classify(Some("image/PNG"), b"").as_deref(), Some("image/png"));
        assert_eq!(classify(Some("image/jpg; q=1"), b"").as_deref(), Some("image/jpeg"));
        assert_eq!(classify(Some("image/x-portable-anymap"), b"").as_deref(), Some("image/x-portable-anymap"));
    }

    #[test]
    fn test_non_image_rejected() {
        assert!(classify(Some("text/html; charset=utf-8"), b"<html>").is_none());
        assert!(classify(Some("application/json"), PNG_MAGIC).is_none());
    }

    #[test]
    fn test_generic_types_are_sniffed() {
        assert_eq!(classify(None, PNG_MAGIC).as_deref(), Some("image/png"));
        assert_eq!(classify(Some("application/octet-stream"), PNG_MAGIC).as_deref(), Some("image/png"));
        assert!(classify(None, b"not an image at all").is_none());
    }
}
