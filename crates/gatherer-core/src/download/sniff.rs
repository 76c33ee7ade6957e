//! Image payload detection by content type and leading bytes.

/// Recognized image formats and their usual file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
    Bmp,
    Avif,
    Ico,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Gif => "gif",
            ImageFormat::Webp => "webp",
            ImageFormat::Bmp => "bmp",
            ImageFormat::Avif => "avif",
            ImageFormat::Ico => "ico",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Webp => "image/webp",
            ImageFormat::Bmp => "image/bmp",
            ImageFormat::Avif => "image/avif",
            ImageFormat::Ico => "image/x-icon",
        }
    }
}

/// Format from magic bytes, if recognized.
pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(ImageFormat::Jpeg)
    } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some(ImageFormat::Png)
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some(ImageFormat::Gif)
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some(ImageFormat::Webp)
    } else if bytes.starts_with(b"BM") && bytes.len() >= 14 {
        Some(ImageFormat::Bmp)
    } else if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" && matches!(&bytes[8..12], b"avif" | b"avis") {
        Some(ImageFormat::Avif)
    } else if bytes.starts_with(&[0x00, 0x00, 0x01, 0x00]) {
        Some(ImageFormat::Ico)
    } else {
        None
    }
}

/// A body counts as an image when its content type says so or its bytes do.
pub fn looks_like_image(bytes: &[u8], mime: Option<&str>) -> bool {
    if mime.is_some_and(|m| m.starts_with("image/")) {
        return true;
    }
    detect_format(bytes).is_some()
}

/// Extension-based guess used by `is_image_url`.
pub fn is_image_url(url: &str) -> bool {
    const EXTENSIONS: [&str; 10] = [
        "jpg", "jpeg", "png", "gif", "webp", "bmp", "avif", "ico", "tif", "tiff",
    ];
    let lower = url.trim().to_ascii_lowercase();
    if lower.starts_with("data:image/") {
        return true;
    }
    let path = match url::Url::parse(&lower) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => lower
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    path.rsplit_once('.')
        .map(|(_, ext)| EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}
