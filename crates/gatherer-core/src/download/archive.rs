//! Image extraction from downloaded archives (zip only).

use std::io::{Cursor, Read};
use std::path::Path;

use zip::ZipArchive;

use super::sniff::{detect_format, is_image_url};
use crate::cancel::CancellationToken;
use crate::error::EngineError;
use crate::retry::FetchError;

/// Largest single entry read into memory.
pub const MAX_ENTRY_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
}

impl ArchiveKind {
    /// `kind` names the format; empty or `none` means detect it from the
    /// URL. Unknown names are a script error.
    pub fn resolve(kind: &str, url: &str) -> Result<Self, EngineError> {
        let kind = kind.trim();
        if kind.eq_ignore_ascii_case("zip") {
            return Ok(ArchiveKind::Zip);
        }
        if kind.is_empty() || kind.eq_ignore_ascii_case("none") {
            let path = url.split(['?', '#']).next().unwrap_or_default();
            if path.to_ascii_lowercase().ends_with(".zip") {
                return Ok(ArchiveKind::Zip);
            }
        }
        Err(EngineError::Script(format!(
            "unsupported or undetectable archive type '{}' for {}",
            kind, url
        )))
    }
}

/// One image found inside an archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Path inside the archive, `/`-separated.
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Image entries of the zip archive fetched from `url`, in archive order.
/// Directories, entries that would escape the archive root and entries that
/// are not images are skipped.
pub fn extract_images(
    url: &str,
    bytes: &[u8],
    cancel: &CancellationToken,
) -> Result<Vec<ArchiveEntry>, EngineError> {
    let malformed = |e: zip::result::ZipError| EngineError::Network {
        url: url.to_string(),
        source: FetchError::Malformed(format!("zip archive: {}", e)),
    };
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(malformed)?;
    let mut images = Vec::new();
    for i in 0..archive.len() {
        cancel.check()?;
        let mut file = archive.by_index(i).map_err(malformed)?;
        if file.is_dir() {
            continue;
        }
        let Some(name) = file.enclosed_name().as_deref().map(entry_name) else {
            tracing::debug!("skipping unsafe archive entry {}", file.name());
            continue;
        };
        if file.size() > MAX_ENTRY_BYTES {
            tracing::debug!("skipping oversized archive entry {}", name);
            continue;
        }
        let mut data = Vec::with_capacity(file.size() as usize);
        (&mut file)
            .take(MAX_ENTRY_BYTES)
            .read_to_end(&mut data)
            .map_err(|e| EngineError::io(format!("reading archive entry {}", name), e))?;
        if detect_format(&data).is_none() && !is_image_url(&name) {
            continue;
        }
        images.push(ArchiveEntry { name, bytes: data });
    }
    Ok(images)
}

fn entry_name(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Address of an archive entry, used for naming and reporting.
pub fn entry_url(archive_url: &str, entry: &str) -> String {
    match url::Url::parse(archive_url) {
        Ok(mut url) => {
            if let Ok(mut segments) = url.path_segments_mut() {
                segments.extend(entry.split('/'));
            } else {
                return format!("{}/{}", archive_url.trim_end_matches('/'), entry);
            }
            url.set_query(None);
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => format!("{}/{}", archive_url.trim_end_matches('/'), entry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{jpeg, zip_of};

    #[test]
    fn kind_is_detected_from_the_url() {
        assert_eq!(ArchiveKind::resolve("", "https://h/set.ZIP?x=1").unwrap(), ArchiveKind::Zip);
        assert_eq!(ArchiveKind::resolve("none", "https://h/set.zip").unwrap(), ArchiveKind::Zip);
        assert_eq!(ArchiveKind::resolve("zip", "https://h/dl?id=3").unwrap(), ArchiveKind::Zip);
        assert!(ArchiveKind::resolve("", "https://h/dl?id=3").is_err());
        assert!(ArchiveKind::resolve("rar", "https://h/set.rar").is_err());
    }

    #[test]
    fn only_images_are_extracted() {
        let bytes = zip_of(&[
            ("cover.jpg", jpeg(1)),
            ("notes.txt", b"hello".to_vec()),
            ("pages/02.bin", jpeg(2)),
            ("pages/", Vec::new()),
        ]);
        let entries = extract_images("https://h/set.zip", &bytes, &CancellationToken::new()).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["cover.jpg", "pages/02.bin"]);
        assert_eq!(entries[1].bytes, jpeg(2));
    }

    #[test]
    fn corrupt_archives_are_malformed() {
        let err = extract_images("https://h/bad.zip", b"PK\x03\x04 not really", &CancellationToken::new()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Network { source: FetchError::Malformed(_), .. }
        ));
    }

    #[test]
    fn cancel_stops_extraction() {
        let bytes = zip_of(&[("a.jpg", jpeg(1))]);
        let token = CancellationToken::new();
        token.cancel();
        assert!(extract_images("https://h/set.zip", &bytes, &token).unwrap_err().is_canceled());
    }

    #[test]
    fn entry_urls_extend_the_archive_path() {
        assert_eq!(
            entry_url("https://h/a/set.zip?token=1", "pages/cat 1.png"),
            "https://h/a/set.zip/pages/cat%201.png"
        );
    }
}
