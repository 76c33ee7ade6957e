//! Local filenames for collected items.

use std::path::{Path, PathBuf};

use crate::download::detect_format;

/// Fallback stem when the URL yields nothing usable.
const DEFAULT_STEM: &str = "image";

/// Sanitizes a candidate filename for safe use on Linux.
///
/// - Replaces NUL, `/`, `\`, whitespace and control characters with `_`
/// - Collapses consecutive underscores
/// - Trims leading/trailing dots and underscores
/// - Limits length to 255 bytes (Linux NAME_MAX)
pub fn sanitize_filename(name: &str) -> String {
    const NAME_MAX: usize = 255;

    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;
    for c in name.chars() {
        let c = if c == '\0' || c == '/' || c == '\\' || c.is_control() || c.is_whitespace() {
            '_'
        } else {
            c
        };
        if c == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(c);
            prev_underscore = false;
        }
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    let mut take = trimmed.len().min(NAME_MAX);
    while take > 0 && !trimmed.is_char_boundary(take) {
        take -= 1;
    }
    trimmed[..take].to_string()
}

/// Filename for an item fetched from `url`: the last path segment, sanitized,
/// with an extension taken from the bytes when the URL has none.
pub fn filename_for(url: &str, bytes: &[u8]) -> String {
    let segment = url::Url::parse(url).ok().and_then(|u| {
        u.path_segments()
            .and_then(|mut segs| segs.next_back().map(str::to_string))
            .filter(|s| !s.is_empty())
    });
    let decoded = segment
        .map(|s| {
            url::form_urlencoded::parse(format!("x={}", s).as_bytes())
                .next()
                .map(|(_, v)| v.into_owned())
                .unwrap_or(s)
        })
        .unwrap_or_default();
    let mut name = sanitize_filename(&decoded);
    if name.is_empty() {
        name = DEFAULT_STEM.to_string();
    }
    if Path::new(&name).extension().is_none() {
        if let Some(format) = detect_format(bytes) {
            name = format!("{}.{}", name, format.extension());
        }
    }
    name
}

/// First path under `dir` for `name` that does not exist yet
/// (`a.jpg`, `a-1.jpg`, `a-2.jpg`, ...).
pub fn unique_path(dir: &Path, name: &str) -> PathBuf {
    unique_path_except(dir, name, |_| false)
}

/// Like [`unique_path`], also skipping paths for which `taken` is true.
pub fn unique_path_except(dir: &Path, name: &str, taken: impl Fn(&Path) -> bool) -> PathBuf {
    let free = |p: &Path| !p.exists() && !taken(p);
    let candidate = dir.join(name);
    if free(&candidate) {
        return candidate;
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    let mut n = 1u32;
    loop {
        let file = match &ext {
            Some(ext) => format!("{}-{}.{}", stem, n, ext),
            None => format!("{}-{}", stem, n),
        };
        let candidate = dir.join(file);
        if free(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n....";

    #[test]
    fn sanitize_replaces_separators_and_trims() {
        assert_eq!(sanitize_filename("a/b\\c.txt"), "a_b_c.txt");
        assert_eq!(sanitize_filename("  ..my  pic.png.. "), "my_pic.png");
        assert_eq!(sanitize_filename("x\0y"), "x_y");
    }

    #[test]
    fn filename_from_url_path() {
        assert_eq!(filename_for("https://example.com/a/cat.jpg?w=1", PNG), "cat.jpg");
        assert_eq!(filename_for("https://example.com/a/my%20cat.jpg", PNG), "my_cat.jpg");
    }

    #[test]
    fn filename_gets_extension_from_bytes() {
        assert_eq!(filename_for("https://example.com/img/12345", PNG), "12345.png");
        assert_eq!(filename_for("https://example.com/", PNG), "image.png");
        assert_eq!(filename_for("https://example.com/", b"???"), "image");
    }

    #[test]
    fn unique_path_adds_counter() {
        let dir = tempfile::tempdir().unwrap();
        let first = unique_path(dir.path(), "a.jpg");
        assert_eq!(first, dir.path().join("a.jpg"));
        std::fs::write(&first, b"x").unwrap();
        assert_eq!(unique_path(dir.path(), "a.jpg"), dir.path().join("a-1.jpg"));
        let claimed = dir.path().join("a-1.jpg");
        assert_eq!(
            unique_path_except(dir.path(), "a.jpg", |p| p == claimed),
            dir.path().join("a-2.jpg")
        );
    }
}
