//! The typed host API a collection script sees.
//!
//! Script-facing names and aliases are bound in `bindings`; this trait is
//! what they call. Bumping `HOST_API_VERSION` is required for any change
//! that alters an existing function's behavior or signature.

use crate::error::EngineError;
pub use crate::events::LogLevel;
pub use crate::navigation::TextMatch;

pub const HOST_API_VERSION: u32 = 1;

/// Host side of one task's script. Only `EngineError::Canceled` aborts the
/// script outright; any other error is raised as a catchable script error.
pub trait HostApi {
    /// Resolve `url` against the current page, fetch it and push it.
    fn navigate(&mut self, url: &str) -> Result<(), EngineError>;

    /// Like `navigate`, but parse the body as JSON and return it.
    fn fetch_json(&mut self, url: &str) -> Result<serde_json::Value, EngineError>;

    /// Pop the current page. `EngineError::Navigation` when nothing is loaded.
    fn back(&mut self) -> Result<(), EngineError>;

    fn current_url(&self) -> Result<String, EngineError>;

    fn current_content(&self) -> Result<String, EngineError>;

    fn query(&self, selector: &str) -> Result<Vec<String>, EngineError>;

    fn get_attribute(&self, selector: &str, name: &str) -> Result<Vec<String>, EngineError>;

    fn find_by_text(&self, text: &str, selector: &str) -> Result<Vec<String>, EngineError>;

    /// Every element of the current page whose text contains `text`.
    fn query_by_text(&self, text: &str) -> Result<Vec<TextMatch>, EngineError>;

    fn resolve(&self, relative: &str) -> String;

    fn is_image_url(&self, url: &str) -> bool;

    /// True when the item is stored or already collected, false when it failed.
    fn download_image(&mut self, url: &str) -> Result<bool, EngineError>;

    /// Fetch an archive and collect the images inside it. `kind` is `zip`,
    /// or empty to detect it from the URL. Returns how many images were
    /// stored or already collected.
    fn download_archive(&mut self, url: &str, kind: &str) -> Result<usize, EngineError>;

    fn add_progress(&mut self, delta: f64) -> Result<(), EngineError>;

    /// Sorted `file://` URLs of files in `folder_url` with one of `extensions`
    /// (any file when empty).
    fn list_local_files(
        &mut self,
        folder_url: &str,
        extensions: &[String],
        recursive: bool,
    ) -> Result<Vec<String>, EngineError>;

    fn set_header(&mut self, name: &str, value: &str);

    fn delete_header(&mut self, name: &str);

    fn log(&mut self, level: LogLevel, message: &str);
}
