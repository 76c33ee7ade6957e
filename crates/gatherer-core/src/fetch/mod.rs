//! HTTP fetch seam.
//!
//! Every network or `file://` read made on behalf of a script goes through a
//! `Fetcher`. The engine ships a curl-backed one; tests substitute their own.

mod easy;

pub use easy::{CurlFetcher, CurlOptions};

use std::collections::BTreeMap;

use crate::retry::FetchError;

/// Outgoing request headers, keyed by lowercase name.
pub type Headers = BTreeMap<String, String>;

/// Normalized header key (names are case-insensitive).
pub fn header_key(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

/// A successful response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// HTTP status, or 0 for protocols without one (`file://`).
    pub status: u32,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    /// URL after redirects.
    pub final_url: String,
}

impl FetchResponse {
    /// Content type without parameters, lowercased.
    pub fn mime(&self) -> Option<String> {
        self.content_type.as_deref().map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }
}

pub trait Fetcher: Send + Sync {
    /// GET `url` with `headers` applied to the request and to every redirect
    /// it follows. Non-success statuses are `FetchError::Http`.
    fn get(&self, url: &str, headers: &Headers) -> Result<FetchResponse, FetchError>;
}
