//! Fetch error type for retry classification.

use std::fmt;

/// Error returned by a single fetch attempt.
/// Classified into retryable and permanent kinds before it reaches the script.
#[derive(Debug)]
pub enum FetchError {
    /// Curl reported an error (timeout, connection, unreadable file, etc.).
    Curl(curl::Error),
    /// HTTP response had a non-2xx status.
    Http(u32),
    /// Request timed out (fetchers not backed by curl).
    Timeout,
    /// Connection refused or reset (fetchers not backed by curl).
    Connection(String),
    /// Response body was empty.
    Empty,
    /// Payload is not an image.
    NotAnImage { content_type: Option<String> },
    /// Body exceeded the configured response size limit.
    TooLarge { limit: u64 },
    /// Body could not be interpreted (bad encoding, bad JSON).
    Malformed(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Curl(e) => write!(f, "{}", e),
            FetchError::Http(code) => write!(f, "HTTP {}", code),
            FetchError::Timeout => write!(f, "request timed out"),
            FetchError::Connection(msg) => write!(f, "connection failed: {}", msg),
            FetchError::Empty => write!(f, "empty response body"),
            FetchError::NotAnImage { content_type } => match content_type {
                Some(ct) => write!(f, "not an image (content-type {})", ct),
                None => write!(f, "not an image"),
            },
            FetchError::TooLarge { limit } => {
                write!(f, "response larger than {} bytes", limit)
            }
            FetchError::Malformed(msg) => write!(f, "malformed content: {}", msg),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::Curl(e) => Some(e),
            _ => None,
        }
    }
}
