//! Page navigation: history stack, page fetches and element queries.

mod selector;
mod stack;
mod xpath;

pub use selector::{find_by_text, get_attribute, is_xpath, query, query_by_text, TextMatch};
pub use stack::{PageFrame, PageStack};
pub use xpath::{translate, CssQuery, Target};

use crate::cancel::CancellationToken;
use crate::error::EngineError;
use crate::fetch::{Fetcher, Headers};
use crate::retry::{run_with_retry, RetryPolicy};

/// Fetch `url` as a page. Transient failures are retried per `policy`.
/// The frame records the final URL after redirects so relative links resolve
/// against the page that was actually served.
pub fn fetch_page(
    fetcher: &dyn Fetcher,
    url: &str,
    headers: &Headers,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<PageFrame, EngineError> {
    cancel.check()?;
    let resp = run_with_retry(policy, cancel, |_| fetcher.get(url, headers));
    cancel.check()?;
    let resp = resp.map_err(|source| EngineError::Network {
        url: url.to_string(),
        source,
    })?;
    Ok(PageFrame {
        url: resp.final_url,
        content: String::from_utf8_lossy(&resp.body).into_owned(),
    })
}
