//! Curl-backed fetcher: one blocking Easy handle per request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{FetchResponse, Fetcher, Headers};
use crate::config::EngineConfig;
use crate::retry::FetchError;

/// Transfer limits applied to every request.
#[derive(Debug, Clone)]
pub struct CurlOptions {
    pub user_agent: String,
    pub connect_timeout: Duration,
    /// Total time allowed per request.
    pub timeout: Duration,
    pub max_response_bytes: u64,
    pub max_redirections: u32,
}

impl CurlOptions {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            user_agent: cfg.user_agent.clone(),
            connect_timeout: Duration::from_secs(30),
            timeout: Duration::from_secs(cfg.request_timeout_secs.max(1)),
            max_response_bytes: cfg.max_response_bytes,
            max_redirections: 10,
        }
    }
}

impl Default for CurlOptions {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CurlFetcher {
    opts: CurlOptions,
}

impl CurlFetcher {
    pub fn new(opts: CurlOptions) -> Self {
        Self { opts }
    }
}

impl Fetcher for CurlFetcher {
    fn get(&self, url: &str, headers: &Headers) -> Result<FetchResponse, FetchError> {
        let mut easy = curl::easy::Easy::new();
        easy.url(url).map_err(FetchError::Curl)?;
        easy.follow_location(true).map_err(FetchError::Curl)?;
        easy.max_redirections(self.opts.max_redirections)
            .map_err(FetchError::Curl)?;
        easy.useragent(&self.opts.user_agent)
            .map_err(FetchError::Curl)?;
        // Empty string = accept every encoding curl can decode.
        easy.accept_encoding("").map_err(FetchError::Curl)?;
        easy.connect_timeout(self.opts.connect_timeout)
            .map_err(FetchError::Curl)?;
        easy.low_speed_limit(1024).map_err(FetchError::Curl)?;
        easy.low_speed_time(Duration::from_secs(60))
            .map_err(FetchError::Curl)?;
        easy.timeout(self.opts.timeout).map_err(FetchError::Curl)?;

        if !headers.is_empty() {
            let mut list = curl::easy::List::new();
            for (k, v) in headers {
                list.append(&format!("{}: {}", k.trim(), v.trim()))
                    .map_err(FetchError::Curl)?;
            }
            easy.http_headers(list).map_err(FetchError::Curl)?;
        }

        let limit = self.opts.max_response_bytes;
        let too_large = Arc::new(AtomicBool::new(false));
        let too_large_cb = Arc::clone(&too_large);
        let mut body = Vec::new();
        let performed = {
            let mut transfer = easy.transfer();
            transfer
                .write_function(|data| {
                    if (body.len() + data.len()) as u64 > limit {
                        too_large_cb.store(true, Ordering::Relaxed);
                        return Ok(0); // abort transfer
                    }
                    body.extend_from_slice(data);
                    Ok(data.len())
                })
                .map_err(FetchError::Curl)?;
            transfer.perform()
        };
        if too_large.load(Ordering::Relaxed) {
            return Err(FetchError::TooLarge { limit });
        }
        performed.map_err(FetchError::Curl)?;

        let status = easy.response_code().map_err(FetchError::Curl)?;
        // file:// and other non-HTTP schemes report 0.
        if status != 0 && !(200..300).contains(&status) {
            return Err(FetchError::Http(status));
        }
        let content_type = easy
            .content_type()
            .map_err(FetchError::Curl)?
            .map(str::to_string);
        let final_url = easy
            .effective_url()
            .map_err(FetchError::Curl)?
            .unwrap_or(url)
            .to_string();
        tracing::debug!(url, status, bytes = body.len(), "fetched");

        Ok(FetchResponse {
            status,
            content_type,
            body,
            final_url,
        })
    }
}
