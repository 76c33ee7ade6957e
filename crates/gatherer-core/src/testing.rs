//! Test doubles shared by unit tests: a scripted fetcher and fixtures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::fetch::{FetchResponse, Fetcher, Headers};
use crate::retry::FetchError;

/// What the fake returns for one call to a URL.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Reply {
        body: Vec<u8>,
        content_type: Option<String>,
    },
    Status(u32),
    Reset,
    Panic,
}

impl Step {
    pub(crate) fn image(body: Vec<u8>) -> Self {
        Step::Reply {
            body,
            content_type: Some("image/jpeg".into()),
        }
    }

    pub(crate) fn html(body: &str) -> Self {
        Step::Reply {
            body: body.as_bytes().to_vec(),
            content_type: Some("text/html; charset=utf-8".into()),
        }
    }

    pub(crate) fn zip(body: Vec<u8>) -> Self {
        Step::Reply {
            body,
            content_type: Some("application/zip".into()),
        }
    }

    pub(crate) fn json(body: &str) -> Self {
        Step::Reply {
            body: body.as_bytes().to_vec(),
            content_type: Some("application/json".into()),
        }
    }
}

/// Zip archive holding `entries`; names ending in `/` become directories.
pub(crate) fn zip_of(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    use std::io::Write;

    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    for (name, body) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, options).unwrap();
        } else {
            writer.start_file(*name, options).unwrap();
            writer.write_all(body).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

/// JPEG-looking bytes, distinct per `tag`.
pub(crate) fn jpeg(tag: u8) -> Vec<u8> {
    vec![0xFF, 0xD8, 0xFF, 0xE0, tag, tag, tag, 0xFF, 0xD9]
}

#[derive(Default)]
struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
}

/// Scripted fetcher. Each URL has a list of steps; the last step repeats.
/// Unknown URLs answer 404.
#[derive(Default)]
pub(crate) struct FakeFetcher {
    routes: Mutex<HashMap<String, Vec<Step>>>,
    calls: Mutex<HashMap<String, usize>>,
    requests: Mutex<Vec<(String, Headers)>>,
    delay: Mutex<Duration>,
    gate: Option<Gate>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every call blocks until `open_gate` is called.
    pub(crate) fn gated() -> Self {
        Self {
            gate: Some(Gate::default()),
            ..Self::default()
        }
    }

    pub(crate) fn route(self, url: &str, steps: Vec<Step>) -> Self {
        self.set_route(url, steps);
        self
    }

    pub(crate) fn set_route(&self, url: &str, steps: Vec<Step>) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), steps);
    }

    pub(crate) fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = delay;
        self
    }

    pub(crate) fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            *gate.open.lock().unwrap() = true;
            gate.cond.notify_all();
        }
    }

    pub(crate) fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub(crate) fn requests(&self) -> Vec<(String, Headers)> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn wait_gate(&self) {
        if let Some(gate) = &self.gate {
            let mut open = gate.open.lock().unwrap();
            while !*open {
                open = gate.cond.wait(open).unwrap();
            }
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Fetcher for FakeFetcher {
    fn get(&self, url: &str, headers: &Headers) -> Result<FetchResponse, FetchError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), headers.clone()));

        let n = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(url.to_string()).or_insert(0);
            *n += 1;
            *n - 1
        };
        self.wait_gate();
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let step = {
            let routes = self.routes.lock().unwrap();
            routes
                .get(url)
                .and_then(|steps| steps.get(n.min(steps.len().saturating_sub(1))).cloned())
        };
        match step {
            Some(Step::Reply { body, content_type }) => Ok(FetchResponse {
                status: 200,
                content_type,
                body,
                final_url: url.to_string(),
            }),
            Some(Step::Status(code)) => Err(FetchError::Http(code)),
            Some(Step::Reset) => Err(FetchError::Connection("connection reset".into())),
            Some(Step::Panic) => panic!("fake fetcher asked to panic on {url}"),
            None => Err(FetchError::Http(404)),
        }
    }
}
