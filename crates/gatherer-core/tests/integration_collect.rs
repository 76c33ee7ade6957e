//! Integration test: a source directory, a local HTTP site, curl, the
//! directory sink and the SQLite task store wired into one engine.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::site_server::{self, Page, SiteServer};
use gatherer_core::config::{EngineConfig, RetryConfig};
use gatherer_core::fetch::{CurlFetcher, CurlOptions};
use gatherer_core::registry::{DirectoryRegistry, MANIFEST_FILE};
use gatherer_core::sink::DirectorySink;
use gatherer_core::store::SqliteTaskStore;
use gatherer_core::{Collaborators, Engine, Task, TaskId, TaskRequest, TaskStatus};
use tempfile::tempdir;

const CRAWL: &str = r#"
set_header("X-Gatherer-Test", "yes");
navigate(base_url);
let visited = 1;
loop {
    for src in get_attribute("//div[@class='gallery']//img", "src") {
        if is_image_url(src) { download_image(resolve(src)); }
    }
    add_progress(40);
    let next = get_attribute("a.next", "href");
    if next.is_empty() || visited >= max_pages { break; }
    navigate(resolve(next[0]));
    visited += 1;
}
print(`visited ${visited} page(s)`);
"#;

fn jpeg(tag: u8) -> Vec<u8> {
    vec![0xFF, 0xD8, 0xFF, 0xE0, tag, tag, tag, tag, 0xFF, 0xD9]
}

fn gallery_site() -> SiteServer {
    site_server::start(vec![
        (
            "/",
            Page::html(
                r#"<html><body>
                <div class="gallery"><img src="img/1.jpg"><img src="img/2.jpg"></div>
                <a class="next" href="page2.html">next</a>
                </body></html>"#,
            ),
        ),
        (
            "/page2.html",
            Page::html(
                r#"<html><body>
                <div class="gallery"><img src="/img/3.jpg"><img src="img/missing.jpg"></div>
                </body></html>"#,
            ),
        ),
        ("/img/1.jpg", Page::image(jpeg(1))),
        ("/img/2.jpg", Page::image(jpeg(2))),
        ("/img/3.jpg", Page::image(jpeg(3))),
    ])
}

fn write_source(root: &Path, id: &str, base_url: &str) {
    let dir = root.join(id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join(MANIFEST_FILE),
        format!(
            r#"
name = "Local gallery"
base_url = "{base_url}"

[[parameters]]
key = "max_pages"
type = "int"
min = 1
default = 5
"#
        ),
    )
    .unwrap();
    std::fs::write(dir.join("crawl.rhai"), CRAWL).unwrap();
}

fn config() -> EngineConfig {
    EngineConfig {
        task_workers: 2,
        max_concurrent_downloads: 2,
        network_retry_count: 0,
        request_timeout_secs: 10,
        retry: RetryConfig {
            base_delay_secs: 0.01,
            max_delay_secs: 0.05,
        },
        ..EngineConfig::default()
    }
}

fn engine(sources: &Path, db: &Path, sink: DirectorySink) -> Engine {
    let cfg = config();
    Engine::init(
        cfg.clone(),
        Collaborators {
            store: Arc::new(SqliteTaskStore::open_at(db).expect("open store")),
            sink: Arc::new(sink),
            registry: Arc::new(DirectoryRegistry::new(sources)),
            fetcher: Arc::new(CurlFetcher::new(CurlOptions::from_config(&cfg))),
        },
    )
    .expect("engine init")
}

fn wait_terminal(engine: &Engine, id: &TaskId) -> Task {
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        let task = engine.get_task(id).unwrap();
        if task.status.is_terminal() {
            return task;
        }
        assert!(Instant::now() < deadline, "task did not finish: {:?}", task);
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn collects_a_paged_gallery_into_a_directory() {
    let site = gallery_site();
    let sources = tempdir().unwrap();
    let state = tempdir().unwrap();
    let out = tempdir().unwrap();
    write_source(sources.path(), "local", &site.base_url);

    let engine = engine(
        sources.path(),
        &state.path().join("tasks.db"),
        DirectorySink::new(out.path()),
    );
    let id = engine
        .submit_task(TaskRequest::new("local").output_dir(out.path()))
        .unwrap();
    let task = wait_terminal(&engine, &id);

    assert_eq!(task.status, TaskStatus::Completed, "{:?}", task.error);
    assert_eq!(task.progress, 100.0);
    assert_eq!(task.items.stored, 3);
    assert_eq!(task.items.failed, 1);
    for (name, tag) in [("1.jpg", 1), ("2.jpg", 2), ("3.jpg", 3)] {
        assert_eq!(std::fs::read(out.path().join(name)).unwrap(), jpeg(tag), "{name}");
    }

    let image_requests: Vec<_> = site
        .requests()
        .into_iter()
        .filter(|r| r.path.starts_with("/img/"))
        .collect();
    assert_eq!(image_requests.len(), 4);
    assert!(image_requests
        .iter()
        .all(|r| r.headers.get("x-gatherer-test").map(String::as_str) == Some("yes")));
}

#[test]
fn parameters_bound_the_crawl() {
    let site = gallery_site();
    let sources = tempdir().unwrap();
    let state = tempdir().unwrap();
    let out = tempdir().unwrap();
    write_source(sources.path(), "local", &site.base_url);

    let engine = engine(
        sources.path(),
        &state.path().join("tasks.db"),
        DirectorySink::new(out.path()),
    );
    let id = engine
        .submit_task(TaskRequest::new("local").param("max_pages", serde_json::json!(1)))
        .unwrap();
    let task = wait_terminal(&engine, &id);
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.items.stored, 2);
    assert_eq!(site.hits("/page2.html"), 0);
}

#[test]
fn history_survives_a_restart_and_reruns_find_duplicates() {
    let site = gallery_site();
    let sources = tempdir().unwrap();
    let state = tempdir().unwrap();
    let out = tempdir().unwrap();
    let db = state.path().join("tasks.db");
    write_source(sources.path(), "local", &site.base_url);

    let first = {
        let engine = engine(sources.path(), &db, DirectorySink::new(out.path()));
        let id = engine.submit_task(TaskRequest::new("local")).unwrap();
        wait_terminal(&engine, &id);
        id
    };

    let sink = DirectorySink::new(out.path());
    assert_eq!(sink.index_existing(out.path()).unwrap(), 3);
    let engine = engine(sources.path(), &db, sink);
    let previous = engine.get_task(&first).unwrap();
    assert_eq!(previous.status, TaskStatus::Completed);
    assert_eq!(previous.items.stored, 3);
    assert_eq!(engine.restore_pending_tasks().unwrap(), 0);

    let second = engine.retry_task(&first).unwrap();
    let task = wait_terminal(&engine, &second);
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.items.stored, 0);
    assert_eq!(task.items.duplicates, 3);

    let ids: Vec<_> = engine.list_tasks().unwrap().into_iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![first, second]);
}
