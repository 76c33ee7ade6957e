//! TaskHost tests against the fake fetcher and in-memory collaborators.

use std::collections::BTreeMap;
use std::time::Duration;

use super::*;
use crate::events::EngineEvent;
use crate::store::MemoryTaskStore;
use crate::task::{Task, TaskStatus};
use crate::events::ItemState;
use crate::testing::{jpeg, zip_of, FakeFetcher, Step};

const PAGE: &str = r#"<html><body>
  <a class="img" href="img/1.jpg">1</a>
  <a class="img" href="/abs/2.jpg">2</a>
  <a class="next" href="page2.html">next</a>
</body></html>"#;

struct Fixture {
    host: TaskHost,
    fetcher: Arc<FakeFetcher>,
    sink: Arc<crate::sink::MemorySink>,
    tasks: Arc<TaskTable>,
    events: Arc<EventBus>,
    cancel: CancellationToken,
}

fn fixture(fetcher: FakeFetcher, max_items: usize) -> Fixture {
    let policy = RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
    };
    fixture_with_policy(fetcher, max_items, policy)
}

fn fixture_with_policy(fetcher: FakeFetcher, max_items: usize, policy: RetryPolicy) -> Fixture {
    let fetcher = Arc::new(fetcher);
    let sink = Arc::new(crate::sink::MemorySink::new());
    let tasks = Arc::new(TaskTable::new(Arc::new(MemoryTaskStore::new())));
    let events = Arc::new(EventBus::new(Duration::from_millis(100)));
    let task = Task::pending("demo", OutputTarget::default(), BTreeMap::new(), Headers::new());
    let owner = DownloadOwner {
        task_id: task.id.clone(),
        source_id: "demo".into(),
    };
    tasks.insert(task).unwrap();
    tasks.transition(&owner.task_id, TaskStatus::Running, None).unwrap();

    let services = HostServices {
        downloads: Arc::new(DownloadQueue::new(2, fetcher.clone(), policy).with_events(events.clone())),
        sink: sink.clone(),
        fetcher: fetcher.clone(),
        tasks: tasks.clone(),
        events: events.clone(),
        page_policy: policy,
        max_items,
    };
    let cancel = CancellationToken::new();
    let host = TaskHost::new(services, owner, OutputTarget::default(), Headers::new(), cancel.clone());
    Fixture {
        host,
        fetcher,
        sink,
        tasks,
        events,
        cancel,
    }
}

fn gallery_fetcher() -> FakeFetcher {
    FakeFetcher::new()
        .route("https://site.test/gallery/index.html", vec![Step::html(PAGE)])
        .route("https://site.test/gallery/page2.html", vec![Step::html("<p>2</p>")])
        .route("https://site.test/gallery/img/1.jpg", vec![Step::image(jpeg(1))])
        .route("https://site.test/abs/2.jpg", vec![Step::image(jpeg(2))])
}

#[test]
fn navigate_query_and_download_resolve_relative_urls() {
    let mut fx = fixture(gallery_fetcher(), 100);
    let host = &mut fx.host;
    host.navigate("https://site.test/gallery/index.html").unwrap();
    let links = host.get_attribute("a.img", "href").unwrap();
    assert_eq!(links, vec!["img/1.jpg", "/abs/2.jpg"]);
    for link in &links {
        assert!(host.download_image(link).unwrap());
    }
    assert_eq!(fx.sink.items().len(), 2);
    let task = fx.tasks.get(&fx.host.owner.task_id).unwrap().unwrap();
    assert_eq!(task.items.stored, 2);
}

#[test]
fn navigation_stack_push_and_back() {
    let mut fx = fixture(gallery_fetcher(), 100);
    let host = &mut fx.host;
    assert!(matches!(host.current_url(), Err(EngineError::Navigation(_))));
    assert!(matches!(host.back(), Err(EngineError::Navigation(_))));
    assert_eq!(host.resolve("x.jpg"), "x.jpg");

    host.navigate("https://site.test/gallery/index.html").unwrap();
    host.navigate("page2.html").unwrap();
    assert_eq!(host.current_url().unwrap(), "https://site.test/gallery/page2.html");
    assert_eq!(host.query("p").unwrap(), vec!["2"]);
    host.back().unwrap();
    assert_eq!(host.current_url().unwrap(), "https://site.test/gallery/index.html");
    assert_eq!(host.page_depth(), 1);
}

#[test]
fn failed_downloads_return_false_and_are_counted() {
    let fetcher = FakeFetcher::new().route("https://site.test/broken.jpg", vec![Step::Status(500)]);
    let mut fx = fixture(fetcher, 100);
    assert!(!fx.host.download_image("https://site.test/broken.jpg").unwrap());
    let task = fx.tasks.get(&fx.host.owner.task_id).unwrap().unwrap();
    assert_eq!(task.items.failed, 1);
}

#[test]
fn cancel_during_backoff_does_not_count_a_failure() {
    let url = "https://site.test/busy.jpg";
    let fetcher = FakeFetcher::new().route(url, vec![Step::Status(503)]);
    let policy = RetryPolicy {
        max_attempts: 4,
        base_delay: Duration::from_secs(5),
        max_delay: Duration::from_secs(5),
    };
    let mut fx = fixture_with_policy(fetcher, 100, policy);
    let canceler = {
        let fetcher = fx.fetcher.clone();
        let cancel = fx.cancel.clone();
        std::thread::spawn(move || {
            while fetcher.calls(url) == 0 {
                std::thread::sleep(Duration::from_millis(5));
            }
            cancel.cancel();
        })
    };
    let stream = fx.events.subscribe();
    assert!(fx.host.download_image(url).unwrap_err().is_canceled());
    canceler.join().unwrap();

    let task = fx.tasks.get(&fx.host.owner.task_id).unwrap().unwrap();
    assert_eq!(task.items, Default::default());
    let events = stream.drain();
    assert!(!events.iter().any(|e| matches!(e, EngineEvent::TaskLog { .. })));
    assert!(matches!(
        events.last(),
        Some(EngineEvent::DownloadState { state: ItemState::Canceled, .. })
    ));
}

#[test]
fn archives_add_every_image_inside() {
    let archive = zip_of(&[
        ("set/01.jpg", jpeg(1)),
        ("set/02.jpg", jpeg(2)),
        ("set/readme.txt", b"not an image".to_vec()),
    ]);
    let fetcher = FakeFetcher::new().route("https://site.test/packs/set.zip", vec![Step::zip(archive)]);
    let mut fx = fixture(fetcher, 100);
    let stream = fx.events.subscribe();

    assert_eq!(fx.host.download_archive("https://site.test/packs/set.zip", "").unwrap(), 2);
    assert_eq!(fx.host.download_archive("https://site.test/packs/set.zip", "zip").unwrap(), 2);
    let task = fx.tasks.get(&fx.host.owner.task_id).unwrap().unwrap();
    assert_eq!(task.items.stored, 2);
    assert_eq!(task.items.duplicates, 2);
    assert_eq!(fx.sink.items().len(), 2);

    let stored: Vec<String> = stream
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::DownloadState { url, state: ItemState::Stored, .. } => Some(url),
            _ => None,
        })
        .collect();
    assert_eq!(
        stored,
        vec![
            "https://site.test/packs/set.zip/set/01.jpg",
            "https://site.test/packs/set.zip/set/02.jpg",
        ]
    );
}

#[test]
fn unknown_archive_types_are_script_errors() {
    let mut fx = fixture(FakeFetcher::new(), 100);
    match fx.host.download_archive("https://site.test/set.rar", "") {
        Err(EngineError::Script(msg)) => assert!(msg.contains("archive type"), "{msg}"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(fx.fetcher.requests().len(), 0);
}

#[test]
fn query_by_text_needs_a_page() {
    let mut fx = fixture(gallery_fetcher(), 100);
    assert!(matches!(fx.host.query_by_text("next"), Err(EngineError::Navigation(_))));
    fx.host.navigate("https://site.test/gallery/index.html").unwrap();
    let found = fx.host.query_by_text("next").unwrap();
    let link = found.last().unwrap();
    assert_eq!(link.tag, "a");
    assert_eq!(link.attrs["href"], "page2.html");
}

#[test]
fn item_limit_stops_the_script() {
    let mut fx = fixture(gallery_fetcher(), 1);
    assert!(fx.host.download_image("https://site.test/abs/2.jpg").unwrap());
    match fx.host.download_image("https://site.test/abs/2.jpg") {
        Err(EngineError::Script(msg)) => assert!(msg.contains("item limit"), "{msg}"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn canceled_token_aborts_blocking_calls() {
    let mut fx = fixture(gallery_fetcher(), 100);
    fx.cancel.cancel();
    assert!(fx.host.navigate("https://site.test/gallery/index.html").unwrap_err().is_canceled());
    assert!(fx.host.download_image("https://site.test/abs/2.jpg").unwrap_err().is_canceled());
    assert!(fx.host.add_progress(1.0).unwrap_err().is_canceled());
    assert_eq!(fx.fetcher.calls("https://site.test/abs/2.jpg"), 0);
}

#[test]
fn headers_apply_to_later_fetches() {
    let mut fx = fixture(gallery_fetcher(), 100);
    fx.host.set_header("X-Token", "abc");
    fx.host.set_header("Referer", "https://site.test/");
    fx.host.navigate("https://site.test/gallery/index.html").unwrap();
    fx.host.delete_header("x-token");
    fx.host.download_image("img/1.jpg").unwrap();

    let requests = fx.fetcher.requests();
    assert_eq!(requests[0].1.get("x-token").map(String::as_str), Some("abc"));
    assert_eq!(requests[1].1.get("x-token"), None);
    assert_eq!(
        requests[1].1.get("referer").map(String::as_str),
        Some("https://site.test/")
    );
}

#[test]
fn progress_is_clamped_and_published() {
    let mut fx = fixture(FakeFetcher::new(), 100);
    let stream = fx.events.subscribe();
    fx.host.add_progress(150.0).unwrap();
    fx.host.add_progress(10.0).unwrap();
    fx.host.add_progress(-5.0).unwrap();
    let task = fx.tasks.get(&fx.host.owner.task_id).unwrap().unwrap();
    assert_eq!(task.progress, 99.9);
    let values: Vec<f64> = stream
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::TaskProgress { progress, .. } => Some(progress),
            _ => None,
        })
        .collect();
    assert_eq!(values, vec![99.9]);
}

#[test]
fn fetch_json_parses_and_pushes() {
    let fetcher = FakeFetcher::new().route(
        "https://api.test/items",
        vec![Step::json(r#"{"items":[{"url":"a.jpg"}]}"#)],
    );
    let mut fx = fixture(fetcher, 100);
    let value = fx.host.fetch_json("https://api.test/items").unwrap();
    assert_eq!(value["items"][0]["url"], "a.jpg");
    assert_eq!(fx.host.current_url().unwrap(), "https://api.test/items");
    assert_eq!(fx.host.resolve("a.jpg"), "https://api.test/a.jpg");
}

#[test]
fn list_local_files_filters_and_sorts() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("b.PNG"), b"x").unwrap();
    std::fs::write(dir.path().join("a.jpg"), b"x").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    std::fs::write(dir.path().join("sub").join("c.jpg"), b"x").unwrap();
    let folder = url::Url::from_directory_path(dir.path()).unwrap().to_string();
    let exts = vec!["jpg".to_string(), ".png".to_string()];

    let mut fx = fixture(FakeFetcher::new(), 100);
    let flat = fx.host.list_local_files(&folder, &exts, false).unwrap();
    assert_eq!(flat.len(), 2);
    assert!(flat[0].starts_with("file:///") && flat[0].ends_with("a.jpg"));
    assert!(flat[1].ends_with("b.PNG"));

    let deep = fx.host.list_local_files(&folder, &exts, true).unwrap();
    assert_eq!(deep.len(), 3);

    let missing = fx.host.list_local_files("file:///nonexistent/gatherer", &exts, false);
    assert!(matches!(missing, Err(EngineError::Io { .. })));
}
