//! End-to-end engine tests: open documents through the store, let passes
//! run against a scripted HTTP transport, and observe diagnostics,
//! probe counts, and registry lifetimes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use url::Url;

use linkref::config::{Config, ConfigHandle};
use linkref::diagnostics::{CollectingSink, Severity};
use linkref::error::Error;
use linkref::pipeline::{DocumentPipeline, PassRequest};
use linkref::prober::{HttpProbe, NoCredentials, ProbeResponse};
use linkref::store::DocumentStore;
use linkref::types::DocumentUri;

/// Shared state behind the mock transport, kept by tests for assertions.
#[derive(Default)]
struct MockState {
    calls: Mutex<Vec<(String, String)>>,
    delay: Mutex<Duration>,
    fail: Mutex<HashMap<String, String>>,
    statuses: Mutex<HashMap<String, u16>>,
}

impl MockState {
    fn call_count(&self, url: &str) -> usize {
        return self
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, u)| return u == url)
            .count();
    }

    fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    fn set_failure(&self, url: &str, message: &str) {
        self.fail
            .lock()
            .unwrap()
            .insert(url.to_string(), message.to_string());
    }

    fn set_status(&self, url: &str, status: u16) {
        self.statuses.lock().unwrap().insert(url.to_string(), status);
    }
}

struct MockHttp(Arc<MockState>);

impl MockHttp {
    fn respond(&self, method: &str, url: &Url) -> BoxFuture<'static, Result<ProbeResponse, Error>> {
        let url_text = url.to_string();
        self.0
            .calls
            .lock()
            .unwrap()
            .push((method.to_string(), url_text.clone()));
        let delay = *self.0.delay.lock().unwrap();
        let failure = self.0.fail.lock().unwrap().get(&url_text).cloned();
        let status = self
            .0
            .statuses
            .lock()
            .unwrap()
            .get(&url_text)
            .copied()
            .unwrap_or(200);
        return async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some(message) = failure {
                return Err(Error::Probe {
                    message,
                    url: url_text,
                });
            }
            return Ok(ProbeResponse { status });
        }
        .boxed();
    }
}

impl HttpProbe for MockHttp {
    fn get(&self, url: &Url, _auth: Option<&str>) -> BoxFuture<'static, Result<ProbeResponse, Error>> {
        return self.respond("GET", url);
    }

    fn head(&self, url: &Url, _auth: Option<&str>) -> BoxFuture<'static, Result<ProbeResponse, Error>> {
        return self.respond("HEAD", url);
    }
}

struct Harness {
    root: tempfile::TempDir,
    sink: Arc<CollectingSink>,
    state: Arc<MockState>,
    store: Arc<DocumentStore>,
}

impl Harness {
    fn new(config: Config) -> Self {
        let root = tempfile::tempdir().unwrap();
        let sink = Arc::new(CollectingSink::new());
        let state = Arc::new(MockState::default());
        let store = DocumentStore::new(
            ConfigHandle::new(config),
            Box::new(MockHttp(Arc::clone(&state))),
            Box::new(NoCredentials),
            Arc::clone(&sink) as Arc<dyn linkref::diagnostics::DiagnosticsSink>,
            Some(root.path().to_path_buf()),
        );
        return Self {
            root,
            sink,
            state,
            store,
        };
    }

    fn uri(&self, name: &str) -> DocumentUri {
        return DocumentUri::from_file_path(&self.root.path().join(name));
    }

    async fn open(&self, name: &str, text: &str, version: u64) -> Arc<DocumentPipeline> {
        let pipeline = self.store.open(self.uri(name), text.to_string(), version);
        pipeline.process().await;
        return pipeline;
    }
}

/// Poll until the condition holds; the engine settles asynchronously
/// after cross-document broadcasts.
async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0_u32..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}

const URL: &str = "https://example.com/page";

#[tokio::test]
async fn reprocessing_an_unchanged_version_makes_no_probes() {
    let harness = Harness::new(Config::default());
    let text = format!("[a]({URL})\n");
    let pipeline = harness.open("a.md", &text, 1).await;
    assert_eq!(harness.state.call_count(URL), 1);

    pipeline.schedule(PassRequest::default());
    pipeline.process().await;
    assert_eq!(harness.state.call_count(URL), 1);
    assert!(harness.sink.get(&harness.uri("a.md")).is_empty());
}

#[tokio::test]
async fn fresh_results_are_reused_across_edits() {
    let harness = Harness::new(Config::default());
    let text = format!("[a]({URL})\n");
    let pipeline = harness.open("a.md", &text, 1).await;

    // New version, same address: within the TTL the cached result serves.
    pipeline.update(format!("edited\n\n{text}"), 2);
    pipeline.process().await;
    assert_eq!(harness.state.call_count(URL), 1);
}

#[tokio::test]
async fn zero_ttl_re_checks_every_pass() {
    let config = Config {
        cache_ttl: Duration::ZERO,
        ..Config::default()
    };
    let harness = Harness::new(config);
    let text = format!("[a]({URL})\n");
    let pipeline = harness.open("a.md", &text, 1).await;

    pipeline.update(format!("edited\n\n{text}"), 2);
    pipeline.process().await;
    assert_eq!(harness.state.call_count(URL), 2);
}

#[tokio::test]
async fn concurrent_checks_of_one_address_share_a_probe() {
    let harness = Harness::new(Config::default());
    harness.state.set_delay(Duration::from_millis(50));
    let text = format!("[a]({URL})\n[b]({URL})\n[c]({URL})\n");
    harness.open("a.md", &text, 1).await;
    assert_eq!(harness.state.call_count(URL), 1);
    assert!(harness.sink.get(&harness.uri("a.md")).is_empty());
}

#[tokio::test]
async fn renaming_a_heading_invalidates_dependents() {
    let harness = Harness::new(Config::default());
    harness.open("target.md", "# Intro\n\nbody\n", 1).await;
    harness.open("source.md", "[jump](./target.md#intro)\n", 1).await;
    assert!(harness.sink.get(&harness.uri("source.md")).is_empty());

    // The rename broadcasts a new version; the dependent entry is evicted
    // and re-checked without waiting out the TTL.
    harness.store.update(
        &harness.uri("target.md"),
        "# Introduction\n\nbody\n".to_string(),
        2,
    );
    let sink = Arc::clone(&harness.sink);
    let source = harness.uri("source.md");
    wait_until(move || {
        return sink
            .get(&source)
            .iter()
            .any(|d| return d.message.contains("no heading matching"));
    })
    .await;
}

#[tokio::test]
async fn restoring_a_heading_clears_the_diagnostic() {
    let harness = Harness::new(Config::default());
    harness.open("target.md", "# Overview\n", 1).await;
    harness.open("source.md", "[jump](./target.md#intro)\n", 1).await;
    let sink = Arc::clone(&harness.sink);
    let source = harness.uri("source.md");
    {
        let sink = Arc::clone(&sink);
        let source = source.clone();
        wait_until(move || return !sink.get(&source).is_empty()).await;
    }

    harness
        .store
        .update(&harness.uri("target.md"), "# Intro\n".to_string(), 2);
    wait_until(move || return sink.get(&source).is_empty()).await;
}

#[tokio::test]
async fn removing_a_link_releases_its_subscription() {
    let harness = Harness::new(Config::default());
    harness.open("target.md", "# Intro\n", 1).await;
    let pipeline = harness
        .open("source.md", "[jump](./target.md#intro)\n", 1)
        .await;
    assert_eq!(
        harness.store.registry_handler_count(&harness.uri("target.md")),
        1
    );

    pipeline.update("no links anymore\n".to_string(), 2);
    pipeline.process().await;
    assert_eq!(
        harness.store.registry_handler_count(&harness.uri("target.md")),
        0
    );
}

#[tokio::test]
async fn local_fragments_do_not_subscribe_to_their_own_document() {
    let harness = Harness::new(Config::default());
    harness.open("a.md", "[jump](#intro)\n\n# Intro\n", 1).await;
    // A same-document fragment is handled by inline eviction, not by a
    // handler on the document's own registry.
    assert_eq!(
        harness.store.registry_handler_count(&harness.uri("a.md")),
        0
    );
}

#[tokio::test]
async fn local_fragment_tracks_own_heading_edits() {
    let harness = Harness::new(Config::default());
    let pipeline = harness
        .open("a.md", "[jump](#intro)\n\n# Intro\n", 1)
        .await;
    assert!(harness.sink.get(&harness.uri("a.md")).is_empty());

    pipeline.update("[jump](#intro)\n\n# Introduction\n".to_string(), 2);
    let sink = Arc::clone(&harness.sink);
    let uri = harness.uri("a.md");
    wait_until(move || {
        return sink
            .get(&uri)
            .iter()
            .any(|d| return d.message.contains("no heading matching"));
    })
    .await;
}

#[tokio::test]
async fn dead_web_link_is_an_error_diagnostic() {
    let harness = Harness::new(Config::default());
    harness.state.set_status(URL, 404);
    harness.open("a.md", &format!("[a]({URL})\n"), 1).await;

    let diagnostics = harness.sink.get(&harness.uri("a.md"));
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].severity, Severity::Error);
    assert!(diagnostics[0].message.contains("404"));
    // HEAD was retried as GET before the link was declared dead.
    assert_eq!(harness.state.call_count(URL), 2);
}

#[tokio::test]
async fn transient_failures_are_reported_and_not_cached() {
    let harness = Harness::new(Config::default());
    harness.state.set_failure(URL, "timed out after 10s");
    let pipeline = harness.open("a.md", &format!("[a]({URL})\n"), 1).await;

    let diagnostics = harness.sink.get(&harness.uri("a.md"));
    assert_eq!(diagnostics.len(), 1);
    assert!(diagnostics[0].message.contains("could not check"));
    assert_eq!(harness.state.call_count(URL), 1);

    // A forced pass re-attempts the failed probe despite the fresh TTL.
    pipeline.schedule(PassRequest {
        drop_last_processed: true,
        reset_cache: false,
    });
    pipeline.process().await;
    assert_eq!(harness.state.call_count(URL), 2);
}

#[tokio::test]
async fn missing_reference_is_flagged_per_use() {
    let harness = Harness::new(Config::default());
    harness
        .open("a.md", "[x][miss] and later [y][miss]\n", 1)
        .await;

    let diagnostics = harness.sink.get(&harness.uri("a.md"));
    assert_eq!(diagnostics.len(), 2);
    assert!(diagnostics
        .iter()
        .all(|d| return d.message.contains("undefined link reference")));
}

#[tokio::test]
async fn duplicate_definition_carries_a_related_location() {
    let harness = Harness::new(Config::default());
    harness
        .open(
            "a.md",
            "[ref]: https://a.example\n[ref]: https://b.example\n",
            1,
        )
        .await;

    // Structural document defects carry error severity, same as a dead
    // link, so `check` exits 2 on them.
    let diagnostics = harness.sink.get(&harness.uri("a.md"));
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].severity, Severity::Error);
    let related = diagnostics[0].related.as_ref().unwrap();
    assert_eq!(related.span.line, 1);
}

#[tokio::test]
async fn closing_a_document_clears_its_diagnostics() {
    let harness = Harness::new(Config::default());
    harness.state.set_status(URL, 404);
    harness.open("a.md", &format!("[a]({URL})\n"), 1).await;
    assert!(!harness.sink.get(&harness.uri("a.md")).is_empty());

    harness.store.close(&harness.uri("a.md"));
    assert!(harness.sink.get(&harness.uri("a.md")).is_empty());
    assert!(!harness.store.is_open(&harness.uri("a.md")));
}

#[tokio::test]
async fn closing_during_an_in_flight_pass_leaves_no_diagnostics() {
    let harness = Harness::new(Config::default());
    harness.state.set_status(URL, 404);
    harness.state.set_delay(Duration::from_millis(50));
    let uri = harness.uri("a.md");
    let pipeline = harness.store.open(uri.clone(), format!("[a]({URL})\n"), 1);

    // Close while the pass is still probing; the pass must not publish
    // its stale diagnostics after the close cleared them.
    tokio::time::sleep(Duration::from_millis(10)).await;
    harness.store.close(&uri);
    pipeline.process().await;
    assert!(harness.sink.get(&uri).is_empty());
    assert!(!harness.store.is_open(&uri));
}

#[tokio::test]
async fn closing_a_target_marks_dependents() {
    let harness = Harness::new(Config::default());
    harness.open("target.md", "# Intro\n", 1).await;
    harness.open("source.md", "[jump](./target.md#intro)\n", 1).await;
    assert!(harness.sink.get(&harness.uri("source.md")).is_empty());

    // No file ever existed on disk, so once the buffer is gone the
    // fragment check falls through to a missing path.
    harness.store.close(&harness.uri("target.md"));
    let sink = Arc::clone(&harness.sink);
    let source = harness.uri("source.md");
    wait_until(move || return !sink.get(&source).is_empty()).await;
}

#[tokio::test]
async fn country_code_pattern_adds_a_note() {
    let config = Config {
        country_code_regex: Some(regex::Regex::new(r"\.ru/").unwrap()),
        ..Config::default()
    };
    let harness = Harness::new(config);
    harness
        .open("a.md", "[a](https://host.ru/page)\n", 1)
        .await;

    let diagnostics = harness.sink.get(&harness.uri("a.md"));
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].severity, Severity::Information);
}

#[tokio::test]
async fn unresolvable_links_are_informational() {
    let harness = Harness::new(Config::default());
    harness.open("a.md", "[mail](mailto:a@b.example)\n", 1).await;

    let diagnostics = harness.sink.get(&harness.uri("a.md"));
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].severity, Severity::Information);
    assert!(diagnostics[0].message.contains("cannot check"));
}

#[tokio::test]
async fn file_links_are_checked_on_disk() {
    let harness = Harness::new(Config::default());
    std::fs::write(harness.root.path().join("other.md"), "# Deep Dive\n").unwrap();

    harness
        .open(
            "a.md",
            "[ok](./other.md)\n[frag](./other.md#deep-dive)\n[bad](./missing.md)\n",
            1,
        )
        .await;

    let diagnostics = harness.sink.get(&harness.uri("a.md"));
    assert_eq!(diagnostics.len(), 1);
    assert!(diagnostics[0].message.contains("file not found"));
}

#[tokio::test]
async fn config_reload_triggers_full_re_check() {
    let harness = Harness::new(Config::default());
    let text = format!("[a]({URL})\n");
    harness.open("a.md", &text, 1).await;
    assert_eq!(harness.state.call_count(URL), 1);

    harness.store.config().replace(Config::default());
    harness.store.reprocess_all();
    for pipeline in harness.store.open_pipelines() {
        pipeline.process().await;
    }
    assert_eq!(harness.state.call_count(URL), 2);
}
