//! Per-document processing pipeline: parse, publish version changes,
//! check links through the cache, rebuild diagnostics, sweep.
//!
//! Passes for one document never overlap: an async mutex serializes them
//! and a pending-flags cell coalesces bursts of requests into the next
//! pass. Requests merge their flags, so a reset-cache request is never
//! lost to coalescing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::cache::LinkCache;
use crate::config::ConfigHandle;
use crate::diagnostics::{self, Diagnostic, DiagnosticsSink};
use crate::lock;
use crate::scanner;
use crate::slug::Slug;
use crate::store::DocumentStore;
use crate::types::{DocumentUri, ParsedSnapshot, Version};

/// What a scheduled pass should do beyond the normal work.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassRequest {
    /// Forget the last processed version, forcing the pass to run even if
    /// the document content has not changed.
    pub drop_last_processed: bool,
    /// Drop every cached check result before checking.
    pub reset_cache: bool,
}

#[derive(Default)]
struct PendingFlags {
    drop_last_processed: bool,
    requested: bool,
    reset_cache: bool,
}

struct DocumentState {
    /// Version whose pass last ran to completion.
    last_processed: Option<Version>,
    /// Memoized parse of the current text, valid while its version matches.
    parsed: Option<ParsedSnapshot>,
    /// Heading slug sequence last broadcast to subscribers.
    published_slugs: Option<Vec<Slug>>,
    text: String,
    version: Version,
}

/// Incremental processor for one open document.
pub struct DocumentPipeline {
    cache: LinkCache,
    config: ConfigHandle,
    disposed: AtomicBool,
    /// Serializes passes; tokio's mutex is fair, so passes run in request
    /// order.
    pass_lock: tokio::sync::Mutex<()>,
    pending: Mutex<PendingFlags>,
    sink: Arc<dyn DiagnosticsSink>,
    state: Mutex<DocumentState>,
    store: Weak<DocumentStore>,
    uri: DocumentUri,
}

impl DocumentPipeline {
    pub(crate) fn new(
        uri: DocumentUri,
        text: String,
        version: Version,
        config: ConfigHandle,
        sink: Arc<dyn DiagnosticsSink>,
        store: Weak<DocumentStore>,
    ) -> Arc<Self> {
        return Arc::new_cyclic(|weak: &Weak<Self>| {
            return Self {
                cache: LinkCache::new(weak.clone(), store.clone(), uri.clone()),
                config,
                disposed: AtomicBool::new(false),
                pass_lock: tokio::sync::Mutex::new(()),
                pending: Mutex::new(PendingFlags::default()),
                sink,
                state: Mutex::new(DocumentState {
                    last_processed: None,
                    parsed: None,
                    published_slugs: None,
                    text,
                    version,
                }),
                store,
                uri: uri.clone(),
            };
        });
    }

    /// The document this pipeline processes.
    pub fn uri(&self) -> &DocumentUri {
        return &self.uri;
    }

    /// Current content version.
    pub fn version(&self) -> Version {
        return lock(&self.state).version;
    }

    /// Replace the document content and schedule a pass. The version must
    /// be strictly greater than any previously seen for this document.
    pub fn update(self: &Arc<Self>, text: String, version: Version) {
        {
            let mut state = lock(&self.state);
            state.text = text;
            state.version = version;
        }
        self.schedule(PassRequest::default());
    }

    /// Request a pass. Requests arriving while a pass runs are merged and
    /// satisfied by a single follow-up pass.
    pub fn schedule(self: &Arc<Self>, request: PassRequest) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut pending = lock(&self.pending);
            pending.drop_last_processed |= request.drop_last_processed;
            pending.requested = true;
            pending.reset_cache |= request.reset_cache;
        }
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            pipeline.run_pending().await;
        });
    }

    /// Run the next pending pass, if any. Coalesced requests fold into
    /// whichever spawned task gets the pass lock first; the rest find the
    /// flags already taken and return.
    async fn run_pending(self: Arc<Self>) {
        let _pass = self.pass_lock.lock().await;
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let flags = std::mem::take(&mut *lock(&self.pending));
        if !flags.requested {
            return;
        }
        self.run_pass(&flags).await;
    }

    async fn run_pass(&self, flags: &PendingFlags) {
        let (text, version) = {
            let mut state = lock(&self.state);
            if flags.drop_last_processed {
                state.last_processed = None;
            }
            // Same version, nothing forcing a re-check: the pass is a no-op
            // and touches neither the network nor the diagnostics.
            if !flags.reset_cache && state.last_processed == Some(state.version) {
                return;
            }
            (state.text.clone(), state.version)
        };

        if flags.reset_cache {
            self.cache.clear();
        }

        let snapshot = self.parse(&text, version);

        // Broadcast before checking: subscribers of this document must
        // learn about anchor changes before any of this pass's probes
        // settle against the old state.
        let slugs = snapshot.heading_slugs();
        let slugs_changed = {
            let mut state = lock(&self.state);
            let changed = state.published_slugs.as_ref() != Some(&slugs);
            if changed {
                state.published_slugs = Some(slugs);
            }
            changed
        };
        if slugs_changed {
            // Entries for this document's own fragments have no
            // subscription; evict them here so this pass re-checks them
            // against the new headings.
            self.cache.evict_local();
            if let Some(store) = self.store.upgrade() {
                store.publish(&self.uri, Some(version));
            }
        }

        let config = self.config.get();
        let ttl = config.cache_ttl;
        let checks = snapshot.links.iter().map(|link| {
            return async move {
                return self.cache.check(&link.address, version, ttl).await;
            };
        });
        let outcomes = futures::future::join_all(checks).await;

        let mut diagnostics: Vec<Diagnostic> =
            diagnostics::reference_diagnostics(&snapshot, &self.uri);
        for (link, outcome) in snapshot.links.iter().zip(&outcomes) {
            diagnostics.extend(diagnostics::link_diagnostics(
                link,
                outcome,
                config.country_code_regex.as_ref(),
            ));
        }
        diagnostics.sort_by_key(|d| return d.span.start);

        // The disposed re-check and the sink write happen under the state
        // lock, which dispose also takes: a disposal racing the tail of a
        // pass either sees this set and clears it, or wins the lock first
        // and the set is never published.
        {
            let mut state = lock(&self.state);
            if self.disposed.load(Ordering::SeqCst) {
                return;
            }
            self.sink.replace(&self.uri, diagnostics);
            state.last_processed = Some(version);
        }
        self.cache.sweep(version);
    }

    /// Memoized parse of the given text at the given version.
    fn parse(&self, text: &str, version: Version) -> ParsedSnapshot {
        let memoized = lock(&self.state)
            .parsed
            .clone()
            .filter(|p| return p.version == version);
        if let Some(snapshot) = memoized {
            return snapshot;
        }
        let snapshot = scanner::parse_snapshot(text, version);
        lock(&self.state).parsed = Some(snapshot.clone());
        return snapshot;
    }

    /// Heading slugs of the current content, parsing on demand. Used when
    /// another document's fragment link targets this open buffer.
    pub fn heading_slugs(&self) -> Vec<Slug> {
        let (text, version) = {
            let state = lock(&self.state);
            if let Some(parsed) = &state.parsed {
                if parsed.version == state.version {
                    return parsed.heading_slugs();
                }
            }
            (state.text.clone(), state.version)
        };
        return self.parse(&text, version).heading_slugs();
    }

    /// Run any pending pass to completion before returning. The command
    /// line front end needs finished results rather than scheduling.
    pub async fn process(self: &Arc<Self>) {
        Arc::clone(self).run_pending().await;
    }

    /// A target this document's links depend on changed: evict the cached
    /// result so the next pass re-checks it, and schedule that pass.
    pub fn on_dependency_changed(self: &Arc<Self>, address: &str) {
        self.cache.invalidate(address);
        self.schedule(PassRequest {
            drop_last_processed: true,
            reset_cache: false,
        });
    }

    /// Shut the pipeline down: clear published diagnostics, tell
    /// subscribers the document is gone, release every cached entry.
    /// Passes already queued become no-ops.
    pub fn dispose(&self) {
        {
            let _state = lock(&self.state);
            self.disposed.store(true, Ordering::SeqCst);
            self.sink.replace(&self.uri, Vec::new());
        }
        if let Some(store) = self.store.upgrade() {
            store.publish(&self.uri, None);
        }
        self.cache.clear();
    }
}
