//! Ownership root of the engine: the set of open documents, their
//! pipelines, and the version registries linking them. Registries are
//! garbage-collected here — one lives exactly as long as it has handlers
//! or its document is open.
//!
//! Lock order: cache entries, then registries map, then registry inner,
//! then the open-document map. `close` takes the open map and the
//! registries map sequentially, never nested.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::config::ConfigHandle;
use crate::diagnostics::DiagnosticsSink;
use crate::error::Error;
use crate::lock;
use crate::pipeline::{DocumentPipeline, PassRequest};
use crate::prober::{CredentialStore, HttpProbe, LinkProber};
use crate::registry::{ChangeHandler, SubscriptionHandle, VersionRegistry};
use crate::slug::Slug;
use crate::types::{DocumentUri, Version};

/// Owns every open document pipeline and the registries between them.
pub struct DocumentStore {
    config: ConfigHandle,
    next_subscriber: AtomicU64,
    open: Mutex<HashMap<DocumentUri, Arc<DocumentPipeline>>>,
    prober: LinkProber,
    registries: Mutex<HashMap<DocumentUri, Arc<VersionRegistry>>>,
    self_weak: Weak<DocumentStore>,
    sink: Arc<dyn DiagnosticsSink>,
    workspace_root: Option<PathBuf>,
}

impl DocumentStore {
    /// Assemble a store. The prober keeps a weak reference back to the
    /// store so open buffers win over the disk during fragment checks.
    pub fn new(
        config: ConfigHandle,
        http: Box<dyn HttpProbe>,
        credentials: Box<dyn CredentialStore>,
        sink: Arc<dyn DiagnosticsSink>,
        workspace_root: Option<PathBuf>,
    ) -> Arc<Self> {
        return Arc::new_cyclic(|weak: &Weak<Self>| {
            return Self {
                config,
                next_subscriber: AtomicU64::new(1),
                open: Mutex::new(HashMap::new()),
                prober: LinkProber::new(http, credentials, weak.clone()),
                registries: Mutex::new(HashMap::new()),
                self_weak: weak.clone(),
                sink,
                workspace_root,
            };
        });
    }

    /// Open a document (or refresh one already open) and schedule its
    /// first pass.
    pub fn open(&self, uri: DocumentUri, text: String, version: Version) -> Arc<DocumentPipeline> {
        let (pipeline, created) = {
            let mut open = lock(&self.open);
            match open.get(&uri) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let pipeline = DocumentPipeline::new(
                        uri.clone(),
                        text.clone(),
                        version,
                        self.config.clone(),
                        Arc::clone(&self.sink),
                        self.self_weak.clone(),
                    );
                    open.insert(uri, Arc::clone(&pipeline));
                    (pipeline, true)
                },
            }
        };
        if created {
            pipeline.schedule(PassRequest::default());
        } else {
            pipeline.update(text, version);
        }
        return pipeline;
    }

    /// Replace the content of an open document. Returns false when the
    /// document is not open.
    pub fn update(&self, uri: &DocumentUri, text: String, version: Version) -> bool {
        let pipeline = lock(&self.open).get(uri).cloned();
        return match pipeline {
            None => false,
            Some(pipeline) => {
                pipeline.update(text, version);
                true
            },
        };
    }

    /// Close a document: its pipeline clears diagnostics, broadcasts that
    /// the document is gone, and releases its cache.
    pub fn close(&self, uri: &DocumentUri) {
        let removed = lock(&self.open).remove(uri);
        if let Some(pipeline) = removed {
            pipeline.dispose();
        }
    }

    /// Whether the document is currently open.
    pub fn is_open(&self, uri: &DocumentUri) -> bool {
        return lock(&self.open).contains_key(uri);
    }

    /// The pipeline for an open document.
    pub fn pipeline(&self, uri: &DocumentUri) -> Option<Arc<DocumentPipeline>> {
        return lock(&self.open).get(uri).cloned();
    }

    /// Every open pipeline, in unspecified order.
    pub fn open_pipelines(&self) -> Vec<Arc<DocumentPipeline>> {
        return lock(&self.open).values().cloned().collect();
    }

    /// Current version of an open document.
    pub fn open_version(&self, uri: &DocumentUri) -> Option<Version> {
        let pipeline = lock(&self.open).get(uri).cloned()?;
        return Some(pipeline.version());
    }

    /// Heading slugs of an open document's current content. `None` when
    /// the document is not open; callers fall back to the disk.
    pub fn open_heading_slugs(&self, uri: &DocumentUri) -> Option<Vec<Slug>> {
        let pipeline = lock(&self.open).get(uri).cloned()?;
        return Some(pipeline.heading_slugs());
    }

    /// Broadcast a new version of a document (or its disappearance, with
    /// `None`) to whoever subscribed. The registry is created on demand so
    /// the broadcast survives until a late subscriber can replay it.
    pub fn publish(&self, uri: &DocumentUri, version: Option<Version>) {
        let registry = {
            let mut registries = lock(&self.registries);
            Arc::clone(
                registries
                    .entry(uri.clone())
                    .or_insert_with(|| return Arc::new(VersionRegistry::new(uri.clone()))),
            )
        };
        // Handlers run without the registries map held, so one that drops
        // a subscription cannot deadlock against this publish.
        registry.publish(version);
        self.collect(uri);
    }

    /// Register a change handler on the target document's registry.
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateSubscriber` if the generated id collides,
    /// which would indicate a bug in id allocation.
    pub fn subscribe(
        &self,
        target: &DocumentUri,
        from_version: Option<Version>,
        handler: ChangeHandler,
    ) -> Result<SubscriptionHandle, Error> {
        let subscriber = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let registry = {
            let mut registries = lock(&self.registries);
            Arc::clone(
                registries
                    .entry(target.clone())
                    .or_insert_with(|| return Arc::new(VersionRegistry::new(target.clone()))),
            )
        };
        registry.subscribe(from_version, subscriber, handler)?;
        return Ok(SubscriptionHandle::new(
            self.self_weak.clone(),
            subscriber,
            target.clone(),
        ));
    }

    /// Remove a handler and drop the registry once nothing keeps it alive.
    pub(crate) fn release(&self, target: &DocumentUri, subscriber: u64) {
        let mut registries = lock(&self.registries);
        let Some(registry) = registries.get(target) else {
            return;
        };
        registry.unsubscribe(subscriber);
        if registry.handler_count() == 0 && !self.is_open(target) {
            registries.remove(target);
        }
    }

    /// Number of handlers registered on a document's registry.
    pub fn registry_handler_count(&self, uri: &DocumentUri) -> usize {
        let registry = lock(&self.registries).get(uri).cloned();
        return registry.map_or(0, |r| return r.handler_count());
    }

    /// Force a full re-check of one document, dropping its cached
    /// results. Returns false when the document is not open.
    pub fn reprocess(&self, uri: &DocumentUri) -> bool {
        let pipeline = lock(&self.open).get(uri).cloned();
        return match pipeline {
            None => false,
            Some(pipeline) => {
                pipeline.schedule(PassRequest {
                    drop_last_processed: true,
                    reset_cache: true,
                });
                true
            },
        };
    }

    /// Schedule a full re-parse and re-check of every open document,
    /// dropping all cached results first. Used after a config reload.
    pub fn reprocess_all(&self) {
        for pipeline in self.open_pipelines() {
            pipeline.schedule(PassRequest {
                drop_last_processed: true,
                reset_cache: true,
            });
        }
    }

    pub fn config(&self) -> &ConfigHandle {
        return &self.config;
    }

    pub(crate) fn prober(&self) -> &LinkProber {
        return &self.prober;
    }

    /// Root against which absolute link paths resolve.
    pub fn workspace_root(&self) -> Option<&Path> {
        return self.workspace_root.as_deref();
    }

    /// Drop a registry that has no handlers and no open document.
    fn collect(&self, uri: &DocumentUri) {
        let mut registries = lock(&self.registries);
        let Some(registry) = registries.get(uri) else {
            return;
        };
        if registry.handler_count() == 0 && !self.is_open(uri) {
            registries.remove(uri);
        }
    }
}
