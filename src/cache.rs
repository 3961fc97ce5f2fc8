//! Per-document result cache for link checks, keyed by the literal
//! address text as written. Concurrent checks of the same address share
//! one in-flight probe; settled results are served until their TTL
//! lapses. Entries for file targets carry a subscription to the target
//! document so cross-document edits evict them immediately instead of
//! waiting out the TTL; entries targeting the document itself are
//! flagged local instead, avoiding a self-subscription loop.
//!
//! Lock order: cache entries, then registries map, then registry inner,
//! then the open-document map. Nothing here holds the entries lock
//! across an await.

use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;

use crate::lock;
use crate::pipeline::DocumentPipeline;
use crate::resolver::{self, ResolvedTarget};
use crate::store::DocumentStore;
use crate::types::{CheckOutcome, DocumentUri, Version};

type SharedCheck = Shared<BoxFuture<'static, CheckOutcome>>;

/// Cached check results for the links of one source document.
pub struct LinkCache {
    entries: Mutex<HashMap<String, Entry>>,
    pipeline: Weak<DocumentPipeline>,
    source: DocumentUri,
    store: Weak<DocumentStore>,
}

struct Entry {
    /// Pass version that last used this entry; the sweep evicts entries
    /// the latest pass did not visit.
    last_visit: Version,
    /// The target is this document itself. Local entries never subscribe
    /// (that would be a self-subscription loop); the pipeline evicts them
    /// inline when its own heading slugs change.
    local: bool,
    state: EntryState,
    /// Change subscription on the target document, for file targets.
    /// Dropping it releases the handler through the store.
    subscription: Option<crate::registry::SubscriptionHandle>,
}

enum EntryState {
    /// A probe is running; later callers await the same future.
    InFlight(SharedCheck),
    /// A completed result and when it completed.
    Settled {
        at: Instant,
        outcome: CheckOutcome,
    },
}

enum Action {
    Done(CheckOutcome),
    Start,
    Wait(SharedCheck),
}

impl LinkCache {
    pub(crate) fn new(
        pipeline: Weak<DocumentPipeline>,
        store: Weak<DocumentStore>,
        source: DocumentUri,
    ) -> Self {
        return Self {
            entries: Mutex::new(HashMap::new()),
            pipeline,
            source,
            store,
        };
    }

    /// Check one address, reusing a fresh cached result or a probe already
    /// in flight. Transient failures are never served from the cache; the
    /// next visit re-attempts them.
    pub async fn check(&self, address: &str, pass_version: Version, ttl: Duration) -> CheckOutcome {
        let action = {
            let mut entries = lock(&self.entries);
            match entries.get_mut(address) {
                None => Action::Start,
                Some(entry) => {
                    entry.last_visit = pass_version;
                    match &entry.state {
                        EntryState::InFlight(shared) => Action::Wait(shared.clone()),
                        EntryState::Settled { at, outcome } => {
                            let reusable = at.elapsed() < ttl
                                && !matches!(outcome, CheckOutcome::Failed { .. });
                            if reusable {
                                Action::Done(outcome.clone())
                            } else {
                                Action::Start
                            }
                        },
                    }
                },
            }
        };

        return match action {
            Action::Done(outcome) => outcome,
            Action::Wait(shared) => shared.await,
            Action::Start => self.begin(address, pass_version).await,
        };
    }

    /// Start a probe for the address, unless another caller won the race
    /// in the window where no lock was held.
    async fn begin(&self, address: &str, pass_version: Version) -> CheckOutcome {
        let Some(store) = self.store.upgrade() else {
            return CheckOutcome::Skipped;
        };

        let target = resolver::resolve(address, &self.source, store.workspace_root());

        // The dependency version is captured before the probe runs: if the
        // target changes mid-probe, the registry replay on subscribe
        // catches it. Targets resolving back to this document are marked
        // local and carry no dependency.
        let mut local = false;
        let dependency = match &target {
            Some(ResolvedTarget::File { path, .. }) => {
                let uri = DocumentUri::from_file_path(path);
                if uri == self.source {
                    local = true;
                    None
                } else {
                    let seen = store.open_version(&uri);
                    Some((uri, seen))
                }
            },
            _ => None,
        };

        let future: SharedCheck = {
            let store = Arc::clone(&store);
            async move { return store.prober().check(target.as_ref()).await }
                .boxed()
                .shared()
        };

        let shared = {
            let mut entries = lock(&self.entries);
            match entries.entry(address.to_string()) {
                MapEntry::Occupied(mut occupied) => {
                    let entry = occupied.get_mut();
                    entry.last_visit = pass_version;
                    entry.local = local;
                    if let EntryState::InFlight(existing) = &entry.state {
                        existing.clone()
                    } else {
                        entry.state = EntryState::InFlight(future.clone());
                        future.clone()
                    }
                },
                MapEntry::Vacant(vacant) => {
                    vacant.insert(Entry {
                        last_visit: pass_version,
                        local,
                        state: EntryState::InFlight(future.clone()),
                        subscription: None,
                    });
                    future.clone()
                },
            }
        };

        let outcome = shared.clone().await;
        if shared.ptr_eq(&future) {
            self.settle(address, &future, outcome.clone(), dependency);
        }
        return outcome;
    }

    /// Record a completed probe. If the entry was evicted or restarted
    /// while the probe ran, the result is dropped: whatever evicted it
    /// knows better.
    fn settle(
        &self,
        address: &str,
        started: &SharedCheck,
        outcome: CheckOutcome,
        dependency: Option<(DocumentUri, Option<Version>)>,
    ) {
        let mut entries = lock(&self.entries);
        let Some(entry) = entries.get_mut(address) else {
            return;
        };
        let EntryState::InFlight(current) = &entry.state else {
            return;
        };
        if !current.ptr_eq(started) {
            return;
        }

        entry.state = EntryState::Settled {
            at: Instant::now(),
            outcome,
        };

        if entry.subscription.is_none() {
            if let (Some((target, seen)), Some(store), Some(pipeline)) =
                (dependency, self.store.upgrade(), self.pipeline.upgrade())
            {
                let weak_pipeline = Arc::downgrade(&pipeline);
                let owned_address = address.to_string();
                let handler: crate::registry::ChangeHandler = Arc::new(move |_| {
                    if let Some(pipeline) = weak_pipeline.upgrade() {
                        pipeline.on_dependency_changed(&owned_address);
                    }
                });
                entry.subscription = store.subscribe(&target, seen, handler).ok();
            }
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let removed: Vec<Entry> = lock(&self.entries).drain().map(|(_, e)| return e).collect();
        drop(removed);
    }

    /// Drop the entry for one address, releasing its subscription.
    pub fn invalidate(&self, address: &str) {
        let removed = lock(&self.entries).remove(address);
        drop(removed);
    }

    /// Drop every local entry. The owning pipeline calls this when its
    /// heading slugs change, since local targets have no subscription to
    /// evict them.
    pub fn evict_local(&self) {
        let removed: Vec<Entry> = {
            let mut entries = lock(&self.entries);
            let local: Vec<String> = entries
                .iter()
                .filter(|(_, e)| return e.local)
                .map(|(k, _)| return k.clone())
                .collect();
            local.iter().filter_map(|k| return entries.remove(k)).collect()
        };
        drop(removed);
    }

    /// Number of live entries.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        return lock(&self.entries).len();
    }

    /// Evict entries the pass for `current` did not visit: their addresses
    /// no longer appear in the document.
    pub fn sweep(&self, current: Version) {
        let removed: Vec<Entry> = {
            let mut entries = lock(&self.entries);
            let stale: Vec<String> = entries
                .iter()
                .filter(|(_, e)| return e.last_visit < current)
                .map(|(k, _)| return k.clone())
                .collect();
            stale.iter().filter_map(|k| return entries.remove(k)).collect()
        };
        drop(removed);
    }
}
