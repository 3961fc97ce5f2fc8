//! Per-document version broadcasts. One registry exists per target
//! document identity, shared by every cache entry that depends on it.
//! Registries are owned explicitly by the `DocumentStore` map; unsubscribe
//! routes through [`crate::store::DocumentStore::release`], which drops a
//! registry once it has no handlers and no open backing document.

use std::sync::{Arc, Mutex, Weak};

use crate::error::Error;
use crate::lock;
use crate::store::DocumentStore;
use crate::types::{DocumentUri, Version};

/// Invoked with the newly published version; `None` means the target
/// document no longer exists. Handlers must be idempotent and cheap —
/// they only schedule re-processing, never perform it inline.
pub type ChangeHandler = Arc<dyn Fn(Option<Version>) + Send + Sync>;

/// Distinct identity for one registered handler.
pub type SubscriberId = u64;

/// Last version broadcast on a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Broadcast {
    /// A version was published; `None` means the document is gone.
    At(Option<Version>),
    /// Nothing has been published yet.
    Unset,
}

/// RAII handle for one registered change handler. Dropping it releases
/// the handler through the store, which also garbage-collects the
/// registry when nothing keeps it alive.
pub struct SubscriptionHandle {
    store: Weak<DocumentStore>,
    subscriber: SubscriberId,
    target: DocumentUri,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        store: Weak<DocumentStore>,
        subscriber: SubscriberId,
        target: DocumentUri,
    ) -> Self {
        return Self { store, subscriber, target };
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store.release(&self.target, self.subscriber);
        }
    }
}

/// Publish/subscribe hub broadcasting version changes for one document
/// identity.
pub struct VersionRegistry {
    inner: Mutex<RegistryInner>,
    uri: DocumentUri,
}

struct RegistryInner {
    handlers: Vec<(SubscriberId, ChangeHandler)>,
    last: Broadcast,
}

impl VersionRegistry {
    pub(crate) fn new(uri: DocumentUri) -> Self {
        return Self {
            inner: Mutex::new(RegistryInner {
                handlers: Vec::new(),
                last: Broadcast::Unset,
            }),
            uri,
        };
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        return lock(&self.inner).handlers.len();
    }

    /// The most recent broadcast, if any.
    pub fn last_broadcast(&self) -> Broadcast {
        return lock(&self.inner).last;
    }

    /// Store the version and synchronously invoke every handler.
    /// Handlers run over a snapshot copy, so registration or removal
    /// during a publish cannot corrupt the iteration.
    pub fn publish(&self, version: Option<Version>) {
        let handlers: Vec<ChangeHandler> = {
            let mut inner = lock(&self.inner);
            inner.last = Broadcast::At(version);
            inner.handlers.iter().map(|(_, h)| return h.clone()).collect()
        };
        for handler in handlers {
            handler(version);
        }
    }

    /// Register a change handler starting from the subscriber's last known
    /// version of the target. If a newer version (or any version, when
    /// `from_version` is unknown) was already broadcast, the handler is
    /// scheduled asynchronously right away — this closes the race where
    /// the dependency changed between a check completing and the
    /// subscription being registered.
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateSubscriber` if the id is already registered.
    pub fn subscribe(
        &self,
        from_version: Option<Version>,
        subscriber: SubscriberId,
        handler: ChangeHandler,
    ) -> Result<(), Error> {
        let replay = {
            let mut inner = lock(&self.inner);
            if inner.handlers.iter().any(|(id, _)| return *id == subscriber) {
                return Err(Error::DuplicateSubscriber {
                    subscriber,
                    uri: self.uri.to_string(),
                });
            }
            inner.handlers.push((subscriber, handler.clone()));
            match inner.last {
                Broadcast::Unset => None,
                Broadcast::At(published) => {
                    missed_update(from_version, published).then_some(published)
                },
            }
        };

        if let Some(published) = replay {
            tokio::spawn(async move {
                handler(published);
            });
        }
        return Ok(());
    }

    /// Remove a handler. Idempotent.
    pub(crate) fn unsubscribe(&self, subscriber: SubscriberId) {
        lock(&self.inner).handlers.retain(|(id, _)| return *id != subscriber);
    }
}

/// Whether a broadcast that already happened supersedes what the
/// subscriber last saw.
fn missed_update(from_version: Option<Version>, published: Option<Version>) -> bool {
    return match (from_version, published) {
        // The subscriber never observed a version of the target.
        (None, _) => true,
        // The target disappeared after the subscriber saw it.
        (Some(_), None) => true,
        (Some(seen), Some(current)) => current > seen,
    };
}
