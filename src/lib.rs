//! Incremental hyperlink validation for markdown workspaces.
//!
//! The engine keeps a set of open documents, each with its own
//! processing pipeline and link cache, and a web of version registries
//! connecting documents that link to each other. Editing one document
//! re-checks exactly the links that could have changed meaning: its own,
//! plus fragment links in other documents that point at it.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod cache;
pub mod commands;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod pipeline;
pub mod prober;
pub mod registry;
pub mod resolver;
pub mod scanner;
pub mod slug;
pub mod store;
pub mod types;
pub mod watch;

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
/// All guarded state here stays consistent across panics, so recovery is
/// always sound.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    return mutex.lock().unwrap_or_else(PoisonError::into_inner);
}
