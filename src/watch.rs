//! The `watch` command: continuous validation. All markdown files under
//! the root are held open in the store; filesystem events bump their
//! versions, so edits to one file re-check only what depends on it.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use notify::{RecursiveMode, Watcher as _};

use crate::commands;
use crate::config::{Config, ConfigHandle, CONFIG_FILE_NAME};
use crate::diagnostics::CollectingSink;
use crate::error::Error;
use crate::prober::{NoCredentials, ReqwestProbe};
use crate::resolver;
use crate::store::DocumentStore;
use crate::types::{DocumentUri, Version};

/// Debounce delay between filesystem events and re-processing.
const DEBOUNCE_MS: u64 = 100;

/// Entry point for the watch command. Runs an initial full check, then
/// keeps the engine in sync with the filesystem until interrupted.
///
/// # Errors
///
/// Returns errors from config loading, HTTP client construction, or
/// watcher setup.
pub async fn run(root: &Path) -> Result<ExitCode, Error> {
    let root = resolver::normalize_path(&std::path::absolute(root)?);
    let config_handle = ConfigHandle::new(Config::load(&root)?);
    let sink = Arc::new(CollectingSink::new());
    let store = DocumentStore::new(
        config_handle.clone(),
        Box::new(ReqwestProbe::new()?),
        Box::new(NoCredentials),
        Arc::clone(&sink) as Arc<dyn crate::diagnostics::DiagnosticsSink>,
        Some(root.clone()),
    );

    // Versions are per-file and only ever increase, even across a
    // close/reopen, so subscribers never see a version go backwards.
    let mut versions: HashMap<PathBuf, Version> = HashMap::new();

    eprintln!("watch: initial check");
    let files = commands::scan_markdown_files(&root, &config_handle.get())?;
    for path in &files {
        let text = std::fs::read_to_string(path)?;
        versions.insert(path.clone(), 1);
        store.open(DocumentUri::from_file_path(path), text, 1);
    }
    settle_and_report(&store, &sink, &root).await;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<PathBuf>();
    let mut watcher =
        notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
            if let Ok(event) = res
                && matches!(
                    event.kind,
                    notify::EventKind::Create(_)
                        | notify::EventKind::Modify(_)
                        | notify::EventKind::Remove(_)
                )
            {
                for path in event.paths {
                    let _ = tx.send(path);
                }
            }
        })
        .map_err(|e| {
            return Error::Watch {
                reason: e.to_string(),
            };
        })?;
    watcher.watch(&root, RecursiveMode::Recursive).map_err(|e| {
        return Error::Watch {
            reason: e.to_string(),
        };
    })?;

    eprintln!(
        "watch: monitoring {}, press Ctrl+C to stop",
        root.display()
    );

    loop {
        let Some(first) = rx.recv().await else {
            break;
        };
        let mut changed: HashSet<PathBuf> = HashSet::new();
        changed.insert(first);
        // Editors fire bursts of events per save; fold them into one round.
        let debounce = Duration::from_millis(DEBOUNCE_MS);
        while let Ok(Some(path)) = tokio::time::timeout(debounce, rx.recv()).await {
            changed.insert(path);
        }

        for path in changed {
            apply_change(&store, &config_handle, &root, &mut versions, &path)?;
        }
        settle_and_report(&store, &sink, &root).await;
    }

    return Ok(ExitCode::SUCCESS);
}

/// Feed one filesystem change into the engine.
///
/// # Errors
///
/// Returns `Error::ConfigInvalid` or `Error::TomlDe` when a config
/// reload finds a malformed file; file read failures close the document
/// instead of erroring, since deletion is an expected event.
fn apply_change(
    store: &DocumentStore,
    config_handle: &ConfigHandle,
    root: &Path,
    versions: &mut HashMap<PathBuf, Version>,
    path: &Path,
) -> Result<(), Error> {
    if path.file_name().is_some_and(|name| return name == CONFIG_FILE_NAME) {
        config_handle.replace(Config::load(root)?);
        store.reprocess_all();
        eprintln!("watch: config reloaded");
        return Ok(());
    }

    if path.extension().is_none_or(|ext| return ext != "md") {
        return Ok(());
    }
    let path = resolver::normalize_path(path);
    let relative = path
        .strip_prefix(root)
        .unwrap_or(&path)
        .to_string_lossy()
        .replace('\\', "/");
    if !config_handle.get().should_scan(&relative) {
        return Ok(());
    }

    let uri = DocumentUri::from_file_path(&path);
    match std::fs::read_to_string(&path) {
        Ok(text) => {
            let version = versions
                .entry(path.clone())
                .and_modify(|v| *v = v.saturating_add(1))
                .or_insert(1);
            store.open(uri, text, *version);
        },
        Err(_) => {
            // The version entry stays: if the file reappears, its version
            // continues from where it left off instead of going backwards.
            store.close(&uri);
        },
    }
    return Ok(());
}

/// Wait for every pending pass, then print the current report.
async fn settle_and_report(store: &DocumentStore, sink: &CollectingSink, root: &Path) {
    for pipeline in store.open_pipelines() {
        pipeline.process().await;
    }
    commands::print_report(&sink.snapshot(), root, true);
}
