//! The `check` command: open every markdown file under the root, run the
//! engine until every document has been processed, and print the report.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use crate::config::{Config, ConfigHandle};
use crate::diagnostics::{CollectingSink, Diagnostic, Severity};
use crate::error::Error;
use crate::prober::{NoCredentials, ReqwestProbe};
use crate::resolver;
use crate::store::DocumentStore;
use crate::types::DocumentUri;

/// Check every markdown file once. Exit code priority: errors (2) >
/// warnings (1) > clean (0).
///
/// # Errors
///
/// Returns errors from config loading, HTTP client construction, or
/// file reading. Dead links are diagnostics, not errors.
pub async fn check(root: &Path, json: bool) -> Result<ExitCode, Error> {
    let root = resolver::normalize_path(&std::path::absolute(root)?);
    let config = Config::load(&root)?;
    let files = scan_markdown_files(&root, &config)?;

    let sink = Arc::new(CollectingSink::new());
    let store = DocumentStore::new(
        ConfigHandle::new(config),
        Box::new(ReqwestProbe::new()?),
        Box::new(NoCredentials),
        Arc::clone(&sink) as Arc<dyn crate::diagnostics::DiagnosticsSink>,
        Some(root.clone()),
    );

    let count = files.len();
    eprintln!("checking {count} files");

    let mut pipelines = Vec::with_capacity(files.len());
    for path in &files {
        let text = std::fs::read_to_string(path)?;
        let uri = DocumentUri::from_file_path(path);
        pipelines.push(store.open(uri, text, 1));
    }
    for pipeline in &pipelines {
        pipeline.process().await;
    }

    let report = sink.snapshot();
    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{text}"),
            Err(e) => return Err(Error::Io(std::io::Error::other(e))),
        }
    }
    let (errors, warnings) = print_report(&report, &root, !json);

    if errors > 0 {
        return Ok(ExitCode::from(2));
    }
    if warnings > 0 {
        return Ok(ExitCode::from(1));
    }
    return Ok(ExitCode::SUCCESS);
}

/// Print the report (unless suppressed for JSON mode) and return the
/// error and warning counts.
pub(crate) fn print_report(
    report: &BTreeMap<DocumentUri, Vec<Diagnostic>>,
    root: &Path,
    print_lines: bool,
) -> (usize, usize) {
    let mut errors = 0_usize;
    let mut warnings = 0_usize;

    for (uri, diagnostics) in report {
        for diagnostic in diagnostics {
            let label = match diagnostic.severity {
                Severity::Error => {
                    errors = errors.saturating_add(1);
                    "ERROR"
                },
                Severity::Information => "INFO ",
                Severity::Warning => {
                    warnings = warnings.saturating_add(1);
                    "WARN "
                },
            };
            if print_lines {
                println!(
                    "{label}  {}:{}  {}",
                    display_path(uri, root),
                    diagnostic.span.line,
                    diagnostic.message
                );
            }
        }
    }

    if print_lines {
        if errors == 0 && warnings == 0 {
            eprintln!("all links valid");
        } else {
            eprintln!();
            eprintln!("{errors} errors, {warnings} warnings");
        }
    }
    return (errors, warnings);
}

/// Render a document for the report: relative to the root when possible.
fn display_path(uri: &DocumentUri, root: &Path) -> String {
    let Some(path) = uri.to_file_path() else {
        return uri.to_string();
    };
    return path
        .strip_prefix(root)
        .map_or_else(|_| return path.display().to_string(), |p| return p.display().to_string());
}

/// Markdown files under the root that the config includes, sorted for
/// deterministic reports.
///
/// # Errors
///
/// Returns `Error::Io` if the directory walk fails.
pub(crate) fn scan_markdown_files(root: &Path, config: &Config) -> Result<Vec<PathBuf>, Error> {
    let mut files = Vec::new();
    let walker = walkdir::WalkDir::new(root).into_iter().filter_entry(|entry| {
        // Skip dotted directories (.git and friends) but not the root.
        return entry.depth() == 0
            || !entry.file_name().to_string_lossy().starts_with('.');
    });

    for entry in walker {
        let entry = entry.map_err(|e| {
            return Error::Io(e.into_io_error().unwrap_or_else(|| {
                return std::io::Error::other("directory walk failed");
            }));
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().is_none_or(|ext| return ext != "md") {
            continue;
        }
        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        if config.should_scan(&relative) {
            files.push(resolver::normalize_path(path));
        }
    }

    files.sort();
    return Ok(files);
}
