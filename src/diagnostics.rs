//! Diagnostic construction and publication. Each pass rebuilds the full
//! diagnostic set for a document from scratch and replaces the previous
//! set atomically through the sink — no incremental patching.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use regex::Regex;

use crate::lock;
use crate::types::{CheckOutcome, DocumentUri, Link, ParsedSnapshot, Span};

/// Diagnostic severity, mirroring editor conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Information,
    Warning,
}

/// A secondary location attached to a diagnostic.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RelatedLocation {
    /// What the secondary location shows.
    pub message: String,
    /// Location within `uri`.
    pub span: Span,
    /// Document containing the secondary location.
    pub uri: DocumentUri,
}

/// One problem reported against a span of a document.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Diagnostic {
    /// Human-readable description.
    pub message: String,
    /// Optional pointer to a related location.
    pub related: Option<RelatedLocation>,
    /// How serious the problem is.
    pub severity: Severity,
    /// Where the problem is.
    pub span: Span,
}

/// Receives the complete diagnostic set for a document. Implementations
/// must treat each call as a full replacement for that document.
pub trait DiagnosticsSink: Send + Sync {
    fn replace(&self, uri: &DocumentUri, diagnostics: Vec<Diagnostic>);
}

/// Sink retaining the latest non-empty diagnostic set per document,
/// ordered by document for stable reports.
#[derive(Default)]
pub struct CollectingSink {
    documents: Mutex<BTreeMap<DocumentUri, Vec<Diagnostic>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        return Self::default();
    }

    /// Current diagnostics for one document; empty when it has none.
    pub fn get(&self, uri: &DocumentUri) -> Vec<Diagnostic> {
        return lock(&self.documents).get(uri).cloned().unwrap_or_default();
    }

    /// Copy of the full report.
    pub fn snapshot(&self) -> BTreeMap<DocumentUri, Vec<Diagnostic>> {
        return lock(&self.documents).clone();
    }
}

impl DiagnosticsSink for CollectingSink {
    fn replace(&self, uri: &DocumentUri, diagnostics: Vec<Diagnostic>) {
        let mut documents = lock(&self.documents);
        if diagnostics.is_empty() {
            documents.remove(uri);
        } else {
            documents.insert(uri.clone(), diagnostics);
        }
    }
}

/// Diagnostics for reference definitions and uses: a duplicated definition
/// name flags every definition after the first (the first one wins, per
/// the markdown spec), and every use of an undefined name is flagged.
pub fn reference_diagnostics(snapshot: &ParsedSnapshot, uri: &DocumentUri) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    // Reference names are case-insensitive.
    let mut first_definition: HashMap<String, Span> = HashMap::new();
    for definition in &snapshot.reference_definitions {
        let key = definition.name.to_lowercase();
        match first_definition.get(&key) {
            None => {
                first_definition.insert(key, definition.span);
            },
            Some(first) => {
                diagnostics.push(Diagnostic {
                    message: format!("duplicate reference definition `{}`", definition.name),
                    related: Some(RelatedLocation {
                        message: "first defined here".to_string(),
                        span: *first,
                        uri: uri.clone(),
                    }),
                    severity: Severity::Error,
                    span: definition.span,
                });
            },
        }
    }

    for reference_use in &snapshot.reference_uses {
        diagnostics.push(Diagnostic {
            message: format!("undefined link reference `{}`", reference_use.name),
            related: None,
            severity: Severity::Error,
            span: reference_use.span,
        });
    }

    return diagnostics;
}

/// Diagnostics for one checked link. A link can carry up to two: an
/// informational note when the address matches the configured
/// country-code pattern, plus whatever its check outcome warrants.
pub fn link_diagnostics(
    link: &Link,
    outcome: &CheckOutcome,
    country_code_regex: Option<&Regex>,
) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    if let Some(pattern) = country_code_regex {
        if pattern.is_match(&link.address) {
            diagnostics.push(Diagnostic {
                message: "address matches the configured country-code pattern".to_string(),
                related: None,
                severity: Severity::Information,
                span: link.span,
            });
        }
    }

    match outcome {
        CheckOutcome::Alive => {},
        CheckOutcome::Dead { status, url } => {
            diagnostics.push(Diagnostic {
                message: format!("dead link ({status}): {url}"),
                related: None,
                severity: Severity::Error,
                span: link.span,
            });
        },
        CheckOutcome::Failed { message } => {
            let severity = if message.contains("certificate") || message.contains("SSL") {
                Severity::Warning
            } else {
                Severity::Error
            };
            diagnostics.push(Diagnostic {
                message: format!("could not check link: {message}"),
                related: None,
                severity,
                span: link.span,
            });
        },
        CheckOutcome::FragmentMissing { fragment, target } => {
            diagnostics.push(Diagnostic {
                message: format!("no heading matching `#{fragment}` in {target}"),
                related: None,
                severity: Severity::Error,
                span: link.span,
            });
        },
        CheckOutcome::PathNotFound { detail, path } => {
            diagnostics.push(Diagnostic {
                message: format!("file not found: {}: {detail}", path.display()),
                related: None,
                severity: Severity::Error,
                span: link.span,
            });
        },
        CheckOutcome::Skipped => {
            diagnostics.push(Diagnostic {
                message: "cannot check this link type".to_string(),
                related: None,
                severity: Severity::Information,
                span: link.span,
            });
        },
    }

    return diagnostics;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner;
    use crate::types::LinkKind;

    fn uri() -> DocumentUri {
        return DocumentUri::parse("file:///ws/a.md");
    }

    fn link(address: &str) -> Link {
        return Link {
            address: address.to_string(),
            kind: LinkKind::Inline,
            span: Span {
                end: 10,
                line: 1,
                start: 0,
            },
        };
    }

    #[test]
    fn duplicate_definition_points_back_at_the_first() {
        let snapshot =
            scanner::parse_snapshot("[ref]: https://a.example\n[ref]: https://b.example\n", 1);
        let diagnostics = reference_diagnostics(&snapshot, &uri());
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, Severity::Error);
        assert_eq!(diagnostics[0].span.line, 2);
        let related = diagnostics[0].related.as_ref().unwrap();
        assert_eq!(related.span.line, 1);
    }

    #[test]
    fn duplicate_detection_ignores_name_case() {
        let snapshot =
            scanner::parse_snapshot("[Ref]: https://a.example\n[REF]: https://b.example\n", 1);
        assert_eq!(reference_diagnostics(&snapshot, &uri()).len(), 1);
    }

    #[test]
    fn each_undefined_use_is_flagged() {
        let snapshot = scanner::parse_snapshot("[x][miss] then [y][miss]\n", 1);
        let diagnostics = reference_diagnostics(&snapshot, &uri());
        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics.iter().all(|d| return d.severity == Severity::Error));
    }

    #[test]
    fn dead_link_is_an_error() {
        let outcome = CheckOutcome::Dead {
            status: 404,
            url: "https://example.com/".to_string(),
        };
        let diagnostics = link_diagnostics(&link("https://example.com/"), &outcome, None);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, Severity::Error);
        assert!(diagnostics[0].message.contains("404"));
    }

    #[test]
    fn certificate_failure_is_a_warning() {
        let outcome = CheckOutcome::Failed {
            message: "certificate error: expired".to_string(),
        };
        let diagnostics = link_diagnostics(&link("https://example.com/"), &outcome, None);
        assert_eq!(diagnostics[0].severity, Severity::Warning);
    }

    #[test]
    fn timeout_failure_is_an_error() {
        let outcome = CheckOutcome::Failed {
            message: "timed out after 10s".to_string(),
        };
        let diagnostics = link_diagnostics(&link("https://example.com/"), &outcome, None);
        assert_eq!(diagnostics[0].severity, Severity::Error);
    }

    #[test]
    fn skipped_is_informational() {
        let diagnostics = link_diagnostics(&link("mailto:a@b.example"), &CheckOutcome::Skipped, None);
        assert_eq!(diagnostics[0].severity, Severity::Information);
    }

    #[test]
    fn country_code_match_adds_a_note_alongside_the_outcome() {
        let pattern = Regex::new(r"\.ru/").unwrap();
        let outcome = CheckOutcome::Dead {
            status: 404,
            url: "https://x.ru/a".to_string(),
        };
        let diagnostics = link_diagnostics(&link("https://x.ru/a"), &outcome, Some(&pattern));
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].severity, Severity::Information);
        assert_eq!(diagnostics[1].severity, Severity::Error);
    }

    #[test]
    fn alive_with_no_pattern_is_silent() {
        let diagnostics = link_diagnostics(&link("https://example.com/"), &CheckOutcome::Alive, None);
        assert!(diagnostics.is_empty());
    }
}
