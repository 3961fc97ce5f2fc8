/// Core domain types for documents, parsed snapshots, and check outcomes.
use std::fmt;
use std::path::{Path, PathBuf};

use crate::slug::Slug;

/// Outcome of checking one link. Expected negative results (dead link,
/// missing file, missing fragment) are values here, never errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The target exists: 2xx response, accessible path, or matching heading.
    Alive,
    /// A web target answered with a non-success status.
    Dead {
        /// Final HTTP status after the HEAD/GET retry sequence.
        status: u16,
        /// The resolved URL, included for user diagnosis.
        url: String,
    },
    /// The probe itself failed (network, TLS) — a transient condition,
    /// distinct from a genuinely dead link.
    Failed {
        /// The underlying error text, verbatim.
        message: String,
    },
    /// The target file or document exists but has no matching heading.
    FragmentMissing {
        /// The fragment as written in the link.
        fragment: String,
        /// The resolved target the fragment was searched in.
        target: String,
    },
    /// The target path could not be read at all.
    PathNotFound {
        /// The underlying read error text.
        detail: String,
        /// The resolved path.
        path: PathBuf,
    },
    /// The address does not resolve to anything checkable (mailto,
    /// unknown scheme, absolute path without a workspace root).
    Skipped,
}

/// Stable identity of a document: a URI string.
/// Paired with a [`Version`], it denotes exact content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct DocumentUri(String);

impl DocumentUri {
    /// Build a `file:` URI from an absolute path. The path is used as-is;
    /// callers normalize lexically first so identical documents produce
    /// identical URIs.
    pub fn from_file_path(path: &Path) -> Self {
        return match url::Url::from_file_path(path) {
            Ok(u) => Self(u.to_string()),
            Err(()) => Self(format!("file://{}", path.display())),
        };
    }

    /// Wrap an already-formed URI string.
    pub fn parse(raw: &str) -> Self {
        return Self(raw.to_string());
    }

    /// An `untitled:` URI for an unsaved buffer.
    pub fn untitled(name: &str) -> Self {
        return Self(format!("untitled:{name}"));
    }

    /// The raw URI string.
    pub fn as_str(&self) -> &str {
        return &self.0;
    }

    /// Whether this identifies an unsaved buffer.
    pub fn is_untitled(&self) -> bool {
        return self.0.starts_with("untitled:");
    }

    /// The filesystem path for `file:` URIs, `None` for everything else.
    pub fn to_file_path(&self) -> Option<PathBuf> {
        let url = url::Url::parse(&self.0).ok()?;
        if url.scheme() != "file" {
            return None;
        }
        return url.to_file_path().ok();
    }
}

impl fmt::Display for DocumentUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(f, "{}", self.0);
    }
}

/// A heading extracted from a document.
#[derive(Debug, Clone)]
pub struct Heading {
    /// Anchor slug derived from the heading text.
    pub slug: Slug,
    /// Location of the heading in the source text.
    pub span: Span,
    /// The heading text as written.
    pub text: String,
}

/// A link extracted from a document. The address is the literal text the
/// author wrote (or, for reference links, the definition's destination).
#[derive(Debug, Clone)]
pub struct Link {
    /// Raw address text.
    pub address: String,
    /// Whether the link was inline or went through a reference definition.
    pub kind: LinkKind,
    /// Location of the link in the source text.
    pub span: Span,
}

/// How a link was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// `[text](address)`, autolink, or image.
    Inline,
    /// `[text][name]`, `[name][]`, or `[name]`.
    Reference,
}

/// Everything extracted from one (document, version) pair. Replaced
/// wholesale on re-parse, never mutated; valid only for `version`.
#[derive(Debug, Clone)]
pub struct ParsedSnapshot {
    /// Headings in document order.
    pub headings: Vec<Heading>,
    /// Links in document order.
    pub links: Vec<Link>,
    /// Reference definitions in document order, duplicates preserved.
    pub reference_definitions: Vec<ReferenceDefinition>,
    /// Reference uses with no matching definition, in document order.
    pub reference_uses: Vec<ReferenceUse>,
    /// The document version this snapshot was parsed from.
    pub version: Version,
}

impl ParsedSnapshot {
    /// The heading slug sequence, used to detect anchor-affecting changes.
    pub fn heading_slugs(&self) -> Vec<Slug> {
        return self.headings.iter().map(|h| return h.slug.clone()).collect();
    }
}

/// A `[name]: destination` line.
#[derive(Debug, Clone)]
pub struct ReferenceDefinition {
    /// The definition name as written.
    pub name: String,
    /// Location of the definition line.
    pub span: Span,
}

/// A `[text][name]` use whose name has no definition.
#[derive(Debug, Clone)]
pub struct ReferenceUse {
    /// The referenced name as written.
    pub name: String,
    /// Location of the use.
    pub span: Span,
}

/// Byte range plus 1-based line of an item in document text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Span {
    /// End byte offset, exclusive.
    pub end: usize,
    /// 1-based line of `start`.
    pub line: u32,
    /// Start byte offset.
    pub start: usize,
}

/// Monotonically increasing document version. Strictly increases on every
/// content mutation; a fixed (uri, version) pair denotes identical content.
pub type Version = u64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_uri_round_trips() {
        let uri = DocumentUri::from_file_path(Path::new("/docs/guide.md"));
        assert_eq!(uri.to_file_path(), Some(PathBuf::from("/docs/guide.md")));
        assert!(!uri.is_untitled());
    }

    #[test]
    fn untitled_uri_has_no_path() {
        let uri = DocumentUri::untitled("buffer-1");
        assert!(uri.is_untitled());
        assert_eq!(uri.to_file_path(), None);
    }
}
