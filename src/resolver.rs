//! Pure address resolution: raw link text plus its source document's
//! identity becomes a structured target, or nothing. Unresolvable is not
//! an error — callers treat it as "cannot check this link type".

use std::path::{Component, Path, PathBuf};

use url::Url;

use crate::types::DocumentUri;

/// A normalized absolute target produced from a raw link address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedTarget {
    /// A URL with a non-file scheme (http, https, mailto, ...).
    External(
        /// The parsed URL, fragment included.
        Url,
    ),
    /// A file-like target with an optional heading fragment.
    File {
        /// Fragment text after `#`, carried through untouched.
        fragment: Option<String>,
        /// Lexically normalized absolute path.
        path: PathBuf,
    },
}

/// Resolve a raw link address against its source document.
///
/// Rules, in order: strip one pair of surrounding angle brackets; text
/// parsing as a URI (or explicitly `file:`) is taken as that scheme;
/// otherwise it is a path reference — empty path means the source document
/// itself, an absolute path resolves against the workspace root, and a
/// relative path resolves against the source document's directory (or the
/// workspace root for untitled buffers). Returns `None` when the address
/// cannot denote a checkable target.
pub fn resolve(
    raw: &str,
    source: &DocumentUri,
    workspace_root: Option<&Path>,
) -> Option<ResolvedTarget> {
    let stripped = strip_angle_brackets(raw.trim());
    if stripped.is_empty() {
        return None;
    }

    if let Ok(url) = Url::parse(stripped) {
        if url.scheme() == "file" {
            let fragment = url.fragment().map(str::to_string);
            let path = url.to_file_path().ok()?;
            return Some(ResolvedTarget::File {
                fragment,
                path: normalize_path(&path),
            });
        }
        return Some(ResolvedTarget::External(url));
    }

    let (path_part, fragment) = match stripped.split_once('#') {
        None => (stripped, None),
        Some((p, f)) => (p, Some(f.to_string())),
    };

    // Fragment-only link: the source document itself.
    if path_part.is_empty() {
        let path = source.to_file_path()?;
        return Some(ResolvedTarget::File {
            fragment,
            path: normalize_path(&path),
        });
    }

    let path = if Path::new(path_part).is_absolute() {
        // Absolute paths are workspace-relative; without a root they
        // cannot be resolved.
        let root = workspace_root?;
        root.join(path_part.trim_start_matches(['/', '\\']))
    } else if source.is_untitled() {
        workspace_root?.join(path_part)
    } else {
        source.to_file_path()?.parent()?.join(path_part)
    };

    return Some(ResolvedTarget::File {
        fragment,
        path: normalize_path(&path),
    });
}

/// Collapse `.` and `..` components in a path without touching the
/// filesystem. Preserves leading `..` when there is nothing left to pop.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut components: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        push_normalized_component(&mut components, component);
    }
    return components.iter().collect();
}

/// Handle a single path component during normalization.
/// Pops the last component for `..` when possible, preserves it otherwise.
fn push_normalized_component<'a>(components: &mut Vec<Component<'a>>, component: Component<'a>) {
    match component {
        Component::CurDir => {},
        Component::ParentDir => {
            let can_pop = matches!(
                components.last(),
                Some(c) if !matches!(c, Component::ParentDir | Component::RootDir)
            );
            if can_pop {
                components.pop();
            } else if !matches!(components.last(), Some(Component::RootDir)) {
                components.push(component);
            }
        },
        other => components.push(other),
    }
}

/// Strip a single pair of surrounding angle brackets, if present.
fn strip_angle_brackets(text: &str) -> &str {
    return text
        .strip_prefix('<')
        .and_then(|rest| return rest.strip_suffix('>'))
        .unwrap_or(text);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> DocumentUri {
        return DocumentUri::from_file_path(Path::new("/ws/docs/guide.md"));
    }

    #[test]
    fn http_url_passes_through() {
        let target = resolve("https://example.com/a#b", &source(), None).unwrap();
        let ResolvedTarget::External(url) = target else {
            panic!("expected external target");
        };
        assert_eq!(url.as_str(), "https://example.com/a#b");
        assert_eq!(url.fragment(), Some("b"));
    }

    #[test]
    fn angle_brackets_are_stripped() {
        let target = resolve("<https://example.com>", &source(), None).unwrap();
        assert!(matches!(target, ResolvedTarget::External(_)));
    }

    #[test]
    fn mailto_is_external() {
        let target = resolve("mailto:a@b.example", &source(), None).unwrap();
        let ResolvedTarget::External(url) = target else {
            panic!("expected external target");
        };
        assert_eq!(url.scheme(), "mailto");
    }

    #[test]
    fn relative_path_resolves_against_source_directory() {
        let target = resolve("../other.md#intro", &source(), Some(Path::new("/ws"))).unwrap();
        assert_eq!(
            target,
            ResolvedTarget::File {
                fragment: Some("intro".to_string()),
                path: PathBuf::from("/ws/other.md"),
            }
        );
    }

    #[test]
    fn absolute_path_resolves_against_workspace_root() {
        let target = resolve("/sub/other.md", &source(), Some(Path::new("/ws"))).unwrap();
        assert_eq!(
            target,
            ResolvedTarget::File {
                fragment: None,
                path: PathBuf::from("/ws/sub/other.md"),
            }
        );
    }

    #[test]
    fn absolute_path_without_root_is_unresolvable() {
        assert_eq!(resolve("/sub/other.md", &source(), None), None);
    }

    #[test]
    fn empty_path_is_the_source_document() {
        let target = resolve("#intro", &source(), None).unwrap();
        assert_eq!(
            target,
            ResolvedTarget::File {
                fragment: Some("intro".to_string()),
                path: PathBuf::from("/ws/docs/guide.md"),
            }
        );
    }

    #[test]
    fn untitled_source_resolves_relative_against_root() {
        let untitled = DocumentUri::untitled("draft");
        let target = resolve("notes.md", &untitled, Some(Path::new("/ws"))).unwrap();
        assert_eq!(
            target,
            ResolvedTarget::File {
                fragment: None,
                path: PathBuf::from("/ws/notes.md"),
            }
        );
    }

    #[test]
    fn untitled_source_without_root_is_unresolvable() {
        let untitled = DocumentUri::untitled("draft");
        assert_eq!(resolve("notes.md", &untitled, None), None);
    }

    #[test]
    fn file_scheme_is_taken_directly() {
        let target = resolve("file:///ws/other.md#x", &source(), None).unwrap();
        assert_eq!(
            target,
            ResolvedTarget::File {
                fragment: Some("x".to_string()),
                path: PathBuf::from("/ws/other.md"),
            }
        );
    }

    #[test]
    fn normalization_folds_dot_components() {
        assert_eq!(
            normalize_path(Path::new("/a/./b/../c.md")),
            PathBuf::from("/a/c.md")
        );
    }
}
