//! Heading anchor slugs, following the GitHub convention: lowercase,
//! punctuation stripped, whitespace hyphenated. Fragments and heading
//! texts are slugged the same way, so comparison is a plain equality.
//!
//! Duplicate headings are deliberately not suffix-disambiguated: two
//! headings slugging identically both satisfy a fragment link.

/// Normalized, comparable representation of a heading title or fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Slug(String);

impl Slug {
    /// The normalized slug text.
    pub fn as_str(&self) -> &str {
        return &self.0;
    }
}

/// Derive the anchor slug for a heading title or a link fragment.
pub fn slugify(text: &str) -> Slug {
    let mut out = String::with_capacity(text.len());
    for ch in text.trim().chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
        } else if ch.is_whitespace() || ch == '-' {
            out.push('-');
        } else if ch == '_' {
            out.push('_');
        }
        // All other punctuation is dropped.
    }
    return Slug(out);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_hyphenates() {
        assert_eq!(slugify("Hello World").as_str(), "hello-world");
    }

    #[test]
    fn strips_punctuation() {
        assert_eq!(slugify("What's new?").as_str(), "whats-new");
        assert_eq!(slugify("C# notes").as_str(), "c-notes");
    }

    #[test]
    fn keeps_hyphens_and_underscores() {
        assert_eq!(slugify("re-parse_rules").as_str(), "re-parse_rules");
    }

    #[test]
    fn fragment_matches_heading_case_insensitively() {
        assert_eq!(slugify("Intro"), slugify("intro"));
        assert_eq!(slugify("INTRO"), slugify("Intro"));
    }

    #[test]
    fn trims_surrounding_whitespace() {
        assert_eq!(slugify("  Intro  ").as_str(), "intro");
    }
}
