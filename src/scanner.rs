//! Tokenizer glue: extracts headings, links, and reference items from
//! markdown text into a [`ParsedSnapshot`]. Deterministic for identical
//! text. Inline and resolved reference links come from the pulldown-cmark
//! event stream; undefined reference uses come from its broken-link
//! callback; reference definition lines (including duplicates, which the
//! parser folds away) come from a line scan.

use std::cell::RefCell;
use std::ops::Range;

use pulldown_cmark::{BrokenLink, Event, LinkType, Options, Parser, Tag};
use regex::Regex;

use crate::slug;
use crate::types::{
    Heading, Link, LinkKind, ParsedSnapshot, ReferenceDefinition, ReferenceUse, Span, Version,
};

/// Parse document text into a snapshot for the given version.
pub fn parse_snapshot(text: &str, version: Version) -> ParsedSnapshot {
    let lines = LineIndex::new(text);

    let broken: RefCell<Vec<ReferenceUse>> = RefCell::new(Vec::new());
    let mut on_broken_link = |link: BrokenLink<'_>| {
        broken.borrow_mut().push(ReferenceUse {
            name: link.reference.to_string(),
            span: lines.span(&link.span),
        });
        return None;
    };

    let parser =
        Parser::new_with_broken_link_callback(text, Options::empty(), Some(&mut on_broken_link));

    let mut headings: Vec<Heading> = Vec::new();
    let mut links: Vec<Link> = Vec::new();
    // Heading text accumulates across the events between Start and End.
    let mut open_heading: Option<(String, Range<usize>)> = None;

    for (event, range) in parser.into_offset_iter() {
        match event {
            Event::Start(Tag::Heading(..)) => {
                open_heading = Some((String::new(), range));
            },
            Event::End(Tag::Heading(..)) => {
                if let Some((text, heading_range)) = open_heading.take() {
                    headings.push(Heading {
                        slug: slug::slugify(&text),
                        span: lines.span(&heading_range),
                        text,
                    });
                }
            },
            Event::Text(t) | Event::Code(t) => {
                if let Some((buffer, _)) = open_heading.as_mut() {
                    buffer.push_str(&t);
                }
            },
            Event::Start(Tag::Link(link_type, address, _title))
            | Event::Start(Tag::Image(link_type, address, _title)) => {
                links.push(Link {
                    address: address.to_string(),
                    kind: link_kind(link_type),
                    span: lines.span(&range),
                });
            },
            _ => {},
        }
    }

    return ParsedSnapshot {
        headings,
        links,
        reference_definitions: scan_reference_definitions(text, &lines),
        reference_uses: broken.into_inner(),
        version,
    };
}

/// Classify how a link was written.
fn link_kind(link_type: LinkType) -> LinkKind {
    return match link_type {
        LinkType::Inline | LinkType::Autolink | LinkType::Email => LinkKind::Inline,
        _ => LinkKind::Reference,
    };
}

/// Find every `[name]: destination` line, duplicates included.
/// The markdown parser keeps only the first definition per name, so
/// duplicate detection has to look at the raw lines.
fn scan_reference_definitions(text: &str, lines: &LineIndex) -> Vec<ReferenceDefinition> {
    let pattern = Regex::new(r"^ {0,3}\[([^\]]+)\]:\s*\S").expect("valid regex");
    let mut definitions = Vec::new();

    let mut offset = 0_usize;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if let Some(cap) = pattern.captures(trimmed) {
            if let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) {
                let start = offset.saturating_add(whole.start());
                let range = start..offset.saturating_add(whole.end());
                definitions.push(ReferenceDefinition {
                    name: name.as_str().to_string(),
                    span: lines.span(&range),
                });
            }
        }
        offset = offset.saturating_add(line.len());
    }

    return definitions;
}

/// Byte-offset to line-number index for one document text.
struct LineIndex {
    /// Byte offset of each line start, first entry always 0.
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        let mut starts = vec![0];
        for (idx, byte) in text.bytes().enumerate() {
            if byte == b'\n' {
                starts.push(idx.saturating_add(1));
            }
        }
        return Self { starts };
    }

    /// 1-based line containing the given byte offset.
    fn line_of(&self, offset: usize) -> u32 {
        let line = self.starts.partition_point(|s| return *s <= offset);
        return u32::try_from(line).unwrap_or(u32::MAX);
    }

    fn span(&self, range: &Range<usize>) -> Span {
        return Span {
            end: range.end,
            line: self.line_of(range.start),
            start: range.start,
        };
    }
}
