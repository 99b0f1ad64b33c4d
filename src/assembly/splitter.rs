//! Signature-safe splitting of a section that exceeds the budget.
//!
//! A cut before line `i` is allowed only when no declaration span is open at
//! that point. A span opens on a line that looks like a declaration start
//! (definition keyword, visibility/async modifier, decorator, or trailing
//! `{`) and closes once bracket nesting is back at zero. A `⋮` marker ends
//! whatever span was open: the excerpt stops showing that declaration there.
//!
//! Among allowed cuts, markers, syntax-reported declaration boundaries and
//! lines right after a span closes are preferred over arbitrary lines. When
//! nothing within the limit is allowed, the smallest unsplittable run of
//! lines becomes its own oversized piece.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::rendering::{TokenCounter, ELISION_MARKER, GUTTER};

static DECL_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?:@\w+|#!?\[|(?:pub(?:\([^)]*\))?|export|default|public|private|protected|internal|static|async|abstract|final|override|unsafe|extern|def|class|fn|function|func|interface|trait|struct|enum|impl|type|mod|module|const|let|var|val)\s)",
    )
    .unwrap()
});

static DECORATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(?:@\w+|#!?\[)").unwrap());

/// Whether a section may be cut right before a given line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cut {
    Never,
    Allowed,
    Preferred,
}

/// A contiguous run of lines from one section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    pub text: String,
    /// Larger than the limit because no allowed cut fell inside it
    pub oversized: bool,
}

/// Cut classification for every line of a section.
///
/// Line 0 is the section heading, so cuts at 0 and 1 are never allowed.
/// `boundaries` are section line indices reported by syntax analysis.
pub fn cut_points(lines: &[&str], boundaries: &BTreeSet<usize>) -> Vec<Cut> {
    let mut cuts = vec![Cut::Never; lines.len()];
    let mut open = false;
    let mut depth: i64 = 0;
    let mut after_decorator = false;
    let mut just_closed = false;

    for (i, raw) in lines.iter().enumerate() {
        let line = strip_gutter(raw);
        let is_marker = line.trim() == ELISION_MARKER;
        if is_marker {
            open = false;
            depth = 0;
            after_decorator = false;
        }

        if i >= 2 {
            cuts[i] = if is_marker {
                Cut::Preferred
            } else if open || after_decorator {
                Cut::Never
            } else if just_closed || boundaries.contains(&i) || DECL_START.is_match(line) {
                Cut::Preferred
            } else {
                Cut::Allowed
            };
        }

        if is_marker {
            just_closed = false;
            continue;
        }

        if !open && (DECL_START.is_match(line) || line.trim_end().ends_with('{')) {
            open = true;
            depth = 0;
        }
        just_closed = false;
        if open {
            depth += nesting_delta(line);
            if depth <= 0 {
                open = false;
                depth = 0;
                just_closed = true;
            }
        }
        after_decorator = DECORATOR.is_match(line);
    }
    cuts
}

/// Split `text` into pieces of at most `limit` tokens where possible.
pub fn split_section(
    text: &str,
    boundaries: &BTreeSet<usize>,
    limit: usize,
    counter: &TokenCounter,
) -> Vec<Piece> {
    if counter(text) <= limit {
        return vec![Piece { text: text.to_string(), oversized: false }];
    }

    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let cuts = cut_points(&lines, boundaries);

    // prefix[i] = tokens of lines[..i], counted line by line
    let mut prefix = Vec::with_capacity(lines.len() + 1);
    prefix.push(0usize);
    for line in &lines {
        let last = prefix[prefix.len() - 1];
        prefix.push(last + counter(line));
    }
    let span_tokens = |from: usize, to: usize| prefix[to] - prefix[from];

    let mut pieces = Vec::new();
    let mut start = 0;
    while start < lines.len() {
        let mut end = start;
        while end < lines.len() && span_tokens(start, end + 1) <= limit {
            end += 1;
        }
        if end == lines.len() {
            pieces.push(piece(&lines[start..end], false));
            break;
        }

        // Latest preferred cut that keeps the piece at least half full,
        // otherwise the latest allowed one
        let preferred = (start + 1..=end)
            .rev()
            .find(|&c| cuts[c] == Cut::Preferred && span_tokens(start, c) * 2 >= limit);
        let allowed = || (start + 1..=end).rev().find(|&c| cuts[c] != Cut::Never);

        match preferred.or_else(allowed) {
            Some(cut) => {
                pieces.push(piece(&lines[start..cut], false));
                start = cut;
            }
            None => {
                let cut = (end + 1..lines.len())
                    .find(|&c| cuts[c] != Cut::Never)
                    .unwrap_or(lines.len());
                tracing::debug!("no safe split in lines {}..{}, isolating them", start, cut);
                pieces.push(piece(&lines[start..cut], true));
                start = cut;
            }
        }
    }
    pieces
}

fn piece(lines: &[&str], oversized: bool) -> Piece {
    Piece { text: lines.concat(), oversized }
}

fn strip_gutter(raw: &str) -> &str {
    let line = raw.trim_end_matches(['\n', '\r']);
    line.strip_prefix(GUTTER).unwrap_or(line)
}

/// Net `{`/`(`/`[` nesting change on one line.
fn nesting_delta(line: &str) -> i64 {
    line.chars().fold(0, |depth, c| match c {
        '{' | '(' | '[' => depth + 1,
        '}' | ')' | ']' => depth - 1,
        _ => depth,
    })
}
