//! Elided per-file excerpts.
//!
//! ```text
//! ⋮
//! │class Greeter:
//! │    def greet(self, name,
//! │              excited=False):
//! ⋮
//! ```
//!
//! Each line of interest is shown behind a `│` gutter; everything between
//! non-adjacent regions collapses into a single `⋮` marker.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;

use crate::extraction::{language_for_path, structural_boundaries};

/// Elision marker line.
pub const ELISION_MARKER: &str = "⋮";

/// Gutter prefixed to every shown source line.
pub const GUTTER: &str = "│";

/// A rendered excerpt plus where each of its lines came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Excerpt {
    pub text: String,
    /// Source line (0-indexed) per excerpt line; `None` for markers
    pub source_lines: Vec<Option<usize>>,
    /// Excerpt lines where a declaration starts or ends, per syntax analysis
    pub boundaries: BTreeSet<usize>,
}

impl Excerpt {
    /// Excerpt with no source mapping.
    pub fn unmapped(text: String) -> Self {
        let source_lines = vec![None; text.lines().count()];
        Self { text, source_lines, boundaries: BTreeSet::new() }
    }
}

/// Renders an elided view of a file around a set of lines.
pub trait ContextRenderer: Send + Sync {
    fn render(&self, content: &str, lines_of_interest: &BTreeSet<usize>) -> String;

    /// Same as [`render`](Self::render), with the source line of each output
    /// line when the renderer knows it.
    fn render_mapped(&self, content: &str, lines_of_interest: &BTreeSet<usize>) -> Excerpt {
        Excerpt::unmapped(self.render(content, lines_of_interest))
    }
}

/// Default renderer: gutter, bracket continuation, `⋮` between regions.
#[derive(Debug, Clone)]
pub struct ElidedRenderer {
    /// Maximum lines shown per line of interest while brackets stay open
    pub max_continuation: usize,
}

impl Default for ElidedRenderer {
    fn default() -> Self {
        Self { max_continuation: 12 }
    }
}

impl ElidedRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines to show: each line of interest, extended while `(`/`[` are open.
    fn shown_lines(&self, lines: &[&str], lines_of_interest: &BTreeSet<usize>) -> BTreeSet<usize> {
        let mut shown = BTreeSet::new();
        for &start in lines_of_interest {
            if start >= lines.len() {
                continue;
            }
            let mut depth: i64 = 0;
            for (offset, line) in lines[start..].iter().enumerate().take(self.max_continuation.max(1)) {
                shown.insert(start + offset);
                depth += bracket_delta(line);
                if depth <= 0 {
                    break;
                }
            }
        }
        shown
    }
}

impl ContextRenderer for ElidedRenderer {
    fn render(&self, content: &str, lines_of_interest: &BTreeSet<usize>) -> String {
        self.render_mapped(content, lines_of_interest).text
    }

    fn render_mapped(&self, content: &str, lines_of_interest: &BTreeSet<usize>) -> Excerpt {
        let lines: Vec<&str> = content.lines().collect();
        let shown = self.shown_lines(&lines, lines_of_interest);

        let mut excerpt = Excerpt::default();
        let push = |excerpt: &mut Excerpt, line: &str, source: Option<usize>| {
            excerpt.text.push_str(line);
            excerpt.text.push('\n');
            excerpt.source_lines.push(source);
        };

        let mut prev: Option<usize> = None;
        for &line_no in &shown {
            let gap = match prev {
                None => line_no > 0,
                Some(p) => line_no > p + 1,
            };
            if gap {
                push(&mut excerpt, ELISION_MARKER, None);
            }
            push(&mut excerpt, &format!("{}{}", GUTTER, lines[line_no]), Some(line_no));
            prev = Some(line_no);
        }
        if let Some(last) = prev {
            if last + 1 < lines.len() {
                push(&mut excerpt, ELISION_MARKER, None);
            }
        }
        excerpt
    }
}

/// Net `(`/`[` nesting change on one line. Braces open bodies, not
/// signatures, so they don't extend a region.
fn bracket_delta(line: &str) -> i64 {
    line.chars().fold(0, |depth, c| match c {
        '(' | '[' => depth + 1,
        ')' | ']' => depth - 1,
        _ => depth,
    })
}

type MemoKey = (Arc<str>, Vec<usize>, SystemTime);

/// Process-lifetime memo of rendered excerpts keyed by
/// `(file, sorted lines, mtime)`.
pub struct RenderMemo {
    renderer: Arc<dyn ContextRenderer>,
    entries: DashMap<MemoKey, Arc<Excerpt>>,
}

impl RenderMemo {
    pub fn new(renderer: Arc<dyn ContextRenderer>) -> Self {
        Self { renderer, entries: DashMap::new() }
    }

    /// Excerpt of `rel_fname` around `lines`.
    ///
    /// `content` is only called on a miss; it returning `None` (file gone)
    /// yields `None`. Without an mtime nothing is memoized.
    pub fn render(
        &self,
        rel_fname: &Arc<str>,
        mtime: Option<SystemTime>,
        lines: &BTreeSet<usize>,
        content: impl FnOnce() -> Option<String>,
    ) -> Option<Arc<Excerpt>> {
        let key = mtime.map(|mtime| (rel_fname.clone(), lines.iter().copied().collect::<Vec<_>>(), mtime));
        if let Some(key) = &key {
            if let Some(hit) = self.entries.get(key) {
                return Some(hit.clone());
            }
        }

        let content = content()?;
        let mut excerpt = self.renderer.render_mapped(&content, lines);
        if let Some(language) = language_for_path(Path::new(rel_fname.as_ref())) {
            let source_boundaries = structural_boundaries(&content, language);
            excerpt.boundaries = excerpt
                .source_lines
                .iter()
                .enumerate()
                .filter(|(_, src)| src.is_some_and(|s| source_boundaries.contains(&s)))
                .map(|(i, _)| i)
                .collect();
        }

        let excerpt = Arc::new(excerpt);
        if let Some(key) = key {
            self.entries.insert(key, excerpt.clone());
        }
        Some(excerpt)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const SOURCE: &str = "import os\n\nclass Greeter:\n    def greet(self, name,\n              excited=False):\n        print(name)\n\ndef main():\n    Greeter().greet('x')\n";

    fn lines(ls: &[usize]) -> BTreeSet<usize> {
        ls.iter().copied().collect()
    }

    #[test]
    fn test_render_elides_between_regions() {
        let out = ElidedRenderer::new().render(SOURCE, &lines(&[2, 7]));
        assert_eq!(out, "⋮\n│class Greeter:\n⋮\n│def main():\n⋮\n");
    }

    #[test]
    fn test_render_continues_open_parens() {
        let out = ElidedRenderer::new().render(SOURCE, &lines(&[3]));
        assert_eq!(out, "⋮\n│    def greet(self, name,\n│              excited=False):\n⋮\n");
    }

    #[test]
    fn test_no_leading_marker_at_line_zero_or_trailing_at_end() {
        let out = ElidedRenderer::new().render("a = 1\nb = 2\n", &lines(&[0, 1]));
        assert_eq!(out, "│a = 1\n│b = 2\n");
    }

    #[test]
    fn test_continuation_is_bounded() {
        let content = format!("call(\n{}", "  x,\n".repeat(40));
        let out = ElidedRenderer::new().render(&content, &lines(&[0]));
        assert_eq!(out.lines().filter(|l| l.starts_with(GUTTER)).count(), 12);
    }

    #[test]
    fn test_out_of_range_lines_ignored() {
        assert_eq!(ElidedRenderer::new().render("a\n", &lines(&[5])), "");
    }

    #[test]
    fn test_mapping_tracks_source_lines() {
        let excerpt = ElidedRenderer::new().render_mapped(SOURCE, &lines(&[2]));
        assert_eq!(excerpt.source_lines, vec![None, Some(2), None]);
    }

    #[test]
    fn test_memo_hit_skips_content() {
        let memo = RenderMemo::new(Arc::new(ElidedRenderer::new()));
        let rel: Arc<str> = Arc::from("greeter.py");
        let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);

        let first = memo.render(&rel, Some(mtime), &lines(&[2]), || Some(SOURCE.to_string()));
        let second = memo.render(&rel, Some(mtime), &lines(&[2]), || panic!("memo miss"));
        assert_eq!(first, second);
        assert_eq!(memo.len(), 1);

        // A new mtime is a new key
        let later = mtime + Duration::from_secs(1);
        let third = memo.render(&rel, Some(later), &lines(&[2]), || Some("class Other:\n".to_string()));
        assert_eq!(third.map(|e| e.text.clone()), Some("│class Other:\n".to_string()));
        assert_eq!(memo.len(), 2);
    }

    #[test]
    fn test_memo_without_mtime_is_not_cached() {
        let memo = RenderMemo::new(Arc::new(ElidedRenderer::new()));
        let rel: Arc<str> = Arc::from("a.py");
        assert!(memo.render(&rel, None, &lines(&[0]), || None).is_none());
        assert!(memo.is_empty());
    }

    #[test]
    fn test_memo_maps_structural_boundaries() {
        let memo = RenderMemo::new(Arc::new(ElidedRenderer::new()));
        let rel: Arc<str> = Arc::from("greeter.py");
        let excerpt = memo
            .render(&rel, None, &lines(&[2, 7]), || Some(SOURCE.to_string()))
            .unwrap();
        // "│class Greeter:" is excerpt line 1, "│def main():" is line 3
        assert!(excerpt.boundaries.contains(&1));
        assert!(excerpt.boundaries.contains(&3));
    }
}
