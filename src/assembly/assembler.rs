//! Budgeted assembly of ranked definitions into map parts.
//!
//! Ranked entries become sections: consecutive definitions of one file share
//! a `"{file}:\n{excerpt}"` section, tagless files become a bare `"{file}\n"`
//! line. Sections are appended to the current part while they fit. A part
//! that cannot take the next section is closed and a new one opens with a
//! continued header. A part is also closed early once it passes the
//! early-close ratio of the budget.
//!
//! A section too large for an empty part is cut by the splitter; a piece
//! that still doesn't fit is emitted alone as an oversized part with a
//! warning. Nothing is dropped.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::assembly::splitter::split_section;
use crate::config::AssemblyConfig;
use crate::diagnostics::{Diagnostics, Warning};
use crate::rendering::{file_listing, RenderMemo, TokenCounter};
use crate::types::{AssembledMap, MapPart, RankedEntry};

/// Header opening every part after the first.
pub fn continued_header(index: usize) -> String {
    format!("Repository contents (continued, part {}):\n\n", index)
}

/// One unit of assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// File the section renders, for warnings
    pub file: Option<Arc<str>>,
    pub text: String,
    /// Section line indices where a declaration starts or ends
    pub boundaries: BTreeSet<usize>,
    /// Prefixed to a split piece that opens a new part
    pub heading: Option<String>,
}

impl Section {
    pub fn plain(text: String) -> Self {
        Self { file: None, text, boundaries: BTreeSet::new(), heading: None }
    }
}

pub struct MapAssembler {
    counter: TokenCounter,
    memo: Arc<RenderMemo>,
    config: AssemblyConfig,
    diagnostics: Diagnostics,
}

impl MapAssembler {
    pub fn new(
        counter: TokenCounter,
        memo: Arc<RenderMemo>,
        config: AssemblyConfig,
        diagnostics: Diagnostics,
    ) -> Self {
        Self { counter, memo, config, diagnostics }
    }

    /// Assemble a ranked map.
    pub fn assemble(&self, ranked: &[RankedEntry], budget: usize) -> AssembledMap {
        let sections = self.sections(ranked);
        AssembledMap { parts: self.assemble_sections(sections, budget), budget, unranked: false }
    }

    /// Assemble the unranked fallback listing.
    pub fn assemble_listing(&self, files: &[Arc<str>], budget: usize) -> AssembledMap {
        let sections = file_listing(files)
            .into_iter()
            .map(|listing| Section { heading: listing.heading, ..Section::plain(listing.text) })
            .collect();
        AssembledMap { parts: self.assemble_sections(sections, budget), budget, unranked: true }
    }

    /// Render ranked entries into sections, in rank order.
    pub fn sections(&self, ranked: &[RankedEntry]) -> Vec<Section> {
        let mut sections = Vec::new();
        let mut i = 0;
        while i < ranked.len() {
            match &ranked[i] {
                RankedEntry::File(rel_fname) => {
                    sections.push(Section {
                        file: Some(rel_fname.clone()),
                        text: format!("{}\n", rel_fname),
                        boundaries: BTreeSet::new(),
                        heading: None,
                    });
                    i += 1;
                }
                RankedEntry::Definition(first) => {
                    let rel_fname = first.tag.rel_fname.clone();
                    let fname = first.tag.fname.clone();
                    let mut lines = BTreeSet::new();
                    while let Some(RankedEntry::Definition(ranked_tag)) = ranked.get(i) {
                        if ranked_tag.tag.rel_fname != rel_fname {
                            break;
                        }
                        if let Some(line) = ranked_tag.tag.line {
                            lines.insert(line as usize);
                        }
                        i += 1;
                    }
                    if let Some(section) = self.file_section(&rel_fname, &fname, &lines) {
                        sections.push(section);
                    }
                }
            }
        }
        sections
    }

    fn file_section(&self, rel_fname: &Arc<str>, fname: &str, lines: &BTreeSet<usize>) -> Option<Section> {
        let path = Path::new(fname);
        let mtime = fs::metadata(path).and_then(|m| m.modified()).ok();
        let excerpt = self.memo.render(rel_fname, mtime, lines, || match fs::read_to_string(path) {
            Ok(content) => Some(content),
            Err(err) => {
                self.diagnostics.warn(Warning::FileAccess {
                    path: rel_fname.to_string(),
                    reason: err.to_string(),
                });
                None
            }
        })?;

        Some(Section {
            file: Some(rel_fname.clone()),
            text: format!("{}:\n{}", rel_fname, excerpt.text),
            // Shift past the heading line
            boundaries: excerpt.boundaries.iter().map(|b| b + 1).collect(),
            heading: None,
        })
    }

    /// Pack sections into parts of at most `budget` tokens.
    pub fn assemble_sections(&self, sections: Vec<Section>, budget: usize) -> Vec<MapPart> {
        let mut builder = PartBuilder::new(&self.counter, budget, self.config.early_close_ratio);
        // Room for content in a part that carries the widest continued header
        let piece_limit = budget
            .saturating_sub((self.counter)(&continued_header(99_999)))
            .max(1);

        for section in sections {
            if builder.fits(&section.text) || (self.counter)(&section.text) <= piece_limit {
                builder.push(&section.text, section.file.as_ref(), &self.diagnostics);
                continue;
            }

            let heading_tokens = section.heading.as_deref().map_or(0, |h| (self.counter)(h));
            let limit = piece_limit.saturating_sub(heading_tokens).max(1);
            let pieces = split_section(&section.text, &section.boundaries, limit, &self.counter);
            tracing::debug!(
                "split {} into {} pieces",
                section.file.as_deref().unwrap_or("section"),
                pieces.len()
            );
            for (i, piece) in pieces.iter().enumerate() {
                match section.heading.as_deref() {
                    Some(heading) if i > 0 => {
                        builder.push_continued(&piece.text, heading, section.file.as_ref(), &self.diagnostics)
                    }
                    _ => builder.push(&piece.text, section.file.as_ref(), &self.diagnostics),
                }
            }
        }

        builder.finish()
    }
}

/// Accumulates the part under construction.
struct PartBuilder<'a> {
    counter: &'a TokenCounter,
    budget: usize,
    /// Token count past which a part is closed early
    early_close: Option<usize>,
    parts: Vec<MapPart>,
    text: String,
    tokens: usize,
    has_content: bool,
}

impl<'a> PartBuilder<'a> {
    fn new(counter: &'a TokenCounter, budget: usize, early_close_ratio: f64) -> Self {
        let early_close = (budget != usize::MAX).then(|| (budget as f64 * early_close_ratio) as usize);
        Self {
            counter,
            budget,
            early_close,
            parts: Vec::new(),
            text: String::new(),
            tokens: 0,
            has_content: false,
        }
    }

    fn index(&self) -> usize {
        self.parts.len() + 1
    }

    fn fits(&self, block: &str) -> bool {
        if self.budget == usize::MAX {
            return true;
        }
        let mut candidate = String::with_capacity(self.text.len() + block.len());
        candidate.push_str(&self.text);
        candidate.push_str(block);
        (self.counter)(&candidate) <= self.budget
    }

    fn append(&mut self, block: &str) {
        self.text.push_str(block);
        self.tokens = (self.counter)(&self.text);
        self.has_content = true;
    }

    /// Close the current part, if it holds anything, and open the next.
    fn close(&mut self, oversized: bool) {
        if !self.has_content {
            return;
        }
        let next_header = continued_header(self.index() + 1);
        let text = std::mem::replace(&mut self.text, next_header);
        self.parts.push(MapPart {
            index: self.parts.len() + 1,
            token_count: (self.counter)(&text),
            text,
            oversized,
        });
        self.tokens = (self.counter)(&self.text);
        self.has_content = false;
    }

    fn push(&mut self, block: &str, file: Option<&Arc<str>>, diagnostics: &Diagnostics) {
        if !self.fits(block) {
            self.close(false);
        }

        if self.fits(block) {
            self.append(block);
            if self.early_close.is_some_and(|limit| self.tokens > limit) {
                self.close(false);
            }
            return;
        }

        // Too big even for an empty part: it gets one of its own
        self.append(block);
        diagnostics.warn(Warning::BudgetOverflow {
            file: file.map(|f| f.to_string()),
            tokens: self.tokens,
            budget: self.budget,
        });
        self.close(true);
    }

    /// Push a later piece of a split section, repeating `heading` when the
    /// piece opens a new part.
    fn push_continued(&mut self, block: &str, heading: &str, file: Option<&Arc<str>>, diagnostics: &Diagnostics) {
        if self.has_content && self.fits(block) {
            self.push(block, file, diagnostics);
            return;
        }
        self.close(false);
        self.push(&format!("{}{}", heading, block), file, diagnostics);
    }

    fn finish(mut self) -> Vec<MapPart> {
        self.close(false);
        self.parts
    }
}
