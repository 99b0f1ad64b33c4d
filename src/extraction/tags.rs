//! Tag extraction orchestration.
//!
//! Ties the tree-sitter and regex extractors together behind [`TagParser`]:
//! tree-sitter when a grammar exists and it finds something, regex otherwise.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};

use crate::extraction::parser::RegexParser;
use crate::extraction::treesitter::{extension_to_language, TreeSitterParser};
use crate::types::Tag;

thread_local! {
    /// Thread-local tree-sitter parser (tree-sitter parsers are not thread-safe)
    static TS_PARSER: RefCell<TreeSitterParser> = RefCell::new(TreeSitterParser::new());
}

/// Source of tags for one file.
///
/// A failure is per-file and non-fatal: the tag cache reports it and treats
/// the file as having no tags.
pub trait TagParser: Send + Sync {
    fn parse(&self, path: &Path, rel_fname: &str) -> Result<Vec<Tag>>;
}

/// Default parser: tree-sitter AST walk with a regex fallback.
#[derive(Default)]
pub struct SourceParser {
    fallback: RegexParser,
}

impl SourceParser {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TagParser for SourceParser {
    fn parse(&self, path: &Path, rel_fname: &str) -> Result<Vec<Tag>> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        if let Some(lang) = language_for_path(path) {
            let fname = path.to_string_lossy();
            let tags = TS_PARSER.with(|p| {
                p.borrow_mut().extract_tags(&content, lang, &fname, rel_fname)
            });
            match tags {
                Some(tags) if !tags.is_empty() => return Ok(tags),
                Some(_) => {}
                None => tracing::debug!("tree-sitter could not parse {}, using regex", rel_fname),
            }
        }

        Ok(self.fallback.parse_source(&content, path, rel_fname))
    }
}

/// Tree-sitter language name for a path, if a grammar is bundled.
pub fn language_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension().and_then(|e| e.to_str())?;
    extension_to_language(ext).filter(|lang| TreeSitterParser::supports_language(lang))
}

/// Declaration boundary lines (0-indexed) of a source text.
///
/// Empty when no grammar is available for `language`.
pub fn structural_boundaries(content: &str, language: &str) -> BTreeSet<usize> {
    TS_PARSER.with(|p| p.borrow_mut().boundaries(content, language))
}
