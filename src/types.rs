//! Core types for repomap.
//!
//! Tags are the atoms everything else is built from: the parser produces
//! them, the tag cache stores them, the ranker scores them and the assembler
//! renders the winners. Strings are `Arc<str>` so a tag can be shared across
//! rayon workers and cache layers without copying.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Serde serialization helpers for Arc<str> fields
mod arc_str_serde {
    use super::*;

    pub fn serialize<S>(arc: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(arc.as_ref())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(s.into())
    }
}

/// A single symbol occurrence, either a definition or a reference.
///
/// Immutable once produced. A tag is recreated from source on every tag
/// cache miss, so nothing downstream may rely on tag identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// Path relative to the repository root (e.g., "src/lib.rs")
    #[serde(with = "arc_str_serde")]
    pub rel_fname: Arc<str>,
    /// Absolute path for I/O operations
    #[serde(with = "arc_str_serde")]
    pub fname: Arc<str>,
    /// Line number (0-indexed), `None` when the parser could not tell
    pub line: Option<u32>,
    /// Identifier name
    #[serde(with = "arc_str_serde")]
    pub name: Arc<str>,
    /// Definition or reference
    pub kind: TagKind,
}

impl Tag {
    pub fn new(
        rel_fname: impl Into<Arc<str>>,
        fname: impl Into<Arc<str>>,
        line: Option<u32>,
        name: impl Into<Arc<str>>,
        kind: TagKind,
    ) -> Self {
        Self {
            rel_fname: rel_fname.into(),
            fname: fname.into(),
            line,
            name: name.into(),
            kind,
        }
    }

    /// Check if this is a definition tag
    pub fn is_def(&self) -> bool {
        matches!(self.kind, TagKind::Def)
    }

    /// Check if this is a reference tag
    pub fn is_ref(&self) -> bool {
        matches!(self.kind, TagKind::Ref)
    }
}

/// Tag kind - definition or reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TagKind {
    /// Symbol definition (function, class, constant...)
    Def,
    /// Symbol reference (call, type use, name use)
    Ref,
}

/// A definition tag with the importance score of its (file, identifier) pair.
#[derive(Debug, Clone)]
pub struct RankedTag {
    /// Importance score (non-negative)
    pub rank: f64,
    /// The underlying definition tag
    pub tag: Tag,
}

impl RankedTag {
    pub fn new(rank: f64, tag: Tag) -> Self {
        Self { rank, tag }
    }
}

/// Ordering by rank (descending - highest rank first)
impl PartialEq for RankedTag {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank
    }
}

impl Eq for RankedTag {}

impl PartialOrd for RankedTag {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RankedTag {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse order - higher rank comes first
        other.rank.partial_cmp(&self.rank).unwrap_or(std::cmp::Ordering::Equal)
    }
}

/// One entry of a ranked tag list.
#[derive(Debug, Clone, PartialEq)]
pub enum RankedEntry {
    /// A concrete definition, rendered as an excerpt around its line
    Definition(RankedTag),
    /// A file with no tags at all, rendered as a bare filename
    File(Arc<str>),
}

impl RankedEntry {
    pub fn rel_fname(&self) -> &Arc<str> {
        match self {
            RankedEntry::Definition(ranked) => &ranked.tag.rel_fname,
            RankedEntry::File(rel_fname) => rel_fname,
        }
    }
}

/// Ordered ranking output: most important definitions first.
pub type RankedTagList = Vec<RankedEntry>;

/// Symbol identifier - (file, symbol_name) tuple, the unit scores accumulate on
pub type SymbolId = (Arc<str>, Arc<str>);

/// Inputs of one map computation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapRequest {
    /// Files the consumer already has; they bias ranking but are never listed
    pub focus_files: Vec<PathBuf>,
    /// Everything else in scope
    pub other_files: Vec<PathBuf>,
    /// Relative paths named by the consumer
    pub mentioned_files: BTreeSet<String>,
    /// Identifiers named by the consumer
    pub mentioned_idents: BTreeSet<String>,
    /// Bypass the result cache and reparse the requested files
    pub force_refresh: bool,
}

impl MapRequest {
    pub fn new(focus_files: Vec<PathBuf>, other_files: Vec<PathBuf>) -> Self {
        Self { focus_files, other_files, ..Default::default() }
    }

    pub fn with_mentioned_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mentioned_files.extend(files.into_iter().map(Into::into));
        self
    }

    pub fn with_mentioned_idents<I, S>(mut self, idents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mentioned_idents.extend(idents.into_iter().map(Into::into));
        self
    }

    pub fn force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }
}

/// One bounded slice of an assembled map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapPart {
    /// 1-based part number
    pub index: usize,
    pub text: String,
    pub token_count: usize,
    /// Set when the part holds a single excerpt larger than the whole budget
    pub oversized: bool,
}

/// The full output of one map computation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembledMap {
    pub parts: Vec<MapPart>,
    /// Effective per-part budget the parts were assembled against
    pub budget: usize,
    /// True when the map is an unranked file listing
    pub unranked: bool,
}

impl AssembledMap {
    pub fn first(&self) -> Option<&MapPart> {
        self.parts.first()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(|p| p.text.trim().is_empty())
    }

    pub fn total_tokens(&self) -> usize {
        self.parts.iter().map(|p| p.token_count).sum()
    }
}
