//! repomap - token-budgeted, importance-ranked repository symbol maps
//!
//! Produces a compact map of the definitions that matter most in a
//! repository, given the files currently in focus, sized to fit a token
//! budget and split into parts without ever cutting a signature in half.
//!
//! # Architecture
//!
//! ```text
//! Discovery → Tag Cache → Importance Ranker → Map Assembler → Result Cache
//!     ↓           ↓              ↓                   ↓              ↓
//!   ignore    tree-sitter    petgraph +          elided        fingerprint
//!   crate      + redb        PageRank            excerpts     + refresh policy
//! ```
//!
//! [`RepoMap`] ties the stages together; each module is usable on its own.

pub mod assembly;
pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod discovery;
pub mod error;
pub mod extraction;
pub mod ranking;
pub mod rendering;
pub mod repomap;
pub mod types;

pub use config::{Config, RefreshPolicy};
pub use diagnostics::{Diagnostics, Warning};
pub use error::{MapError, MapResult, RankError};
pub use extraction::{SourceParser, TagParser};
pub use rendering::{ContextRenderer, TokenCounter};
pub use repomap::{MapOutput, RepoMap};
pub use types::{
    AssembledMap, MapPart, MapRequest, RankedEntry, RankedTag, RankedTagList, SymbolId, Tag, TagKind,
};
