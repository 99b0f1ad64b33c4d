//! Ranking pipeline - from tags to importance scores.
//!
//! - `graph`: weighted file-level reference multigraph
//! - `pagerank`: personalized power iteration over edge weights
//! - `ranker`: rank redistribution and expansion into definitions

mod graph;
mod pagerank;
mod ranker;

pub use graph::{EdgeData, ReferenceGraph};
pub use pagerank::{pagerank, PageRankParams};
pub use ranker::{ImportanceRanker, RankInput};
