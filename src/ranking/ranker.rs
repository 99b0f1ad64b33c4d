//! Importance ranking: tags in, ordered definitions out.
//!
//! Steps:
//! 1. Build the [`ReferenceGraph`] over every tagged file plus the focus and
//!    mentioned files
//! 2. Personalize toward focus and mentioned files
//! 3. Run PageRank, retrying unpersonalized when it degenerates
//! 4. Spread each file's rank over its outgoing edges by weight, accumulating
//!    per (definer, identifier)
//! 5. Expand the sorted pairs into concrete definition tags, then append
//!    files that have no tags at all

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use petgraph::visit::EdgeRef;

use crate::config::RankingConfig;
use crate::diagnostics::{Diagnostics, Warning};
use crate::error::RankError;
use crate::ranking::graph::ReferenceGraph;
use crate::ranking::pagerank::{pagerank, PageRankParams};
use crate::types::{RankedEntry, RankedTag, RankedTagList, SymbolId, Tag};

/// Everything one ranking pass looks at.
#[derive(Debug, Clone, Copy)]
pub struct RankInput<'a> {
    /// Tags of every requested file
    pub tags: &'a [Tag],
    /// Requested files (focus and other) as relative paths, in stable order
    pub files: &'a [Arc<str>],
    pub focus: &'a BTreeSet<Arc<str>>,
    pub mentioned_files: &'a BTreeSet<String>,
    pub mentioned_idents: &'a BTreeSet<String>,
}

pub struct ImportanceRanker {
    config: RankingConfig,
}

impl ImportanceRanker {
    pub fn new(config: RankingConfig) -> Self {
        Self { config }
    }

    /// Rank the definitions in scope.
    ///
    /// An empty list means no ranking is available; the caller falls back to
    /// an unranked listing. Only [`RankError::ScaleLimit`] is returned as an
    /// error.
    pub fn rank(&self, input: RankInput<'_>, diagnostics: &Diagnostics) -> Result<RankedTagList, RankError> {
        let requested: HashSet<&str> = input.files.iter().map(|f| &**f).collect();

        let extra: Vec<&Arc<str>> = input
            .files
            .iter()
            .filter(|f| input.focus.contains(*f) || input.mentioned_files.contains(&***f))
            .collect();

        let graph = ReferenceGraph::build(input.tags, extra, input.mentioned_idents, &self.config)?;

        let Some(ranks) = self.node_ranks(&graph, &input, &requested, diagnostics) else {
            return Ok(Vec::new());
        };

        let scores = self.redistribute(&graph, &ranks);
        Ok(self.expand(&graph, &ranks, scores, &input))
    }

    /// PageRank with one unpersonalized retry.
    fn node_ranks(
        &self,
        graph: &ReferenceGraph,
        input: &RankInput<'_>,
        requested: &HashSet<&str>,
        diagnostics: &Diagnostics,
    ) -> Option<Vec<f64>> {
        let params = PageRankParams::from(&self.config);
        let n = graph.node_count();

        let mass = if n > 0 { self.config.personalization_mass / n as f64 } else { 0.0 };
        let personalization: Vec<f64> = graph
            .inner()
            .node_indices()
            .map(|idx| {
                let file = graph.file(idx);
                let chosen = input.focus.contains(file)
                    || (input.mentioned_files.contains(&**file) && requested.contains(&**file));
                if chosen { mass } else { 0.0 }
            })
            .collect();
        let personalized = personalization.iter().any(|w| *w > 0.0);

        let first = if personalized {
            pagerank(graph.inner(), Some(personalization.as_slice()), params)
        } else {
            pagerank(graph.inner(), None, params)
        };

        let err = match first {
            Ok(ranks) => return Some(ranks),
            Err(err) => err,
        };

        if personalized {
            tracing::debug!("{}; retrying without personalization", err);
            if let Ok(ranks) = pagerank(graph.inner(), None, params) {
                return Some(ranks);
            }
        }

        diagnostics.warn(Warning::RankingDegenerate { reason: err.to_string() });
        None
    }

    /// Spread each node's rank across its outgoing edges by weight.
    fn redistribute(&self, graph: &ReferenceGraph, ranks: &[f64]) -> BTreeMap<SymbolId, f64> {
        let inner = graph.inner();
        let mut scores: BTreeMap<SymbolId, f64> = BTreeMap::new();

        for src in inner.node_indices() {
            let total: f64 = inner.edges(src).map(|e| e.weight().weight).sum();
            if total <= 0.0 {
                continue;
            }
            let src_rank = ranks[src.index()];
            for edge in inner.edges(src) {
                let data = edge.weight();
                let key = (graph.file(edge.target()).clone(), data.ident.clone());
                *scores.entry(key).or_insert(0.0) += src_rank * data.weight / total;
            }
        }

        scores
    }

    fn expand(
        &self,
        graph: &ReferenceGraph,
        ranks: &[f64],
        scores: BTreeMap<SymbolId, f64>,
        input: &RankInput<'_>,
    ) -> RankedTagList {
        let mut definitions: BTreeMap<SymbolId, Vec<&Tag>> = BTreeMap::new();
        let mut tagged_files: HashSet<&str> = HashSet::new();
        for tag in input.tags {
            tagged_files.insert(&*tag.rel_fname);
            if tag.is_def() {
                definitions
                    .entry((tag.rel_fname.clone(), tag.name.clone()))
                    .or_default()
                    .push(tag);
            }
        }

        let mut ordered: Vec<(SymbolId, f64)> = scores.into_iter().collect();
        ordered.sort_by(|a, b| by_score_then_key(a.1, &a.0, b.1, &b.0));

        let mut ranked = Vec::new();
        for ((file, ident), score) in ordered {
            if input.focus.contains(&file) {
                continue;
            }
            let Some(defs) = definitions.get_mut(&(file, ident)) else { continue };
            defs.sort_by_key(|t| t.line);
            for tag in defs.iter() {
                ranked.push(RankedEntry::Definition(RankedTag::new(score, (*tag).clone())));
            }
        }

        // Files with no tags at all: graph nodes by their own rank first
        let untagged = |f: &&Arc<str>| !tagged_files.contains(&***f) && !input.focus.contains(*f);
        let mut listed: HashSet<&str> = HashSet::new();

        let mut by_rank: Vec<(&Arc<str>, f64)> = input
            .files
            .iter()
            .filter(untagged)
            .filter_map(|f| graph.node(f).map(|idx| (f, ranks[idx.index()])))
            .collect();
        by_rank.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        for (file, _) in by_rank {
            if listed.insert(&**file) {
                ranked.push(RankedEntry::File(file.clone()));
            }
        }

        for file in input.files.iter().filter(untagged) {
            if listed.insert(&**file) {
                ranked.push(RankedEntry::File(file.clone()));
            }
        }

        ranked
    }
}

/// Descending score, then ascending (file, identifier).
fn by_score_then_key(a_score: f64, a_key: &SymbolId, b_score: f64, b_key: &SymbolId) -> Ordering {
    b_score.total_cmp(&a_score).then_with(|| a_key.cmp(b_key))
}
