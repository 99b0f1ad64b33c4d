//! Weighted personalized PageRank by power iteration.
//!
//! ```text
//! PR(v) = (1-α)·p[v] + α·Σ PR(u)·w(u,v)/W(u) + α·D·p[v]
//! ```
//!
//! where `W(u)` is the total outgoing weight of `u`, `D` is the rank mass
//! sitting on dangling nodes (no outgoing weight) and `p` is the normalized
//! personalization vector. `p` doubles as the dangling redistribution vector;
//! without one, both are uniform.
//!
//! Converges when the L1 change between iterations drops below
//! `node_count * tolerance`.

use petgraph::graph::DiGraph;
use petgraph::visit::EdgeRef;

use crate::config::RankingConfig;
use crate::error::RankError;
use crate::ranking::graph::EdgeData;

/// Power-iteration parameters.
#[derive(Debug, Clone, Copy)]
pub struct PageRankParams {
    /// Damping factor
    pub alpha: f64,
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl From<&RankingConfig> for PageRankParams {
    fn from(config: &RankingConfig) -> Self {
        Self {
            alpha: config.pagerank_alpha,
            tolerance: config.pagerank_tolerance,
            max_iterations: config.pagerank_max_iterations,
        }
    }
}

/// Compute stationary rank per node, indexed by `NodeIndex::index()`.
///
/// `personalization` must have one entry per node when given. Fails with
/// [`RankError::Degenerate`] on an empty graph, a personalization vector that
/// can't be normalized, or a power iteration that never settles.
pub fn pagerank<N>(
    graph: &DiGraph<N, EdgeData>,
    personalization: Option<&[f64]>,
    params: PageRankParams,
) -> Result<Vec<f64>, RankError> {
    let n = graph.node_count();
    if n == 0 {
        return Err(RankError::Degenerate("empty reference graph".into()));
    }

    let p: Vec<f64> = match personalization {
        Some(weights) => {
            if weights.len() != n {
                return Err(RankError::Degenerate(format!(
                    "personalization has {} entries for {} nodes",
                    weights.len(),
                    n
                )));
            }
            let total: f64 = weights.iter().sum();
            if !total.is_finite() || total <= 0.0 || weights.iter().any(|w| *w < 0.0) {
                return Err(RankError::Degenerate(format!(
                    "personalization cannot be normalized (sum {})",
                    total
                )));
            }
            weights.iter().map(|w| w / total).collect()
        }
        None => vec![1.0 / n as f64; n],
    };

    // Total outgoing weight per node
    let mut out_weight = vec![0.0_f64; n];
    for edge in graph.edge_references() {
        out_weight[edge.source().index()] += edge.weight().weight;
    }

    let alpha = params.alpha;
    let mut ranks = vec![1.0 / n as f64; n];
    let mut next = vec![0.0_f64; n];

    for _iteration in 0..params.max_iterations {
        let dangling_sum: f64 = ranks
            .iter()
            .zip(&out_weight)
            .filter(|(_, w)| **w <= 0.0)
            .map(|(r, _)| *r)
            .sum();

        for (v, slot) in next.iter_mut().enumerate() {
            *slot = (1.0 - alpha) * p[v] + alpha * dangling_sum * p[v];
        }

        for edge in graph.edge_references() {
            let u = edge.source().index();
            if out_weight[u] > 0.0 {
                next[edge.target().index()] += alpha * ranks[u] * edge.weight().weight / out_weight[u];
            }
        }

        let change: f64 = next.iter().zip(&ranks).map(|(a, b)| (a - b).abs()).sum();
        std::mem::swap(&mut ranks, &mut next);

        if !change.is_finite() {
            return Err(RankError::Degenerate("rank mass became non-finite".into()));
        }
        if change < n as f64 * params.tolerance {
            return Ok(ranks);
        }
    }

    Err(RankError::Degenerate(format!(
        "power iteration did not converge in {} iterations",
        params.max_iterations
    )))
}
