//! Reference graph construction.
//!
//! Nodes are files; an edge `referencer -> definer` carries the identifier
//! that links them and a weight of `multiplier * sqrt(reference_count)`.
//! Identifiers that are defined but never referenced get a low-weight
//! self-loop on each defining file so the definition still collects rank.
//!
//! Everything is iterated through ordered maps so node indices and edge order
//! are identical for identical input.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use petgraph::graph::{DiGraph, NodeIndex};

use crate::config::RankingConfig;
use crate::error::RankError;
use crate::types::Tag;

/// Edge payload: which identifier links the two files, and how strongly.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeData {
    pub weight: f64,
    pub ident: Arc<str>,
}

/// Directed weighted multigraph over files, rebuilt per ranking request.
#[derive(Debug)]
pub struct ReferenceGraph {
    graph: DiGraph<Arc<str>, EdgeData>,
    nodes: BTreeMap<Arc<str>, NodeIndex>,
}

impl ReferenceGraph {
    /// Build the graph from a tag universe.
    ///
    /// `extra_nodes` are files that must be present even without tags (focus
    /// and mentioned files). Fails with [`RankError::ScaleLimit`] before any
    /// edge is inserted if the result would exceed the configured bounds.
    pub fn build<'a>(
        tags: &[Tag],
        extra_nodes: impl IntoIterator<Item = &'a Arc<str>>,
        mentioned_idents: &BTreeSet<String>,
        config: &RankingConfig,
    ) -> Result<Self, RankError> {
        // ident -> defining files
        let mut defines: BTreeMap<Arc<str>, BTreeSet<Arc<str>>> = BTreeMap::new();
        // ident -> referencing file -> count
        let mut references: BTreeMap<Arc<str>, BTreeMap<Arc<str>, usize>> = BTreeMap::new();
        let mut files: BTreeSet<Arc<str>> = BTreeSet::new();

        for tag in tags {
            files.insert(tag.rel_fname.clone());
            if tag.is_def() {
                defines.entry(tag.name.clone()).or_default().insert(tag.rel_fname.clone());
            } else {
                *references
                    .entry(tag.name.clone())
                    .or_default()
                    .entry(tag.rel_fname.clone())
                    .or_insert(0) += 1;
            }
        }
        files.extend(extra_nodes.into_iter().cloned());

        let planned_edges: usize = defines
            .iter()
            .map(|(ident, definers)| match references.get(ident) {
                Some(refs) => refs.len() * definers.len(),
                None => definers.len(),
            })
            .sum();

        if files.len() > config.max_graph_nodes || planned_edges > config.max_graph_edges {
            return Err(RankError::ScaleLimit { nodes: files.len(), edges: planned_edges });
        }

        let mut graph = DiGraph::with_capacity(files.len(), planned_edges);
        let mut nodes = BTreeMap::new();
        for file in files {
            let idx = graph.add_node(file.clone());
            nodes.insert(file, idx);
        }

        for (ident, definers) in &defines {
            let def_nodes: Vec<NodeIndex> = definers.iter().filter_map(|f| nodes.get(f).copied()).collect();

            let Some(refs) = references.get(ident) else {
                for &def_node in &def_nodes {
                    graph.add_edge(
                        def_node,
                        def_node,
                        EdgeData { weight: config.self_loop_weight, ident: ident.clone() },
                    );
                }
                continue;
            };

            let multiplier = edge_multiplier(ident, mentioned_idents, config);
            for (referencer, &count) in refs {
                let Some(&ref_node) = nodes.get(referencer) else { continue };
                let weight = multiplier * (count as f64).sqrt();
                for &def_node in &def_nodes {
                    graph.add_edge(ref_node, def_node, EdgeData { weight, ident: ident.clone() });
                }
            }
        }

        tracing::debug!(
            "reference graph: {} nodes, {} edges",
            graph.node_count(),
            graph.edge_count()
        );

        Ok(Self { graph, nodes })
    }

    pub fn inner(&self) -> &DiGraph<Arc<str>, EdgeData> {
        &self.graph
    }

    pub fn node(&self, rel_fname: &str) -> Option<NodeIndex> {
        self.nodes.get(rel_fname).copied()
    }

    /// File name of a node.
    pub fn file(&self, idx: NodeIndex) -> &Arc<str> {
        &self.graph[idx]
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

/// Mentioned identifiers are amplified; `_private` ones are damped.
fn edge_multiplier(ident: &str, mentioned_idents: &BTreeSet<String>, config: &RankingConfig) -> f64 {
    if mentioned_idents.contains(ident) {
        config.mention_multiplier
    } else if ident.starts_with('_') {
        config.private_multiplier
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TagKind;
    use petgraph::visit::EdgeRef;

    fn def(file: &str, name: &str) -> Tag {
        Tag::new(file, format!("/repo/{}", file), Some(0), name, TagKind::Def)
    }

    fn reference(file: &str, name: &str) -> Tag {
        Tag::new(file, format!("/repo/{}", file), Some(3), name, TagKind::Ref)
    }

    fn edges(graph: &ReferenceGraph) -> Vec<(String, String, String, f64)> {
        graph
            .inner()
            .edge_references()
            .map(|e| {
                (
                    graph.file(e.source()).to_string(),
                    graph.file(e.target()).to_string(),
                    e.weight().ident.to_string(),
                    e.weight().weight,
                )
            })
            .collect()
    }

    #[test]
    fn test_unreferenced_definition_gets_self_loop() {
        let tags = vec![def("a.py", "foo")];
        let graph = ReferenceGraph::build(&tags, [], &BTreeSet::new(), &RankingConfig::default()).unwrap();
        assert_eq!(edges(&graph), vec![("a.py".into(), "a.py".into(), "foo".into(), 0.1)]);
    }

    #[test]
    fn test_edge_weight_is_sqrt_of_reference_count() {
        let tags = vec![
            def("a.py", "foo"),
            reference("b.py", "foo"),
            reference("b.py", "foo"),
            reference("b.py", "foo"),
            reference("b.py", "foo"),
        ];
        let graph = ReferenceGraph::build(&tags, [], &BTreeSet::new(), &RankingConfig::default()).unwrap();
        assert_eq!(edges(&graph), vec![("b.py".into(), "a.py".into(), "foo".into(), 2.0)]);
    }

    #[test]
    fn test_multipliers() {
        let tags = vec![
            def("a.py", "hot"),
            def("a.py", "_hidden"),
            reference("b.py", "hot"),
            reference("b.py", "_hidden"),
        ];
        let mentioned: BTreeSet<String> = ["hot".to_string()].into();
        let graph = ReferenceGraph::build(&tags, [], &mentioned, &RankingConfig::default()).unwrap();

        let weights: BTreeMap<String, f64> = edges(&graph).into_iter().map(|(_, _, i, w)| (i, w)).collect();
        assert_eq!(weights["hot"], 10.0);
        assert!((weights["_hidden"] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_one_edge_per_definer() {
        let tags = vec![def("a.py", "run"), def("c.py", "run"), reference("b.py", "run")];
        let graph = ReferenceGraph::build(&tags, [], &BTreeSet::new(), &RankingConfig::default()).unwrap();
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.node_count(), 3);
    }

    #[test]
    fn test_extra_nodes_are_added() {
        let extra: Arc<str> = Arc::from("focus.py");
        let graph = ReferenceGraph::build(&[], [&extra], &BTreeSet::new(), &RankingConfig::default()).unwrap();
        assert!(graph.node("focus.py").is_some());
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_scale_limit() {
        let tags = vec![def("a.py", "foo"), reference("b.py", "foo"), reference("c.py", "foo")];
        let config = RankingConfig { max_graph_edges: 1, ..Default::default() };
        let err = ReferenceGraph::build(&tags, [], &BTreeSet::new(), &config).unwrap_err();
        assert_eq!(err, RankError::ScaleLimit { nodes: 3, edges: 2 });
    }
}
