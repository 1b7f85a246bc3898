//! Parent/child graph over the spans of one trace
//!
//! Every span has at most one parent, so the resolved graph is a forest
//! plus (for malformed input) parent cycles. Depths are computed once per
//! [`DiGraph::refresh_edges`] with an explicit stack and a visited set, so
//! cycles can never recurse.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::span::StandardSpan;

/// A span with its distance from the root of its tree
#[derive(Debug, Clone, Copy)]
pub struct NodeDepth<'a> {
    pub span: &'a StandardSpan,
    pub depth: usize,
}

#[derive(Debug, Default, Clone)]
pub struct DiGraph {
    nodes: Vec<Arc<StandardSpan>>,
    /// span id -> first node index carrying it
    index: FxHashMap<String, usize>,
    children: Vec<Vec<usize>>,
    /// (node index, depth) in traversal order
    depths: Vec<(usize, usize)>,
}

impl DiGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, span: Arc<StandardSpan>) {
        let idx = self.nodes.len();
        self.index.entry(span.span_id.clone()).or_insert(idx);
        self.nodes.push(span);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains_span(&self, span_id: &str) -> bool {
        self.index.contains_key(span_id)
    }

    pub fn spans(&self) -> &[Arc<StandardSpan>] {
        &self.nodes
    }

    /// Rebuild adjacency and depths from the parent links. Idempotent.
    ///
    /// A parent id that is empty, unknown or the span itself makes the span a root.
    pub fn refresh_edges(&mut self) {
        let n = self.nodes.len();
        self.children = vec![Vec::new(); n];
        let mut roots = Vec::new();

        for (idx, span) in self.nodes.iter().enumerate() {
            let parent = if span.parent_span_id.is_empty() {
                None
            } else {
                self.index
                    .get(&span.parent_span_id)
                    .copied()
                    .filter(|&p| p != idx)
            };
            match parent {
                Some(p) => self.children[p].push(idx),
                None => roots.push(idx),
            }
        }

        let mut visited = vec![false; n];
        let mut depths = Vec::with_capacity(n);
        for &root in &roots {
            self.walk(root, &mut visited, &mut depths);
        }
        // Nodes only reachable through a parent cycle
        for idx in 0..n {
            if !visited[idx] {
                self.walk(idx, &mut visited, &mut depths);
            }
        }
        self.depths = depths;
    }

    fn walk(&self, start: usize, visited: &mut [bool], out: &mut Vec<(usize, usize)>) {
        let mut stack = vec![(start, 0usize)];
        while let Some((idx, depth)) = stack.pop() {
            if visited[idx] {
                continue;
            }
            visited[idx] = true;
            out.push((idx, depth));
            // Reverse so children are visited in insertion order
            for &child in self.children[idx].iter().rev() {
                if !visited[child] {
                    stack.push((child, depth + 1));
                }
            }
        }
    }

    /// Every node with its depth, roots first in insertion order
    pub fn node_depths(&self) -> Vec<NodeDepth<'_>> {
        self.depths
            .iter()
            .map(|&(idx, depth)| NodeDepth {
                span: &self.nodes[idx],
                depth,
            })
            .collect()
    }

    /// Longest root-to-leaf path in edges; 0 for a single node
    pub fn longest_path(&self) -> usize {
        self.depths.iter().map(|&(_, d)| d).max().unwrap_or(0)
    }

    /// All resolved (parent, child) edges
    pub fn find_parent_child_pairs(&self) -> Vec<(&StandardSpan, &StandardSpan)> {
        self.children
            .iter()
            .enumerate()
            .flat_map(|(parent, kids)| {
                kids.iter()
                    .map(move |&child| (&*self.nodes[parent], &*self.nodes[child]))
            })
            .collect()
    }

    /// Direct caller -> callee edges, plus caller/callee spans that take part in none
    pub fn find_call_pairs_and_alone(
        &self,
    ) -> (Vec<(&StandardSpan, &StandardSpan)>, Vec<&StandardSpan>) {
        let mut paired = vec![false; self.nodes.len()];
        let mut pairs = Vec::new();

        for (parent, kids) in self.children.iter().enumerate() {
            if !self.nodes[parent].kind.is_caller() {
                continue;
            }
            for &child in kids {
                if self.nodes[child].kind.is_called() {
                    paired[parent] = true;
                    paired[child] = true;
                    pairs.push((&*self.nodes[parent], &*self.nodes[child]));
                }
            }
        }

        let alone = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(idx, span)| {
                !paired[*idx] && (span.kind.is_caller() || span.kind.is_called())
            })
            .map(|(_, span)| &**span)
            .collect();

        (pairs, alone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::traces::span::{SpanKind, test_span};

    fn graph_of(spans: Vec<StandardSpan>) -> DiGraph {
        let mut graph = DiGraph::new();
        for span in spans {
            graph.add_node(Arc::new(span));
        }
        graph.refresh_edges();
        graph
    }

    fn depth_of(graph: &DiGraph, span_id: &str) -> usize {
        graph
            .node_depths()
            .iter()
            .find(|n| n.span.span_id == span_id)
            .map(|n| n.depth)
            .unwrap()
    }

    #[test]
    fn test_single_node() {
        let graph = graph_of(vec![test_span("a", "", SpanKind::Producer)]);
        assert_eq!(graph.longest_path(), 0);
        assert_eq!(graph.node_depths().len(), 1);
        assert!(graph.find_parent_child_pairs().is_empty());
    }

    #[test]
    fn test_chain_depths() {
        let graph = graph_of(vec![
            test_span("c", "b", SpanKind::Interval),
            test_span("a", "", SpanKind::Producer),
            test_span("b", "a", SpanKind::Consumer),
        ]);
        assert_eq!(graph.longest_path(), 2);
        assert_eq!(depth_of(&graph, "a"), 0);
        assert_eq!(depth_of(&graph, "b"), 1);
        assert_eq!(depth_of(&graph, "c"), 2);
        assert_eq!(graph.node_depths()[0].span.span_id, "a");
    }

    #[test]
    fn test_unresolved_parent_is_root() {
        let graph = graph_of(vec![
            test_span("a", "missing", SpanKind::Server),
            test_span("b", "a", SpanKind::Client),
        ]);
        assert_eq!(depth_of(&graph, "a"), 0);
        assert_eq!(depth_of(&graph, "b"), 1);
    }

    #[test]
    fn test_self_parent_is_root() {
        let graph = graph_of(vec![test_span("a", "a", SpanKind::Server)]);
        assert_eq!(depth_of(&graph, "a"), 0);
    }

    #[test]
    fn test_cycle_terminates() {
        let graph = graph_of(vec![
            test_span("a", "b", SpanKind::Server),
            test_span("b", "a", SpanKind::Client),
            test_span("r", "", SpanKind::Server),
        ]);
        let depths = graph.node_depths();
        assert_eq!(depths.len(), 3);
        assert_eq!(depths[0].span.span_id, "r");
        assert_eq!(depth_of(&graph, "a"), 0);
        assert_eq!(depth_of(&graph, "b"), 1);
        assert_eq!(graph.longest_path(), 1);
    }

    #[test]
    fn test_refresh_is_idempotent() {
        let mut graph = graph_of(vec![
            test_span("a", "", SpanKind::Server),
            test_span("b", "a", SpanKind::Client),
            test_span("c", "a", SpanKind::Client),
            test_span("d", "c", SpanKind::Server),
        ]);
        let first: Vec<_> = graph
            .node_depths()
            .iter()
            .map(|n| (n.span.span_id.clone(), n.depth))
            .collect();
        graph.refresh_edges();
        let second: Vec<_> = graph
            .node_depths()
            .iter()
            .map(|n| (n.span.span_id.clone(), n.depth))
            .collect();
        assert_eq!(first, second);
        assert_eq!(graph.longest_path(), 2);
    }

    #[test]
    fn test_add_after_refresh_needs_refresh() {
        let mut graph = graph_of(vec![test_span("a", "", SpanKind::Server)]);
        graph.add_node(Arc::new(test_span("b", "a", SpanKind::Client)));
        assert!(graph.contains_span("b"));
        graph.refresh_edges();
        assert_eq!(graph.longest_path(), 1);
    }

    #[test]
    fn test_call_pairs_and_alone() {
        let graph = graph_of(vec![
            test_span("root", "", SpanKind::Server),
            test_span("client", "root", SpanKind::Client),
            test_span("server", "client", SpanKind::Server),
            test_span("producer", "server", SpanKind::Producer),
            test_span("internal", "server", SpanKind::Interval),
        ]);
        let (pairs, alone) = graph.find_call_pairs_and_alone();

        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0.span_id, "client");
        assert_eq!(pairs[0].1.span_id, "server");

        let mut alone_ids: Vec<_> = alone.iter().map(|s| s.span_id.as_str()).collect();
        alone_ids.sort_unstable();
        assert_eq!(alone_ids, vec!["producer", "root"]);

        assert_eq!(graph.find_parent_child_pairs().len(), 4);
    }
}
