use drift_protocol::SpecChunk;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, HashMap};

/// Identifiers mentioned by more clauses than this are too generic to link on
const MAX_IDENTIFIER_FANOUT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseLink {
    /// Both clauses mention the same identifier
    SharedIdentifier,
    /// Consecutive chunks of the same section
    Adjacent,
}

/// Cross-reference graph over the clauses of one retrieval run
#[derive(Debug, Default)]
pub struct ClauseGraph {
    graph: UnGraph<String, ClauseLink>,
    nodes: HashMap<String, NodeIndex>,
}

impl ClauseGraph {
    pub fn build<'a>(chunks: impl IntoIterator<Item = &'a SpecChunk>) -> Self {
        let mut this = Self::default();
        let mut by_ident: BTreeMap<&str, Vec<NodeIndex>> = BTreeMap::new();
        let mut by_section: BTreeMap<(&str, &str, Vec<String>), Vec<(usize, NodeIndex)>> =
            BTreeMap::new();

        for chunk in chunks {
            let node = this.graph.add_node(chunk.id.clone());
            this.nodes.insert(chunk.id.clone(), node);
            for ident in chunk.topic_tags.iter().filter(|t| t.starts_with("ident:")) {
                by_ident.entry(ident.as_str()).or_default().push(node);
            }
            by_section
                .entry((
                    chunk.document_id.as_str(),
                    chunk.fork_version.as_str(),
                    chunk.section.clone(),
                ))
                .or_default()
                .push((chunk.ordinal, node));
        }

        for nodes in by_ident.values() {
            if nodes.len() > MAX_IDENTIFIER_FANOUT {
                continue;
            }
            for (i, &a) in nodes.iter().enumerate() {
                for &b in &nodes[i + 1..] {
                    this.graph.update_edge(a, b, ClauseLink::SharedIdentifier);
                }
            }
        }
        for members in by_section.values_mut() {
            members.sort_by_key(|(ordinal, _)| *ordinal);
            for pair in members.windows(2) {
                let (a, b) = (pair[0].1, pair[1].1);
                if this.graph.find_edge(a, b).is_none() {
                    this.graph.add_edge(a, b, ClauseLink::Adjacent);
                }
            }
        }
        this
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Linked chunks, sorted by id
    pub fn neighbors(&self, chunk_id: &str) -> Vec<(&str, ClauseLink)> {
        let Some(&node) = self.nodes.get(chunk_id) else {
            return Vec::new();
        };
        let mut out: Vec<(&str, ClauseLink)> = self
            .graph
            .edges(node)
            .map(|edge| {
                let other = if edge.source() == node {
                    edge.target()
                } else {
                    edge.source()
                };
                (self.graph[other].as_str(), *edge.weight())
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(b.0));
        out.dedup_by(|a, b| a.0 == b.0);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_protocol::{Fork, TextSpan};
    use pretty_assertions::assert_eq;

    fn chunk(id: &str, ordinal: usize, section: &str, tags: &[&str]) -> SpecChunk {
        SpecChunk {
            id: id.into(),
            document_id: "eip".into(),
            fork_version: Fork::new("cancun"),
            text: id.into(),
            span: TextSpan::new(0, 1),
            topic_tags: tags.iter().map(|t| t.to_string()).collect(),
            forced_split: false,
            section: vec![section.to_string()],
            ordinal,
        }
    }

    #[test]
    fn links_shared_identifiers_and_neighbours() {
        let chunks = vec![
            chunk("a", 0, "params", &["ident:MAX_BLOBS"]),
            chunk("b", 1, "params", &[]),
            chunk("c", 2, "validation", &["ident:MAX_BLOBS"]),
        ];
        let graph = ClauseGraph::build(&chunks);
        assert_eq!(graph.node_count(), 3);
        assert_eq!(
            graph.neighbors("a"),
            vec![("b", ClauseLink::Adjacent), ("c", ClauseLink::SharedIdentifier)]
        );
        assert_eq!(graph.neighbors("c"), vec![("a", ClauseLink::SharedIdentifier)]);
        assert!(graph.neighbors("missing").is_empty());
    }
}
