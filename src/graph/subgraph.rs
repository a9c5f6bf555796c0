use std::sync::Arc;

use crate::model::{Node, Relationship};

/// Flat collection of the nodes and relationships built from one record.
#[derive(Debug, Clone, Default)]
pub struct Subgraph {
    nodes: Vec<Arc<Node>>,
    rels: Vec<Relationship>,
}

impl Subgraph {
    /// Creates an empty subgraph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node and returns the shared handle relationships should point at.
    pub fn add_node(&mut self, node: Node) -> Arc<Node> {
        let node = Arc::new(node);
        self.nodes.push(Arc::clone(&node));
        node
    }

    /// Adds a relationship.
    pub fn add_rel(&mut self, rel: Relationship) {
        self.rels.push(rel);
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    /// Relationships in insertion order.
    pub fn rels(&self) -> &[Relationship] {
        &self.rels
    }

    /// Returns `true` if the subgraph holds nothing.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.rels.is_empty()
    }

    /// Splits the subgraph into its nodes and relationships.
    pub fn into_parts(self) -> (Vec<Arc<Node>>, Vec<Relationship>) {
        (self.nodes, self.rels)
    }
}
