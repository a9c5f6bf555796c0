//! Grouping of nodes and relationships into structurally uniform buckets.
//!
//! Every bucket becomes exactly one bulk statement at flush time, so all
//! entities in a bucket must share a label combination (nodes) or a
//! `(type, start label, end label)` signature (relationships).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{EntityError, ImportError};
use crate::graph::Subgraph;
use crate::model::{Node, Relationship};
use crate::schema::MatchKeysProvider;

/// Bucket signature for nodes: the match label plus the full sorted label set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeGroupKey {
    match_label: String,
    labels: Vec<String>,
}

impl NodeGroupKey {
    /// Builds a key, sorting and deduplicating `labels`.
    pub fn new(match_label: impl Into<String>, mut labels: Vec<String>) -> Self {
        labels.sort();
        labels.dedup();
        Self {
            match_label: match_label.into(),
            labels,
        }
    }

    /// Resolves the key for `node`.
    pub fn for_node<P>(node: &Node, registry: &P) -> Result<Self, EntityError>
    where
        P: MatchKeysProvider + ?Sized,
    {
        let match_label = node.match_label(registry)?;
        Ok(Self::new(match_label, node.labels().to_vec()))
    }

    /// Label used for matching in the store.
    pub fn match_label(&self) -> &str {
        &self.match_label
    }

    /// All labels of the bucket's nodes, ascending.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

impl fmt::Display for NodeGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.match_label, self.labels.join(","))
    }
}

impl FromStr for NodeGroupKey {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ImportError::InvalidGroupKey(s.to_string());
        let mut parts = s.split(':');
        let (Some(match_label), Some(labels), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        let labels: Vec<String> = labels.split(',').map(str::to_string).collect();
        if match_label.is_empty() || labels.iter().any(String::is_empty) {
            return Err(invalid());
        }
        Ok(Self::new(match_label, labels))
    }
}

/// Bucket signature for relationships.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelGroupKey {
    rel_type: String,
    start_label: String,
    end_label: String,
}

impl RelGroupKey {
    /// Builds a key from its parts.
    pub fn new(
        rel_type: impl Into<String>,
        start_label: impl Into<String>,
        end_label: impl Into<String>,
    ) -> Self {
        Self {
            rel_type: rel_type.into(),
            start_label: start_label.into(),
            end_label: end_label.into(),
        }
    }

    /// Resolves the key for `rel`.
    ///
    /// Endpoint match labels are resolved independently of the labels the
    /// relationship type declares.
    pub fn for_rel<P>(rel: &Relationship, registry: &P) -> Result<Self, EntityError>
    where
        P: MatchKeysProvider + ?Sized,
    {
        let start_label = rel.start().match_label(registry)?;
        let end_label = rel.end().match_label(registry)?;
        Ok(Self::new(rel.rel_type(), start_label, end_label))
    }

    /// Relationship type.
    pub fn rel_type(&self) -> &str {
        &self.rel_type
    }

    /// Match label of the start node.
    pub fn start_label(&self) -> &str {
        &self.start_label
    }

    /// Match label of the end node.
    pub fn end_label(&self) -> &str {
        &self.end_label
    }
}

impl fmt::Display for RelGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.rel_type, self.start_label, self.end_label)
    }
}

impl FromStr for RelGroupKey {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').collect();
        match parts.as_slice() {
            [rel_type, start, end] if !rel_type.is_empty() && !start.is_empty() && !end.is_empty() => {
                Ok(Self::new(*rel_type, *start, *end))
            }
            _ => Err(ImportError::InvalidGroupKey(s.to_string())),
        }
    }
}

/// Accumulates entities into buckets until the next flush.
pub struct StructuredSubgraph {
    nodes: BTreeMap<NodeGroupKey, Vec<Arc<Node>>>,
    rels: BTreeMap<RelGroupKey, Vec<Relationship>>,
    registry: Arc<dyn MatchKeysProvider>,
}

impl StructuredSubgraph {
    /// Creates an empty accumulator grouping by `registry`.
    pub fn new(registry: Arc<dyn MatchKeysProvider>) -> Self {
        Self {
            nodes: BTreeMap::new(),
            rels: BTreeMap::new(),
            registry,
        }
    }

    /// The registry used for grouping.
    pub fn registry(&self) -> &Arc<dyn MatchKeysProvider> {
        &self.registry
    }

    /// Buckets a node. The node is not added if it cannot be matched.
    pub fn add_node(&mut self, node: Arc<Node>) -> Result<(), EntityError> {
        let key = NodeGroupKey::for_node(&node, self.registry.as_ref())?;
        self.nodes.entry(key).or_default().push(node);
        Ok(())
    }

    /// Buckets a relationship. It is not added if either endpoint cannot be
    /// matched.
    pub fn add_rel(&mut self, rel: Relationship) -> Result<(), EntityError> {
        let key = RelGroupKey::for_rel(&rel, self.registry.as_ref())?;
        self.rels.entry(key).or_default().push(rel);
        Ok(())
    }

    /// Buckets every entity of `subgraph`, or none of them.
    ///
    /// All keys are resolved before anything is inserted, so a rejected
    /// subgraph leaves the accumulator untouched.
    pub fn merge(&mut self, subgraph: Subgraph) -> Result<(), EntityError> {
        let (nodes, rels) = subgraph.into_parts();
        let registry = self.registry.as_ref();

        let node_keys = nodes
            .iter()
            .map(|node| NodeGroupKey::for_node(node, registry))
            .collect::<Result<Vec<_>, _>>()?;
        let rel_keys = rels
            .iter()
            .map(|rel| RelGroupKey::for_rel(rel, registry))
            .collect::<Result<Vec<_>, _>>()?;

        for (key, node) in node_keys.into_iter().zip(nodes) {
            self.nodes.entry(key).or_default().push(node);
        }
        for (key, rel) in rel_keys.into_iter().zip(rels) {
            self.rels.entry(key).or_default().push(rel);
        }
        Ok(())
    }

    /// Total nodes across all buckets.
    pub fn node_count(&self) -> usize {
        self.nodes.values().map(Vec::len).sum()
    }

    /// Total relationships across all buckets.
    pub fn rel_count(&self) -> usize {
        self.rels.values().map(Vec::len).sum()
    }

    /// Returns `true` if no entity has been added.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.rels.is_empty()
    }

    /// Node bucket keys in ascending order.
    pub fn node_keys(&self) -> Vec<NodeGroupKey> {
        self.nodes.keys().cloned().collect()
    }

    /// Relationship bucket keys in ascending order.
    pub fn rel_keys(&self) -> Vec<RelGroupKey> {
        self.rels.keys().cloned().collect()
    }

    /// Nodes in the bucket `key`; empty if there is no such bucket.
    pub fn nodes(&self, key: &NodeGroupKey) -> &[Arc<Node>] {
        self.nodes.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Relationships in the bucket `key`; empty if there is no such bucket.
    pub fn rels(&self, key: &RelGroupKey) -> &[Relationship] {
        self.rels.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Iterates node buckets in key order.
    pub fn node_groups(&self) -> impl Iterator<Item = (&NodeGroupKey, &[Arc<Node>])> {
        self.nodes.iter().map(|(key, nodes)| (key, nodes.as_slice()))
    }

    /// Iterates relationship buckets in key order.
    pub fn rel_groups(&self) -> impl Iterator<Item = (&RelGroupKey, &[Relationship])> {
        self.rels.iter().map(|(key, rels)| (key, rels.as_slice()))
    }
}

impl fmt::Debug for StructuredSubgraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructuredSubgraph")
            .field("node_buckets", &self.nodes.len())
            .field("rel_buckets", &self.rels.len())
            .field("nodes", &self.node_count())
            .field("rels", &self.rel_count())
            .finish()
    }
}
