use std::collections::BTreeSet;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{GraphStore, WriteSummary};
use crate::cypher::{BatchOperation, NodeUpsert, RelationshipCreate};
use crate::error::StoreError;
use crate::model::Properties;

/// A node held by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredNode {
    /// Labels, ascending.
    pub labels: BTreeSet<String>,
    /// Current properties.
    pub props: Properties,
}

/// A relationship held by [`MemoryStore`]; endpoints index into
/// [`MemoryStore::nodes`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRelationship {
    /// Relationship type.
    pub rel_type: String,
    /// Index of the start node.
    pub start: usize,
    /// Index of the end node.
    pub end: usize,
    /// Relationship properties.
    pub props: Properties,
}

#[derive(Debug, Default)]
struct State {
    nodes: Vec<StoredNode>,
    rels: Vec<StoredRelationship>,
    bootstrap: Vec<String>,
}

/// In-process store that applies [`BatchOperation`]s with the same
/// MERGE / MATCH / CREATE semantics as the generated Cypher.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored nodes.
    pub fn node_count(&self) -> usize {
        self.state.lock().nodes.len()
    }

    /// Number of stored relationships.
    pub fn relationship_count(&self) -> usize {
        self.state.lock().rels.len()
    }

    /// Snapshot of every node, in creation order.
    pub fn nodes(&self) -> Vec<StoredNode> {
        self.state.lock().nodes.clone()
    }

    /// Snapshot of every relationship, in creation order.
    pub fn relationships(&self) -> Vec<StoredRelationship> {
        self.state.lock().rels.clone()
    }

    /// Nodes carrying `label` whose properties include every entry of `props`.
    pub fn find_nodes(&self, label: &str, props: &Properties) -> Vec<StoredNode> {
        self.state
            .lock()
            .nodes
            .iter()
            .filter(|node| node.labels.contains(label) && contains_all(&node.props, props))
            .cloned()
            .collect()
    }

    /// Statements received through [`GraphStore::bootstrap`].
    pub fn bootstrap_statements(&self) -> Vec<String> {
        self.state.lock().bootstrap.clone()
    }
}

fn contains_all(props: &Properties, expected: &Properties) -> bool {
    expected
        .iter()
        .all(|(key, value)| props.get(key) == Some(value))
}

fn predicate(keys: &[String], row: &Properties) -> Option<Properties> {
    let mut out = Properties::new();
    for key in keys {
        match row.get(key) {
            Some(Value::Null) | None => return None,
            Some(value) => {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    Some(out)
}

fn assign(target: &mut Properties, incoming: &Properties) {
    for (key, value) in incoming {
        if value.is_null() {
            target.remove(key);
        } else {
            target.insert(key.clone(), value.clone());
        }
    }
}

impl State {
    fn matching(&self, labels: &[String], props: &Properties) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| {
                labels.iter().all(|label| node.labels.contains(label))
                    && contains_all(&node.props, props)
            })
            .map(|(idx, _)| idx)
            .collect()
    }

    fn upsert(&mut self, op: &NodeUpsert) -> Result<WriteSummary, StoreError> {
        let mut created = 0u64;
        for row in &op.rows {
            let matcher = predicate(&op.match_keys, row).ok_or_else(|| {
                StoreError::Rejected(format!(
                    "cannot merge {} node with a null match property",
                    op.match_label
                ))
            })?;
            let idx = match self.matching(&op.labels, &matcher).first() {
                Some(idx) => *idx,
                None => {
                    self.nodes.push(StoredNode {
                        labels: op.labels.iter().cloned().collect(),
                        props: matcher,
                    });
                    created += 1;
                    self.nodes.len() - 1
                }
            };
            assign(&mut self.nodes[idx].props, row);
        }
        Ok(WriteSummary {
            rows: op.rows.len(),
            nodes_created: Some(created),
            relationships_created: Some(0),
        })
    }

    fn create(&mut self, op: &RelationshipCreate) -> Result<WriteSummary, StoreError> {
        let start_labels = [op.start_label.clone()];
        let end_labels = [op.end_label.clone()];
        let mut created = 0u64;
        for row in &op.rows {
            let (Some(start), Some(end)) = (
                predicate(&op.start_keys, &row.start),
                predicate(&op.end_keys, &row.end),
            ) else {
                continue;
            };
            let starts = self.matching(&start_labels, &start);
            let ends = self.matching(&end_labels, &end);
            for &s in &starts {
                for &e in &ends {
                    let mut props = Properties::new();
                    assign(&mut props, &row.props);
                    self.rels.push(StoredRelationship {
                        rel_type: op.rel_type.clone(),
                        start: s,
                        end: e,
                        props,
                    });
                    created += 1;
                }
            }
        }
        Ok(WriteSummary {
            rows: op.rows.len(),
            nodes_created: Some(0),
            relationships_created: Some(created),
        })
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn bootstrap(&self, statements: &[&str]) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        for statement in statements {
            if !state.bootstrap.iter().any(|s| s == statement) {
                state.bootstrap.push(statement.to_string());
            }
        }
        Ok(())
    }

    async fn execute(&self, operation: &BatchOperation) -> Result<WriteSummary, StoreError> {
        let mut state = self.state.lock();
        match operation {
            BatchOperation::UpsertNodes(op) => state.upsert(op),
            BatchOperation::CreateRelationships(op) => state.create(op),
        }
    }
}
