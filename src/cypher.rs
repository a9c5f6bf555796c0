//! Bulk Cypher statements generated from accumulator buckets.
//!
//! Each bucket turns into one statement that unwinds a single list parameter.
//! Labels and relationship types are written into the statement text as
//! quoted identifiers; property values only ever travel as parameters.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::{ImportError, Result};
use crate::graph::{NodeGroupKey, RelGroupKey, StructuredSubgraph};
use crate::model::{Node, Properties, Relationship};
use crate::schema::MatchKeysProvider;

/// Parameter holding the node rows of an upsert.
pub const NODES_PARAM: &str = "nodes";
/// Parameter holding the relationship rows of a create.
pub const RELS_PARAM: &str = "rels";

/// Backtick-quotes an identifier, doubling embedded backticks.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// `:`Label`` for a single label or relationship type.
pub fn cypher_label(label: &str) -> String {
    format!(":{}", quote_identifier(label))
}

/// Concatenated label list, e.g. ``:`Event`:`Tag` ``.
pub fn cypher_labels(labels: &[String]) -> String {
    labels.iter().map(|label| cypher_label(label)).collect()
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn property_key(key: &str) -> String {
    if is_plain_identifier(key) {
        key.to_string()
    } else {
        quote_identifier(key)
    }
}

/// Map-literal body matching `keys` against fields of `source`, e.g.
/// `name: node.name, value: node.value`.
pub fn cypher_props(keys: &[String], source: &str) -> String {
    keys.iter()
        .map(|key| {
            let key = property_key(key);
            format!("{key}: {source}.{key}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Merge-then-overwrite of one node bucket.
#[derive(Debug, Clone)]
pub struct NodeUpsert {
    /// Full label set written on every node, ascending.
    pub labels: Vec<String>,
    /// Label whose keys form the merge predicate.
    pub match_label: String,
    /// Keys of `match_label`.
    pub match_keys: Vec<String>,
    /// One property map per node.
    pub rows: Vec<Properties>,
}

/// One relationship row: endpoint properties used for matching plus the
/// relationship's own properties.
#[derive(Debug, Clone)]
pub struct RelRow {
    /// Properties of the start node.
    pub start: Properties,
    /// Properties of the end node.
    pub end: Properties,
    /// Properties set on the new relationship.
    pub props: Properties,
}

/// Match-endpoints-then-create of one relationship bucket.
#[derive(Debug, Clone)]
pub struct RelationshipCreate {
    /// Relationship type.
    pub rel_type: String,
    /// Match label of the start node.
    pub start_label: String,
    /// Keys of `start_label`.
    pub start_keys: Vec<String>,
    /// Match label of the end node.
    pub end_label: String,
    /// Keys of `end_label`.
    pub end_keys: Vec<String>,
    /// One row per relationship.
    pub rows: Vec<RelRow>,
}

/// A single bulk write against the store.
#[derive(Debug, Clone)]
pub enum BatchOperation {
    /// Idempotent node upsert.
    UpsertNodes(NodeUpsert),
    /// Non-idempotent relationship creation.
    CreateRelationships(RelationshipCreate),
}

impl BatchOperation {
    /// Statement text.
    pub fn cypher(&self) -> String {
        match self {
            BatchOperation::UpsertNodes(op) => format!(
                "UNWIND ${NODES_PARAM} AS node\nMERGE (n{} {{ {} }})\nSET n += node",
                cypher_labels(&op.labels),
                cypher_props(&op.match_keys, "node"),
            ),
            BatchOperation::CreateRelationships(op) => format!(
                "UNWIND ${RELS_PARAM} AS rel\n\
                 MATCH (start{} {{ {} }})\n\
                 MATCH (end{} {{ {} }})\n\
                 CREATE (start)-[r{}]->(end)\n\
                 SET r += rel.props",
                cypher_label(&op.start_label),
                cypher_props(&op.start_keys, "rel.start"),
                cypher_label(&op.end_label),
                cypher_props(&op.end_keys, "rel.end"),
                cypher_label(&op.rel_type),
            ),
        }
    }

    /// Whether running the statement twice leaves the graph as running it once.
    pub fn is_idempotent(&self) -> bool {
        matches!(self, BatchOperation::UpsertNodes(_))
    }

    /// Name of the list parameter the statement unwinds.
    pub fn param_name(&self) -> &'static str {
        match self {
            BatchOperation::UpsertNodes(_) => NODES_PARAM,
            BatchOperation::CreateRelationships(_) => RELS_PARAM,
        }
    }

    /// The batch as a JSON list, bound to [`BatchOperation::param_name`].
    pub fn parameter(&self) -> Value {
        match self {
            BatchOperation::UpsertNodes(op) => {
                Value::Array(op.rows.iter().cloned().map(Value::Object).collect())
            }
            BatchOperation::CreateRelationships(op) => Value::Array(
                op.rows
                    .iter()
                    .map(|row| {
                        let mut map = Properties::new();
                        map.insert("props".into(), Value::Object(row.props.clone()));
                        map.insert("start".into(), Value::Object(row.start.clone()));
                        map.insert("end".into(), Value::Object(row.end.clone()));
                        Value::Object(map)
                    })
                    .collect(),
            ),
        }
    }

    /// Number of rows in the batch.
    pub fn len(&self) -> usize {
        match self {
            BatchOperation::UpsertNodes(op) => op.rows.len(),
            BatchOperation::CreateRelationships(op) => op.rows.len(),
        }
    }

    /// Returns `true` if the batch has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for BatchOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchOperation::UpsertNodes(op) => {
                write!(f, "merge {} ({})", op.labels.join(":"), op.rows.len())
            }
            BatchOperation::CreateRelationships(op) => write!(
                f,
                "create ({})-[{}]->({}) ({})",
                op.start_label,
                op.rel_type,
                op.end_label,
                op.rows.len()
            ),
        }
    }
}

fn registered_keys<P>(registry: &P, label: &str) -> Result<Vec<String>>
where
    P: MatchKeysProvider + ?Sized,
{
    registry
        .keys(label)
        .map(<[String]>::to_vec)
        .ok_or_else(|| ImportError::UnknownMatchLabel(label.to_string()))
}

/// Builds the upsert for one node bucket.
pub fn node_operation<P>(
    key: &NodeGroupKey,
    nodes: &[Arc<Node>],
    registry: &P,
) -> Result<BatchOperation>
where
    P: MatchKeysProvider + ?Sized,
{
    let match_keys = registered_keys(registry, key.match_label())?;
    Ok(BatchOperation::UpsertNodes(NodeUpsert {
        labels: key.labels().to_vec(),
        match_label: key.match_label().to_string(),
        match_keys,
        rows: nodes.iter().map(|node| node.props().clone()).collect(),
    }))
}

/// Builds the create for one relationship bucket.
pub fn rel_operation<P>(
    key: &RelGroupKey,
    rels: &[Relationship],
    registry: &P,
) -> Result<BatchOperation>
where
    P: MatchKeysProvider + ?Sized,
{
    let start_keys = registered_keys(registry, key.start_label())?;
    let end_keys = registered_keys(registry, key.end_label())?;
    Ok(BatchOperation::CreateRelationships(RelationshipCreate {
        rel_type: key.rel_type().to_string(),
        start_label: key.start_label().to_string(),
        start_keys,
        end_label: key.end_label().to_string(),
        end_keys,
        rows: rels
            .iter()
            .map(|rel| RelRow {
                start: rel.start().props().clone(),
                end: rel.end().props().clone(),
                props: rel.props().clone(),
            })
            .collect(),
    }))
}

/// Every operation needed to flush `batch`: node buckets first, then
/// relationship buckets, each in key order.
pub fn flush_plan(batch: &StructuredSubgraph) -> Result<Vec<BatchOperation>> {
    let registry = batch.registry().as_ref();
    let mut plan = Vec::new();
    for (key, nodes) in batch.node_groups() {
        let op = node_operation(key, nodes, registry)?;
        debug!(bucket = %key, query = %op.cypher(), "generated node upsert");
        plan.push(op);
    }
    for (key, rels) in batch.rel_groups() {
        let op = rel_operation(key, rels, registry)?;
        debug!(bucket = %key, query = %op.cypher(), "generated relationship create");
        plan.push(op);
    }
    Ok(plan)
}
