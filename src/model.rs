//! Node and relationship payloads written to the graph store.
//!
//! Entities here are write-only: they are never compared or read back, only
//! resolved to their match key and grouped for bulk writes.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{EndpointRole, EntityError};
use crate::schema::MatchKeysProvider;
use crate::set::Set;

/// Property map carried by nodes and relationships.
pub type Properties = Map<String, Value>;

/// A labeled node with properties.
#[derive(Debug, Clone)]
pub struct Node {
    labels: Set<String>,
    props: Properties,
}

impl Node {
    /// Creates a node with a single label.
    pub fn new(label: impl Into<String>, props: Properties) -> Self {
        let mut labels = Set::new();
        labels.add(label.into());
        Self { labels, props }
    }

    /// Creates a node with several labels. Fails if `labels` is empty.
    pub fn with_labels<I, S>(labels: I, props: Properties) -> Result<Self, EntityError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Set<String> = labels.into_iter().map(Into::into).collect();
        if labels.is_empty() {
            return Err(EntityError::EmptyLabelSet);
        }
        Ok(Self { labels, props })
    }

    /// Adds another label to the node.
    pub fn add_label(&mut self, label: impl Into<String>) {
        self.labels.add(label.into());
    }

    /// The node's label set.
    pub fn labels(&self) -> &Set<String> {
        &self.labels
    }

    /// Labels in ascending order.
    pub fn sorted_labels(&self) -> Vec<String> {
        self.labels.sorted()
    }

    /// Returns `true` if the node carries `label`.
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    /// The node's properties.
    pub fn props(&self) -> &Properties {
        &self.props
    }

    /// Sets a single property, replacing any previous value.
    pub fn set_prop(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.props.insert(key.into(), value.into());
    }

    /// Resolves the label used to match this node in the store together with
    /// the values of that label's match keys.
    ///
    /// Labels are scanned in lexicographic order and the first one with a
    /// registry entry wins, so the result does not depend on the order labels
    /// were added.
    pub fn match_props<P>(&self, registry: &P) -> Result<(String, Properties), EntityError>
    where
        P: MatchKeysProvider + ?Sized,
    {
        let labels = self.sorted_labels();
        for label in &labels {
            let Some(keys) = registry.keys(label) else {
                continue;
            };
            let mut props = Properties::new();
            for key in keys {
                let value = self.props.get(key).ok_or_else(|| {
                    EntityError::MissingMatchProperty {
                        label: label.clone(),
                        key: key.clone(),
                    }
                })?;
                props.insert(key.clone(), value.clone());
            }
            return Ok((label.clone(), props));
        }
        Err(EntityError::NoRecognizedLabel { labels })
    }

    /// Like [`Node::match_props`] but only returns the label.
    pub fn match_label<P>(&self, registry: &P) -> Result<String, EntityError>
    where
        P: MatchKeysProvider + ?Sized,
    {
        self.match_props(registry).map(|(label, _)| label)
    }
}

/// A directed, typed relationship between two nodes.
#[derive(Debug, Clone)]
pub struct Relationship {
    rel_type: String,
    start: Arc<Node>,
    end: Arc<Node>,
    props: Properties,
}

impl Relationship {
    /// Creates a relationship without checking endpoint labels.
    pub fn new(
        rel_type: impl Into<String>,
        start: Arc<Node>,
        end: Arc<Node>,
        props: Properties,
    ) -> Self {
        Self {
            rel_type: rel_type.into(),
            start,
            end,
            props,
        }
    }

    /// Creates a relationship after checking that `start` carries
    /// `start_label` and `end` carries `end_label`.
    pub fn with_validation(
        rel_type: impl Into<String>,
        start_label: &str,
        end_label: &str,
        start: Arc<Node>,
        end: Arc<Node>,
        props: Properties,
    ) -> Result<Self, EntityError> {
        validate_endpoint(&start, EndpointRole::Start, start_label)?;
        validate_endpoint(&end, EndpointRole::End, end_label)?;
        Ok(Self::new(rel_type, start, end, props))
    }

    /// The relationship type.
    pub fn rel_type(&self) -> &str {
        &self.rel_type
    }

    /// The start node.
    pub fn start(&self) -> &Arc<Node> {
        &self.start
    }

    /// The end node.
    pub fn end(&self) -> &Arc<Node> {
        &self.end
    }

    /// The relationship's own properties.
    pub fn props(&self) -> &Properties {
        &self.props
    }
}

fn validate_endpoint(node: &Node, role: EndpointRole, expected: &str) -> Result<(), EntityError> {
    if node.has_label(expected) {
        return Ok(());
    }
    Err(EntityError::EndpointLabelMismatch {
        role,
        expected: expected.to_string(),
        actual: node.sorted_labels(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::MatchKeys;
    use serde_json::json;

    fn props(value: Value) -> Properties {
        match value {
            Value::Object(map) => map,
            _ => Properties::new(),
        }
    }

    #[test]
    fn match_props_uses_registered_keys() {
        let registry = MatchKeys::nostr();
        let node = Node::new("Tag", props(json!({"name": "e", "value": "ev0", "extra": 1})));
        let (label, matched) = node.match_props(&registry).expect("tag resolves");
        assert_eq!(label, "Tag");
        assert_eq!(matched.len(), 2);
        assert_eq!(matched["name"], json!("e"));
        assert_eq!(matched["value"], json!("ev0"));
    }

    #[test]
    fn missing_key_is_reported() {
        let registry = MatchKeys::nostr();
        let node = Node::new("Tag", props(json!({"name": "e"})));
        assert_eq!(
            node.match_props(&registry).unwrap_err(),
            EntityError::MissingMatchProperty {
                label: "Tag".into(),
                key: "value".into()
            }
        );
    }

    #[test]
    fn unregistered_labels_are_rejected() {
        let registry = MatchKeys::nostr();
        let node = Node::with_labels(["Zeta", "Alpha"], Properties::new()).expect("labels");
        assert_eq!(
            node.match_props(&registry).unwrap_err(),
            EntityError::NoRecognizedLabel {
                labels: vec!["Alpha".into(), "Zeta".into()]
            }
        );
    }

    #[test]
    fn match_label_ignores_insertion_order() {
        let registry = MatchKeys::new([("Tag", vec!["name", "value"])]);
        let body = props(json!({"name": "t", "value": "v"}));

        let mut a = Node::new("Event", body.clone());
        a.add_label("Tag");
        let mut b = Node::new("Tag", body);
        b.add_label("Event");

        assert_eq!(a.match_label(&registry).expect("a"), "Tag");
        assert_eq!(b.match_label(&registry).expect("b"), "Tag");
    }

    #[test]
    fn lexicographically_first_registered_label_wins() {
        let registry = MatchKeys::nostr();
        let node = Node::with_labels(
            ["User", "Event"],
            props(json!({"id": "ev1", "pubkey": "pk1"})),
        )
        .expect("labels");
        assert_eq!(node.match_label(&registry).expect("resolves"), "Event");
    }

    #[test]
    fn empty_label_set_is_rejected() {
        let labels: [&str; 0] = [];
        assert_eq!(
            Node::with_labels(labels, Properties::new()).unwrap_err(),
            EntityError::EmptyLabelSet
        );
    }

    #[test]
    fn endpoint_mismatch_fails_at_construction() {
        let event = Arc::new(Node::new("Event", props(json!({"id": "ev1"}))));
        let other = Arc::new(Node::new("Event", props(json!({"id": "ev2"}))));
        let err = Relationship::with_validation(
            "SIGNED",
            "User",
            "Event",
            event,
            other,
            Properties::new(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            EntityError::EndpointLabelMismatch {
                role: EndpointRole::Start,
                expected: "User".into(),
                actual: vec!["Event".into()],
            }
        );
    }
}
