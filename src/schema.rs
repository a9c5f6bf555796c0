//! Match-key registry and the fixed Nostr graph schema.
//!
//! The registry maps each node label to the ordered property keys that
//! identify a node of that label. It is the only place grouping and query
//! generation look up match predicates.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::EntityError;
use crate::model::{Node, Properties, Relationship};

/// Read-only lookup of match keys by label.
pub trait MatchKeysProvider: Send + Sync {
    /// All labels that have match keys, in ascending order.
    fn labels(&self) -> Vec<String>;

    /// The match keys for `label`, or `None` if the label is not registered.
    fn keys(&self, label: &str) -> Option<&[String]>;
}

/// Immutable label → match-key mapping.
#[derive(Debug, Clone, Default)]
pub struct MatchKeys {
    keys: HashMap<String, Vec<String>>,
}

impl MatchKeys {
    /// Builds a registry from `(label, keys)` pairs.
    pub fn new<I, L, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (L, Vec<K>)>,
        L: Into<String>,
        K: Into<String>,
    {
        let keys = entries
            .into_iter()
            .map(|(label, keys)| (label.into(), keys.into_iter().map(Into::into).collect()))
            .collect();
        Self { keys }
    }

    /// The registry for Nostr events.
    pub fn nostr() -> Self {
        Self::new([
            (USER, vec!["pubkey"]),
            (RELAY, vec!["url"]),
            (EVENT, vec!["id"]),
            (TAG, vec!["name", "value"]),
        ])
    }

    /// Shared handle, the form the accumulator and pipeline hold.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl MatchKeysProvider for MatchKeys {
    fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.keys.keys().cloned().collect();
        labels.sort();
        labels
    }

    fn keys(&self, label: &str) -> Option<&[String]> {
        self.keys.get(label).map(Vec::as_slice)
    }
}

/// Label for Nostr users, matched on `pubkey`.
pub const USER: &str = "User";
/// Label for relays, matched on `url`.
pub const RELAY: &str = "Relay";
/// Label for events, matched on `id`.
pub const EVENT: &str = "Event";
/// Label for tags, matched on `(name, value)`.
pub const TAG: &str = "Tag";

/// Declared relationship type with its required endpoint labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipSpec {
    /// Relationship type name.
    pub rel_type: &'static str,
    /// Label the start node must carry.
    pub start_label: &'static str,
    /// Label the end node must carry.
    pub end_label: &'static str,
}

impl RelationshipSpec {
    /// Builds a relationship of this type, validating both endpoints.
    pub fn build(
        &self,
        start: Arc<Node>,
        end: Arc<Node>,
        props: Option<Properties>,
    ) -> Result<Relationship, EntityError> {
        Relationship::with_validation(
            self.rel_type,
            self.start_label,
            self.end_label,
            start,
            end,
            props.unwrap_or_default(),
        )
    }
}

/// A user signed an event.
pub const SIGNED: RelationshipSpec = RelationshipSpec {
    rel_type: "SIGNED",
    start_label: USER,
    end_label: EVENT,
};

/// An event carries a tag.
pub const TAGGED: RelationshipSpec = RelationshipSpec {
    rel_type: "TAGGED",
    start_label: EVENT,
    end_label: TAG,
};

/// An event references another event.
pub const REFERENCES_EVENT: RelationshipSpec = RelationshipSpec {
    rel_type: "REFERENCES",
    start_label: EVENT,
    end_label: EVENT,
};

/// An event references a user.
pub const REFERENCES_USER: RelationshipSpec = RelationshipSpec {
    rel_type: "REFERENCES",
    start_label: EVENT,
    end_label: USER,
};

/// Every relationship the schema declares.
pub const RELATIONSHIPS: [RelationshipSpec; 4] =
    [SIGNED, TAGGED, REFERENCES_EVENT, REFERENCES_USER];

/// Constraint and index statements to run before ingestion.
pub const BOOTSTRAP_STATEMENTS: &[&str] = &[
    "CREATE CONSTRAINT user_pubkey IF NOT EXISTS FOR (n:User) REQUIRE n.pubkey IS UNIQUE",
    "CREATE INDEX event_id IF NOT EXISTS FOR (n:Event) ON (n.id)",
    "CREATE INDEX event_kind IF NOT EXISTS FOR (n:Event) ON (n.kind)",
    "CREATE INDEX tag_name_value IF NOT EXISTS FOR (n:Tag) ON (n.name, n.value)",
];

fn single(key: &str, value: impl Into<Value>) -> Properties {
    let mut props = Properties::new();
    props.insert(key.to_string(), value.into());
    props
}

/// A `User` node keyed by `pubkey`.
pub fn user_node(pubkey: &str) -> Node {
    Node::new(USER, single("pubkey", pubkey))
}

/// A `Relay` node keyed by `url`.
pub fn relay_node(url: &str) -> Node {
    Node::new(RELAY, single("url", url))
}

/// An `Event` node keyed by `id`.
pub fn event_node(id: &str) -> Node {
    Node::new(EVENT, single("id", id))
}

/// A `Tag` node keyed by `(name, value)`. Trailing tag elements are kept in
/// `rest` when there are any.
pub fn tag_node(name: &str, value: &str, rest: &[String]) -> Node {
    let mut props = single("name", name);
    props.insert("value".to_string(), value.into());
    if !rest.is_empty() {
        props.insert("rest".to_string(), rest.to_vec().into());
    }
    Node::new(TAG, props)
}

/// `(User)-[:SIGNED]->(Event)`
pub fn signed(
    user: Arc<Node>,
    event: Arc<Node>,
    props: Option<Properties>,
) -> Result<Relationship, EntityError> {
    SIGNED.build(user, event, props)
}

/// `(Event)-[:TAGGED]->(Tag)`
pub fn tagged(
    event: Arc<Node>,
    tag: Arc<Node>,
    props: Option<Properties>,
) -> Result<Relationship, EntityError> {
    TAGGED.build(event, tag, props)
}

/// `(Event)-[:REFERENCES]->(Event)`
pub fn references_event(
    event: Arc<Node>,
    target: Arc<Node>,
    props: Option<Properties>,
) -> Result<Relationship, EntityError> {
    REFERENCES_EVENT.build(event, target, props)
}

/// `(Event)-[:REFERENCES]->(User)`
pub fn references_user(
    event: Arc<Node>,
    target: Arc<Node>,
    props: Option<Properties>,
) -> Result<Relationship, EntityError> {
    REFERENCES_USER.build(event, target, props)
}
