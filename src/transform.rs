//! Turns decoded records into per-record subgraphs.

use crate::error::EntityError;
use crate::graph::Subgraph;
use crate::schema;
use crate::source::NostrEvent;

/// Builds one [`Subgraph`] per record.
pub trait Transformer: Send + Sync + 'static {
    /// Record type consumed.
    type Record: Send + 'static;

    /// Builds the subgraph for `record`. A failure rejects only this record.
    fn transform(&self, record: Self::Record) -> Result<Subgraph, EntityError>;
}

/// Maps a Nostr event to its author, the event itself and its tags.
///
/// Produces `(User)-[:SIGNED]->(Event)` and one `(Event)-[:TAGGED]->(Tag)`
/// per tag with at least a name and a value. With reference linking enabled,
/// `e` and `p` tags additionally yield `REFERENCES` edges to the referenced
/// event or user.
#[derive(Debug, Clone, Default)]
pub struct EventTransformer {
    link_references: bool,
}

impl EventTransformer {
    /// Transformer without reference linking.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables `REFERENCES` edges for `e`/`p` tags.
    pub fn with_references(mut self, enabled: bool) -> Self {
        self.link_references = enabled;
        self
    }
}

impl Transformer for EventTransformer {
    type Record = NostrEvent;

    fn transform(&self, event: NostrEvent) -> Result<Subgraph, EntityError> {
        let mut subgraph = Subgraph::new();

        let user = subgraph.add_node(schema::user_node(&event.pubkey));
        let mut node = schema::event_node(&event.id);
        node.set_prop("created_at", event.created_at);
        node.set_prop("kind", event.kind);
        node.set_prop("content", event.content);
        let event_node = subgraph.add_node(node);
        subgraph.add_rel(schema::signed(user, event_node.clone(), None)?);

        for tag in &event.tags {
            let [name, value, rest @ ..] = tag.as_slice() else {
                continue;
            };
            let tag_node = subgraph.add_node(schema::tag_node(name, value, rest));
            subgraph.add_rel(schema::tagged(event_node.clone(), tag_node, None)?);

            if !self.link_references {
                continue;
            }
            match name.as_str() {
                "e" => {
                    let target = subgraph.add_node(schema::event_node(value));
                    subgraph.add_rel(schema::references_event(event_node.clone(), target, None)?);
                }
                "p" => {
                    let target = subgraph.add_node(schema::user_node(value));
                    subgraph.add_rel(schema::references_user(event_node.clone(), target, None)?);
                }
                _ => {}
            }
        }

        Ok(subgraph)
    }
}
