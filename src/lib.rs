//! Nostr event ingestion into a property graph.
//!
//! Events are read from newline-delimited JSON, mapped to small subgraphs of
//! users, events and tags, accumulated into buckets keyed by label set and
//! match label, and written to the store as bulk `MERGE`/`CREATE` operations.
//!
//! The flow is a three-stage [`pipeline`]: a [`source::RecordSource`] feeds a
//! [`transform::Transformer`], whose output a [`pipeline::BatchWriter`]
//! accumulates and flushes through a [`store::GraphStore`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod cypher;
pub mod error;
pub mod graph;
pub mod model;
pub mod pipeline;
pub mod schema;
pub mod set;
pub mod source;
pub mod store;
pub mod transform;

pub use config::{ConfigError, ImportConfig, Neo4jConfig};
pub use error::{EntityError, ImportError, Result, StoreError};
pub use graph::{StructuredSubgraph, Subgraph};
pub use model::{Node, Properties, Relationship};
pub use pipeline::{run_import, BatchWriter, ImportReport, Pipeline, PipelineConfig};
pub use schema::{MatchKeys, MatchKeysProvider};
pub use store::{GraphStore, MemoryStore, Neo4jStore, RetryPolicy};
