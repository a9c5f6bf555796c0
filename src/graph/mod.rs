//! Per-record subgraphs and the batch accumulator they are merged into.

mod batch;
mod subgraph;

pub use batch::{NodeGroupKey, RelGroupKey, StructuredSubgraph};
pub use subgraph::Subgraph;
