//! Graph store backends.
//!
//! The merge stage is the only writer, so backends do not need to coordinate
//! concurrent callers beyond being `Send + Sync`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::cypher::BatchOperation;
use crate::error::StoreError;

mod memory;
mod neo4j;

pub use memory::{MemoryStore, StoredNode, StoredRelationship};
pub use neo4j::Neo4jStore;

/// Outcome of one bulk write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Rows submitted with the operation.
    pub rows: usize,
    /// Nodes the store reports as newly created, when it can tell.
    pub nodes_created: Option<u64>,
    /// Relationships the store reports as newly created, when it can tell.
    pub relationships_created: Option<u64>,
}

/// A property-graph store that accepts bulk operations.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Runs constraint and index statements before ingestion starts.
    async fn bootstrap(&self, statements: &[&str]) -> Result<(), StoreError>;

    /// Executes one bulk operation.
    async fn execute(&self, operation: &BatchOperation) -> Result<WriteSummary, StoreError>;
}

#[async_trait]
impl<S: GraphStore + ?Sized> GraphStore for Arc<S> {
    async fn bootstrap(&self, statements: &[&str]) -> Result<(), StoreError> {
        (**self).bootstrap(statements).await
    }

    async fn execute(&self, operation: &BatchOperation) -> Result<WriteSummary, StoreError> {
        (**self).execute(operation).await
    }
}

/// Exponential backoff applied to transient store failures of idempotent
/// operations (node upserts).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after the `attempt`-th failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << shift);
        delay.min(self.max_delay)
    }
}

/// Executes `operation`, retrying transient failures according to `policy`.
///
/// Only idempotent operations are retried. A relationship create whose
/// acknowledgement was lost may already be committed, so it fails on the first
/// transient error instead of risking duplicate edges.
pub async fn execute_with_retry<S>(
    store: &S,
    operation: &BatchOperation,
    policy: &RetryPolicy,
) -> Result<WriteSummary, StoreError>
where
    S: GraphStore + ?Sized,
{
    let mut attempt = 1;
    loop {
        match store.execute(operation).await {
            Ok(summary) => return Ok(summary),
            Err(err)
                if err.is_transient()
                    && operation.is_idempotent()
                    && attempt < policy.max_attempts =>
            {
                let delay = policy.delay_for(attempt);
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying {operation}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
