//! Three-stage ingestion pipeline: source → transform → merge/flush.
//!
//! Stages run as separate tokio tasks joined by channels of capacity one, so
//! a slow flush stalls the transformer, which in turn stalls the source. The
//! merge stage owns the store handle and is its only writer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ImportConfig;
use crate::cypher::{flush_plan, BatchOperation};
use crate::error::{ImportError, Result};
use crate::graph::{StructuredSubgraph, Subgraph};
use crate::schema::{MatchKeys, MatchKeysProvider, BOOTSTRAP_STATEMENTS};
use crate::source::{JsonlSource, NostrEvent, RecordSource, SourceItem};
use crate::store::{execute_with_retry, GraphStore, RetryPolicy};
use crate::transform::{EventTransformer, Transformer};

/// Knobs for one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Maximum input items read from the source; `0` reads everything.
    pub max_records: usize,
    /// Flush once the accumulated node count exceeds this.
    pub batch_threshold: usize,
    /// Backoff for transient store failures.
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&ImportConfig::default())
    }
}

impl From<&ImportConfig> for PipelineConfig {
    fn from(config: &ImportConfig) -> Self {
        Self {
            max_records: config.max_records,
            batch_threshold: config.batch_threshold,
            retry: config.retry,
        }
    }
}

/// What one flush wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Bulk operations executed.
    pub operations: usize,
    /// Node rows submitted.
    pub nodes: usize,
    /// Relationship rows submitted.
    pub relationships: usize,
    /// Newly created nodes, if the store reports it.
    pub nodes_created: Option<u64>,
    /// Wall-clock time spent in the store.
    pub elapsed: Duration,
}

/// Totals for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Items read from the source, decoded or not.
    pub records_read: usize,
    /// Items skipped because they could not be decoded.
    pub records_malformed: usize,
    /// Records skipped because an entity failed validation.
    pub records_rejected: usize,
    /// Subgraphs merged into the accumulator.
    pub subgraphs_merged: usize,
    /// Flushes performed, including the final one.
    pub flushes: usize,
    /// Node rows written.
    pub nodes_written: usize,
    /// Relationship rows written.
    pub relationships_written: usize,
    /// Total run time.
    pub elapsed: Duration,
}

/// Accumulates subgraphs and flushes them to the store past a node threshold.
pub struct BatchWriter<S> {
    store: S,
    registry: Arc<dyn MatchKeysProvider>,
    batch: StructuredSubgraph,
    threshold: usize,
    retry: RetryPolicy,
    flushes: usize,
    nodes_written: usize,
    relationships_written: usize,
}

impl<S: GraphStore> BatchWriter<S> {
    /// Creates a writer with an empty accumulator.
    pub fn new(
        store: S,
        registry: Arc<dyn MatchKeysProvider>,
        threshold: usize,
        retry: RetryPolicy,
    ) -> Self {
        let batch = StructuredSubgraph::new(Arc::clone(&registry));
        Self {
            store,
            registry,
            batch,
            threshold,
            retry,
            flushes: 0,
            nodes_written: 0,
            relationships_written: 0,
        }
    }

    /// Entities waiting for the next flush.
    pub fn pending(&self) -> &StructuredSubgraph {
        &self.batch
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Number of flushes performed so far.
    pub fn flushes(&self) -> usize {
        self.flushes
    }

    /// Merges `subgraph` and flushes if the node count now exceeds the
    /// threshold. A subgraph with an invalid entity is rejected whole with a
    /// recoverable error.
    pub async fn merge(&mut self, subgraph: Subgraph) -> Result<Option<FlushReport>> {
        self.batch.merge(subgraph)?;
        if self.batch.node_count() > self.threshold {
            return self.flush().await.map(Some);
        }
        Ok(None)
    }

    /// Writes every bucket (nodes first) and starts a fresh accumulator.
    pub async fn flush(&mut self) -> Result<FlushReport> {
        let started = Instant::now();
        let plan = flush_plan(&self.batch)?;
        let mut report = FlushReport::default();
        let mut created: Option<u64> = Some(0);

        for operation in &plan {
            let op_started = Instant::now();
            let summary = execute_with_retry(&self.store, operation, &self.retry).await?;
            match operation {
                BatchOperation::UpsertNodes(_) => {
                    report.nodes += summary.rows;
                    created = created.zip(summary.nodes_created).map(|(a, b)| a + b);
                    info!(
                        %operation,
                        created = ?summary.nodes_created,
                        elapsed = ?op_started.elapsed(),
                        "nodes written"
                    );
                }
                BatchOperation::CreateRelationships(_) => {
                    report.relationships += summary.rows;
                    info!(
                        %operation,
                        created = ?summary.relationships_created,
                        elapsed = ?op_started.elapsed(),
                        "relationships written"
                    );
                }
            }
            report.operations += 1;
        }

        report.nodes_created = created;
        report.elapsed = started.elapsed();
        self.flushes += 1;
        self.nodes_written += report.nodes;
        self.relationships_written += report.relationships;
        self.batch = StructuredSubgraph::new(Arc::clone(&self.registry));

        info!(
            flush = self.flushes,
            nodes = report.nodes,
            relationships = report.relationships,
            elapsed = ?report.elapsed,
            "flush complete"
        );
        Ok(report)
    }

    /// Consumes the writer, returning the store.
    pub fn into_store(self) -> S {
        self.store
    }
}

/// Wires a source, a transformer and a [`BatchWriter`] into a running pipeline.
pub struct Pipeline<S> {
    store: S,
    registry: Arc<dyn MatchKeysProvider>,
    config: PipelineConfig,
}

#[derive(Debug, Default)]
struct SourceStats {
    read: usize,
    malformed: usize,
}

#[derive(Debug, Default)]
struct TransformStats {
    rejected: usize,
}

#[derive(Debug, Default)]
struct MergeStats {
    merged: usize,
    rejected: usize,
    flushes: usize,
    nodes_written: usize,
    relationships_written: usize,
}

impl<S: GraphStore + 'static> Pipeline<S> {
    /// Creates a pipeline writing to `store`.
    pub fn new(store: S, registry: Arc<dyn MatchKeysProvider>, config: PipelineConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// Runs until the source is exhausted or a fatal error occurs.
    pub async fn run<Src, T>(self, source: Src, transformer: T) -> Result<ImportReport>
    where
        Src: RecordSource,
        T: Transformer<Record = Src::Record>,
    {
        let started = Instant::now();
        let writer = BatchWriter::new(
            self.store,
            self.registry,
            self.config.batch_threshold,
            self.config.retry,
        );

        let (record_tx, record_rx) = mpsc::channel(1);
        let (subgraph_tx, subgraph_rx) = mpsc::channel(1);

        let failed = CancellationToken::new();

        let source_task = tokio::spawn(source_stage(
            source,
            record_tx,
            self.config.max_records,
            failed.clone(),
        ));
        let transform_task = tokio::spawn(transform_stage(transformer, record_rx, subgraph_tx));
        let merge_task = tokio::spawn(merge_stage(writer, subgraph_rx, failed));

        let sourced = match join_stage(source_task, "source").await.and_then(|r| r) {
            Ok(stats) => stats,
            Err(err) => {
                transform_task.abort();
                merge_task.abort();
                return Err(err);
            }
        };
        let transformed = join_stage(transform_task, "transform").await?;
        let merged = join_stage(merge_task, "merge").await??;

        let report = ImportReport {
            records_read: sourced.read,
            records_malformed: sourced.malformed,
            records_rejected: transformed.rejected + merged.rejected,
            subgraphs_merged: merged.merged,
            flushes: merged.flushes,
            nodes_written: merged.nodes_written,
            relationships_written: merged.relationships_written,
            elapsed: started.elapsed(),
        };
        info!(?report, "import finished");
        Ok(report)
    }
}

async fn join_stage<T>(handle: JoinHandle<T>, stage: &'static str) -> Result<T> {
    handle.await.map_err(|err| ImportError::Stage {
        stage,
        message: err.to_string(),
    })
}

/// Reads the source, cancelling `failed` before returning a fatal error so the
/// merge stage never mistakes the closed channel for the end of input.
async fn source_stage<Src: RecordSource>(
    source: Src,
    tx: mpsc::Sender<Src::Record>,
    max_records: usize,
    failed: CancellationToken,
) -> Result<SourceStats> {
    let result = read_source(source, &tx, max_records).await;
    if result.is_err() {
        failed.cancel();
    }
    result
}

async fn read_source<Src: RecordSource>(
    mut source: Src,
    tx: &mpsc::Sender<Src::Record>,
    max_records: usize,
) -> Result<SourceStats> {
    let mut stats = SourceStats::default();
    while max_records == 0 || stats.read < max_records {
        let Some(item) = source.next_item().await? else {
            break;
        };
        stats.read += 1;
        match item {
            SourceItem::Record(record) => {
                if tx.send(record).await.is_err() {
                    debug!("transform stage closed; stopping source");
                    break;
                }
            }
            SourceItem::Malformed(err) => {
                stats.malformed += 1;
                warn!(error = %err, "skipping malformed record");
            }
        }
    }
    debug!(read = stats.read, malformed = stats.malformed, "source exhausted");
    Ok(stats)
}

async fn transform_stage<T: Transformer>(
    transformer: T,
    mut rx: mpsc::Receiver<T::Record>,
    tx: mpsc::Sender<Subgraph>,
) -> TransformStats {
    let mut stats = TransformStats::default();
    while let Some(record) = rx.recv().await {
        match transformer.transform(record) {
            Ok(subgraph) => {
                if tx.send(subgraph).await.is_err() {
                    debug!("merge stage closed; stopping transform");
                    break;
                }
            }
            Err(err) => {
                stats.rejected += 1;
                warn!(error = %err, "skipping record with invalid entity");
            }
        }
    }
    stats
}

async fn merge_stage<S: GraphStore>(
    mut writer: BatchWriter<S>,
    mut rx: mpsc::Receiver<Subgraph>,
    failed: CancellationToken,
) -> Result<MergeStats> {
    let mut stats = MergeStats::default();
    while let Some(subgraph) = rx.recv().await {
        if failed.is_cancelled() {
            break;
        }
        match writer.merge(subgraph).await {
            Ok(_) => stats.merged += 1,
            Err(err) if err.is_recoverable() => {
                stats.rejected += 1;
                warn!(error = %err, "skipping subgraph");
            }
            Err(err) => return Err(err),
        }
    }
    if failed.is_cancelled() {
        warn!(
            pending = writer.pending().node_count(),
            "source failed; discarding unflushed entities"
        );
    } else if !writer.pending().is_empty() {
        writer.flush().await?;
    }
    stats.flushes = writer.flushes;
    stats.nodes_written = writer.nodes_written;
    stats.relationships_written = writer.relationships_written;
    Ok(stats)
}

/// Imports `config.input` into `store` with the Nostr schema.
///
/// Bootstraps constraints first when `config.bootstrap` is set.
pub async fn run_import<S: GraphStore + 'static>(
    config: &ImportConfig,
    store: S,
) -> Result<ImportReport> {
    if config.bootstrap {
        store.bootstrap(BOOTSTRAP_STATEMENTS).await?;
        debug!(statements = BOOTSTRAP_STATEMENTS.len(), "schema bootstrapped");
    }
    let source: JsonlSource<NostrEvent> = JsonlSource::open(&config.input).await?;
    info!(input = %config.input.display(), "reading events");
    let transformer = EventTransformer::new().with_references(config.link_references);
    Pipeline::new(store, MatchKeys::nostr().into_shared(), PipelineConfig::from(config))
        .run(source, transformer)
        .await
}
