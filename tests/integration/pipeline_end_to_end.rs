#![allow(missing_docs)]

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nostr_graph::cypher::BatchOperation;
use nostr_graph::error::EntityError;
use nostr_graph::pipeline::{BatchWriter, Pipeline, PipelineConfig};
use nostr_graph::schema::{self, MatchKeys};
use nostr_graph::source::{IterSource, JsonlSource, NostrEvent, RecordSource, SourceItem};
use nostr_graph::store::WriteSummary;
use nostr_graph::transform::{EventTransformer, Transformer};
use nostr_graph::{
    run_import, GraphStore, ImportConfig, ImportError, MemoryStore, Node, Properties,
    RetryPolicy, StoreError, Subgraph,
};
use parking_lot::Mutex;
use serde_json::json;
use tempfile::NamedTempFile;

fn write_jsonl(lines: &[String]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("tempfile");
    for line in lines {
        writeln!(file, "{line}").expect("write line");
    }
    file.flush().expect("flush");
    file
}

fn event_line(id: &str, pubkey: &str, tags: serde_json::Value) -> String {
    json!({
        "id": id,
        "pubkey": pubkey,
        "created_at": 1_700_000_000,
        "kind": 1,
        "tags": tags,
        "content": "hello",
        "sig": "00",
    })
    .to_string()
}

fn config_for(file: &NamedTempFile) -> ImportConfig {
    ImportConfig {
        input: file.path().to_path_buf(),
        retry: RetryPolicy::none(),
        ..ImportConfig::default()
    }
}

fn props(entries: serde_json::Value) -> Properties {
    match entries {
        serde_json::Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

#[tokio::test]
async fn single_event_produces_author_event_and_tags() {
    let file = write_jsonl(&[event_line("ev1", "pk1", json!([["e", "ev0"], ["p", "pk2"]]))]);
    let store = Arc::new(MemoryStore::new());

    let report = run_import(&config_for(&file), Arc::clone(&store))
        .await
        .expect("import");

    assert_eq!(report.records_read, 1);
    assert_eq!(report.flushes, 1);
    assert_eq!(store.find_nodes("User", &Properties::new()).len(), 1);
    assert_eq!(store.find_nodes("Event", &Properties::new()).len(), 1);
    assert_eq!(store.find_nodes("Tag", &Properties::new()).len(), 2);
    assert_eq!(store.node_count(), 4);

    let types: Vec<String> = store
        .relationships()
        .into_iter()
        .map(|rel| rel.rel_type)
        .collect();
    assert_eq!(types.iter().filter(|t| *t == "SIGNED").count(), 1);
    assert_eq!(types.iter().filter(|t| *t == "TAGGED").count(), 2);

    assert_eq!(store.find_nodes("User", &props(json!({"pubkey": "pk1"}))).len(), 1);
    let events = store.find_nodes("Event", &props(json!({"id": "ev1"})));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].props["kind"], json!(1));
    assert_eq!(events[0].props["content"], json!("hello"));
    for (name, value) in [("e", "ev0"), ("p", "pk2")] {
        let tags = store.find_nodes("Tag", &props(json!({"name": name, "value": value})));
        assert_eq!(tags.len(), 1, "tag {name}/{value}");
    }
    assert!(!store.bootstrap_statements().is_empty());
}

#[tokio::test]
async fn reimport_reuses_nodes_but_duplicates_relationships() {
    let file = write_jsonl(&[
        event_line("ev1", "pk1", json!([["t", "nostr"]])),
        event_line("ev2", "pk1", json!([["t", "nostr"]])),
    ]);
    let store = Arc::new(MemoryStore::new());
    let config = config_for(&file);

    run_import(&config, Arc::clone(&store)).await.expect("first import");
    let nodes = store.node_count();
    let rels = store.relationship_count();
    assert_eq!(nodes, 4);
    assert_eq!(rels, 4);

    run_import(&config, Arc::clone(&store)).await.expect("second import");
    assert_eq!(store.node_count(), nodes);
    assert_eq!(store.relationship_count(), rels * 2);
}

#[tokio::test]
async fn upserts_union_properties_across_flushes() {
    let store = MemoryStore::new();
    let mut writer = BatchWriter::new(
        store,
        MatchKeys::nostr().into_shared(),
        100,
        RetryPolicy::none(),
    );

    let mut first = Subgraph::new();
    let mut alice = schema::user_node("pk1");
    alice.set_prop("name", "alice");
    first.add_node(alice);
    writer.merge(first).await.expect("merge");
    writer.flush().await.expect("flush");

    let mut second = Subgraph::new();
    let mut again = schema::user_node("pk1");
    again.set_prop("about", "relay operator");
    second.add_node(again);
    writer.merge(second).await.expect("merge");
    writer.flush().await.expect("flush");

    let store = writer.into_store();
    let users = store.find_nodes("User", &Properties::new());
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].props["name"], json!("alice"));
    assert_eq!(users[0].props["about"], json!("relay operator"));
}

#[tokio::test]
async fn malformed_lines_are_skipped() {
    let file = write_jsonl(&[
        "{not json".to_string(),
        event_line("ev1", "pk1", json!([])),
        json!({"id": "ev2", "created_at": 1, "kind": 1}).to_string(),
        String::new(),
        event_line("ev3", "pk2", json!([])),
    ]);
    let store = Arc::new(MemoryStore::new());

    let report = run_import(&config_for(&file), Arc::clone(&store))
        .await
        .expect("import");

    assert_eq!(report.records_read, 4);
    assert_eq!(report.records_malformed, 2);
    assert_eq!(report.subgraphs_merged, 2);
    assert_eq!(store.find_nodes("Event", &Properties::new()).len(), 2);
}

#[tokio::test]
async fn invalid_utf8_line_is_skipped() {
    let mut file = NamedTempFile::new().expect("tempfile");
    writeln!(file, "{}", event_line("ev1", "pk1", json!([]))).expect("write");
    file.write_all(b"{\"id\":\"ev2\",\"pubkey\":\"pk\xff\",\"created_at\":1,\"kind\":1}\n")
        .expect("write");
    writeln!(file, "{}", event_line("ev3", "pk3", json!([]))).expect("write");
    file.flush().expect("flush");
    let store = Arc::new(MemoryStore::new());

    let report = run_import(&config_for(&file), Arc::clone(&store))
        .await
        .expect("import survives the bad line");

    assert_eq!(report.records_read, 3);
    assert_eq!(report.records_malformed, 1);
    assert_eq!(store.find_nodes("Event", &Properties::new()).len(), 2);
}

fn nostr_event(i: i64, pubkey: &str) -> NostrEvent {
    NostrEvent {
        id: format!("ev{i}"),
        pubkey: pubkey.into(),
        created_at: i,
        kind: 1,
        tags: Vec::new(),
        content: String::new(),
        sig: None,
    }
}

/// Yields its events, then fails as if the input became unreadable.
struct TruncatedSource {
    events: std::vec::IntoIter<NostrEvent>,
}

#[async_trait]
impl RecordSource for TruncatedSource {
    type Record = NostrEvent;

    async fn next_item(&mut self) -> nostr_graph::Result<Option<SourceItem<NostrEvent>>> {
        match self.events.next() {
            Some(event) => Ok(Some(SourceItem::Record(event))),
            None => Err(ImportError::Source {
                path: "events.jsonl".into(),
                source: std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "truncated"),
            }),
        }
    }
}

#[tokio::test]
async fn source_failure_discards_unflushed_batch() {
    let store = Arc::new(MemoryStore::new());
    let source = TruncatedSource {
        events: vec![nostr_event(1, "pk1"), nostr_event(2, "pk2")].into_iter(),
    };
    let config = PipelineConfig {
        max_records: 0,
        batch_threshold: 100,
        retry: RetryPolicy::none(),
    };

    let err = Pipeline::new(Arc::clone(&store), MatchKeys::nostr().into_shared(), config)
        .run(source, EventTransformer::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::Source { .. }));
    assert_eq!(store.node_count(), 0);
    assert_eq!(store.relationship_count(), 0);
}

/// Counts every item handed out.
struct CountingSource {
    events: std::vec::IntoIter<NostrEvent>,
    reads: Arc<AtomicUsize>,
}

#[async_trait]
impl RecordSource for CountingSource {
    type Record = NostrEvent;

    async fn next_item(&mut self) -> nostr_graph::Result<Option<SourceItem<NostrEvent>>> {
        let next = self.events.next();
        if next.is_some() {
            self.reads.fetch_add(1, Ordering::SeqCst);
        }
        Ok(next.map(SourceItem::Record))
    }
}

/// Records how far the source advanced while each write was in progress.
struct SlowStore {
    inner: MemoryStore,
    reads: Arc<AtomicUsize>,
    advanced: Mutex<Vec<usize>>,
}

#[async_trait]
impl GraphStore for SlowStore {
    async fn bootstrap(&self, statements: &[&str]) -> Result<(), StoreError> {
        self.inner.bootstrap(statements).await
    }

    async fn execute(&self, operation: &BatchOperation) -> Result<WriteSummary, StoreError> {
        let before = self.reads.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let after = self.reads.load(Ordering::SeqCst);
        self.advanced.lock().push(after - before);
        self.inner.execute(operation).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_store_holds_back_the_source() {
    const EVENTS: usize = 12;
    let reads = Arc::new(AtomicUsize::new(0));
    let store = Arc::new(SlowStore {
        inner: MemoryStore::new(),
        reads: Arc::clone(&reads),
        advanced: Mutex::new(Vec::new()),
    });
    let source = CountingSource {
        events: (0..EVENTS as i64)
            .map(|i| nostr_event(i, &format!("pk{i}")))
            .collect::<Vec<_>>()
            .into_iter(),
        reads: Arc::clone(&reads),
    };
    let config = PipelineConfig {
        max_records: 0,
        batch_threshold: 1,
        retry: RetryPolicy::none(),
    };

    let report = Pipeline::new(Arc::clone(&store), MatchKeys::nostr().into_shared(), config)
        .run(source, EventTransformer::new())
        .await
        .expect("run");

    assert_eq!(report.records_read, EVENTS);
    assert_eq!(report.flushes, EVENTS);
    let advanced = store.advanced.lock().clone();
    assert!(!advanced.is_empty());
    // one record in each channel, one held by each blocked sender
    let max = advanced.iter().copied().max().unwrap_or(0);
    assert!(max <= 4, "source ran ahead by {max} records during a write: {advanced:?}");
    assert_eq!(store.inner.find_nodes("Event", &Properties::new()).len(), EVENTS);
}

/// Emits a node the registry does not know for every odd-numbered record.
struct Haunted;

impl Transformer for Haunted {
    type Record = u32;

    fn transform(&self, record: u32) -> Result<Subgraph, EntityError> {
        let mut subgraph = Subgraph::new();
        if record % 2 == 1 {
            subgraph.add_node(Node::new("Ghost", Properties::new()));
        } else {
            subgraph.add_node(schema::user_node(&format!("pk{record}")));
        }
        Ok(subgraph)
    }
}

#[tokio::test]
async fn invalid_entities_skip_only_their_record() {
    let store = Arc::new(MemoryStore::new());
    let config = PipelineConfig {
        max_records: 0,
        batch_threshold: 100,
        retry: RetryPolicy::none(),
    };
    let report = Pipeline::new(Arc::clone(&store), MatchKeys::nostr().into_shared(), config)
        .run(IterSource::from_records((0..6).collect::<Vec<u32>>()), Haunted)
        .await
        .expect("run");

    assert_eq!(report.records_rejected, 3);
    assert_eq!(report.subgraphs_merged, 3);
    assert_eq!(store.node_count(), 3);
}

#[tokio::test]
async fn max_records_and_threshold_bound_the_run() {
    let lines: Vec<String> = (0..10)
        .map(|i| event_line(&format!("ev{i}"), &format!("pk{i}"), json!([])))
        .collect();
    let file = write_jsonl(&lines);
    let store = Arc::new(MemoryStore::new());

    let mut config = config_for(&file);
    config.batch_threshold = 5;
    let report = run_import(&config, Arc::clone(&store)).await.expect("import");
    // two nodes per event: flushes after events 3, 6 and 9, then the remainder
    assert_eq!(report.flushes, 4);
    assert_eq!(report.nodes_written, 20);

    let capped = Arc::new(MemoryStore::new());
    config.max_records = 4;
    let report = run_import(&config, Arc::clone(&capped)).await.expect("import");
    assert_eq!(report.records_read, 4);
    assert_eq!(capped.find_nodes("Event", &Properties::new()).len(), 4);
}

#[tokio::test]
async fn reference_linking_connects_tag_targets() {
    let file = write_jsonl(&[
        event_line("ev0", "pk2", json!([])),
        event_line("ev1", "pk1", json!([["e", "ev0"], ["p", "pk2"]])),
    ]);
    let store = Arc::new(MemoryStore::new());
    let mut config = config_for(&file);
    config.link_references = true;

    run_import(&config, Arc::clone(&store)).await.expect("import");

    assert_eq!(store.find_nodes("Event", &Properties::new()).len(), 2);
    assert_eq!(store.find_nodes("User", &Properties::new()).len(), 2);
    let references = store
        .relationships()
        .into_iter()
        .filter(|rel| rel.rel_type == "REFERENCES")
        .count();
    assert_eq!(references, 2);
}

struct RejectingStore;

#[async_trait]
impl GraphStore for RejectingStore {
    async fn bootstrap(&self, _statements: &[&str]) -> Result<(), StoreError> {
        Ok(())
    }

    async fn execute(&self, _operation: &BatchOperation) -> Result<WriteSummary, StoreError> {
        Err(StoreError::Rejected("constraint violation".into()))
    }
}

#[tokio::test]
async fn store_rejection_aborts_the_run() {
    let events: Vec<NostrEvent> = (0..20).map(|i| nostr_event(i, "pk")).collect();
    let config = PipelineConfig {
        max_records: 0,
        batch_threshold: 3,
        retry: RetryPolicy::none(),
    };
    let err = Pipeline::new(RejectingStore, MatchKeys::nostr().into_shared(), config)
        .run(IterSource::from_records(events), EventTransformer::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::Store(StoreError::Rejected(_))));
    assert!(!err.is_recoverable());
}

#[tokio::test]
async fn missing_input_is_fatal() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let config = ImportConfig {
        input: dir.path().join("absent.jsonl"),
        ..ImportConfig::default()
    };
    let err = run_import(&config, MemoryStore::new()).await.unwrap_err();
    assert!(matches!(err, ImportError::Source { .. }));

    let opened = JsonlSource::<NostrEvent>::open(dir.path().join("absent.jsonl")).await;
    assert!(opened.is_err());
}
