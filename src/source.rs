//! Record sources feeding the pipeline.
//!
//! A source yields decoded records one at a time. Lines that fail to decode
//! come back as [`SourceItem::Malformed`] so the pipeline can log and skip
//! them; only I/O failures end the stream with an error.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::{DecodeError, ImportError, Result};

/// A signed Nostr event as exported by relays, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NostrEvent {
    /// Hex event id.
    pub id: String,
    /// Hex public key of the author.
    pub pubkey: String,
    /// Unix timestamp in seconds.
    pub created_at: i64,
    /// Event kind.
    pub kind: u64,
    /// Tags; each tag is a list of strings, name first.
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    /// Free-text content.
    #[serde(default)]
    pub content: String,
    /// Schnorr signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
}

/// One step of a record source.
#[derive(Debug)]
pub enum SourceItem<R> {
    /// A successfully decoded record.
    Record(R),
    /// An input unit that could not be decoded.
    Malformed(DecodeError),
}

/// Produces records for the pipeline.
#[async_trait]
pub trait RecordSource: Send + 'static {
    /// Record type handed to the transformer.
    type Record: Send + 'static;

    /// Returns the next item, or `None` once the input is exhausted.
    async fn next_item(&mut self) -> Result<Option<SourceItem<Self::Record>>>;
}

/// Reads newline-delimited JSON records from a file. Blank lines are ignored.
///
/// Lines are read as raw bytes, so invalid UTF-8 surfaces as a malformed
/// record rather than an I/O failure.
pub struct JsonlSource<R = NostrEvent> {
    path: PathBuf,
    reader: BufReader<File>,
    buf: Vec<u8>,
    line: usize,
    _record: PhantomData<fn() -> R>,
}

impl<R> JsonlSource<R> {
    /// Opens `path` for reading.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .await
            .map_err(|source| ImportError::Source {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            reader: BufReader::new(file),
            buf: Vec::new(),
            line: 0,
            _record: PhantomData,
        })
    }
}

#[async_trait]
impl<R> RecordSource for JsonlSource<R>
where
    R: DeserializeOwned + Send + 'static,
{
    type Record = R;

    async fn next_item(&mut self) -> Result<Option<SourceItem<R>>> {
        loop {
            self.buf.clear();
            let read = self
                .reader
                .read_until(b'\n', &mut self.buf)
                .await
                .map_err(|source| ImportError::Source {
                    path: self.path.clone(),
                    source,
                })?;
            if read == 0 {
                return Ok(None);
            }
            self.line += 1;
            let trimmed = self.buf.trim_ascii();
            if trimmed.is_empty() {
                continue;
            }
            let item = match serde_json::from_slice(trimmed) {
                Ok(record) => SourceItem::Record(record),
                Err(source) => SourceItem::Malformed(DecodeError {
                    line: self.line,
                    source,
                }),
            };
            return Ok(Some(item));
        }
    }
}

/// Source over items already in memory.
pub struct IterSource<R> {
    items: std::vec::IntoIter<SourceItem<R>>,
}

impl<R> IterSource<R> {
    /// Yields `items` in order.
    pub fn new(items: Vec<SourceItem<R>>) -> Self {
        Self {
            items: items.into_iter(),
        }
    }

    /// Yields every record as a successfully decoded item.
    pub fn from_records(records: Vec<R>) -> Self {
        Self::new(records.into_iter().map(SourceItem::Record).collect())
    }
}

#[async_trait]
impl<R: Send + 'static> RecordSource for IterSource<R> {
    type Record = R;

    async fn next_item(&mut self) -> Result<Option<SourceItem<R>>> {
        Ok(self.items.next())
    }
}
