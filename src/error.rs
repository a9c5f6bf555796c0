use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias used across the importer.
pub type Result<T> = std::result::Result<T, ImportError>;

/// Which end of a relationship failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRole {
    /// The node the relationship starts from.
    Start,
    /// The node the relationship points to.
    End,
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointRole::Start => f.write_str("start"),
            EndpointRole::End => f.write_str("end"),
        }
    }
}

/// An entity that cannot be matched against the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityError {
    /// The node's match label is registered but one of its keys is absent.
    #[error("missing property {key} for label {label}")]
    MissingMatchProperty {
        /// Label whose match keys were being resolved.
        label: String,
        /// The absent property key.
        key: String,
    },
    /// None of the node's labels has match keys.
    #[error("no recognized label found in {labels:?}")]
    NoRecognizedLabel {
        /// The node's labels, sorted.
        labels: Vec<String>,
    },
    /// A relationship endpoint lacks the label its type requires.
    #[error("expected {role} node to have label '{expected}', got {actual:?}")]
    EndpointLabelMismatch {
        /// Which endpoint failed.
        role: EndpointRole,
        /// Label required by the relationship type.
        expected: String,
        /// The endpoint's labels, sorted.
        actual: Vec<String>,
    },
    /// Nodes must carry at least one label.
    #[error("node has no labels")]
    EmptyLabelSet,
}

/// A single input line that could not be decoded.
#[derive(Debug, Error)]
#[error("invalid record on line {line}: {source}")]
pub struct DecodeError {
    /// 1-based line number in the input.
    pub line: usize,
    /// Underlying JSON error.
    #[source]
    pub source: serde_json::Error,
}

/// Failure reported by a [`GraphStore`](crate::store::GraphStore).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Connection loss or I/O hiccup; the operation may succeed if retried.
    #[error("transient store failure: {0}")]
    Transient(String),
    /// The store refused the operation.
    #[error("store rejected operation: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Whether retrying the same operation can help.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Top-level error type for an import run.
#[derive(Debug, Error)]
pub enum ImportError {
    /// Entity validation failed.
    #[error("invalid entity: {0}")]
    Entity(#[from] EntityError),
    /// A bucket reached the query generator with a label the registry does not know.
    #[error("unknown match label: {0}")]
    UnknownMatchLabel(String),
    /// A serialized group key could not be parsed.
    #[error("invalid group key: {0}")]
    InvalidGroupKey(String),
    /// Store communication failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The record source could not be read.
    #[error("failed to read {path}: {source}")]
    Source {
        /// Input file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A pipeline task panicked or was aborted.
    #[error("pipeline stage '{stage}' failed: {message}")]
    Stage {
        /// Stage name.
        stage: &'static str,
        /// Description of the failure.
        message: String,
    },
}

impl ImportError {
    /// Recoverable errors are logged and the offending record skipped;
    /// everything else terminates the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ImportError::Entity(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_errors_are_recoverable() {
        let err = ImportError::from(EntityError::EmptyLabelSet);
        assert!(err.is_recoverable());
        assert!(!ImportError::UnknownMatchLabel("Ghost".into()).is_recoverable());
        assert!(!ImportError::from(StoreError::Transient("reset".into())).is_recoverable());
    }

    #[test]
    fn mismatch_message_names_role() {
        let err = EntityError::EndpointLabelMismatch {
            role: EndpointRole::Start,
            expected: "User".into(),
            actual: vec!["Event".into()],
        };
        assert_eq!(
            err.to_string(),
            "expected start node to have label 'User', got [\"Event\"]"
        );
    }
}
