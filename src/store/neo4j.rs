use async_trait::async_trait;
use neo4rs::{query, BoltType, ConfigBuilder, Graph};
use tracing::{debug, info};

use super::{GraphStore, WriteSummary};
use crate::config::Neo4jConfig;
use crate::cypher::BatchOperation;
use crate::error::StoreError;

/// Neo4j backend speaking Bolt through `neo4rs`.
pub struct Neo4jStore {
    graph: Graph,
}

impl Neo4jStore {
    /// Connects and verifies the server answers a trivial query.
    pub async fn connect(config: &Neo4jConfig) -> Result<Self, StoreError> {
        let driver_config = ConfigBuilder::default()
            .uri(config.uri.as_str())
            .user(config.user.as_str())
            .password(config.password.as_str())
            .db(config.database.as_str())
            .max_connections(config.max_connections)
            .build()
            .map_err(map_error)?;
        let graph = Graph::connect(driver_config).await.map_err(map_error)?;
        graph.run(query("RETURN 1")).await.map_err(map_error)?;
        info!(uri = %config.uri, database = %config.database, "connected to neo4j");
        Ok(Self { graph })
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn bootstrap(&self, statements: &[&str]) -> Result<(), StoreError> {
        for statement in statements {
            debug!(%statement, "bootstrapping");
            self.graph.run(query(statement)).await.map_err(map_error)?;
        }
        Ok(())
    }

    async fn execute(&self, operation: &BatchOperation) -> Result<WriteSummary, StoreError> {
        let statement =
            query(&operation.cypher()).param(operation.param_name(), bolt_parameter(operation)?);
        self.graph.run(statement).await.map_err(map_error)?;
        Ok(WriteSummary {
            rows: operation.len(),
            ..WriteSummary::default()
        })
    }
}

fn map_error(err: neo4rs::Error) -> StoreError {
    match err {
        neo4rs::Error::IOError { .. } | neo4rs::Error::ConnectionError => {
            StoreError::Transient(err.to_string())
        }
        other => StoreError::Rejected(other.to_string()),
    }
}

/// Converts the batch parameter into the Bolt value sent to the server.
///
/// Values Bolt cannot carry (integers above `i64::MAX`) reject the batch.
fn bolt_parameter(operation: &BatchOperation) -> Result<BoltType, StoreError> {
    BoltType::try_from(operation.parameter()).map_err(|err| {
        StoreError::Rejected(format!("cannot encode {operation} parameter: {err}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher::NodeUpsert;
    use serde_json::{json, Value};

    fn upsert(rows: Value) -> BatchOperation {
        let Value::Array(rows) = rows else {
            panic!("expected array");
        };
        BatchOperation::UpsertNodes(NodeUpsert {
            labels: vec!["User".into()],
            match_label: "User".into(),
            match_keys: vec!["pubkey".into()],
            rows: rows
                .into_iter()
                .map(|row| match row {
                    Value::Object(map) => map,
                    other => panic!("expected object, got {other}"),
                })
                .collect(),
        })
    }

    #[test]
    fn batch_parameter_converts_to_list_of_maps() {
        let op = upsert(json!([{"pubkey": "pk1", "rest": ["a", "b"]}, {"pubkey": "pk2"}]));
        let BoltType::List(list) = bolt_parameter(&op).expect("encodes") else {
            panic!("expected list");
        };
        assert_eq!(list.value.len(), 2);
        let BoltType::Map(first) = &list.value[0] else {
            panic!("expected map");
        };
        assert_eq!(first.value.len(), 2);
    }

    #[test]
    fn out_of_range_integers_reject_the_batch() {
        let op = upsert(json!([{"pubkey": "pk1", "kind": u64::MAX}]));
        let err = bolt_parameter(&op).unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
    }

    #[test]
    fn connection_failures_are_transient() {
        assert!(map_error(neo4rs::Error::ConnectionError).is_transient());
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(map_error(neo4rs::Error::IOError { detail: io }).is_transient());
        assert!(!map_error(neo4rs::Error::ConversionError).is_transient());
    }
}
