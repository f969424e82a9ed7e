//! `graph` source kind: an in-memory Cypher-speaking store.
//!
//! There is no embedded graph database in this dependency stack, so this
//! kind is a deliberately small test-double: it holds nodes/relationships in
//! memory and answers a handful of Cypher shapes well enough to exercise the
//! read-only classifier and the invocation pipeline end-to-end. It also
//! keeps a small schema cache (label/relationship-type/property names seen
//! so far) as local per-source state, the one piece of "neo4j schema cache"
//! behavior the design keeps despite the wider Non-goals.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;

use crate::source::{GraphCapability, QueryResult, Source, SourceConstructor};
use crate::{Error, Result};

#[derive(Debug, Deserialize, Default)]
struct GraphConfig {
    #[serde(default, rename = "seedNodes")]
    seed_nodes: Vec<SeedNode>,
}

#[derive(Debug, Deserialize, Clone)]
struct SeedNode {
    label: String,
    #[serde(default)]
    properties: serde_json::Map<String, Value>,
}

/// Constructs [`GraphSource`] instances from a `kind: graph` block.
pub struct GraphConstructor;

#[async_trait]
impl SourceConstructor for GraphConstructor {
    async fn construct(&self, name: &str, config: &serde_yaml::Value) -> Result<Arc<dyn Source>> {
        let cfg: GraphConfig = serde_yaml::from_value(config.clone())
            .map_err(|e| Error::Config(format!("source '{name}': {e}")))?;

        let mut schema = SchemaCache::default();
        let mut nodes = Vec::with_capacity(cfg.seed_nodes.len());
        for seed in cfg.seed_nodes {
            schema.labels.insert(seed.label.clone());
            for key in seed.properties.keys() {
                schema.properties.insert(key.clone());
            }
            nodes.push(seed);
        }

        Ok(Arc::new(GraphSource {
            name: name.to_string(),
            nodes: RwLock::new(nodes),
            schema: RwLock::new(schema),
        }))
    }
}

#[derive(Debug, Default)]
struct SchemaCache {
    labels: BTreeSet<String>,
    properties: BTreeSet<String>,
}

/// A named handle to an in-memory graph store.
pub struct GraphSource {
    name: String,
    nodes: RwLock<Vec<SeedNode>>,
    schema: RwLock<SchemaCache>,
}

impl Source for GraphSource {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> &str {
        "graph"
    }
    fn as_graph(&self) -> Option<&dyn GraphCapability> {
        Some(self)
    }
}

impl GraphSource {
    /// Labels and property keys observed so far, for introspection tools.
    #[must_use]
    pub fn schema_snapshot(&self) -> (Vec<String>, Vec<String>) {
        let schema = self.schema.read();
        (
            schema.labels.iter().cloned().collect(),
            schema.properties.iter().cloned().collect(),
        )
    }
}

#[async_trait]
impl GraphCapability for GraphSource {
    async fn run_cypher(&self, query: &str) -> Result<QueryResult> {
        let trimmed = query.trim();
        let upper = trimmed.to_uppercase();

        if upper.starts_with("MATCH") && upper.contains("RETURN") {
            let nodes = self.nodes.read();
            let rows: Vec<serde_json::Map<String, Value>> = nodes
                .iter()
                .map(|n| {
                    let mut row = serde_json::Map::new();
                    row.insert("label".to_string(), Value::String(n.label.clone()));
                    row.insert(
                        "properties".to_string(),
                        Value::Object(n.properties.clone()),
                    );
                    row
                })
                .collect();
            return Ok(QueryResult {
                columns: vec!["label".to_string(), "properties".to_string()],
                rows,
            });
        }

        if upper.starts_with("CREATE") {
            let label = trimmed
                .split(':')
                .nth(1)
                .and_then(|s| s.split(|c: char| !c.is_alphanumeric() && c != '_').next())
                .unwrap_or("Node")
                .to_string();
            self.schema.write().labels.insert(label.clone());
            self.nodes.write().push(SeedNode {
                label: label.clone(),
                properties: serde_json::Map::new(),
            });
            return Ok(QueryResult::scalar(Value::String(format!(
                "created 1 node with label {label}"
            ))));
        }

        Err(Error::SourceError(format!(
            "{}: unsupported Cypher shape: {trimmed}",
            self.name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_with_seed() -> GraphSource {
        let mut props = serde_json::Map::new();
        props.insert("name".to_string(), Value::String("Alice".to_string()));
        GraphSource {
            name: "g1".to_string(),
            nodes: RwLock::new(vec![SeedNode {
                label: "Person".to_string(),
                properties: props,
            }]),
            schema: RwLock::new(SchemaCache {
                labels: BTreeSet::from(["Person".to_string()]),
                properties: BTreeSet::from(["name".to_string()]),
            }),
        }
    }

    #[tokio::test]
    async fn match_return_yields_seeded_nodes() {
        let source = source_with_seed();
        let result = source
            .run_cypher("MATCH (p:Person) RETURN p")
            .await
            .unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0]["label"], Value::String("Person".to_string()));
    }

    #[tokio::test]
    async fn create_adds_node_and_updates_schema() {
        let source = source_with_seed();
        source.run_cypher("CREATE (:Company {name: 'Acme'})").await.unwrap();
        assert_eq!(source.nodes.read().len(), 2);
        let (labels, _) = source.schema_snapshot();
        assert!(labels.contains(&"Company".to_string()));
    }

    #[tokio::test]
    async fn unsupported_shape_errors() {
        let source = source_with_seed();
        let err = source.run_cypher("FOO BAR").await.unwrap_err();
        assert!(matches!(err, Error::SourceError(_)));
    }
}
