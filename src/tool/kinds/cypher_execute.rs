//! `cypher-execute` tool kind: runs a caller-supplied Cypher query against a
//! [`crate::source::GraphCapability`] source, classified at invoke time for
//! the read-only gate.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::classify::classify_cypher;
use crate::params::{ClaimMap, ParameterDeclaration, ParameterValue, bind, manifest_schema};
use crate::source::{GraphCapability, QueryResult, Source, SourceRegistry, require_graph};
use crate::tool::{CommonToolConfig, Tool, ToolConstructor};
use crate::{Error, Result};

const QUERY_PARAM: &str = "query";

#[derive(Debug, Deserialize)]
struct CypherExecuteConfig {
    #[serde(flatten)]
    common: CommonToolConfig,
}

/// Constructs [`CypherExecuteTool`] instances from a `kind: cypher-execute` block.
pub struct CypherExecuteConstructor;

#[async_trait]
impl ToolConstructor for CypherExecuteConstructor {
    async fn construct(&self, name: &str, config: &serde_yaml::Value, sources: &SourceRegistry) -> Result<Arc<dyn Tool>> {
        let cfg: CypherExecuteConfig = serde_yaml::from_value(config.clone())
            .map_err(|e| Error::Config(format!("tool '{name}': {e}")))?;
        let source = sources
            .get(&cfg.common.source)
            .ok_or_else(|| Error::Config(format!("tool '{name}': unknown source '{}'", cfg.common.source)))?;
        require_graph(source.as_ref(), "graph")?;

        let mut declarations = ParameterDeclaration::declare_all(&cfg.common.parameters)?;
        if !declarations.iter().any(|d| d.name == QUERY_PARAM) {
            declarations.push(ParameterDeclaration {
                name: QUERY_PARAM.to_string(),
                param_type: crate::params::ParamType::String,
                description: "Cypher query text".to_string(),
                required: true,
                default: None,
                auth_services: vec![],
            });
        }

        Ok(Arc::new(CypherExecuteTool {
            name: name.to_string(),
            source,
            declarations,
            description: cfg.common.description,
            auth_required: cfg.common.auth_required,
            read_only: cfg.common.read_only,
        }))
    }
}

/// A configured, invocable Cypher query runner.
pub struct CypherExecuteTool {
    name: String,
    source: Arc<dyn Source>,
    declarations: Vec<ParameterDeclaration>,
    description: String,
    auth_required: Vec<String>,
    read_only: bool,
}

impl CypherExecuteTool {
    fn query_text<'a>(&self, param_values: &'a [ParameterValue]) -> Option<&'a str> {
        param_values
            .iter()
            .find(|v| v.name == QUERY_PARAM)
            .and_then(|v| v.value.as_str())
    }
}

#[async_trait]
impl Tool for CypherExecuteTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> &str {
        "cypher-execute"
    }
    fn is_read_only(&self) -> bool {
        self.read_only
    }
    fn auth_required(&self) -> &[String] {
        &self.auth_required
    }
    fn is_write_class(&self, param_values: &[ParameterValue]) -> bool {
        self.query_text(param_values)
            .is_some_and(|q| classify_cypher(q).is_write())
    }
    fn requires_client_authorization(&self) -> bool {
        false
    }
    fn parse_params(&self, payload: &serde_json::Map<String, Value>, claims: &ClaimMap) -> Result<Vec<ParameterValue>> {
        bind(&self.declarations, payload, claims)
    }
    async fn invoke(&self, param_values: &[ParameterValue], _access_token: Option<&str>) -> Result<QueryResult> {
        let query = self
            .query_text(param_values)
            .ok_or_else(|| Error::param(QUERY_PARAM, "expected type string"))?;
        let graph = require_graph(self.source.as_ref(), "graph")?;
        graph.run_cypher(query).await
    }
    fn manifest(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "parameters": manifest_schema(&self.declarations),
            "authRequired": self.auth_required,
            "readOnly": self.read_only,
        })
    }
    fn mcp_manifest(&self) -> crate::protocol::Tool {
        crate::protocol::Tool {
            name: self.name.clone(),
            title: None,
            description: Some(self.description.clone()),
            input_schema: manifest_schema(&self.declarations),
            output_schema: None,
            annotations: Some(crate::protocol::ToolAnnotations {
                title: None,
                read_only_hint: Some(self.read_only),
                destructive_hint: None,
                idempotent_hint: None,
                open_world_hint: Some(true),
            }),
        }
    }
}
