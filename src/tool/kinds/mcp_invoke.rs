//! `mcp-invoke` tool kind: forwards a `tools/call` to a peer MCP server
//! bound via a [`crate::source::McpCapability`] source.
//!
//! The peer's own write/read semantics are opaque to this gateway, so an
//! `mcp-invoke` tool is always treated as write-class: a `readOnly: true`
//! configuration on this kind will always trip the pipeline's read-only
//! gate. Callers who need a read-only MCP-backed tool should mark the
//! *wrapping* static tool `readOnly: false` and rely on the peer's own
//! authorization instead.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::params::{ClaimMap, ParameterDeclaration, ParameterValue, bind, manifest_schema};
use crate::source::{McpCapability, QueryResult, Source, SourceRegistry, require_mcp};
use crate::tool::{CommonToolConfig, Tool, ToolConstructor};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct McpInvokeConfig {
    #[serde(flatten)]
    common: CommonToolConfig,
    /// Name of the tool to invoke on the peer MCP server.
    #[serde(rename = "remoteTool")]
    remote_tool: String,
}

/// Constructs [`McpInvokeTool`] instances from a `kind: mcp-invoke` block.
pub struct McpInvokeConstructor;

#[async_trait]
impl ToolConstructor for McpInvokeConstructor {
    async fn construct(&self, name: &str, config: &serde_yaml::Value, sources: &SourceRegistry) -> Result<Arc<dyn Tool>> {
        let cfg: McpInvokeConfig = serde_yaml::from_value(config.clone())
            .map_err(|e| Error::Config(format!("tool '{name}': {e}")))?;
        let source = sources
            .get(&cfg.common.source)
            .ok_or_else(|| Error::Config(format!("tool '{name}': unknown source '{}'", cfg.common.source)))?;
        require_mcp(source.as_ref(), "mcp-server")?;

        let declarations = ParameterDeclaration::declare_all(&cfg.common.parameters)?;

        Ok(Arc::new(McpInvokeTool {
            name: name.to_string(),
            source,
            remote_tool: cfg.remote_tool,
            declarations,
            description: cfg.common.description,
            auth_required: cfg.common.auth_required,
            read_only: cfg.common.read_only,
        }))
    }
}

/// A configured, invocable forward to a peer MCP tool.
pub struct McpInvokeTool {
    name: String,
    source: Arc<dyn Source>,
    remote_tool: String,
    declarations: Vec<ParameterDeclaration>,
    description: String,
    auth_required: Vec<String>,
    read_only: bool,
}

#[async_trait]
impl Tool for McpInvokeTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> &str {
        "mcp-invoke"
    }
    fn is_read_only(&self) -> bool {
        self.read_only
    }
    fn auth_required(&self) -> &[String] {
        &self.auth_required
    }
    fn is_write_class(&self, _param_values: &[ParameterValue]) -> bool {
        true
    }
    fn requires_client_authorization(&self) -> bool {
        false
    }
    fn parse_params(&self, payload: &serde_json::Map<String, Value>, claims: &ClaimMap) -> Result<Vec<ParameterValue>> {
        bind(&self.declarations, payload, claims)
    }
    async fn invoke(&self, param_values: &[ParameterValue], _access_token: Option<&str>) -> Result<QueryResult> {
        let mut arguments = serde_json::Map::new();
        for v in param_values {
            arguments.insert(v.name.clone(), v.value.clone());
        }
        let mcp = require_mcp(self.source.as_ref(), "mcp-server")?;
        let result = mcp.call_tool(&self.remote_tool, Value::Object(arguments)).await?;
        Ok(QueryResult::scalar(result))
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
                read_only_hint: Some(false),
                destructive_hint: Some(true),
                idempotent_hint: None,
                open_world_hint: Some(true),
            }),
        }
    }
}
