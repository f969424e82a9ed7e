//! Tool Registry: kind-tag → constructor plugin registry producing
//! invocable [`Tool`]s bound to a configured [`crate::source::Source`].

pub mod kinds;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::params::{ClaimMap, ParameterValue};
use crate::source::QueryResult;
use crate::{Error, Result};

/// A named, typed, invocable operation bound to one source.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name this tool was registered under.
    fn name(&self) -> &str;
    /// The kind tag used to construct this tool (`sql-statement`, ...).
    fn kind(&self) -> &str;
    /// Whether this tool is configured `readOnly: true`.
    fn is_read_only(&self) -> bool;
    /// Auth-service names required to invoke this tool. Empty means no
    /// authorization gate.
    fn auth_required(&self) -> &[String];
    /// Whether the bound parameter values represent a write-class
    /// operation. Static for most kinds (decided by the tool's configured
    /// action); dynamic for `cypher-execute`, which classifies the actual
    /// query text at invoke time.
    fn is_write_class(&self, param_values: &[ParameterValue]) -> bool;
    /// True when the source is configured for caller-supplied OAuth rather
    /// than ambient credentials.
    fn requires_client_authorization(&self) -> bool;
    /// Parse a request payload plus claim map into bound parameter values.
    ///
    /// # Errors
    ///
    /// Propagates [`Error::ParamError`].
    fn parse_params(
        &self,
        payload: &serde_json::Map<String, Value>,
        claims: &ClaimMap,
    ) -> Result<Vec<ParameterValue>>;
    /// Execute the tool's bound action on its source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceError`] (or a more specific variant) on
    /// backend failure.
    async fn invoke(
        &self,
        param_values: &[ParameterValue],
        access_token: Option<&str>,
    ) -> Result<QueryResult>;
    /// Human-facing manifest: name, description, parameters, auth-required.
    fn manifest(&self) -> Value;
    /// MCP-facing manifest (JSON-schema `inputSchema`).
    fn mcp_manifest(&self) -> crate::protocol::Tool;
    /// Whether `verified_auth_services` satisfies this tool's auth
    /// requirement (non-empty intersection, or no requirement at all).
    fn authorized(&self, verified_auth_services: &[String]) -> bool {
        let required = self.auth_required();
        required.is_empty()
            || required
                .iter()
                .any(|svc| verified_auth_services.iter().any(|v| v == svc))
    }
}

/// A tool-kind constructor: decodes a YAML block, resolves its source,
/// checks the required capability, and builds the bound [`Tool`].
#[async_trait]
pub trait ToolConstructor: Send + Sync {
    /// Construct a tool named `name` from its YAML configuration block,
    /// resolving its declared `source` from `sources`.
    async fn construct(
        &self,
        name: &str,
        config: &serde_yaml::Value,
        sources: &crate::source::SourceRegistry,
    ) -> Result<Arc<dyn Tool>>;
}

/// Process-wide kind -> constructor map, plus the live, named tool
/// instances produced from configuration.
pub struct ToolRegistry {
    constructors: DashMap<String, Arc<dyn ToolConstructor>>,
    tools: DashMap<String, Arc<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// Create an empty registry with no kinds registered.
    #[must_use]
    pub fn new() -> Self {
        Self {
            constructors: DashMap::new(),
            tools: DashMap::new(),
        }
    }

    /// Register a tool-kind constructor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if `kind` is already registered.
    pub fn register_kind(&self, kind: impl Into<String>, constructor: Arc<dyn ToolConstructor>) -> Result<()> {
        let kind = kind.into();
        if self.constructors.contains_key(&kind) {
            return Err(Error::Internal(format!("duplicate tool kind registration: {kind}")));
        }
        self.constructors.insert(kind, constructor);
        Ok(())
    }

    /// Build and register a tool instance named `name` from its `kind` +
    /// rest-of-block YAML value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the kind is unregistered or the name is
    /// already taken, or whatever error the kind's constructor returns.
    pub async fn build(
        &self,
        name: &str,
        config: &serde_yaml::Value,
        sources: &crate::source::SourceRegistry,
    ) -> Result<()> {
        if self.tools.contains_key(name) {
            return Err(Error::Config(format!("duplicate tool name: {name}")));
        }
        let kind = config
            .get("kind")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Config(format!("tool '{name}' missing 'kind'")))?;
        let constructor = self
            .constructors
            .get(kind)
            .ok_or_else(|| Error::Config(format!("unregistered tool kind: {kind}")))?
            .clone();
        let tool = constructor.construct(name, config, sources).await?;
        self.tools.insert(name.to_string(), tool);
        Ok(())
    }

    /// Look up a configured tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|e| e.clone())
    }

    /// Names of all configured tools.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|e| e.key().clone()).collect()
    }
}

/// Register every built-in tool kind exactly once. Call this before loading
/// configuration.
///
/// # Errors
///
/// Propagates [`Error::Internal`] if a kind is somehow already registered.
pub fn register_default_kinds(registry: &ToolRegistry) -> Result<()> {
    registry.register_kind("sql-statement", Arc::new(kinds::sql_statement::SqlStatementConstructor))?;
    registry.register_kind("http-request", Arc::new(kinds::http_request::HttpRequestConstructor))?;
    registry.register_kind("cypher-execute", Arc::new(kinds::cypher_execute::CypherExecuteConstructor))?;
    registry.register_kind("mcp-invoke", Arc::new(kinds::mcp_invoke::McpInvokeConstructor))?;
    Ok(())
}

/// Shared decode helper: parse the common tool-config fields every kind
/// carries (`source`, `description`, `parameters`, `authRequired`,
/// `readOnly`).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CommonToolConfig {
    pub source: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<crate::params::RawParamDecl>,
    #[serde(default, rename = "authRequired")]
    pub auth_required: Vec<String>,
    #[serde(default, rename = "readOnly")]
    pub read_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopTool;
    #[async_trait]
    impl Tool for NoopTool {
        fn name(&self) -> &str {
            "noop"
        }
        fn kind(&self) -> &str {
            "noop"
        }
        fn is_read_only(&self) -> bool {
            false
        }
        fn auth_required(&self) -> &[String] {
            &[]
        }
        fn is_write_class(&self, _param_values: &[ParameterValue]) -> bool {
            false
        }
        fn requires_client_authorization(&self) -> bool {
            false
        }
        fn parse_params(
            &self,
            _payload: &serde_json::Map<String, Value>,
            _claims: &ClaimMap,
        ) -> Result<Vec<ParameterValue>> {
            Ok(vec![])
        }
        async fn invoke(&self, _param_values: &[ParameterValue], _access_token: Option<&str>) -> Result<QueryResult> {
            Ok(QueryResult::scalar(Value::Null))
        }
        fn manifest(&self) -> Value {
            Value::Null
        }
        fn mcp_manifest(&self) -> crate::protocol::Tool {
            crate::protocol::Tool {
                name: "noop".to_string(),
                title: None,
                description: None,
                input_schema: Value::Null,
                output_schema: None,
                annotations: None,
            }
        }
    }

    struct NoopConstructor;
    #[async_trait]
    impl ToolConstructor for NoopConstructor {
        async fn construct(
            &self,
            _name: &str,
            _config: &serde_yaml::Value,
            _sources: &crate::source::SourceRegistry,
        ) -> Result<Arc<dyn Tool>> {
            Ok(Arc::new(NoopTool))
        }
    }

    #[tokio::test]
    async fn duplicate_kind_registration_is_fatal() {
        let registry = ToolRegistry::new();
        registry.register_kind("noop", Arc::new(NoopConstructor)).unwrap();
        let err = registry.register_kind("noop", Arc::new(NoopConstructor)).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[tokio::test]
    async fn authorized_requires_intersection() {
        struct GatedTool(Vec<String>);
        #[async_trait]
        impl Tool for GatedTool {
            fn name(&self) -> &str {
                "gated"
            }
            fn kind(&self) -> &str {
                "noop"
            }
            fn is_read_only(&self) -> bool {
                false
            }
            fn auth_required(&self) -> &[String] {
                &self.0
            }
            fn is_write_class(&self, _param_values: &[ParameterValue]) -> bool {
                false
            }
            fn requires_client_authorization(&self) -> bool {
                false
            }
            fn parse_params(
                &self,
                _payload: &serde_json::Map<String, Value>,
                _claims: &ClaimMap,
            ) -> Result<Vec<ParameterValue>> {
                Ok(vec![])
            }
            async fn invoke(&self, _: &[ParameterValue], _: Option<&str>) -> Result<QueryResult> {
                Ok(QueryResult::scalar(Value::Null))
            }
            fn manifest(&self) -> Value {
                Value::Null
            }
            fn mcp_manifest(&self) -> crate::protocol::Tool {
                crate::protocol::Tool {
                    name: "gated".to_string(),
                    title: None,
                    description: None,
                    input_schema: Value::Null,
                    output_schema: None,
                    annotations: None,
                }
            }
        }

        let tool = GatedTool(vec!["google-auth".to_string()]);
        assert!(!tool.authorized(&[]));
        assert!(tool.authorized(&["google-auth".to_string()]));
    }
}
