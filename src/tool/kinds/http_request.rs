//! `http-request` tool kind: a parameterized REST call bound to an
//! [`crate::source::HttpCapability`] source.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::params::{ClaimMap, ParameterDeclaration, ParameterValue, bind, manifest_schema};
use crate::source::{HttpCapability, QueryResult, Source, SourceRegistry, require_http};
use crate::tool::{CommonToolConfig, Tool, ToolConstructor};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct HttpRequestConfig {
    #[serde(flatten)]
    common: CommonToolConfig,
    method: String,
    path: String,
}

/// Constructs [`HttpRequestTool`] instances from a `kind: http-request` block.
pub struct HttpRequestConstructor;

#[async_trait]
impl ToolConstructor for HttpRequestConstructor {
    async fn construct(&self, name: &str, config: &serde_yaml::Value, sources: &SourceRegistry) -> Result<Arc<dyn Tool>> {
        let cfg: HttpRequestConfig = serde_yaml::from_value(config.clone())
            .map_err(|e| Error::Config(format!("tool '{name}': {e}")))?;
        let source = sources
            .get(&cfg.common.source)
            .ok_or_else(|| Error::Config(format!("tool '{name}': unknown source '{}'", cfg.common.source)))?;
        require_http(source.as_ref(), "http")?;

        let declarations = ParameterDeclaration::declare_all(&cfg.common.parameters)?;
        let write_class = !matches!(cfg.method.to_uppercase().as_str(), "GET" | "HEAD" | "OPTIONS");

        Ok(Arc::new(HttpRequestTool {
            name: name.to_string(),
            source,
            method: cfg.method,
            path: cfg.path,
            declarations,
            description: cfg.common.description,
            auth_required: cfg.common.auth_required,
            read_only: cfg.common.read_only,
            write_class,
        }))
    }
}

/// A configured, invocable HTTP request.
pub struct HttpRequestTool {
    name: String,
    source: Arc<dyn Source>,
    method: String,
    path: String,
    declarations: Vec<ParameterDeclaration>,
    description: String,
    auth_required: Vec<String>,
    read_only: bool,
    write_class: bool,
}

impl HttpRequestTool {
    fn render_path(&self, param_values: &[ParameterValue]) -> String {
        let mut path = self.path.clone();
        for value in param_values {
            let token = format!("{{{}}}", value.name);
            if path.contains(&token) {
                let substitution = match &value.value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                path = path.replace(&token, &substitution);
            }
        }
        path
    }
}

#[async_trait]
impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> &str {
        "http-request"
    }
    fn is_read_only(&self) -> bool {
        self.read_only
    }
    fn auth_required(&self) -> &[String] {
        &self.auth_required
    }
    fn is_write_class(&self, _param_values: &[ParameterValue]) -> bool {
        self.write_class
    }
    fn requires_client_authorization(&self) -> bool {
        false
    }
    fn parse_params(&self, payload: &serde_json::Map<String, Value>, claims: &ClaimMap) -> Result<Vec<ParameterValue>> {
        bind(&self.declarations, payload, claims)
    }
    async fn invoke(&self, param_values: &[ParameterValue], _access_token: Option<&str>) -> Result<QueryResult> {
        let path = self.render_path(param_values);
        let is_get = self.method.eq_ignore_ascii_case("GET") || self.method.eq_ignore_ascii_case("HEAD");

        let remaining: Vec<&ParameterValue> = param_values
            .iter()
            .filter(|v| !self.path.contains(&format!("{{{}}}", v.name)))
            .collect();

        let (query, body): (Vec<(String, Value)>, Option<Value>) = if is_get {
            (remaining.iter().map(|v| (v.name.clone(), v.value.clone())).collect(), None)
        } else {
            let mut obj = serde_json::Map::new();
            for v in remaining {
                obj.insert(v.name.clone(), v.value.clone());
            }
            (Vec::new(), Some(Value::Object(obj)))
        };

        let http = require_http(self.source.as_ref(), "http")?;
        let result = http.call(&self.method, &path, &query, body).await?;
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
                read_only_hint: Some(self.read_only),
                destructive_hint: Some(self.write_class),
                idempotent_hint: None,
                open_world_hint: Some(true),
            }),
        }
    }
}
