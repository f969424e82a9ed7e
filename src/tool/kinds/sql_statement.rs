//! `sql-statement` tool kind: a parameterized SQL statement bound to a
//! [`crate::source::SqlCapability`] source.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::params::{ClaimMap, ParameterDeclaration, ParameterValue, bind, manifest_schema};
use crate::source::{QueryResult, Source, SourceRegistry, require_sql};
use crate::tool::{CommonToolConfig, Tool, ToolConstructor};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct SqlStatementConfig {
    #[serde(flatten)]
    common: CommonToolConfig,
    statement: String,
    /// Declarations whose bound value is substituted as `{{name}}` text
    /// into the statement literal rather than passed as a positional bind
    /// (for identifiers a driver can't parameterize, e.g. table names).
    #[serde(default, rename = "templateParameters")]
    template_parameters: Vec<crate::params::RawParamDecl>,
    #[serde(default = "default_timeout_secs", rename = "timeoutSecs")]
    timeout_secs: u64,
    #[serde(default, rename = "maxRows")]
    max_rows: Option<usize>,
}

fn default_timeout_secs() -> u64 {
    30
}

/// Constructs [`SqlStatementTool`] instances from a `kind: sql-statement` block.
pub struct SqlStatementConstructor;

#[async_trait]
impl ToolConstructor for SqlStatementConstructor {
    async fn construct(&self, name: &str, config: &serde_yaml::Value, sources: &SourceRegistry) -> Result<Arc<dyn Tool>> {
        let cfg: SqlStatementConfig = serde_yaml::from_value(config.clone())
            .map_err(|e| Error::Config(format!("tool '{name}': {e}")))?;
        let source = sources
            .get(&cfg.common.source)
            .ok_or_else(|| Error::Config(format!("tool '{name}': unknown source '{}'", cfg.common.source)))?;
        require_sql(source.as_ref(), "sqlite")?;

        let positional_decls = ParameterDeclaration::declare_all(&cfg.common.parameters)?;
        let template_decls = ParameterDeclaration::declare_all(&cfg.template_parameters)?;
        let write_class = statement_is_write_class(&cfg.statement);

        Ok(Arc::new(SqlStatementTool {
            name: name.to_string(),
            source,
            statement: cfg.statement,
            positional_decls,
            template_decls,
            description: cfg.common.description,
            auth_required: cfg.common.auth_required,
            read_only: cfg.common.read_only,
            timeout: Duration::from_secs(cfg.timeout_secs),
            max_rows: cfg.max_rows,
            write_class,
        }))
    }
}

fn statement_is_write_class(statement: &str) -> bool {
    let trimmed = statement.trim_start().to_uppercase();
    !(trimmed.starts_with("SELECT") || trimmed.starts_with("WITH") || trimmed.starts_with("EXPLAIN"))
}

/// A configured, invocable SQL statement.
pub struct SqlStatementTool {
    name: String,
    source: Arc<dyn Source>,
    statement: String,
    positional_decls: Vec<ParameterDeclaration>,
    template_decls: Vec<ParameterDeclaration>,
    description: String,
    auth_required: Vec<String>,
    read_only: bool,
    timeout: Duration,
    max_rows: Option<usize>,
    write_class: bool,
}

impl SqlStatementTool {
    fn all_decls(&self) -> Vec<ParameterDeclaration> {
        self.positional_decls
            .iter()
            .chain(self.template_decls.iter())
            .cloned()
            .collect()
    }

    fn render_statement(&self, template_values: &[ParameterValue]) -> String {
        let mut rendered = self.statement.clone();
        for value in template_values {
            let token = format!("{{{{{}}}}}", value.name);
            let substitution = match &value.value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            rendered = rendered.replace(&token, &substitution);
        }
        rendered
    }
}

#[async_trait]
impl Tool for SqlStatementTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> &str {
        "sql-statement"
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
        bind(&self.all_decls(), payload, claims)
    }
    async fn invoke(&self, param_values: &[ParameterValue], _access_token: Option<&str>) -> Result<QueryResult> {
        let split = self.positional_decls.len();
        let (positional, template) = param_values.split_at(split.min(param_values.len()));
        let statement = self.render_statement(template);
        let bind_values: Vec<Value> = positional.iter().map(|v| v.value.clone()).collect();

        let sql = require_sql(self.source.as_ref(), "sqlite")?;
        sql.execute(&statement, &bind_values, self.max_rows, self.timeout).await
    }
    fn manifest(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "parameters": manifest_schema(&self.all_decls()),
            "authRequired": self.auth_required,
            "readOnly": self.read_only,
        })
    }
    fn mcp_manifest(&self) -> crate::protocol::Tool {
        crate::protocol::Tool {
            name: self.name.clone(),
            title: None,
            description: Some(self.description.clone()),
            input_schema: manifest_schema(&self.all_decls()),
            output_schema: None,
            annotations: Some(crate::protocol::ToolAnnotations {
                title: None,
                read_only_hint: Some(self.read_only),
                destructive_hint: Some(!self.read_only),
                idempotent_hint: None,
                open_world_hint: Some(true),
            }),
        }
    }
}
