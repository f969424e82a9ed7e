//! `mcp-server` source kind: wraps a [`Transport`] (stdio subprocess or HTTP)
//! to an embedded MCP peer, exposing [`McpCapability`] so the `mcp-invoke`
//! tool kind can forward `tools/call` frames to it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::source::{McpCapability, Source, SourceConstructor};
use crate::transport::{HttpTransport, StdioTransport, Transport};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
enum McpServerConfig {
    Stdio {
        command: String,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default)]
        cwd: Option<String>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default = "default_timeout_secs", rename = "timeoutSecs")]
        timeout_secs: u64,
    },
}

fn default_timeout_secs() -> u64 {
    30
}

/// Constructs [`McpServerSource`] instances from a `kind: mcp-server` block.
pub struct McpServerConstructor;

#[async_trait]
impl SourceConstructor for McpServerConstructor {
    async fn construct(&self, name: &str, config: &serde_yaml::Value) -> Result<Arc<dyn Source>> {
        let cfg: McpServerConfig = serde_yaml::from_value(config.clone())
            .map_err(|e| Error::Config(format!("source '{name}': {e}")))?;

        let transport: Arc<dyn Transport> = match cfg {
            McpServerConfig::Stdio { command, env, cwd } => {
                let transport = StdioTransport::new(&command, env, cwd);
                transport
                    .start()
                    .await
                    .map_err(|e| Error::Config(format!("source '{name}': {e}")))?;
                transport
            }
            McpServerConfig::Http {
                url,
                headers,
                timeout_secs,
            } => {
                let transport = HttpTransport::new(&url, headers, Duration::from_secs(timeout_secs))
                    .map_err(|e| Error::Config(format!("source '{name}': {e}")))?;
                transport
                    .initialize()
                    .await
                    .map_err(|e| Error::Config(format!("source '{name}': {e}")))?;
                transport
            }
        };

        Ok(Arc::new(McpServerSource {
            name: name.to_string(),
            transport,
        }))
    }
}

/// A named handle to a peer MCP server.
pub struct McpServerSource {
    name: String,
    transport: Arc<dyn Transport>,
}

impl Source for McpServerSource {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> &str {
        "mcp-server"
    }
    fn as_mcp(&self) -> Option<&dyn McpCapability> {
        Some(self)
    }
}

#[async_trait]
impl McpCapability for McpServerSource {
    async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<Value> {
        let response = self
            .transport
            .request(
                "tools/call",
                Some(serde_json::json!({ "name": tool_name, "arguments": arguments })),
            )
            .await?;
        if let Some(error) = response.error {
            return Err(Error::SourceError(format!(
                "{}: peer returned {}: {}",
                self.name, error.code, error.message
            )));
        }
        response
            .result
            .ok_or_else(|| Error::SourceError(format!("{}: empty tools/call result", self.name)))
    }
}
