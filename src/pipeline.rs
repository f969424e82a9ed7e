//! Invocation Pipeline: locate → authorize → parse → read-only gate →
//! execute → normalize → return, tying the static [`ToolRegistry`] and the
//! [`DynamicToolManager`] into one callable surface per §4.4.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use crate::dynamic::DynamicToolManager;
use crate::params::ClaimMap;
use crate::source::QueryResult;
use crate::tool::ToolRegistry;
use crate::{Error, Result};

/// Everything the pipeline needs beyond the payload itself: which auth
/// services the caller has already verified (and their claims), an access
/// token to forward to client-authorized sources, and a deadline.
#[derive(Debug, Default, Clone)]
pub struct InvocationContext {
    /// Auth-service names the caller has a verified session for.
    pub verified_auth_services: Vec<String>,
    /// Per-service claim maps, consulted during parameter binding.
    pub claims: ClaimMap,
    /// Caller-supplied bearer token, forwarded to sources configured for
    /// client-supplied OAuth.
    pub access_token: Option<String>,
    /// Caller-supplied deadline; the tool's own timeout is used if smaller.
    pub deadline: Option<Duration>,
}

/// Ties a [`ToolRegistry`] and a [`DynamicToolManager`] together as one
/// callable invocation surface.
pub struct Pipeline {
    tools: Arc<ToolRegistry>,
    dynamic: Arc<DynamicToolManager>,
}

impl Pipeline {
    /// Build a pipeline over the given static tool registry and dynamic
    /// tool manager.
    #[must_use]
    pub fn new(tools: Arc<ToolRegistry>, dynamic: Arc<DynamicToolManager>) -> Self {
        Self { tools, dynamic }
    }

    /// Invoke a static tool by name with a raw JSON payload.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if `tool_name` isn't registered.
    /// - [`Error::Unauthorized`] if the auth-required set is non-empty and
    ///   disjoint from `ctx.verified_auth_services`.
    /// - [`Error::ParamError`] if the payload fails to parse.
    /// - [`Error::ReadOnlyViolation`] if the tool is `readOnly` but the
    ///   bound invocation is write-class.
    /// - Whatever the tool's own execution returns otherwise.
    pub async fn invoke(&self, tool_name: &str, payload: &Value, ctx: &InvocationContext) -> Result<QueryResult> {
        // 1. Locate.
        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| Error::NotFound(format!("tool: {tool_name}")))?;

        // 2. Authorize.
        if !tool.authorized(&ctx.verified_auth_services) {
            return Err(Error::Unauthorized(format!(
                "tool '{tool_name}' requires one of: {:?}",
                tool.auth_required()
            )));
        }

        // 3. Parse.
        let payload_map = payload
            .as_object()
            .cloned()
            .ok_or_else(|| Error::param("payload", "expected a JSON object"))?;
        let param_values = tool.parse_params(&payload_map, &ctx.claims)?;

        // 4. Read-only gate.
        if tool.is_read_only() && tool.is_write_class(&param_values) {
            return Err(Error::ReadOnlyViolation(tool_name.to_string()));
        }

        // 5. Execute.
        let start = std::time::Instant::now();
        let access_token = ctx.access_token.as_deref();
        let result = tool.invoke(&param_values, access_token).await;
        let elapsed = start.elapsed();

        // 7. Telemetry (step 6, normalize, is handled by the tool/source
        // returning an already-normalized QueryResult).
        match &result {
            Ok(r) => info!(
                tool = tool_name,
                kind = tool.kind(),
                rows = r.rows.len(),
                latency_ms = elapsed.as_millis() as u64,
                status = "ok",
                "tool invocation completed"
            ),
            Err(e) => warn!(
                tool = tool_name,
                kind = tool.kind(),
                latency_ms = elapsed.as_millis() as u64,
                status = "error",
                error = %e,
                "tool invocation failed"
            ),
        }

        result
    }

    /// Invoke a dynamic tool created through [`DynamicToolManager::create`].
    ///
    /// # Errors
    ///
    /// Propagates [`Error::NotFound`] or whatever the bound source returns.
    pub async fn invoke_dynamic(&self, name: &str, params: &[Value], ctx: &InvocationContext) -> Result<QueryResult> {
        self.dynamic.invoke(name, params, ctx.deadline).await
    }

    /// Access the underlying tool registry (e.g. for manifest listing).
    #[must_use]
    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Access the underlying dynamic tool manager (e.g. for admin endpoints).
    #[must_use]
    pub fn dynamic(&self) -> &Arc<DynamicToolManager> {
        &self.dynamic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamic::ManagerConfig;
    use crate::source::{SourceRegistry, register_default_kinds};
    use crate::tool::register_default_kinds as register_default_tool_kinds;

    async fn pipeline_with_sqlite_tool(read_only: bool, statement: &str) -> Pipeline {
        let sources = Arc::new(SourceRegistry::new());
        register_default_kinds(&sources).unwrap();
        let src_cfg: serde_yaml::Value = serde_yaml::from_str("kind: sqlite\ndsn: \"sqlite::memory:\"\n").unwrap();
        sources.build("s1", &src_cfg).await.unwrap();

        let tools = Arc::new(ToolRegistry::new());
        register_default_tool_kinds(&tools).unwrap();
        let tool_cfg: serde_yaml::Value = serde_yaml::from_str(&format!(
            "kind: sql-statement\nsource: s1\ndescription: d\nstatement: \"{statement}\"\nreadOnly: {read_only}\nparameters: []\n"
        ))
        .unwrap();
        tools.build("echo", &tool_cfg, &sources).await.unwrap();

        let dynamic = DynamicToolManager::new(ManagerConfig::default(), sources);
        Pipeline::new(tools, dynamic)
    }

    #[tokio::test]
    async fn invoke_returns_not_found_for_unknown_tool() {
        let pipeline = pipeline_with_sqlite_tool(false, "SELECT 1").await;
        let err = pipeline
            .invoke("missing", &serde_json::json!({}), &InvocationContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn invoke_succeeds_for_read_only_select() {
        let pipeline = pipeline_with_sqlite_tool(true, "SELECT 1 AS one").await;
        let result = pipeline
            .invoke("echo", &serde_json::json!({}), &InvocationContext::default())
            .await
            .unwrap();
        assert_eq!(result.rows[0]["one"], Value::from(1));
    }

    #[tokio::test]
    async fn invoke_rejects_write_statement_on_read_only_tool() {
        let pipeline = pipeline_with_sqlite_tool(true, "CREATE TABLE t(x INTEGER)").await;
        let err = pipeline
            .invoke("echo", &serde_json::json!({}), &InvocationContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReadOnlyViolation(_)));
    }

    #[tokio::test]
    async fn invoke_requires_auth_when_configured() {
        let sources = Arc::new(SourceRegistry::new());
        register_default_kinds(&sources).unwrap();
        let src_cfg: serde_yaml::Value = serde_yaml::from_str("kind: sqlite\ndsn: \"sqlite::memory:\"\n").unwrap();
        sources.build("s1", &src_cfg).await.unwrap();

        let tools = Arc::new(ToolRegistry::new());
        register_default_tool_kinds(&tools).unwrap();
        let tool_cfg: serde_yaml::Value = serde_yaml::from_str(
            "kind: sql-statement\nsource: s1\ndescription: d\nstatement: \"SELECT 1\"\nauthRequired: [google-auth]\nparameters: []\n",
        )
        .unwrap();
        tools.build("gated", &tool_cfg, &sources).await.unwrap();

        let dynamic = DynamicToolManager::new(ManagerConfig::default(), sources);
        let pipeline = Pipeline::new(tools, dynamic);

        let err = pipeline
            .invoke("gated", &serde_json::json!({}), &InvocationContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));

        let ctx = InvocationContext {
            verified_auth_services: vec!["google-auth".to_string()],
            ..Default::default()
        };
        pipeline.invoke("gated", &serde_json::json!({}), &ctx).await.unwrap();
    }
}
