//! Source Registry: a process-wide mapping from *source kind* to a
//! constructor, producing configured [`Source`] handles that each expose a
//! kind-specific capability.
//!
//! Kinds register themselves exactly once at program start (see
//! [`register_default_kinds`]); a duplicate registration is a fatal
//! programming error, matching the design document's "duplicate registration
//! is a fatal programming error."

pub mod kinds;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::{Error, Result};

/// A configured handle to one backend. Shared by every tool that references
/// it by name; created once at config load, never mutated after init
/// (internal pools may themselves be concurrent-safe).
///
/// Capabilities are modeled as narrow, single-method interfaces (per the
/// design document) rather than a single fat trait: a concrete `Source`
/// overrides the `as_*` accessor(s) for whichever capabilities it exposes,
/// and tool constructors perform a capability assertion via
/// [`require_sql`]/[`require_http`]/[`require_mcp`]/[`require_graph`],
/// rejecting non-compatible sources with a *source kind mismatch* error.
pub trait Source: Send + Sync {
    /// Unique name this source was registered under.
    fn name(&self) -> &str;
    /// The kind tag used to construct this source (`sqlite`, `http`, ...).
    fn kind(&self) -> &str;
    /// Expose a [`SqlCapability`], if this source has one.
    fn as_sql(&self) -> Option<&dyn SqlCapability> {
        None
    }
    /// Expose an [`HttpCapability`], if this source has one.
    fn as_http(&self) -> Option<&dyn HttpCapability> {
        None
    }
    /// Expose an [`McpCapability`], if this source has one.
    fn as_mcp(&self) -> Option<&dyn McpCapability> {
        None
    }
    /// Expose a [`GraphCapability`], if this source has one.
    fn as_graph(&self) -> Option<&dyn GraphCapability> {
        None
    }
}

/// The uniform shape of a source/tool execution result: rows become an
/// ordered sequence of key-to-value maps preserving column order; a scalar
/// result is wrapped as a single row with a single `value` column.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Column names, in order.
    pub columns: Vec<String>,
    /// Rows, each an ordered map over `columns`.
    pub rows: Vec<serde_json::Map<String, Value>>,
}

impl QueryResult {
    /// Wrap a single scalar value as a one-row, one-column result.
    #[must_use]
    pub fn scalar(value: Value) -> Self {
        let mut row = serde_json::Map::new();
        row.insert("value".to_string(), value);
        Self {
            columns: vec!["value".to_string()],
            rows: vec![row],
        }
    }

    /// Truncate to at most `max_rows` rows, returning whether truncation
    /// occurred.
    pub fn truncate(&mut self, max_rows: usize) -> bool {
        if self.rows.len() > max_rows {
            self.rows.truncate(max_rows);
            true
        } else {
            false
        }
    }
}

/// Capability: execute parameterized SQL and arbitrary SQL text against a
/// relational source. The only capability the dynamic tool manager's
/// arbitrary-SQL executor currently dispatches to.
#[async_trait]
pub trait SqlCapability: Send + Sync {
    /// Execute `statement` with positional `params`, honoring `timeout` and
    /// truncating the result at `max_rows` when `Some`.
    async fn execute(
        &self,
        statement: &str,
        params: &[Value],
        max_rows: Option<usize>,
        timeout: std::time::Duration,
    ) -> Result<QueryResult>;
}

/// Capability: issue a single HTTP request, with the method/path/query/body
/// already substituted from bound parameters by the calling tool.
#[async_trait]
pub trait HttpCapability: Send + Sync {
    /// Perform an HTTP call and return the decoded JSON body (or a
    /// `{"text": ...}` wrapper for non-JSON responses).
    async fn call(
        &self,
        method: &str,
        path: &str,
        query: &[(String, Value)],
        body: Option<Value>,
    ) -> Result<Value>;
}

/// Capability: forward a `tools/call` to a peer MCP server.
#[async_trait]
pub trait McpCapability: Send + Sync {
    /// Invoke `tool_name` on the peer with `arguments`, returning its raw
    /// JSON-RPC result payload.
    async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<Value>;
}

/// Capability: run a Cypher query against a graph store. Keeps the neo4j
/// schema cache mentioned in the Non-goals as local per-tool state.
#[async_trait]
pub trait GraphCapability: Send + Sync {
    /// Run `query` and return its rows.
    async fn run_cypher(&self, query: &str) -> Result<QueryResult>;
}

/// A source-kind constructor: decodes a YAML block into a kind-specific
/// config and returns a configured [`Source`].
#[async_trait]
pub trait SourceConstructor: Send + Sync {
    /// Construct a source named `name` from its YAML configuration block.
    async fn construct(&self, name: &str, config: &serde_yaml::Value) -> Result<Arc<dyn Source>>;
}

/// Process-wide kind -> constructor map, plus the live, named source
/// instances produced from configuration.
pub struct SourceRegistry {
    constructors: DashMap<String, Arc<dyn SourceConstructor>>,
    sources: DashMap<String, Arc<dyn Source>>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceRegistry {
    /// Create an empty registry with no kinds registered.
    #[must_use]
    pub fn new() -> Self {
        Self {
            constructors: DashMap::new(),
            sources: DashMap::new(),
        }
    }

    /// Register a source-kind constructor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if `kind` is already registered.
    pub fn register_kind(
        &self,
        kind: impl Into<String>,
        constructor: Arc<dyn SourceConstructor>,
    ) -> Result<()> {
        let kind = kind.into();
        if self.constructors.contains_key(&kind) {
            return Err(Error::Internal(format!(
                "duplicate source kind registration: {kind}"
            )));
        }
        self.constructors.insert(kind, constructor);
        Ok(())
    }

    /// Build and register a source instance named `name` from its `kind` +
    /// rest-of-block YAML value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the kind is unregistered or the name is
    /// already taken, or whatever error the kind's constructor returns.
    pub async fn build(&self, name: &str, config: &serde_yaml::Value) -> Result<()> {
        if self.sources.contains_key(name) {
            return Err(Error::Config(format!("duplicate source name: {name}")));
        }
        let kind = config
            .get("kind")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Config(format!("source '{name}' missing 'kind'")))?;
        let constructor = self
            .constructors
            .get(kind)
            .ok_or_else(|| Error::Config(format!("unregistered source kind: {kind}")))?
            .clone();
        let source = constructor.construct(name, config).await?;
        self.sources.insert(name.to_string(), source);
        Ok(())
    }

    /// Look up a configured source by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Source>> {
        self.sources.get(name).map(|e| e.clone())
    }

    /// Names of all configured sources.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.sources.iter().map(|e| e.key().clone()).collect()
    }
}

fn mismatch(source: &dyn Source, accepted_kinds: &str) -> Error {
    Error::Config(format!(
        "source '{}' (kind '{}') does not expose the required capability; accepted kinds: {}",
        source.name(),
        source.kind(),
        accepted_kinds
    ))
}

/// Assert `source` exposes [`SqlCapability`].
///
/// # Errors
///
/// Returns [`Error::Config`] naming `accepted_kinds` otherwise.
pub fn require_sql<'a>(source: &'a dyn Source, accepted_kinds: &str) -> Result<&'a dyn SqlCapability> {
    source.as_sql().ok_or_else(|| mismatch(source, accepted_kinds))
}

/// Assert `source` exposes [`HttpCapability`].
///
/// # Errors
///
/// Returns [`Error::Config`] naming `accepted_kinds` otherwise.
pub fn require_http<'a>(source: &'a dyn Source, accepted_kinds: &str) -> Result<&'a dyn HttpCapability> {
    source.as_http().ok_or_else(|| mismatch(source, accepted_kinds))
}

/// Assert `source` exposes [`McpCapability`].
///
/// # Errors
///
/// Returns [`Error::Config`] naming `accepted_kinds` otherwise.
pub fn require_mcp<'a>(source: &'a dyn Source, accepted_kinds: &str) -> Result<&'a dyn McpCapability> {
    source.as_mcp().ok_or_else(|| mismatch(source, accepted_kinds))
}

/// Assert `source` exposes [`GraphCapability`].
///
/// # Errors
///
/// Returns [`Error::Config`] naming `accepted_kinds` otherwise.
pub fn require_graph<'a>(source: &'a dyn Source, accepted_kinds: &str) -> Result<&'a dyn GraphCapability> {
    source.as_graph().ok_or_else(|| mismatch(source, accepted_kinds))
}

/// Register every built-in source kind exactly once. Call this before
/// loading configuration.
///
/// # Errors
///
/// Propagates [`Error::Internal`] if a kind is somehow already registered
/// (would indicate a programming error in this function itself).
pub fn register_default_kinds(registry: &SourceRegistry) -> Result<()> {
    registry.register_kind("sqlite", Arc::new(kinds::sqlite::SqliteConstructor))?;
    registry.register_kind("http", Arc::new(kinds::http::HttpConstructor))?;
    registry.register_kind("mcp-server", Arc::new(kinds::mcp_server::McpServerConstructor))?;
    registry.register_kind("graph", Arc::new(kinds::graph::GraphConstructor))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopSource;
    impl Source for NoopSource {
        fn name(&self) -> &str {
            "noop"
        }
        fn kind(&self) -> &str {
            "noop"
        }
    }

    struct NoopConstructor;
    #[async_trait]
    impl SourceConstructor for NoopConstructor {
        async fn construct(&self, _name: &str, _config: &serde_yaml::Value) -> Result<Arc<dyn Source>> {
            Ok(Arc::new(NoopSource))
        }
    }

    #[tokio::test]
    async fn duplicate_kind_registration_is_fatal() {
        let registry = SourceRegistry::new();
        registry.register_kind("noop", Arc::new(NoopConstructor)).unwrap();
        let err = registry.register_kind("noop", Arc::new(NoopConstructor)).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[tokio::test]
    async fn build_rejects_unregistered_kind() {
        let registry = SourceRegistry::new();
        let cfg: serde_yaml::Value = serde_yaml::from_str("kind: bogus\n").unwrap();
        let err = registry.build("s1", &cfg).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn build_rejects_duplicate_name() {
        let registry = SourceRegistry::new();
        registry.register_kind("noop", Arc::new(NoopConstructor)).unwrap();
        let cfg: serde_yaml::Value = serde_yaml::from_str("kind: noop\n").unwrap();
        registry.build("s1", &cfg).await.unwrap();
        let err = registry.build("s1", &cfg).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn capability_mismatch_names_accepted_kinds() {
        let registry = SourceRegistry::new();
        registry.register_kind("noop", Arc::new(NoopConstructor)).unwrap();
        let cfg: serde_yaml::Value = serde_yaml::from_str("kind: noop\n").unwrap();
        registry.build("s1", &cfg).await.unwrap();
        let source = registry.get("s1").unwrap();
        let err = require_sql(source.as_ref(), "sqlite").unwrap_err();
        assert!(err.to_string().contains("sqlite"));
    }
}
