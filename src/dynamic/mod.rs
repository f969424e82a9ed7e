//! Dynamic Tool Manager: a concurrent, refcounted registry of tools created
//! at runtime (as opposed to loaded from configuration), plus a standalone
//! arbitrary-SQL bypass executor used by agents that want one-off query
//! access to a SQL source without registering a named tool.
//!
//! Shared-resource policy (matching the design document): the entry map is
//! behind a reader/writer lock; each entry's refCount/lastAccess are behind
//! their own lock, acquired only after the map lock has already granted
//! access to the entry — never the other way around, to avoid lock-ordering
//! inversions between concurrent `create`/`remove` and per-entry
//! acquire/release.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{RwLock, oneshot};
use tracing::{debug, warn};

use crate::source::{QueryResult, SourceRegistry, require_sql};
use crate::{Error, Result};

/// Process-scoped configuration for the dynamic tool manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ManagerConfig {
    /// Maximum number of dynamic tools alive at once.
    pub max_dynamic_tools: usize,
    /// Default execution timeout when a request doesn't specify one.
    #[serde(with = "crate::config::humantime_serde")]
    pub default_timeout: Duration,
    /// Maximum accepted query text length, in characters.
    pub max_query_complexity: usize,
    /// How often the cleanup ticker sweeps for idle entries.
    #[serde(with = "crate::config::humantime_serde")]
    pub cleanup_interval: Duration,
    /// How long a dynamic tool may sit with refCount == 0 before reclamation.
    #[serde(with = "crate::config::humantime_serde")]
    pub idle_ttl: Duration,
    /// Upper bound accepted for a request's `maxRows`.
    pub max_allowed_rows: usize,
    /// Upper bound accepted for a request's `timeout`.
    #[serde(with = "crate::config::humantime_serde")]
    pub max_allowed_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_dynamic_tools: 100,
            default_timeout: Duration::from_secs(30),
            max_query_complexity: 1000,
            cleanup_interval: Duration::from_secs(5 * 60),
            idle_ttl: Duration::from_secs(60 * 60),
            max_allowed_rows: 10_000,
            max_allowed_timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// Request payload for [`DynamicToolManager::create`].
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub name: String,
    pub source_id: String,
    pub query: String,
    pub description: String,
}

/// Request payload for [`DynamicToolManager::execute_arbitrary_sql`].
#[derive(Debug, Clone)]
pub struct ArbitrarySqlRequest {
    pub source_id: String,
    pub query: String,
    #[allow(clippy::struct_field_names)]
    pub params: Vec<Value>,
    pub dry_run: bool,
    pub max_rows: Option<usize>,
    pub timeout: Option<Duration>,
}

struct EntryState {
    ref_count: u64,
    last_access: Instant,
}

/// One named, runtime-created tool.
pub struct DynamicTool {
    pub name: String,
    pub source_id: String,
    pub query: String,
    pub description: String,
    state: Mutex<EntryState>,
}

impl DynamicTool {
    /// Current refCount, for introspection/tests.
    #[must_use]
    pub fn ref_count(&self) -> u64 {
        self.state.lock().ref_count
    }
}

/// Decrements an entry's refCount on drop, regardless of how the holding
/// scope exits (success, error, or the future being cancelled mid-await).
struct RefGuard {
    entry: Arc<DynamicTool>,
}

impl Drop for RefGuard {
    fn drop(&mut self) {
        let mut state = self.entry.state.lock();
        state.ref_count = state.ref_count.saturating_sub(1);
    }
}

/// Concurrent registry of dynamic tools, plus the arbitrary-SQL executor.
pub struct DynamicToolManager {
    config: ManagerConfig,
    sources: Arc<SourceRegistry>,
    entries: RwLock<HashMap<String, Arc<DynamicTool>>>,
    cleanup_shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl DynamicToolManager {
    /// Build a manager bound to `sources`. Does not start the cleanup task;
    /// call [`Self::spawn_cleanup_task`] once after construction.
    #[must_use]
    pub fn new(config: ManagerConfig, sources: Arc<SourceRegistry>) -> Arc<Self> {
        Arc::new(Self {
            config,
            sources,
            entries: RwLock::new(HashMap::new()),
            cleanup_shutdown: Mutex::new(None),
        })
    }

    /// Create a new dynamic tool. The creator holds one reference
    /// (refCount starts at 1) until they call [`Self::release`] — a
    /// freshly-created tool cannot be removed until that happens or the TTL
    /// reclaims it after release.
    ///
    /// # Errors
    ///
    /// [`Error::LimitExceeded`] if the cap is already reached, or
    /// [`Error::Config`] if `name` is already taken.
    pub async fn create(&self, req: CreateRequest) -> Result<Arc<DynamicTool>> {
        if req.query.len() > self.config.max_query_complexity {
            return Err(Error::LimitExceeded(format!(
                "query length {} exceeds max {}",
                req.query.len(),
                self.config.max_query_complexity
            )));
        }

        let mut entries = self.entries.write().await;
        if entries.contains_key(&req.name) {
            return Err(Error::Config(format!("dynamic tool already exists: {}", req.name)));
        }
        if entries.len() >= self.config.max_dynamic_tools {
            return Err(Error::LimitExceeded(format!(
                "dynamic tool cap reached ({})",
                self.config.max_dynamic_tools
            )));
        }

        let tool = Arc::new(DynamicTool {
            name: req.name.clone(),
            source_id: req.source_id,
            query: req.query,
            description: req.description,
            state: Mutex::new(EntryState {
                ref_count: 1,
                last_access: Instant::now(),
            }),
        });
        entries.insert(req.name, tool.clone());
        Ok(tool)
    }

    /// Look up a dynamic tool by name, stamping `lastAccess`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if no such tool exists.
    pub async fn get(&self, name: &str) -> Result<Arc<DynamicTool>> {
        let entries = self.entries.read().await;
        let tool = entries
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("dynamic tool: {name}")))?;
        tool.state.lock().last_access = Instant::now();
        Ok(tool)
    }

    /// Release the caller's hold on `name`, decrementing refCount by one.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if no such tool exists.
    pub async fn release(&self, name: &str) -> Result<()> {
        let entries = self.entries.read().await;
        let tool = entries
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("dynamic tool: {name}")))?;
        let mut state = tool.state.lock();
        state.ref_count = state.ref_count.saturating_sub(1);
        Ok(())
    }

    /// Remove a dynamic tool. Fails if any holder is still pinned.
    ///
    /// # Errors
    ///
    /// [`Error::InUse`] if refCount > 0, [`Error::NotFound`] if absent.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        let tool = entries
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("dynamic tool: {name}")))?;
        if tool.ref_count() > 0 {
            return Err(Error::InUse(format!("dynamic tool still referenced: {name}")));
        }
        entries.remove(name);
        Ok(())
    }

    /// List all currently registered dynamic tool names.
    pub async fn list(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Invoke a named dynamic tool: acquire (increment refCount), execute
    /// against its bound source, release on every exit path (including
    /// cancellation, via [`RefGuard`]'s drop).
    ///
    /// # Errors
    ///
    /// Propagates [`Error::NotFound`] if the tool or its source is missing,
    /// or whatever the source's [`crate::source::SqlCapability`] returns.
    pub async fn invoke(&self, name: &str, params: &[Value], timeout: Option<Duration>) -> Result<QueryResult> {
        let tool = self.get(name).await?;
        tool.state.lock().ref_count += 1;
        let _guard = RefGuard { entry: tool.clone() };

        let source = self
            .sources
            .get(&tool.source_id)
            .ok_or_else(|| Error::NotFound(format!("source: {}", tool.source_id)))?;
        let sql = require_sql(source.as_ref(), "sqlite")?;
        let timeout = timeout.unwrap_or(self.config.default_timeout);
        sql.execute(&tool.query, params, None, timeout).await
    }

    /// Run an ad hoc SQL statement against a source by id, without
    /// registering a persistent dynamic tool. This is the "arbitrary SQL"
    /// bypass path agents use to explore data before committing to a named
    /// tool.
    ///
    /// # Errors
    ///
    /// [`Error::LimitExceeded`] if `max_rows`/`timeout`/query length exceed
    /// the configured caps; otherwise whatever the source's execution
    /// returns.
    pub async fn execute_arbitrary_sql(&self, req: ArbitrarySqlRequest) -> Result<QueryResult> {
        if req.query.len() > self.config.max_query_complexity {
            return Err(Error::LimitExceeded(format!(
                "query length {} exceeds max {}",
                req.query.len(),
                self.config.max_query_complexity
            )));
        }
        if let Some(max_rows) = req.max_rows {
            if max_rows > self.config.max_allowed_rows {
                return Err(Error::LimitExceeded(format!(
                    "maxRows {max_rows} exceeds allowed cap {}",
                    self.config.max_allowed_rows
                )));
            }
        }
        if let Some(timeout) = req.timeout {
            if timeout > self.config.max_allowed_timeout {
                return Err(Error::LimitExceeded(format!(
                    "timeout {timeout:?} exceeds allowed cap {:?}",
                    self.config.max_allowed_timeout
                )));
            }
        }

        if req.dry_run {
            validate_sql_syntax(&req.query)?;
            let mut row = serde_json::Map::new();
            row.insert("status".to_string(), Value::String("valid".to_string()));
            row.insert(
                "message".to_string(),
                Value::String("Query syntax is valid".to_string()),
            );
            return Ok(QueryResult {
                columns: vec!["status".to_string(), "message".to_string()],
                rows: vec![row],
            });
        }

        let source = self
            .sources
            .get(&req.source_id)
            .ok_or_else(|| Error::NotFound(format!("source: {}", req.source_id)))?;
        let sql = require_sql(source.as_ref(), "sqlite")?;
        let timeout = req.timeout.unwrap_or(self.config.default_timeout);
        sql.execute(&req.query, &req.params, req.max_rows, timeout).await
    }

    /// Sweep for entries with `refCount == 0` whose `lastAccess` is older
    /// than the configured idle TTL, removing them. Returns the removed
    /// names. Eventually consistent by design: an entry that goes idle is
    /// reclaimed on a later tick, not immediately.
    pub async fn cleanup(&self) -> Vec<String> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let mut removed = Vec::new();
        entries.retain(|name, tool| {
            let state = tool.state.lock();
            let idle = state.ref_count == 0 && now.duration_since(state.last_access) >= self.config.idle_ttl;
            if idle {
                removed.push(name.clone());
            }
            !idle
        });
        removed
    }

    /// Start the periodic cleanup ticker. At-most-once: a second call is a
    /// no-op (logged), matching the at-most-once-start guarantee.
    pub fn spawn_cleanup_task(self: &Arc<Self>) {
        let mut guard = self.cleanup_shutdown.lock();
        if guard.is_some() {
            warn!("cleanup task already running; ignoring duplicate start");
            return;
        }
        let (tx, mut rx) = oneshot::channel();
        *guard = Some(tx);
        drop(guard);

        let manager = Arc::clone(self);
        let interval = self.config.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = manager.cleanup().await;
                        if !removed.is_empty() {
                            debug!(count = removed.len(), names = ?removed, "reclaimed idle dynamic tools");
                        }
                    }
                    _ = &mut rx => {
                        debug!("dynamic tool cleanup task stopping");
                        break;
                    }
                }
            }
        });
    }

    /// Stop the cleanup ticker. Safe to call repeatedly or if never started.
    pub fn stop_cleanup_task(&self) {
        if let Some(tx) = self.cleanup_shutdown.lock().take() {
            let _ = tx.send(());
        }
    }
}

/// Heuristic, syntax-only validation used by dry-run arbitrary-SQL
/// requests: balanced quotes/parens and a non-empty statement. This never
/// touches the source.
fn validate_sql_syntax(query: &str) -> Result<()> {
    if query.trim().is_empty() {
        return Err(Error::ParamError {
            param: "query".to_string(),
            message: "query must not be empty".to_string(),
        });
    }
    let mut paren_depth: i32 = 0;
    let mut in_single_quote = false;
    let mut chars = query.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_single_quote => in_single_quote = true,
            '\'' if in_single_quote => {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                } else {
                    in_single_quote = false;
                }
            }
            '(' if !in_single_quote => paren_depth += 1,
            ')' if !in_single_quote => paren_depth -= 1,
            _ => {}
        }
        if paren_depth < 0 {
            return Err(Error::ParamError {
                param: "query".to_string(),
                message: "unbalanced parentheses".to_string(),
            });
        }
    }
    if paren_depth != 0 || in_single_quote {
        return Err(Error::ParamError {
            param: "query".to_string(),
            message: "unbalanced parentheses or string literal".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::register_default_kinds;
    use std::sync::Arc;

    async fn manager_with_sqlite(max_dynamic_tools: usize) -> Arc<DynamicToolManager> {
        let registry = Arc::new(SourceRegistry::new());
        register_default_kinds(&registry).unwrap();
        let cfg: serde_yaml::Value =
            serde_yaml::from_str("kind: sqlite\ndsn: \"sqlite::memory:\"\n").unwrap();
        registry.build("s1", &cfg).await.unwrap();

        DynamicToolManager::new(
            ManagerConfig {
                max_dynamic_tools,
                idle_ttl: Duration::from_millis(200),
                ..ManagerConfig::default()
            },
            registry,
        )
    }

    #[tokio::test]
    async fn create_get_release_remove_lifecycle() {
        let manager = manager_with_sqlite(10).await;
        let tool = manager
            .create(CreateRequest {
                name: "t".to_string(),
                source_id: "s1".to_string(),
                query: "SELECT 1".to_string(),
                description: "d".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(tool.ref_count(), 1);

        let fetched = manager.get("t").await.unwrap();
        assert_eq!(fetched.name, "t");

        let err = manager.remove("t").await.unwrap_err();
        assert!(matches!(err, Error::InUse(_)));

        manager.release("t").await.unwrap();
        manager.remove("t").await.unwrap();

        let err = manager.get("t").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn create_respects_cap() {
        let manager = manager_with_sqlite(2).await;
        for i in 0..2 {
            manager
                .create(CreateRequest {
                    name: format!("t{i}"),
                    source_id: "s1".to_string(),
                    query: "SELECT 1".to_string(),
                    description: "d".to_string(),
                })
                .await
                .unwrap();
        }
        let err = manager
            .create(CreateRequest {
                name: "t3".to_string(),
                source_id: "s1".to_string(),
                query: "SELECT 1".to_string(),
                description: "d".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LimitExceeded(_)));
        assert_eq!(manager.list().await.len(), 2);
    }

    #[tokio::test]
    async fn invoke_returns_ref_count_to_pre_burst_value() {
        let manager = manager_with_sqlite(10).await;
        let tool = manager
            .create(CreateRequest {
                name: "t".to_string(),
                source_id: "s1".to_string(),
                query: "SELECT 1 AS one".to_string(),
                description: "d".to_string(),
            })
            .await
            .unwrap();
        manager.release("t").await.unwrap();
        assert_eq!(tool.ref_count(), 0);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move { manager.invoke("t", &[], None).await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(tool.ref_count(), 0);
    }

    #[tokio::test]
    async fn arbitrary_sql_dry_run_does_not_touch_source() {
        let manager = manager_with_sqlite(10).await;
        let result = manager
            .execute_arbitrary_sql(ArbitrarySqlRequest {
                source_id: "s1".to_string(),
                query: "SELECT * FROM users WHERE active = $1".to_string(),
                params: vec![],
                dry_run: true,
                max_rows: None,
                timeout: None,
            })
            .await
            .unwrap();
        assert_eq!(result.rows[0]["status"], Value::String("valid".to_string()));
    }

    #[tokio::test]
    async fn arbitrary_sql_rejects_excessive_rows_and_timeout() {
        let manager = manager_with_sqlite(10).await;
        let err = manager
            .execute_arbitrary_sql(ArbitrarySqlRequest {
                source_id: "s1".to_string(),
                query: "SELECT 1".to_string(),
                params: vec![],
                dry_run: false,
                max_rows: Some(20_000),
                timeout: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LimitExceeded(_)));

        let err = manager
            .execute_arbitrary_sql(ArbitrarySqlRequest {
                source_id: "s1".to_string(),
                query: "SELECT 1".to_string(),
                params: vec![],
                dry_run: false,
                max_rows: None,
                timeout: Some(Duration::from_secs(10 * 60)),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LimitExceeded(_)));
    }

    #[tokio::test]
    async fn cleanup_reclaims_idle_but_keeps_fresh() {
        let manager = manager_with_sqlite(10).await;
        manager
            .create(CreateRequest {
                name: "t1".to_string(),
                source_id: "s1".to_string(),
                query: "SELECT 1".to_string(),
                description: "d".to_string(),
            })
            .await
            .unwrap();
        manager
            .create(CreateRequest {
                name: "t2".to_string(),
                source_id: "s1".to_string(),
                query: "SELECT 1".to_string(),
                description: "d".to_string(),
            })
            .await
            .unwrap();
        manager.release("t1").await.unwrap();
        manager.release("t2").await.unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        let removed = manager.cleanup().await;
        assert_eq!(removed.len(), 2);

        manager
            .create(CreateRequest {
                name: "t3".to_string(),
                source_id: "s1".to_string(),
                query: "SELECT 1".to_string(),
                description: "d".to_string(),
            })
            .await
            .unwrap();
        manager.release("t3").await.unwrap();
        let removed = manager.cleanup().await;
        assert!(removed.is_empty());
        assert_eq!(manager.list().await, vec!["t3".to_string()]);
    }

    #[tokio::test]
    async fn spawn_cleanup_task_is_at_most_once_and_stop_is_repeatable() {
        let manager = manager_with_sqlite(10).await;
        manager.spawn_cleanup_task();
        manager.spawn_cleanup_task();
        manager.stop_cleanup_task();
        manager.stop_cleanup_task();
    }
}
