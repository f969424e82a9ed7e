//! `sqlite` source kind: the one concrete, in-process SQL driver backing the
//! `sql-statement` tool kind and the dynamic tool manager's arbitrary-SQL
//! executor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use sqlx::{Column, Row, sqlite::SqlitePoolOptions};

use crate::source::{QueryResult, Source, SourceConstructor, SqlCapability};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct SqliteConfig {
    /// Connection string, e.g. `sqlite::memory:` or `sqlite:///path/to.db`.
    dsn: String,
    #[serde(default = "default_max_connections", rename = "maxConnections")]
    max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

/// Constructs [`SqliteSource`] instances from a `kind: sqlite` block.
pub struct SqliteConstructor;

#[async_trait]
impl SourceConstructor for SqliteConstructor {
    async fn construct(&self, name: &str, config: &serde_yaml::Value) -> Result<Arc<dyn Source>> {
        let cfg: SqliteConfig = serde_yaml::from_value(config.clone())
            .map_err(|e| Error::Config(format!("source '{name}': {e}")))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(cfg.max_connections)
            .connect(&cfg.dsn)
            .await
            .map_err(|e| Error::Config(format!("source '{name}': failed to connect: {e}")))?;
        Ok(Arc::new(SqliteSource {
            name: name.to_string(),
            pool,
        }))
    }
}

/// A named handle to a SQLite connection pool.
pub struct SqliteSource {
    name: String,
    pool: sqlx::SqlitePool,
}

impl Source for SqliteSource {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> &str {
        "sqlite"
    }
    fn as_sql(&self) -> Option<&dyn SqlCapability> {
        Some(self)
    }
}

#[async_trait]
impl SqlCapability for SqliteSource {
    async fn execute(
        &self,
        statement: &str,
        params: &[Value],
        max_rows: Option<usize>,
        timeout: Duration,
    ) -> Result<QueryResult> {
        let mut query = sqlx::query(statement);
        for param in params {
            query = bind_value(query, param);
        }
        let pool = self.pool.clone();
        let rows = tokio::time::timeout(timeout, async move { query.fetch_all(&pool).await })
            .await
            .map_err(|_| Error::SourceError(format!("{}: query timed out", self.name)))?
            .map_err(|e| Error::SourceError(format!("{}: {e}", self.name)))?;

        let columns: Vec<String> = rows
            .first()
            .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let mut mapped_rows = Vec::with_capacity(rows.len());
        for row in &rows {
            mapped_rows.push(row_to_map(row)?);
        }

        let mut result = QueryResult {
            columns,
            rows: mapped_rows,
        };
        if let Some(cap) = max_rows {
            result.truncate(cap);
        }
        Ok(result)
    }
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    value: &'q Value,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

fn row_to_map(row: &sqlx::sqlite::SqliteRow) -> Result<serde_json::Map<String, Value>> {
    let mut map = serde_json::Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = if let Ok(v) = row.try_get::<i64, _>(i) {
            Value::from(v)
        } else if let Ok(v) = row.try_get::<f64, _>(i) {
            Value::from(v)
        } else if let Ok(v) = row.try_get::<String, _>(i) {
            Value::String(v)
        } else if let Ok(Some(v)) = row.try_get::<Option<Vec<u8>>, _>(i) {
            Value::String(base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                v,
            ))
        } else {
            Value::Null
        };
        map.insert(column.name().to_string(), value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_source() -> SqliteSource {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteSource {
            name: "s1".to_string(),
            pool,
        }
    }

    #[tokio::test]
    async fn executes_select_and_preserves_column_order() {
        let source = memory_source().await;
        let result = source
            .execute("SELECT 1 AS a, 'x' AS b", &[], None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.columns, vec!["a", "b"]);
        assert_eq!(result.rows[0]["a"], Value::from(1));
        assert_eq!(result.rows[0]["b"], Value::from("x"));
    }

    #[tokio::test]
    async fn binds_positional_params() {
        let source = memory_source().await;
        let result = source
            .execute("SELECT ?1 AS echoed", &[Value::from("hello")], None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.rows[0]["echoed"], Value::from("hello"));
    }

    #[tokio::test]
    async fn truncates_to_max_rows() {
        let source = memory_source().await;
        source
            .execute(
                "CREATE TABLE t(n INTEGER)",
                &[],
                None,
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        for i in 0..5 {
            source
                .execute(
                    "INSERT INTO t(n) VALUES (?1)",
                    &[Value::from(i)],
                    None,
                    Duration::from_secs(5),
                )
                .await
                .unwrap();
        }
        let result = source
            .execute("SELECT n FROM t ORDER BY n", &[], Some(2), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.rows.len(), 2);
    }
}
