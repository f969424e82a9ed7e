//! `http` source kind: a REST-style backend reached via a shared
//! [`reqwest::Client`] and an SSRF-checked base URL.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::security::ssrf::validate_url_not_ssrf;
use crate::source::{HttpCapability, Source, SourceConstructor};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct HttpConfig {
    #[serde(rename = "baseUrl")]
    base_url: String,
    #[serde(default)]
    headers: std::collections::HashMap<String, String>,
    #[serde(default = "default_timeout_secs", rename = "timeoutSecs")]
    timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

/// Constructs [`HttpSource`] instances from a `kind: http` block.
pub struct HttpConstructor;

#[async_trait]
impl SourceConstructor for HttpConstructor {
    async fn construct(&self, name: &str, config: &serde_yaml::Value) -> Result<Arc<dyn Source>> {
        let cfg: HttpConfig = serde_yaml::from_value(config.clone())
            .map_err(|e| Error::Config(format!("source '{name}': {e}")))?;
        validate_url_not_ssrf(&cfg.base_url)
            .map_err(|e| Error::Config(format!("source '{name}': {e}")))?;

        let mut header_map = reqwest::header::HeaderMap::new();
        for (key, value) in &cfg.headers {
            let header_name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| Error::Config(format!("source '{name}': invalid header '{key}': {e}")))?;
            let header_value = reqwest::header::HeaderValue::from_str(value)
                .map_err(|e| Error::Config(format!("source '{name}': invalid header value for '{key}': {e}")))?;
            header_map.insert(header_name, header_value);
        }

        let client = reqwest::Client::builder()
            .default_headers(header_map)
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .user_agent(format!("toolgate/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("source '{name}': failed to build client: {e}")))?;

        Ok(Arc::new(HttpSource {
            name: name.to_string(),
            base_url: cfg.base_url,
            client,
        }))
    }
}

/// A named handle to a REST backend.
pub struct HttpSource {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl Source for HttpSource {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> &str {
        "http"
    }
    fn as_http(&self) -> Option<&dyn HttpCapability> {
        Some(self)
    }
}

#[async_trait]
impl HttpCapability for HttpSource {
    async fn call(
        &self,
        method: &str,
        path: &str,
        query: &[(String, Value)],
        body: Option<Value>,
    ) -> Result<Value> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'));
        let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|e| Error::SourceError(format!("{}: invalid HTTP method: {e}", self.name)))?;

        let mut request = self.client.request(method, &url);
        if !query.is_empty() {
            let pairs: Vec<(String, String)> = query
                .iter()
                .map(|(k, v)| (k.clone(), value_to_query_string(v)))
                .collect();
            request = request.query(&pairs);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::SourceError(format!("{}: {e}", self.name)))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::SourceError(format!("{}: {e}", self.name)))?;

        if !status.is_success() {
            let truncated: String = text.chars().take(500).collect();
            return Err(Error::SourceError(format!(
                "{}: HTTP {}: {truncated}",
                self.name,
                status.as_u16()
            )));
        }

        serde_json::from_str(&text).or(Ok(Value::String(text)))
    }
}

fn value_to_query_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_private_base_url() {
        let cfg: serde_yaml::Value =
            serde_yaml::from_str("kind: http\nbaseUrl: \"http://127.0.0.1:9999\"\n").unwrap();
        let err = HttpConstructor.construct("s1", &cfg).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn value_to_query_string_handles_scalars() {
        assert_eq!(value_to_query_string(&Value::from("x")), "x");
        assert_eq!(value_to_query_string(&Value::from(5)), "5");
    }
}
