//! Configuration management
//!
//! The gateway configuration is intentionally shallow at the top level: a
//! `server`/`auth`/`security` block for ambient concerns, and three
//! kind-polymorphic maps (`sources`, `tools`, `auth_services`) whose entries
//! are decoded a second time by the relevant plugin constructor once its
//! `kind` tag is known (see [`crate::source::registry`] and
//! [`crate::tool::registry`]).

use std::{collections::HashMap, env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::dynamic::ManagerConfig;
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
#[derive(Default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    /// Variables are set into the process environment for `{env.VAR}` resolution.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Gateway ingress authentication (bearer/API key in front of the whole
    /// HTTP surface — distinct from per-tool `authServices`).
    pub auth: AuthConfig,
    /// Security configuration (input sanitization, SSRF protection)
    pub security: SecurityConfig,
    /// Dynamic tool manager configuration
    pub dynamic_tools: ManagerConfig,
    /// Source declarations, keyed by source name. Each value must carry a
    /// `kind` field; the rest is kind-specific and decoded by that kind's
    /// constructor.
    #[serde(default)]
    pub sources: HashMap<String, serde_yaml::Value>,
    /// Static tool declarations, keyed by tool name. Same kind-polymorphic
    /// shape as `sources`.
    #[serde(default)]
    pub tools: HashMap<String, serde_yaml::Value>,
    /// Auth service declarations (claim verifiers), keyed by service name.
    #[serde(rename = "authServices", default)]
    pub auth_services: HashMap<String, serde_yaml::Value>,
}

/// Security configuration for the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Enable input sanitization (null byte rejection, control char stripping, NFC)
    pub sanitize_input: bool,
    /// Enable SSRF protection for outbound URLs configured on `http` sources
    pub ssrf_protection: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            sanitize_input: true,
            ssrf_protection: true,
        }
    }
}

/// Authentication configuration for gateway ingress
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Enable authentication (default: false for backwards compatibility)
    pub enabled: bool,

    /// Bearer token for simple authentication.
    /// Supports: literal value, `env:VAR_NAME`, or `auto` (generates random token)
    #[serde(default)]
    pub bearer_token: Option<String>,

    /// API keys for multi-client access
    #[serde(default)]
    pub api_keys: Vec<ApiKeyConfig>,

    /// Paths that bypass authentication (default: `["/health"]`)
    #[serde(default = "default_public_paths")]
    pub public_paths: Vec<String>,
}

fn default_public_paths() -> Vec<String> {
    vec!["/health".to_string()]
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bearer_token: None,
            api_keys: Vec::new(),
            public_paths: default_public_paths(),
        }
    }
}

impl AuthConfig {
    /// Resolve the bearer token (expand env vars, generate if `auto`)
    #[must_use]
    pub fn resolve_bearer_token(&self) -> Option<String> {
        self.bearer_token.as_ref().map(|token| {
            if token == "auto" {
                use rand::Rng;
                let random_bytes: [u8; 32] = rand::rng().random();
                format!(
                    "toolgate_{}",
                    base64::Engine::encode(
                        &base64::engine::general_purpose::URL_SAFE_NO_PAD,
                        random_bytes
                    )
                )
            } else if let Some(var_name) = token.strip_prefix("env:") {
                env::var(var_name).unwrap_or_else(|_| token.clone())
            } else {
                token.clone()
            }
        })
    }
}

/// API key configuration for multi-client access
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    /// The API key value (supports `env:VAR_NAME`)
    pub key: String,
    /// Human-readable name for this client
    #[serde(default)]
    pub name: String,
}

impl ApiKeyConfig {
    /// Resolve the API key (expand env vars)
    #[must_use]
    pub fn resolve_key(&self) -> String {
        if let Some(var_name) = self.key.strip_prefix("env:") {
            env::var(var_name).unwrap_or_else(|_| self.key.clone())
        } else {
            self.key.clone()
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("TOOLGATE_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.expand_env_vars();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand `${VAR}` and `${VAR:-default}` patterns inside source/tool
    /// configuration string values (credentials, base URLs, headers).
    fn expand_env_vars(&mut self) {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();
        for value in self.sources.values_mut() {
            Self::expand_value(&re, value);
        }
        for value in self.tools.values_mut() {
            Self::expand_value(&re, value);
        }
        for value in self.auth_services.values_mut() {
            Self::expand_value(&re, value);
        }
    }

    fn expand_value(re: &Regex, value: &mut serde_yaml::Value) {
        match value {
            serde_yaml::Value::String(s) => {
                *s = Self::expand_string(re, s);
            }
            serde_yaml::Value::Sequence(seq) => {
                for item in seq {
                    Self::expand_value(re, item);
                }
            }
            serde_yaml::Value::Mapping(map) => {
                for (_, v) in map.iter_mut() {
                    Self::expand_value(re, v);
                }
            }
            _ => {}
        }
    }

    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8420,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024,
        }
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(hours) = s.strip_suffix('h') {
            hours
                .parse::<u64>()
                .map(|h| Duration::from_secs(h * 3600))
                .map_err(serde::de::Error::custom)
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_env_files_sets_env_vars() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join("test.env");
        let mut f = std::fs::File::create(&env_path).unwrap();
        writeln!(f, "TOOLGATE_TEST_KEY_A=hello_from_env_file").unwrap();
        writeln!(f, "TOOLGATE_TEST_KEY_B=42").unwrap();
        drop(f);

        let config = Config {
            env_files: vec![env_path.to_string_lossy().to_string()],
            ..Default::default()
        };
        config.load_env_files();

        assert_eq!(
            env::var("TOOLGATE_TEST_KEY_A").unwrap(),
            "hello_from_env_file"
        );
        assert_eq!(env::var("TOOLGATE_TEST_KEY_B").unwrap(), "42");
    }

    #[test]
    fn test_load_env_files_skips_missing() {
        let config = Config {
            env_files: vec!["/nonexistent/path/.env".to_string()],
            ..Default::default()
        };
        config.load_env_files();
    }

    #[test]
    fn test_sources_and_tools_deserialized_from_yaml() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 8421
sources:
  s1:
    kind: sqlite
    dsn: "sqlite::memory:"
tools:
  echo:
    kind: sql-statement
    source: s1
    description: "echoes a row"
    statement: "SELECT 1"
    parameters: []
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 8421);
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.tools.len(), 1);
        assert_eq!(
            config.sources["s1"].get("kind").and_then(|v| v.as_str()),
            Some("sqlite")
        );
    }

    #[test]
    fn test_unknown_top_level_field_rejected() {
        let yaml = "totally_unknown_field: 1\n";
        let result: std::result::Result<Config, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
    }
}
