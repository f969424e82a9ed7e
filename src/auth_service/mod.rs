//! Auth Service Registry: verifies a caller-presented credential against
//! configured `authServices:` entries, producing the claim maps consulted by
//! parameter binding ([`crate::params::bind`]) and the tool-level
//! authorization gate ([`crate::tool::Tool::authorized`]).
//!
//! Mirrors the Source/Tool registry's kind-tag constructor pattern
//! ([`crate::source::SourceRegistry`]): each auth-service kind registers a
//! constructor that decodes its own YAML block. `api-key` is the one
//! concrete kind implemented here — see `DESIGN.md` for why kinds implying
//! an outbound verification call (`google`, ...) are left unregistered
//! rather than guessed at.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::Value;

use crate::{Error, Result};

/// A configured verifier: given the credential presented in its configured
/// header, returns the claims it attests to, or `None` if it doesn't verify.
pub trait AuthService: Send + Sync {
    /// Unique name this service was registered under.
    fn name(&self) -> &str;
    /// The kind tag used to construct this service (`api-key`, ...).
    fn kind(&self) -> &str;
    /// The request header this service reads its credential from.
    fn credential_header(&self) -> &str;
    /// Verify `credential` and return its claim map on success.
    fn verify(&self, credential: Option<&str>) -> Option<HashMap<String, Value>>;
}

/// An auth-service-kind constructor: decodes a YAML block into a
/// kind-specific config and returns a configured [`AuthService`].
#[async_trait]
pub trait AuthServiceConstructor: Send + Sync {
    /// Construct an auth service named `name` from its YAML configuration block.
    async fn construct(&self, name: &str, config: &serde_yaml::Value) -> Result<Arc<dyn AuthService>>;
}

/// Process-wide kind -> constructor map, plus the live, named service
/// instances produced from configuration.
pub struct AuthServiceRegistry {
    constructors: DashMap<String, Arc<dyn AuthServiceConstructor>>,
    services: DashMap<String, Arc<dyn AuthService>>,
}

impl Default for AuthServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthServiceRegistry {
    /// Create an empty registry with no kinds registered.
    #[must_use]
    pub fn new() -> Self {
        Self {
            constructors: DashMap::new(),
            services: DashMap::new(),
        }
    }

    /// Register an auth-service-kind constructor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if `kind` is already registered.
    pub fn register_kind(&self, kind: impl Into<String>, constructor: Arc<dyn AuthServiceConstructor>) -> Result<()> {
        let kind = kind.into();
        if self.constructors.contains_key(&kind) {
            return Err(Error::Internal(format!(
                "duplicate auth-service kind registration: {kind}"
            )));
        }
        self.constructors.insert(kind, constructor);
        Ok(())
    }

    /// Build and register an auth-service instance named `name` from its
    /// `kind` + rest-of-block YAML value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the kind is unregistered or the name is
    /// already taken, or whatever error the kind's constructor returns.
    pub async fn build(&self, name: &str, config: &serde_yaml::Value) -> Result<()> {
        if self.services.contains_key(name) {
            return Err(Error::Config(format!("duplicate auth service name: {name}")));
        }
        let kind = config
            .get("kind")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Config(format!("auth service '{name}' missing 'kind'")))?;
        let constructor = self
            .constructors
            .get(kind)
            .ok_or_else(|| Error::Config(format!("unregistered auth-service kind: {kind}")))?
            .clone();
        let service = constructor.construct(name, config).await?;
        self.services.insert(name.to_string(), service);
        Ok(())
    }

    /// Look up a configured auth service by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn AuthService>> {
        self.services.get(name).map(|e| e.clone())
    }

    /// Names of all configured auth services.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.services.iter().map(|e| e.key().clone()).collect()
    }
}

/// Register every built-in auth-service kind exactly once. Call this before
/// loading configuration.
///
/// # Errors
///
/// Propagates [`Error::Internal`] if a kind is somehow already registered.
pub fn register_default_kinds(registry: &AuthServiceRegistry) -> Result<()> {
    registry.register_kind("api-key", Arc::new(ApiKeyConstructor))?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ApiKeyConfig {
    #[serde(default = "default_header_name", rename = "headerName")]
    header_name: String,
    /// Map of presented key value -> claims it attests to.
    keys: HashMap<String, HashMap<String, Value>>,
}

fn default_header_name() -> String {
    "x-api-key".to_string()
}

/// Constructs [`ApiKeyService`] instances from a `kind: api-key` block.
pub struct ApiKeyConstructor;

#[async_trait]
impl AuthServiceConstructor for ApiKeyConstructor {
    async fn construct(&self, name: &str, config: &serde_yaml::Value) -> Result<Arc<dyn AuthService>> {
        let cfg: ApiKeyConfig = serde_yaml::from_value(config.clone())
            .map_err(|e| Error::Config(format!("auth service '{name}': {e}")))?;
        Ok(Arc::new(ApiKeyService {
            name: name.to_string(),
            header_name: cfg.header_name,
            keys: cfg.keys,
        }))
    }
}

/// Verifies a caller-presented API key against a configured key -> claims
/// map. The simplest auth-service kind: no network call, no token format to
/// parse, just an exact-match lookup against configuration.
pub struct ApiKeyService {
    name: String,
    header_name: String,
    keys: HashMap<String, HashMap<String, Value>>,
}

impl AuthService for ApiKeyService {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> &str {
        "api-key"
    }
    fn credential_header(&self) -> &str {
        &self.header_name
    }
    fn verify(&self, credential: Option<&str>) -> Option<HashMap<String, Value>> {
        self.keys.get(credential?).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn api_key_verifies_configured_key_and_rejects_unknown() {
        let registry = AuthServiceRegistry::new();
        register_default_kinds(&registry).unwrap();
        let cfg: serde_yaml::Value =
            serde_yaml::from_str("kind: api-key\nkeys:\n  secret-1:\n    email: a@b.com\n").unwrap();
        registry.build("google-auth", &cfg).await.unwrap();
        let service = registry.get("google-auth").unwrap();

        let claims = service.verify(Some("secret-1")).unwrap();
        assert_eq!(claims["email"], Value::String("a@b.com".to_string()));
        assert!(service.verify(Some("wrong")).is_none());
        assert!(service.verify(None).is_none());
    }

    #[tokio::test]
    async fn custom_header_name_is_honored() {
        let registry = AuthServiceRegistry::new();
        register_default_kinds(&registry).unwrap();
        let cfg: serde_yaml::Value = serde_yaml::from_str(
            "kind: api-key\nheaderName: x-auth-google\nkeys:\n  k:\n    sub: '1'\n",
        )
        .unwrap();
        registry.build("google-auth", &cfg).await.unwrap();
        let service = registry.get("google-auth").unwrap();
        assert_eq!(service.credential_header(), "x-auth-google");
    }

    #[tokio::test]
    async fn duplicate_kind_registration_is_fatal() {
        let registry = AuthServiceRegistry::new();
        register_default_kinds(&registry).unwrap();
        let err = registry.register_kind("api-key", Arc::new(ApiKeyConstructor)).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[tokio::test]
    async fn build_rejects_unregistered_kind() {
        let registry = AuthServiceRegistry::new();
        let cfg: serde_yaml::Value = serde_yaml::from_str("kind: google\n").unwrap();
        let err = registry.build("g", &cfg).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn build_rejects_duplicate_name() {
        let registry = AuthServiceRegistry::new();
        register_default_kinds(&registry).unwrap();
        let cfg: serde_yaml::Value = serde_yaml::from_str("kind: api-key\nkeys: {}\n").unwrap();
        registry.build("svc", &cfg).await.unwrap();
        let err = registry.build("svc", &cfg).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
