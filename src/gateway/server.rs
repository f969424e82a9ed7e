//! Gateway server: builds the Source/Tool registries and the Dynamic Tool
//! Manager from configuration, wires them through the invocation pipeline,
//! and serves the HTTP surface with graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::auth::ResolvedAuthConfig;
use super::router::{AppState, create_router};
use crate::auth_service::{AuthServiceRegistry, register_default_kinds as register_default_auth_service_kinds};
use crate::config::Config;
use crate::dynamic::DynamicToolManager;
use crate::pipeline::Pipeline;
use crate::source::{SourceRegistry, register_default_kinds as register_default_source_kinds};
use crate::tool::{ToolRegistry, register_default_kinds as register_default_tool_kinds};
use crate::{Error, Result};

/// The tool gateway server.
pub struct Gateway {
    config: Config,
    sources: Arc<SourceRegistry>,
    tools: Arc<ToolRegistry>,
    dynamic: Arc<DynamicToolManager>,
    auth_services: Arc<AuthServiceRegistry>,
    shutdown_tx: Option<tokio::sync::broadcast::Sender<()>>,
}

impl Gateway {
    /// Build a gateway from configuration: registers every built-in source
    /// and tool kind, then constructs every configured source and tool
    /// instance.
    ///
    /// # Errors
    ///
    /// Returns an error if any configured source or tool fails to construct
    /// (unknown kind, unregistered dependency, bad parameter declaration).
    pub async fn new(config: Config) -> Result<Self> {
        let sources = Arc::new(SourceRegistry::new());
        register_default_source_kinds(&sources)?;
        for (name, cfg) in &config.sources {
            sources.build(name, cfg).await?;
            info!(source = %name, "Registered source");
        }

        let tools = Arc::new(ToolRegistry::new());
        register_default_tool_kinds(&tools)?;
        for (name, cfg) in &config.tools {
            tools.build(name, cfg, &sources).await?;
            info!(tool = %name, "Registered tool");
        }

        let dynamic = DynamicToolManager::new(config.dynamic_tools.clone(), Arc::clone(&sources));

        let auth_services = Arc::new(AuthServiceRegistry::new());
        register_default_auth_service_kinds(&auth_services)?;
        for (name, cfg) in &config.auth_services {
            auth_services.build(name, cfg).await?;
            info!(auth_service = %name, "Registered auth service");
        }

        Ok(Self {
            config,
            sources,
            tools,
            dynamic,
            auth_services,
            shutdown_tx: None,
        })
    }

    /// Run the gateway until a shutdown signal is received, then drain and
    /// shut down gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot bind to the configured address
    /// or if an unrecoverable runtime error occurs.
    pub async fn run(mut self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        let pipeline = Arc::new(Pipeline::new(Arc::clone(&self.tools), Arc::clone(&self.dynamic)));
        self.dynamic.spawn_cleanup_task();

        let auth_config = Arc::new(ResolvedAuthConfig::from_config(&self.config.auth));

        let state = Arc::new(AppState {
            pipeline,
            sources: Arc::clone(&self.sources),
            auth_services: Arc::clone(&self.auth_services),
            auth_config,
            sanitize_input: self.config.security.sanitize_input,
        });

        let app = create_router(state);
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("TOOLGATE v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(sources = self.sources.names().len(), tools = self.tools.names().len(), "Catalog loaded");

        if self.config.auth.enabled {
            let key_count = self.config.auth.api_keys.len();
            let has_bearer = self.config.auth.bearer_token.is_some();
            info!("AUTHENTICATION enabled (bearer={}, api_keys={})", has_bearer, key_count);
        } else {
            warn!("AUTHENTICATION disabled - gateway is open to all requests");
        }

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        self.dynamic.stop_cleanup_task();
        info!("Gateway shut down");
        Ok(())
    }
}

/// Shutdown signal handler: Ctrl+C or SIGTERM.
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
