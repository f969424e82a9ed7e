//! Tool Gateway
//!
//! An AI-agent-facing tool gateway: it exposes a catalog of named, typed
//! tools over HTTP and the Model Context Protocol (MCP), and executes each
//! invocation against a backend data source (relational databases, graph
//! databases, HTTP APIs, or embedded MCP peers).
//!
//! # Core subsystems
//!
//! - **Parameter Model** ([`params`]) — typed parameter declarations,
//!   request-payload parsing, claim substitution, manifest generation.
//! - **Source Registry** ([`source`]) — a kind-tag plugin registry
//!   constructing backend handles behind narrow capability traits.
//! - **Tool Registry** ([`tool`]) — a kind-tag plugin registry constructing
//!   invocable tools bound to a source.
//! - **Invocation Pipeline** ([`pipeline`]) — locate, authorize, parse,
//!   read-only gate, execute, normalize, return.
//! - **Dynamic Tool Manager** ([`dynamic`]) — a concurrent, refcounted
//!   registry of agent-created tools with idle-TTL reclamation and an
//!   arbitrary-SQL bypass executor.
//!
//! # Protocol Version
//!
//! Implements MCP protocol version 2024-11-05.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth_service;
pub mod classify;
pub mod cli;
pub mod config;
pub mod dynamic;
pub mod error;
pub mod gateway;
pub mod params;
pub mod pipeline;
pub mod protocol;
pub mod security;
pub mod source;
pub mod tool;
pub mod transport;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// MCP Protocol version supported by this gateway.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Set up the global tracing subscriber.
///
/// # Errors
///
/// Never fails in practice; returns `Result` for symmetry with other setup
/// functions and in case subscriber construction grows a fallible step.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
