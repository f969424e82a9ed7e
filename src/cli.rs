//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

/// Tool gateway: exposes a typed tool catalog over HTTP and MCP.
#[derive(Parser, Debug)]
#[command(name = "toolgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "TOOLGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "TOOLGATE_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "TOOLGATE_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "TOOLGATE_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "TOOLGATE_LOG_FORMAT")]
    pub log_format: Option<String>,
}
