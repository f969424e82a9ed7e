//! Error types for the gateway

use std::io;

use thiserror::Error;

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// YAML parse / validation / unknown kind / missing required field — fatal at load.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tool or source name missing.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Auth-required set disjoint from the caller's verified auth services.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Parameter binding failed: missing required value, type mismatch, or
    /// an array element that failed to convert. Always names the parameter.
    #[error("Parameter error on '{param}': {message}")]
    ParamError {
        /// Parameter name
        param: String,
        /// Description of the failure
        message: String,
    },

    /// A configured safety cap was exceeded (dynamic-tool count, max rows,
    /// max timeout, max query length).
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    /// A write-class operation was attempted on a read-only tool.
    #[error("{0} is read-only and cannot execute write queries")]
    ReadOnlyViolation(String),

    /// `RemoveDynamicTool` called while the entry's reference count is > 0.
    #[error("Tool '{0}' is in use and cannot be removed")]
    InUse(String),

    /// Backend refusal, deadline exceeded, or network failure. Carries an
    /// already-redacted description; never the raw statement with bound
    /// parameter values.
    #[error("Source error: {0}")]
    SourceError(String),

    /// Transport-level error talking to an MCP peer.
    #[error("Transport error: {0}")]
    Transport(String),

    /// MCP/JSON-RPC protocol error (malformed frame, bad method).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON-RPC error with an explicit code, for relaying a peer's own error.
    #[error("JSON-RPC error {code}: {message}")]
    JsonRpc {
        /// Error code
        code: i32,
        /// Error message
        message: String,
        /// Optional data
        data: Option<serde_json::Value>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// SQL driver error
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    /// Server shutdown in progress
    #[error("Server shutdown")]
    Shutdown,

    /// Invariant broken (e.g. duplicate kind registered at init) — fatal.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a JSON-RPC error
    pub fn json_rpc(code: i32, message: impl Into<String>) -> Self {
        Self::JsonRpc {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create a parameter error naming the offending parameter.
    pub fn param(param: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ParamError {
            param: param.into(),
            message: message.into(),
        }
    }

    /// Convert to a JSON-RPC error code
    #[must_use]
    pub fn to_rpc_code(&self) -> i32 {
        match self {
            Self::JsonRpc { code, .. } => *code,
            Self::Json(_) => rpc_codes::PARSE_ERROR,
            Self::Protocol(_) => rpc_codes::INVALID_REQUEST,
            Self::NotFound(_) => -32001,
            Self::ParamError { .. } => rpc_codes::INVALID_PARAMS,
            Self::Unauthorized(_) => -32002,
            Self::LimitExceeded(_) => -32003,
            Self::ReadOnlyViolation(_) => -32004,
            Self::InUse(_) => -32005,
            Self::SourceError(_) | Self::Transport(_) | Self::Sql(_) | Self::Http(_) => {
                rpc_codes::SERVER_ERROR_START
            }
            _ => rpc_codes::INTERNAL_ERROR,
        }
    }

    /// Convert to the HTTP status code the §6/§7 surface expects.
    #[must_use]
    pub fn to_http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Unauthorized(_) => 401,
            Self::ParamError { .. }
            | Self::LimitExceeded(_)
            | Self::ReadOnlyViolation(_)
            | Self::InUse(_) => 400,
            Self::Config(_) | Self::Internal(_) => 500,
            Self::SourceError(_) | Self::Transport(_) | Self::Sql(_) | Self::Http(_) => 502,
            _ => 500,
        }
    }
}

/// Standard JSON-RPC error codes
pub mod rpc_codes {
    /// Parse error - Invalid JSON
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request - Not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Server error range start
    pub const SERVER_ERROR_START: i32 = -32000;
    /// Server error range end
    pub const SERVER_ERROR_END: i32 = -32099;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_error_names_the_parameter() {
        let err = Error::param("limit", "expected integer");
        match &err {
            Error::ParamError { param, .. } => assert_eq!(param, "limit"),
            _ => panic!("wrong variant"),
        }
        assert_eq!(err.to_http_status(), 400);
    }

    #[test]
    fn in_use_maps_to_400() {
        assert_eq!(Error::InUse("t".into()).to_http_status(), 400);
    }

    #[test]
    fn not_found_maps_to_404() {
        assert_eq!(Error::NotFound("t".into()).to_http_status(), 404);
    }
}
