//! Built-in tool kinds: one concrete action per kind, each bound to a
//! source-provided capability.

pub mod cypher_execute;
pub mod http_request;
pub mod mcp_invoke;
pub mod sql_statement;
