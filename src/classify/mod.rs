//! Structural query classification (currently: Cypher read/write gate).

pub mod cypher;

pub use cypher::{Classification, classify_cypher};
