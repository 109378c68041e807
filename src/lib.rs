//! Incremental code property-graph indexer.
//!
//! Source trees are parsed with tree-sitter, written into a SQLite backed
//! property graph, linked across files, optionally enriched with generated
//! descriptions and embeddings, and kept in sync by a file watcher.

pub mod cli;
pub mod config;
pub mod enrich;
pub mod index;
pub mod indexer;
pub mod query;
