//! kbase library crate — a shared, git-synchronized knowledge base for LLM
//! agents: typed entries, an inaccuracy-propagating link graph, hybrid
//! lexical/semantic search, and write-through git mirroring with
//! conflict-aware sync.
//!
//! The primary interface is [`tools::Tools`]; the `kbase` CLI binary (in the
//! `kbase-cli` crate) is a thin driver over it for manual operation.

pub mod commit;
pub mod config;
pub mod error;
pub mod graph;
pub mod mirror;
pub mod search;
pub mod serializer;
pub mod store;
pub mod sync;
pub mod tools;
